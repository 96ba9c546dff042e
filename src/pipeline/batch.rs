//! Batch analysis pipeline.
//!
//! Owns one batch and its member jobs: fans out single-URL pipelines under a
//! counting semaphore, aggregates child progress onto the batch key, applies
//! the quorum rule over child terminal states, and drives the comparison.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::select_all;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bus::{ProgressBus, ProgressEvent};
use crate::compare;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::model::RunStatus;
use crate::observability;
use crate::pipeline::JobPipeline;
use crate::score::semantic::SemanticScorer;
use crate::store::{BatchMutation, EntityStore};

/// Minimum spacing between aggregate progress writes to the batch row.
/// Events on the bus are not coalesced, only durable writes are.
const PROGRESS_WRITE_INTERVAL: Duration = Duration::from_secs(1);

const ERR_ALL_FAILED: &str = "all analyses failed";
const ERR_QUORUM: &str = "insufficient successful analyses (minimum 2 required)";

/// Pipeline for one batch.
pub struct BatchPipeline {
	store: Arc<dyn EntityStore>,
	bus: Arc<ProgressBus>,
	fetcher: Arc<dyn Fetcher>,
	scorer: Arc<dyn SemanticScorer>,
	fetch_timeout: Duration,
	concurrency: usize,
	/// Optional wall-clock bound; on expiry still-running children are
	/// cooperatively cancelled.
	batch_timeout: Option<Duration>,
}

/// Aggregate-progress state: monotonic publishing plus durable-write
/// coalescing.
struct WriteState {
	last_published: u8,
	last_write: Instant,
	last_written: u8,
}

impl BatchPipeline {
	pub fn new(
		store: Arc<dyn EntityStore>,
		bus: Arc<ProgressBus>,
		fetcher: Arc<dyn Fetcher>,
		scorer: Arc<dyn SemanticScorer>,
		fetch_timeout: Duration,
		concurrency: usize,
	) -> Self {
		Self {
			store,
			bus,
			fetcher,
			scorer,
			fetch_timeout,
			concurrency: concurrency.max(1),
			batch_timeout: None,
		}
	}

	pub fn with_batch_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.batch_timeout = timeout;
		self
	}

	/// Drive the batch to a terminal state. Child failures are contained;
	/// only an unreadable batch or a store failure propagates.
	pub async fn run(&self, batch_id: Uuid, cancel: CancellationToken) -> Result<()> {
		let snapshot = self.store.snapshot_batch(batch_id).await?;
		if snapshot.batch.status.is_terminal() {
			info!(batch_id = %batch_id, status = %snapshot.batch.status, "batch already terminal; skipping");
			return Ok(());
		}

		let total = snapshot.batch.total;
		let child_ids: Vec<Uuid> = snapshot.members.iter().map(|m| m.member.job_id).collect();

		self.store
			.advance_batch(batch_id, BatchMutation::status(RunStatus::Processing, 5))
			.await?;
		self.bus.publish(
			batch_id,
			ProgressEvent::batch(RunStatus::Processing, 5, "Starting batch analysis"),
		);

		// Subscribe to every child key before the children start so no
		// progress event is missed, then fan out under the semaphore.
		let aggregator = self.spawn_aggregator(batch_id, &child_ids);
		let cancel_children = cancel.child_token();

		if let Some(timeout) = self.batch_timeout {
			let timeout_token = cancel_children.clone();
			tokio::spawn(async move {
				tokio::time::sleep(timeout).await;
				if !timeout_token.is_cancelled() {
					warn!("batch timeout elapsed; cancelling children");
					timeout_token.cancel();
				}
			});
		}

		let semaphore = Arc::new(Semaphore::new(self.concurrency));
		let mut handles = Vec::with_capacity(child_ids.len());
		for job_id in &child_ids {
			let job_id = *job_id;
			let semaphore = semaphore.clone();
			let pipeline = JobPipeline::new(
				self.store.clone(),
				self.bus.clone(),
				self.fetcher.clone(),
				self.scorer.clone(),
				self.fetch_timeout,
			);
			let token = cancel_children.clone();
			handles.push(tokio::spawn(async move {
				// Permit is held from before CRAWL until terminal transition.
				let Ok(_permit) = semaphore.acquire_owned().await else {
					return;
				};
				// Failures are recorded on the child row by the pipeline.
				let _ = pipeline.run(job_id, token).await;
			}));
		}

		for handle in handles {
			if let Err(e) = handle.await {
				error!(batch_id = %batch_id, error = %e, "child pipeline task panicked");
			}
		}

		// All children terminal: the child channels are retired, so the
		// aggregator drains and exits on its own.
		let _ = aggregator.await;

		self.finish(batch_id, total).await
	}

	/// Merge all child progress streams into the batch aggregate:
	/// `floor(sum(child progress) / total)`, clamped at 99 until terminal.
	/// Every aggregate is published; durable writes are coalesced to at most
	/// one per second and kept monotonic.
	fn spawn_aggregator(&self, batch_id: Uuid, child_ids: &[Uuid]) -> tokio::task::JoinHandle<()> {
		let total = child_ids.len() as u32;
		let progress: Arc<Vec<AtomicU8>> =
			Arc::new(child_ids.iter().map(|_| AtomicU8::new(0)).collect());

		let streams = child_ids
			.iter()
			.enumerate()
			.map(|(idx, id)| {
				BroadcastStream::new(self.bus.subscribe(*id))
					.map(move |event| (idx, event))
					.boxed()
			})
			.collect::<Vec<_>>();

		let store = self.store.clone();
		let bus = self.bus.clone();

		tokio::spawn(async move {
			let mut merged = select_all(streams);
			let mut state = WriteState {
				last_published: 5,
				last_write: Instant::now(),
				last_written: 5,
			};

			while let Some((idx, event)) = merged.next().await {
				let event = match event {
					Ok(event) => event,
					// A lagging subscription drops old events; newer ones
					// carry larger progress, so just continue.
					Err(_) => continue,
				};

				progress[idx].store(event.progress, Ordering::Relaxed);
				let sum: u32 = progress.iter().map(|p| p.load(Ordering::Relaxed) as u32).sum();
				let aggregate = ((sum / total) as u8).min(99);

				// The aggregate trails the initial 5% transition until the
				// children get going; only ever publish increases.
				if aggregate <= state.last_published {
					continue;
				}
				state.last_published = aggregate;

				bus.publish(
					batch_id,
					ProgressEvent::batch(RunStatus::Processing, aggregate, "Analyzing URLs")
						.with_extra(serde_json::json!({
							"completed_children": progress
								.iter()
								.filter(|p| p.load(Ordering::Relaxed) == 100)
								.count(),
						})),
				);

				if aggregate > state.last_written
					&& state.last_write.elapsed() >= PROGRESS_WRITE_INTERVAL
				{
					match store
						.advance_batch(batch_id, BatchMutation::progress(aggregate))
						.await
					{
						Ok(_) => {
							state.last_written = aggregate;
							state.last_write = Instant::now();
						}
						Err(e) => {
							// Terminal transition may have raced us; stop writing.
							warn!(batch_id = %batch_id, error = %e, "aggregate progress write failed");
						}
					}
				}
			}
		})
	}

	/// Quorum rule over child terminal states, then the terminal transition.
	async fn finish(&self, batch_id: Uuid, total: u32) -> Result<()> {
		let snapshot = self.store.snapshot_batch(batch_id).await?;
		let completed = snapshot.completed_count();
		let failed = total - completed;

		if completed == 0 {
			return self
				.fail_batch(batch_id, completed, failed, ERR_ALL_FAILED)
				.await;
		}
		if completed == 1 {
			return self.fail_batch(batch_id, completed, failed, ERR_QUORUM).await;
		}

		match compare::aggregate(&snapshot, self.scorer.as_ref()).await {
			Ok(comparison) => {
				let mutation = BatchMutation {
					status: Some(RunStatus::Completed),
					progress: Some(100),
					completed_count: Some(completed),
					failed_count: Some(failed),
					error_message: None,
				};
				self.store
					.save_comparison(batch_id, mutation, &comparison)
					.await?;

				observability::record_batch_completed();
				info!(batch_id = %batch_id, completed, failed, "batch completed");
				self.bus.publish(
					batch_id,
					ProgressEvent::batch(RunStatus::Completed, 100, "Batch analysis completed")
						.with_extra(serde_json::json!({
							"completed_count": completed,
							"failed_count": failed,
							"total": total,
						})),
				);
				self.bus.retire(batch_id);
				Ok(())
			}
			Err(e) => {
				// Aggregator failure fails the batch, not its children; any
				// already-persisted child artifacts remain.
				self.fail_batch(batch_id, completed, failed, &e.to_string())
					.await
			}
		}
	}

	async fn fail_batch(
		&self,
		batch_id: Uuid,
		completed: u32,
		failed: u32,
		message: &str,
	) -> Result<()> {
		let mutation = BatchMutation {
			status: Some(RunStatus::Failed),
			progress: Some(100),
			completed_count: Some(completed),
			failed_count: Some(failed),
			error_message: Some(message.to_string()),
		};
		if let Err(e) = self.store.advance_batch(batch_id, mutation).await {
			error!(batch_id = %batch_id, error = %e, "failed to record batch failure");
			return Err(e);
		}

		observability::record_batch_failed();
		warn!(batch_id = %batch_id, completed, failed, message, "batch failed");
		self.bus.publish(
			batch_id,
			ProgressEvent::batch(RunStatus::Failed, 100, message).with_extra(serde_json::json!({
				"completed_count": completed,
				"failed_count": failed,
			})),
		);
		self.bus.retire(batch_id);
		// A failed batch is still an orderly terminal transition; nothing
		// propagates to the worker.
		Ok(())
	}
}
