//! Fixed-size worker pools executing pipelines off the request path.
//!
//! Submission is non-blocking and FIFO. Each worker pulls one id at a time
//! and drives its pipeline to a terminal state; the pool guarantees at most
//! one concurrent pipeline instance per id, and re-submitting an id that is
//! queued or running is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

/// Queued submissions beyond the active workers.
const QUEUE_CAPACITY: usize = 1024;

/// A pool of workers, each owning its pipeline run end to end.
pub struct WorkerPool {
	name: &'static str,
	tx: mpsc::Sender<Uuid>,
	owned: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
	shutdown: CancellationToken,
}

impl WorkerPool {
	/// Start `workers` workers running `runner` for each submitted id. The
	/// runner receives a per-id cancellation token; errors it returns are
	/// confined to that id and never crash the pool.
	pub fn start<F, Fut>(name: &'static str, workers: usize, runner: F) -> Arc<Self>
	where
		F: Fn(Uuid, CancellationToken) -> Fut + Send + Sync + Clone + 'static,
		Fut: Future<Output = crate::error::Result<()>> + Send + 'static,
	{
		let (tx, rx) = mpsc::channel::<Uuid>(QUEUE_CAPACITY);
		let rx = Arc::new(tokio::sync::Mutex::new(rx));
		let owned: Arc<Mutex<HashMap<Uuid, CancellationToken>>> =
			Arc::new(Mutex::new(HashMap::new()));
		let shutdown = CancellationToken::new();

		for worker_index in 0..workers.max(1) {
			let rx = rx.clone();
			let owned = owned.clone();
			let runner = runner.clone();
			let shutdown = shutdown.clone();

			tokio::spawn(async move {
				loop {
					// Hold the receiver lock only while waiting for an id so
					// idle workers queue fairly behind each other.
					let id = {
						let mut rx = rx.lock().await;
						tokio::select! {
							id = rx.recv() => id,
							_ = shutdown.cancelled() => None,
						}
					};
					let Some(id) = id else {
						break;
					};

					let token = {
						let owned = owned.lock().expect("worker pool lock poisoned");
						owned.get(&id).cloned()
					};
					// Absent token means the submission was withdrawn.
					let Some(token) = token else {
						continue;
					};

					if let Err(e) = runner(id, token).await {
						error!(pool = name, worker = worker_index, id = %id, error = %e, "pipeline ended with error");
					}

					owned
						.lock()
						.expect("worker pool lock poisoned")
						.remove(&id);
				}
			});
		}

		info!(pool = name, workers = workers.max(1), "worker pool started");
		Arc::new(Self {
			name,
			tx,
			owned,
			shutdown,
		})
	}

	/// Enqueue an id. Returns false (a no-op) when the id is already queued
	/// or running, or when the queue is full.
	pub fn submit(&self, id: Uuid) -> bool {
		{
			let mut owned = self.owned.lock().expect("worker pool lock poisoned");
			if owned.contains_key(&id) {
				return false;
			}
			owned.insert(id, self.shutdown.child_token());
		}

		if self.tx.try_send(id).is_err() {
			self.owned
				.lock()
				.expect("worker pool lock poisoned")
				.remove(&id);
			error!(pool = self.name, id = %id, "worker queue full; submission dropped");
			return false;
		}
		true
	}

	/// Cooperatively cancel a queued or running id. The pipeline observes
	/// the token at its next stage boundary.
	pub fn cancel(&self, id: Uuid) -> bool {
		let owned = self.owned.lock().expect("worker pool lock poisoned");
		match owned.get(&id) {
			Some(token) => {
				token.cancel();
				true
			}
			None => false,
		}
	}

	pub fn is_active(&self, id: Uuid) -> bool {
		self.owned
			.lock()
			.expect("worker pool lock poisoned")
			.contains_key(&id)
	}

	pub fn active_count(&self) -> usize {
		self.owned.lock().expect("worker pool lock poisoned").len()
	}

	/// Cancel everything and stop accepting work.
	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	#[tokio::test]
	async fn runs_submitted_ids() {
		let counter = Arc::new(AtomicUsize::new(0));
		let c = counter.clone();
		let pool = WorkerPool::start("test", 2, move |_id, _token| {
			let c = c.clone();
			async move {
				c.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
		});

		assert!(pool.submit(Uuid::new_v4()));
		assert!(pool.submit(Uuid::new_v4()));

		tokio::time::timeout(Duration::from_secs(2), async {
			while counter.load(Ordering::SeqCst) < 2 {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("both submissions should run");
		assert_eq!(pool.active_count(), 0);
	}

	#[tokio::test]
	async fn resubmitting_owned_id_is_a_noop() {
		let started = Arc::new(tokio::sync::Notify::new());
		let release = Arc::new(tokio::sync::Notify::new());
		let runs = Arc::new(AtomicUsize::new(0));

		let (s, r, n) = (started.clone(), release.clone(), runs.clone());
		let pool = WorkerPool::start("test", 2, move |_id, _token| {
			let (s, r, n) = (s.clone(), r.clone(), n.clone());
			async move {
				n.fetch_add(1, Ordering::SeqCst);
				s.notify_one();
				r.notified().await;
				Ok(())
			}
		});

		let id = Uuid::new_v4();
		assert!(pool.submit(id));
		started.notified().await;

		// Same id while running: rejected, count of active pipelines stays 1.
		assert!(!pool.submit(id));
		assert!(pool.is_active(id));
		assert_eq!(runs.load(Ordering::SeqCst), 1);

		release.notify_one();
		tokio::time::timeout(Duration::from_secs(2), async {
			while pool.is_active(id) {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("pipeline should finish");

		// After completion the id may be submitted again.
		assert!(pool.submit(id));
		release.notify_one();
	}

	#[tokio::test]
	async fn cancel_reaches_the_runner() {
		let observed = Arc::new(AtomicUsize::new(0));
		let o = observed.clone();
		let pool = WorkerPool::start("test", 1, move |_id, token| {
			let o = o.clone();
			async move {
				token.cancelled().await;
				o.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
		});

		let id = Uuid::new_v4();
		assert!(pool.submit(id));
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(pool.cancel(id));

		tokio::time::timeout(Duration::from_secs(2), async {
			while observed.load(Ordering::SeqCst) == 0 {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("cancellation should be observed");
	}

	#[tokio::test]
	async fn worker_errors_do_not_crash_the_pool() {
		let runs = Arc::new(AtomicUsize::new(0));
		let n = runs.clone();
		let pool = WorkerPool::start("test", 1, move |_id, _token| {
			let n = n.clone();
			async move {
				n.fetch_add(1, Ordering::SeqCst);
				Err(crate::error::OrchestratorError::Internal("boom".to_string()))
			}
		});

		pool.submit(Uuid::new_v4());
		pool.submit(Uuid::new_v4());

		tokio::time::timeout(Duration::from_secs(2), async {
			while runs.load(Ordering::SeqCst) < 2 {
				tokio::time::sleep(Duration::from_millis(5)).await;
			}
		})
		.await
		.expect("pool should keep running after an error");
	}
}
