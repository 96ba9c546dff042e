//! Single-URL analysis pipeline.
//!
//! A linear state machine owning one job: crawl, rule scoring, semantic
//! scoring, persistence. The pipeline is the sole writer of the job row
//! while it runs; progress is written to the store and published on the bus
//! at every stage boundary, and cancellation is checked between stages.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::bus::{ProgressBus, ProgressEvent};
use crate::error::{OrchestratorError, Result};
use crate::fetch::Fetcher;
use crate::model::{Artifact, ErrorDetails, Job, PageSnapshot, RunStatus};
use crate::observability;
use crate::pipeline::{PERSIST_TRUNCATE_BYTES, truncate_bytes};
use crate::score;
use crate::score::semantic::{SemanticInput, SemanticScorer};
use crate::store::{EntityStore, JobMutation};

// Stage boundary labels and progress values, published in this order:
// 0, 10, 30, 35, 60, 65, 90, 95, 100.
const STEP_STARTING: &str = "Starting analysis";
const STEP_CRAWLING: &str = "Crawling website";
const STEP_CRAWL_DONE: &str = "Crawl completed";
const STEP_RULE: &str = "Scoring page structure";
const STEP_RULE_DONE: &str = "Rule scoring completed";
const STEP_SEMANTIC: &str = "Running semantic analysis";
const STEP_SEMANTIC_DONE: &str = "Semantic analysis completed";
const STEP_SAVING: &str = "Saving results";
const STEP_DONE: &str = "Analysis completed";

/// Pipeline for one job. Cheap to construct; workers build one per run.
pub struct JobPipeline {
	store: Arc<dyn EntityStore>,
	bus: Arc<ProgressBus>,
	fetcher: Arc<dyn Fetcher>,
	scorer: Arc<dyn SemanticScorer>,
	fetch_timeout: Duration,
}

impl JobPipeline {
	pub fn new(
		store: Arc<dyn EntityStore>,
		bus: Arc<ProgressBus>,
		fetcher: Arc<dyn Fetcher>,
		scorer: Arc<dyn SemanticScorer>,
		fetch_timeout: Duration,
	) -> Self {
		Self {
			store,
			bus,
			fetcher,
			scorer,
			fetch_timeout,
		}
	}

	/// Drive the job to a terminal state. Errors are recorded on the job row
	/// and also returned so callers can log them; they never propagate to
	/// sibling jobs.
	pub async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> Result<()> {
		let job = match self.store.job(job_id).await {
			Ok(job) => job,
			Err(e) => {
				// Retire regardless so batch aggregators never wait on a
				// channel that will see no terminal event.
				self.bus.retire(job_id);
				return Err(e);
			}
		};
		if job.status.is_terminal() {
			info!(job_id = %job_id, status = %job.status, "job already terminal; skipping");
			self.bus.retire(job_id);
			return Ok(());
		}

		let started = Instant::now();
		match self.run_stages(&job, started, &cancel).await {
			Ok(()) => {
				observability::record_job_completed();
				info!(job_id = %job_id, url = %job.url, "analysis completed");
				self.bus
					.publish(job_id, ProgressEvent::job(RunStatus::Completed, 100, STEP_DONE));
				self.bus.retire(job_id);
				Ok(())
			}
			Err(e) => {
				observability::record_job_failed();
				error!(job_id = %job_id, url = %job.url, error = %e, "analysis failed");
				self.fail(job_id, &e).await;
				self.bus.retire(job_id);
				Err(e)
			}
		}
	}

	async fn run_stages(
		&self,
		job: &Job,
		started: Instant,
		cancel: &CancellationToken,
	) -> Result<()> {
		let job_id = job.id;

		self.transition(job_id, RunStatus::Processing, 0, STEP_STARTING)
			.await?;

		// CRAWL: 0 -> 30.
		self.check_cancelled(cancel)?;
		self.advance(job_id, 10, STEP_CRAWLING).await?;
		let snapshot = self.crawl(&job.url).await?;
		self.advance(job_id, 30, STEP_CRAWL_DONE).await?;

		// RULE: 30 -> 60. Pure and in-memory.
		self.check_cancelled(cancel)?;
		self.advance(job_id, 35, STEP_RULE).await?;
		let rule_report = score::rule::score(&snapshot);
		self.advance(job_id, 60, STEP_RULE_DONE).await?;

		// SEMANTIC: 60 -> 90. A scorer failure fails the job; no partial
		// artifact is written.
		self.check_cancelled(cancel)?;
		self.advance(job_id, 65, STEP_SEMANTIC).await?;
		let input = SemanticInput {
			url: job.url.clone(),
			page_text: snapshot.text.clone(),
			title: snapshot.title().to_string(),
			description: snapshot.description().to_string(),
		};
		let assessment = self.scorer.assess(&input).await?;
		self.advance(job_id, 90, STEP_SEMANTIC_DONE).await?;

		// PERSIST: 90 -> 100. Artifact write and COMPLETED transition share
		// one transaction inside the store.
		self.check_cancelled(cancel)?;
		self.advance(job_id, 95, STEP_SAVING).await?;

		let screenshot_ref = self.save_screenshot(job_id, &snapshot).await;
		let suggestions =
			score::merge_suggestions(rule_report.suggestions.clone(), assessment.suggestions);
		let artifact = Artifact {
			job_id,
			page_html: truncate_bytes(&snapshot.html, PERSIST_TRUNCATE_BYTES),
			page_text: truncate_bytes(&snapshot.text, PERSIST_TRUNCATE_BYTES),
			screenshot_ref,
			rule_score: rule_report.score,
			rule_report,
			semantic_score: assessment.score,
			semantic_report: assessment.report,
			suggestions,
			duration_seconds: started.elapsed().as_secs_f64(),
			created_at: Utc::now(),
		};
		self.store.save_artifact(job_id, &artifact).await?;
		Ok(())
	}

	async fn crawl(&self, url: &str) -> Result<PageSnapshot> {
		match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch(url)).await {
			Ok(Ok(snapshot)) => Ok(snapshot),
			Ok(Err(e)) => Err(OrchestratorError::FetchFailed(e.to_string())),
			Err(_) => Err(OrchestratorError::FetchFailed(format!(
				"timed out after {:?} fetching {}",
				self.fetch_timeout, url
			))),
		}
	}

	/// Screenshot bytes, when the fetcher provides them, are written next to
	/// the store rather than into it; the artifact keeps only the reference.
	async fn save_screenshot(&self, job_id: Uuid, snapshot: &PageSnapshot) -> Option<String> {
		let bytes = snapshot.screenshot.as_ref()?;
		let dir = std::path::Path::new("storage/screenshots");
		if let Err(e) = tokio::fs::create_dir_all(dir).await {
			error!(job_id = %job_id, error = %e, "failed to create screenshot dir");
			return None;
		}
		let path = dir.join(format!("{}.png", job_id));
		match tokio::fs::write(&path, bytes).await {
			Ok(()) => Some(path.to_string_lossy().to_string()),
			Err(e) => {
				error!(job_id = %job_id, error = %e, "failed to write screenshot");
				None
			}
		}
	}

	fn check_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
		if cancel.is_cancelled() {
			Err(OrchestratorError::Cancelled)
		} else {
			Ok(())
		}
	}

	async fn transition(
		&self,
		job_id: Uuid,
		status: RunStatus,
		progress: u8,
		step: &str,
	) -> Result<()> {
		self.store
			.advance_job(job_id, JobMutation::status(status, progress, step))
			.await?;
		self.bus
			.publish(job_id, ProgressEvent::job(status, progress, step));
		Ok(())
	}

	async fn advance(&self, job_id: Uuid, progress: u8, step: &str) -> Result<()> {
		self.store
			.advance_job(job_id, JobMutation::progress(progress, step))
			.await?;
		self.bus
			.publish(job_id, ProgressEvent::job(RunStatus::Processing, progress, step));
		Ok(())
	}

	/// Record the failure on the job row. Best-effort: a job that cannot be
	/// read or written anymore still gets its failure event published.
	async fn fail(&self, job_id: Uuid, cause: &OrchestratorError) {
		let (step, progress_at_failure) = match self.store.job(job_id).await {
			Ok(job) => (job.current_step, job.progress),
			Err(_) => (None, 0),
		};

		let details = ErrorDetails {
			kind: cause.kind().to_string(),
			step,
			progress_at_failure,
		};
		let mutation = JobMutation::failed(cause.to_string(), details);
		if let Err(e) = self.store.advance_job(job_id, mutation).await {
			error!(job_id = %job_id, error = %e, "failed to record job failure");
		}

		self.bus.publish(
			job_id,
			ProgressEvent::job(RunStatus::Failed, 100, cause.to_string())
				.with_extra(serde_json::json!({ "kind": cause.kind() })),
		);
	}
}
