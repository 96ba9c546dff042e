pub mod sql;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
	Artifact, Batch, BatchMember, Comparison, ErrorDetails, Job, RunStatus,
};

/// A member of a batch submission, before ids exist.
#[derive(Debug, Clone)]
pub struct NewBatchMember {
	pub url: String,
	pub label: Option<String>,
	pub is_primary: bool,
	pub order_index: u32,
}

/// Bundle of changes applied to a job in one transaction. Fields left as
/// `None` keep their current value. Timestamps are derived inside the store:
/// `started_at` on first PROCESSING, `completed_at` on terminal entry,
/// `updated_at` always.
#[derive(Debug, Clone, Default)]
pub struct JobMutation {
	pub status: Option<RunStatus>,
	pub progress: Option<u8>,
	pub current_step: Option<String>,
	pub error_message: Option<String>,
	pub error_details: Option<ErrorDetails>,
}

impl JobMutation {
	pub fn progress(progress: u8, step: impl Into<String>) -> Self {
		Self {
			progress: Some(progress),
			current_step: Some(step.into()),
			..Self::default()
		}
	}

	pub fn status(status: RunStatus, progress: u8, step: impl Into<String>) -> Self {
		Self {
			status: Some(status),
			progress: Some(progress),
			current_step: Some(step.into()),
			..Self::default()
		}
	}

	pub fn failed(message: impl Into<String>, details: ErrorDetails) -> Self {
		Self {
			status: Some(RunStatus::Failed),
			progress: Some(100),
			error_message: Some(message.into()),
			error_details: Some(details),
			..Self::default()
		}
	}
}

/// Bundle of changes applied to a batch in one transaction.
#[derive(Debug, Clone, Default)]
pub struct BatchMutation {
	pub status: Option<RunStatus>,
	pub progress: Option<u8>,
	pub completed_count: Option<u32>,
	pub failed_count: Option<u32>,
	pub error_message: Option<String>,
}

impl BatchMutation {
	pub fn progress(progress: u8) -> Self {
		Self {
			progress: Some(progress),
			..Self::default()
		}
	}

	pub fn status(status: RunStatus, progress: u8) -> Self {
		Self {
			status: Some(status),
			progress: Some(progress),
			..Self::default()
		}
	}
}

/// One member of a consistent batch snapshot.
#[derive(Debug, Clone)]
pub struct MemberRecord {
	pub member: BatchMember,
	pub job: Job,
	/// Present iff the job is COMPLETED.
	pub artifact: Option<Artifact>,
}

/// Consistent read of a batch and its children, used by the batch pipeline
/// to compute quorum and comparisons. Members are ordered by `order_index`.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
	pub batch: Batch,
	pub members: Vec<MemberRecord>,
}

impl BatchSnapshot {
	pub fn completed(&self) -> impl Iterator<Item = &MemberRecord> {
		self.members
			.iter()
			.filter(|m| m.job.status == RunStatus::Completed)
	}

	pub fn completed_count(&self) -> u32 {
		self.completed().count() as u32
	}
}

/// Transactional persistence over jobs, batches, artifacts, and comparisons.
///
/// Implementations enforce the entity invariants: statuses only advance,
/// progress is monotonic and hits exactly 100 on terminal entry, artifacts
/// exist iff their job is COMPLETED, comparisons iff their batch is.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
	/// Persist a PENDING job with `progress = 0`.
	async fn create_job(&self, url: &str) -> Result<Job>;

	/// Atomically create a batch, its N child jobs, and their membership
	/// links. Fails with `InvalidInput` if `members.len()` is outside 2..=5,
	/// `is_primary` is not exactly-once, or `order_index` is not contiguous
	/// `0..N-1`.
	async fn create_batch(
		&self,
		name: Option<&str>,
		members: &[NewBatchMember],
	) -> Result<(Batch, Vec<Job>)>;

	async fn job(&self, id: Uuid) -> Result<Job>;

	async fn batch(&self, id: Uuid) -> Result<Batch>;

	/// Apply a mutation bundle to a job, rejecting illegal status
	/// transitions and non-monotonic progress with `InvariantViolation`
	/// and stale writes with `Conflict`.
	async fn advance_job(&self, id: Uuid, mutation: JobMutation) -> Result<Job>;

	/// As `advance_job`, for batches.
	async fn advance_batch(&self, id: Uuid, mutation: BatchMutation) -> Result<Batch>;

	/// In one transaction: transition the job PROCESSING -> COMPLETED with
	/// `progress = 100` and write its artifact. Rejects jobs that are
	/// already terminal or already have an artifact.
	async fn save_artifact(&self, job_id: Uuid, artifact: &Artifact) -> Result<Job>;

	async fn artifact(&self, job_id: Uuid) -> Result<Artifact>;

	/// In one transaction: apply the terminal COMPLETED mutation to the
	/// batch and write its comparison. The mutation must carry final
	/// counts; rejects batches already terminal.
	async fn save_comparison(
		&self,
		batch_id: Uuid,
		mutation: BatchMutation,
		comparison: &Comparison,
	) -> Result<Batch>;

	async fn comparison(&self, batch_id: Uuid) -> Result<Comparison>;

	/// Consistent read of a batch with members, jobs, and any artifacts.
	async fn snapshot_batch(&self, id: Uuid) -> Result<BatchSnapshot>;

	/// Lightweight ping to verify store connectivity / readiness.
	async fn ping(&self) -> Result<()>;
}
