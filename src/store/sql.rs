use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::model::{
	Artifact, AxisComparison, Batch, BatchMember, Comparison, ErrorDetails, Job, RunStatus,
	WinnerEntry,
};
use crate::store::{
	BatchMutation, BatchSnapshot, EntityStore, JobMutation, MemberRecord, NewBatchMember,
};

/// Embedded, idempotent schema applied by `migrate`.
const SCHEMA: &str = include_str!("schema.sql");

const JOB_COLS: &str = "id, url, status, progress, current_step, created_at, started_at, \
	completed_at, updated_at, error_message, error_details, batch_id";

const BATCH_COLS: &str = "id, name, status, progress, total, completed_count, failed_count, \
	created_at, started_at, completed_at, updated_at, error_message";

/// SQLite-backed entity store. Each worker session is a pooled connection;
/// every multi-row mutation runs inside one transaction.
pub struct SqlStore {
	pool: SqlitePool,
}

impl SqlStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Connect using a sqlite connection string (e.g.
	/// `sqlite://prism.db?mode=rwc` or `sqlite::memory:`).
	pub async fn connect(database_url: &str) -> Result<Self> {
		// An in-memory database exists per-connection; keep a single
		// connection so every session sees the same data.
		let in_memory =
			database_url.contains(":memory:") || database_url.contains("mode=memory");
		let max_connections = if in_memory { 1 } else { 5 };

		let pool = SqlitePoolOptions::new()
			.max_connections(max_connections)
			.connect(database_url)
			.await
			.map_err(|e| OrchestratorError::Transient(format!("store connect: {}", e)))?;

		Ok(Self::new(pool))
	}

	/// Apply the embedded schema. Statements are idempotent, so this is safe
	/// to run at every startup.
	pub async fn migrate(&self) -> Result<()> {
		for stmt in SCHEMA.split(';') {
			let stmt = stmt.trim();
			if stmt.is_empty() {
				continue;
			}
			sqlx::query(stmt).execute(&self.pool).await?;
		}
		Ok(())
	}

	async fn fetch_job_tx(&self, tx: &mut Transaction<'_, Sqlite>, id: Uuid) -> Result<Job> {
		let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLS);
		let row = sqlx::query(&sql)
			.bind(id.to_string())
			.fetch_optional(&mut **tx)
			.await?
			.ok_or_else(|| OrchestratorError::NotFound(format!("job {}", id)))?;
		job_from_row(&row)
	}

	async fn fetch_batch_tx(
		&self,
		tx: &mut Transaction<'_, Sqlite>,
		id: Uuid,
	) -> Result<Batch> {
		let sql = format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLS);
		let row = sqlx::query(&sql)
			.bind(id.to_string())
			.fetch_optional(&mut **tx)
			.await?
			.ok_or_else(|| OrchestratorError::NotFound(format!("batch {}", id)))?;
		batch_from_row(&row)
	}

	/// Validate a mutation against the current row and return the fully
	/// resolved next state of the job.
	fn resolve_job_mutation(current: &Job, m: &JobMutation) -> Result<Job> {
		if current.status.is_terminal() {
			return Err(OrchestratorError::Conflict(format!(
				"job {} is already {}",
				current.id, current.status
			)));
		}

		let next_status = m.status.unwrap_or(current.status);
		if !current.status.can_advance_to(next_status) {
			return Err(OrchestratorError::InvariantViolation(format!(
				"illegal job status transition {} -> {}",
				current.status, next_status
			)));
		}

		let next_progress = m.progress.unwrap_or(current.progress);
		if next_progress < current.progress {
			return Err(OrchestratorError::InvariantViolation(format!(
				"non-monotonic job progress {} -> {}",
				current.progress, next_progress
			)));
		}
		if next_progress > 100 {
			return Err(OrchestratorError::InvariantViolation(format!(
				"job progress out of range: {}",
				next_progress
			)));
		}
		if next_status.is_terminal() && next_progress != 100 {
			return Err(OrchestratorError::InvariantViolation(format!(
				"terminal job status with progress {}",
				next_progress
			)));
		}

		let now = Utc::now();
		let mut next = current.clone();
		next.status = next_status;
		next.progress = next_progress;
		if let Some(step) = &m.current_step {
			next.current_step = Some(step.clone());
		}
		if let Some(msg) = &m.error_message {
			next.error_message = Some(msg.clone());
		}
		if let Some(details) = &m.error_details {
			next.error_details = Some(details.clone());
		}
		if next_status == RunStatus::Processing && next.started_at.is_none() {
			next.started_at = Some(now);
		}
		if next_status.is_terminal() {
			next.completed_at = Some(now);
		}
		next.updated_at = Some(now);
		Ok(next)
	}

	fn resolve_batch_mutation(current: &Batch, m: &BatchMutation) -> Result<Batch> {
		if current.status.is_terminal() {
			return Err(OrchestratorError::Conflict(format!(
				"batch {} is already {}",
				current.id, current.status
			)));
		}

		let next_status = m.status.unwrap_or(current.status);
		if !current.status.can_advance_to(next_status) {
			return Err(OrchestratorError::InvariantViolation(format!(
				"illegal batch status transition {} -> {}",
				current.status, next_status
			)));
		}

		let next_progress = m.progress.unwrap_or(current.progress);
		if next_progress < current.progress {
			return Err(OrchestratorError::InvariantViolation(format!(
				"non-monotonic batch progress {} -> {}",
				current.progress, next_progress
			)));
		}
		if next_status.is_terminal() && next_progress != 100 {
			return Err(OrchestratorError::InvariantViolation(format!(
				"terminal batch status with progress {}",
				next_progress
			)));
		}

		let completed = m.completed_count.unwrap_or(current.completed_count);
		let failed = m.failed_count.unwrap_or(current.failed_count);
		if completed + failed > current.total {
			return Err(OrchestratorError::InvariantViolation(format!(
				"batch counts exceed total: {} + {} > {}",
				completed, failed, current.total
			)));
		}
		if next_status.is_terminal() && completed + failed != current.total {
			return Err(OrchestratorError::InvariantViolation(format!(
				"terminal batch counts incomplete: {} + {} != {}",
				completed, failed, current.total
			)));
		}

		let now = Utc::now();
		let mut next = current.clone();
		next.status = next_status;
		next.progress = next_progress;
		next.completed_count = completed;
		next.failed_count = failed;
		if let Some(msg) = &m.error_message {
			next.error_message = Some(msg.clone());
		}
		if next_status == RunStatus::Processing && next.started_at.is_none() {
			next.started_at = Some(now);
		}
		if next_status.is_terminal() {
			next.completed_at = Some(now);
		}
		next.updated_at = Some(now);
		Ok(next)
	}

	async fn write_job(&self, tx: &mut Transaction<'_, Sqlite>, prev: &Job, next: &Job) -> Result<()> {
		let result = sqlx::query(
			"UPDATE jobs SET status = ?, progress = ?, current_step = ?, started_at = ?, \
			 completed_at = ?, updated_at = ?, error_message = ?, error_details = ? \
			 WHERE id = ? AND status = ? AND progress = ?",
		)
		.bind(next.status.as_str())
		.bind(next.progress as i64)
		.bind(&next.current_step)
		.bind(next.started_at.map(fmt_ts))
		.bind(next.completed_at.map(fmt_ts))
		.bind(next.updated_at.map(fmt_ts))
		.bind(&next.error_message)
		.bind(
			next.error_details
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?,
		)
		.bind(next.id.to_string())
		.bind(prev.status.as_str())
		.bind(prev.progress as i64)
		.execute(&mut **tx)
		.await?;

		if result.rows_affected() == 0 {
			return Err(OrchestratorError::Conflict(format!(
				"stale write on job {}",
				next.id
			)));
		}
		Ok(())
	}

	async fn write_batch(
		&self,
		tx: &mut Transaction<'_, Sqlite>,
		prev: &Batch,
		next: &Batch,
	) -> Result<()> {
		let result = sqlx::query(
			"UPDATE batches SET status = ?, progress = ?, completed_count = ?, \
			 failed_count = ?, started_at = ?, completed_at = ?, updated_at = ?, \
			 error_message = ? WHERE id = ? AND status = ? AND progress = ?",
		)
		.bind(next.status.as_str())
		.bind(next.progress as i64)
		.bind(next.completed_count as i64)
		.bind(next.failed_count as i64)
		.bind(next.started_at.map(fmt_ts))
		.bind(next.completed_at.map(fmt_ts))
		.bind(next.updated_at.map(fmt_ts))
		.bind(&next.error_message)
		.bind(next.id.to_string())
		.bind(prev.status.as_str())
		.bind(prev.progress as i64)
		.execute(&mut **tx)
		.await?;

		if result.rows_affected() == 0 {
			return Err(OrchestratorError::Conflict(format!(
				"stale write on batch {}",
				next.id
			)));
		}
		Ok(())
	}
}

#[async_trait]
impl EntityStore for SqlStore {
	async fn create_job(&self, url: &str) -> Result<Job> {
		let job = Job {
			id: Uuid::new_v4(),
			url: url.to_string(),
			status: RunStatus::Pending,
			progress: 0,
			current_step: None,
			created_at: Utc::now(),
			started_at: None,
			completed_at: None,
			updated_at: None,
			error_message: None,
			error_details: None,
			batch_id: None,
		};

		sqlx::query(
			"INSERT INTO jobs (id, url, status, progress, created_at) VALUES (?, ?, ?, 0, ?)",
		)
		.bind(job.id.to_string())
		.bind(&job.url)
		.bind(job.status.as_str())
		.bind(fmt_ts(job.created_at))
		.execute(&self.pool)
		.await?;

		Ok(job)
	}

	async fn create_batch(
		&self,
		name: Option<&str>,
		members: &[NewBatchMember],
	) -> Result<(Batch, Vec<Job>)> {
		let total = members.len();
		if !(2..=5).contains(&total) {
			return Err(OrchestratorError::InvalidInput(format!(
				"batch size must be between 2 and 5, got {}",
				total
			)));
		}
		if members.iter().filter(|m| m.is_primary).count() != 1 {
			return Err(OrchestratorError::InvalidInput(
				"exactly one batch member must be primary".to_string(),
			));
		}
		let mut indices: Vec<u32> = members.iter().map(|m| m.order_index).collect();
		indices.sort_unstable();
		if indices != (0..total as u32).collect::<Vec<_>>() {
			return Err(OrchestratorError::InvalidInput(
				"member order_index must be contiguous from 0".to_string(),
			));
		}
		if let Some(n) = name {
			if n.len() > 255 {
				return Err(OrchestratorError::InvalidInput(
					"batch name exceeds 255 characters".to_string(),
				));
			}
		}

		let now = Utc::now();
		let batch = Batch {
			id: Uuid::new_v4(),
			name: name.map(str::to_string),
			status: RunStatus::Pending,
			progress: 0,
			total: total as u32,
			completed_count: 0,
			failed_count: 0,
			created_at: now,
			started_at: None,
			completed_at: None,
			updated_at: None,
			error_message: None,
		};

		let mut tx = self.pool.begin().await?;

		sqlx::query(
			"INSERT INTO batches (id, name, status, progress, total, completed_count, \
			 failed_count, created_at) VALUES (?, ?, ?, 0, ?, 0, 0, ?)",
		)
		.bind(batch.id.to_string())
		.bind(&batch.name)
		.bind(batch.status.as_str())
		.bind(batch.total as i64)
		.bind(fmt_ts(batch.created_at))
		.execute(&mut *tx)
		.await?;

		let mut ordered: Vec<&NewBatchMember> = members.iter().collect();
		ordered.sort_by_key(|m| m.order_index);

		let mut jobs = Vec::with_capacity(total);
		for member in ordered {
			let job = Job {
				id: Uuid::new_v4(),
				url: member.url.clone(),
				status: RunStatus::Pending,
				progress: 0,
				current_step: None,
				created_at: now,
				started_at: None,
				completed_at: None,
				updated_at: None,
				error_message: None,
				error_details: None,
				batch_id: Some(batch.id),
			};

			sqlx::query(
				"INSERT INTO jobs (id, url, status, progress, created_at, batch_id) \
				 VALUES (?, ?, ?, 0, ?, ?)",
			)
			.bind(job.id.to_string())
			.bind(&job.url)
			.bind(job.status.as_str())
			.bind(fmt_ts(job.created_at))
			.bind(batch.id.to_string())
			.execute(&mut *tx)
			.await?;

			sqlx::query(
				"INSERT INTO batch_members (batch_id, job_id, label, is_primary, order_index) \
				 VALUES (?, ?, ?, ?, ?)",
			)
			.bind(batch.id.to_string())
			.bind(job.id.to_string())
			.bind(&member.label)
			.bind(member.is_primary as i64)
			.bind(member.order_index as i64)
			.execute(&mut *tx)
			.await?;

			jobs.push(job);
		}

		tx.commit().await?;
		Ok((batch, jobs))
	}

	async fn job(&self, id: Uuid) -> Result<Job> {
		let sql = format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLS);
		let row = sqlx::query(&sql)
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| OrchestratorError::NotFound(format!("job {}", id)))?;
		job_from_row(&row)
	}

	async fn batch(&self, id: Uuid) -> Result<Batch> {
		let sql = format!("SELECT {} FROM batches WHERE id = ?", BATCH_COLS);
		let row = sqlx::query(&sql)
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| OrchestratorError::NotFound(format!("batch {}", id)))?;
		batch_from_row(&row)
	}

	async fn advance_job(&self, id: Uuid, mutation: JobMutation) -> Result<Job> {
		let mut tx = self.pool.begin().await?;
		let current = self.fetch_job_tx(&mut tx, id).await?;
		let next = Self::resolve_job_mutation(&current, &mutation)?;
		self.write_job(&mut tx, &current, &next).await?;
		tx.commit().await?;
		Ok(next)
	}

	async fn advance_batch(&self, id: Uuid, mutation: BatchMutation) -> Result<Batch> {
		let mut tx = self.pool.begin().await?;
		let current = self.fetch_batch_tx(&mut tx, id).await?;
		let next = Self::resolve_batch_mutation(&current, &mutation)?;
		self.write_batch(&mut tx, &current, &next).await?;
		tx.commit().await?;
		Ok(next)
	}

	async fn save_artifact(&self, job_id: Uuid, artifact: &Artifact) -> Result<Job> {
		let mut tx = self.pool.begin().await?;
		let current = self.fetch_job_tx(&mut tx, job_id).await?;

		if current.status.is_terminal() {
			return Err(OrchestratorError::Conflict(format!(
				"job {} is already {}",
				job_id, current.status
			)));
		}
		if current.status != RunStatus::Processing {
			return Err(OrchestratorError::InvariantViolation(format!(
				"cannot complete job {} from {}",
				job_id, current.status
			)));
		}

		let existing = sqlx::query("SELECT job_id FROM artifacts WHERE job_id = ?")
			.bind(job_id.to_string())
			.fetch_optional(&mut *tx)
			.await?;
		if existing.is_some() {
			return Err(OrchestratorError::Conflict(format!(
				"artifact for job {} already exists",
				job_id
			)));
		}

		let mutation = JobMutation::status(RunStatus::Completed, 100, "Analysis completed");
		let next = Self::resolve_job_mutation(&current, &mutation)?;
		self.write_job(&mut tx, &current, &next).await?;

		sqlx::query(
			"INSERT INTO artifacts (job_id, page_html, page_text, screenshot_ref, rule_score, \
			 rule_report, semantic_score, semantic_report, suggestions, duration_seconds, \
			 created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(job_id.to_string())
		.bind(&artifact.page_html)
		.bind(&artifact.page_text)
		.bind(&artifact.screenshot_ref)
		.bind(artifact.rule_score)
		.bind(serde_json::to_string(&artifact.rule_report)?)
		.bind(artifact.semantic_score)
		.bind(serde_json::to_string(&artifact.semantic_report)?)
		.bind(serde_json::to_string(&artifact.suggestions)?)
		.bind(artifact.duration_seconds)
		.bind(fmt_ts(artifact.created_at))
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(next)
	}

	async fn artifact(&self, job_id: Uuid) -> Result<Artifact> {
		let row = sqlx::query(
			"SELECT job_id, page_html, page_text, screenshot_ref, rule_score, rule_report, \
			 semantic_score, semantic_report, suggestions, duration_seconds, created_at \
			 FROM artifacts WHERE job_id = ?",
		)
		.bind(job_id.to_string())
		.fetch_optional(&self.pool)
		.await?
		.ok_or_else(|| OrchestratorError::NotFound(format!("artifact for job {}", job_id)))?;
		artifact_from_row(&row)
	}

	async fn save_comparison(
		&self,
		batch_id: Uuid,
		mutation: BatchMutation,
		comparison: &Comparison,
	) -> Result<Batch> {
		if mutation.status != Some(RunStatus::Completed) {
			return Err(OrchestratorError::InvariantViolation(
				"save_comparison requires a COMPLETED mutation".to_string(),
			));
		}

		let mut tx = self.pool.begin().await?;
		let current = self.fetch_batch_tx(&mut tx, batch_id).await?;
		let next = Self::resolve_batch_mutation(&current, &mutation)?;

		if next.completed_count < 2 {
			return Err(OrchestratorError::InvariantViolation(format!(
				"comparison requires at least 2 completed members, got {}",
				next.completed_count
			)));
		}

		let existing = sqlx::query("SELECT batch_id FROM comparisons WHERE batch_id = ?")
			.bind(batch_id.to_string())
			.fetch_optional(&mut *tx)
			.await?;
		if existing.is_some() {
			return Err(OrchestratorError::Conflict(format!(
				"comparison for batch {} already exists",
				batch_id
			)));
		}

		self.write_batch(&mut tx, &current, &next).await?;

		sqlx::query(
			"INSERT INTO comparisons (batch_id, rule_comparison, semantic_comparison, insights, \
			 opportunities, threats, overall_winner, duration_seconds, created_at) \
			 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
		)
		.bind(batch_id.to_string())
		.bind(serde_json::to_string(&comparison.rule_comparison)?)
		.bind(serde_json::to_string(&comparison.semantic_comparison)?)
		.bind(&comparison.insights)
		.bind(serde_json::to_string(&comparison.opportunities)?)
		.bind(serde_json::to_string(&comparison.threats)?)
		.bind(
			comparison
				.overall_winner
				.as_ref()
				.map(serde_json::to_string)
				.transpose()?,
		)
		.bind(comparison.duration_seconds)
		.bind(fmt_ts(comparison.created_at))
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(next)
	}

	async fn comparison(&self, batch_id: Uuid) -> Result<Comparison> {
		let row = sqlx::query(
			"SELECT batch_id, rule_comparison, semantic_comparison, insights, opportunities, \
			 threats, overall_winner, duration_seconds, created_at FROM comparisons \
			 WHERE batch_id = ?",
		)
		.bind(batch_id.to_string())
		.fetch_optional(&self.pool)
		.await?
		.ok_or_else(|| {
			OrchestratorError::NotFound(format!("comparison for batch {}", batch_id))
		})?;
		comparison_from_row(&row)
	}

	async fn snapshot_batch(&self, id: Uuid) -> Result<BatchSnapshot> {
		let mut tx = self.pool.begin().await?;
		let batch = self.fetch_batch_tx(&mut tx, id).await?;

		let member_rows = sqlx::query(
			"SELECT batch_id, job_id, label, is_primary, order_index FROM batch_members \
			 WHERE batch_id = ? ORDER BY order_index",
		)
		.bind(id.to_string())
		.fetch_all(&mut *tx)
		.await?;

		let mut members = Vec::with_capacity(member_rows.len());
		for row in &member_rows {
			let member = member_from_row(row)?;
			let job = self.fetch_job_tx(&mut tx, member.job_id).await?;

			let artifact = if job.status == RunStatus::Completed {
				let art_row = sqlx::query(
					"SELECT job_id, page_html, page_text, screenshot_ref, rule_score, \
					 rule_report, semantic_score, semantic_report, suggestions, \
					 duration_seconds, created_at FROM artifacts WHERE job_id = ?",
				)
				.bind(member.job_id.to_string())
				.fetch_optional(&mut *tx)
				.await?;
				art_row.as_ref().map(artifact_from_row).transpose()?
			} else {
				None
			};

			members.push(MemberRecord {
				member,
				job,
				artifact,
			});
		}

		tx.commit().await?;
		Ok(BatchSnapshot { batch, members })
	}

	async fn ping(&self) -> Result<()> {
		sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
		Ok(())
	}
}

fn fmt_ts(t: DateTime<Utc>) -> String {
	t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|d| d.with_timezone(&Utc))
		.map_err(|e| OrchestratorError::Internal(format!("bad timestamp {:?}: {}", s, e)))
}

fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
	s.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
	Uuid::parse_str(s).map_err(|e| OrchestratorError::Internal(format!("bad uuid {:?}: {}", s, e)))
}

fn parse_status(s: &str) -> Result<RunStatus> {
	s.parse::<RunStatus>().map_err(OrchestratorError::Internal)
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
	let id: String = row.try_get("id")?;
	let status: String = row.try_get("status")?;
	let error_details: Option<String> = row.try_get("error_details")?;
	let batch_id: Option<String> = row.try_get("batch_id")?;

	Ok(Job {
		id: parse_uuid(&id)?,
		url: row.try_get("url")?,
		status: parse_status(&status)?,
		progress: row.try_get::<i64, _>("progress")? as u8,
		current_step: row.try_get("current_step")?,
		created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
		started_at: parse_ts_opt(row.try_get("started_at")?)?,
		completed_at: parse_ts_opt(row.try_get("completed_at")?)?,
		updated_at: parse_ts_opt(row.try_get("updated_at")?)?,
		error_message: row.try_get("error_message")?,
		error_details: error_details
			.as_deref()
			.map(serde_json::from_str::<ErrorDetails>)
			.transpose()?,
		batch_id: batch_id.as_deref().map(parse_uuid).transpose()?,
	})
}

fn batch_from_row(row: &SqliteRow) -> Result<Batch> {
	let id: String = row.try_get("id")?;
	let status: String = row.try_get("status")?;

	Ok(Batch {
		id: parse_uuid(&id)?,
		name: row.try_get("name")?,
		status: parse_status(&status)?,
		progress: row.try_get::<i64, _>("progress")? as u8,
		total: row.try_get::<i64, _>("total")? as u32,
		completed_count: row.try_get::<i64, _>("completed_count")? as u32,
		failed_count: row.try_get::<i64, _>("failed_count")? as u32,
		created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
		started_at: parse_ts_opt(row.try_get("started_at")?)?,
		completed_at: parse_ts_opt(row.try_get("completed_at")?)?,
		updated_at: parse_ts_opt(row.try_get("updated_at")?)?,
		error_message: row.try_get("error_message")?,
	})
}

fn member_from_row(row: &SqliteRow) -> Result<BatchMember> {
	let batch_id: String = row.try_get("batch_id")?;
	let job_id: String = row.try_get("job_id")?;

	Ok(BatchMember {
		batch_id: parse_uuid(&batch_id)?,
		job_id: parse_uuid(&job_id)?,
		label: row.try_get("label")?,
		is_primary: row.try_get::<i64, _>("is_primary")? != 0,
		order_index: row.try_get::<i64, _>("order_index")? as u32,
	})
}

fn artifact_from_row(row: &SqliteRow) -> Result<Artifact> {
	let job_id: String = row.try_get("job_id")?;
	let rule_report: String = row.try_get("rule_report")?;
	let semantic_report: String = row.try_get("semantic_report")?;
	let suggestions: String = row.try_get("suggestions")?;

	Ok(Artifact {
		job_id: parse_uuid(&job_id)?,
		page_html: row.try_get("page_html")?,
		page_text: row.try_get("page_text")?,
		screenshot_ref: row.try_get("screenshot_ref")?,
		rule_score: row.try_get("rule_score")?,
		rule_report: serde_json::from_str(&rule_report)?,
		semantic_score: row.try_get("semantic_score")?,
		semantic_report: serde_json::from_str(&semantic_report)?,
		suggestions: serde_json::from_str(&suggestions)?,
		duration_seconds: row.try_get("duration_seconds")?,
		created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
	})
}

fn comparison_from_row(row: &SqliteRow) -> Result<Comparison> {
	let batch_id: String = row.try_get("batch_id")?;
	let rule_comparison: String = row.try_get("rule_comparison")?;
	let semantic_comparison: String = row.try_get("semantic_comparison")?;
	let opportunities: String = row.try_get("opportunities")?;
	let threats: String = row.try_get("threats")?;
	let overall_winner: Option<String> = row.try_get("overall_winner")?;

	Ok(Comparison {
		batch_id: parse_uuid(&batch_id)?,
		rule_comparison: serde_json::from_str::<AxisComparison>(&rule_comparison)?,
		semantic_comparison: serde_json::from_str::<AxisComparison>(&semantic_comparison)?,
		insights: row.try_get("insights")?,
		opportunities: serde_json::from_str(&opportunities)?,
		threats: serde_json::from_str(&threats)?,
		overall_winner: overall_winner
			.as_deref()
			.map(serde_json::from_str::<WinnerEntry>)
			.transpose()?,
		duration_seconds: row.try_get("duration_seconds")?,
		created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
	})
}
