use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Simple in-process metrics exposed via the /metrics endpoint. We avoid a
// heavy metrics dependency and expose a minimal Prometheus-compatible text
// format from the application.
static JOBS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static JOBS_COMPLETED: AtomicU64 = AtomicU64::new(0);
static JOBS_FAILED: AtomicU64 = AtomicU64::new(0);
static BATCHES_SUBMITTED: AtomicU64 = AtomicU64::new(0);
static BATCHES_COMPLETED: AtomicU64 = AtomicU64::new(0);
static BATCHES_FAILED: AtomicU64 = AtomicU64::new(0);
static SCORER_RETRIES: AtomicU64 = AtomicU64::new(0);
static PROGRESS_EVENTS_PUBLISHED: AtomicU64 = AtomicU64::new(0);

pub fn record_job_submitted() {
	JOBS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_job_completed() {
	JOBS_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_job_failed() {
	JOBS_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_submitted() {
	BATCHES_SUBMITTED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_completed() {
	BATCHES_COMPLETED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_batch_failed() {
	BATCHES_FAILED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_scorer_retry() {
	SCORER_RETRIES.fetch_add(1, Ordering::Relaxed);
}

pub fn record_progress_event() {
	PROGRESS_EVENTS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
}

/// Return a small Prometheus-compatible metrics payload describing pipeline
/// activity.
pub fn metrics_text() -> String {
	let counters: [(&str, &str, &AtomicU64); 8] = [
		(
			"prism_jobs_submitted_total",
			"Total analysis jobs submitted",
			&JOBS_SUBMITTED,
		),
		(
			"prism_jobs_completed_total",
			"Jobs that reached COMPLETED",
			&JOBS_COMPLETED,
		),
		("prism_jobs_failed_total", "Jobs that reached FAILED", &JOBS_FAILED),
		(
			"prism_batches_submitted_total",
			"Total batches submitted",
			&BATCHES_SUBMITTED,
		),
		(
			"prism_batches_completed_total",
			"Batches that reached COMPLETED",
			&BATCHES_COMPLETED,
		),
		(
			"prism_batches_failed_total",
			"Batches that reached FAILED",
			&BATCHES_FAILED,
		),
		(
			"prism_scorer_retries_total",
			"Semantic scorer retry attempts",
			&SCORER_RETRIES,
		),
		(
			"prism_progress_events_total",
			"Progress events published on the bus",
			&PROGRESS_EVENTS_PUBLISHED,
		),
	];

	let mut out = String::new();
	for (name, help, counter) in counters {
		out.push_str(&format!("# HELP {} {}\n", name, help));
		out.push_str(&format!("# TYPE {} counter\n", name));
		out.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
	}
	out
}

/// Initialize structured logging to stdout with contextual fields.
pub fn init_logging(default_level: &str) -> anyhow::Result<()> {
	let env_filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(default_level))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	let fmt_layer = tracing_subscriber::fmt::layer()
		.with_target(true)
		.with_level(true);

	tracing_subscriber::registry()
		.with(env_filter)
		.with(fmt_layer)
		.try_init()
		.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

	Ok(())
}
