//! End-to-end tests of the single-URL pipeline against the in-memory store
//! with stubbed fetcher and scorer capabilities.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use common::{StubFetcher, StubScorer, good_snapshot, memory_store};
use prism::bus::ProgressBus;
use prism::model::{Priority, RunStatus};
use prism::pipeline::JobPipeline;
use prism::store::EntityStore;

const URL: &str = "https://example.com/";

fn pipeline(
	store: Arc<prism::store::sql::SqlStore>,
	bus: Arc<ProgressBus>,
	fetcher: StubFetcher,
	scorer: StubScorer,
) -> JobPipeline {
	JobPipeline::new(
		store,
		bus,
		Arc::new(fetcher),
		Arc::new(scorer),
		Duration::from_secs(5),
	)
}

#[tokio::test]
async fn happy_path_completes_with_artifact() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().page(URL, good_snapshot(URL)),
		StubScorer::new(),
	);
	pipeline.run(job.id, CancellationToken::new()).await.unwrap();

	let job = store.job(job.id).await.unwrap();
	assert_eq!(job.status, RunStatus::Completed);
	assert_eq!(job.progress, 100);
	assert!(job.started_at.is_some());
	assert!(job.completed_at.is_some());
	assert!(job.error_message.is_none());

	let artifact = store.artifact(job.id).await.unwrap();
	assert_eq!(artifact.rule_score, 95.0);
	assert!(artifact.semantic_score > 0.0);
	assert!(artifact.duration_seconds >= 0.0);
	assert!(!artifact.page_html.is_empty());
}

#[tokio::test]
async fn merged_suggestions_are_priority_sorted() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();

	// A poor snapshot and a low-clarity narrative produce suggestions from
	// both scorers.
	let mut snapshot = good_snapshot(URL);
	snapshot.meta_tags.clear();
	snapshot.load_time = 6.0;
	snapshot.ssl_enabled = false;

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().page(URL, snapshot),
		StubScorer::new().with_clarity(3),
	);
	pipeline.run(job.id, CancellationToken::new()).await.unwrap();

	let artifact = store.artifact(job.id).await.unwrap();
	assert!(artifact.suggestions.len() > 2);
	let priorities: Vec<Priority> = artifact.suggestions.iter().map(|s| s.priority).collect();
	let mut sorted = priorities.clone();
	sorted.sort();
	assert_eq!(priorities, sorted, "suggestions must be sorted by priority");
	// Both sources are represented.
	assert!(artifact.suggestions.iter().any(|s| s.category == "rule"));
	assert!(artifact.suggestions.iter().any(|s| s.category == "semantic"));
}

#[tokio::test]
async fn progress_events_are_monotonic_and_reach_100() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();
	let mut rx = bus.subscribe(job.id);

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().page(URL, good_snapshot(URL)),
		StubScorer::new(),
	);
	pipeline.run(job.id, CancellationToken::new()).await.unwrap();

	let mut seen = Vec::new();
	loop {
		match rx.recv().await {
			Ok(event) => seen.push(event.progress),
			Err(RecvError::Lagged(_)) => continue,
			Err(RecvError::Closed) => break,
		}
	}

	assert_eq!(
		seen,
		vec![0, 10, 30, 35, 60, 65, 90, 95, 100],
		"stage boundaries publish in order"
	);
	assert!(seen.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn fetch_failure_fails_the_job() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().failure(URL, "connection refused"),
		StubScorer::new(),
	);
	let err = pipeline
		.run(job.id, CancellationToken::new())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), "FETCH_FAILED");

	let job = store.job(job.id).await.unwrap();
	assert_eq!(job.status, RunStatus::Failed);
	assert_eq!(job.progress, 100);
	let details = job.error_details.unwrap();
	assert_eq!(details.kind, "FETCH_FAILED");
	assert_eq!(details.progress_at_failure, 10);
	assert!(store.artifact(job.id).await.is_err());
}

#[tokio::test]
async fn scorer_exhaustion_fails_the_job_without_artifact() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().page(URL, good_snapshot(URL)),
		StubScorer::new().failing_for(URL),
	);
	let err = pipeline
		.run(job.id, CancellationToken::new())
		.await
		.unwrap_err();
	assert_eq!(err.kind(), "SCORER_FAILED");

	let job = store.job(job.id).await.unwrap();
	assert_eq!(job.status, RunStatus::Failed);
	assert_eq!(job.progress, 100);
	let details = job.error_details.unwrap();
	assert_eq!(details.kind, "SCORER_FAILED");
	// The semantic stage had announced itself before failing.
	assert_eq!(details.progress_at_failure, 65);
	assert!(store.artifact(job.id).await.is_err());
}

#[tokio::test]
async fn cancellation_is_observed_at_stage_boundaries() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();

	let token = CancellationToken::new();
	token.cancel();

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().page(URL, good_snapshot(URL)),
		StubScorer::new(),
	);
	let err = pipeline.run(job.id, token).await.unwrap_err();
	assert_eq!(err.kind(), "CANCELLED");

	let job = store.job(job.id).await.unwrap();
	assert_eq!(job.status, RunStatus::Failed);
	assert_eq!(job.progress, 100);
	assert_eq!(job.error_details.unwrap().kind, "CANCELLED");
}

#[tokio::test]
async fn terminal_job_pickup_is_a_noop() {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let job = store.create_job(URL).await.unwrap();

	let pipeline = pipeline(
		store.clone(),
		bus.clone(),
		StubFetcher::new().page(URL, good_snapshot(URL)),
		StubScorer::new(),
	);
	pipeline.run(job.id, CancellationToken::new()).await.unwrap();

	// Second run observes the terminal state and does nothing.
	pipeline.run(job.id, CancellationToken::new()).await.unwrap();
	let job = store.job(job.id).await.unwrap();
	assert_eq!(job.status, RunStatus::Completed);
}
