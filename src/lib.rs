pub mod api;
pub mod bus;
pub mod compare;
pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod score;
pub mod state;
pub mod store;
pub mod validate;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::bus::ProgressBus;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::pipeline::{BatchPipeline, JobPipeline};
use crate::score::semantic::{LlmScorer, LlmScorerConfig, SemanticScorer};
use crate::state::AppState;
use crate::store::EntityStore;
use crate::store::sql::SqlStore;
use crate::worker::WorkerPool;

/// Start the orchestrator: store, bus, worker pools, and the HTTP surface.
///
/// This function intentionally logs errors rather than returning them so
/// the simple `main` runner can call it without changing its signature.
pub async fn run() {
	let settings = match crate::config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to load config: {}", e);
			crate::config::Settings::default()
		}
	};

	let log_level = settings.log_level.clone().unwrap_or_else(|| "info".to_string());
	if let Err(e) = crate::observability::init_logging(&log_level) {
		eprintln!("warning: failed to initialize logging: {}", e);
	}

	// Connect to the configured database. A containerized dev database may
	// be slow to become ready; poll and retry for a configurable number of
	// attempts (PRISM_DB_CONNECT_RETRIES) with a backoff
	// (PRISM_DB_CONNECT_BACKOFF_MS).
	let max_retries: u32 = std::env::var("PRISM_DB_CONNECT_RETRIES")
		.ok()
		.and_then(|s| s.parse::<u32>().ok())
		.unwrap_or(30);
	let backoff_ms: u64 = std::env::var("PRISM_DB_CONNECT_BACKOFF_MS")
		.ok()
		.and_then(|s| s.parse::<u64>().ok())
		.unwrap_or(1000);

	let mut store_opt: Option<SqlStore> = None;
	for attempt in 1..=max_retries {
		match SqlStore::connect(&settings.database_url).await {
			Ok(s) => {
				store_opt = Some(s);
				break;
			}
			Err(e) => {
				eprintln!("DB connect attempt {}/{} failed: {}", attempt, max_retries, e);
				if attempt < max_retries {
					tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
				}
			}
		}
	}
	let Some(store) = store_opt else {
		eprintln!("failed to connect to the entity store; serving disabled");
		return;
	};

	if let Err(e) = store.migrate().await {
		eprintln!("failed to apply store schema: {}", e);
		return;
	}

	let fetch_timeout = Duration::from_secs(settings.fetch_timeout_secs);
	let fetcher: Arc<dyn Fetcher> = match HttpFetcher::new(fetch_timeout) {
		Ok(f) => Arc::new(f),
		Err(e) => {
			eprintln!("failed to build fetcher: {}", e);
			return;
		}
	};

	let scorer: Arc<dyn SemanticScorer> = match LlmScorer::new(LlmScorerConfig {
		base_url: settings.scorer_base_url.clone(),
		api_key: settings.scorer_api_key.clone(),
		model: settings.scorer_model.clone(),
		timeout: Duration::from_secs(settings.scorer_timeout_secs),
	}) {
		Ok(s) => Arc::new(s),
		Err(e) => {
			eprintln!("failed to build semantic scorer: {}", e);
			return;
		}
	};

	let store: Arc<dyn EntityStore> = Arc::new(store);
	let bus = Arc::new(ProgressBus::new());

	let job_pool = {
		let (store, bus, fetcher, scorer) =
			(store.clone(), bus.clone(), fetcher.clone(), scorer.clone());
		WorkerPool::start("jobs", settings.job_workers, move |job_id, token| {
			let pipeline = JobPipeline::new(
				store.clone(),
				bus.clone(),
				fetcher.clone(),
				scorer.clone(),
				fetch_timeout,
			);
			async move { pipeline.run(job_id, token).await }
		})
	};

	let batch_pool = {
		let (store, bus, fetcher, scorer) =
			(store.clone(), bus.clone(), fetcher.clone(), scorer.clone());
		let concurrency = settings.batch_concurrency;
		let batch_timeout = settings.batch_timeout_secs.map(Duration::from_secs);
		WorkerPool::start("batches", settings.batch_workers, move |batch_id, token| {
			let pipeline = BatchPipeline::new(
				store.clone(),
				bus.clone(),
				fetcher.clone(),
				scorer.clone(),
				fetch_timeout,
				concurrency,
			)
			.with_batch_timeout(batch_timeout);
			async move { pipeline.run(batch_id, token).await }
		})
	};

	let app_state = AppState {
		store,
		bus,
		job_pool,
		batch_pool,
	};

	let app = crate::api::router(app_state)
		.layer(TraceLayer::new_for_http())
		// Submission payloads are tiny; keep request bodies bounded.
		.layer(RequestBodyLimitLayer::new(64 * 1024));

	let bind_addr: SocketAddr = match format!("{}:{}", settings.host, settings.port).parse() {
		Ok(a) => a,
		Err(e) => {
			eprintln!("invalid listen address: {}", e);
			return;
		}
	};

	let listener = match tokio::net::TcpListener::bind(bind_addr).await {
		Ok(l) => l,
		Err(e) => {
			eprintln!("failed to bind {}: {}", bind_addr, e);
			return;
		}
	};

	tracing::info!(addr = %bind_addr, "prism listening");
	if let Err(e) = axum::serve(listener, app).await {
		eprintln!("server error: {}", e);
	}
}
