use std::sync::Arc;

use crate::bus::ProgressBus;
use crate::store::EntityStore;
use crate::worker::WorkerPool;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Holds the shared entity store, the progress bus, and the two worker
/// pools so handlers can enqueue pipelines without blocking on them.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn EntityStore>,
	pub bus: Arc<ProgressBus>,
	pub job_pool: Arc<WorkerPool>,
	pub batch_pool: Arc<WorkerPool>,
}
