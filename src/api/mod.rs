//! HTTP and WebSocket surface.
//!
//! Thin handlers over the entity store and worker pools: submissions create
//! durable rows and enqueue ids; reads return stored state; the progress
//! channel bridges the in-process bus to one WebSocket per entity id.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::{EventKind, ProgressEvent};
use crate::error::OrchestratorError;
use crate::model::{Artifact, Batch, Comparison, Job, RunStatus};
use crate::observability;
use crate::state::AppState;
use crate::store::NewBatchMember;
use crate::validate::validate_url;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/api/v1/analyses", post(create_analysis))
		.route("/api/v1/analyses/{id}", get(get_analysis))
		.route("/api/v1/analyses/{id}/result", get(get_analysis_result))
		.route("/api/v1/analyses/{id}/progress", get(job_progress_ws))
		.route("/api/v1/batches", post(create_batch))
		.route("/api/v1/batches/{id}", get(get_batch))
		.route("/api/v1/batches/{id}/result", get(get_batch_result))
		.route("/api/v1/batches/{id}/comparison", get(get_batch_comparison))
		.route("/api/v1/batches/{id}/progress", get(batch_progress_ws))
		.route("/health", get(|| async { "OK" }))
		.route("/health/db", get(db_health))
		.route("/metrics", get(|| async { observability::metrics_text() }))
		.with_state(state)
}

/// Handler-level error with an HTTP-style status.
pub struct ApiError {
	status: StatusCode,
	message: String,
}

impl ApiError {
	fn bad_request(message: impl Into<String>) -> Self {
		Self {
			status: StatusCode::BAD_REQUEST,
			message: message.into(),
		}
	}
}

impl From<OrchestratorError> for ApiError {
	fn from(e: OrchestratorError) -> Self {
		let status = match &e {
			OrchestratorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
			OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
			OrchestratorError::Conflict(_) => StatusCode::CONFLICT,
			OrchestratorError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};
		Self {
			status,
			message: e.to_string(),
		}
	}
}

impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(json!({ "error": self.message }))).into_response()
	}
}

#[derive(Debug, Deserialize)]
struct CreateAnalysisRequest {
	url: String,
}

#[derive(Debug, Deserialize)]
struct CreateBatchRequest {
	urls: Vec<String>,
	labels: Option<Vec<String>>,
	name: Option<String>,
}

#[derive(Debug, Serialize)]
struct MemberStatus {
	job_id: Uuid,
	url: String,
	label: Option<String>,
	status: RunStatus,
	progress: u8,
	is_primary: bool,
	order_index: u32,
}

#[derive(Debug, Serialize)]
struct BatchView {
	#[serde(flatten)]
	batch: Batch,
	members: Vec<MemberStatus>,
}

async fn create_analysis(
	State(state): State<AppState>,
	Json(payload): Json<CreateAnalysisRequest>,
) -> Result<impl IntoResponse, ApiError> {
	validate_url(&payload.url)?;

	let job = state.store.create_job(&payload.url).await?;
	observability::record_job_submitted();
	state.job_pool.submit(job.id);
	info!(job_id = %job.id, url = %job.url, "analysis submitted");

	Ok((StatusCode::CREATED, Json(job)))
}

async fn get_analysis(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
	Ok(Json(state.store.job(id).await?))
}

#[derive(Debug, Serialize)]
struct AnalysisResult {
	#[serde(flatten)]
	artifact: Artifact,
	url: String,
}

async fn get_analysis_result(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<AnalysisResult>, ApiError> {
	let job = state.store.job(id).await?;
	if job.status != RunStatus::Completed {
		return Err(ApiError::bad_request(format!(
			"analysis not completed (current status: {})",
			job.status
		)));
	}
	let artifact = state.store.artifact(id).await?;
	Ok(Json(AnalysisResult {
		artifact,
		url: job.url,
	}))
}

async fn create_batch(
	State(state): State<AppState>,
	Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, ApiError> {
	for url in &payload.urls {
		validate_url(url)?;
	}
	if let Some(labels) = &payload.labels {
		if labels.len() != payload.urls.len() {
			return Err(ApiError::bad_request(format!(
				"labels count ({}) must match urls count ({})",
				labels.len(),
				payload.urls.len()
			)));
		}
	}

	let members: Vec<NewBatchMember> = payload
		.urls
		.iter()
		.enumerate()
		.map(|(idx, url)| NewBatchMember {
			url: url.clone(),
			label: payload
				.labels
				.as_ref()
				.and_then(|labels| labels.get(idx).cloned()),
			// The first URL is implicitly the submitter's own site.
			is_primary: idx == 0,
			order_index: idx as u32,
		})
		.collect();

	let (batch, jobs) = state
		.store
		.create_batch(payload.name.as_deref(), &members)
		.await?;
	observability::record_batch_submitted();
	state.batch_pool.submit(batch.id);
	info!(batch_id = %batch.id, total = batch.total, "batch submitted");

	let member_statuses = jobs
		.iter()
		.enumerate()
		.map(|(idx, job)| MemberStatus {
			job_id: job.id,
			url: job.url.clone(),
			label: members[idx].label.clone(),
			status: job.status,
			progress: job.progress,
			is_primary: members[idx].is_primary,
			order_index: members[idx].order_index,
		})
		.collect();

	Ok((
		StatusCode::CREATED,
		Json(BatchView {
			batch,
			members: member_statuses,
		}),
	))
}

async fn batch_view(state: &AppState, id: Uuid) -> Result<BatchView, ApiError> {
	let snapshot = state.store.snapshot_batch(id).await?;
	let members = snapshot
		.members
		.iter()
		.map(|m| MemberStatus {
			job_id: m.job.id,
			url: m.job.url.clone(),
			label: m.member.label.clone(),
			status: m.job.status,
			progress: m.job.progress,
			is_primary: m.member.is_primary,
			order_index: m.member.order_index,
		})
		.collect();
	Ok(BatchView {
		batch: snapshot.batch,
		members,
	})
}

async fn get_batch(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<BatchView>, ApiError> {
	Ok(Json(batch_view(&state, id).await?))
}

#[derive(Debug, Serialize)]
struct BatchResult {
	#[serde(flatten)]
	view: BatchView,
	comparison: Comparison,
}

async fn get_batch_result(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<BatchResult>, ApiError> {
	let view = batch_view(&state, id).await?;
	if view.batch.status != RunStatus::Completed {
		return Err(ApiError::bad_request(format!(
			"batch not completed (current status: {})",
			view.batch.status
		)));
	}
	let comparison = state.store.comparison(id).await?;
	Ok(Json(BatchResult { view, comparison }))
}

async fn get_batch_comparison(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<Comparison>, ApiError> {
	// Verify the batch exists so unknown ids are 404, not "no comparison".
	let batch = state.store.batch(id).await?;
	if batch.status != RunStatus::Completed {
		return Err(ApiError::bad_request(format!(
			"batch not completed (current status: {})",
			batch.status
		)));
	}
	Ok(Json(state.store.comparison(id).await?))
}

async fn db_health(State(state): State<AppState>) -> Response {
	match state.store.ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => {
			warn!(error = %e, "db health check failed");
			(StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
		}
	}
}

async fn job_progress_ws(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
	ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
	// Reject unknown ids before upgrading.
	state.store.job(id).await?;
	Ok(ws.on_upgrade(move |socket| progress_channel(socket, state, id, EventKind::Job)))
}

async fn batch_progress_ws(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
	ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
	state.store.batch(id).await?;
	Ok(ws.on_upgrade(move |socket| progress_channel(socket, state, id, EventKind::Batch)))
}

/// One push channel per entity id. The bus carries only live updates, so the
/// channel opens with a snapshot read from the store; it closes after the
/// terminal event has been flushed. Client `ping` text frames get a `pong`.
async fn progress_channel(socket: WebSocket, state: AppState, id: Uuid, kind: EventKind) {
	// Subscribe before the snapshot read so no event between the two is lost;
	// duplicates are fine (at-most-once is the bus guarantee, clients key on
	// monotonic progress).
	let mut rx = state.bus.subscribe(id);
	let (mut sender, mut receiver) = socket.split();

	let initial = match kind {
		EventKind::Job => state.store.job(id).await.map(|job| ProgressEvent {
			kind,
			status: job.status,
			progress: job.progress,
			current_step: job.current_step,
			extra: None,
		}),
		EventKind::Batch => state.store.batch(id).await.map(|batch| ProgressEvent {
			kind,
			status: batch.status,
			progress: batch.progress,
			current_step: None,
			extra: Some(json!({
				"completed_count": batch.completed_count,
				"failed_count": batch.failed_count,
				"total": batch.total,
			})),
		}),
	};

	let Ok(initial) = initial else {
		let _ = sender.close().await;
		return;
	};
	if send_event(&mut sender, &initial).await.is_err() {
		return;
	}
	if initial.status.is_terminal() {
		let _ = sender.close().await;
		return;
	}

	loop {
		tokio::select! {
			event = rx.recv() => {
				match event {
					Ok(event) => {
						let terminal = event.status.is_terminal();
						if send_event(&mut sender, &event).await.is_err() {
							return;
						}
						if terminal {
							break;
						}
					}
					Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
					// Channel retired: the entity is terminal. The snapshot
					// sent at open plus drained events cover the client.
					Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
				}
			}
			msg = receiver.next() => {
				match msg {
					Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
						if sender
							.send(Message::Text(r#"{"type":"pong"}"#.into()))
							.await
							.is_err()
						{
							return;
						}
					}
					Some(Ok(Message::Close(_))) | None => return,
					Some(Ok(_)) => {}
					Some(Err(_)) => return,
				}
			}
		}
	}

	let _ = sender.close().await;
}

async fn send_event(
	sender: &mut SplitSink<WebSocket, Message>,
	event: &ProgressEvent,
) -> Result<(), ()> {
	let payload = serde_json::to_string(event).map_err(|_| ())?;
	sender
		.send(Message::Text(payload.into()))
		.await
		.map_err(|_| ())
}
