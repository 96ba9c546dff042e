//! HTTP surface tests driven through the router with `tower::ServiceExt`.
//! Worker pools are wired with a no-op runner so submissions stay PENDING
//! and handler behavior can be asserted deterministically.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::util::ServiceExt;
use uuid::Uuid;

use common::memory_store;
use prism::api;
use prism::bus::ProgressBus;
use prism::state::AppState;
use prism::store::EntityStore;
use prism::worker::WorkerPool;

async fn test_app() -> (Router, Arc<prism::store::sql::SqlStore>) {
	let store = memory_store().await;
	let bus = Arc::new(ProgressBus::new());
	let idle_pool = || WorkerPool::start("idle", 1, |_id, _token| async { Ok(()) });

	let state = AppState {
		store: store.clone(),
		bus,
		job_pool: idle_pool(),
		batch_pool: idle_pool(),
	};
	(api::router(state), store)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
	Request::builder()
		.method("POST")
		.uri(uri)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

fn get(uri: &str) -> Request<Body> {
	Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
	let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
	serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_analysis_returns_pending_job() {
	let (app, _store) = test_app().await;

	let response = app
		.oneshot(post_json(
			"/api/v1/analyses",
			json!({"url": "https://example.com/"}),
		))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::CREATED);

	let body = body_json(response).await;
	assert_eq!(body["status"], "pending");
	assert_eq!(body["progress"], 0);
	assert_eq!(body["url"], "https://example.com/");
	assert!(body["id"].as_str().unwrap().parse::<Uuid>().is_ok());
	assert!(body["created_at"].is_string());
}

#[tokio::test]
async fn create_analysis_rejects_unsafe_urls() {
	let (app, _store) = test_app().await;

	for url in [
		"ftp://example.com/",
		"http://localhost/",
		"http://127.0.0.1/",
		"http://192.168.0.1/",
		"not a url",
	] {
		let response = app
			.clone()
			.oneshot(post_json("/api/v1/analyses", json!({"url": url})))
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::BAD_REQUEST, "url {}", url);
	}
}

#[tokio::test]
async fn unknown_ids_are_404() {
	let (app, _store) = test_app().await;
	let id = Uuid::new_v4();

	for uri in [
		format!("/api/v1/analyses/{}", id),
		format!("/api/v1/analyses/{}/result", id),
		format!("/api/v1/batches/{}", id),
		format!("/api/v1/batches/{}/result", id),
		format!("/api/v1/batches/{}/comparison", id),
	] {
		let response = app.clone().oneshot(get(&uri)).await.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND, "uri {}", uri);
	}
}

#[tokio::test]
async fn malformed_payload_is_unprocessable() {
	let (app, _store) = test_app().await;

	let response = app
		.oneshot(post_json("/api/v1/analyses", json!({"address": "x"})))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn batch_size_limits_are_enforced() {
	let (app, _store) = test_app().await;

	let one = json!({"urls": ["https://a.example/"]});
	let response = app
		.clone()
		.oneshot(post_json("/api/v1/batches", one))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let six = json!({
		"urls": (0..6).map(|i| format!("https://s{}.example/", i)).collect::<Vec<_>>()
	});
	let response = app
		.clone()
		.oneshot(post_json("/api/v1/batches", six))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);

	let mismatched = json!({
		"urls": ["https://a.example/", "https://b.example/"],
		"labels": ["only one"]
	});
	let response = app
		.oneshot(post_json("/api/v1/batches", mismatched))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_creation_returns_ordered_members_with_primary_first() {
	let (app, _store) = test_app().await;

	let payload = json!({
		"urls": ["https://ours.example/", "https://rival.example/", "https://other.example/"],
		"labels": ["Our Site", "Rival", "Other"],
		"name": "spring review"
	});
	let response = app
		.clone()
		.oneshot(post_json("/api/v1/batches", payload))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::CREATED);

	let body = body_json(response).await;
	assert_eq!(body["status"], "pending");
	assert_eq!(body["total"], 3);
	assert_eq!(body["name"], "spring review");

	let members = body["members"].as_array().unwrap();
	assert_eq!(members.len(), 3);
	assert_eq!(members[0]["is_primary"], true);
	assert_eq!(members[0]["label"], "Our Site");
	for (idx, member) in members.iter().enumerate() {
		assert_eq!(member["order_index"], idx as u64);
		assert_eq!(member["status"], "pending");
	}

	// Status endpoint mirrors the creation response.
	let batch_id = body["id"].as_str().unwrap();
	let response = app
		.oneshot(get(&format!("/api/v1/batches/{}", batch_id)))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let status_body = body_json(response).await;
	assert_eq!(status_body["members"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn results_require_completion() {
	let (app, store) = test_app().await;

	let job = store.create_job("https://example.com/").await.unwrap();
	let response = app
		.clone()
		.oneshot(get(&format!("/api/v1/analyses/{}/result", job.id)))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	let body = body_json(response).await;
	assert!(
		body["error"]
			.as_str()
			.unwrap()
			.contains("not completed (current status: pending)")
	);

	let members: Vec<prism::store::NewBatchMember> = ["https://a.example/", "https://b.example/"]
		.iter()
		.enumerate()
		.map(|(idx, url)| prism::store::NewBatchMember {
			url: url.to_string(),
			label: None,
			is_primary: idx == 0,
			order_index: idx as u32,
		})
		.collect();
	let (batch, _jobs) = store.create_batch(None, &members).await.unwrap();
	let response = app
		.oneshot(get(&format!("/api/v1/batches/{}/result", batch.id)))
		.await
		.unwrap();
	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	let body = body_json(response).await;
	assert!(body["error"].as_str().unwrap().contains("not completed"));
}

#[tokio::test]
async fn health_and_metrics_respond() {
	let (app, _store) = test_app().await;

	let response = app.clone().oneshot(get("/health")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let response = app.clone().oneshot(get("/health/db")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let response = app.oneshot(get("/metrics")).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);
	let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
	let text = String::from_utf8(bytes.to_vec()).unwrap();
	assert!(text.contains("prism_jobs_submitted_total"));
}
