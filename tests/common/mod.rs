//! Common test utilities: in-memory store plus stub implementations of the
//! fetcher and semantic scorer capabilities.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use prism::error::{OrchestratorError, Result};
use prism::fetch::Fetcher;
use prism::model::{
	CompetitorSummary, LandscapeInsights, PageSnapshot, SemanticAssessment, SemanticReport,
	WinnerEntry,
};
use prism::score::semantic::{self, SemanticInput, SemanticScorer};
use prism::store::sql::SqlStore;

/// Fresh in-memory entity store with the schema applied.
pub async fn memory_store() -> Arc<SqlStore> {
	let store = SqlStore::connect("sqlite::memory:")
		.await
		.expect("in-memory store should connect");
	store.migrate().await.expect("schema should apply");
	Arc::new(store)
}

/// A snapshot that scores 95.00 on the rule axis: in-range title and
/// description, clean heading outline, fast load, viewport, https, and
/// Organization structured data.
pub fn good_snapshot(url: &str) -> PageSnapshot {
	let mut snap = PageSnapshot {
		url: url.to_string(),
		final_url: url.to_string(),
		status_code: 200,
		load_time: 1.5,
		html: "<html><body><h1>Example</h1></body></html>".to_string(),
		text: "Example Domain. This domain is for use in illustrative examples.".to_string(),
		mobile_friendly: true,
		ssl_enabled: url.starts_with("https://"),
		structured_data: vec![json!({"@type": "Organization"})],
		..Default::default()
	};
	snap.meta_tags
		.insert("title".to_string(), "Example Domain Reference Pages".to_string());
	snap.meta_tags.insert(
		"description".to_string(),
		"A reference page maintained for use in documentation and illustrative examples, free to use without prior permission or coordination.".to_string(),
	);
	snap.headings.levels[0].push("Example Domain".to_string());
	snap.headings.levels[1].push("Usage".to_string());
	snap
}

/// Scripted fetcher. URLs map to a snapshot or a failure; unknown URLs fail.
/// Tracks the highest number of concurrently running fetches, which is how
/// the semaphore bound is observed.
pub struct StubFetcher {
	pages: Mutex<HashMap<String, std::result::Result<PageSnapshot, String>>>,
	delay: Option<Duration>,
	active: AtomicUsize,
	max_active: AtomicUsize,
}

impl StubFetcher {
	pub fn new() -> Self {
		Self {
			pages: Mutex::new(HashMap::new()),
			delay: None,
			active: AtomicUsize::new(0),
			max_active: AtomicUsize::new(0),
		}
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	pub fn page(self, url: &str, snapshot: PageSnapshot) -> Self {
		self.pages
			.lock()
			.unwrap()
			.insert(url.to_string(), Ok(snapshot));
		self
	}

	pub fn failure(self, url: &str, message: &str) -> Self {
		self.pages
			.lock()
			.unwrap()
			.insert(url.to_string(), Err(message.to_string()));
		self
	}

	/// Highest number of fetches that were in flight at the same time.
	pub fn max_concurrent(&self) -> usize {
		self.max_active.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl Fetcher for StubFetcher {
	async fn fetch(&self, url: &str) -> Result<PageSnapshot> {
		let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_active.fetch_max(now_active, Ordering::SeqCst);

		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}

		let result = self
			.pages
			.lock()
			.unwrap()
			.get(url)
			.cloned()
			.unwrap_or_else(|| Err(format!("no stub page for {}", url)));

		self.active.fetch_sub(1, Ordering::SeqCst);
		result.map_err(OrchestratorError::FetchFailed)
	}
}

/// Scripted semantic scorer. Scores are derived from a fixed narrative via
/// the real formula; listed URLs fail as if the retry policy was exhausted.
pub struct StubScorer {
	fail_urls: HashSet<String>,
	fail_landscape: bool,
	clarity: u8,
}

impl StubScorer {
	pub fn new() -> Self {
		Self {
			fail_urls: HashSet::new(),
			fail_landscape: false,
			clarity: 8,
		}
	}

	pub fn failing_for(mut self, url: &str) -> Self {
		self.fail_urls.insert(url.to_string());
		self
	}

	pub fn with_failing_landscape(mut self) -> Self {
		self.fail_landscape = true;
		self
	}

	pub fn with_clarity(mut self, clarity: u8) -> Self {
		self.clarity = clarity;
		self
	}
}

#[async_trait]
impl SemanticScorer for StubScorer {
	async fn assess(&self, input: &SemanticInput) -> Result<SemanticAssessment> {
		if self.fail_urls.contains(&input.url) {
			return Err(OrchestratorError::ScorerFailed(
				"semantic assessment failed after 3 attempts: provider unreachable".to_string(),
			));
		}

		let report = SemanticReport {
			what_it_does: format!("A reference site served from {}", input.url),
			products_services: "Documentation examples and placeholder content".to_string(),
			target_audience: "Developers writing documentation and tests".to_string(),
			unique_value: "Stable, predictable content that never changes".to_string(),
			clarity_score: self.clarity,
			overall_impression: "Clear and easy to understand".to_string(),
		};
		Ok(SemanticAssessment {
			score: semantic::derive_score(&report),
			suggestions: semantic::generate_suggestions(&report),
			report,
		})
	}

	async fn landscape(&self, competitors: &[CompetitorSummary]) -> Result<LandscapeInsights> {
		if self.fail_landscape {
			return Err(OrchestratorError::ScorerFailed(
				"landscape analysis failed after 3 attempts: provider unreachable".to_string(),
			));
		}
		Ok(LandscapeInsights {
			insights: format!("Compared {} sites.", competitors.len()),
			opportunities: vec!["Add structured data across the field".to_string()],
			threats: vec!["The leader is strong on every axis".to_string()],
			overall_winner: Some(WinnerEntry {
				url: competitors[0].url.clone(),
				label: competitors[0].label.clone(),
				reason: "Best combined scores".to_string(),
			}),
		})
	}
}
