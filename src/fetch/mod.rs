//! Page fetching capability.
//!
//! The pipeline depends only on the `Fetcher` trait; `HttpFetcher` is the
//! default implementation. A browser-automation driver can be substituted
//! behind the same trait when rendered-DOM fidelity matters.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{OrchestratorError, Result};
use crate::model::{HeadingOutline, PageSnapshot};

/// Capability: given a URL, return a page snapshot.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
	async fn fetch(&self, url: &str) -> Result<PageSnapshot>;
}

/// Plain HTTP fetcher with a per-attempt timeout. Extracts meta tags,
/// headings, JSON-LD blocks, and visible text from the raw HTML.
pub struct HttpFetcher {
	client: reqwest::Client,
}

impl HttpFetcher {
	pub fn new(timeout: Duration) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.user_agent("Mozilla/5.0 (compatible; PrismBot/1.0)")
			.build()
			.map_err(|e| OrchestratorError::Internal(format!("http client: {}", e)))?;
		Ok(Self { client })
	}
}

#[async_trait]
impl Fetcher for HttpFetcher {
	async fn fetch(&self, url: &str) -> Result<PageSnapshot> {
		let start = Instant::now();

		let response = self
			.client
			.get(url)
			.send()
			.await
			.map_err(|e| OrchestratorError::FetchFailed(format!("{}: {}", url, e)))?;

		let status_code = response.status().as_u16();
		let final_url = response.url().to_string();

		let html = response
			.text()
			.await
			.map_err(|e| OrchestratorError::FetchFailed(format!("{}: body: {}", url, e)))?;

		let load_time = start.elapsed().as_secs_f64();

		let mut snapshot = snapshot_from_html(url, &html);
		snapshot.final_url = final_url;
		snapshot.status_code = status_code;
		snapshot.load_time = (load_time * 100.0).round() / 100.0;
		Ok(snapshot)
	}
}

/// Static selector; the pattern is a compile-time constant, so parsing it
/// cannot fail at runtime.
fn selector(pattern: &str) -> Selector {
	Selector::parse(pattern).expect("static selector")
}

/// Build a snapshot from raw HTML. Public for tests and for alternate
/// fetcher implementations that obtain HTML some other way.
///
/// The parsed document is not `Send`, so all extraction happens
/// synchronously here before the snapshot crosses any await point.
pub fn snapshot_from_html(url: &str, html: &str) -> PageSnapshot {
	let document = Html::parse_document(html);

	let meta_tags = extract_meta_tags(&document);
	let headings = extract_headings(&document);
	let structured_data = extract_structured_data(&document);
	let mobile_friendly = meta_tags.contains_key("viewport");
	let text = extract_text(&document);

	PageSnapshot {
		url: url.to_string(),
		final_url: url.to_string(),
		status_code: 0,
		load_time: 0.0,
		html: html.to_string(),
		text,
		meta_tags,
		headings,
		structured_data,
		mobile_friendly,
		ssl_enabled: url.starts_with("https://"),
		screenshot: None,
	}
}

/// Meta tags keyed by lowercased `name`/`property`, plus `title` and
/// `canonical` pseudo-entries.
fn extract_meta_tags(document: &Html) -> BTreeMap<String, String> {
	let mut tags = BTreeMap::new();

	if let Some(title) = document.select(&selector("title")).next() {
		let text = title.text().collect::<String>();
		let text = text.trim();
		if !text.is_empty() {
			tags.insert("title".to_string(), text.to_string());
		}
	}

	for meta in document.select(&selector("meta")) {
		let key = meta
			.value()
			.attr("name")
			.or_else(|| meta.value().attr("property"))
			.map(str::to_lowercase);
		if let (Some(key), Some(content)) = (key, meta.value().attr("content")) {
			tags.insert(key, content.to_string());
		}
	}

	for link in document.select(&selector("link")) {
		let is_canonical = link
			.value()
			.attr("rel")
			.map(|rel| rel.eq_ignore_ascii_case("canonical"))
			.unwrap_or(false);
		if is_canonical {
			if let Some(href) = link.value().attr("href") {
				tags.insert("canonical".to_string(), href.to_string());
			}
		}
	}

	tags
}

fn extract_headings(document: &Html) -> HeadingOutline {
	let mut outline = HeadingOutline::default();
	for level in 1..=6 {
		let heading = selector(&format!("h{}", level));
		for el in document.select(&heading) {
			let text = el
				.text()
				.collect::<String>()
				.split_whitespace()
				.collect::<Vec<_>>()
				.join(" ");
			if !text.is_empty() {
				outline.levels[level - 1].push(text);
			}
		}
	}
	outline
}

fn extract_structured_data(document: &Html) -> Vec<serde_json::Value> {
	let mut data = Vec::new();
	for script in document.select(&selector("script")) {
		let is_ld_json = script
			.value()
			.attr("type")
			.map(|t| t.eq_ignore_ascii_case("application/ld+json"))
			.unwrap_or(false);
		if !is_ld_json {
			continue;
		}
		let body = script.text().collect::<String>();
		// Skip invalid JSON blocks rather than failing the crawl.
		if let Ok(value) = serde_json::from_str::<serde_json::Value>(body.trim()) {
			data.push(value);
		}
	}
	data
}

/// Visible text: body text with script/style/noscript subtrees excluded,
/// whitespace collapsed.
fn extract_text(document: &Html) -> String {
	let root = document
		.select(&selector("body"))
		.next()
		.unwrap_or_else(|| document.root_element());

	let mut out = String::new();
	collect_visible_text(root, &mut out);
	out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_visible_text(element: ElementRef<'_>, out: &mut String) {
	if matches!(element.value().name(), "script" | "style" | "noscript") {
		return;
	}
	for child in element.children() {
		match child.value() {
			Node::Text(text) => {
				out.push_str(text);
				out.push(' ');
			}
			Node::Element(_) => {
				if let Some(el) = ElementRef::wrap(child) {
					collect_visible_text(el, out);
				}
			}
			_ => {}
		}
	}
}
