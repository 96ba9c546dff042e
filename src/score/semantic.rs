//! Semantic scoring via an external language-model provider.
//!
//! The provider is behind the `SemanticScorer` trait so pipelines and tests
//! never see HTTP. The numeric score is derived deterministically from the
//! provider's narrative report; only the narrative itself is model-dependent.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::model::{
	CompetitorSummary, LandscapeInsights, Priority, SemanticAssessment, SemanticReport,
	Suggestion,
};
use crate::observability;
use crate::score::round2;

/// Characters of page text sent to the provider.
const MAX_CONTEXT_LENGTH: usize = 2000;

/// Retry policy for transient provider failures.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Input to a single-page semantic assessment.
#[derive(Debug, Clone)]
pub struct SemanticInput {
	pub url: String,
	pub page_text: String,
	pub title: String,
	pub description: String,
}

/// External semantic-scoring capability.
#[async_trait]
pub trait SemanticScorer: Send + Sync + 'static {
	/// Assess a single page: narrative report, derived score, suggestions.
	async fn assess(&self, input: &SemanticInput) -> Result<SemanticAssessment>;

	/// Batch mode: one call synthesizing narrative insights over all
	/// competitors of a batch.
	async fn landscape(&self, competitors: &[CompetitorSummary]) -> Result<LandscapeInsights>;
}

/// Derive the numeric score in [0, 100] from a narrative report.
///
/// Base is clarity (70% weight); each substantial narrative field adds a
/// completeness bonus; negative wording in the overall impression deducts.
pub fn derive_score(report: &SemanticReport) -> f64 {
	let base = (f64::from(report.clarity_score) / 10.0) * 70.0;

	let fields = [
		&report.what_it_does,
		&report.products_services,
		&report.target_audience,
		&report.unique_value,
	];
	let completeness: f64 = fields
		.iter()
		.filter(|f| f.chars().count() > 20)
		.map(|_| 7.5)
		.sum();

	let impression = report.overall_impression.to_lowercase();
	let penalty = if ["unclear", "confusing", "vague", "difficult"]
		.iter()
		.any(|w| impression.contains(w))
	{
		10.0
	} else if ["missing", "lacking", "insufficient"]
		.iter()
		.any(|w| impression.contains(w))
	{
		5.0
	} else {
		0.0
	};

	round2((base + completeness - penalty).clamp(0.0, 100.0))
}

/// Deterministic follow-up suggestions from the report's weak spots. At most
/// seven are returned.
pub fn generate_suggestions(report: &SemanticReport) -> Vec<Suggestion> {
	let mut suggestions = Vec::new();

	let push = |list: &mut Vec<Suggestion>,
	            priority: Priority,
	            title: &str,
	            description: String,
	            impact: &str| {
		list.push(Suggestion {
			category: "semantic".to_string(),
			priority,
			title: title.to_string(),
			description,
			impact: impact.to_string(),
		});
	};

	if report.clarity_score < 7 {
		push(
			&mut suggestions,
			Priority::High,
			"Improve Content Clarity",
			format!(
				"Your page purpose scored {}/10 for clarity. Readers and assistants struggle to understand what you do. State a clear value proposition in the first paragraph.",
				report.clarity_score
			),
			"high",
		);
	}

	let what = &report.what_it_does;
	if what.chars().count() < 30 || what.to_lowercase().contains("unclear") {
		push(
			&mut suggestions,
			Priority::Critical,
			"Define Your Value Proposition",
			"It is not clear what this site does. Add a prominent headline that explains your core offering in simple terms."
				.to_string(),
			"critical",
		);
	}

	let unique = &report.unique_value;
	if unique.chars().count() < 20
		|| unique.to_lowercase().contains("unclear")
		|| unique.to_lowercase().contains("not clear")
	{
		push(
			&mut suggestions,
			Priority::Medium,
			"Highlight Unique Selling Points",
			"Your differentiators are not clear. Add a section highlighting what sets you apart from alternatives."
				.to_string(),
			"medium",
		);
	}

	let audience = &report.target_audience;
	if audience.chars().count() < 20 || audience.to_lowercase().contains("unclear") {
		push(
			&mut suggestions,
			Priority::Medium,
			"Clarify Target Audience",
			"Make it clearer who your product or service is for, with phrases like \"Designed for...\"."
				.to_string(),
			"medium",
		);
	}

	if report.products_services.chars().count() < 30 {
		push(
			&mut suggestions,
			Priority::High,
			"Detail Your Products/Services",
			"Your products or services are not clearly described. Add detailed descriptions of what you offer."
				.to_string(),
			"high",
		);
	}

	let impression = report.overall_impression.to_lowercase();
	if ["poor", "difficult", "confusing", "very unclear"]
		.iter()
		.any(|w| impression.contains(w))
	{
		push(
			&mut suggestions,
			Priority::Critical,
			"Comprehensive Content Overhaul Needed",
			"The site is difficult to understand as a whole. Audit the content for a clear headline, plain language, and prominent offering descriptions."
				.to_string(),
			"critical",
		);
	}

	suggestions.truncate(7);
	suggestions
}

/// Collapse whitespace and truncate to the provider context budget.
pub fn prepare_context(page_text: &str, title: &str, description: &str) -> String {
	let collapsed = page_text.split_whitespace().collect::<Vec<_>>().join(" ");
	let body: String = collapsed.chars().take(MAX_CONTEXT_LENGTH).collect();
	format!("Title: {}\nDescription: {}\n\nContent:\n{}", title, description, body)
}

/// Strip a fenced code-block wrapper (``` or ```json) around a JSON payload.
pub fn strip_code_fences(text: &str) -> &str {
	let mut t = text.trim();
	if let Some(rest) = t.strip_prefix("```json") {
		t = rest;
	} else if let Some(rest) = t.strip_prefix("```") {
		t = rest;
	}
	if let Some(rest) = t.strip_suffix("```") {
		t = rest;
	}
	t.trim()
}

/// Run `attempt` with the scorer retry policy: exponential backoff with
/// jitter, at most `MAX_ATTEMPTS` tries. Only transient failures (network,
/// rate limit, malformed response) are retried; a permanent provider error
/// gives up immediately. The final failure surfaces as `ScorerFailed`.
pub async fn with_retries<T, F, Fut>(label: &str, mut attempt: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut backoff = BACKOFF_BASE;
	let mut attempts = 0;
	let mut last_err = None;

	for n in 1..=MAX_ATTEMPTS {
		attempts = n;
		match attempt().await {
			Ok(value) => return Ok(value),
			Err(e) => {
				let retryable = e.is_transient();
				warn!(attempt = n, max = MAX_ATTEMPTS, retryable, error = %e, "{} attempt failed", label);
				last_err = Some(e);
				if !retryable {
					break;
				}
				if n < MAX_ATTEMPTS {
					observability::record_scorer_retry();
					let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 4);
					tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
					backoff = (backoff * 2).min(BACKOFF_CAP);
				}
			}
		}
	}

	Err(OrchestratorError::ScorerFailed(format!(
		"{} failed after {} attempts: {}",
		label,
		attempts,
		last_err.map(|e| e.to_string()).unwrap_or_default()
	)))
}

/// Configuration for the HTTP-backed scorer.
#[derive(Debug, Clone)]
pub struct LlmScorerConfig {
	/// Messages-style JSON endpoint.
	pub base_url: String,
	pub api_key: Option<String>,
	pub model: String,
	/// Per-attempt timeout.
	pub timeout: Duration,
}

/// Semantic scorer backed by a messages-style language-model HTTP API. The
/// provider is configured, never inferred; prompts carry no provider names.
pub struct LlmScorer {
	client: reqwest::Client,
	config: LlmScorerConfig,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
	content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
	#[serde(default)]
	text: String,
}

impl LlmScorer {
	pub fn new(config: LlmScorerConfig) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(config.timeout)
			.build()
			.map_err(|e| OrchestratorError::Internal(format!("http client: {}", e)))?;
		Ok(Self { client, config })
	}

	/// One provider round-trip: post the prompt, return the raw text reply.
	async fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
		let body = json!({
			"model": self.config.model,
			"max_tokens": max_tokens,
			"temperature": 0.3,
			"system": system,
			"messages": [{"role": "user", "content": prompt}],
		});

		let mut request = self
			.client
			.post(&self.config.base_url)
			.header("content-type", "application/json")
			.json(&body);
		if let Some(key) = &self.config.api_key {
			request = request.header("x-api-key", key);
		}

		let response = request
			.send()
			.await
			.map_err(|e| OrchestratorError::Transient(format!("provider request: {}", e)))?;

		let status = response.status();
		if status.is_server_error() || status.as_u16() == 429 {
			return Err(OrchestratorError::Transient(format!(
				"provider status {}",
				status
			)));
		}
		if !status.is_success() {
			return Err(OrchestratorError::ScorerFailed(format!(
				"provider status {}",
				status
			)));
		}

		let parsed: MessagesResponse = response
			.json()
			.await
			.map_err(|e| OrchestratorError::Transient(format!("provider body: {}", e)))?;

		let text = parsed
			.content
			.first()
			.map(|c| c.text.clone())
			.unwrap_or_default();
		if text.trim().is_empty() {
			return Err(OrchestratorError::Transient(
				"provider returned empty response".to_string(),
			));
		}
		Ok(text)
	}
}

#[async_trait]
impl SemanticScorer for LlmScorer {
	async fn assess(&self, input: &SemanticInput) -> Result<SemanticAssessment> {
		let context = prepare_context(&input.page_text, &input.title, &input.description);
		let prompt = assessment_prompt(&input.url, &context);

		let report = with_retries("semantic assessment", || async {
			let reply = self
				.complete(
					"You are an expert assistant evaluating website quality and clarity. \
					 Your goal is to assess how well an assistant would understand and \
					 recommend this website. Always respond with valid JSON only, no \
					 additional text.",
					&prompt,
					2000,
				)
				.await?;
			parse_report(&reply)
		})
		.await?;

		Ok(SemanticAssessment {
			score: derive_score(&report),
			suggestions: generate_suggestions(&report),
			report,
		})
	}

	async fn landscape(&self, competitors: &[CompetitorSummary]) -> Result<LandscapeInsights> {
		if competitors.is_empty() {
			return Err(OrchestratorError::ScorerFailed(
				"no competitor data provided".to_string(),
			));
		}

		let prompt = landscape_prompt(competitors);
		with_retries("landscape analysis", || async {
			let reply = self
				.complete(
					"You are a competitive analysis expert. Your goal is to provide \
					 actionable insights by comparing multiple websites and identifying \
					 opportunities and threats. Always respond with valid JSON only, no \
					 additional text.",
					&prompt,
					3000,
				)
				.await?;
			parse_landscape(&reply)
		})
		.await
	}
}

fn parse_report(reply: &str) -> Result<SemanticReport> {
	let cleaned = strip_code_fences(reply);
	let report: SemanticReport = serde_json::from_str(cleaned)
		.map_err(|e| OrchestratorError::Transient(format!("unparsable report: {}", e)))?;
	if !(1..=10).contains(&report.clarity_score) {
		return Err(OrchestratorError::Transient(format!(
			"clarity score out of range: {}",
			report.clarity_score
		)));
	}
	Ok(report)
}

fn parse_landscape(reply: &str) -> Result<LandscapeInsights> {
	let cleaned = strip_code_fences(reply);
	serde_json::from_str(cleaned)
		.map_err(|e| OrchestratorError::Transient(format!("unparsable insights: {}", e)))
}

fn assessment_prompt(url: &str, context: &str) -> String {
	format!(
		r#"You are analyzing a website for clarity and recommendability.

Website URL: {url}

Website Content:
{context}

Please answer the following questions as if you were an assistant responding to a user query about this website:

1. What does this website do? (1-2 sentences)
2. What products or services does it offer? (Be specific)
3. Who is the target audience? (Be specific)
4. What makes this brand unique or notable?
5. Rate the clarity of the website's purpose on a scale of 1-10, where:
   - 1-3: Very unclear, confusing
   - 4-6: Somewhat clear but needs improvement
   - 7-8: Clear and understandable
   - 9-10: Exceptionally clear and compelling
6. Provide an overall impression of how well this website would be understood and recommended.

Respond in JSON format with the following structure:
{{
    "what_it_does": "Clear description of what the website does",
    "products_services": "Specific products or services offered",
    "target_audience": "Specific target audience",
    "unique_value": "What makes this brand unique",
    "clarity_score": 8,
    "overall_impression": "Your overall assessment"
}}

Be honest and objective. If something is unclear or missing, say so."#
	)
}

fn landscape_prompt(competitors: &[CompetitorSummary]) -> String {
	let mut summaries = Vec::with_capacity(competitors.len());
	for (idx, c) in competitors.iter().enumerate() {
		let label = c
			.label
			.clone()
			.unwrap_or_else(|| format!("Competitor {}", idx + 1));
		let description: String = c.description.chars().take(200).collect();
		summaries.push(format!(
			"{} ({})\n  - Rule Score: {}/100 (Rank #{})\n  - Semantic Score: {}/100 (Rank #{})\n  - Description: {}\n\n  Strengths:\n{}\n\n  Weaknesses:\n{}",
			label,
			c.url,
			c.rule_score,
			c.rule_rank,
			c.semantic_score,
			c.semantic_rank,
			description,
			format_list(&c.strengths),
			format_list(&c.issues),
		));
	}

	format!(
		r#"You are analyzing a competitive landscape of {count} websites.

COMPETITORS:
{rule_line}
{summaries}
{rule_line}

Please provide a comprehensive competitive analysis with the following:

1. Competitive landscape overview (3-5 sentences): summarize the dynamics, identify clear patterns, note standout performers and why.
2. Top 5 opportunities for improvement: actionable opportunities based on competitive gaps.
3. Top 3 competitive threats: what the strongest competitors are doing well.
4. Overall winner: which competitor performs best overall, considering both scores, and why.

Respond in JSON format:
{{
    "insights": "3-5 sentence competitive landscape overview",
    "opportunities": ["..."],
    "threats": ["..."],
    "overall_winner": {{
        "url": "winning competitor URL",
        "label": "competitor label",
        "reason": "1-2 sentence explanation"
    }}
}}

Be specific, actionable, and data-driven."#,
		count = competitors.len(),
		rule_line = "=".repeat(80),
		summaries = summaries.join("\n\n"),
	)
}

fn format_list(items: &[String]) -> String {
	if items.is_empty() {
		return "  - None identified".to_string();
	}
	items
		.iter()
		.take(5)
		.map(|item| {
			let truncated: String = item.chars().take(150).collect();
			format!("  - {}", truncated)
		})
		.collect::<Vec<_>>()
		.join("\n")
}
