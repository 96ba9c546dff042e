use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a job or batch. Transitions only ever advance:
/// `Pending -> Processing -> (Completed | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

impl RunStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			RunStatus::Pending => "pending",
			RunStatus::Processing => "processing",
			RunStatus::Completed => "completed",
			RunStatus::Failed => "failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, RunStatus::Completed | RunStatus::Failed)
	}

	/// Whether `next` is a legal successor of `self`. Re-asserting the
	/// current non-terminal status is allowed (progress-only updates).
	pub fn can_advance_to(&self, next: RunStatus) -> bool {
		match (self, next) {
			(RunStatus::Pending, RunStatus::Pending) => true,
			(RunStatus::Pending, RunStatus::Processing) => true,
			(RunStatus::Processing, RunStatus::Processing) => true,
			(RunStatus::Processing, RunStatus::Completed) => true,
			(RunStatus::Processing, RunStatus::Failed) => true,
			(RunStatus::Pending, RunStatus::Failed) => true,
			_ => false,
		}
	}
}

impl fmt::Display for RunStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for RunStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(RunStatus::Pending),
			"processing" => Ok(RunStatus::Processing),
			"completed" => Ok(RunStatus::Completed),
			"failed" => Ok(RunStatus::Failed),
			other => Err(format!("unknown status: {}", other)),
		}
	}
}

/// Suggestion priority. Variant order is the merge sort order: critical
/// suggestions surface first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	Critical,
	High,
	Medium,
	Low,
}

impl Priority {
	pub fn as_str(&self) -> &'static str {
		match self {
			Priority::Critical => "critical",
			Priority::High => "high",
			Priority::Medium => "medium",
			Priority::Low => "low",
		}
	}
}

/// An actionable improvement surfaced by one of the scorers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
	pub category: String,
	pub priority: Priority,
	pub title: String,
	pub description: String,
	pub impact: String,
}

/// Heading outline of a page, levels h1 (index 0) through h6 (index 5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeadingOutline {
	pub levels: [Vec<String>; 6],
}

impl HeadingOutline {
	/// Number of headings at a 1-based level (1..=6).
	pub fn count(&self, level: usize) -> usize {
		self.levels.get(level - 1).map(|v| v.len()).unwrap_or(0)
	}
}

/// Everything the crawl stage hands to the scorers. Held in memory only;
/// `html` and `text` are truncated at persist time, not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSnapshot {
	pub url: String,
	pub final_url: String,
	pub status_code: u16,
	/// Page load time in seconds.
	pub load_time: f64,
	pub html: String,
	pub text: String,
	/// Meta tags keyed by lowercased name/property ("title", "description",
	/// "canonical", "og:*", "viewport", ...).
	pub meta_tags: BTreeMap<String, String>,
	pub headings: HeadingOutline,
	/// Raw JSON-LD objects found on the page.
	pub structured_data: Vec<serde_json::Value>,
	/// Viewport meta tag present.
	pub mobile_friendly: bool,
	/// URL scheme is https.
	pub ssl_enabled: bool,
	pub screenshot: Option<Vec<u8>>,
}

impl PageSnapshot {
	pub fn title(&self) -> &str {
		self.meta_tags.get("title").map(String::as_str).unwrap_or("")
	}

	pub fn description(&self) -> &str {
		self.meta_tags
			.get("description")
			.map(String::as_str)
			.unwrap_or("")
	}
}

/// Per-category sub-scores of the rule scorer, all in [0, 100].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
	pub meta: f64,
	pub headings: f64,
	pub performance: f64,
	pub mobile: f64,
	pub security: f64,
	pub structured_data: f64,
}

/// Deterministic report produced by the rule scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleReport {
	pub score: f64,
	pub category_scores: CategoryScores,
	pub issues: Vec<String>,
	pub suggestions: Vec<Suggestion>,
}

/// Narrative fields returned by the semantic scorer provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticReport {
	#[serde(default)]
	pub what_it_does: String,
	#[serde(default)]
	pub products_services: String,
	#[serde(default)]
	pub target_audience: String,
	#[serde(default)]
	pub unique_value: String,
	/// Clarity on a 1..=10 scale.
	#[serde(default)]
	pub clarity_score: u8,
	#[serde(default)]
	pub overall_impression: String,
}

/// Semantic report plus the numeric score derived from it and the
/// suggestions generated from its weak spots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticAssessment {
	pub score: f64,
	pub report: SemanticReport,
	pub suggestions: Vec<Suggestion>,
}

/// Structured failure record persisted on a failed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
	pub kind: String,
	pub step: Option<String>,
	pub progress_at_failure: u8,
}

/// A single-URL analysis request with durable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: Uuid,
	pub url: String,
	pub status: RunStatus,
	pub progress: u8,
	pub current_step: Option<String>,
	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub updated_at: Option<DateTime<Utc>>,
	pub error_message: Option<String>,
	pub error_details: Option<ErrorDetails>,
	/// Back-reference to the owning batch, if this job is a batch member.
	pub batch_id: Option<Uuid>,
}

/// Durable outputs of a completed job. One-to-one with its job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
	pub job_id: Uuid,
	pub page_html: String,
	pub page_text: String,
	pub screenshot_ref: Option<String>,
	pub rule_score: f64,
	pub rule_report: RuleReport,
	pub semantic_score: f64,
	pub semantic_report: SemanticReport,
	/// Rule and semantic suggestions merged and sorted by priority.
	pub suggestions: Vec<Suggestion>,
	pub duration_seconds: f64,
	pub created_at: DateTime<Utc>,
}

/// An ordered group of 2..=5 jobs analyzed together for comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
	pub id: Uuid,
	pub name: Option<String>,
	pub status: RunStatus,
	pub progress: u8,
	pub total: u32,
	pub completed_count: u32,
	pub failed_count: u32,
	pub created_at: DateTime<Utc>,
	pub started_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub updated_at: Option<DateTime<Utc>>,
	pub error_message: Option<String>,
}

/// Membership link between a batch and one of its child jobs. Immutable
/// after the submission transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMember {
	pub batch_id: Uuid,
	pub job_id: Uuid,
	pub label: Option<String>,
	pub is_primary: bool,
	pub order_index: u32,
}

/// One row of a ranked comparison axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
	pub url: String,
	pub label: Option<String>,
	pub score: f64,
	pub rank: u32,
	/// `score - leader.score`, always <= 0.
	pub delta_from_leader: f64,
	pub delta_from_average: f64,
}

/// The rank-1 entry of an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderEntry {
	pub url: String,
	pub label: Option<String>,
	pub score: f64,
}

/// Ranked list plus the axis average and leader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxisComparison {
	pub rankings: Vec<RankingEntry>,
	pub average: f64,
	pub leader: Option<LeaderEntry>,
}

/// Winner picked by the narrative landscape call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinnerEntry {
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub label: Option<String>,
	#[serde(default)]
	pub reason: String,
}

/// Narrative portion of a comparison, produced by the semantic scorer's
/// landscape mode. All fields degrade to empty on scorer failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LandscapeInsights {
	#[serde(default)]
	pub insights: String,
	#[serde(default)]
	pub opportunities: Vec<String>,
	#[serde(default)]
	pub threats: Vec<String>,
	#[serde(default)]
	pub overall_winner: Option<WinnerEntry>,
}

/// Durable aggregate record for a completed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
	pub batch_id: Uuid,
	pub rule_comparison: AxisComparison,
	pub semantic_comparison: AxisComparison,
	pub insights: String,
	pub opportunities: Vec<String>,
	pub threats: Vec<String>,
	pub overall_winner: Option<WinnerEntry>,
	pub duration_seconds: f64,
	pub created_at: DateTime<Utc>,
}

/// Condensed per-competitor summary fed to the landscape call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorSummary {
	pub url: String,
	pub label: Option<String>,
	pub rule_score: f64,
	pub semantic_score: f64,
	pub rule_rank: u32,
	pub semantic_rank: u32,
	/// At most 200 characters, from the semantic "what it does" field.
	pub description: String,
	pub issues: Vec<String>,
	pub strengths: Vec<String>,
}
