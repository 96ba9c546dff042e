//! Cross-site comparison over the completed children of a batch.
//!
//! Numeric rankings, averages, and deltas are fully deterministic; the
//! narrative fields come from one landscape call to the semantic scorer and
//! degrade to empty values when that call fails, leaving the batch COMPLETED.

use std::time::Instant;

use chrono::Utc;
use tracing::warn;

use crate::error::{OrchestratorError, Result};
use crate::model::{
	Artifact, AxisComparison, CategoryScores, CompetitorSummary, Comparison, LandscapeInsights,
	LeaderEntry, Priority, RankingEntry,
};
use crate::score::round2;
use crate::score::semantic::SemanticScorer;
use crate::store::{BatchSnapshot, MemberRecord};

/// Scoring axis of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
	Rule,
	Semantic,
}

/// Build the comparison for a batch snapshot. Requires at least two
/// completed members; the batch pipeline enforces the quorum before calling.
pub async fn aggregate(
	snapshot: &BatchSnapshot,
	scorer: &dyn SemanticScorer,
) -> Result<Comparison> {
	let started = Instant::now();

	let completed: Vec<&MemberRecord> = snapshot
		.completed()
		.filter(|m| m.artifact.is_some())
		.collect();
	if completed.len() < 2 {
		return Err(OrchestratorError::InvariantViolation(format!(
			"comparison requires at least 2 completed members, got {}",
			completed.len()
		)));
	}

	let rule_comparison = rank_axis(&completed, Axis::Rule);
	let semantic_comparison = rank_axis(&completed, Axis::Semantic);

	let summaries = competitor_summaries(&completed, &rule_comparison, &semantic_comparison);

	// One landscape call for all members. Narrative failure is not a batch
	// failure: the numeric comparison stands on its own.
	let insights = match scorer.landscape(&summaries).await {
		Ok(insights) => insights,
		Err(e) => {
			warn!(batch_id = %snapshot.batch.id, error = %e, "landscape call failed; comparison proceeds without narrative");
			LandscapeInsights::default()
		}
	};

	Ok(Comparison {
		batch_id: snapshot.batch.id,
		rule_comparison,
		semantic_comparison,
		insights: insights.insights,
		opportunities: insights.opportunities,
		threats: insights.threats,
		overall_winner: insights.overall_winner,
		duration_seconds: started.elapsed().as_secs_f64(),
		created_at: Utc::now(),
	})
}

fn axis_score(artifact: &Artifact, axis: Axis) -> f64 {
	match axis {
		Axis::Rule => artifact.rule_score,
		Axis::Semantic => artifact.semantic_score,
	}
}

/// Rank completed members on one axis: descending by score, stable
/// tie-break on `order_index`, 1-based ranks, deltas against the leader and
/// the arithmetic mean.
fn rank_axis(completed: &[&MemberRecord], axis: Axis) -> AxisComparison {
	let mut scored: Vec<(&MemberRecord, f64)> = completed
		.iter()
		.map(|m| {
			let artifact = m.artifact.as_ref().expect("completed member has artifact");
			(*m, round2(axis_score(artifact, axis)))
		})
		.collect();

	scored.sort_by(|(a, sa), (b, sb)| {
		sb.partial_cmp(sa)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then(a.member.order_index.cmp(&b.member.order_index))
	});

	let average = round2(scored.iter().map(|(_, s)| s).sum::<f64>() / scored.len() as f64);
	let leader_score = scored.first().map(|(_, s)| *s).unwrap_or(0.0);

	let rankings: Vec<RankingEntry> = scored
		.iter()
		.enumerate()
		.map(|(idx, (m, score))| RankingEntry {
			url: m.job.url.clone(),
			label: m.member.label.clone(),
			score: *score,
			rank: idx as u32 + 1,
			delta_from_leader: round2(score - leader_score),
			delta_from_average: round2(score - average),
		})
		.collect();

	let leader = rankings.first().map(|r| LeaderEntry {
		url: r.url.clone(),
		label: r.label.clone(),
		score: r.score,
	});

	AxisComparison {
		rankings,
		average,
		leader,
	}
}

fn competitor_summaries(
	completed: &[&MemberRecord],
	rule: &AxisComparison,
	semantic: &AxisComparison,
) -> Vec<CompetitorSummary> {
	completed
		.iter()
		.map(|m| {
			let artifact = m.artifact.as_ref().expect("completed member has artifact");
			let rule_rank = rank_of(rule, &m.job.url);
			let semantic_rank = rank_of(semantic, &m.job.url);

			CompetitorSummary {
				url: m.job.url.clone(),
				label: m.member.label.clone(),
				rule_score: round2(artifact.rule_score),
				semantic_score: round2(artifact.semantic_score),
				rule_rank,
				semantic_rank,
				description: artifact
					.semantic_report
					.what_it_does
					.chars()
					.take(200)
					.collect(),
				issues: top_issues(artifact),
				strengths: strengths(&artifact.rule_report.category_scores),
			}
		})
		.collect()
}

fn rank_of(axis: &AxisComparison, url: &str) -> u32 {
	axis.rankings
		.iter()
		.find(|r| r.url == url)
		.map(|r| r.rank)
		.unwrap_or(0)
}

/// Top issues: rule issues first, then descriptions of critical/high
/// suggestions, capped at three.
fn top_issues(artifact: &Artifact) -> Vec<String> {
	let mut issues = artifact.rule_report.issues.clone();
	issues.extend(
		artifact
			.suggestions
			.iter()
			.filter(|s| matches!(s.priority, Priority::Critical | Priority::High))
			.map(|s| s.description.clone()),
	);
	issues.truncate(3);
	issues
}

/// Deterministic strengths from the rule report: any category scoring >= 90
/// plus the https/mobile/structured-data flags, capped at three.
fn strengths(scores: &CategoryScores) -> Vec<String> {
	let mut strengths = Vec::new();
	let categories = [
		("meta tags", scores.meta),
		("headings", scores.headings),
		("performance", scores.performance),
		("mobile", scores.mobile),
		("security", scores.security),
		("structured data", scores.structured_data),
	];
	for (name, score) in categories {
		if score >= 90.0 {
			strengths.push(format!("Excellent {} ({}/100)", name, score));
		}
	}
	if scores.structured_data > 0.0 {
		strengths.push("Has structured data".to_string());
	}
	if scores.security >= 100.0 {
		strengths.push("HTTPS enabled".to_string());
	}
	if scores.mobile >= 100.0 {
		strengths.push("Mobile-friendly".to_string());
	}
	strengths.truncate(3);
	strengths
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use uuid::Uuid;

	use crate::model::{
		Batch, BatchMember, Job, RuleReport, RunStatus, SemanticAssessment, SemanticReport,
		WinnerEntry,
	};
	use crate::score::semantic::SemanticInput;

	struct FixedScorer {
		fail: bool,
	}

	#[async_trait]
	impl SemanticScorer for FixedScorer {
		async fn assess(&self, _input: &SemanticInput) -> crate::error::Result<SemanticAssessment> {
			Ok(SemanticAssessment::default())
		}

		async fn landscape(
			&self,
			competitors: &[CompetitorSummary],
		) -> crate::error::Result<LandscapeInsights> {
			if self.fail {
				return Err(OrchestratorError::ScorerFailed("no provider".to_string()));
			}
			Ok(LandscapeInsights {
				insights: format!("{} sites compared", competitors.len()),
				opportunities: vec!["Add structured data".to_string()],
				threats: vec!["Leader has strong meta".to_string()],
				overall_winner: Some(WinnerEntry {
					url: competitors[0].url.clone(),
					label: competitors[0].label.clone(),
					reason: "Highest combined scores".to_string(),
				}),
			})
		}
	}

	fn member(
		batch_id: Uuid,
		url: &str,
		order_index: u32,
		status: RunStatus,
		rule_score: f64,
		semantic_score: f64,
	) -> MemberRecord {
		let job_id = Uuid::new_v4();
		let artifact = (status == RunStatus::Completed).then(|| Artifact {
			job_id,
			page_html: String::new(),
			page_text: String::new(),
			screenshot_ref: None,
			rule_score,
			rule_report: RuleReport {
				score: rule_score,
				category_scores: CategoryScores {
					meta: 95.0,
					headings: 100.0,
					performance: 80.0,
					mobile: 100.0,
					security: 100.0,
					structured_data: 0.0,
				},
				issues: vec!["Description too short (40 chars)".to_string()],
				suggestions: Vec::new(),
			},
			semantic_score,
			semantic_report: SemanticReport {
				what_it_does: format!("Site at {}", url),
				..Default::default()
			},
			suggestions: Vec::new(),
			duration_seconds: 1.0,
			created_at: Utc::now(),
		});

		MemberRecord {
			member: BatchMember {
				batch_id,
				job_id,
				label: Some(format!("site-{}", order_index)),
				is_primary: order_index == 0,
				order_index,
			},
			job: Job {
				id: job_id,
				url: url.to_string(),
				status,
				progress: if status.is_terminal() { 100 } else { 50 },
				current_step: None,
				created_at: Utc::now(),
				started_at: None,
				completed_at: None,
				updated_at: None,
				error_message: None,
				error_details: None,
				batch_id: Some(batch_id),
			},
			artifact,
		}
	}

	fn snapshot(members: Vec<MemberRecord>) -> BatchSnapshot {
		let batch_id = members[0].member.batch_id;
		BatchSnapshot {
			batch: Batch {
				id: batch_id,
				name: None,
				status: RunStatus::Processing,
				progress: 50,
				total: members.len() as u32,
				completed_count: 0,
				failed_count: 0,
				created_at: Utc::now(),
				started_at: None,
				completed_at: None,
				updated_at: None,
				error_message: None,
			},
			members,
		}
	}

	#[tokio::test]
	async fn rankings_sort_descending_with_deltas() {
		let batch_id = Uuid::new_v4();
		let snap = snapshot(vec![
			member(batch_id, "https://a.example", 0, RunStatus::Completed, 70.0, 60.0),
			member(batch_id, "https://b.example", 1, RunStatus::Completed, 90.0, 50.0),
			member(batch_id, "https://c.example", 2, RunStatus::Completed, 80.0, 55.0),
		]);

		let comparison = aggregate(&snap, &FixedScorer { fail: false }).await.unwrap();
		let rule = &comparison.rule_comparison;

		let urls: Vec<&str> = rule.rankings.iter().map(|r| r.url.as_str()).collect();
		assert_eq!(
			urls,
			vec!["https://b.example", "https://c.example", "https://a.example"]
		);
		assert_eq!(rule.rankings[0].rank, 1);
		assert_eq!(rule.rankings[0].delta_from_leader, 0.0);
		assert_eq!(rule.average, 80.0);
		assert_eq!(rule.rankings[2].delta_from_leader, -20.0);
		assert_eq!(rule.rankings[2].delta_from_average, -10.0);
		assert_eq!(rule.leader.as_ref().unwrap().url, "https://b.example");
	}

	#[tokio::test]
	async fn ties_break_on_order_index() {
		let batch_id = Uuid::new_v4();
		let snap = snapshot(vec![
			member(batch_id, "https://late.example", 1, RunStatus::Completed, 80.0, 80.0),
			member(batch_id, "https://early.example", 0, RunStatus::Completed, 80.0, 80.0),
		]);

		let comparison = aggregate(&snap, &FixedScorer { fail: false }).await.unwrap();
		assert_eq!(
			comparison.rule_comparison.rankings[0].url,
			"https://early.example"
		);
		assert_eq!(comparison.rule_comparison.rankings[1].rank, 2);
	}

	#[tokio::test]
	async fn failed_members_are_excluded() {
		let batch_id = Uuid::new_v4();
		let snap = snapshot(vec![
			member(batch_id, "https://a.example", 0, RunStatus::Failed, 0.0, 0.0),
			member(batch_id, "https://b.example", 1, RunStatus::Completed, 90.0, 70.0),
			member(batch_id, "https://c.example", 2, RunStatus::Completed, 85.0, 75.0),
		]);

		let comparison = aggregate(&snap, &FixedScorer { fail: false }).await.unwrap();
		assert_eq!(comparison.rule_comparison.rankings.len(), 2);
		assert!(
			comparison
				.rule_comparison
				.rankings
				.iter()
				.all(|r| r.url != "https://a.example")
		);
	}

	#[tokio::test]
	async fn quorum_below_two_is_rejected() {
		let batch_id = Uuid::new_v4();
		let snap = snapshot(vec![
			member(batch_id, "https://a.example", 0, RunStatus::Failed, 0.0, 0.0),
			member(batch_id, "https://b.example", 1, RunStatus::Completed, 90.0, 70.0),
		]);

		let err = aggregate(&snap, &FixedScorer { fail: false })
			.await
			.unwrap_err();
		assert_eq!(err.kind(), "INVARIANT_VIOLATION");
	}

	#[tokio::test]
	async fn narrative_failure_degrades_gracefully() {
		let batch_id = Uuid::new_v4();
		let snap = snapshot(vec![
			member(batch_id, "https://a.example", 0, RunStatus::Completed, 70.0, 60.0),
			member(batch_id, "https://b.example", 1, RunStatus::Completed, 90.0, 50.0),
		]);

		let comparison = aggregate(&snap, &FixedScorer { fail: true }).await.unwrap();
		assert!(comparison.insights.is_empty());
		assert!(comparison.opportunities.is_empty());
		assert!(comparison.threats.is_empty());
		assert!(comparison.overall_winner.is_none());
		// Numeric portion is intact.
		assert_eq!(comparison.rule_comparison.rankings.len(), 2);
	}

	#[test]
	fn strengths_derive_from_category_scores() {
		let scores = CategoryScores {
			meta: 95.0,
			headings: 50.0,
			performance: 92.0,
			mobile: 100.0,
			security: 100.0,
			structured_data: 0.0,
		};
		let s = strengths(&scores);
		assert_eq!(s.len(), 3);
		assert!(s[0].contains("meta tags"));
		assert!(s[1].contains("performance"));
	}
}
