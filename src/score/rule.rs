//! Deterministic rule scoring over a page snapshot.
//!
//! Six weighted categories produce an overall score in [0, 100] together
//! with per-category sub-scores, human-readable issues, and prioritized
//! suggestions. Given the same snapshot the output is identical bit for bit.

use crate::model::{CategoryScores, PageSnapshot, Priority, RuleReport, Suggestion};
use crate::score::round2;

pub const WEIGHT_META: f64 = 0.25;
pub const WEIGHT_HEADINGS: f64 = 0.15;
pub const WEIGHT_PERFORMANCE: f64 = 0.20;
pub const WEIGHT_MOBILE: f64 = 0.15;
pub const WEIGHT_SECURITY: f64 = 0.10;
pub const WEIGHT_STRUCTURED_DATA: f64 = 0.15;

// Optimal meta tag lengths (characters).
const TITLE_MIN_LENGTH: usize = 30;
const TITLE_MAX_LENGTH: usize = 60;
const DESCRIPTION_MIN_LENGTH: usize = 120;
const DESCRIPTION_MAX_LENGTH: usize = 160;

// Performance thresholds (seconds).
const PERF_EXCELLENT: f64 = 2.0;
const PERF_GOOD: f64 = 3.0;
const PERF_ACCEPTABLE: f64 = 5.0;

/// Schema types that count as meaningful structured data.
const VALID_SCHEMA_TYPES: [&str; 7] = [
	"Organization",
	"WebSite",
	"Article",
	"Product",
	"LocalBusiness",
	"FAQPage",
	"BreadcrumbList",
];

/// Score a snapshot against all six categories.
pub fn score(snapshot: &PageSnapshot) -> RuleReport {
	let mut issues = Vec::new();
	let mut suggestions = Vec::new();

	let meta = analyze_meta_tags(snapshot, &mut issues, &mut suggestions);
	let headings = analyze_headings(snapshot, &mut issues, &mut suggestions);
	let performance = analyze_performance(snapshot.load_time, &mut issues, &mut suggestions);
	let mobile = analyze_mobile(snapshot.mobile_friendly, &mut suggestions);
	let security = analyze_security(snapshot.ssl_enabled, &mut suggestions);
	let structured_data = analyze_structured_data(&snapshot.structured_data, &mut suggestions);

	let category_scores = CategoryScores {
		meta,
		headings,
		performance,
		mobile,
		security,
		structured_data,
	};

	let total = meta * WEIGHT_META
		+ headings * WEIGHT_HEADINGS
		+ performance * WEIGHT_PERFORMANCE
		+ mobile * WEIGHT_MOBILE
		+ security * WEIGHT_SECURITY
		+ structured_data * WEIGHT_STRUCTURED_DATA;

	RuleReport {
		score: round2(total),
		category_scores,
		issues,
		suggestions,
	}
}

fn suggestion(
	priority: Priority,
	title: &str,
	description: String,
	impact: &str,
) -> Suggestion {
	Suggestion {
		category: "rule".to_string(),
		priority,
		title: title.to_string(),
		description,
		impact: impact.to_string(),
	}
}

fn analyze_meta_tags(
	snapshot: &PageSnapshot,
	issues: &mut Vec<String>,
	suggestions: &mut Vec<Suggestion>,
) -> f64 {
	let mut score = 0u32;

	// Title tag (40 points).
	let title_len = snapshot.title().chars().count();
	if title_len == 0 {
		issues.push("Missing title tag".to_string());
		suggestions.push(suggestion(
			Priority::Critical,
			"Add Title Tag",
			"Every page must have a unique, descriptive title tag (30-60 characters)."
				.to_string(),
			"high",
		));
	} else if title_len < TITLE_MIN_LENGTH {
		issues.push(format!(
			"Title too short ({} chars, recommended: {}-{})",
			title_len, TITLE_MIN_LENGTH, TITLE_MAX_LENGTH
		));
		score += 20;
		suggestions.push(suggestion(
			Priority::High,
			"Expand Title Tag",
			format!(
				"Your title is only {} characters. Expand it to 30-60 characters for better discoverability.",
				title_len
			),
			"medium",
		));
	} else if title_len > TITLE_MAX_LENGTH {
		issues.push(format!(
			"Title too long ({} chars, recommended: {}-{})",
			title_len, TITLE_MIN_LENGTH, TITLE_MAX_LENGTH
		));
		score += 30;
		suggestions.push(suggestion(
			Priority::Medium,
			"Shorten Title Tag",
			format!(
				"Your title is {} characters. Shorten it to 60 characters or less to avoid truncation in result listings.",
				title_len
			),
			"medium",
		));
	} else {
		score += 40;
	}

	// Meta description (40 points).
	let desc_len = snapshot.description().chars().count();
	if desc_len == 0 {
		issues.push("Missing meta description".to_string());
		suggestions.push(suggestion(
			Priority::High,
			"Add Meta Description",
			"Add a compelling meta description (120-160 characters) to improve click-through rates."
				.to_string(),
			"high",
		));
	} else if desc_len < DESCRIPTION_MIN_LENGTH {
		issues.push(format!("Description too short ({} chars)", desc_len));
		score += 20;
		suggestions.push(suggestion(
			Priority::Medium,
			"Expand Meta Description",
			format!(
				"Your meta description is only {} characters. Expand it to 120-160 characters for better engagement.",
				desc_len
			),
			"medium",
		));
	} else if desc_len > DESCRIPTION_MAX_LENGTH {
		issues.push(format!("Description too long ({} chars)", desc_len));
		score += 30;
	} else {
		score += 40;
	}

	// Open Graph tags (10 points).
	let og_count = snapshot
		.meta_tags
		.keys()
		.filter(|k| k.starts_with("og:"))
		.count();
	if og_count >= 4 {
		score += 10;
	} else if og_count > 0 {
		score += 5;
		suggestions.push(suggestion(
			Priority::Low,
			"Complete Open Graph Tags",
			"Add complete Open Graph tags (og:title, og:description, og:image, og:url) to improve social sharing."
				.to_string(),
			"low",
		));
	} else {
		suggestions.push(suggestion(
			Priority::Medium,
			"Add Open Graph Tags",
			"Add Open Graph meta tags to control how your content appears when shared on social platforms."
				.to_string(),
			"medium",
		));
	}

	// Canonical URL (10 points).
	if snapshot.meta_tags.contains_key("canonical") {
		score += 10;
	} else {
		suggestions.push(suggestion(
			Priority::Low,
			"Add Canonical URL",
			"Add a canonical link tag to prevent duplicate content issues.".to_string(),
			"low",
		));
	}

	score.min(100) as f64
}

fn analyze_headings(
	snapshot: &PageSnapshot,
	issues: &mut Vec<String>,
	suggestions: &mut Vec<Suggestion>,
) -> f64 {
	let mut score: i32 = 100;
	let headings = &snapshot.headings;

	// H1 (50 points).
	let h1_count = headings.count(1);
	if h1_count == 0 {
		score -= 50;
		issues.push("Missing H1 tag".to_string());
		suggestions.push(suggestion(
			Priority::Critical,
			"Add H1 Heading",
			"Every page must have exactly one H1 tag that describes the main topic.".to_string(),
			"high",
		));
	} else if h1_count > 1 {
		score -= 20;
		issues.push(format!(
			"Multiple H1 tags found ({}), should have only one",
			h1_count
		));
		suggestions.push(suggestion(
			Priority::High,
			"Use Single H1 Tag",
			format!("You have {} H1 tags. Use only one H1 per page.", h1_count),
			"medium",
		));
	}

	// H2 presence (30 points).
	if headings.count(2) == 0 && h1_count > 0 {
		score -= 30;
		issues.push("No H2 tags found - consider adding subheadings".to_string());
		suggestions.push(suggestion(
			Priority::Medium,
			"Add H2 Subheadings",
			"Add H2 tags to structure your content with clear subheadings.".to_string(),
			"medium",
		));
	}

	// Hierarchy (20 points): a level k+1 used without any level k.
	let mut has_proper_hierarchy = true;
	for level in 1..=5 {
		if headings.count(level + 1) > 0 && headings.count(level) == 0 {
			has_proper_hierarchy = false;
			issues.push(format!(
				"Heading hierarchy issue: H{} found without H{}",
				level + 1,
				level
			));
			break;
		}
	}
	if !has_proper_hierarchy {
		score -= 20;
		suggestions.push(suggestion(
			Priority::Low,
			"Fix Heading Hierarchy",
			"Maintain proper heading hierarchy (H1 -> H2 -> H3) without skipping levels."
				.to_string(),
			"low",
		));
	}

	score.max(0) as f64
}

fn analyze_performance(
	load_time: f64,
	issues: &mut Vec<String>,
	suggestions: &mut Vec<Suggestion>,
) -> f64 {
	if load_time < PERF_EXCELLENT {
		100.0
	} else if load_time < PERF_GOOD {
		issues.push(format!(
			"Page load time ({:.2}s) is acceptable but could be improved",
			load_time
		));
		suggestions.push(suggestion(
			Priority::Low,
			"Optimize Page Speed",
			format!(
				"Your page loads in {:.2} seconds. Consider optimizing images and minifying resources to reach under 2 seconds.",
				load_time
			),
			"low",
		));
		80.0
	} else if load_time < PERF_ACCEPTABLE {
		issues.push(format!("Page load time ({:.2}s) is slow", load_time));
		suggestions.push(suggestion(
			Priority::High,
			"Improve Page Speed",
			format!(
				"Your page takes {:.2} seconds to load. Optimize images, enable caching, and minify CSS/JS.",
				load_time
			),
			"high",
		));
		50.0
	} else {
		issues.push(format!("Page load time ({:.2}s) is very slow", load_time));
		suggestions.push(suggestion(
			Priority::Critical,
			"Critical: Fix Page Speed",
			format!(
				"Your page takes {:.2} seconds to load, which severely impacts ranking and user experience.",
				load_time
			),
			"critical",
		));
		20.0
	}
}

fn analyze_mobile(mobile_friendly: bool, suggestions: &mut Vec<Suggestion>) -> f64 {
	if mobile_friendly {
		100.0
	} else {
		suggestions.push(suggestion(
			Priority::Critical,
			"Add Viewport Meta Tag",
			"Add <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"> to make your site mobile-friendly."
				.to_string(),
			"critical",
		));
		0.0
	}
}

fn analyze_security(ssl_enabled: bool, suggestions: &mut Vec<Suggestion>) -> f64 {
	if ssl_enabled {
		100.0
	} else {
		suggestions.push(suggestion(
			Priority::Critical,
			"Enable HTTPS",
			"Switch to HTTPS to secure your site. Browsers mark plain HTTP sites as \"Not Secure\"."
				.to_string(),
			"critical",
		));
		0.0
	}
}

fn analyze_structured_data(
	structured_data: &[serde_json::Value],
	suggestions: &mut Vec<Suggestion>,
) -> f64 {
	if structured_data.is_empty() {
		suggestions.push(suggestion(
			Priority::Medium,
			"Add Structured Data",
			"Add Schema.org structured data (JSON-LD) to help machines understand your content and enable rich results."
				.to_string(),
			"medium",
		));
		return 0.0;
	}

	let has_valid_schema = structured_data.iter().any(|item| {
		// "@type" may be a string or a list of strings; take the first.
		let item_type = match item.get("@type") {
			Some(serde_json::Value::String(s)) => s.as_str(),
			Some(serde_json::Value::Array(arr)) => {
				arr.first().and_then(|v| v.as_str()).unwrap_or("")
			}
			_ => "",
		};
		VALID_SCHEMA_TYPES.contains(&item_type)
	});

	if has_valid_schema {
		100.0
	} else {
		suggestions.push(suggestion(
			Priority::Low,
			"Improve Structured Data",
			"Consider adding more specific schema types like Organization, Product, or Article."
				.to_string(),
			"low",
		));
		50.0
	}
}
