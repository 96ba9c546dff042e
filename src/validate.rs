use url::{Host, Url};

use crate::error::OrchestratorError;

/// Maximum accepted URL length in bytes.
pub const MAX_URL_LEN: usize = 2048;

/// Validate a submitted URL before any persistence.
///
/// Rejects non-http(s) schemes, empty hosts, and loopback/private hosts so
/// the fetcher is never pointed at internal infrastructure.
pub fn validate_url(raw: &str) -> Result<Url, OrchestratorError> {
	if raw.len() > MAX_URL_LEN {
		return Err(OrchestratorError::InvalidInput(format!(
			"URL exceeds {} bytes",
			MAX_URL_LEN
		)));
	}

	let url = Url::parse(raw)
		.map_err(|e| OrchestratorError::InvalidInput(format!("invalid URL: {}", e)))?;

	match url.scheme() {
		"http" | "https" => {}
		other => {
			return Err(OrchestratorError::InvalidInput(format!(
				"unsupported URL scheme: {}",
				other
			)));
		}
	}

	let host = url
		.host()
		.ok_or_else(|| OrchestratorError::InvalidInput("URL has no host".to_string()))?;

	if is_blocked_host(&host) {
		return Err(OrchestratorError::InvalidInput(format!(
			"URL host is not allowed: {}",
			host
		)));
	}

	Ok(url)
}

fn is_blocked_host(host: &Host<&str>) -> bool {
	match host {
		Host::Domain(d) => {
			let d = d.to_ascii_lowercase();
			d == "localhost" || d.ends_with(".localhost")
		}
		Host::Ipv4(addr) => {
			addr.is_loopback() || addr.is_private() || addr.is_link_local() || addr.is_unspecified()
		}
		Host::Ipv6(addr) => addr.is_loopback() || addr.is_unspecified(),
	}
}
