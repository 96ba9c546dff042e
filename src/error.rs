use thiserror::Error;

/// Errors raised across the orchestrator. Each variant maps to a stable
/// `kind()` label that is persisted in job `error_details` and surfaced to
/// clients; the label set is part of the external contract, the variant
/// names are not.
#[derive(Debug, Error)]
pub enum OrchestratorError {
	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("invariant violation: {0}")]
	InvariantViolation(String),

	#[error("fetch failed: {0}")]
	FetchFailed(String),

	#[error("semantic scorer failed: {0}")]
	ScorerFailed(String),

	#[error("cancelled")]
	Cancelled,

	#[error("transient failure: {0}")]
	Transient(String),

	#[error("internal error: {0}")]
	Internal(String),
}

impl OrchestratorError {
	pub fn kind(&self) -> &'static str {
		match self {
			OrchestratorError::InvalidInput(_) => "INVALID_INPUT",
			OrchestratorError::NotFound(_) => "NOT_FOUND",
			OrchestratorError::Conflict(_) => "CONFLICT",
			OrchestratorError::InvariantViolation(_) => "INVARIANT_VIOLATION",
			OrchestratorError::FetchFailed(_) => "FETCH_FAILED",
			OrchestratorError::ScorerFailed(_) => "SCORER_FAILED",
			OrchestratorError::Cancelled => "CANCELLED",
			OrchestratorError::Transient(_) => "TRANSIENT",
			OrchestratorError::Internal(_) => "INTERNAL",
		}
	}

	/// Retryable failures: the caller may attempt the same operation again.
	pub fn is_transient(&self) -> bool {
		matches!(self, OrchestratorError::Transient(_))
	}
}

impl From<sqlx::Error> for OrchestratorError {
	fn from(e: sqlx::Error) -> Self {
		match e {
			sqlx::Error::RowNotFound => OrchestratorError::NotFound("row not found".to_string()),
			sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
				OrchestratorError::Transient(e.to_string())
			}
			other => OrchestratorError::Internal(other.to_string()),
		}
	}
}

impl From<serde_json::Error> for OrchestratorError {
	fn from(e: serde_json::Error) -> Self {
		OrchestratorError::Internal(format!("serialization: {}", e))
	}
}

pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn kinds_are_stable_labels() {
		assert_eq!(OrchestratorError::FetchFailed("x".into()).kind(), "FETCH_FAILED");
		assert_eq!(OrchestratorError::ScorerFailed("x".into()).kind(), "SCORER_FAILED");
		assert_eq!(OrchestratorError::Cancelled.kind(), "CANCELLED");
	}

	#[test]
	fn transient_is_retryable() {
		assert!(OrchestratorError::Transient("io".into()).is_transient());
		assert!(!OrchestratorError::Conflict("stale".into()).is_transient());
	}
}
