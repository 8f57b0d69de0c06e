//! Core error taxonomy.
//!
//! Errors are classified by how callers react to them, not by where they
//! originate:
//!
//! | Variant | Meaning | Caller policy |
//! |---------|---------|---------------|
//! | [`CoreError::Transient`] | Upstream or transport failure | Retry on the next attempt |
//! | [`CoreError::Integrity`] | Stored state contradicts an invariant | Surface, never retry |
//! | [`CoreError::Validation`] | Input or configuration rejected | Fix the input |
//! | [`CoreError::ExhaustedRetry`] | Attempt budget spent with work left | Report as partial failure |
//!
//! The CLI edge wraps these in `anyhow` for display; library code matches
//! on the variants.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A failure expected to clear on its own: network, upstream service,
    /// database contention. The affected record stays stale and retries.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Stored state violates an invariant (missing record, corrupt blob).
    /// Retrying cannot help.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The input or configuration is unusable as given.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The reconciliation attempt budget ran out with records still stale.
    #[error("retry budget exhausted after {attempts} attempts, {remaining} records still stale")]
    ExhaustedRetry { attempts: u32, remaining: usize },
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::Integrity(err.to_string()),
            other => CoreError::Transient(format!("database error: {}", other)),
        }
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::Transient(format!("http error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_is_integrity() {
        let err: CoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, CoreError::Integrity(_)));
    }

    #[test]
    fn test_exhausted_retry_display() {
        let err = CoreError::ExhaustedRetry {
            attempts: 3,
            remaining: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("2 records"));
    }
}
