// Error taxonomy shared by the stores and the dashboard services.

use thiserror::Error;

/// Errors surfaced by the document store collaborators and the logic built
/// on top of them.
///
/// Payloads are plain strings so the error can be cloned into every
/// subscriber's snapshot channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A caller-supplied argument violated a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying store failed to answer a query or accept a write.
    #[error("query failed: {0}")]
    QueryFailure(String),

    /// Sign-in was rejected or cancelled.
    #[error("authentication failed: {0}")]
    AuthError(String),
}

impl CoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        CoreError::InvalidArgument(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        CoreError::QueryFailure(message.into())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::QueryFailure(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::QueryFailure(format!("malformed document: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category() {
        assert_eq!(
            CoreError::invalid("bucket width must be > 0").to_string(),
            "invalid argument: bucket width must be > 0"
        );
        assert_eq!(
            CoreError::query("disk full").to_string(),
            "query failed: disk full"
        );
        assert_eq!(
            CoreError::AuthError("popup closed".into()).to_string(),
            "authentication failed: popup closed"
        );
    }

    #[test]
    fn json_errors_become_query_failures() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        match CoreError::from(err) {
            CoreError::QueryFailure(msg) => assert!(msg.starts_with("malformed document")),
            other => panic!("expected QueryFailure, got: {other}"),
        }
    }
}
