//! Error types for query execution

use thiserror::Error;

/// Errors surfaced by the query engine.
///
/// Per-query failures (`Exec`, `Cancelled`, `Internal`) are carried inside the
/// query's response and never abort sibling queries. `Config` and `Connect`
/// abort instance creation and fail the whole batch uniformly.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// Instance settings are invalid (bad numeric, out-of-bounds value)
    #[error("configuration error: {0}")]
    Config(String),

    /// Opening a pooled connection to the warehouse failed
    #[error("connection failed: {0}")]
    Connect(String),

    /// Credentials were rejected by the warehouse
    #[error("authentication failed: {0}")]
    Auth(String),

    /// SQL execution or result decoding failed
    #[error("query failed: {0}")]
    Exec(String),

    /// The batch context was cancelled before the query completed
    #[error("query cancelled")]
    Cancelled,

    /// A cache entry exceeds the hard byte cap; non-fatal on write
    #[error("cache entry too large: {0} bytes")]
    CacheTooLarge(usize),

    /// Unexpected failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl QueryError {
    /// Stable kind identifier, used in responses and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::Config(_) => "config",
            QueryError::Connect(_) => "connect",
            QueryError::Auth(_) => "auth",
            QueryError::Exec(_) => "exec",
            QueryError::Cancelled => "cancelled",
            QueryError::CacheTooLarge(_) => "cache_too_large",
            QueryError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_identifiers() {
        assert_eq!(QueryError::Config("x".into()).kind(), "config");
        assert_eq!(QueryError::Connect("x".into()).kind(), "connect");
        assert_eq!(QueryError::Auth("x".into()).kind(), "auth");
        assert_eq!(QueryError::Exec("x".into()).kind(), "exec");
        assert_eq!(QueryError::Cancelled.kind(), "cancelled");
        assert_eq!(QueryError::CacheTooLarge(10).kind(), "cache_too_large");
        assert_eq!(QueryError::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn test_display_carries_message() {
        let e = QueryError::Exec("syntax error at line 1".into());
        assert!(e.to_string().contains("syntax error"));
    }
}
