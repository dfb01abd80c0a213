use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for Sitescout.
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    /// Network-level failure (DNS, connection refused, reset).
    #[error("connection error: {0}")]
    Connection(String),

    /// Request exceeded its deadline.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Server answered with a non-2xx status.
    #[error("HTTP {status} error")]
    Http { status: u16 },

    /// Redirect chain exceeded the allowed hop count.
    #[error("too many redirects for {0}")]
    TooManyRedirects(String),

    /// URL is not an absolute http/https URL.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Request parameters outside their allowed ranges.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Page content could not be parsed into a draft entity.
    #[error("parsing error: {0}")]
    Parsing(String),

    /// External AI/knowledge-graph service call failed.
    #[error("{service} API error (HTTP {status}): {message}")]
    Api {
        service: String,
        status: u16,
        message: String,
    },

    /// Credential rejected by an external service.
    #[error("authentication error: {0}")]
    Auth(String),

    /// Repository operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The extraction was cancelled before reaching a natural terminal state.
    #[error("extraction cancelled")]
    Cancelled,
}

/// Error categories carried on audit records and terminal results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Http,
    TooManyRedirects,
    InvalidUrl,
    Validation,
    Parsing,
    Api,
    Auth,
    Storage,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Http => "http",
            ErrorKind::TooManyRedirects => "too_many_redirects",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::Validation => "validation",
            ErrorKind::Parsing => "parsing",
            ErrorKind::Api => "api",
            ErrorKind::Auth => "auth",
            ErrorKind::Storage => "storage",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ExtractError {
    /// Returns true if this failure may succeed on retry without changed
    /// input. 429 counts as transient; every other 4xx is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractError::Connection(_) | ExtractError::Timeout(_) => true,
            ExtractError::Http { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Category for audit records. Timeouts are reported as connection
    /// failures; callers never need to distinguish the two after the fact.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Connection(_) | ExtractError::Timeout(_) => ErrorKind::Connection,
            ExtractError::Http { .. } => ErrorKind::Http,
            ExtractError::TooManyRedirects(_) => ErrorKind::TooManyRedirects,
            ExtractError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            ExtractError::InvalidRequest(_) => ErrorKind::Validation,
            ExtractError::Parsing(_) => ErrorKind::Parsing,
            ExtractError::Api { .. } => ErrorKind::Api,
            ExtractError::Auth(_) => ErrorKind::Auth,
            ExtractError::Storage(_) => ErrorKind::Storage,
            ExtractError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(ExtractError::Connection("reset".into()).is_transient());
        assert!(ExtractError::Timeout(30).is_transient());
        assert!(ExtractError::Http { status: 429 }.is_transient());
        assert!(ExtractError::Http { status: 500 }.is_transient());
        assert!(ExtractError::Http { status: 503 }.is_transient());
    }

    #[test]
    fn permanent_errors() {
        assert!(ExtractError::Http { status: 404 }.is_permanent());
        assert!(ExtractError::Http { status: 403 }.is_permanent());
        assert!(ExtractError::InvalidUrl("not-a-url".into()).is_permanent());
        assert!(ExtractError::Parsing("bad html".into()).is_permanent());
        assert!(ExtractError::TooManyRedirects("http://a".into()).is_permanent());
        assert!(ExtractError::Auth("bad key".into()).is_permanent());
    }

    #[test]
    fn timeout_reported_as_connection_kind() {
        assert_eq!(ExtractError::Timeout(30).kind(), ErrorKind::Connection);
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(ExtractError::Http { status: 404 }.kind(), ErrorKind::Http);
        assert_eq!(
            ExtractError::Parsing("x".into()).kind(),
            ErrorKind::Parsing
        );
        assert_eq!(ExtractError::Cancelled.kind(), ErrorKind::Cancelled);
    }
}
