use thiserror::Error;

/// Failure classes for the fetch and load stages.
///
/// Nothing here is retried; the pipeline is a single pass. Each variant
/// aborts either the ticker being processed or, for [`EtlError::is_fatal`]
/// variants, the whole run.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The provider rejected the API key, or none was configured.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Provider quota exhausted: HTTP 429, or an error body with code 429.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// A response arrived but did not carry the fields we need.
    #[error("malformed response from {context}: {reason}")]
    MalformedResponse { context: String, reason: String },

    /// Any other error body or HTTP status the provider returned.
    #[error("provider error {code}: {message}")]
    Provider { code: u16, message: String },

    /// The store rejected a statement.
    #[error("store write failed: {0}")]
    StoreWrite(#[from] duckdb::Error),

    /// Transport-level failure: DNS, TLS, connect or read timeout.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl EtlError {
    pub fn malformed(context: &str, reason: impl Into<String>) -> Self {
        EtlError::MalformedResponse {
            context: context.to_string(),
            reason: reason.into(),
        }
    }

    /// Fatal errors abort the whole run: every later request would fail the
    /// same way, so there is no point continuing with the next ticker.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EtlError::Authentication(_) | EtlError::RateLimit(_))
    }
}
