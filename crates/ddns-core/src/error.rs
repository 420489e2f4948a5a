//! Error types for the DDNS system
//!
//! One error enum is shared by every component. The variant tells the
//! reconciler how to react: `NotFound` forces record re-adoption,
//! everything else provider-side is recorded and retried on the next tick.

use thiserror::Error;

/// Result type alias for DDNS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the DDNS system
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (interval below the minimum, missing field, bad name)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or rejected provider credential
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Public IP discovery failed
    #[error("IP resolution failed: {0}")]
    Resolution(String),

    /// Record, zone or config does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record or config already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Config store errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create an IP resolution error
    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for failures worth retrying on the next tick without operator action
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Resolution(_) | Self::RateLimited(_) | Self::Provider { .. } | Self::Http(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::not_found("rec").is_not_found());
        assert!(!Error::conflict("rec").is_not_found());
        assert!(Error::resolution("timeout").is_transient());
        assert!(Error::provider("cloudflare", "502").is_transient());
        assert!(!Error::auth("bad token").is_transient());
        assert!(!Error::validation("interval").is_transient());
    }

    #[test]
    fn provider_error_display_names_provider() {
        let err = Error::provider("cloudflare", "upstream 502");
        assert_eq!(err.to_string(), "Provider error (cloudflare): upstream 502");
    }
}
