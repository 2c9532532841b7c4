use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersoError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model backend error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}

impl VersoError {
    /// Returns `true` when the error came from talking to the language-model
    /// backend (transport failure, bad status, unparseable payload).
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::Http(_) | Self::Serialization(_))
    }

    /// Returns `true` for request timeouts, whether raised by reqwest or
    /// reported inside a backend error message.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout(),
            Self::Upstream(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("timed out") || msg.contains("timeout")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, VersoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_classification() {
        assert!(VersoError::Upstream("API error 503".into()).is_upstream());
        assert!(!VersoError::NotFound("poem 4".into()).is_upstream());
        assert!(!VersoError::Storage("disk full".into()).is_upstream());
    }

    #[test]
    fn test_serialization_counts_as_upstream() {
        let err: VersoError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(err.is_upstream());
    }

    #[test]
    fn test_timeout_detection() {
        assert!(VersoError::Upstream("request timed out after 25s".into()).is_timeout());
        assert!(!VersoError::Upstream("API error 401: unauthorized".into()).is_timeout());
        assert!(!VersoError::Config("timeout_secs = 0".into()).is_timeout());
    }

    #[test]
    fn test_display_prefixes() {
        let err = VersoError::Unauthorized("sign in to chat".into());
        assert_eq!(err.to_string(), "Unauthorized: sign in to chat");
    }
}
