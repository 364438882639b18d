//! Error types for metadata queries.

use thiserror::Error;

/// Errors that can occur when querying the instance metadata service.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The metadata service could not be reached.
    #[error("could not establish connection to: {0}")]
    Unavailable(String),

    /// The requested API version is not offered by the service.
    #[error("requested API version \"{0}\" not available")]
    InvalidApiVersion(String),

    /// The requested metadata key does not exist.
    #[error("unknown metadata key: {0}")]
    UnknownKey(String),

    /// HTTP error with status code.
    #[error("http {0}")]
    Http(u16),

    /// A session token could not be obtained.
    #[error("unable to obtain token from metadata server")]
    Token,

    /// Response exceeds maximum allowed size.
    #[error("response too large: {0} bytes exceeds limit of {1} bytes")]
    TooLarge(usize, usize),

    /// Response was not valid UTF-8.
    #[error("invalid utf-8")]
    Utf8,

    /// JSON serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetadataError {
    /// Whether a batch may skip the failed key and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MetadataError::UnknownKey(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MetadataError::Unavailable("169.254.169.254".to_string()).to_string(),
            "could not establish connection to: 169.254.169.254"
        );
        assert_eq!(
            MetadataError::InvalidApiVersion("1999-01-01".to_string()).to_string(),
            "requested API version \"1999-01-01\" not available"
        );
        assert_eq!(
            MetadataError::UnknownKey("bogus".to_string()).to_string(),
            "unknown metadata key: bogus"
        );
        assert_eq!(MetadataError::Http(500).to_string(), "http 500");
        assert_eq!(
            MetadataError::Token.to_string(),
            "unable to obtain token from metadata server"
        );
        assert_eq!(MetadataError::Utf8.to_string(), "invalid utf-8");
    }

    #[test]
    fn test_only_unknown_key_is_recoverable() {
        assert!(MetadataError::UnknownKey("x".to_string()).is_recoverable());
        assert!(!MetadataError::Unavailable("x".to_string()).is_recoverable());
        assert!(!MetadataError::Http(500).is_recoverable());
        assert!(!MetadataError::Token.is_recoverable());
    }
}
