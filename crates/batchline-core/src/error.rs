//! Error types shared by the batch and real-time pipelines

use std::time::Duration;

/// Error from a single call across the provider boundary.
///
/// Callers pick a policy from [`is_retryable`](Self::is_retryable) and
/// [`is_quota`](Self::is_quota) rather than from the message text.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Rate limit or quota hit; retry after backoff
    QuotaExceeded(String),
    /// Payload rejected by the provider; never retried
    InvalidPayload(String),
    /// Job or resource id unknown to the provider
    NotFound(String),
    /// Local deadline expired before the provider answered
    Timeout(Duration),
    /// Any other HTTP/transport failure
    Http {
        status: Option<u16>,
        message: String,
    },
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::QuotaExceeded(msg) => write!(f, "quota exceeded: {msg}"),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::NotFound(id) => write!(f, "not found: {id}"),
            Self::Timeout(d) => write!(f, "exceeded timeout of {:.1}s", d.as_secs_f64()),
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::QuotaExceeded(_) | Self::Timeout(_) => true,
            Self::InvalidPayload(_) | Self::NotFound(_) => false,
            // No status = connection-level failure
            Self::Http { status, .. } => matches!(status, None | Some(500..=599)),
        }
    }

    /// Rate-limit class errors get the long fixed backoff
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Map an HTTP status code from the provider onto the taxonomy
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => Self::QuotaExceeded(message),
            400 | 413 | 422 => Self::InvalidPayload(message),
            404 => Self::NotFound(message),
            _ => Self::Http {
                status: Some(status),
                message,
            },
        }
    }

    /// Create error from reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        match e.status() {
            Some(s) => Self::from_status(s.as_u16(), e.to_string()),
            None => Self::Http {
                status: None,
                message: e.to_string(),
            },
        }
    }
}

/// Invalid sizing or credentials; fatal before anything is submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_err(status: u16) -> ProviderError {
        ProviderError::from_status(status, "test".to_string())
    }

    #[test]
    fn status_429_is_quota() {
        let err = http_err(429);
        assert!(err.is_quota());
        assert!(err.is_retryable());
    }

    #[test]
    fn status_400_not_retryable() {
        let err = http_err(400);
        assert!(matches!(err, ProviderError::InvalidPayload(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn status_404_is_not_found() {
        assert!(matches!(http_err(404), ProviderError::NotFound(_)));
    }

    #[test]
    fn status_503_retryable() {
        let err = http_err(503);
        assert!(err.is_retryable());
        assert!(!err.is_quota());
    }

    #[test]
    fn status_401_not_retryable() {
        assert!(!http_err(401).is_retryable());
    }

    #[test]
    fn connection_error_retryable() {
        let err = ProviderError::Http {
            status: None,
            message: "reset".into(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "HTTP error: reset");
    }

    #[test]
    fn timeout_display_names_deadline() {
        let err = ProviderError::Timeout(Duration::from_secs(30));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("exceeded timeout of 30.0s"));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError("avg_input_tokens must be > 0".into());
        assert_eq!(
            err.to_string(),
            "configuration error: avg_input_tokens must be > 0"
        );
    }
}
