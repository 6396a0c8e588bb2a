//! GitHub API error types

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::Retryable;

/// Errors that can occur while talking to the GitHub REST API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("GitHub API error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing GitHub token: environment variable {env_var} not set")]
    MissingToken { env_var: String },
}

/// User-facing grouping of terminal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidToken,
    RateLimited,
    NotFound,
    ServerError,
    Network,
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCategory::InvalidToken => "Invalid or expired token",
            ErrorCategory::RateLimited => "GitHub rate limit exceeded",
            ErrorCategory::NotFound => "Not found",
            ErrorCategory::ServerError => "GitHub server error",
            ErrorCategory::Network => "Network error",
            ErrorCategory::Other => "Request failed",
        };
        write!(f, "{}", text)
    }
}

impl ApiError {
    /// Build an error from a non-success response.
    ///
    /// GitHub puts a human-readable `message` in the JSON body; fall back to
    /// the raw body when it is missing.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| body.trim().to_string());
        ApiError::Http { status, message }
    }

    /// Message carried by the error, for display.
    pub fn message(&self) -> String {
        match self {
            ApiError::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        match self {
            ApiError::Http { status: 429, .. } => true,
            ApiError::Http { status: 403, message } => message.to_lowercase().contains("rate limit"),
            _ => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        if self.is_rate_limit() {
            return ErrorCategory::RateLimited;
        }
        match self {
            ApiError::MissingToken { .. } => ErrorCategory::InvalidToken,
            ApiError::Network(_) | ApiError::Timeout(_) => ErrorCategory::Network,
            _ => match self.status() {
                Some(401) | Some(403) => ErrorCategory::InvalidToken,
                Some(404) => ErrorCategory::NotFound,
                Some(status) if status >= 500 => ErrorCategory::ServerError,
                _ => ErrorCategory::Other,
            },
        }
    }
}

impl Retryable for ApiError {
    fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            // No token is an authentication failure that no retry can fix.
            ApiError::MissingToken { .. } => false,
            _ => !matches!(self.status(), Some(401) | Some(403)),
        }
    }
}

impl Retryable for eyre::Report {
    fn status(&self) -> Option<u16> {
        self.downcast_ref::<ApiError>().and_then(Retryable::status)
    }

    fn is_retryable(&self) -> bool {
        self.downcast_ref::<ApiError>().is_none_or(Retryable::is_retryable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, message: &str) -> ApiError {
        ApiError::Http {
            status,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_from_response_extracts_message() {
        let err = ApiError::from_response(401, r#"{"message":"Bad credentials","documentation_url":"x"}"#);
        assert_eq!(err.status(), Some(401));
        assert_eq!(err.message(), "Bad credentials");
        assert_eq!(err.to_string(), "GitHub API error 401: Bad credentials");
    }

    #[test]
    fn test_from_response_falls_back_to_body() {
        let err = ApiError::from_response(502, "  upstream connect error \n");
        assert_eq!(err.message(), "upstream connect error");
    }

    #[test]
    fn test_is_retryable() {
        assert!(!http(401, "Bad credentials").is_retryable());
        assert!(!http(403, "Resource not accessible").is_retryable());
        assert!(http(500, "Server error").is_retryable());
        assert!(http(404, "Not Found").is_retryable());
        assert!(http(429, "Too many requests").is_retryable());
        assert!(ApiError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(
            !ApiError::MissingToken {
                env_var: "GITHUB_TOKEN".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_category() {
        assert_eq!(http(401, "Bad credentials").category(), ErrorCategory::InvalidToken);
        assert_eq!(http(403, "Forbidden").category(), ErrorCategory::InvalidToken);
        assert_eq!(
            http(403, "API rate limit exceeded for user ID 1.").category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(http(429, "slow down").category(), ErrorCategory::RateLimited);
        assert_eq!(http(404, "Not Found").category(), ErrorCategory::NotFound);
        assert_eq!(http(503, "unavailable").category(), ErrorCategory::ServerError);
        assert_eq!(http(422, "Validation Failed").category(), ErrorCategory::Other);
        assert_eq!(ApiError::Timeout(Duration::from_secs(1)).category(), ErrorCategory::Network);
    }

    #[test]
    fn test_rate_limited_403_is_still_terminal() {
        let err = http(403, "API rate limit exceeded");
        assert!(err.is_rate_limit());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_eyre_report_classification() {
        let report = eyre::Report::new(http(401, "Bad credentials"));
        assert_eq!(report.status(), Some(401));
        assert!(!report.is_retryable());

        let report = eyre::eyre!("connection reset");
        assert_eq!(report.status(), None);
        assert!(report.is_retryable());
    }
}
