//! API error types
//!
//! Classifies every failure along the retryable/non-retryable seam so the
//! request loop can decide between backing off and bailing out.

use std::fmt;
use std::time::Duration;

use airlift_common::retry::RetryError;
use thiserror::Error;

/// Error payload extracted from an API error response body.
///
/// The platform wraps failures as `{"error": {"message", "code"}}`; bodies
/// that do not match the envelope are carried verbatim as the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Human-readable description of the failure.
    pub message: String,
    /// Machine-readable error code, when the platform provides one.
    pub code: Option<String>,
}

impl ErrorDetail {
    /// Detail with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), code: None }
    }

    /// Detail with both a message and a platform error code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self { message: message.into(), code: Some(code.into()) }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} [{}]", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Categories of API errors for retry logic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// The platform rejected the request (4xx) - non-retryable
    Rejection,
    /// Server-side failure (5xx and other unexpected statuses) - retryable
    Server,
    /// Network/connection errors - retryable
    Network,
    /// Response body could not be decoded - non-retryable
    Decode,
    /// Configuration or request construction errors - non-retryable
    Config,
    /// The caller's deadline or cancellation fired - non-retryable
    Aborted,
    /// The retry budget ran out - terminal
    Exhausted,
}

/// API operation errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// The platform answered with a 4xx status. Retrying would send the same
    /// rejected request again, so this always aborts the attempt loop.
    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: ErrorDetail },

    /// The platform answered with a 5xx or otherwise unexpected status.
    #[error("Server error ({status}): {detail}")]
    Server { status: u16, detail: ErrorDetail },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response ({status}): {message}")]
    Decode { status: u16, message: String },

    #[error("Failed to encode request body: {0}")]
    Encode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Deadline exceeded after {limit:?}")]
    DeadlineExceeded { limit: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    /// Every attempt failed with a transient error; wraps the last one.
    #[error("All {attempts} attempts failed: {source}")]
    RetriesExhausted { attempts: u32, source: Box<ApiError> },
}

impl ApiError {
    /// Get the error category for this error
    pub fn category(&self) -> ApiErrorCategory {
        match self {
            Self::Rejected { .. } => ApiErrorCategory::Rejection,
            Self::Server { .. } => ApiErrorCategory::Server,
            Self::Network(_) => ApiErrorCategory::Network,
            Self::Decode { .. } => ApiErrorCategory::Decode,
            Self::Encode(_) | Self::Config(_) => ApiErrorCategory::Config,
            Self::DeadlineExceeded { .. } | Self::Cancelled => ApiErrorCategory::Aborted,
            Self::RetriesExhausted { .. } => ApiErrorCategory::Exhausted,
        }
    }

    /// Check if this error should be retried
    pub fn should_retry(&self) -> bool {
        matches!(self.category(), ApiErrorCategory::Server | ApiErrorCategory::Network)
    }
}

/// Collapse the retry loop's outcome back into the API error taxonomy.
impl From<RetryError<ApiError>> for ApiError {
    fn from(err: RetryError<ApiError>) -> Self {
        match err {
            RetryError::AttemptsExhausted { attempts, last } => {
                Self::RetriesExhausted { attempts, source: Box::new(last) }
            }
            RetryError::NonRetryable { source } => source,
            RetryError::InvalidConfiguration { message } => Self::Config(message),
        }
    }
}
