use thiserror::Error;

/// Application-wide error types for jobscout.
#[derive(Error, Debug)]
pub enum AppError {
    /// A required context field or input is missing/malformed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// HTTP request failed (fetching a careers page or posting).
    #[error("HTTP error: {0}")]
    Http(String),

    /// Inference API call failed or returned an unusable response.
    #[error("Inference error (HTTP {status_code}): {message}")]
    Inference {
        message: String,
        status_code: u16,
        retryable: bool,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Inference quota ceiling hit (handled internally by waiting).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    Network(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// CV download or text extraction failed.
    #[error("Document error: {0}")]
    Document(String),

    /// Missing or invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// A stage failed and the pipeline was configured to stop.
    #[error("Pipeline aborted at stage '{stage}': {message}")]
    PipelineAborted { stage: String, message: String },

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Network(_) | AppError::Timeout(_) | AppError::RateLimitExceeded => true,
            AppError::Inference { retryable, .. } => *retryable,
            AppError::Http(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

}
