//! Error types for the translation batch pipeline.

use thiserror::Error;

/// Result type alias using the crate error type.
pub type Result<T> = std::result::Result<T, TranslateBatchError>;

/// Main error type for the translation batch pipeline.
///
/// Transient polling failures and unreadable registry files are not represented here: both are
/// logged and recovered where they happen.
#[derive(Error, Debug)]
pub enum TranslateBatchError {
    /// Bad configuration or empty input, detected before any remote call
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// The remote service rejected the batch (upload or create)
    #[error("Batch submission failed: {0}")]
    SubmissionFailed(String),

    /// The job reached the FAILED terminal state
    #[error("Batch job {name} failed: {message}")]
    JobFailed { name: String, message: String },

    /// The job reached the CANCELLED terminal state
    #[error("Batch job {name} was cancelled: {message}")]
    JobCancelled { name: String, message: String },

    /// Results were requested for a job that has not succeeded yet
    #[error("Batch job {name} is in state '{state}', expected 'SUCCEEDED'")]
    JobNotReady { name: String, state: String },

    /// A succeeded job carried neither a result file nor inline responses
    #[error("Batch job {0} has no result destination")]
    MissingDestination(String),

    /// The remote service answered with a non-success status
    #[error("Remote service returned status {status}: {body}")]
    Remote { status: u16, body: String },

    /// A poll loop was stopped through its cancellation token
    #[error("Polling was cancelled")]
    Shutdown,

    /// Local file I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TranslateBatchError {
    /// Short label for the error kind, used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            TranslateBatchError::ConfigInvalid(_) => "config_invalid",
            TranslateBatchError::SubmissionFailed(_) => "submission_failed",
            TranslateBatchError::JobFailed { .. } => "job_failed",
            TranslateBatchError::JobCancelled { .. } => "job_cancelled",
            TranslateBatchError::JobNotReady { .. } => "job_not_ready",
            TranslateBatchError::MissingDestination(_) => "missing_destination",
            TranslateBatchError::Remote { .. } => "remote",
            TranslateBatchError::Shutdown => "shutdown",
            TranslateBatchError::Io(_) => "io",
            TranslateBatchError::HttpClient(_) => "http_client",
            TranslateBatchError::Serialization(_) => "serialization",
            TranslateBatchError::Other(_) => "other",
        }
    }

    /// Whether a failed remote call is worth repeating unchanged.
    ///
    /// Transport failures, timeouts, throttling and server errors are transient. Client errors
    /// such as 404 for a deleted job are not, and neither is a body that fails to decode.
    pub fn is_transient(&self) -> bool {
        match self {
            TranslateBatchError::HttpClient(e) => !e.is_decode() && !e.is_builder(),
            TranslateBatchError::Io(_)
            | TranslateBatchError::Other(_) => true,
            TranslateBatchError::Remote { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}

/// Why a single line of a job's result stream could not be decoded.
///
/// These never abort a reassembly; the offending line becomes a placeholder segment.
#[derive(Error, Debug)]
pub enum ResultParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("record has no 'key' field")]
    MissingKey,

    #[error("key '{0}' does not end in a positive chunk index")]
    InvalidKey(String),

    #[error("record has an unexpected shape: {0}")]
    InvalidShape(String),
}
