//! Batch job types.
//!
//! A batch job is one asynchronous unit of work on the remote service holding every chunk
//! request for one source document. The service owns its state; locally we only observe it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a batch job.
///
/// ```text
/// Pending ──> Running ──> Succeeded
///                    ├──> Failed
///                    └──> Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// The service reported a state this crate does not know about
    Unknown,
}

/// Prefixes the service puts in front of state names.
const STATE_PREFIXES: [&str; 2] = ["JOB_STATE_", "BATCH_STATE_"];

impl JobState {
    /// Map a service-reported state string onto the local enum.
    ///
    /// Known prefixes are stripped first. Unrecognized values become `Unknown` and are logged;
    /// this never fails.
    pub fn normalize(raw: &str) -> JobState {
        let trimmed = raw.trim();
        let bare = STATE_PREFIXES
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed);

        match bare.to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "SUCCEEDED" => JobState::Succeeded,
            // An expired job will never produce results
            "FAILED" | "EXPIRED" => JobState::Failed,
            "CANCELLED" | "CANCELED" => JobState::Cancelled,
            _ => {
                tracing::warn!(state = %raw, "Unknown job state received from service");
                JobState::Unknown
            }
        }
    }

    /// Whether the job will never change state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(JobState::normalize(s))
    }
}

/// One response delivered inline in the job resource instead of a result file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineResponse {
    /// Request key, when the service echoes it back
    pub key: Option<String>,
    /// Raw generate-content response
    pub response: Option<serde_json::Value>,
    /// Raw error status
    pub error: Option<serde_json::Value>,
}

impl InlineResponse {
    /// Render as a result-file line so inline and file results share one parser.
    ///
    /// Responses without a key take `chunk_<position>`, `position` being 1-based.
    pub fn to_result_line(&self, position: usize) -> String {
        let key = self
            .key
            .clone()
            .unwrap_or_else(|| super::request::make_key(position));
        let mut line = serde_json::Map::new();
        line.insert("key".to_string(), serde_json::Value::String(key));
        if let Some(response) = &self.response {
            line.insert("response".to_string(), response.clone());
        }
        if let Some(error) = &self.error {
            line.insert("error".to_string(), error.clone());
        }
        serde_json::Value::Object(line).to_string()
    }
}

/// Where a finished job put its results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum JobDestination {
    /// Name of a remote file holding one JSON record per line
    File(String),
    /// Responses embedded in the job resource
    Inline(Vec<InlineResponse>),
}

/// A batch job as last reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Opaque server-assigned identifier (e.g. "batches/123")
    pub name: String,
    pub display_name: String,
    pub state: JobState,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub destination: Option<JobDestination>,
    /// Service-reported error message, if any
    pub error: Option<String>,
}

impl BatchJob {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Error message to surface for a failed or cancelled job.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "no error details reported".to_string())
    }
}
