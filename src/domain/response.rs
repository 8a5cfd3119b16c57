//! Per-chunk responses from a finished job.
//!
//! Every line of a result stream is classified into exactly one [`ChunkOutcome`] (or marked
//! malformed). The classification is total: no line is ever dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::request::parse_index;
use crate::error::ResultParseError;

/// Why a chunk has no translated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockedReason {
    /// The first candidate finished with `SAFETY`
    Safety,
    /// A response arrived with an empty candidate list
    NoCandidates,
    /// No response object at all (the service reported an error instead)
    NoResponse,
    /// The line could not be decoded
    ParseError,
}

/// What the service returned for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// First text part of the first candidate
    Translated(String),
    /// A candidate exists but carries no text part
    NoContent,
    SafetyBlocked,
    NoCandidates { feedback: Option<Value> },
    NoResponse { error_message: Option<String> },
}

impl ChunkOutcome {
    pub fn blocked_reason(&self) -> Option<BlockedReason> {
        match self {
            ChunkOutcome::Translated(_) | ChunkOutcome::NoContent => None,
            ChunkOutcome::SafetyBlocked => Some(BlockedReason::Safety),
            ChunkOutcome::NoCandidates { .. } => Some(BlockedReason::NoCandidates),
            ChunkOutcome::NoResponse { .. } => Some(BlockedReason::NoResponse),
        }
    }

    /// Low-cardinality label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkOutcome::Translated(_) => "translated",
            ChunkOutcome::NoContent => "no_content",
            ChunkOutcome::SafetyBlocked => "safety_blocked",
            ChunkOutcome::NoCandidates { .. } => "no_candidates",
            ChunkOutcome::NoResponse { .. } => "no_response",
        }
    }
}

/// A well-formed result line.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEntry {
    pub key: String,
    /// Chunk index recovered from `key`
    pub index: usize,
    pub outcome: ChunkOutcome,
    /// The decoded line, kept for diagnostics
    pub raw: Value,
}

impl ResponseEntry {
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            ChunkOutcome::Translated(text) => Some(text),
            _ => None,
        }
    }

    pub fn blocked_reason(&self) -> Option<BlockedReason> {
        self.outcome.blocked_reason()
    }
}

/// Result of decoding one line of a result stream.
#[derive(Debug)]
pub enum ParsedLine {
    Entry(ResponseEntry),
    Malformed {
        /// The offending line, verbatim
        line: String,
        error: ResultParseError,
    },
}

#[derive(Deserialize)]
struct WireLine {
    response: Option<WireResponse>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    candidates: Option<Vec<WireCandidate>>,
    #[serde(alias = "promptFeedback")]
    prompt_feedback: Option<Value>,
}

#[derive(Deserialize)]
struct WireCandidate {
    content: Option<WireContent>,
    #[serde(alias = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireContent {
    parts: Option<Vec<WirePart>>,
}

#[derive(Deserialize)]
struct WirePart {
    text: Option<String>,
}

impl WireCandidate {
    fn first_text(self) -> Option<String> {
        self.content?.parts?.into_iter().next()?.text
    }
}

/// Decode one line of a result stream.
pub fn parse_line(line: &str) -> ParsedLine {
    match decode(line) {
        Ok(entry) => ParsedLine::Entry(entry),
        Err(error) => ParsedLine::Malformed {
            line: line.to_string(),
            error,
        },
    }
}

fn decode(line: &str) -> Result<ResponseEntry, ResultParseError> {
    let raw: Value = serde_json::from_str(line)?;

    let key = match raw.get("key") {
        None | Some(Value::Null) => return Err(ResultParseError::MissingKey),
        Some(Value::String(key)) => key.clone(),
        Some(other) => {
            return Err(ResultParseError::InvalidShape(format!(
                "key is not a string: {other}"
            )));
        }
    };
    let index = parse_index(&key).ok_or_else(|| ResultParseError::InvalidKey(key.clone()))?;

    let wire: WireLine = serde_json::from_value(raw.clone())
        .map_err(|e| ResultParseError::InvalidShape(e.to_string()))?;

    let outcome = match (wire.response, wire.error) {
        (Some(response), _) => {
            let first = response
                .candidates
                .and_then(|candidates| candidates.into_iter().next());
            match first {
                Some(candidate) if candidate.finish_reason.as_deref() == Some("SAFETY") => {
                    ChunkOutcome::SafetyBlocked
                }
                Some(candidate) => candidate
                    .first_text()
                    .map(ChunkOutcome::Translated)
                    .unwrap_or(ChunkOutcome::NoContent),
                None => ChunkOutcome::NoCandidates {
                    feedback: response.prompt_feedback,
                },
            }
        }
        (None, error) => ChunkOutcome::NoResponse {
            error_message: error.as_ref().and_then(error_message),
        },
    };

    Ok(ResponseEntry {
        key,
        index,
        outcome,
        raw,
    })
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
