//! Reassembly of a finished job's result stream into one ordered document.
//!
//! Result lines may arrive in any order. Each well-formed line is placed at the chunk index
//! encoded in its key; everything else (blocked chunks, failed chunks, undecodable lines, keys
//! that never appeared) becomes a visible placeholder so the output never silently loses or
//! reorders a chunk.
//!
//! Layout of the final document:
//!
//! ```text
//! segment 1 .. segment N          N = expected chunk count, or the highest in-range key
//! out-of-range segments           keys above the accepted range, ascending
//! overflow segments               malformed lines and repeated keys, in arrival order
//! ```
//!
//! With an expected count the accepted range is `1..=expected`. Without one it is bounded by
//! [`MAX_GAP_FACTOR`] times the number of lines received (at least [`MIN_OPEN_RANGE`]), so a
//! corrupt key can never inflate the document with missing-chunk placeholders.
//!
//! This module performs no I/O.

use std::collections::BTreeMap;

use metrics::counter;
use serde::Serialize;

use crate::domain::job::InlineResponse;
use crate::domain::response::{ChunkOutcome, ParsedLine, ResponseEntry, parse_line};

/// Separator placed between segments in the output document.
pub const SEGMENT_SEPARATOR: &str = "\n\n";

/// Placeholder for a chunk whose candidate carried no text.
pub const NO_CONTENT_PLACEHOLDER: &str = "[no content returned]";

/// Without an expected chunk count, keys up to this many times the number of result lines are
/// accepted.
pub const MAX_GAP_FACTOR: usize = 4;

/// Smallest accepted key range when no expected chunk count is known.
pub const MIN_OPEN_RANGE: usize = 64;

/// What a segment of the output holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Translated,
    NoContent,
    SafetyBlocked,
    NoCandidates,
    NoResponse,
    /// A line that could not be decoded
    Malformed,
    /// A second result for a key that was already placed
    Duplicate,
    /// An expected index that never appeared in the stream
    Missing,
    /// A result whose key lies outside the accepted range
    OutOfRange,
}

impl SegmentKind {
    pub fn is_placeholder(&self) -> bool {
        !matches!(self, SegmentKind::Translated)
    }

    pub fn label(&self) -> &'static str {
        match self {
            SegmentKind::Translated => "translated",
            SegmentKind::NoContent => "no_content",
            SegmentKind::SafetyBlocked => "safety_blocked",
            SegmentKind::NoCandidates => "no_candidates",
            SegmentKind::NoResponse => "no_response",
            SegmentKind::Malformed => "malformed",
            SegmentKind::Duplicate => "duplicate",
            SegmentKind::Missing => "missing",
            SegmentKind::OutOfRange => "out_of_range",
        }
    }
}

/// One position of the output document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// 1-based position in the output
    pub index: usize,
    pub kind: SegmentKind,
    pub text: String,
}

/// The ordered output of a reassembly.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reassembly {
    pub segments: Vec<Segment>,
}

impl Reassembly {
    /// The output document: every segment joined by [`SEGMENT_SEPARATOR`].
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments of the given kind.
    pub fn count(&self, kind: SegmentKind) -> usize {
        self.segments.iter().filter(|s| s.kind == kind).count()
    }

    /// Number of segments that are not translated text.
    pub fn placeholder_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| s.kind.is_placeholder())
            .count()
    }

    /// True when every segment is translated text.
    pub fn is_complete(&self) -> bool {
        self.placeholder_count() == 0
    }
}

/// Incremental reassembler; feed it lines, then call [`Reassembler::finish`].
#[derive(Debug, Default)]
pub struct Reassembler {
    placed: BTreeMap<usize, (SegmentKind, String)>,
    overflow: Vec<(SegmentKind, String)>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one line of the result stream. Blank lines are ignored.
    pub fn push_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        match parse_line(line) {
            ParsedLine::Entry(entry) => self.place(entry),
            ParsedLine::Malformed { line, error } => {
                tracing::warn!(
                    error = %error,
                    line_prefix = %line.chars().take(80).collect::<String>(),
                    "Could not parse result line, keeping it as a placeholder"
                );
                counter!("translate_batch_chunk_outcomes_total", "outcome" => "malformed")
                    .increment(1);
                self.overflow.push((
                    SegmentKind::Malformed,
                    format!("[unparseable result line - original line:]\n{line}"),
                ));
            }
        }
    }

    fn place(&mut self, entry: ResponseEntry) {
        let index = entry.index;
        counter!("translate_batch_chunk_outcomes_total", "outcome" => entry.outcome.label())
            .increment(1);

        if self.placed.contains_key(&index) {
            tracing::warn!(index, key = %entry.key, "Duplicate result for chunk, appending after the document");
            self.overflow.push((
                SegmentKind::Duplicate,
                format!(
                    "[duplicate result for chunk {index} - full response:]\n{}",
                    pretty(&entry.raw)
                ),
            ));
            return;
        }

        let (kind, text) = render(&entry);
        self.placed.insert(index, (kind, text));
    }

    /// Produce the ordered document.
    ///
    /// `expected_chunks` extends the range when trailing chunks never appeared in the stream,
    /// and bounds it: keys above it are kept as out-of-range placeholders.
    pub fn finish(self, expected_chunks: Option<usize>) -> Reassembly {
        let Reassembler {
            mut placed,
            overflow,
        } = self;

        let limit = match expected_chunks {
            Some(expected) => expected,
            None => (placed.len() + overflow.len())
                .saturating_mul(MAX_GAP_FACTOR)
                .max(MIN_OPEN_RANGE),
        };
        let out_of_range = match limit.checked_add(1) {
            Some(first_rejected) => placed.split_off(&first_rejected),
            None => BTreeMap::new(),
        };
        let last = match expected_chunks {
            Some(expected) => expected,
            None => placed.keys().next_back().copied().unwrap_or(0),
        };

        let mut segments = Vec::with_capacity(placed.len() + out_of_range.len() + overflow.len());
        for index in 1..=last {
            let (kind, text) = match placed.remove(&index) {
                Some(placed) => placed,
                None => {
                    tracing::warn!(index, "No result for chunk");
                    (SegmentKind::Missing, format!("[chunk {index} missing]"))
                }
            };
            segments.push(Segment { index, kind, text });
        }

        let rejected = out_of_range.into_iter().map(|(index, (_, text))| {
            tracing::warn!(index, limit, "Result key outside the accepted range");
            (
                SegmentKind::OutOfRange,
                format!("[result for out-of-range chunk {index}:]\n{text}"),
            )
        });
        for (kind, text) in rejected.chain(overflow) {
            segments.push(Segment {
                index: segments.len() + 1,
                kind,
                text,
            });
        }

        let reassembly = Reassembly { segments };
        tracing::info!(
            segments = reassembly.len(),
            placeholders = reassembly.placeholder_count(),
            "Reassembled result stream"
        );
        reassembly
    }
}

/// Text to emit for one well-formed entry.
fn render(entry: &ResponseEntry) -> (SegmentKind, String) {
    let index = entry.index;
    match &entry.outcome {
        ChunkOutcome::Translated(text) => (SegmentKind::Translated, text.clone()),
        ChunkOutcome::NoContent => (SegmentKind::NoContent, NO_CONTENT_PLACEHOLDER.to_string()),
        ChunkOutcome::SafetyBlocked => {
            tracing::error!(index, "Chunk blocked: finish reason was SAFETY");
            (
                SegmentKind::SafetyBlocked,
                format!(
                    "[translation blocked (SAFETY) - full response:]\n{}",
                    pretty(&entry.raw)
                ),
            )
        }
        ChunkOutcome::NoCandidates { feedback } => {
            tracing::error!(
                index,
                feedback = %feedback.as_ref().map(|f| f.to_string()).unwrap_or_default(),
                "Chunk blocked: candidate list is empty"
            );
            let mut text = format!(
                "[translation blocked (no candidates) - full response:]\n{}",
                pretty(&entry.raw)
            );
            if let Some(feedback) = feedback {
                text.push_str(&format!("\n[feedback:]\n{}", pretty(feedback)));
            }
            (SegmentKind::NoCandidates, text)
        }
        ChunkOutcome::NoResponse { error_message } => {
            let message = error_message.as_deref().unwrap_or("unknown error");
            tracing::error!(index, error = %message, "Chunk failed: no response");
            (
                SegmentKind::NoResponse,
                format!(
                    "[translation failed (no response): {message} - full response:]\n{}",
                    pretty(&entry.raw)
                ),
            )
        }
    }
}

fn pretty(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Reassemble a result file's contents (one JSON record per line).
pub fn reassemble(content: &str, expected_chunks: Option<usize>) -> Reassembly {
    let mut reassembler = Reassembler::new();
    for line in content.lines() {
        reassembler.push_line(line);
    }
    reassembler.finish(expected_chunks)
}

/// Reassemble responses delivered inline in the job resource.
pub fn reassemble_inline(responses: &[InlineResponse], expected_chunks: Option<usize>) -> Reassembly {
    let mut reassembler = Reassembler::new();
    for (position, response) in responses.iter().enumerate() {
        reassembler.push_line(&response.to_result_line(position + 1));
    }
    reassembler.finish(expected_chunks)
}
