//! Core domain types for the translation pipeline.
//!
//! This module contains pure types with no I/O:
//! - Chunks of a source document
//! - Per-chunk request records
//! - Batch jobs and their lifecycle state
//! - Per-chunk responses read back from a finished job

pub mod chunk;
pub mod job;
pub mod request;
pub mod response;

pub use chunk::{Chunk, Chunks, chunk_text};
pub use job::{BatchJob, InlineResponse, JobDestination, JobState};
pub use request::{
    GenerationConfig, Part, RequestBuilder, RequestRecord, Role, Turn, make_key, parse_index,
};
pub use response::{BlockedReason, ChunkOutcome, ParsedLine, ResponseEntry, parse_line};
