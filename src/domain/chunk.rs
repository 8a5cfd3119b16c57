//! Document chunking.
//!
//! A document is cut into contiguous, 1-indexed chunks of at most `max_chars` characters.
//! Chunk boundaries are character (not byte) positions, so multi-byte text is never split
//! inside a code point.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TranslateBatchError};

/// A contiguous slice of the source document.
///
/// `index` is the join key used to put results back in order, so it must survive the round
/// trip through the remote service untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based position of the chunk in the document
    pub index: usize,
    pub text: String,
}

/// Lazy iterator over the chunks of a document.
///
/// Created by [`chunk_text`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    rest: &'a str,
    max_chars: usize,
    next_index: usize,
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// An empty document yields no chunks. Fails with `ConfigInvalid` if `max_chars` is zero.
pub fn chunk_text(text: &str, max_chars: usize) -> Result<Chunks<'_>> {
    if max_chars == 0 {
        return Err(TranslateBatchError::ConfigInvalid(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    Ok(Chunks {
        rest: text,
        max_chars,
        next_index: 1,
    })
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.rest.is_empty() {
            return None;
        }

        let split_at = self
            .rest
            .char_indices()
            .nth(self.max_chars)
            .map(|(byte_offset, _)| byte_offset)
            .unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(split_at);
        self.rest = tail;

        let chunk = Chunk {
            index: self.next_index,
            text: head.to_string(),
        };
        self.next_index += 1;
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
