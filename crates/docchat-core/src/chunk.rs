//! Fixed-size sliding-window text chunker.
//!
//! Splits text into windows of `size` characters where consecutive windows
//! share `overlap` characters. Windows are measured in Unicode scalar values,
//! so a multi-byte character is never split.
//!
//! Each chunk receives a deterministic id derived from its source id,
//! ordinal, and text via SHA-256, so re-chunking the same input always
//! yields identical chunks.
//!
//! # Algorithm
//!
//! 1. Reject `size == 0` and `overlap >= size` as configuration errors.
//! 2. Window `i` starts at character `i * (size - overlap)` and spans
//!    `size` characters, clipped to the end of the text.
//! 3. Stop after the window that reaches the end of the text.
//!
//! The number of chunks for a text of `len > size` characters is
//! `ceil((len - overlap) / (size - overlap))`; a shorter non-empty text
//! yields exactly one chunk and an empty text yields none.
//!
//! # Example
//!
//! ```rust
//! use docchat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("notes.txt", "abcdefghij", 4, 1).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::Chunk;

/// Split `text` into overlapping windows of `size` characters.
///
/// # Errors
///
/// [`RagError::Config`] when `size` is zero or `overlap >= size`.
pub fn chunk_text(source_id: &str, text: &str, size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    validate_window(size, overlap)?;

    // Byte offset of every character boundary, including the end of text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < len {
        let end = (start + size).min(len);
        let piece = &text[bounds[start]..bounds[end]];
        chunks.push(make_chunk(source_id, chunks.len(), piece));
        if end >= len {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

/// Number of chunks [`chunk_text`] produces for a text of `len` characters.
pub fn expected_chunk_count(len: usize, size: usize, overlap: usize) -> usize {
    if len == 0 {
        0
    } else if len <= size {
        1
    } else {
        (len - overlap).div_ceil(size - overlap)
    }
}

pub fn validate_window(size: usize, overlap: usize) -> Result<()> {
    if size == 0 {
        return Err(RagError::config("chunk size must be > 0"));
    }
    if overlap >= size {
        return Err(RagError::config(format!(
            "chunk overlap ({}) must be smaller than chunk size ({})",
            overlap, size
        )));
    }
    Ok(())
}

fn make_chunk(source_id: &str, ordinal: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update([0u8]);
    hasher.update((ordinal as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    Chunk {
        id: digest[..32].to_string(),
        source_id: source_id.to_string(),
        ordinal,
        text: text.to_string(),
    }
}
