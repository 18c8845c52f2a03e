//! Exact in-memory vector index.
//!
//! [`FlatIndex`] keeps every vector and its metadata behind a single
//! `RwLock`, so vectors and metadata always have equal length and a search
//! never observes a half-applied add. Searches take the read lock and may
//! run concurrently; adds take the write lock.
//!
//! Scoring is brute-force cosine similarity over all rows. Results are
//! sorted by descending score; equal scores keep insertion order.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::lexical::keyword_rank;
use crate::models::{IndexEntry, IndexedChunk, RetrievalResult};

/// Nearest-neighbour lookup over embedded chunks.
pub trait VectorIndex: Send + Sync {
    /// Append a batch. Every vector is validated before anything is stored;
    /// on error the index is unchanged. Returns the assigned row ids.
    fn add(&self, entries: Vec<IndexEntry>) -> Result<Vec<u64>>;

    /// Up to `k` closest rows to `query`, best first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension established by the first add, if any.
    fn dimension(&self) -> Option<usize>;

    fn clear(&self);
}

/// Serializable copy of an index's contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub dimension: Option<usize>,
    pub vectors: Vec<Vec<f32>>,
    pub chunks: Vec<IndexedChunk>,
}

#[derive(Default)]
struct State {
    dimension: Option<usize>,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<IndexedChunk>,
}

/// Flat exact index. Row ids are assigned in insertion order starting at 0.
#[derive(Default)]
pub struct FlatIndex {
    state: RwLock<State>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index from a snapshot.
    ///
    /// # Errors
    ///
    /// [`RagError::Persistence`] when vector and chunk counts differ, and
    /// [`RagError::DimensionMismatch`] when a vector disagrees with the
    /// snapshot dimension.
    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self> {
        if snapshot.vectors.len() != snapshot.chunks.len() {
            return Err(RagError::Persistence(format!(
                "snapshot holds {} vectors but {} chunk records",
                snapshot.vectors.len(),
                snapshot.chunks.len()
            )));
        }

        let dimension = match (snapshot.dimension, snapshot.vectors.first()) {
            (Some(d), _) => Some(d),
            (None, Some(v)) => Some(v.len()),
            (None, None) => None,
        };
        if let Some(expected) = dimension {
            if let Some(bad) = snapshot.vectors.iter().find(|v| v.len() != expected) {
                return Err(RagError::DimensionMismatch {
                    expected,
                    actual: bad.len(),
                });
            }
        }

        let mut chunks = snapshot.chunks;
        for (row, chunk) in chunks.iter_mut().enumerate() {
            chunk.row = row as u64;
        }

        Ok(Self {
            state: RwLock::new(State {
                dimension,
                vectors: snapshot.vectors,
                chunks,
            }),
        })
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let state = self.read();
        IndexSnapshot {
            dimension: state.dimension,
            vectors: state.vectors.clone(),
            chunks: state.chunks.clone(),
        }
    }

    /// Drop every row at position `len` or later.
    ///
    /// Used to roll back an add whose persistence failed. Truncating to zero
    /// also forgets the dimension so a later add may establish a new one.
    pub fn truncate(&self, len: usize) {
        let mut state = self.write();
        state.vectors.truncate(len);
        state.chunks.truncate(len);
        if state.vectors.is_empty() {
            state.dimension = None;
        }
    }

    /// Rank stored chunks by keyword overlap with `query`, ignoring vectors.
    pub fn keyword_search(&self, query: &str, k: usize) -> Vec<RetrievalResult> {
        keyword_rank(&self.read().chunks, query, k)
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VectorIndex for FlatIndex {
    fn add(&self, entries: Vec<IndexEntry>) -> Result<Vec<u64>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.write();

        let expected = state.dimension.unwrap_or(entries[0].vector.len());
        if expected == 0 {
            return Err(RagError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != expected) {
            return Err(RagError::DimensionMismatch {
                expected,
                actual: bad.vector.len(),
            });
        }

        state.dimension = Some(expected);
        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            let row = state.chunks.len() as u64;
            state.vectors.push(entry.vector);
            state.chunks.push(IndexedChunk {
                row,
                chunk_id: entry.chunk_id,
                metadata: entry.metadata,
            });
            rows.push(row);
        }

        tracing::debug!(added = rows.len(), total = state.chunks.len(), "index add");
        Ok(rows)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let state = self.read();

        let Some(dimension) = state.dimension else {
            return Ok(Vec::new());
        };
        if state.vectors.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dimension {
            return Err(RagError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = state
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievalResult {
                chunk: state.chunks[i].clone(),
                score,
            })
            .collect())
    }

    fn len(&self) -> usize {
        self.read().chunks.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.read().dimension
    }

    fn clear(&self) {
        let mut state = self.write();
        *state = State::default();
    }
}
