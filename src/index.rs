//! Per-session in-memory vector index.
//!
//! Brute-force cosine similarity over the session's chunk vectors. Built
//! once during ingestion, read-only afterwards; concurrent queries borrow
//! `&self` and run fully in parallel.

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{Chunk, ScoredChunk};

#[derive(Debug)]
struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// Vector index over the chunks of one uploaded file.
#[derive(Debug)]
pub struct VectorIndex {
    dims: usize,
    entries: Vec<Entry>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            entries: Vec::new(),
        }
    }

    /// Add a chunk and its embedding. The vector length must match the
    /// index dimensionality fixed at construction.
    pub fn add(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dims {
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding dimension {} does not match index dimension {}",
                vector.len(),
                self.dims
            )));
        }
        self.entries.push(Entry { chunk, vector });
        Ok(())
    }

    /// Top-k nearest chunks by descending cosine similarity. Equal scores
    /// keep insertion order (the sort is stable). `k` is clamped to the
    /// index size.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(vector, &entry.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        scored
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
