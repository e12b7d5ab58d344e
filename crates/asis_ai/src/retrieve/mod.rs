use std::cmp::Ordering;

use asis_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::evidence::{Chunk, EmbeddedChunk};

mod similarity;

pub use similarity::{cosine_similarity, l2_norm};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Similarity-search service owned by exactly one session.
pub trait VectorIndex: Send + Sync {
    /// Vector dimensionality; 0 for an empty index.
    fn dims(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` chunks ordered by non-increasing score, regardless of how low the scores are.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError>;
}

/// Builds a fresh index from embedded chunks. Injected into ingestion so the engine can be swapped.
pub trait IndexBuilder: Send + Sync {
    fn build(&self, entries: Vec<EmbeddedChunk>) -> Result<Box<dyn VectorIndex>, AppError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryIndexBuilder;

impl IndexBuilder for MemoryIndexBuilder {
    fn build(&self, entries: Vec<EmbeddedChunk>) -> Result<Box<dyn VectorIndex>, AppError> {
        Ok(Box::new(MemoryIndex::build(entries)?))
    }
}

#[derive(Debug)]
struct IndexedEntry {
    chunk: Chunk,
    vector: Vec<f32>,
    norm: f32,
}

/// Brute-force cosine index held in memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    dims: usize,
    entries: Vec<IndexedEntry>,
}

impl MemoryIndex {
    pub fn build(entries: Vec<EmbeddedChunk>) -> Result<Self, AppError> {
        let mut dims: Option<usize> = None;
        let mut out = Vec::with_capacity(entries.len());
        for e in entries {
            let this_dims = e.vector.len();
            if this_dims == 0 {
                return Err(AppError::new("INGEST_INDEX_FAILED", "Embedding vector is empty")
                    .with_details(format!("chunk_id={}", e.chunk.chunk_id)));
            }
            if e.vector.iter().any(|v| !v.is_finite()) {
                return Err(AppError::new(
                    "INGEST_INDEX_FAILED",
                    "Embedding vector has non-finite values",
                )
                .with_details(format!("chunk_id={}", e.chunk.chunk_id)));
            }
            match dims {
                Some(d) if d != this_dims => {
                    return Err(AppError::new(
                        "INGEST_INDEX_FAILED",
                        "Embedding dimension mismatch across chunks",
                    )
                    .with_details(format!(
                        "expected={}; got={}; chunk_id={}",
                        d, this_dims, e.chunk.chunk_id
                    )));
                }
                Some(_) => {}
                None => dims = Some(this_dims),
            }
            let norm = l2_norm(&e.vector);
            out.push(IndexedEntry {
                chunk: e.chunk,
                vector: e.vector,
                norm,
            });
        }
        Ok(Self {
            dims: dims.unwrap_or(0),
            entries: out,
        })
    }
}

impl VectorIndex for MemoryIndex {
    fn dims(&self) -> usize {
        self.dims
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dims {
            return Err(AppError::new(
                "AI_RETRIEVAL_FAILED",
                "Query embedding dims do not match index dims",
            )
            .with_details(format!("index_dims={}; query_dims={}", self.dims, vector.len())));
        }

        let qnorm = l2_norm(vector);
        let mut hits: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(vector, &e.vector, qnorm, e.norm)))
            .collect();

        // Deterministic tie-break: document order.
        hits.sort_by(|a, b| {
            let seq = |i: usize| self.entries[i].chunk.sequence_index;
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(seq(a.0).cmp(&seq(b.0)))
        });
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect())
    }
}

pub fn snippet_first_chars(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    match t.char_indices().nth(max_chars) {
        None => t.to_string(),
        Some((idx, _)) => {
            let mut s = t[..idx].to_string();
            s.push_str("...");
            s
        }
    }
}
