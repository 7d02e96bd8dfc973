//! Exact in-memory vector index over one corpus generation.
//!
//! Vectors are L2-normalized at build time; similarity is cosine mapped to
//! `[0, 1]` as `(1 + cos) / 2`. Metadata filters restrict the candidate set
//! before scoring, so a selective filter never starves `top_k`.
use std::collections::HashSet;
use std::sync::Arc;

use rulebook_core::error::{Error, Result};
use rulebook_core::types::{Chunk, CorpusId, SearchHit, SearchRequest};

#[derive(Debug)]
pub struct VectorIndex {
    corpus_id: CorpusId,
    model_id: String,
    dim: usize,
    chunks: Vec<Arc<Chunk>>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Build an immutable index; `chunks[i]` is embedded as `vectors[i]`.
    pub fn build(
        corpus_id: CorpusId,
        model_id: impl Into<String>,
        dim: usize,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            return Err(Error::Indexing(format!(
                "{corpus_id}: {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        let mut seen = HashSet::with_capacity(chunks.len());
        for chunk in &chunks {
            if chunk.corpus_id != corpus_id {
                return Err(Error::Indexing(format!("chunk {} belongs to {}, not {corpus_id}", chunk.id, chunk.corpus_id)));
            }
            if !seen.insert(chunk.id.as_str()) {
                return Err(Error::Indexing(format!("{corpus_id}: duplicate chunk id {}", chunk.id)));
            }
        }
        let mut normalized = Vec::with_capacity(vectors.len());
        for mut v in vectors {
            if v.len() != dim {
                return Err(Error::DimensionMismatch { expected: dim, got: v.len() });
            }
            l2_normalize(&mut v);
            normalized.push(v);
        }
        Ok(Self {
            corpus_id,
            model_id: model_id.into(),
            dim,
            chunks: chunks.into_iter().map(Arc::new).collect(),
            vectors: normalized,
        })
    }

    pub fn empty(corpus_id: CorpusId, model_id: impl Into<String>, dim: usize) -> Self {
        Self { corpus_id, model_id: model_id.into(), dim, chunks: Vec::new(), vectors: Vec::new() }
    }

    pub fn corpus_id(&self) -> &CorpusId {
        &self.corpus_id
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Arc<Chunk>] {
        &self.chunks
    }

    /// Stored (normalized) vectors, aligned with [`VectorIndex::chunks`].
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Chunk>> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Exact search: filter, score every remaining chunk, keep the `top_k`
    /// best plus any chunk tagged with the pinned entity.
    pub fn search(&self, query: &[f32], request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if query.len() != self.dim {
            return Err(Error::DimensionMismatch { expected: self.dim, got: query.len() });
        }
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let mut q = query.to_vec();
        l2_normalize(&mut q);

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| request.filter.as_ref().map_or(true, |f| f.matches(c)))
            .map(|(i, _)| (i, similarity(&q, &self.vectors[i])))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let pinned = request.pinned_entity.as_deref();
        let selected: Vec<(usize, f32)> = scored
            .into_iter()
            .enumerate()
            .filter(|(pos, (i, _))| *pos < request.top_k || pinned.is_some_and(|e| self.chunks[*i].has_entity(e)))
            .map(|(_, hit)| hit)
            .collect();

        Ok(selected
            .into_iter()
            .enumerate()
            .map(|(rank, (i, score))| SearchHit { chunk: Arc::clone(&self.chunks[i]), score, rank })
            .collect())
    }
}

fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let cos: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    if cos.is_nan() {
        return 0.0;
    }
    ((1.0 + cos) / 2.0).clamp(0.0, 1.0)
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}
