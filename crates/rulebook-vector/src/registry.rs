//! Published per-corpus indexes.
//!
//! A rebuild publishes a complete new [`VectorIndex`] by swapping one `Arc`
//! under the write lock. Searches clone the `Arc` and run without holding the
//! lock, so a reader sees either the old or the new generation in full.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use rulebook_core::error::{Error, Result};
use rulebook_core::traits::VectorSearcher;
use rulebook_core::types::{CorpusId, SearchHit, SearchRequest};

use crate::index::VectorIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusStats {
    pub corpus_id: CorpusId,
    pub chunks: usize,
    pub dim: usize,
    pub model_id: String,
    pub conditional_chunks: usize,
}

#[derive(Default)]
pub struct CorpusRegistry {
    indexes: RwLock<HashMap<CorpusId, Arc<VectorIndex>>>,
}

impl CorpusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the corpus's index, returning the previous generation.
    pub fn publish(&self, index: VectorIndex) -> Option<Arc<VectorIndex>> {
        let corpus = index.corpus_id().clone();
        let chunks = index.len();
        let previous = self.indexes.write().insert(corpus.clone(), Arc::new(index));
        info!(corpus = %corpus, chunks, replaced = previous.is_some(), "published corpus index");
        previous
    }

    pub fn get(&self, corpus: &CorpusId) -> Result<Arc<VectorIndex>> {
        self.indexes
            .read()
            .get(corpus)
            .cloned()
            .ok_or_else(|| Error::UnknownCorpus(corpus.clone()))
    }

    pub fn contains(&self, corpus: &CorpusId) -> bool {
        self.indexes.read().contains_key(corpus)
    }

    /// Published corpus ids in sorted order.
    pub fn corpora(&self) -> Vec<CorpusId> {
        let mut ids: Vec<CorpusId> = self.indexes.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self, corpus: &CorpusId) -> Result<CorpusStats> {
        let index = self.get(corpus)?;
        Ok(CorpusStats {
            corpus_id: corpus.clone(),
            chunks: index.len(),
            dim: index.dim(),
            model_id: index.model_id().to_string(),
            conditional_chunks: index.chunks().iter().filter(|c| c.has_conditions).count(),
        })
    }

    pub fn remove(&self, corpus: &CorpusId) -> Option<Arc<VectorIndex>> {
        self.indexes.write().remove(corpus)
    }
}

impl VectorSearcher for CorpusRegistry {
    fn search(&self, corpus: &CorpusId, query: &[f32], request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.get(corpus)?.search(query, request)
    }
}
