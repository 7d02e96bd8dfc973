//! Indexing-time embedding of a chunk set through the embedding cache.
//!
//! Chunks are embedded in batches of `batch_size`; each batch is one cache
//! call and therefore at most one provider call.
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use rulebook_core::error::Result;
use rulebook_core::types::{Chunk, CorpusId};

use crate::cache::EmbeddingCache;
use crate::index::VectorIndex;

pub async fn embed_chunks(cache: &EmbeddingCache, chunks: &[Chunk], batch_size: usize, progress: bool) -> Result<Vec<Vec<f32>>> {
    let pb = if progress { ProgressBar::new(chunks.len() as u64) } else { ProgressBar::hidden() };
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        vectors.extend(cache.get_or_compute(&texts).await?);
        pb.inc(batch.len() as u64);
    }
    pb.finish_with_message("embedded");
    Ok(vectors)
}

/// Embed `chunks` and build the corpus's next index generation.
pub async fn build_corpus_index(
    cache: &EmbeddingCache,
    corpus_id: &CorpusId,
    chunks: Vec<Chunk>,
    batch_size: usize,
    progress: bool,
) -> Result<VectorIndex> {
    if chunks.is_empty() {
        return Ok(VectorIndex::empty(corpus_id.clone(), cache.model_id(), cache.dim()));
    }
    let vectors = embed_chunks(cache, &chunks, batch_size, progress).await?;
    let index = VectorIndex::build(corpus_id.clone(), cache.model_id(), cache.dim(), chunks, vectors)?;
    info!(corpus = %corpus_id, chunks = index.len(), model = %cache.model_id(), "built corpus index");
    Ok(index)
}
