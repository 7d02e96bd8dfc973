use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use rulebook_core::error::Result;
use rulebook_core::traits::EmbedProvider;
use rulebook_core::types::{Chunk, CorpusId};
use rulebook_embed::HashingEmbedder;
use rulebook_vector::{build_corpus_index, embed_chunks, EmbeddingCache};

struct Counting {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbedProvider for Counting {
    fn model_id(&self) -> &str {
        "counting:d8"
    }

    fn dim(&self) -> usize {
        8
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

fn chunks(n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|i| Chunk {
            id: format!("sut:{i:04}"),
            corpus_id: CorpusId::new("SUT"),
            source_document: "sut.txt".to_string(),
            section: None,
            content: format!("madde {i} metni"),
            keywords: BTreeSet::new(),
            entity_tags: BTreeSet::new(),
            has_conditions: false,
            chunk_index: i,
            total_chunks: n,
        })
        .collect()
}

#[tokio::test]
async fn one_provider_call_per_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let provider = Arc::new(Counting { inner: HashingEmbedder::new(8), calls: AtomicUsize::new(0) });
    let cache = EmbeddingCache::new(provider.clone(), tmp.path(), 100);

    let vectors = embed_chunks(&cache, &chunks(10), 4, false).await.unwrap();
    assert_eq!(vectors.len(), 10);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    let index = build_corpus_index(&cache, &CorpusId::new("SUT"), chunks(10), 4, false).await.unwrap();
    assert_eq!(index.len(), 10);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3, "second pass served from cache");
}

#[tokio::test]
async fn empty_corpus_builds_empty_index() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = EmbeddingCache::new(Arc::new(HashingEmbedder::new(8)), tmp.path(), 10);
    let index = build_corpus_index(&cache, &CorpusId::new("EK-4/F"), Vec::new(), 4, false).await.unwrap();
    assert!(index.is_empty());
    assert_eq!(index.dim(), 8);
}
