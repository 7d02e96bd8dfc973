use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use rulebook_core::error::{Error, Result};
use rulebook_core::traits::EmbedProvider;
use rulebook_embed::HashingEmbedder;
use rulebook_vector::cache::digest;
use rulebook_vector::EmbeddingCache;

/// Hashing vectors plus call counters; optionally refuses batched input.
struct CountingProvider {
    inner: HashingEmbedder,
    id: String,
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
    texts_embedded: AtomicUsize,
    refuse_batches: bool,
}

impl CountingProvider {
    fn new(id: &str, refuse_batches: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: HashingEmbedder::new(32),
            id: id.to_string(),
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
            texts_embedded: AtomicUsize::new(0),
            refuse_batches,
        })
    }
}

#[async_trait]
impl EmbedProvider for CountingProvider {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        32
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse_batches && texts.len() > 1 {
            return Err(Error::BatchUnavailable("too many inputs".to_string()));
        }
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.embed_text(text))
    }
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn repeated_text_costs_one_provider_call() {
    let tmp = TempDir::new().unwrap();
    let provider = CountingProvider::new("count:d32", false);
    let cache = EmbeddingCache::new(provider.clone(), tmp.path(), 100);

    let first = cache.get_or_compute(&texts(&["ezetimib statin"])).await.unwrap();
    let second = cache.get_or_compute(&texts(&["ezetimib statin"])).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn misses_are_batched_and_order_preserved() {
    let tmp = TempDir::new().unwrap();
    let provider = CountingProvider::new("count:d32", false);
    let cache = EmbeddingCache::new(provider.clone(), tmp.path(), 100);

    cache.get_or_compute(&texts(&["b"])).await.unwrap();
    let input = texts(&["a", "b", "c", "a", "d"]);
    let out = cache.get_or_compute(&input).await.unwrap();
    assert_eq!(out.len(), 5);
    assert_eq!(out[0], out[3]);
    assert_eq!(out[1], HashingEmbedder::new(32).embed_text("b"));
    assert_eq!(out[4], HashingEmbedder::new(32).embed_text("d"));
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 2);
    assert_eq!(provider.texts_embedded.load(Ordering::SeqCst), 4, "b once, then a, c, d");
}

#[tokio::test]
async fn large_batch_with_repeats_embeds_each_text_once() {
    let tmp = TempDir::new().unwrap();
    let provider = CountingProvider::new("count:d32", false);
    let cache = EmbeddingCache::new(provider.clone(), tmp.path(), 1000);

    let input: Vec<String> = (0..300).map(|i| format!("madde {}", i % 60)).collect();
    let out = cache.get_or_compute(&input).await.unwrap();
    assert_eq!(out.len(), 300);
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.texts_embedded.load(Ordering::SeqCst), 60);
    for (text, vector) in input.iter().zip(&out) {
        assert_eq!(vector, &HashingEmbedder::new(32).embed_text(text));
    }
}

#[tokio::test]
async fn entries_survive_a_new_cache_instance() {
    let tmp = TempDir::new().unwrap();
    let provider = CountingProvider::new("count:d32", false);
    let warm = EmbeddingCache::new(provider.clone(), tmp.path(), 100);
    let v = warm.get_or_compute(&texts(&["kalıcı metin"])).await.unwrap();
    assert!(warm.dir().join(format!("{}.json", digest("kalıcı metin"))).exists());

    let fresh_provider = CountingProvider::new("count:d32", false);
    let cold = EmbeddingCache::new(fresh_provider.clone(), tmp.path(), 100);
    assert_eq!(cold.get_or_compute(&texts(&["kalıcı metin"])).await.unwrap(), v);
    assert_eq!(fresh_provider.batch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn corrupt_entry_is_a_miss_and_gets_overwritten() {
    let tmp = TempDir::new().unwrap();
    let provider = CountingProvider::new("count:d32", false);
    let cache = EmbeddingCache::new(provider.clone(), tmp.path(), 100);
    fs::create_dir_all(cache.dir()).unwrap();
    let path = cache.dir().join(format!("{}.json", digest("bozuk")));
    fs::write(&path, b"{\"model_id\": \"count:d32\", \"dim\": 32, \"vector\": [0.1, ").unwrap();

    let out = cache.get_or_compute(&texts(&["bozuk"])).await.unwrap();
    assert_eq!(out[0], HashingEmbedder::new(32).embed_text("bozuk"));
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
    let rewritten: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    assert_eq!(rewritten["dim"], 32);
}

#[tokio::test]
async fn other_model_does_not_share_entries() {
    let tmp = TempDir::new().unwrap();
    let a = CountingProvider::new("model-a:d32", false);
    let b = CountingProvider::new("model-b:d32", false);
    EmbeddingCache::new(a.clone(), tmp.path(), 100).get_or_compute(&texts(&["ortak"])).await.unwrap();
    EmbeddingCache::new(b.clone(), tmp.path(), 100).get_or_compute(&texts(&["ortak"])).await.unwrap();
    assert_eq!(a.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(b.batch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn batch_refusal_falls_back_to_sequential_calls() {
    let tmp = TempDir::new().unwrap();
    let provider = CountingProvider::new("count:d32", true);
    let cache = EmbeddingCache::new(provider.clone(), tmp.path(), 100);
    let out = cache.get_or_compute(&texts(&["x", "y", "z"])).await.unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(out[2], HashingEmbedder::new(32).embed_text("z"));
    assert_eq!(provider.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(provider.single_calls.load(Ordering::SeqCst), 3);
}

struct FailingProvider;

#[async_trait]
impl EmbedProvider for FailingProvider {
    fn model_id(&self) -> &str {
        "failing:d4"
    }

    fn dim(&self) -> usize {
        4
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingUnavailable("quota exceeded".to_string()))
    }
}

#[tokio::test]
async fn provider_failure_propagates_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let cache = EmbeddingCache::new(Arc::new(FailingProvider), tmp.path(), 100);
    let err = cache.get_or_compute(&texts(&["x"])).await.unwrap_err();
    assert!(err.is_embedding_unavailable());
    assert!(!cache.dir().exists());
    assert!(cache.get_or_compute(&[]).await.unwrap().is_empty());
}
