//! Two-tier embedding cache keyed by `(blake3(text), model_id)`.
//!
//! The front tier is an in-memory moka cache; the durable tier stores one JSON
//! file per entry under `<cache_dir>/<model digest>/<text digest>.json`. Files
//! are written to a temporary sibling and renamed into place, so a reader never
//! observes a partial entry. Misses of one request are embedded with a single
//! provider call.
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rulebook_core::error::{Error, Result};
use rulebook_core::traits::EmbedProvider;

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    model_id: String,
    dim: usize,
    vector: Vec<f32>,
}

pub struct EmbeddingCache {
    provider: Arc<dyn EmbedProvider>,
    dir: PathBuf,
    front: Cache<String, Vec<f32>>,
}

pub fn digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

impl EmbeddingCache {
    pub fn new(provider: Arc<dyn EmbedProvider>, cache_dir: &Path, front_capacity: u64) -> Self {
        let model_digest = digest(provider.model_id());
        let dir = cache_dir.join(&model_digest[..16]);
        Self { provider, dir, front: Cache::new(front_capacity) }
    }

    pub fn provider(&self) -> &Arc<dyn EmbedProvider> {
        &self.provider
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dim(&self) -> usize {
        self.provider.dim()
    }

    /// Directory holding this model's durable entries.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Vectors for `texts` in input order, embedding only the texts not cached.
    pub async fn get_or_compute(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = texts.iter().map(|t| digest(t)).collect();
        let mut found: HashMap<String, Vec<f32>> = HashMap::new();
        let mut disk_probe: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::with_capacity(keys.len());
        for key in &keys {
            if !seen.insert(key.as_str()) {
                continue;
            }
            match self.front.get(key) {
                Some(v) => {
                    found.insert(key.clone(), v);
                }
                None => disk_probe.push(key.clone()),
            }
        }

        if !disk_probe.is_empty() {
            let dir = self.dir.clone();
            let model_id = self.model_id().to_string();
            let dim = self.dim();
            let loaded = tokio::task::spawn_blocking(move || read_entries(&dir, &model_id, dim, disk_probe))
                .await
                .map_err(|e| Error::Storage(format!("cache read task failed: {e}")))?;
            for (key, vector) in loaded {
                self.front.insert(key.clone(), vector.clone());
                found.insert(key, vector);
            }
        }

        let mut miss_keys: Vec<String> = Vec::new();
        let mut miss_texts: Vec<String> = Vec::new();
        let mut missed: HashSet<&str> = HashSet::new();
        for (key, text) in keys.iter().zip(texts) {
            if !found.contains_key(key) && missed.insert(key.as_str()) {
                miss_keys.push(key.clone());
                miss_texts.push(text.clone());
            }
        }
        debug!(requested = texts.len(), hits = texts.len() - miss_texts.len(), misses = miss_texts.len(), "embedding cache lookup");

        if !miss_texts.is_empty() {
            let vectors = self.compute(&miss_texts).await?;
            let entries: Vec<(String, Vec<f32>)> = miss_keys.into_iter().zip(vectors).collect();
            let dir = self.dir.clone();
            let model_id = self.model_id().to_string();
            let to_write = entries.clone();
            tokio::task::spawn_blocking(move || write_entries(&dir, &model_id, &to_write))
                .await
                .map_err(|e| Error::Storage(format!("cache write task failed: {e}")))??;
            for (key, vector) in entries {
                self.front.insert(key.clone(), vector.clone());
                found.insert(key, vector);
            }
        }

        keys.iter()
            .map(|k| found.get(k).cloned().ok_or_else(|| Error::Storage(format!("cache entry {k} vanished"))))
            .collect()
    }

    /// One batched provider call; the sequential path runs only when the
    /// provider reports that batching is unavailable.
    async fn compute(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = match self.provider.embed_batch(texts).await {
            Ok(v) => v,
            Err(Error::BatchUnavailable(reason)) => {
                warn!(count = texts.len(), %reason, "batch embedding unavailable; embedding sequentially");
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    out.push(self.provider.embed(text).await?);
                }
                out
            }
            Err(e) => return Err(e),
        };
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "provider returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let dim = self.dim();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, got: bad.len() });
        }
        Ok(vectors)
    }
}

fn entry_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_entries(dir: &Path, model_id: &str, dim: usize, keys: Vec<String>) -> Vec<(String, Vec<f32>)> {
    keys.into_iter()
        .filter_map(|key| match read_entry(&entry_path(dir, &key), model_id, dim) {
            Ok(hit) => hit.map(|v| (key, v)),
            Err(e) => {
                warn!(key = %key, error = %e, "ignoring unreadable cache entry");
                None
            }
        })
        .collect()
}

fn read_entry(path: &Path, model_id: &str, dim: usize) -> Result<Option<Vec<f32>>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    let entry: StoredEntry = serde_json::from_slice(&bytes)
        .map_err(|e| Error::CacheCorruption(format!("{}: {e}", path.display())))?;
    if entry.model_id != model_id || entry.dim != dim || entry.vector.len() != dim {
        debug!(path = %path.display(), "cache entry from another model or dimension");
        return Ok(None);
    }
    Ok(Some(entry.vector))
}

fn write_entries(dir: &Path, model_id: &str, entries: &[(String, Vec<f32>)]) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::Storage(format!("create {}: {e}", dir.display())))?;
    for (key, vector) in entries {
        let entry = StoredEntry { model_id: model_id.to_string(), dim: vector.len(), vector: vector.clone() };
        let json = serde_json::to_vec(&entry).map_err(|e| Error::Storage(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| Error::Storage(e.to_string()))?;
        std::io::Write::write_all(&mut tmp, &json).map_err(|e| Error::Storage(e.to_string()))?;
        tmp.as_file().sync_all().map_err(|e| Error::Storage(e.to_string()))?;
        tmp.persist(entry_path(dir, key)).map_err(|e| Error::Storage(e.error.to_string()))?;
    }
    Ok(())
}
