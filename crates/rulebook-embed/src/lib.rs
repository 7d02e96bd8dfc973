//! Embedding providers.
//!
//! `OpenAiEmbedder` calls an OpenAI-compatible `/v1/embeddings` endpoint;
//! `HashingEmbedder` produces deterministic token-hash vectors offline.
//! `APP_USE_FAKE_EMBEDDINGS=1` forces the hashing provider regardless of
//! configuration.
use std::hash::Hasher;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use twox_hash::XxHash64;

use rulebook_core::config::{ProviderKind, Settings};
use rulebook_core::error::{Error, Result};
use rulebook_core::tagging::tokenize_lower;
use rulebook_core::traits::EmbedProvider;

pub mod openai;

pub use openai::OpenAiEmbedder;

/// Bag-of-tokens vectors: each lowercase token is hashed into a signed bucket,
/// then the vector is L2-normalized. Texts sharing tokens score as similar.
pub struct HashingEmbedder {
    dim: usize,
    id: String,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1), id: format!("hashing:xxh64:d{}", dim.max(1)) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokenize_lower(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign * (1.0 + ((h >> 32) as u32 as f32 / u32::MAX as f32) * 0.1);
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbedProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Scale `v` to unit length; all-zero vectors are left untouched.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Build the provider selected by `settings.embedding`.
pub fn get_default_provider(settings: &Settings) -> Result<Arc<dyn EmbedProvider>> {
    let emb = &settings.embedding;
    if fake_embeddings_forced() || emb.provider == ProviderKind::Hashing {
        info!(dim = emb.dimension, "using hashing embedder");
        return Ok(Arc::new(HashingEmbedder::new(emb.dimension)));
    }
    let api_key = std::env::var(&emb.api_key_env)
        .map_err(|_| Error::InvalidConfig(format!("environment variable {} is not set", emb.api_key_env)))?;
    let provider = OpenAiEmbedder::new(api_key, emb)?;
    info!(model = %provider.model_id(), "using OpenAI-compatible embedder");
    Ok(Arc::new(provider))
}
