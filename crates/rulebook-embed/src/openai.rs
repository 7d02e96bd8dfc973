//! OpenAI-compatible embeddings over HTTP (`POST {base_url}/v1/embeddings`).
use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use tracing::debug;

use rulebook_core::config::EmbeddingSettings;
use rulebook_core::error::{Error, Result};
use rulebook_core::traits::EmbedProvider;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
    dim: usize,
    id: String,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Input<'a> {
    One(&'a str),
    Many(&'a [String]),
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Input<'a>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, settings: &EmbeddingSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| Error::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key: Secret::new(api_key),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            dim: settings.dimension,
            id: format!("openai:{}:d{}", settings.model, settings.dimension),
        })
    }

    async fn request(&self, input: Input<'_>, expected: usize) -> Result<Vec<Vec<f32>>> {
        let batched = matches!(input, Input::Many(_));
        let body = EmbeddingRequest { model: &self.model, input };
        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::PAYLOAD_TOO_LARGE && batched {
            return Err(Error::BatchUnavailable(format!("provider rejected batch of {expected} inputs")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!("HTTP {status}: {}", text.trim())));
        }

        let mut parsed = resp
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {expected} embeddings, got {}",
                parsed.data.len()
            )));
        }
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, got: bad.len() });
        }
        debug!(count = vectors.len(), model = %self.model, "embedded texts");
        Ok(vectors)
    }
}

#[async_trait]
impl EmbedProvider for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(Input::Many(texts), texts.len()).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(Input::One(text), 1)
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
    }
}
