use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::types::{CorpusId, SearchHit, SearchRequest};

/// Contract of an embedding provider: text in, fixed-length vector out.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `openai:text-embedding-3-small`).
    fn model_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Embed all `texts` in one provider call, preserving input order.
    ///
    /// Fails with `Error::BatchUnavailable` when the provider refuses batched
    /// input; any other failure is `Error::EmbeddingUnavailable`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
    }
}

/// Exact similarity search over published corpora.
pub trait VectorSearcher: Send + Sync {
    fn search(&self, corpus: &CorpusId, query: &[f32], request: &SearchRequest) -> Result<Vec<SearchHit>>;
}
