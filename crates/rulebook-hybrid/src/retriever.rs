//! Retrieval orchestrator.
//!
//! Per request: build query texts, detect references over the full context,
//! embed every query text with one cache call, search the primary corpus plus
//! each referenced auxiliary corpus concurrently, then rerank and merge.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use rulebook_core::chunker::Chunker;
use rulebook_core::config::{expand_path, Settings};
use rulebook_core::error::{Error, Result};
use rulebook_core::traits::{EmbedProvider, VectorSearcher};
use rulebook_core::types::{CorpusId, RetrievedPassage, SearchHit, SearchRequest};
use rulebook_vector::{build_corpus_index, CorpusRegistry, EmbeddingCache, VectorIndex};

use crate::query::{build_query_text, EntityQuery};
use crate::reference::ReferenceDetector;
use crate::rerank::HybridReranker;

/// Per-query plan: its embedding text and the corpora to search.
struct Plan {
    text: String,
    corpora: Vec<CorpusId>,
}

pub struct HybridRetriever {
    settings: Settings,
    primary: CorpusId,
    cache: EmbeddingCache,
    registry: Arc<CorpusRegistry>,
    searcher: Arc<dyn VectorSearcher>,
    detector: ReferenceDetector,
    reranker: HybridReranker,
    chunker: Chunker,
    index_lock: Mutex<()>,
    progress: bool,
}

impl HybridRetriever {
    pub fn new(settings: Settings, provider: Arc<dyn EmbedProvider>, registry: Arc<CorpusRegistry>) -> Result<Self> {
        settings.validate()?;
        if provider.dim() != settings.embedding.dimension {
            return Err(Error::DimensionMismatch { expected: settings.embedding.dimension, got: provider.dim() });
        }
        let cache = EmbeddingCache::new(
            provider,
            &expand_path(&settings.storage.cache_dir),
            settings.storage.front_cache_capacity,
        );
        let detector = ReferenceDetector::new(&settings.references)?;
        let reranker = HybridReranker::new(settings.rerank.clone());
        let chunker = Chunker::new(settings.chunking.clone(), &settings.tagging);
        let searcher: Arc<dyn VectorSearcher> = registry.clone();
        Ok(Self {
            primary: settings.primary_corpus_id(),
            settings,
            cache,
            registry,
            searcher,
            detector,
            reranker,
            chunker,
            index_lock: Mutex::new(()),
            progress: false,
        })
    }

    /// Route searches through `searcher` instead of the registry.
    pub fn with_searcher(mut self, searcher: Arc<dyn VectorSearcher>) -> Self {
        self.searcher = searcher;
        self
    }

    /// Show an embedding progress bar while indexing.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<CorpusRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn detector(&self) -> &ReferenceDetector {
        &self.detector
    }

    /// Chunk, embed and publish a corpus. Returns the number of chunks.
    ///
    /// Unusable text publishes an empty index; embedding failures propagate.
    pub async fn index_corpus(&self, corpus_id: &CorpusId, raw_text: &str, source_document: &str) -> Result<usize> {
        let chunks = self.chunker.index(corpus_id, raw_text, source_document);
        self.index_chunks(corpus_id, chunks).await
    }

    /// Like [`HybridRetriever::index_corpus`] for raw bytes.
    pub async fn index_corpus_bytes(&self, corpus_id: &CorpusId, raw: &[u8], source_document: &str) -> Result<usize> {
        let chunks = self.chunker.index_bytes(corpus_id, raw, source_document);
        self.index_chunks(corpus_id, chunks).await
    }

    async fn index_chunks(&self, corpus_id: &CorpusId, chunks: Vec<rulebook_core::types::Chunk>) -> Result<usize> {
        let _guard = self.index_lock.lock().await;
        let index = build_corpus_index(&self.cache, corpus_id, chunks, self.settings.embedding.batch_size, self.progress).await?;
        let count = index.len();
        self.registry.publish(index);
        Ok(count)
    }

    /// Publish an index built elsewhere, e.g. loaded from a snapshot.
    pub async fn publish(&self, index: VectorIndex) -> Result<()> {
        if index.model_id() != self.cache.model_id() || index.dim() != self.cache.dim() {
            return Err(Error::InvalidConfig(format!(
                "corpus {} was built with '{}' (d{}), retriever uses '{}' (d{})",
                index.corpus_id(),
                index.model_id(),
                index.dim(),
                self.cache.model_id(),
                self.cache.dim()
            )));
        }
        let _guard = self.index_lock.lock().await;
        self.registry.publish(index);
        Ok(())
    }

    pub async fn retrieve(&self, entity_name: &str, context_text: &str, top_k: usize) -> Result<Vec<RetrievedPassage>> {
        let mut results = self.retrieve_queries(&[EntityQuery::new(entity_name, context_text)], top_k).await?;
        Ok(results.pop().unwrap_or_default())
    }

    /// Retrieve for several entities with one embedding call. A repeated
    /// entity name keeps its first context.
    pub async fn retrieve_many(
        &self,
        entities: &[(String, String)],
        top_k: usize,
    ) -> Result<BTreeMap<String, Vec<RetrievedPassage>>> {
        let mut seen = HashSet::new();
        let mut queries = Vec::with_capacity(entities.len());
        for (name, context) in entities {
            if seen.insert(name.as_str()) {
                queries.push(EntityQuery::new(name.clone(), context.clone()));
            } else {
                warn!(entity = %name, "duplicate entity in request; keeping the first occurrence");
            }
        }
        let results = self.retrieve_queries(&queries, top_k).await?;
        Ok(queries.into_iter().map(|q| q.entity_name).zip(results).collect())
    }

    /// Results aligned with `queries`, bounded by the request timeout.
    pub async fn retrieve_queries(&self, queries: &[EntityQuery], top_k: usize) -> Result<Vec<Vec<RetrievedPassage>>> {
        let limit = self.settings.retrieval.request_timeout();
        match tokio::time::timeout(limit, self.run(queries, top_k)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("retrieval exceeded {} ms", limit.as_millis()))),
        }
    }

    async fn run(&self, queries: &[EntityQuery], top_k: usize) -> Result<Vec<Vec<RetrievedPassage>>> {
        if queries.is_empty() || top_k == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }
        let started = Instant::now();
        let plans: Vec<Plan> = queries.iter().map(|q| self.plan(q)).collect();

        let mut texts: Vec<String> = Vec::new();
        for plan in &plans {
            if !texts.contains(&plan.text) {
                texts.push(plan.text.clone());
            }
        }
        let embed_limit = self.settings.embedding.timeout();
        let vectors = match tokio::time::timeout(embed_limit, self.cache.get_or_compute(&texts)).await {
            Ok(v) => v?,
            Err(_) => {
                return Err(Error::EmbeddingUnavailable(format!(
                    "embedding call exceeded {} ms",
                    embed_limit.as_millis()
                )))
            }
        };
        let vectors: Vec<Arc<Vec<f32>>> = vectors.into_iter().map(Arc::new).collect();
        let embedded = Instant::now();

        let mut slots = self.search_all(queries, &plans, &texts, &vectors, top_k).await?;
        let searched = Instant::now();

        let mut results = Vec::with_capacity(queries.len());
        for ((query, plan), outcomes) in queries.iter().zip(&plans).zip(slots.drain(..)) {
            let mut groups: Vec<(CorpusId, Vec<SearchHit>)> = Vec::new();
            let mut first_error = None;
            for (corpus, outcome) in plan.corpora.iter().zip(outcomes) {
                match outcome {
                    Some(Ok(hits)) => groups.push((corpus.clone(), hits)),
                    Some(Err(e)) => {
                        warn!(entity = %query.entity_name, corpus = %corpus, error = %e, "corpus search failed; continuing without it");
                        first_error.get_or_insert(e);
                    }
                    None => warn!(entity = %query.entity_name, corpus = %corpus, "corpus search produced no result"),
                }
            }
            if groups.is_empty() {
                if let Some(e) = first_error {
                    return Err(e);
                }
            }
            results.push(self.reranker.merge(&query.entity_name, &self.primary, groups, top_k));
        }

        info!(
            entities = queries.len(),
            embed_ms = (embedded - started).as_millis() as u64,
            search_ms = (searched - embedded).as_millis() as u64,
            total_ms = started.elapsed().as_millis() as u64,
            "retrieval finished"
        );
        Ok(results)
    }

    fn plan(&self, query: &EntityQuery) -> Plan {
        let text = build_query_text(&self.settings.query, query);
        let mut corpora = vec![self.primary.clone()];
        for reference in self.detector.detect(&query.context_text) {
            if !corpora.contains(&reference.corpus_id) {
                corpora.push(reference.corpus_id);
            }
        }
        debug!(entity = %query.entity_name, corpora = corpora.len(), "planned retrieval");
        Plan { text, corpora }
    }

    /// Runs every (query, corpus) search on the blocking pool; outcomes land
    /// in per-query slots so the merge never depends on completion order.
    async fn search_all(
        &self,
        queries: &[EntityQuery],
        plans: &[Plan],
        texts: &[String],
        vectors: &[Arc<Vec<f32>>],
        top_k: usize,
    ) -> Result<Vec<Vec<Option<Result<Vec<SearchHit>>>>>> {
        let depth = top_k.saturating_mul(self.settings.rerank.candidate_multiplier);
        let mut slots: Vec<Vec<Option<Result<Vec<SearchHit>>>>> =
            plans.iter().map(|p| p.corpora.iter().map(|_| None).collect()).collect();
        let mut tasks = JoinSet::new();
        for (qi, (query, plan)) in queries.iter().zip(plans).enumerate() {
            let Some(vi) = texts.iter().position(|t| t == &plan.text) else { continue };
            let mut request = SearchRequest::top_k(depth).with_pinned_entity(query.entity_name.clone());
            if let Some(filter) = &query.filter {
                request = request.with_filter(filter.clone());
            }
            for (ci, corpus) in plan.corpora.iter().enumerate() {
                let searcher = Arc::clone(&self.searcher);
                let vector = Arc::clone(&vectors[vi]);
                let corpus = corpus.clone();
                let request = request.clone();
                tasks.spawn_blocking(move || (qi, ci, searcher.search(&corpus, &vector, &request)));
            }
        }
        while let Some(joined) = tasks.join_next().await {
            let (qi, ci, outcome) = joined.map_err(|e| Error::Storage(format!("search task failed: {e}")))?;
            slots[qi][ci] = Some(outcome);
        }
        Ok(slots)
    }
}
