//! Keyword/semantic hybrid reranking.
//!
//! Every candidate is classified against the query entity (`keyword-exact`
//! when the entity is one of the chunk's tags, `keyword-partial` when it only
//! occurs in the text, `semantic-only` otherwise) and scored as
//! `similarity * boost(kind)`. Each corpus group is truncated to `top_k` before
//! the groups are merged, so a large primary corpus cannot crowd auxiliary
//! corpora out of the result.
use std::cmp::Ordering;

use rulebook_core::config::RerankConfig;
use rulebook_core::types::{Chunk, CorpusId, MatchKind, RetrievedPassage, SearchHit};

pub struct HybridReranker {
    config: RerankConfig,
}

struct Ranked {
    passage: RetrievedPassage,
    similarity_rank: usize,
    primary: bool,
}

impl HybridReranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    pub fn match_kind(entity: &str, chunk: &Chunk) -> MatchKind {
        let needle = entity.trim().to_lowercase();
        if needle.is_empty() {
            MatchKind::SemanticOnly
        } else if chunk.has_entity(&needle) {
            MatchKind::KeywordExact
        } else if chunk.content.to_lowercase().contains(&needle) {
            MatchKind::KeywordPartial
        } else {
            MatchKind::SemanticOnly
        }
    }

    pub fn boost(&self, kind: MatchKind) -> f32 {
        match kind {
            MatchKind::KeywordExact => self.config.exact_boost,
            MatchKind::KeywordPartial => self.config.partial_boost,
            MatchKind::SemanticOnly => self.config.semantic_boost,
        }
    }

    /// Score one corpus's candidates and keep its best `top_k`; ranks are 1-based.
    pub fn rerank_group(&self, entity: &str, hits: Vec<SearchHit>, top_k: usize) -> Vec<RetrievedPassage> {
        self.rank_group(entity, hits, top_k, false).into_iter().map(|r| r.passage).collect()
    }

    fn rank_group(&self, entity: &str, hits: Vec<SearchHit>, top_k: usize, primary: bool) -> Vec<Ranked> {
        let mut ranked: Vec<Ranked> = hits
            .into_iter()
            .map(|hit| {
                let match_kind = Self::match_kind(entity, &hit.chunk);
                Ranked {
                    passage: RetrievedPassage {
                        score: hit.score * self.boost(match_kind),
                        similarity: hit.score,
                        match_kind,
                        rank: 0,
                        chunk: hit.chunk,
                    },
                    similarity_rank: hit.rank,
                    primary,
                }
            })
            .collect();
        ranked.sort_by(|a, b| by_score(a, b).then(a.similarity_rank.cmp(&b.similarity_rank)));
        ranked.truncate(top_k);
        for (i, r) in ranked.iter_mut().enumerate() {
            r.passage.rank = i + 1;
        }
        ranked
    }

    /// Truncate every group to `top_k`, then merge ordered by score, primary
    /// corpus first on ties, then similarity rank.
    pub fn merge(
        &self,
        entity: &str,
        primary: &CorpusId,
        groups: Vec<(CorpusId, Vec<SearchHit>)>,
        top_k: usize,
    ) -> Vec<RetrievedPassage> {
        let mut all: Vec<Ranked> = groups
            .into_iter()
            .flat_map(|(corpus, hits)| self.rank_group(entity, hits, top_k, &corpus == primary))
            .collect();
        all.sort_by(|a, b| {
            by_score(a, b)
                .then(b.primary.cmp(&a.primary))
                .then(a.similarity_rank.cmp(&b.similarity_rank))
        });
        all.into_iter().map(|r| r.passage).collect()
    }
}

fn by_score(a: &Ranked, b: &Ranked) -> Ordering {
    rank_key(b.passage.score).total_cmp(&rank_key(a.passage.score))
}

/// NaN scores sort after every real score.
fn rank_key(score: f32) -> f32 {
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}
