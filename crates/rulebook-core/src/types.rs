//! Domain types shared by the indexing pipeline, the vector index and the retriever.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub type ChunkId = String;

/// Identifier of a corpus: the primary regulation text or one auxiliary list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorpusId(String);

impl CorpusId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase ASCII form usable in chunk ids, file names and table names.
    pub fn slug(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            if c.is_ascii_alphanumeric() {
                out.push(c.to_ascii_lowercase());
            } else if !out.ends_with('_') {
                out.push('_');
            }
        }
        let trimmed = out.trim_matches('_');
        if trimmed.is_empty() { "corpus".to_string() } else { trimmed.to_string() }
    }
}

impl fmt::Display for CorpusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorpusId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CorpusId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An immutable unit of indexed text.
///
/// - `id`: unique within `corpus_id`, stable across re-indexing of identical text
/// - `section`: normalized clause number (e.g. `4.2.28.C`) the chunk was cut from
/// - `keywords`: lowercase salient terms (diagnosis codes, durations)
/// - `entity_tags`: uppercase domain-entity names found in `content`
/// - `has_conditions`: two or more condition markers were found in `content`
/// - `chunk_index`/`total_chunks`: position within the corpus generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub corpus_id: CorpusId,
    pub source_document: String,
    pub section: Option<String>,
    pub content: String,
    pub keywords: BTreeSet<String>,
    pub entity_tags: BTreeSet<String>,
    pub has_conditions: bool,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

impl Chunk {
    /// Case-insensitive exact match of `name` against `entity_tags`.
    pub fn has_entity(&self, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        !needle.is_empty() && self.entity_tags.iter().any(|t| t.to_lowercase() == needle)
    }
}

/// Predicate over chunk metadata, evaluated before similarity scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataFilter {
    /// `entity_tags` contains the entity (case-insensitive).
    EntityTag(String),
    /// `section` equals the given clause or lies beneath it (`4.2` matches `4.2.28.C`).
    Section(String),
    HasConditions(bool),
    All(Vec<MetadataFilter>),
}

impl MetadataFilter {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            Self::EntityTag(name) => chunk.has_entity(name),
            Self::Section(prefix) => chunk.section.as_deref().is_some_and(|s| {
                s == prefix || s.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('.'))
            }),
            Self::HasConditions(flag) => chunk.has_conditions == *flag,
            Self::All(filters) => filters.iter().all(|f| f.matches(chunk)),
        }
    }
}

/// Parameters of one per-corpus similarity search.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub top_k: usize,
    pub filter: Option<MetadataFilter>,
    /// Chunks tagged with this entity are returned in addition to the `top_k`
    /// most similar ones.
    pub pinned_entity: Option<String>,
}

impl SearchRequest {
    pub fn top_k(top_k: usize) -> Self {
        Self { top_k, ..Self::default() }
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_pinned_entity(mut self, entity: impl Into<String>) -> Self {
        self.pinned_entity = Some(entity.into());
        self
    }
}

/// One scored candidate from a vector search. `score` is higher-is-better and
/// `rank` is the zero-based position in similarity order.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub rank: usize,
}

/// How a passage matched the queried entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    KeywordExact,
    KeywordPartial,
    SemanticOnly,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeywordExact => "keyword-exact",
            Self::KeywordPartial => "keyword-partial",
            Self::SemanticOnly => "semantic-only",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked passage handed back to callers.
///
/// `score` is the hybrid score, `similarity` the raw vector similarity and
/// `rank` the one-based position within the passage's own corpus.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedPassage {
    pub chunk: Arc<Chunk>,
    pub score: f32,
    pub similarity: f32,
    pub match_kind: MatchKind,
    pub rank: usize,
}

impl RetrievedPassage {
    pub fn corpus_id(&self) -> &CorpusId {
        &self.chunk.corpus_id
    }
}
