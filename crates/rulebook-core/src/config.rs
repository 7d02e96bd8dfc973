//! Layered configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_EMBEDDING__MODEL`). Every setting
//! has a default so an empty environment still yields a usable `Settings`.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::CorpusId;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    /// Extract and validate `Settings`, layering loaded values over defaults.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(self.figment.clone())
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Deterministic token-hashing vectors; offline, for tests and dry runs.
    Hashing,
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Openai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub dimension: usize,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Timeout of a single provider call, distinct from the request timeout.
    pub timeout_ms: u64,
    /// Number of chunk texts per provider call while indexing.
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Openai,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            base_url: "https://api.openai.com".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 10_000,
            batch_size: 256,
        }
    }
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Character budgets of the paragraph chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub min_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 2048, min_chars: 512, overlap_chars: 256 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaggingConfig {
    /// Known domain-entity names, matched as whole tokens case-insensitively.
    pub entities: Vec<String>,
    /// Tokens ending in one of these suffixes are tagged as entities too.
    pub entity_suffixes: Vec<String>,
    /// Conditional connective phrases counted as condition markers.
    pub condition_phrases: Vec<String>,
}

impl Default for TaggingConfig {
    fn default() -> Self {
        let entities = [
            "ezetimib", "statin", "atorvastatin", "rosuvastatin", "simvastatin", "niasin",
            "metoprolol", "bisoprolol", "carvedilol", "clopidogrel", "aspirin", "warfarin",
            "interferon", "glatiramer", "teriflunomid", "dimetil fumarat", "fingolimod",
            "natalizumab", "alemtuzumab", "okrelizumab", "kladribin", "fampiridin",
            "iloprost", "bosentan", "masitentan", "sildenafil", "riociguat", "seleksipag",
            "tadalafil", "epoprostenol", "treprostinil", "ambrisentan",
            "bevacizumab", "ranibizumab", "aflibersept", "deksametazon", "verteporfin",
            "dienogest", "progesteron", "östrojen", "östradiol", "tibolon",
            "evolokumab", "alirokumab", "gabapentin", "pregabalin",
        ];
        let condition_phrases = [
            "gerekli", "şart", "koşul", "ancak", "yalnızca", "sadece", "mutlaka",
            "en az", "en fazla", "üstünde", "altında",
        ];
        Self {
            entities: entities.iter().map(|s| s.to_string()).collect(),
            entity_suffixes: vec!["mab".to_string(), "stat".to_string(), "pril".to_string()],
            condition_phrases: condition_phrases.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Hybrid reranking weights. Only the ordering `exact > partial > semantic`
/// is a requirement; the values are tuning parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub exact_boost: f32,
    pub partial_boost: f32,
    pub semantic_boost: f32,
    /// Per-corpus candidate depth is `top_k * candidate_multiplier`.
    pub candidate_multiplier: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self { exact_boost: 5.0, partial_boost: 2.0, semantic_boost: 1.0, candidate_multiplier: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub marker: String,
    pub separator: String,
    /// Variant code (uppercase) to auxiliary corpus id.
    pub variants: BTreeMap<String, String>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        let variants = ["D", "E", "F", "G"]
            .iter()
            .map(|v| (v.to_string(), format!("EK-4/{v}")))
            .collect();
        Self { marker: "EK-4".to_string(), separator: "/".to_string(), variants }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub entity_label: String,
    pub context_label: String,
    /// Appended to every query to steer towards eligibility clauses.
    pub suffix: String,
    pub max_context_chars: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            entity_label: "İlaç".to_string(),
            context_label: "Tanı".to_string(),
            suffix: "kullanım şartları uygunluk kriterleri rapor gerekli".to_string(),
            max_context_chars: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub request_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { request_timeout_ms: 30_000 }
    }
}

impl RetrievalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub cache_dir: String,
    pub snapshot_dir: String,
    pub front_cache_capacity: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_dir: "data/embedding_cache".to_string(),
            snapshot_dir: "data/snapshots".to_string(),
            front_cache_capacity: 10_000,
        }
    }
}

/// Everything the engine consumes. All values are static per index build:
/// changing chunking, tagging or embedding settings requires a full re-index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub primary_corpus: String,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingConfig,
    pub tagging: TaggingConfig,
    pub rerank: RerankConfig,
    pub references: ReferenceConfig,
    pub query: QueryConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            primary_corpus: "SUT".to_string(),
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingConfig::default(),
            tagging: TaggingConfig::default(),
            rerank: RerankConfig::default(),
            references: ReferenceConfig::default(),
            query: QueryConfig::default(),
            retrieval: RetrievalConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Settings {
    pub fn primary_corpus_id(&self) -> CorpusId {
        CorpusId::new(self.primary_corpus.clone())
    }

    /// Expand the storage paths and anchor relative ones at `base`, normally
    /// the directory the configuration files were read from.
    pub fn resolve_paths(&mut self, base: &Path) {
        let storage = &mut self.storage;
        storage.cache_dir = resolve_with_base(base, &storage.cache_dir).to_string_lossy().into_owned();
        storage.snapshot_dir = resolve_with_base(base, &storage.snapshot_dir).to_string_lossy().into_owned();
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidConfig(msg));
        if self.primary_corpus.trim().is_empty() {
            return invalid("primary_corpus must not be empty".to_string());
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be positive".to_string());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be positive".to_string());
        }
        let c = &self.chunking;
        if c.max_chars == 0 || c.min_chars > c.max_chars {
            return invalid(format!("chunking: min_chars ({}) must not exceed max_chars ({})", c.min_chars, c.max_chars));
        }
        if c.overlap_chars >= c.max_chars {
            return invalid(format!("chunking: overlap_chars ({}) must be below max_chars ({})", c.overlap_chars, c.max_chars));
        }
        let r = &self.rerank;
        if !(r.exact_boost > r.partial_boost && r.partial_boost > r.semantic_boost && r.semantic_boost > 0.0) {
            return invalid(format!(
                "rerank: boosts must satisfy exact > partial > semantic > 0 (got {}, {}, {})",
                r.exact_boost, r.partial_boost, r.semantic_boost
            ));
        }
        if r.candidate_multiplier == 0 {
            return invalid("rerank.candidate_multiplier must be positive".to_string());
        }
        if self.references.marker.trim().is_empty() {
            return invalid("references.marker must not be empty".to_string());
        }
        for (variant, corpus) in &self.references.variants {
            if variant.chars().count() != 1 {
                return invalid(format!("references.variants: '{variant}' is not a single-character code"));
            }
            if corpus == &self.primary_corpus {
                return invalid(format!("references.variants: '{variant}' maps onto the primary corpus"));
            }
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
