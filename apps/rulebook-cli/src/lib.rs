//! Shared wiring for the command-line binaries.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use lancedb::Connection;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use rulebook_core::config::{expand_path, Config, Settings};
use rulebook_core::types::CorpusId;
use rulebook_embed::get_default_provider;
use rulebook_hybrid::HybridRetriever;
use rulebook_vector::snapshot::{list_corpora, load_corpus};
use rulebook_vector::table::open_db;
use rulebook_vector::CorpusRegistry;

/// Logs go to stderr so `--json` output stays parseable. `RUST_LOG` overrides.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

/// Settings from `config.toml` and `APP_*`; relative storage paths resolve
/// against the working directory the config files are read from.
pub fn load_settings() -> Result<Settings> {
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let mut settings = config.settings()?;
    settings.resolve_paths(&std::env::current_dir().context("working directory")?);
    Ok(settings)
}

/// Retriever over an empty registry, using the configured embedding provider.
pub fn build_retriever(settings: Settings) -> Result<HybridRetriever> {
    let provider = get_default_provider(&settings)?;
    let registry = Arc::new(CorpusRegistry::new());
    Ok(HybridRetriever::new(settings, provider, registry)?)
}

pub async fn open_snapshots(settings: &Settings) -> Result<Connection> {
    let dir = expand_path(&settings.storage.snapshot_dir);
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    open_db(&dir.to_string_lossy()).await
}

/// Publish every saved corpus into the retriever. Returns the loaded ids.
pub async fn load_snapshots(conn: &Connection, retriever: &HybridRetriever) -> Result<Vec<CorpusId>> {
    let model_id = retriever.cache().model_id().to_string();
    let dim = retriever.cache().dim();
    let mut loaded = Vec::new();
    for corpus in list_corpora(conn).await? {
        if let Some(index) = load_corpus(conn, &corpus, &model_id, dim).await? {
            retriever.publish(index).await?;
            loaded.push(corpus);
        }
    }
    Ok(loaded)
}

/// Corpus ids the settings know about: the primary corpus and every
/// reference target.
pub fn known_corpora(settings: &Settings) -> Vec<CorpusId> {
    let mut ids = vec![settings.primary_corpus_id()];
    ids.extend(settings.references.variants.values().map(|v| CorpusId::new(v.clone())));
    ids.sort();
    ids.dedup();
    ids
}

/// `*.txt` files directly under `dir`, each mapped to a corpus by its file
/// stem. A stem whose slug equals the slug of a known corpus maps to that
/// corpus, so `EK-4_D.txt` feeds `EK-4/D`. Sorted by corpus id.
pub fn manifest(dir: &Path, known: &[CorpusId]) -> Result<Vec<(CorpusId, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            let stem_id = CorpusId::new(stem);
            let corpus = known.iter().find(|k| k.slug() == stem_id.slug()).cloned().unwrap_or(stem_id);
            entries.push((corpus, path.to_path_buf()));
        }
    }
    entries.sort();
    Ok(entries)
}

/// `@path` reads the context from a file; anything else is the literal text.
pub fn read_context(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("read context file {path}")),
        None => Ok(arg.to_string()),
    }
}
