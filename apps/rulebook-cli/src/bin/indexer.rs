use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use rulebook_cli::{build_retriever, init_tracing, known_corpora, load_settings, manifest, open_snapshots};
use rulebook_core::types::CorpusId;
use rulebook_vector::snapshot::save_corpus;

/// Chunk, embed and snapshot regulation corpora.
#[derive(Parser, Debug)]
#[command(name = "rulebook-indexer", version)]
struct Args {
    /// Corpus id of `--file`, e.g. `SUT` or `EK-4/D`.
    #[arg(long, requires = "file")]
    corpus: Option<String>,
    /// Plain-text document to index.
    #[arg(long, requires = "corpus")]
    file: Option<PathBuf>,
    /// Source label stored on every chunk (defaults to the file name).
    #[arg(long)]
    source: Option<String>,
    /// Index every `*.txt` file in this directory; the file stem names the corpus.
    #[arg(long, conflicts_with_all = ["corpus", "file", "source"])]
    dir: Option<PathBuf>,
    /// Show embedding progress.
    #[arg(long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings()?;

    let jobs: Vec<(CorpusId, PathBuf)> = match (&args.dir, &args.corpus, &args.file) {
        (Some(dir), _, _) => manifest(dir, &known_corpora(&settings))?,
        (None, Some(corpus), Some(file)) => vec![(CorpusId::new(corpus.clone()), file.clone())],
        _ => bail!("pass --corpus with --file, or --dir"),
    };
    if jobs.is_empty() {
        bail!("nothing to index");
    }

    let conn = open_snapshots(&settings).await?;
    let retriever = build_retriever(settings)?.with_progress(args.progress);
    println!("Rulebook Indexer\n================");
    println!("Model: {}", retriever.cache().model_id());

    for (corpus, path) in &jobs {
        let raw = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let source = match &args.source {
            Some(s) => s.clone(),
            None => path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        };
        let chunks = retriever.index_corpus_bytes(corpus, &raw, &source).await?;
        let index = retriever.registry().get(corpus)?;
        let table = save_corpus(&conn, &index).await?;
        info!(corpus = %corpus, chunks, table = %table, "corpus indexed");
        let stats = retriever.registry().stats(corpus)?;
        println!(
            "📊 {corpus}: {chunks} chunks ({} conditional) from {} -> {table}",
            stats.conditional_chunks,
            path.display()
        );
    }
    println!("\n✅ Indexing completed successfully!");
    println!("💡 To query, use: cargo run --bin rulebook-query -- --entity <NAME> --context '<text>'");
    Ok(())
}
