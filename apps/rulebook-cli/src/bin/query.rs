use anyhow::{bail, Result};
use clap::Parser;

use rulebook_cli::{build_retriever, init_tracing, load_settings, load_snapshots, open_snapshots, read_context};

/// Retrieve the regulation passages that govern a drug in a clinical context.
#[derive(Parser, Debug)]
#[command(name = "rulebook-query", version)]
struct Args {
    /// Entity (drug) name, e.g. `EZETIMIB`.
    #[arg(long)]
    entity: String,
    /// Context text, or `@path` to read it from a file.
    #[arg(long, default_value = "")]
    context: String,
    #[arg(long, default_value_t = 5)]
    top_k: usize,
    /// Print passages as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let settings = load_settings()?;
    let context = read_context(&args.context)?;

    let conn = open_snapshots(&settings).await?;
    let retriever = build_retriever(settings)?;
    let loaded = load_snapshots(&conn, &retriever).await?;
    if loaded.is_empty() {
        bail!("no indexed corpora found; run rulebook-indexer first");
    }

    let passages = retriever.retrieve(&args.entity, &context, args.top_k).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&passages)?);
        return Ok(());
    }

    println!("🔍 {} ({} passages)", args.entity, passages.len());
    for (i, p) in passages.iter().enumerate() {
        println!(
            "\n  {}. score={:.4}  similarity={:.4}  corpus={}  section={}  match={}",
            i + 1,
            p.score,
            p.similarity,
            p.corpus_id(),
            p.chunk.section.as_deref().unwrap_or("-"),
            p.match_kind
        );
        println!("     📝 {}", p.chunk.content);
    }
    Ok(())
}
