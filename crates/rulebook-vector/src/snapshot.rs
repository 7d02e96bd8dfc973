//! LanceDB snapshots of corpus generations.
//!
//! Each save writes a fresh table `corpus_<slug>_<timestamp>` and then flips the
//! `active_corpus:<id>` pointer in the meta table, so a concurrent load sees
//! either the previous generation or the new one.
use anyhow::{anyhow, bail, Context, Result};
use arrow_array::cast::AsArray;
use arrow_array::{
    Array, BooleanArray, FixedSizeListArray, Int32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use chrono::Utc;
use lancedb::query::ExecutableQuery;
use lancedb::Connection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use rulebook_core::error::Error;
use rulebook_core::types::{Chunk, CorpusId};

use crate::index::VectorIndex;
use crate::schema::{build_corpus_schema, META_TABLE};
use crate::table::{get_meta, list_meta, set_meta, table_exists};

const ACTIVE_PREFIX: &str = "active_corpus:";

fn active_key(corpus: &CorpusId) -> String {
    format!("{ACTIVE_PREFIX}{corpus}")
}

/// Persist `index` as a new generation and make it active. Returns the table name.
pub async fn save_corpus(conn: &Connection, index: &VectorIndex) -> Result<String> {
    let dim = i32::try_from(index.dim()).context("dimension does not fit the table schema")?;
    let base = format!("corpus_{}_{}", index.corpus_id().slug(), Utc::now().format("%Y%m%d%H%M%S%3f"));
    let mut table_name = base.clone();
    let mut n = 1;
    while table_exists(conn, &table_name).await? {
        table_name = format!("{base}_{n}");
        n += 1;
    }

    let schema = build_corpus_schema(dim);
    let batch = to_record_batch(index, schema.clone(), dim)?;
    let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
    conn.create_table(&table_name, reader).execute().await?;
    set_meta(conn, META_TABLE, &active_key(index.corpus_id()), &table_name).await?;
    info!(corpus = %index.corpus_id(), table = %table_name, chunks = index.len(), "saved corpus snapshot");
    Ok(table_name)
}

/// Load the active generation of `corpus`, or `None` when it was never saved.
///
/// Fails when the stored vectors come from another model or dimension; such a
/// corpus has to be re-indexed.
pub async fn load_corpus(conn: &Connection, corpus: &CorpusId, model_id: &str, dim: usize) -> Result<Option<VectorIndex>> {
    let Some(table_name) = get_meta(conn, META_TABLE, &active_key(corpus)).await? else {
        return Ok(None);
    };
    let table = conn.open_table(&table_name).execute().await?;
    let mut rows: Vec<(Chunk, Vec<f32>)> = Vec::new();
    let mut stream = table.query().execute().await?;
    while let Some(batch) = futures::TryStreamExt::try_next(&mut stream).await? {
        rows.extend(from_record_batch(&batch, corpus, model_id, dim)?);
    }
    rows.sort_by_key(|(c, _)| c.chunk_index);
    let (chunks, vectors): (Vec<Chunk>, Vec<Vec<f32>>) = rows.into_iter().unzip();
    let index = if chunks.is_empty() {
        VectorIndex::empty(corpus.clone(), model_id, dim)
    } else {
        VectorIndex::build(corpus.clone(), model_id, dim, chunks, vectors)?
    };
    info!(corpus = %corpus, table = %table_name, chunks = index.len(), "loaded corpus snapshot");
    Ok(Some(index))
}

/// Corpora with an active generation, sorted by id.
pub async fn list_corpora(conn: &Connection) -> Result<Vec<CorpusId>> {
    Ok(list_meta(conn, META_TABLE, ACTIVE_PREFIX)
        .await?
        .into_iter()
        .filter_map(|(key, _)| key.strip_prefix(ACTIVE_PREFIX).map(CorpusId::from))
        .collect())
}

fn to_record_batch(index: &VectorIndex, schema: Arc<arrow_schema::Schema>, dim: i32) -> Result<RecordBatch> {
    let chunks = index.chunks();
    let mut ids = Vec::with_capacity(chunks.len());
    let mut corpus_ids = Vec::with_capacity(chunks.len());
    let mut sources = Vec::with_capacity(chunks.len());
    let mut sections: Vec<Option<String>> = Vec::with_capacity(chunks.len());
    let mut contents = Vec::with_capacity(chunks.len());
    let mut keywords = Vec::with_capacity(chunks.len());
    let mut tags = Vec::with_capacity(chunks.len());
    let mut conditions = Vec::with_capacity(chunks.len());
    let mut chunk_indices = Vec::with_capacity(chunks.len());
    let mut totals = Vec::with_capacity(chunks.len());
    let mut model_ids = Vec::with_capacity(chunks.len());
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(chunks.len());
    for (chunk, vector) in chunks.iter().zip(index.vectors()) {
        ids.push(chunk.id.clone());
        corpus_ids.push(chunk.corpus_id.to_string());
        sources.push(chunk.source_document.clone());
        sections.push(chunk.section.clone());
        contents.push(chunk.content.clone());
        keywords.push(serde_json::to_string(&chunk.keywords)?);
        tags.push(serde_json::to_string(&chunk.entity_tags)?);
        conditions.push(chunk.has_conditions);
        chunk_indices.push(i32::try_from(chunk.chunk_index)?);
        totals.push(i32::try_from(chunk.total_chunks)?);
        model_ids.push(index.model_id().to_string());
        vectors.push(Some(vector.iter().map(|&x| Some(x)).collect()));
    }
    Ok(RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(corpus_ids)),
            Arc::new(StringArray::from(sources)),
            Arc::new(StringArray::from(sections)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(keywords)),
            Arc::new(StringArray::from(tags)),
            Arc::new(BooleanArray::from(conditions)),
            Arc::new(Int32Array::from(chunk_indices)),
            Arc::new(Int32Array::from(totals)),
            Arc::new(StringArray::from(model_ids)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                vectors.into_iter(),
                dim,
            )),
        ],
    )?)
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("snapshot column '{name}' missing"))
}

fn int_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| anyhow!("snapshot column '{name}' missing"))
}

fn from_record_batch(batch: &RecordBatch, corpus: &CorpusId, model_id: &str, dim: usize) -> Result<Vec<(Chunk, Vec<f32>)>> {
    let id = string_col(batch, "id")?;
    let source = string_col(batch, "source_document")?;
    let section = string_col(batch, "section")?;
    let content = string_col(batch, "content")?;
    let keywords = string_col(batch, "keywords")?;
    let tags = string_col(batch, "entity_tags")?;
    let stored_model = string_col(batch, "model_id")?;
    let chunk_index = int_col(batch, "chunk_index")?;
    let total_chunks = int_col(batch, "total_chunks")?;
    let conditions = batch
        .column_by_name("has_conditions")
        .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
        .ok_or_else(|| anyhow!("snapshot column 'has_conditions' missing"))?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| anyhow!("snapshot column 'vector' missing"))?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if stored_model.value(i) != model_id {
            bail!(Error::InvalidConfig(format!(
                "corpus {corpus} was indexed with '{}', not '{model_id}'; re-index it",
                stored_model.value(i)
            )));
        }
        if vectors.is_null(i) {
            bail!("corpus {corpus}: chunk {} has no vector", id.value(i));
        }
        let vector: Vec<f32> = vectors.value(i).as_primitive::<arrow_array::types::Float32Type>().values().to_vec();
        if vector.len() != dim {
            bail!(Error::DimensionMismatch { expected: dim, got: vector.len() });
        }
        let keywords: BTreeSet<String> = serde_json::from_str(keywords.value(i))?;
        let entity_tags: BTreeSet<String> = serde_json::from_str(tags.value(i))?;
        let chunk = Chunk {
            id: id.value(i).to_string(),
            corpus_id: corpus.clone(),
            source_document: source.value(i).to_string(),
            section: (!section.is_null(i)).then(|| section.value(i).to_string()),
            content: content.value(i).to_string(),
            keywords,
            entity_tags,
            has_conditions: conditions.value(i),
            chunk_index: usize::try_from(chunk_index.value(i))?,
            total_chunks: usize::try_from(total_chunks.value(i))?,
        };
        rows.push((chunk, vector));
    }
    Ok(rows)
}
