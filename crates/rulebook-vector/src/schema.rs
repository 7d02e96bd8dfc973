//! Arrow schemas of the snapshot tables.
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use std::sync::Arc;

/// Name of the key/value table holding active-generation pointers.
pub const META_TABLE: &str = "meta";

/// One row per chunk of a corpus generation. `keywords` and `entity_tags`
/// are JSON arrays.
pub fn build_corpus_schema(dim: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("corpus_id", DataType::Utf8, false),
        Field::new("source_document", DataType::Utf8, false),
        Field::new("section", DataType::Utf8, true),
        Field::new("content", DataType::Utf8, false),
        Field::new("keywords", DataType::Utf8, false),
        Field::new("entity_tags", DataType::Utf8, false),
        Field::new("has_conditions", DataType::Boolean, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("total_chunks", DataType::Int32, false),
        Field::new("model_id", DataType::Utf8, false),
        Field::new("vector", DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim), true),
    ]))
}

pub fn build_meta_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, false),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}
