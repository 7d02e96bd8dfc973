//! Vector side of the engine: exact per-corpus indexes, the corpus registry,
//! the embedding cache, indexing-time embedding and LanceDB snapshots.
pub mod cache;
pub mod embed_corpus;
pub mod index;
pub mod registry;
pub mod schema;
pub mod snapshot;
pub mod table;

pub use cache::EmbeddingCache;
pub use embed_corpus::{build_corpus_index, embed_chunks};
pub use index::VectorIndex;
pub use registry::{CorpusRegistry, CorpusStats};
