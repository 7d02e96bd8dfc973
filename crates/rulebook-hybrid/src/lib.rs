pub mod query;
pub mod reference;
pub mod rerank;
pub mod retriever;

pub use query::{build_query_text, EntityQuery};
pub use reference::{CorpusReference, ReferenceDetector};
pub use rerank::HybridReranker;
pub use retriever::HybridRetriever;
