pub mod chunker;
pub mod config;
pub mod error;
pub mod tagging;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
