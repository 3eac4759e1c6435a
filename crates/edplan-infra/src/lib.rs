//! EdPlan Infrastructure
//!
//! Concrete implementations of the core repository and provider traits:
//! in-memory stores, the SQLite schema manager, and HTTP clients for object
//! storage, the OCR form parser, the LLM, and embeddings.

pub mod repositories;
pub mod database;
pub mod retry;
pub mod storage;
pub mod ocr;
pub mod llm;
pub mod embeddings;
pub mod vector_index;

pub use repositories::*;
pub use database::*;
pub use retry::*;
pub use storage::*;
pub use ocr::*;
pub use llm::*;
pub use embeddings::*;
pub use vector_index::*;
