//! EdPlan Generation Pipeline
//!
//! End-to-end orchestration of the assessment-to-IEP pipeline: document
//! extraction, quantification, retrieval-augmented prompt assembly,
//! per-section LLM generation, response flattening, and versioned
//! persistence under the per-student lock.

pub mod extraction;
pub mod prompts;
pub mod generation;
pub mod orchestrator;

pub use extraction::*;
pub use prompts::*;
pub use generation::*;
pub use orchestrator::*;
