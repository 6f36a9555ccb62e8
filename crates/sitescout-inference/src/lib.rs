//! # sitescout-inference
//!
//! Classification for sitescout.
//!
//! This crate provides:
//! - OpenAI-compatible generation backend
//! - Classifier prompt construction
//! - [`LlmClassifier`], the direct [`BatchClassifier`] over a backend
//! - [`ExtractionPipeline`], which batches hits and applies the acceptance rule
//!
//! # Feature Flags
//!
//! - `mock`: expose [`mock`] backends to dependent crates' tests

pub mod classifier;
pub mod openai;
pub mod pipeline;
pub mod prompt;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use classifier::LlmClassifier;
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use pipeline::{
    BatchObserver, BatchOutcome, ExtractionPipeline, ExtractionReport, HitOutcome, PipelineConfig,
};
pub use prompt::build_prompt;

// Re-export core types
pub use sitescout_core::{BatchClassifier, GenerationBackend};
