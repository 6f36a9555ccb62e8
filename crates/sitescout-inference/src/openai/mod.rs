//! OpenAI-compatible generation backend.
//!
//! Works with any endpoint that speaks the chat completions API (OpenAI,
//! Azure OpenAI, vLLM, Ollama in compatibility mode). Requests ask for a JSON
//! object reply so the classifier output can be validated strictly.
//!
//! # Example
//!
//! ```rust,no_run
//! use sitescout_inference::openai::OpenAIBackend;
//! use sitescout_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let reply = backend
//!         .generate_with_system("Answer in JSON.", "{\"ping\": true}")
//!         .await
//!         .unwrap();
//!     println!("{}", reply);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use error::FailureKind;
pub use types::ErrorDetail;
