//! # sitescout-core
//!
//! Core types, traits, and abstractions for sitescout.
//!
//! This crate provides the data model for the search → classification →
//! directory lineage graph, the strict classifier reply schema, the
//! repository traits that storage backends implement, and the shared error
//! type. Every other sitescout crate depends on it.

pub mod classification;
pub mod defaults;
pub mod error;
pub mod models;
pub mod text;
pub mod traits;
pub mod uuid_utils;
pub mod website;

// Re-export commonly used types at crate root
pub use classification::{
    accepts, ClassificationRequest, ClassifiedBusiness, ClassifierPrompt, ClassifierReply,
};
pub use error::{Error, Result};
pub use models::*;
pub use text::{normalize_queries, session_fingerprint, truncate_chars};
pub use traits::*;
pub use uuid_utils::new_v7;
pub use website::{hosts_match, normalize_website};
