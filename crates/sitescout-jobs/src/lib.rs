//! # sitescout-jobs
//!
//! Background job processing for sitescout.
//!
//! This crate provides:
//! - A FIFO job queue processed one job at a time
//! - Progress tracking and notifications via broadcast channels
//! - Retention sweeping and restart recovery
//! - Submission to, and polling of, an external compute endpoint
//! - The search extraction handler tying recorder, pipeline and directory together
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sitescout_db::Repositories;
//! use sitescout_jobs::{JobManager, ManagerConfig, SearchExtractionHandler};
//!
//! let repos = Repositories::in_memory();
//! let manager = JobManager::new(repos.jobs.clone(), ManagerConfig::from_env());
//! manager
//!     .register_handler(SearchExtractionHandler::new(repos.clone(), pipeline))
//!     .await;
//!
//! let handle = manager.start().await?;
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await;
//! ```

pub mod delegated;
pub mod external;
pub mod extraction_handler;
pub mod handler;
pub mod manager;
pub mod tracker;

pub use delegated::{DelegatedClassifier, CLASSIFY_BATCH};
pub use external::{
    ExternalJobClient, ExternalJobConfig, ExternalJobSpec, PollOutcome, PollReply, RemoteStatus,
};
pub use extraction_handler::{ExtractionPayload, SearchExtractionHandler};
pub use handler::{JobContext, JobHandler, JobResult};
pub use manager::{
    JobEvent, JobManager, ManagerConfig, WorkerHandle, CANCELLED_MESSAGE, INTERRUPTED_MESSAGE,
};
pub use tracker::{ExternalJobTracker, PollerHandle, NOT_FOUND_MESSAGE};
