//! Centralized default constants for sitescout.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in the other crates read their fallbacks from here.

// =============================================================================
// SEARCH SESSIONS
// =============================================================================

/// Window in seconds within which an identical session create is collapsed
/// into the existing session.
pub const SESSION_REUSE_WINDOW_SECS: u64 = 60;

// =============================================================================
// EXTRACTION PIPELINE
// =============================================================================

/// Number of hits sent to the classifier per call.
pub const EXTRACTION_BATCH_SIZE: usize = 10;

/// Minimum classifier confidence required to accept a hit.
pub const CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Pause between classifier calls, in milliseconds.
pub const EXTRACTION_BATCH_DELAY_MS: u64 = 1000;

/// Timeout for a single classifier call, in seconds.
pub const CLASSIFIER_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// TRACEABILITY
// =============================================================================

/// Maximum characters of the prompt kept on a processing result.
pub const PROMPT_AUDIT_CHARS: usize = 1000;

/// Maximum characters of the classifier response kept on a processing result.
pub const RESPONSE_AUDIT_CHARS: usize = 2000;

// =============================================================================
// JOB PROCESSING
// =============================================================================

/// Finished jobs older than this are purged by the sweep.
pub const JOB_RETENTION_HOURS: i64 = 24;

/// Interval between retention sweeps, in seconds.
pub const JOB_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Safety-net wake interval for an idle worker, in milliseconds.
///
/// Enqueues wake the worker directly; this only bounds how long a missed
/// wake can stall the queue.
pub const JOB_IDLE_POLL_MS: u64 = 500;

/// Per-job execution timeout in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 3600;

/// Broadcast channel capacity for worker events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// EXTERNAL JOBS
// =============================================================================

/// Interval between polls of one external job, in milliseconds.
pub const EXTERNAL_POLL_INTERVAL_MS: u64 = 2000;

/// Timeout of a single submit or poll request, in seconds.
pub const EXTERNAL_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Heuristic progress added per poll cycle when the endpoint reports none.
pub const EXTERNAL_PROGRESS_STEP: f64 = 10.0;

/// Heuristic progress never exceeds this without an explicit completion.
pub const EXTERNAL_PROGRESS_CAP: f64 = 90.0;

/// Longest a caller waits for one delegated unit before giving up, in seconds.
pub const EXTERNAL_MAX_WAIT_SECS: u64 = 900;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible endpoint.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default generation model.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// Timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default page size for job listings.
pub const PAGE_LIMIT: usize = 50;
