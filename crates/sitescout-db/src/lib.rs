//! # sitescout-db
//!
//! Storage layer for sitescout.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for sessions, lineage, directory and jobs
//! - An in-memory backend implementing the same traits
//! - The session recorder, traceability store and directory writer
//!
//! ## Example
//!
//! ```rust,ignore
//! use sitescout_db::{Database, Repositories, RecorderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/sitescout").await?;
//!     let repos = Repositories::from_database(&db);
//!
//!     let session = repos
//!         .recorder(RecorderConfig::default())
//!         .create_session(&["plumbers springfield"], Some("plumbing"), None)
//!         .await?;
//!     println!("Created session: {}", session.id);
//!     Ok(())
//! }
//! ```

pub mod businesses;
pub mod directory;
pub mod jobs;
pub mod lineage;
pub mod memory;
pub mod pool;
pub mod recorder;
pub mod sessions;
pub mod traceability;

use std::sync::Arc;

pub use businesses::PgDirectoryRepository;
pub use directory::BusinessDirectoryWriter;
pub use jobs::PgJobStore;
pub use lineage::PgTraceRepository;
pub use memory::MemoryStore;
pub use pool::{create_pool_with_config, PoolConfig};
pub use recorder::{RecorderConfig, SessionRecorder};
pub use sessions::PgSearchSessionRepository;
pub use traceability::{RecordResultRequest, TraceConfig, TraceabilityStore};

// Re-export core types
pub use sitescout_core::{
    DirectoryRepository, Error, JobStore, Result, SearchSessionRepository, TraceRepository,
};

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Search sessions and their hits.
    pub sessions: Arc<PgSearchSessionRepository>,
    /// Classification runs and rows.
    pub trace: Arc<PgTraceRepository>,
    /// Business directory.
    pub directory: Arc<PgDirectoryRepository>,
    /// Background job store.
    pub jobs: Arc<PgJobStore>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            sessions: Arc::new(PgSearchSessionRepository::new(pool.clone())),
            trace: Arc::new(PgTraceRepository::new(pool.clone())),
            directory: Arc::new(PgDirectoryRepository::new(pool.clone())),
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::from_env()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

/// Storage-agnostic handles to every repository.
///
/// Built from either a [`Database`] or a [`MemoryStore`], and injected into
/// the services and the job manager.
#[derive(Clone)]
pub struct Repositories {
    pub sessions: Arc<dyn SearchSessionRepository>,
    pub trace: Arc<dyn TraceRepository>,
    pub directory: Arc<dyn DirectoryRepository>,
    pub jobs: Arc<dyn JobStore>,
}

impl Repositories {
    pub fn from_database(db: &Database) -> Self {
        Self {
            sessions: db.sessions.clone(),
            trace: db.trace.clone(),
            directory: db.directory.clone(),
            jobs: db.jobs.clone(),
        }
    }

    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            sessions: store.clone(),
            trace: store.clone(),
            directory: store.clone(),
            jobs: store,
        }
    }

    /// A fresh, empty in-memory backend.
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    pub fn recorder(&self, config: RecorderConfig) -> SessionRecorder {
        SessionRecorder::new(self.sessions.clone(), config)
    }

    pub fn traceability(&self) -> TraceabilityStore {
        TraceabilityStore::new(
            self.sessions.clone(),
            self.trace.clone(),
            self.directory.clone(),
        )
    }

    pub fn directory_writer(&self) -> BusinessDirectoryWriter {
        BusinessDirectoryWriter::new(self.directory.clone())
    }
}
