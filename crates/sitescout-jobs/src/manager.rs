//! Background job manager: FIFO queue, single worker, retention sweep.
//!
//! At most one job body runs at a time in the process. Jobs move
//! `queued → processing → {completed, failed}`; a queued job may also be
//! cancelled, which marks it `failed` with the message "cancelled". Once the
//! worker has dequeued a job it can no longer be cancelled.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sitescout_core::{defaults, Error, Job, JobStatus, JobStore, JobType, QueueStats, Result};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Error recorded on a job cancelled before it ran.
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Error recorded on a job found mid-run after a restart.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for the job manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Whether the worker loop runs at all.
    pub enabled: bool,
    /// Terminal jobs older than this are purged.
    pub retention: chrono::Duration,
    /// How often the retention sweep runs.
    pub sweep_interval: Duration,
    /// Idle wait when the queue is empty.
    pub idle_poll: Duration,
    /// Deadline for a single job body.
    pub job_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention: chrono::Duration::hours(defaults::JOB_RETENTION_HOURS),
            sweep_interval: Duration::from_secs(defaults::JOB_SWEEP_INTERVAL_SECS),
            idle_poll: Duration::from_millis(defaults::JOB_IDLE_POLL_MS),
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
        }
    }
}

impl ManagerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_RETENTION_HOURS` | `24` | Age after which finished jobs are purged |
    /// | `JOB_SWEEP_INTERVAL_SECS` | `3600` | Retention sweep period |
    /// | `JOB_IDLE_POLL_MS` | `500` | Wait when the queue is empty |
    /// | `JOB_TIMEOUT_SECS` | `3600` | Per-job deadline |
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        if let Some(hours) = std::env::var("JOB_RETENTION_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|h| *h > 0)
        {
            config.retention = chrono::Duration::hours(hours);
        }
        if let Some(secs) = std::env::var("JOB_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = std::env::var("JOB_IDLE_POLL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.idle_poll = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = std::env::var("JOB_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.job_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_retention(mut self, retention: chrono::Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Event emitted by the job manager.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    JobQueued { job_id: Uuid, job_type: JobType },
    JobStarted { job_id: Uuid, job_type: JobType },
    JobProgress {
        job_id: Uuid,
        percentage: f64,
        step: Option<String>,
    },
    JobCompleted { job_id: Uuid, job_type: JobType },
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    JobCancelled { job_id: Uuid },
    JobsPurged { count: usize },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_rx: broadcast::Receiver<JobEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop the worker after its current job and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(subsystem = "jobs", component = "manager", error = ?e, "Worker task panicked");
            }
        }
    }

    /// Get a receiver for job events.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.event_rx.resubscribe()
    }
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Default)]
struct Queue {
    pending: VecDeque<Uuid>,
    /// Job the worker has dequeued and not yet finished.
    current: Option<Uuid>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    config: ManagerConfig,
    handlers: RwLock<HashMap<JobType, Arc<dyn JobHandler>>>,
    queue: Mutex<Queue>,
    wake: Notify,
    events: broadcast::Sender<JobEvent>,
    started: AtomicBool,
}

/// Queue of background jobs with one process-wide worker.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(defaults::EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                handlers: RwLock::new(HashMap::new()),
                queue: Mutex::new(Queue::default()),
                wake: Notify::new(),
                events,
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        self.register_arc(Arc::new(handler)).await;
    }

    pub async fn register_arc(&self, handler: Arc<dyn JobHandler>) {
        let job_type = handler.job_type();
        self.inner.handlers.write().await.insert(job_type, handler);
        debug!(subsystem = "jobs", component = "manager", %job_type, "Registered job handler");
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    /// Get a receiver for job events.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: JobEvent) {
        let _ = self.inner.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Submission and inspection
    // -------------------------------------------------------------------------

    /// Enqueue a job. Fails without storing anything if no handler exists
    /// for `job_type`.
    pub async fn create_job(&self, job_type: JobType, payload: JsonValue) -> Result<Job> {
        if !self.inner.handlers.read().await.contains_key(&job_type) {
            return Err(Error::Validation(format!(
                "no handler registered for job type {}",
                job_type
            )));
        }

        let job = Job::new(job_type, payload);
        self.inner.store.put(&job).await?;
        self.inner.queue.lock().await.pending.push_back(job.id);
        self.inner.wake.notify_one();

        info!(
            subsystem = "jobs",
            component = "manager",
            op = "create_job",
            job_id = %job.id,
            %job_type,
            "Job queued"
        );
        self.emit(JobEvent::JobQueued {
            job_id: job.id,
            job_type,
        });
        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        self.inner
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Jobs in creation order, optionally filtered by status.
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.inner.store.list(status).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        let jobs = self.inner.store.list(None).await?;
        Ok(QueueStats::from_jobs(&jobs))
    }

    /// Cancel a job that has not been dequeued yet.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let mut queue = self.inner.queue.lock().await;

        let mut job = self.get_job(job_id).await?;
        if job.status != JobStatus::Queued || queue.current == Some(job_id) {
            return Err(Error::Conflict(format!(
                "job {} is {}; only queued jobs can be cancelled",
                job_id,
                if job.status == JobStatus::Queued {
                    JobStatus::Processing
                } else {
                    job.status
                }
            )));
        }

        queue.pending.retain(|id| *id != job_id);
        job.mark_failed(CANCELLED_MESSAGE, Utc::now())?;
        self.inner.store.put(&job).await?;
        drop(queue);

        info!(
            subsystem = "jobs",
            component = "manager",
            op = "cancel_job",
            job_id = %job_id,
            "Job cancelled"
        );
        self.emit(JobEvent::JobCancelled { job_id });
        Ok(job)
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Purge terminal jobs that finished before `now - retention`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.inner.config.retention;
        let mut purged = 0;

        for job in self.inner.store.list(None).await? {
            let expired = job.status.is_terminal()
                && job.finished_at.unwrap_or(job.created_at) < cutoff;
            if expired && self.inner.store.delete(job.id).await? {
                purged += 1;
            }
        }

        if purged > 0 {
            info!(
                subsystem = "jobs",
                component = "manager",
                op = "sweep",
                count = purged,
                "Purged finished jobs"
            );
            self.emit(JobEvent::JobsPurged { count: purged });
        }
        Ok(purged)
    }

    /// Re-enqueue stored `queued` jobs and fail jobs left `processing`.
    ///
    /// Jobs tracked on the external endpoint are left to the tracker.
    /// Returns `(requeued, interrupted)`.
    pub async fn recover(&self) -> Result<(usize, usize)> {
        let now = Utc::now();
        let mut interrupted = 0;
        for mut job in self.inner.store.list(Some(JobStatus::Processing)).await? {
            if job.external.is_some() {
                continue;
            }
            job.mark_failed(INTERRUPTED_MESSAGE, now)?;
            self.inner.store.put(&job).await?;
            interrupted += 1;
            self.emit(JobEvent::JobFailed {
                job_id: job.id,
                job_type: job.job_type,
                error: INTERRUPTED_MESSAGE.to_string(),
            });
        }

        let mut queued: Vec<Job> = self
            .inner
            .store
            .list(Some(JobStatus::Queued))
            .await?
            .into_iter()
            .filter(|j| j.external.is_none())
            .collect();
        queued.sort_by_key(|j| (j.created_at, j.id));

        let mut queue = self.inner.queue.lock().await;
        let mut requeued = 0;
        for job in queued {
            if !queue.pending.contains(&job.id) {
                queue.pending.push_back(job.id);
                requeued += 1;
            }
        }
        drop(queue);
        if requeued > 0 {
            self.inner.wake.notify_one();
        }

        if requeued > 0 || interrupted > 0 {
            info!(
                subsystem = "jobs",
                component = "manager",
                op = "recover",
                requeued,
                interrupted,
                "Recovered jobs from store"
            );
        }
        Ok((requeued, interrupted))
    }

    // -------------------------------------------------------------------------
    // Worker
    // -------------------------------------------------------------------------

    /// Recover stored jobs, then start the worker and the sweep.
    ///
    /// Only one worker may run per manager.
    pub async fn start(&self) -> Result<WorkerHandle> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Conflict("job worker already started".to_string()));
        }

        if let Err(e) = self.recover().await {
            error!(subsystem = "jobs", component = "manager", op = "recover", error = %e, "Startup recovery failed");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_rx = self.inner.events.subscribe();
        let mut tasks = Vec::new();

        if self.inner.config.enabled {
            let worker = self.clone();
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { worker.run_worker(rx).await }));
        } else {
            info!(subsystem = "jobs", component = "manager", "Job worker is disabled, not starting");
        }

        let sweeper = self.clone();
        tasks.push(tokio::spawn(async move { sweeper.run_sweep(shutdown_rx).await }));

        Ok(WorkerHandle {
            shutdown_tx,
            event_rx,
            tasks,
        })
    }

    async fn run_worker(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            subsystem = "jobs",
            component = "manager",
            idle_poll_ms = self.inner.config.idle_poll.as_millis() as u64,
            "Job worker started"
        );
        self.emit(JobEvent::WorkerStarted);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.dequeue().await {
                Some(job_id) => {
                    self.run_job(job_id).await;
                    self.inner.queue.lock().await.current = None;
                }
                None => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            // Handle dropped without shutdown.
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = self.inner.wake.notified() => {}
                        _ = tokio::time::sleep(self.inner.config.idle_poll) => {}
                    }
                }
            }
        }

        self.emit(JobEvent::WorkerStopped);
        info!(subsystem = "jobs", component = "manager", "Job worker stopped");
    }

    async fn dequeue(&self) -> Option<Uuid> {
        let mut queue = self.inner.queue.lock().await;
        let next = queue.pending.pop_front();
        queue.current = next;
        next
    }

    async fn run_job(&self, job_id: Uuid) {
        let start = Instant::now();
        let store = &self.inner.store;

        let mut job = match store.get(job_id).await {
            Ok(Some(job)) if job.status == JobStatus::Queued => job,
            Ok(_) => {
                debug!(subsystem = "jobs", component = "manager", job_id = %job_id, "Dequeued job no longer queued, skipping");
                return;
            }
            Err(e) => {
                error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Failed to load dequeued job");
                return;
            }
        };
        let job_type = job.job_type;

        if let Err(e) = job.mark_processing(Utc::now()) {
            error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Cannot start job");
            return;
        }
        if let Err(e) = store.put(&job).await {
            error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Failed to mark job processing");
            return;
        }

        info!(subsystem = "jobs", component = "manager", op = "run_job", job_id = %job_id, %job_type, "Processing job");
        self.emit(JobEvent::JobStarted { job_id, job_type });

        let handler = self.inner.handlers.read().await.get(&job_type).cloned();
        let result = match handler {
            Some(handler) => {
                let ctx = JobContext::new(job.clone(), store.clone(), self.inner.events.clone());
                let timeout = self.inner.config.job_timeout;
                let body = AssertUnwindSafe(handler.execute(ctx)).catch_unwind();
                match tokio::time::timeout(timeout, body).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(_)) => JobResult::Failed("job handler panicked".to_string()),
                    Err(_) => {
                        warn!(subsystem = "jobs", component = "manager", job_id = %job_id, %job_type, "Job exceeded timeout of {}s", timeout.as_secs());
                        JobResult::Failed(format!("job exceeded timeout of {}s", timeout.as_secs()))
                    }
                }
            }
            None => {
                warn!(subsystem = "jobs", component = "manager", %job_type, "No handler registered for job type");
                JobResult::Failed(format!("no handler for job type {}", job_type))
            }
        };

        // Pick up progress written by the handler.
        if let Ok(Some(latest)) = store.get(job_id).await {
            job = latest;
        }

        let now = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(data) => {
                if let Err(e) = job.mark_completed(data, now) {
                    error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Cannot complete job");
                    return;
                }
                if let Err(e) = store.put(&job).await {
                    error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Failed to mark job as completed");
                    return;
                }
                info!(subsystem = "jobs", component = "manager", job_id = %job_id, %job_type, duration_ms, "Job completed successfully");
                self.emit(JobEvent::JobCompleted { job_id, job_type });
            }
            JobResult::Failed(message) => {
                if let Err(e) = job.mark_failed(message.clone(), now) {
                    error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Cannot fail job");
                    return;
                }
                if let Err(e) = store.put(&job).await {
                    error!(subsystem = "jobs", component = "manager", job_id = %job_id, error = %e, "Failed to mark job as failed");
                    return;
                }
                warn!(subsystem = "jobs", component = "manager", job_id = %job_id, %job_type, error = %message, duration_ms, "Job failed");
                self.emit(JobEvent::JobFailed {
                    job_id,
                    job_type,
                    error: message,
                });
            }
        }
    }

    async fn run_sweep(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.inner.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        warn!(subsystem = "jobs", component = "manager", op = "sweep", error = %e, "Job sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_config_default() {
        let config = ManagerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.retention, chrono::Duration::hours(24));
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.idle_poll, Duration::from_millis(500));
    }

    #[test]
    fn test_manager_config_builder() {
        let config = ManagerConfig::default()
            .with_enabled(false)
            .with_retention(chrono::Duration::hours(1))
            .with_idle_poll(Duration::from_millis(10));
        assert!(!config.enabled);
        assert_eq!(config.retention, chrono::Duration::hours(1));
        assert_eq!(config.idle_poll, Duration::from_millis(10));
    }
}
