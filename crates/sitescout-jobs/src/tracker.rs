//! Submit → poll → reconcile for jobs running on the external endpoint.
//!
//! Every delegated job has a local [`Job`] record carrying its
//! [`ExternalJobRef`]. Each poll reconciles that record with the remote
//! state:
//!
//! - a differing remote status overwrites the local one (never backwards,
//!   never out of a terminal state);
//! - a result in any reply is cached on the local record;
//! - a 404 means the endpoint has dropped the job, most likely because it
//!   finished, so a cached result completes the job, otherwise it fails;
//! - with no progress in the reply, a processing job advances by a fixed
//!   step per poll, capped below 100;
//! - transport errors and non-404 failures leave the record untouched.
//!
//! At most one poll request per external job is outstanding at a time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sitescout_core::{Error, Job, JobStatus, JobStore, JobType, Result};

use crate::external::{ExternalJobClient, ExternalJobSpec, PollOutcome, PollReply, RemoteStatus};

/// Error recorded when the endpoint forgot a job that never produced a result.
pub const NOT_FOUND_MESSAGE: &str = "external job not found and no cached result";

/// Removes its key from the in-flight set when dropped.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, key: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(|p| p.into_inner());
        if !guard.insert(key.to_string()) {
            return None;
        }
        Some(Self {
            set: set.clone(),
            key: key.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|p| p.into_inner());
        guard.remove(&self.key);
    }
}

/// Apply one poll reply to the local record. Returns whether it changed.
pub fn reconcile(
    job: &mut Job,
    reply: &PollReply,
    progress_step: f64,
    progress_cap: f64,
    now: DateTime<Utc>,
) -> Result<bool> {
    if job.status.is_terminal() {
        return Ok(false);
    }
    let before = job.clone();

    if let Some(ref result) = reply.result {
        job.result = Some(result.clone());
    }

    match reply.status {
        RemoteStatus::Queued => {}
        RemoteStatus::Processing => {
            if job.status == JobStatus::Queued {
                job.mark_processing(now)?;
            }
        }
        RemoteStatus::Completed => {
            if job.status == JobStatus::Queued {
                job.mark_processing(now)?;
            }
            job.mark_completed(None, now)?;
        }
        RemoteStatus::Failed => {
            let message = reply
                .error
                .clone()
                .unwrap_or_else(|| "external job failed".to_string());
            job.mark_failed(message, now)?;
        }
    }

    if job.status == JobStatus::Processing {
        match reply.progress {
            Some(pct) => job.progress.set_percentage(pct),
            None => {
                let next = (job.progress.percentage + progress_step).min(progress_cap);
                job.progress.set_percentage(next);
            }
        }
    }

    Ok(*job != before)
}

/// Apply a 404 to the local record.
pub fn reconcile_not_found(job: &mut Job, now: DateTime<Utc>) -> Result<bool> {
    if job.status.is_terminal() {
        return Ok(false);
    }
    if job.result.is_some() {
        if job.status == JobStatus::Queued {
            job.mark_processing(now)?;
        }
        job.mark_completed(None, now)?;
    } else {
        job.mark_failed(NOT_FOUND_MESSAGE, now)?;
    }
    Ok(true)
}

/// Tracks delegated jobs in the local job store.
#[derive(Clone)]
pub struct ExternalJobTracker {
    client: ExternalJobClient,
    store: Arc<dyn JobStore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl ExternalJobTracker {
    pub fn new(client: ExternalJobClient, store: Arc<dyn JobStore>) -> Self {
        Self {
            client,
            store,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn client(&self) -> &ExternalJobClient {
        &self.client
    }

    /// Submit work and record it locally.
    ///
    /// A failed submit creates no local job and is returned to the caller.
    pub async fn submit(&self, job_type: JobType, spec: ExternalJobSpec) -> Result<Job> {
        let external = self.client.submit(&spec).await?;

        let mut job = Job::new(job_type, spec.payload);
        job.progress.eta_ms = external.eta_ms;
        job.external = Some(external);
        self.store.put(&job).await?;

        info!(
            subsystem = "jobs",
            component = "tracker",
            op = "submit",
            job_id = %job.id,
            %job_type,
            external_id = job.external.as_ref().map(|e| e.external_id.as_str()).unwrap_or_default(),
            "Delegated job submitted"
        );
        Ok(job)
    }

    /// Poll one job and reconcile its local record.
    ///
    /// Returns `None` when a poll for the same external job is already
    /// outstanding; otherwise the local record after this poll.
    pub async fn poll_once(&self, job_id: Uuid) -> Result<Option<Job>> {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        let external = job
            .external
            .clone()
            .ok_or_else(|| Error::Validation(format!("job {} is not delegated", job_id)))?;
        if job.status.is_terminal() {
            return Ok(Some(job));
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &external.external_id) else {
            debug!(
                subsystem = "jobs",
                component = "tracker",
                external_id = %external.external_id,
                "Poll already in flight, skipping"
            );
            return Ok(None);
        };

        let outcome = match self.client.poll(&external.poll_url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "tracker",
                    op = "poll",
                    job_id = %job_id,
                    external_id = %external.external_id,
                    error = %e,
                    "Poll failed, retrying next tick"
                );
                return Ok(Some(job));
            }
        };

        // Re-read under the guard so concurrent writers are not clobbered.
        if let Some(latest) = self.store.get(job_id).await? {
            job = latest;
        }

        let now = Utc::now();
        let changed = match outcome {
            PollOutcome::Found(reply) if !reply.success => {
                warn!(
                    subsystem = "jobs",
                    component = "tracker",
                    op = "poll",
                    job_id = %job_id,
                    error = reply.error.as_deref().unwrap_or_default(),
                    "Endpoint reported an unsuccessful poll, retrying next tick"
                );
                false
            }
            PollOutcome::Found(reply) => {
                let config = self.client.config();
                reconcile(&mut job, &reply, config.progress_step, config.progress_cap, now)?
            }
            PollOutcome::NotFound => {
                let had_result = job.result.is_some();
                let changed = reconcile_not_found(&mut job, now)?;
                if changed {
                    info!(
                        subsystem = "jobs",
                        component = "tracker",
                        op = "poll",
                        job_id = %job_id,
                        external_id = %external.external_id,
                        had_result,
                        "External job gone, settled from cache"
                    );
                }
                changed
            }
        };

        if changed {
            self.store.put(&job).await?;
            debug!(
                subsystem = "jobs",
                component = "tracker",
                job_id = %job_id,
                status = %job.status,
                percentage = job.progress.percentage,
                "Delegated job reconciled"
            );
        }
        Ok(Some(job))
    }

    /// Poll every non-terminal delegated job once. Returns how many were polled.
    pub async fn poll_all(&self) -> Result<usize> {
        let mut polled = 0;
        for status in [JobStatus::Queued, JobStatus::Processing] {
            for job in self.store.list(Some(status)).await? {
                if job.external.is_none() {
                    continue;
                }
                if let Err(e) = self.poll_once(job.id).await {
                    warn!(subsystem = "jobs", component = "tracker", job_id = %job.id, error = %e, "Poll failed");
                }
                polled += 1;
            }
        }
        Ok(polled)
    }

    /// Poll until the job is terminal or the configured wait runs out.
    pub async fn wait_for_completion(&self, job_id: Uuid) -> Result<Job> {
        let start = Instant::now();
        let config = self.client.config().clone();

        loop {
            let job = match self.poll_once(job_id).await? {
                Some(job) => job,
                None => self
                    .store
                    .get(job_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?,
            };
            if job.status.is_terminal() {
                return Ok(job);
            }
            if start.elapsed() >= config.max_wait {
                return Err(Error::Timeout(format!(
                    "external job {} still {} after {}s",
                    job_id,
                    job.status,
                    config.max_wait.as_secs()
                )));
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    /// Poll all delegated jobs on a fixed interval until shut down.
    pub fn start_poller(&self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tracker = self.clone();
        let interval = self.client.config().poll_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = tracker.poll_all().await {
                            error!(subsystem = "jobs", component = "tracker", error = %e, "Poll cycle failed");
                        }
                    }
                }
            }
            debug!(subsystem = "jobs", component = "tracker", "Poller stopped");
        });

        PollerHandle { shutdown_tx, task }
    }
}

/// Handle for the background poller.
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            error!(subsystem = "jobs", component = "tracker", error = ?e, "Poller task panicked");
        }
    }
}
