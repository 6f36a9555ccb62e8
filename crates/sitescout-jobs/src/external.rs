//! Client for the external compute endpoint.
//!
//! Contract: `POST {base}/jobs` with `{type, payload}` returns
//! `{jobId, pollUrl?, position?, etaMs?}`; `GET pollUrl` returns
//! `{success, status, progress?, result?, error?}`. The endpoint cannot push
//! notifications, so callers poll.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;
use url::Url;

use sitescout_core::{defaults, Error, ExternalJobRef, Result};

/// Configuration for the external job endpoint.
#[derive(Debug, Clone)]
pub struct ExternalJobConfig {
    /// Base URL; jobs are submitted to `{base_url}/jobs`.
    pub base_url: String,
    pub api_key: Option<String>,
    /// Period between polls of one job.
    pub poll_interval: Duration,
    /// Deadline for a single submit or poll request.
    pub request_timeout: Duration,
    /// Heuristic progress added per poll when the endpoint reports none.
    pub progress_step: f64,
    /// Heuristic progress never passes this.
    pub progress_cap: f64,
    /// Give up waiting on a job after this long.
    pub max_wait: Duration,
}

impl ExternalJobConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            poll_interval: Duration::from_millis(defaults::EXTERNAL_POLL_INTERVAL_MS),
            request_timeout: Duration::from_secs(defaults::EXTERNAL_REQUEST_TIMEOUT_SECS),
            progress_step: defaults::EXTERNAL_PROGRESS_STEP,
            progress_cap: defaults::EXTERNAL_PROGRESS_CAP,
            max_wait: Duration::from_secs(defaults::EXTERNAL_MAX_WAIT_SECS),
        }
    }

    /// Environment variables:
    /// - `EXTERNAL_JOBS_URL` (required)
    /// - `EXTERNAL_JOBS_API_KEY`
    /// - `EXTERNAL_POLL_INTERVAL_MS` (default: 2000)
    /// - `EXTERNAL_POLL_TIMEOUT_SECS` (default: 30)
    /// - `EXTERNAL_PROGRESS_STEP` (default: 10)
    /// - `EXTERNAL_PROGRESS_CAP` (default: 90)
    /// - `EXTERNAL_MAX_WAIT_SECS` (default: 900)
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("EXTERNAL_JOBS_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::Config("EXTERNAL_JOBS_URL is not set".to_string()))?;
        let mut config = Self::new(base_url);

        config.api_key = std::env::var("EXTERNAL_JOBS_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        if let Some(ms) = env_parse::<u64>("EXTERNAL_POLL_INTERVAL_MS").filter(|v| *v > 0) {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("EXTERNAL_POLL_TIMEOUT_SECS").filter(|v| *v > 0) {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(step) = env_parse::<f64>("EXTERNAL_PROGRESS_STEP").filter(|v| *v >= 0.0) {
            config.progress_step = step;
        }
        if let Some(cap) = env_parse::<f64>("EXTERNAL_PROGRESS_CAP").filter(|v| (0.0..100.0).contains(v)) {
            config.progress_cap = cap;
        }
        if let Some(secs) = env_parse::<u64>("EXTERNAL_MAX_WAIT_SECS").filter(|v| *v > 0) {
            config.max_wait = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Work to submit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalJobSpec {
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: JsonValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
    poll_url: Option<String>,
    position: Option<u32>,
    eta_ms: Option<u64>,
}

/// Status reported by the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteStatus::Queued => "queued",
            RemoteStatus::Processing => "processing",
            RemoteStatus::Completed => "completed",
            RemoteStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Body of a successful poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollReply {
    #[serde(default = "default_success")]
    pub success: bool,
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
}

fn default_success() -> bool {
    true
}

/// Outcome of one poll request.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Found(PollReply),
    /// The endpoint no longer knows the job.
    NotFound,
}

// =============================================================================
// CLIENT
// =============================================================================

/// HTTP client for the external compute endpoint.
#[derive(Clone)]
pub struct ExternalJobClient {
    client: Client,
    config: ExternalJobConfig,
    base: Url,
}

impl ExternalJobClient {
    pub fn new(config: ExternalJobConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid external jobs URL: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            config,
            base,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(ExternalJobConfig::from_env()?)
    }

    pub fn config(&self) -> &ExternalJobConfig {
        &self.config
    }

    fn resolve(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .or_else(|_| Url::parse(path))
            .map_err(|e| Error::external(format!("invalid poll url {}: {}", path, e)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Submit work. Any failure is an [`Error::ExternalSystem`].
    pub async fn submit(&self, spec: &ExternalJobSpec) -> Result<ExternalJobRef> {
        let url = self.resolve("jobs")?;
        let resp = self
            .authorize(self.client.post(url))
            .json(spec)
            .send()
            .await
            .map_err(|e| Error::external(format!("submit failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ExternalSystem {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let body: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| Error::external(format!("malformed submit response: {}", e)))?;

        let poll_url = match body.poll_url {
            Some(url) => url,
            None => self.resolve(&format!("jobs/{}", body.job_id))?.to_string(),
        };

        debug!(
            subsystem = "jobs",
            component = "external",
            op = "submit",
            job_type = %spec.job_type,
            external_id = %body.job_id,
            position = ?body.position,
            "External job submitted"
        );
        Ok(ExternalJobRef {
            external_id: body.job_id,
            poll_url,
            position: body.position,
            eta_ms: body.eta_ms,
        })
    }

    /// Poll a job. A 404 is [`PollOutcome::NotFound`]; other failures are
    /// errors the caller should treat as transient.
    pub async fn poll(&self, poll_url: &str) -> Result<PollOutcome> {
        let url = self.resolve(poll_url)?;
        let resp = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("poll timed out: {}", e))
                } else {
                    Error::external(format!("poll failed: {}", e))
                }
            })?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(PollOutcome::NotFound);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::ExternalSystem {
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let reply: PollReply = resp
            .json()
            .await
            .map_err(|e| Error::external(format!("malformed poll response: {}", e)))?;
        Ok(PollOutcome::Found(reply))
    }
}
