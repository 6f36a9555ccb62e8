//! Batched extraction pipeline.
//!
//! Hits are split into fixed-size batches and classified one batch at a time
//! with a fixed delay in between. Each reply must match the strict
//! [`ClassifierReply`] schema; a non-conforming reply, a classifier error or
//! a timeout fails that batch only, counting every hit in it as errored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use sitescout_core::{
    defaults, BatchClassifier, ClassificationRequest, ClassifiedBusiness, ClassifierPrompt,
    ClassifierReply, Error, ProcessingCounts, Result, SearchHit,
};

use crate::prompt::build_prompt;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Hits per classifier call.
    pub batch_size: usize,
    /// Minimum confidence for acceptance.
    pub confidence_threshold: f64,
    /// Pause between consecutive batches.
    pub batch_delay: Duration,
    /// Deadline for a single classifier call.
    pub classifier_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::EXTRACTION_BATCH_SIZE,
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            batch_delay: Duration::from_millis(defaults::EXTRACTION_BATCH_DELAY_MS),
            classifier_timeout: Duration::from_secs(defaults::CLASSIFIER_TIMEOUT_SECS),
        }
    }
}

impl PipelineConfig {
    /// Environment variables:
    /// - `EXTRACTION_BATCH_SIZE` (default: 10)
    /// - `EXTRACTION_CONFIDENCE_THRESHOLD` (default: 0.7)
    /// - `EXTRACTION_BATCH_DELAY_MS` (default: 1000)
    /// - `EXTRACTION_CLASSIFIER_TIMEOUT_SECS` (default: 60)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(size) = std::env::var("EXTRACTION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            config.batch_size = size;
        }
        if let Some(threshold) = std::env::var("EXTRACTION_CONFIDENCE_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|t| (0.0..=1.0).contains(t))
        {
            config.confidence_threshold = threshold;
        }
        if let Some(ms) = std::env::var("EXTRACTION_BATCH_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.batch_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = std::env::var("EXTRACTION_CLASSIFIER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|n| *n > 0)
        {
            config.classifier_timeout = Duration::from_secs(secs);
        }

        config
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }
}

// =============================================================================
// OUTCOMES
// =============================================================================

/// Outcome for one hit.
#[derive(Debug, Clone, PartialEq)]
pub enum HitOutcome {
    Accepted(ClassifiedBusiness),
    Rejected(ClassifiedBusiness),
    Errored(String),
}

impl HitOutcome {
    pub fn business(&self) -> Option<&ClassifiedBusiness> {
        match self {
            HitOutcome::Accepted(b) | HitOutcome::Rejected(b) => Some(b),
            HitOutcome::Errored(_) => None,
        }
    }
}

/// Everything known about one classifier call.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// 0-based batch number.
    pub index: usize,
    /// Offset of the batch's first hit in the input.
    pub offset: usize,
    pub prompt: ClassifierPrompt,
    /// Raw classifier reply, if the call returned at all.
    pub raw_reply: Option<String>,
    /// Set when the whole batch failed.
    pub error: Option<String>,
    pub elapsed_ms: i64,
    /// One outcome per hit, in input order.
    pub hits: Vec<HitOutcome>,
}

impl BatchOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    pub fn hit_count(&self) -> usize {
        self.hits.len()
    }
}

/// Receives each batch as soon as it is classified.
///
/// Errors are logged and never abort the run.
#[async_trait]
pub trait BatchObserver: Send + Sync {
    async fn on_batch(&self, outcome: &BatchOutcome, total_hits: usize) -> Result<()>;
}

/// Aggregate result of a run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub counts: ProcessingCounts,
    pub extraction_quality: f64,
    /// Every successfully classified hit, accepted or not, in input order.
    pub classified: Vec<ClassifiedBusiness>,
    /// Accepted hits only.
    pub accepted: Vec<ClassifiedBusiness>,
    pub batches: usize,
    pub failed_batches: usize,
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Classifies hits batch by batch and applies the acceptance rule.
#[derive(Clone)]
pub struct ExtractionPipeline {
    classifier: Arc<dyn BatchClassifier>,
    config: PipelineConfig,
}

impl ExtractionPipeline {
    pub fn new(classifier: Arc<dyn BatchClassifier>, config: PipelineConfig) -> Self {
        Self { classifier, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Same pipeline with a different acceptance threshold.
    pub fn with_threshold(&self, threshold: f64) -> Self {
        let mut pipeline = self.clone();
        pipeline.config.confidence_threshold = threshold;
        pipeline
    }

    /// Classify every hit in `request`.
    ///
    /// Only an empty hit list or an out-of-range threshold is an error; batch
    /// failures are folded into the report.
    pub async fn run(
        &self,
        request: &ClassificationRequest,
        observer: Option<&dyn BatchObserver>,
    ) -> Result<ExtractionReport> {
        if request.hits.is_empty() {
            return Err(Error::Validation("no hits to classify".to_string()));
        }
        let threshold = self.config.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::Validation(format!(
                "confidence threshold {} outside [0, 1]",
                threshold
            )));
        }

        let start = Instant::now();
        let batch_size = self.config.batch_size.max(1);
        let total_hits = request.hits.len();
        let batch_count = total_hits.div_ceil(batch_size);
        let mut report = ExtractionReport::default();

        info!(
            subsystem = "inference",
            component = "pipeline",
            op = "run",
            classifier = self.classifier.name(),
            hit_count = total_hits,
            batch_count,
            threshold,
            "Starting extraction"
        );

        for (index, chunk) in request.hits.chunks(batch_size).enumerate() {
            if index > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }

            let batch_request = ClassificationRequest {
                industry: request.industry.clone(),
                location: request.location.clone(),
                hits: chunk.to_vec(),
            };
            let outcome = self
                .classify_batch(index, index * batch_size, batch_request)
                .await;

            report.batches += 1;
            if outcome.is_failed() {
                report.failed_batches += 1;
            }
            for hit in &outcome.hits {
                match hit {
                    HitOutcome::Accepted(b) => {
                        report.counts.accepted += 1;
                        report.accepted.push(b.clone());
                        report.classified.push(b.clone());
                    }
                    HitOutcome::Rejected(b) => {
                        report.counts.rejected += 1;
                        report.classified.push(b.clone());
                    }
                    HitOutcome::Errored(_) => report.counts.errored += 1,
                }
            }

            if let Some(observer) = observer {
                if let Err(e) = observer.on_batch(&outcome, total_hits).await {
                    warn!(
                        subsystem = "inference",
                        component = "pipeline",
                        op = "observe",
                        batch = index,
                        error = %e,
                        "Batch observer failed"
                    );
                }
            }
        }

        report.extraction_quality = report.counts.extraction_quality();

        info!(
            subsystem = "inference",
            component = "pipeline",
            op = "run",
            accepted = report.counts.accepted,
            rejected = report.counts.rejected,
            errored = report.counts.errored,
            failed_batches = report.failed_batches,
            extraction_quality = report.extraction_quality,
            duration_ms = start.elapsed().as_millis() as u64,
            "Extraction complete"
        );
        Ok(report)
    }

    async fn classify_batch(
        &self,
        index: usize,
        offset: usize,
        request: ClassificationRequest,
    ) -> BatchOutcome {
        let prompt = build_prompt(&request);
        let start = Instant::now();

        let reply = match tokio::time::timeout(
            self.config.classifier_timeout,
            self.classifier.classify(&prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "classifier call exceeded {}s",
                self.config.classifier_timeout.as_secs_f64()
            ))),
        };
        let elapsed_ms = start.elapsed().as_millis() as i64;

        let (raw_reply, verdicts) = match reply {
            Ok(raw) => {
                let verdicts = self.judge(&raw, &request.hits);
                (Some(raw), verdicts)
            }
            Err(e) => (None, Err(e)),
        };

        match verdicts {
            Ok(hits) => {
                debug!(
                    subsystem = "inference",
                    component = "pipeline",
                    op = "classify_batch",
                    batch = index,
                    hit_count = hits.len(),
                    duration_ms = elapsed_ms,
                    "Batch classified"
                );
                BatchOutcome {
                    index,
                    offset,
                    prompt,
                    raw_reply,
                    error: None,
                    elapsed_ms,
                    hits,
                }
            }
            Err(e) => {
                warn!(
                    subsystem = "inference",
                    component = "pipeline",
                    op = "classify_batch",
                    batch = index,
                    hit_count = request.hits.len(),
                    error = %e,
                    "Batch failed, counting hits as errored"
                );
                let message = e.to_string();
                BatchOutcome {
                    index,
                    offset,
                    hits: vec![HitOutcome::Errored(message.clone()); request.hits.len()],
                    prompt,
                    raw_reply,
                    error: Some(message),
                    elapsed_ms,
                }
            }
        }
    }

    /// Apply the strict schema and the acceptance rule to one reply.
    fn judge(&self, raw: &str, hits: &[SearchHit]) -> Result<Vec<HitOutcome>> {
        let reply = ClassifierReply::parse_strict(raw)?;
        if hits.len() > 1 {
            reply.validate_for_batch(hits.len())?;
        }

        let threshold = self.config.confidence_threshold;
        hits.iter()
            .enumerate()
            .map(|(position, hit)| {
                let entry = reply.entry_for(&hit.url, position).ok_or_else(|| {
                    Error::Classification("reply has no entry for hit".to_string())
                })?;
                Ok(if entry.is_accepted(threshold) {
                    HitOutcome::Accepted(entry.clone())
                } else {
                    HitOutcome::Rejected(entry.clone())
                })
            })
            .collect()
    }
}
