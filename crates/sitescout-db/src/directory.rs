//! Idempotent business directory writes.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use sitescout_core::{
    normalize_website, ClassifiedBusiness, DirectoryItem, DirectoryRepository,
    DirectoryWriteResult, Error, NewBusinessEntry, Result, UpsertAction, UpsertOutcome,
};

/// Writes qualifying businesses into the directory, keyed by website.
#[derive(Clone)]
pub struct BusinessDirectoryWriter {
    directory: Arc<dyn DirectoryRepository>,
}

enum Decision {
    Skip(String),
    Fail(String),
    Write(NewBusinessEntry),
}

fn decide(candidate: &ClassifiedBusiness, threshold: f64) -> Decision {
    if !candidate.is_company_website {
        return Decision::Skip("not a company website".to_string());
    }
    if !candidate.is_accepted(threshold) {
        return Decision::Skip(format!(
            "confidence {:.2} below threshold {:.2}",
            candidate.confidence, threshold
        ));
    }
    match normalize_website(&candidate.website) {
        Some(website) => {
            let mut entry = candidate.to_new_entry();
            entry.website = website;
            Decision::Write(entry)
        }
        None => Decision::Fail(format!("invalid website: {}", candidate.website)),
    }
}

fn item(candidate: &ClassifiedBusiness, website: &str) -> DirectoryItem {
    DirectoryItem {
        website: website.to_string(),
        company_name: candidate.company_name.clone(),
        confidence: Some(candidate.confidence),
        business_id: None,
        reason: None,
    }
}

impl BusinessDirectoryWriter {
    pub fn new(directory: Arc<dyn DirectoryRepository>) -> Self {
        Self { directory }
    }

    /// Create or merge-update one entry by normalised website.
    pub async fn upsert(&self, entry: &NewBusinessEntry) -> Result<UpsertOutcome> {
        let website = normalize_website(&entry.website)
            .ok_or_else(|| Error::Validation(format!("invalid website: {}", entry.website)))?;
        let normalized = NewBusinessEntry {
            website,
            ..entry.clone()
        };

        let outcome = self
            .directory
            .upsert(&normalized)
            .await
            .map_err(|e| Error::Persistence(format!("upsert {}: {}", normalized.website, e)))?;

        debug!(
            subsystem = "db",
            component = "directory",
            op = "upsert",
            website = %outcome.website,
            action = ?outcome.action,
            "Directory entry written"
        );
        Ok(outcome)
    }

    /// Save every accepted candidate; the rest are skipped.
    ///
    /// Individual failures land in `details.failed` and never abort the batch.
    pub async fn save(
        &self,
        candidates: &[ClassifiedBusiness],
        threshold: f64,
    ) -> DirectoryWriteResult {
        let mut result = DirectoryWriteResult::default();

        for candidate in candidates {
            match decide(candidate, threshold) {
                Decision::Skip(reason) => {
                    result.details.skipped.push(DirectoryItem {
                        reason: Some(reason),
                        ..item(candidate, &candidate.website)
                    });
                }
                Decision::Fail(reason) => {
                    result.errors.push(reason.clone());
                    result.details.failed.push(DirectoryItem {
                        reason: Some(reason),
                        ..item(candidate, &candidate.website)
                    });
                }
                Decision::Write(entry) => match self.upsert(&entry).await {
                    Ok(outcome) => {
                        let saved = DirectoryItem {
                            business_id: Some(outcome.id),
                            ..item(candidate, &outcome.website)
                        };
                        match outcome.action {
                            UpsertAction::Created => result.details.created.push(saved),
                            UpsertAction::Updated => result.details.updated.push(saved),
                        }
                    }
                    Err(e) => {
                        warn!(
                            subsystem = "db",
                            component = "directory",
                            op = "save",
                            website = %entry.website,
                            error = %e,
                            "Directory write failed"
                        );
                        result.errors.push(format!("{}: {}", entry.website, e));
                        result.details.failed.push(DirectoryItem {
                            reason: Some(e.to_string()),
                            ..item(candidate, &entry.website)
                        });
                    }
                },
            }
        }

        Self::finish(&mut result, false);
        info!(
            subsystem = "db",
            component = "directory",
            op = "save",
            saved = result.saved,
            skipped = result.skipped,
            failed = result.details.failed.len(),
            "Directory write finished"
        );
        result
    }

    /// Preview what `save` would do without writing anything.
    pub async fn dry_run(
        &self,
        candidates: &[ClassifiedBusiness],
        threshold: f64,
    ) -> DirectoryWriteResult {
        let mut result = DirectoryWriteResult::default();
        let mut seen: HashSet<String> = HashSet::new();

        for candidate in candidates {
            match decide(candidate, threshold) {
                Decision::Skip(reason) => {
                    result.details.skipped.push(DirectoryItem {
                        reason: Some(reason),
                        ..item(candidate, &candidate.website)
                    });
                }
                Decision::Fail(reason) => {
                    result.errors.push(reason.clone());
                    result.details.failed.push(DirectoryItem {
                        reason: Some(reason),
                        ..item(candidate, &candidate.website)
                    });
                }
                Decision::Write(entry) => {
                    let existing = match self.directory.find_by_website(&entry.website).await {
                        Ok(existing) => existing,
                        Err(e) => {
                            result.errors.push(format!("{}: {}", entry.website, e));
                            result.details.failed.push(DirectoryItem {
                                reason: Some(e.to_string()),
                                ..item(candidate, &entry.website)
                            });
                            continue;
                        }
                    };

                    let preview = DirectoryItem {
                        business_id: existing.as_ref().map(|e| e.id),
                        ..item(candidate, &entry.website)
                    };
                    if existing.is_some() || !seen.insert(entry.website.clone()) {
                        result.details.updated.push(preview);
                    } else {
                        result.details.created.push(preview);
                    }
                }
            }
        }

        Self::finish(&mut result, true);
        debug!(
            subsystem = "db",
            component = "directory",
            op = "dry_run",
            saved = result.saved,
            skipped = result.skipped,
            "Directory preview computed"
        );
        result
    }

    fn finish(result: &mut DirectoryWriteResult, dry_run: bool) {
        result.dry_run = dry_run;
        result.saved = (result.details.created.len() + result.details.updated.len()) as u32;
        result.skipped = result.details.skipped.len() as u32;
        result.success = result.details.failed.is_empty();
    }
}
