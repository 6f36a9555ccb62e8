//! Lineage tests against the in-memory backend.
//!
//! Covers:
//! - accepted/rejected/error classification rows
//! - audit truncation of prompt and reply
//! - linking a saved business and reading back the full trace
//! - persistence failure while finalising a row

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use sitescout_core::{
    Error, LlmProcessingResult, LlmProcessingSession, LlmResultStatus,
    LlmSessionStatus, NewBusinessEntry, ProcessingCounts, Result, SearchHit, TraceRepository,
};
use sitescout_db::{MemoryStore, RecorderConfig, RecordResultRequest, Repositories, TraceConfig};

// ============================================================================
// FIXTURES
// ============================================================================

fn acme_reply() -> String {
    json!({"businesses": [
        {
            "website": "acmeplumbing.com",
            "companyName": "Acme Plumbing",
            "isCompanyWebsite": true,
            "confidence": 0.92,
            "extractedFrom": "title",
            "city": "Springfield",
            "stateProvince": "IL",
            "country": "US",
            "categories": ["plumbing"]
        },
        {
            "website": "directoryhub.com",
            "companyName": null,
            "isCompanyWebsite": false,
            "confidence": 0.4,
            "extractedFrom": "url",
            "city": null,
            "stateProvince": null,
            "country": null,
            "categories": []
        }
    ]})
    .to_string()
}

async fn seeded(repos: &Repositories) -> (Uuid, Vec<Uuid>) {
    let recorder = repos.recorder(RecorderConfig::default());
    let session = recorder
        .create_session(&["plumbers springfield"], Some("plumbing"), Some("Springfield, IL"))
        .await
        .unwrap();
    recorder
        .add_results(
            session.id,
            &[
                SearchHit::new("Acme Plumbing – 24/7 Service", "acmeplumbing.com", ""),
                SearchHit::new("Best Plumbers in Springfield – Top 10", "directoryhub.com", ""),
            ],
        )
        .await
        .unwrap();
    let ids = recorder
        .list_results(session.id, false)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    (session.id, ids)
}

fn request<'a>(
    search_result_id: Uuid,
    llm_session_id: Uuid,
    raw_reply: &'a str,
    batch_position: usize,
) -> RecordResultRequest<'a> {
    RecordResultRequest {
        search_result_id,
        llm_session_id,
        prompt: "classify these hits",
        raw_reply,
        elapsed_ms: 120,
        batch_position,
        batch_size: 2,
        confidence_threshold: 0.7,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_record_accepted_and_rejected() {
    let repos = Repositories::in_memory();
    let trace = repos.traceability();
    let (session_id, hits) = seeded(&repos).await;

    let run = trace.create_llm_session(session_id, hits.len()).await.unwrap();
    assert_eq!(run.status, LlmSessionStatus::Pending);
    trace.start_llm_session(run.id).await.unwrap();

    let reply = acme_reply();
    let acme = trace
        .record_result(request(hits[0], run.id, &reply, 0))
        .await
        .unwrap();
    let hub = trace
        .record_result(request(hits[1], run.id, &reply, 1))
        .await
        .unwrap();

    assert_eq!(acme.status, LlmResultStatus::Accepted);
    assert_eq!(acme.company_name.as_deref(), Some("Acme Plumbing"));
    assert_eq!(hub.status, LlmResultStatus::Rejected);

    let unprocessed = repos.sessions.list_results(session_id, true).await.unwrap();
    assert!(unprocessed.is_empty());
}

#[tokio::test]
async fn test_unparseable_reply_becomes_error_row() {
    let repos = Repositories::in_memory();
    let trace = repos.traceability();
    let (session_id, hits) = seeded(&repos).await;
    let run = trace.create_llm_session(session_id, 2).await.unwrap();

    let row = trace
        .record_result(request(hits[0], run.id, "{\"results\": []}", 0))
        .await
        .unwrap();

    assert_eq!(row.status, LlmResultStatus::Error);
    assert!(row.error_message.unwrap().contains("Classification error"));

    let stored = repos.trace.get_result(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, LlmResultStatus::Error);

    // Errored hits stay eligible for a later run.
    let unprocessed = repos.sessions.list_results(session_id, true).await.unwrap();
    assert_eq!(unprocessed.len(), 2);
}

#[tokio::test]
async fn test_reply_count_mismatch_is_error() {
    let repos = Repositories::in_memory();
    let trace = repos.traceability();
    let (session_id, hits) = seeded(&repos).await;
    let run = trace.create_llm_session(session_id, 2).await.unwrap();

    let mut reply: serde_json::Value = serde_json::from_str(&acme_reply()).unwrap();
    reply["businesses"].as_array_mut().unwrap().pop();
    let raw = reply.to_string();

    let row = trace
        .record_result(request(hits[0], run.id, &raw, 0))
        .await
        .unwrap();
    assert_eq!(row.status, LlmResultStatus::Error);
}

#[tokio::test]
async fn test_audit_copies_are_truncated() {
    let repos = Repositories::in_memory();
    let trace = repos.traceability().with_config(TraceConfig {
        prompt_chars: 10,
        response_chars: 20,
    });
    let (session_id, hits) = seeded(&repos).await;
    let run = trace.create_llm_session(session_id, 2).await.unwrap();

    let reply = acme_reply();
    let long_prompt = "p".repeat(5000);
    let mut req = request(hits[0], run.id, &reply, 0);
    req.prompt = &long_prompt;
    let row = trace.record_result(req).await.unwrap();

    assert_eq!(row.prompt_excerpt.unwrap().chars().count(), 10);
    assert_eq!(row.response_excerpt.unwrap().chars().count(), 20);
    assert_eq!(row.status, LlmResultStatus::Accepted);
}

#[tokio::test]
async fn test_link_and_full_trace() {
    let repos = Repositories::in_memory();
    let trace = repos.traceability();
    let (session_id, hits) = seeded(&repos).await;
    let run = trace.create_llm_session(session_id, 2).await.unwrap();

    let reply = acme_reply();
    let acme = trace
        .record_result(request(hits[0], run.id, &reply, 0))
        .await
        .unwrap();
    let hub = trace
        .record_result(request(hits[1], run.id, &reply, 1))
        .await
        .unwrap();

    let saved = repos
        .directory_writer()
        .upsert(&NewBusinessEntry {
            website: "acmeplumbing.com".into(),
            company_name: Some("Acme Plumbing".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    trace.link_saved_business(acme.id, saved.id).await.unwrap();

    // Rejected rows never link.
    let err = trace.link_saved_business(hub.id, saved.id).await.unwrap_err();
    assert!(err.is_validation());

    trace
        .complete_llm_session(
            run.id,
            ProcessingCounts {
                accepted: 1,
                rejected: 1,
                errored: 0,
            },
        )
        .await
        .unwrap();

    let full = trace.get_full_trace(session_id).await.unwrap();
    assert_eq!(full.llm_sessions.len(), 1);
    assert_eq!(full.llm_sessions[0].extraction_quality, Some(0.5));
    assert_eq!(full.results.len(), 2);

    let first = &full.results[0];
    assert_eq!(first.search_result.url, "acmeplumbing.com");
    assert_eq!(first.classifications.len(), 1);
    let business = first.classifications[0].saved_business.as_ref().unwrap();
    assert_eq!(business.website, "acmeplumbing.com");

    assert!(full.results[1].classifications[0].saved_business.is_none());
}

#[tokio::test]
async fn test_link_unknown_business() {
    let repos = Repositories::in_memory();
    let trace = repos.traceability();
    let (session_id, hits) = seeded(&repos).await;
    let run = trace.create_llm_session(session_id, 2).await.unwrap();
    let reply = acme_reply();
    let acme = trace
        .record_result(request(hits[0], run.id, &reply, 0))
        .await
        .unwrap();

    let err = trace
        .link_saved_business(acme.id, sitescout_core::new_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_trace_unknown_session() {
    let repos = Repositories::in_memory();
    let err = repos
        .traceability()
        .get_full_trace(sitescout_core::new_v7())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ============================================================================
// PERSISTENCE FAILURE
// ============================================================================

/// Trace repository whose finalise step always fails.
struct FailingFinalize {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl TraceRepository for FailingFinalize {
    async fn insert_session(&self, session: &LlmProcessingSession) -> Result<()> {
        self.inner.insert_session(session).await
    }
    async fn get_session(&self, id: Uuid) -> Result<Option<LlmProcessingSession>> {
        self.inner.get_session(id).await
    }
    async fn set_session_status(&self, id: Uuid, status: LlmSessionStatus) -> Result<()> {
        self.inner.set_session_status(id, status).await
    }
    async fn complete_session(
        &self,
        id: Uuid,
        counts: ProcessingCounts,
        quality: f64,
    ) -> Result<LlmProcessingSession> {
        self.inner.complete_session(id, counts, quality).await
    }
    async fn list_sessions(&self, id: Uuid) -> Result<Vec<LlmProcessingSession>> {
        self.inner.list_sessions(id).await
    }
    async fn insert_result(&self, result: &LlmProcessingResult) -> Result<()> {
        self.inner.insert_result(result).await
    }
    async fn update_result(&self, result: &LlmProcessingResult) -> Result<()> {
        self.inner.update_result(result).await
    }
    async fn finalize_result(&self, _result: &LlmProcessingResult) -> Result<()> {
        Err(Error::Persistence("disk full".to_string()))
    }
    async fn get_result(&self, id: Uuid) -> Result<Option<LlmProcessingResult>> {
        TraceRepository::get_result(self.inner.as_ref(), id).await
    }
    async fn link_business(&self, result_id: Uuid, business_id: Uuid) -> Result<()> {
        self.inner.link_business(result_id, business_id).await
    }
    async fn list_results_for_search_session(
        &self,
        id: Uuid,
    ) -> Result<Vec<LlmProcessingResult>> {
        self.inner.list_results_for_search_session(id).await
    }
}

#[tokio::test]
async fn test_finalize_failure_recorded_as_error() {
    let store = Arc::new(MemoryStore::new());
    let mut repos = Repositories::from_memory(store.clone());
    repos.trace = Arc::new(FailingFinalize {
        inner: store.clone(),
    });
    let trace = repos.traceability();
    let (session_id, hits) = seeded(&repos).await;
    let run = trace.create_llm_session(session_id, 2).await.unwrap();

    let reply = acme_reply();
    let row = trace
        .record_result(request(hits[0], run.id, &reply, 0))
        .await
        .unwrap();

    assert_eq!(row.status, LlmResultStatus::Error);
    assert!(row.error_message.unwrap().contains("disk full"));

    let stored = TraceRepository::get_result(store.as_ref(), row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LlmResultStatus::Error);
}
