//! External job client and tracker tests against a mock compute endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sitescout_core::{
    BatchClassifier, ClassificationRequest, ClassifierPrompt, Error, JobStatus, JobStore, JobType,
    SearchHit,
};
use sitescout_db::MemoryStore;
use sitescout_jobs::{
    DelegatedClassifier, ExternalJobClient, ExternalJobConfig, ExternalJobSpec, ExternalJobTracker,
    CLASSIFY_BATCH, NOT_FOUND_MESSAGE,
};

fn tracker(server: &MockServer, store: Arc<MemoryStore>) -> ExternalJobTracker {
    let config = ExternalJobConfig::new(server.uri())
        .with_api_key("compute-key")
        .with_poll_interval(Duration::from_millis(10))
        .with_max_wait(Duration::from_secs(5));
    ExternalJobTracker::new(ExternalJobClient::new(config).unwrap(), store)
}

fn spec() -> ExternalJobSpec {
    ExternalJobSpec {
        job_type: CLASSIFY_BATCH.to_string(),
        payload: json!({"user": "classify these"}),
    }
}

async fn mount_submit(server: &MockServer, job_id: &str) {
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .and(header("authorization", "Bearer compute-key"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "jobId": job_id,
            "position": 2,
            "etaMs": 1500
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_submit_records_local_job() {
    let server = MockServer::start().await;
    mount_submit(&server, "ext-1").await;
    let store = Arc::new(MemoryStore::new());

    let job = tracker(&server, store.clone())
        .submit(JobType::DelegatedClassification, spec())
        .await
        .unwrap();

    let external = job.external.clone().unwrap();
    assert_eq!(external.external_id, "ext-1");
    assert_eq!(external.position, Some(2));
    assert!(external.poll_url.ends_with("/jobs/ext-1"));
    assert_eq!(job.progress.eta_ms, Some(1500));
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(store.get(job.id).await.unwrap(), Some(job));
}

#[tokio::test]
async fn test_failed_submit_creates_no_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("queue full"))
        .mount(&server)
        .await;
    let store = Arc::new(MemoryStore::new());

    let err = tracker(&server, store.clone())
        .submit(JobType::DelegatedClassification, spec())
        .await
        .unwrap_err();

    match err {
        Error::ExternalSystem { status, message } => {
            assert_eq!(status, Some(500));
            assert_eq!(message, "queue full");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_not_found_after_cached_result_completes() {
    let server = MockServer::start().await;
    mount_submit(&server, "ext-1").await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "status": "processing",
            "result": {"businesses": []}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(&server, store);
    let job = tracker
        .submit(JobType::DelegatedClassification, spec())
        .await
        .unwrap();

    let first = tracker.poll_once(job.id).await.unwrap().unwrap();
    assert_eq!(first.status, JobStatus::Processing);
    assert_eq!(first.progress.percentage, 10.0);
    assert_eq!(first.result, Some(json!({"businesses": []})));

    let second = tracker.poll_once(job.id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(second.progress.percentage, 100.0);
    assert_eq!(second.result, Some(json!({"businesses": []})));
}

#[tokio::test]
async fn test_not_found_without_result_fails() {
    let server = MockServer::start().await;
    mount_submit(&server, "ext-2").await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(&server, store);
    let job = tracker
        .submit(JobType::DelegatedClassification, spec())
        .await
        .unwrap();

    let polled = tracker.poll_once(job.id).await.unwrap().unwrap();
    assert_eq!(polled.status, JobStatus::Failed);
    assert_eq!(polled.error.as_deref(), Some(NOT_FOUND_MESSAGE));
}

#[tokio::test]
async fn test_transient_poll_error_leaves_job_untouched() {
    let server = MockServer::start().await;
    mount_submit(&server, "ext-3").await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-3"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let tracker = tracker(&server, store.clone());
    let job = tracker
        .submit(JobType::DelegatedClassification, spec())
        .await
        .unwrap();

    let polled = tracker.poll_once(job.id).await.unwrap().unwrap();
    assert_eq!(polled, job);
    assert_eq!(store.get(job.id).await.unwrap(), Some(job));
}

#[tokio::test]
async fn test_wait_gives_up_after_max_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "processing"})))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let config = ExternalJobConfig::new(server.uri())
        .with_poll_interval(Duration::from_millis(10))
        .with_max_wait(Duration::from_millis(100));
    let tracker = ExternalJobTracker::new(ExternalJobClient::new(config).unwrap(), store.clone());

    Mock::given(method("POST"))
        .and(path("/jobs"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"jobId": "ext-4"})))
        .mount(&server)
        .await;
    let job = tracker
        .submit(JobType::DelegatedClassification, spec())
        .await
        .unwrap();

    let err = tracker.wait_for_completion(job.id).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));

    let stored = store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert!(stored.progress.percentage > 0.0);
    assert!(stored.progress.percentage <= 90.0);
}

// ============================================================================
// DELEGATED CLASSIFIER
// ============================================================================

fn prompt() -> ClassifierPrompt {
    ClassifierPrompt {
        system: "You classify search hits.".to_string(),
        user: "1. Acme Plumbing acmeplumbing.com".to_string(),
        request: ClassificationRequest {
            industry: Some("plumbing".to_string()),
            location: None,
            hits: vec![SearchHit::new("Acme Plumbing", "acmeplumbing.com", "")],
        },
    }
}

#[tokio::test]
async fn test_delegated_classifier_returns_remote_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/jobs"))
        .and(body_partial_json(json!({
            "type": "classify_batch",
            "payload": {"user": "1. Acme Plumbing acmeplumbing.com"}
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"jobId": "ext-9"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "completed",
            "result": "{\"businesses\":[]}"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let classifier = DelegatedClassifier::new(tracker(&server, store.clone()));

    let reply = classifier.classify(&prompt()).await.unwrap();
    assert_eq!(reply, "{\"businesses\":[]}");
    assert_eq!(classifier.name(), "delegated");

    let jobs = store.list(Some(JobStatus::Completed)).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, JobType::DelegatedClassification);
}

#[tokio::test]
async fn test_delegated_classifier_surfaces_remote_failure() {
    let server = MockServer::start().await;
    mount_submit(&server, "ext-10").await;
    Mock::given(method("GET"))
        .and(path("/jobs/ext-10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "error": "model crashed"
        })))
        .mount(&server)
        .await;

    let classifier =
        DelegatedClassifier::new(tracker(&server, Arc::new(MemoryStore::new())));
    let err = classifier.classify(&prompt()).await.unwrap_err();
    match err {
        Error::Classification(message) => assert!(message.contains("model crashed")),
        other => panic!("unexpected error: {other:?}"),
    }
}
