//! HTTP API tests against the in-memory store.
//!
//! Each test serves the router on an ephemeral port and talks to it over
//! HTTP, with a scripted classifier behind the extraction job.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use sitescout_api::{router, AppState};
use sitescout_core::DirectoryRepository;
use sitescout_db::{RecorderConfig, Repositories};
use sitescout_inference::mock::MockClassifier;
use sitescout_inference::{ExtractionPipeline, PipelineConfig};
use sitescout_jobs::{JobManager, ManagerConfig, SearchExtractionHandler, WorkerHandle};

// ============================================================================
// HELPERS
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

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    repos: Repositories,
    worker: Option<WorkerHandle>,
}

impl TestServer {
    async fn spawn(start_worker: bool) -> Self {
        let repos = Repositories::in_memory();
        let pipeline = ExtractionPipeline::new(
            Arc::new(MockClassifier::from_fn(|_| Ok(acme_reply()))),
            PipelineConfig::default().with_batch_delay(Duration::ZERO),
        );
        let manager = JobManager::new(
            repos.jobs.clone(),
            ManagerConfig::default().with_idle_poll(Duration::from_millis(10)),
        );
        manager
            .register_handler(SearchExtractionHandler::new(repos.clone(), pipeline))
            .await;
        let worker = if start_worker {
            Some(manager.start().await.unwrap())
        } else {
            None
        };

        let state = AppState::new(repos.clone(), manager, RecorderConfig::default());
        let app = router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            client: reqwest::Client::new(),
            repos,
            worker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn submit(&self, body: Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/v1/searches"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn wait_job(&self, job_id: &str) -> Value {
        for _ in 0..500 {
            let job: Value = self
                .client
                .get(self.url(&format!("/api/v1/jobs/{}", job_id)))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if job["status"] == "completed" || job["status"] == "failed" {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", job_id);
    }
}

fn search_body() -> Value {
    json!({
        "queries": ["plumbers springfield"],
        "industry": "plumbing",
        "location": "Springfield, IL",
        "hits": [
            {"title": "Acme Plumbing – 24/7 Service", "link": "https://acmeplumbing.com", "snippet": ""},
            {"title": "Best Plumbers in Springfield – Top 10", "link": "https://directoryhub.com/plumbers", "snippet": ""}
        ]
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[tokio::test]
async fn test_health() {
    let server = TestServer::spawn(false).await;
    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_search_to_directory_and_trace() {
    let server = TestServer::spawn(true).await;

    let resp = server.submit(search_body()).await;
    assert_eq!(resp.status(), 202);
    let accepted: Value = resp.json().await.unwrap();
    assert_eq!(accepted["resultsRecorded"], 2);
    let job_id = accepted["jobId"].as_str().unwrap().to_string();
    let session_id = accepted["sessionId"].as_str().unwrap().to_string();

    let job = server.wait_job(&job_id).await;
    assert_eq!(job["status"], "completed", "job: {job}");
    let write = &job["result"]["directoryWrite"];
    assert_eq!(write["saved"], 1);
    assert_eq!(write["skipped"], 1);
    assert_eq!(write["chainProcessing"]["totalProcessed"], 2);

    let trace: Value = server
        .client
        .get(server.url(&format!("/api/v1/sessions/{}/trace", session_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trace["session"]["status"], "completed");
    assert_eq!(trace["results"].as_array().unwrap().len(), 2);
    assert_eq!(trace["llmSessions"].as_array().unwrap().len(), 1);

    let stats: Value = server
        .client
        .get(server.url("/api/v1/jobs/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["completed"], 1);

    let entries = server.repos.directory.list(10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].website, "acmeplumbing.com");

    if let Some(worker) = server.worker {
        worker.shutdown().await;
    }
}

#[tokio::test]
async fn test_invalid_search_creates_no_job() {
    let server = TestServer::spawn(false).await;

    let mut blank_queries = search_body();
    blank_queries["queries"] = json!(["   "]);
    let resp = server.submit(blank_queries).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("query"));

    let mut no_hits = search_body();
    no_hits["hits"] = json!([]);
    let resp = server.submit(no_hits).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no hits"));

    let mut bad_threshold = search_body();
    bad_threshold["threshold"] = json!(1.5);
    assert_eq!(server.submit(bad_threshold).await.status(), 400);

    let jobs: Value = server
        .client
        .get(server.url("/api/v1/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(jobs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_queued_job_then_conflict() {
    // Worker not started, so the job stays queued.
    let server = TestServer::spawn(false).await;
    let accepted: Value = server.submit(search_body()).await.json().await.unwrap();
    let job_id = accepted["jobId"].as_str().unwrap();

    let queued: Value = server
        .client
        .get(server.url("/api/v1/jobs?status=queued"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(queued.as_array().unwrap().len(), 1);

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/jobs/{}", job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cancelled: Value = resp.json().await.unwrap();
    assert_eq!(cancelled["status"], "failed");
    assert_eq!(cancelled["error"], "cancelled");

    let again = server
        .client
        .delete(server.url(&format!("/api/v1/jobs/{}", job_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let server = TestServer::spawn(false).await;
    let id = Uuid::new_v4();

    let job = server
        .client
        .get(server.url(&format!("/api/v1/jobs/{}", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(job.status(), 404);

    let trace = server
        .client
        .get(server.url(&format!("/api/v1/sessions/{}/trace", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(trace.status(), 404);

    let bad_status = server
        .client
        .get(server.url("/api/v1/jobs?status=paused"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_status.status(), 400);
}

#[tokio::test]
async fn test_directory_preview_writes_nothing() {
    let server = TestServer::spawn(false).await;
    let reply: Value = serde_json::from_str(&acme_reply()).unwrap();

    let resp = server
        .client
        .post(server.url("/api/v1/directory/preview"))
        .json(&json!({ "businesses": reply["businesses"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let preview: Value = resp.json().await.unwrap();
    assert_eq!(preview["dryRun"], true);
    assert_eq!(preview["saved"], 1);
    assert_eq!(preview["skipped"], 1);
    assert!(server.repos.directory.list(10).await.unwrap().is_empty());
}
