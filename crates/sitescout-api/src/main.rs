//! sitescout HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sitescout_api::{router, AppState};
use sitescout_core::{defaults, BatchClassifier};
use sitescout_db::{Database, RecorderConfig, Repositories};
use sitescout_inference::{ExtractionPipeline, LlmClassifier, OpenAIBackend, PipelineConfig};
use sitescout_jobs::{
    DelegatedClassifier, ExternalJobClient, ExternalJobTracker, JobManager, ManagerConfig,
    PollerHandle, SearchExtractionHandler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sitescout_api=debug,sitescout_jobs=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("sitescout-api.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(defaults::SERVER_PORT);

    // Storage
    let repos = match std::env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()) {
        Some(url) => {
            let db = Database::connect(&url)
                .await
                .context("connecting to database")?;
            db.migrate().await.context("running migrations")?;
            info!(subsystem = "api", "Using PostgreSQL storage");
            Repositories::from_database(&db)
        }
        None => {
            warn!(subsystem = "api", "DATABASE_URL not set, using in-memory storage");
            Repositories::in_memory()
        }
    };

    // Classifier
    let mut pipeline_config = PipelineConfig::from_env();
    let mode = std::env::var("CLASSIFIER_MODE").unwrap_or_else(|_| "direct".to_string());
    let mut poller: Option<PollerHandle> = None;
    let classifier: Arc<dyn BatchClassifier> = match mode.as_str() {
        "delegated" => {
            let client = ExternalJobClient::from_env().context("configuring external jobs")?;
            let config = client.config().clone();
            // A delegated batch may legitimately wait up to max_wait.
            let needed = config.max_wait + config.request_timeout;
            if pipeline_config.classifier_timeout < needed {
                pipeline_config = pipeline_config.with_classifier_timeout(needed);
            }
            let tracker = ExternalJobTracker::new(client, repos.jobs.clone());
            poller = Some(tracker.start_poller());
            info!(subsystem = "api", base_url = %config.base_url, "Classifying through external jobs");
            Arc::new(DelegatedClassifier::new(tracker))
        }
        "direct" => {
            let backend = OpenAIBackend::from_env().context("configuring generation backend")?;
            Arc::new(LlmClassifier::new(Arc::new(backend)))
        }
        other => anyhow::bail!("unknown CLASSIFIER_MODE: {}", other),
    };
    info!(
        subsystem = "api",
        classifier = classifier.name(),
        batch_size = pipeline_config.batch_size,
        confidence_threshold = pipeline_config.confidence_threshold,
        "Extraction pipeline configured"
    );
    let pipeline = ExtractionPipeline::new(classifier, pipeline_config);

    // Jobs
    let manager = JobManager::new(repos.jobs.clone(), ManagerConfig::from_env());
    manager
        .register_handler(SearchExtractionHandler::new(repos.clone(), pipeline))
        .await;
    let worker = manager.start().await?;

    let state = AppState::new(repos, manager, RecorderConfig::from_env());
    let app = router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down background workers");
    worker.shutdown().await;
    if let Some(poller) = poller {
        poller.shutdown().await;
    }
    Ok(())
}
