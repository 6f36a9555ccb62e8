//! OpenAI-compatible generation backend implementation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use sitescout_core::{defaults, Error, GenerationBackend, Result};

use super::error::FailureKind;
use super::types::{CompletionReply, CompletionRequest, ErrorEnvelope, ReplyFormat, Turn};

/// Endpoint, credentials and sampling settings for classification calls.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Chat completions root, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Sent as a bearer token. Local endpoints usually need none.
    pub api_key: Option<String>,
    pub gen_model: String,
    /// Whole-request deadline, including reading the reply.
    pub timeout_seconds: u64,
    /// Ask the endpoint for a JSON object reply.
    pub json_mode: bool,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::OPENAI_URL.to_string(),
            api_key: None,
            gen_model: defaults::GEN_MODEL.to_string(),
            timeout_seconds: defaults::GEN_TIMEOUT_SECS,
            json_mode: true,
            temperature: Some(0.0),
        }
    }
}

impl OpenAIConfig {
    /// Environment variables:
    /// - `OPENAI_BASE_URL`: endpoint (default: https://api.openai.com/v1)
    /// - `OPENAI_API_KEY`: bearer token
    /// - `OPENAI_GEN_MODEL`: model (default: gpt-4o-mini)
    /// - `OPENAI_TIMEOUT`: request timeout in seconds (default: 120)
    /// - `OPENAI_JSON_MODE`: request JSON replies (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            gen_model: std::env::var("OPENAI_GEN_MODEL").unwrap_or(defaults.gen_model),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_seconds),
            json_mode: std::env::var("OPENAI_JSON_MODE")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(defaults.json_mode),
            temperature: defaults.temperature,
        }
    }
}

/// [`GenerationBackend`] over any chat completions endpoint.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Fails only if the HTTP client cannot be built.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            op = "init",
            base_url = %config.base_url,
            model = %config.gen_model,
            json_mode = config.json_mode,
            "Initializing OpenAI backend"
        );

        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let base = self.config.base_url.trim_end_matches('/');
        let req = self.client.post(format!("{}{}", base, endpoint));
        match self.config.api_key.as_deref() {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let start = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(Turn::system(system));
        }
        messages.push(Turn::user(prompt));

        let request = CompletionRequest {
            model: &self.config.gen_model,
            messages,
            temperature: self.config.temperature,
            response_format: self.config.json_mode.then_some(ReplyFormat::JSON_OBJECT),
        };

        let response = self
            .build_request("/chat/completions")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let envelope: ErrorEnvelope = response.json().await.unwrap_or_default();
            let kind = FailureKind::classify(status.as_u16(), &envelope.error);
            warn!(
                subsystem = "inference",
                component = "openai",
                op = "generate",
                status = status.as_u16(),
                failure = ?kind,
                transient = kind.is_transient(),
                "Completion request rejected"
            );
            return Err(kind.into_error(status.as_u16(), &envelope.error));
        }

        let reply: CompletionReply = response
            .json()
            .await
            .map_err(|e| Error::Classification(format!("unreadable completion: {}", e)))?;
        let content = reply
            .into_text()
            .ok_or_else(|| Error::Classification("completion has no content".to_string()))?;

        debug!(
            subsystem = "inference",
            component = "openai",
            op = "generate",
            model = %self.config.gen_model,
            prompt_len = prompt.len(),
            response_len = content.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenAIConfig::default();
        assert_eq!(config.base_url, defaults::OPENAI_URL);
        assert_eq!(config.gen_model, defaults::GEN_MODEL);
        assert_eq!(config.timeout_seconds, defaults::GEN_TIMEOUT_SECS);
        assert!(config.json_mode);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_model_name_accessor() {
        let config = OpenAIConfig {
            gen_model: "test-gen".to_string(),
            ..Default::default()
        };
        let backend = OpenAIBackend::new(config).unwrap();
        assert_eq!(backend.model_name(), "test-gen");
    }
}
