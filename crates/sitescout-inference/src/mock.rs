//! Mock classifier and generation backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sitescout_inference::mock::{reply_json, MockClassifier};
//!
//! let classifier = MockClassifier::from_fn(|prompt| {
//!     let entries = prompt.request.hits.iter().map(|h| company(&h.url)).collect::<Vec<_>>();
//!     Ok(reply_json(&entries))
//! });
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use sitescout_core::{
    BatchClassifier, ClassifiedBusiness, ClassifierPrompt, ClassifierReply, Error,
    GenerationBackend, Result,
};

/// Serialise entries as a conforming classifier reply.
pub fn reply_json(businesses: &[ClassifiedBusiness]) -> String {
    let reply = ClassifierReply {
        businesses: businesses.to_vec(),
    };
    serde_json::to_string(&reply).unwrap_or_default()
}

type ReplyFn = dyn Fn(&ClassifierPrompt) -> Result<String> + Send + Sync;

enum Source {
    Function(Box<ReplyFn>),
    Script(Mutex<VecDeque<Result<String>>>),
}

/// Batch classifier answering from a closure or a fixed script.
#[derive(Clone)]
pub struct MockClassifier {
    source: Arc<Source>,
    latency: Duration,
    calls: Arc<Mutex<Vec<ClassifierPrompt>>>,
}

impl MockClassifier {
    /// Answer every call with `f(prompt)`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ClassifierPrompt) -> Result<String> + Send + Sync + 'static,
    {
        Self::with_source(Source::Function(Box::new(f)))
    }

    /// Answer calls with `replies` in order; further calls fail.
    pub fn scripted(replies: Vec<Result<String>>) -> Self {
        Self::with_source(Source::Script(Mutex::new(replies.into())))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source: Arc::new(source),
            latency: Duration::ZERO,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<ClassifierPrompt> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl BatchClassifier for MockClassifier {
    async fn classify(&self, prompt: &ClassifierPrompt) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.clone());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.source.as_ref() {
            Source::Function(f) => f(prompt),
            Source::Script(script) => script
                .lock()
                .map_err(|_| Error::Internal("mock script poisoned".to_string()))?
                .pop_front()
                .unwrap_or_else(|| Err(Error::Classification("no scripted reply left".to_string()))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Generation backend returning a fixed response.
#[derive(Clone)]
pub struct MockGenerationBackend {
    response: String,
    model: String,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self {
            response: "{\"businesses\": []}".to_string(),
            model: "mock-model".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    /// Recorded `(system, prompt)` pairs.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl GenerationBackend for MockGenerationBackend {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((system.to_string(), prompt.to_string()));
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LlmClassifier;
    use crate::prompt::build_prompt;
    use sitescout_core::{ClassificationRequest, SearchHit};

    fn prompt() -> ClassifierPrompt {
        build_prompt(&ClassificationRequest {
            hits: vec![SearchHit::new("Acme", "acme.com", "")],
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let mock = MockClassifier::scripted(vec![Ok("a".into()), Ok("b".into())]);
        assert_eq!(mock.classify(&prompt()).await.unwrap(), "a");
        assert_eq!(mock.classify(&prompt()).await.unwrap(), "b");
        assert!(mock.classify(&prompt()).await.is_err());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_llm_classifier_sends_system_and_user() {
        let backend = MockGenerationBackend::new().with_fixed_response("{\"businesses\": []}");
        let classifier = LlmClassifier::new(Arc::new(backend.clone()));
        let p = prompt();

        let raw = classifier.classify(&p).await.unwrap();
        assert_eq!(raw, "{\"businesses\": []}");
        assert_eq!(classifier.name(), "mock-model");

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, p.system);
        assert_eq!(calls[0].1, p.user);
    }

    #[test]
    fn test_reply_json_round_trips_through_strict_parser() {
        let entry = ClassifiedBusiness {
            website: "acme.com".into(),
            company_name: None,
            is_company_website: true,
            confidence: 0.8,
            extracted_from: None,
            city: None,
            state_province: None,
            country: None,
            categories: vec![],
        };
        let parsed = ClassifierReply::parse_strict(&reply_json(&[entry.clone()])).unwrap();
        assert_eq!(parsed.businesses, vec![entry]);
    }
}
