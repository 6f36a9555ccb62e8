//! Direct classifier over a generation backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use sitescout_core::{BatchClassifier, ClassifierPrompt, GenerationBackend, Result};

/// Classifies a batch with a single chat completion.
#[derive(Clone)]
pub struct LlmClassifier {
    backend: Arc<dyn GenerationBackend>,
}

impl LlmClassifier {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl BatchClassifier for LlmClassifier {
    async fn classify(&self, prompt: &ClassifierPrompt) -> Result<String> {
        debug!(
            subsystem = "inference",
            component = "classifier",
            op = "classify",
            model = self.backend.model_name(),
            hit_count = prompt.request.hits.len(),
            "Classifying batch"
        );
        self.backend
            .generate_with_system(&prompt.system, &prompt.user)
            .await
    }

    fn name(&self) -> &str {
        self.backend.model_name()
    }
}
