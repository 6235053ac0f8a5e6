//! Event classification: urgency plus dated action items.
//!
//! Two backends:
//! - **LLM**: OpenAI chat completions with a JSON-object response
//! - **Keyword**: offline urgency keywords and explicit timestamps
//!
//! The backend is chosen once at startup and held as `Arc<dyn Classifier>`.

pub mod keyword;
pub mod llm;

pub use keyword::KeywordClassifier;
pub use llm::{LlmClassifier, LlmConfig};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ClassifyError;
use crate::pipeline::types::{ClassificationResult, Event};

/// Decides urgency and extracts action items for one event.
///
/// Implementations must return `ClassifyError::Cancelled` promptly once
/// `cancel` fires rather than hanging on the backend.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    async fn classify(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassifyError>;
}

/// Pick the LLM backend when configured, otherwise the keyword fallback.
pub fn create_classifier(config: Option<LlmConfig>) -> Arc<dyn Classifier> {
    match config {
        Some(config) => {
            tracing::info!(model = %config.model, "Using LLM classifier");
            Arc::new(LlmClassifier::new(config))
        }
        None => {
            tracing::info!("No LLM configured, using keyword classifier");
            Arc::new(KeywordClassifier::new())
        }
    }
}
