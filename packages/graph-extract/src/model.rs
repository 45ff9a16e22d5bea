//! The model client collaborator (§1 "model client", §2 "Extractor"). The
//! real LLM/embedding backend is out of scope; this trait is the seam
//! `openai-client`'s `OpenAIClient` satisfies (its `structured_output`,
//! `create_embedding` and `create_embeddings_batch` methods map directly
//! onto it).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("model request cancelled")]
    Cancelled,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Structured-output chat completion (§4.3: "Call the model in
    /// structured-output mode"). Returns the raw JSON text the model
    /// produced; callers run it through [`crate::json_repair`] before
    /// deserializing, since real models occasionally emit almost-JSON
    /// (§7, §9 "Structured-output flexibility").
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
        schema_name: &str,
    ) -> Result<String, ModelError>;

    /// Free-form completion, used by the document-local and cross-document
    /// dedupers for their duplicate-group prompts (§4.3, §4.6), which ask
    /// for strict JSON without a named schema.
    async fn generate_text(&self, system: &str, user: &str) -> Result<String, ModelError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Bounds concurrent in-flight model calls process-wide
/// (`AI_PARALLEL_REQ`, default 10, §5, §6).
pub struct RateLimitedModelClient<C> {
    inner: C,
    semaphore: std::sync::Arc<tokio::sync::Semaphore>,
}

impl<C: ModelClient> RateLimitedModelClient<C> {
    pub fn new(inner: C, max_parallel: usize) -> Self {
        Self {
            inner,
            semaphore: std::sync::Arc::new(tokio::sync::Semaphore::new(max_parallel.max(1))),
        }
    }
}

#[async_trait]
impl<C: ModelClient> ModelClient for RateLimitedModelClient<C> {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
        schema_name: &str,
    ) -> Result<String, ModelError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ModelError::Cancelled)?;
        self.inner
            .generate_structured(system, user, schema, schema_name)
            .await
    }

    async fn generate_text(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ModelError::Cancelled)?;
        self.inner.generate_text(system, user).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ModelError::Cancelled)?;
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ModelError::Cancelled)?;
        self.inner.embed_batch(texts).await
    }
}
