//! Provider-agnostic `ModelClient` implementation (graph-extract's seam,
//! §1 "model client") backed by `openai-client`'s pure REST client. OpenAI
//! and OpenRouter are both OpenAI-compatible chat/embedding APIs, so the
//! only difference between them is `base_url` + API key.

use async_trait::async_trait;
use graph_extract::{ModelClient, ModelError};
use openai_client::{ChatRequest, Message, OpenAIClient, StructuredRequest};

/// Which OpenAI-compatible provider to talk to. OpenRouter proxies the same
/// chat-completions/embeddings shape under a different base URL.
#[derive(Debug, Clone)]
pub enum Provider {
    OpenAI,
    OpenRouter,
}

impl Provider {
    fn base_url(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiClientConfig {
    pub provider: Provider,
    pub api_key: String,
    pub chat_model: String,
    pub embedding_model: String,
}

impl AiClientConfig {
    /// Reads `AI_PROVIDER` (`openai` default, or `openrouter`), the matching
    /// API key variable, and `AI_CHAT_MODEL`/`AI_EMBEDDING_MODEL` (defaults
    /// `gpt-4o-mini`/`text-embedding-3-small`).
    pub fn from_env() -> anyhow::Result<Self> {
        let provider = match std::env::var("AI_PROVIDER").as_deref() {
            Ok("openrouter") => Provider::OpenRouter,
            _ => Provider::OpenAI,
        };
        let api_key = match provider {
            Provider::OpenAI => std::env::var("OPENAI_API_KEY"),
            Provider::OpenRouter => std::env::var("OPENROUTER_API_KEY"),
        }
        .map_err(|_| anyhow::anyhow!("no API key set for the configured AI_PROVIDER"))?;

        Ok(Self {
            provider,
            api_key,
            chat_model: std::env::var("AI_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: std::env::var("AI_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        })
    }
}

/// Wraps `OpenAIClient` to satisfy `graph_extract::ModelClient`.
pub struct AiClient {
    inner: OpenAIClient,
    chat_model: String,
    embedding_model: String,
}

impl AiClient {
    pub fn new(config: AiClientConfig) -> Self {
        let inner = OpenAIClient::new(config.api_key).with_base_url(config.provider.base_url());
        Self {
            inner,
            chat_model: config.chat_model,
            embedding_model: config.embedding_model,
        }
    }
}

fn to_model_error(e: impl std::error::Error + Send + Sync + 'static) -> ModelError {
    ModelError::Request(Box::new(e))
}

#[async_trait]
impl ModelClient for AiClient {
    async fn generate_structured(
        &self,
        system: &str,
        user: &str,
        schema: serde_json::Value,
        schema_name: &str,
    ) -> Result<String, ModelError> {
        let mut request = StructuredRequest::new(self.chat_model.clone(), system, user, schema);
        request.response_format.json_schema.name = schema_name.to_string();
        self.inner
            .structured_output(request)
            .await
            .map_err(to_model_error)
    }

    async fn generate_text(&self, system: &str, user: &str) -> Result<String, ModelError> {
        let request = ChatRequest::new(self.chat_model.clone())
            .message(Message::system(system))
            .message(Message::user(user));
        self.inner
            .chat_completion(request)
            .await
            .map(|r| r.content)
            .map_err(to_model_error)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        self.inner
            .create_embedding(text, &self.embedding_model)
            .await
            .map_err(to_model_error)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        self.inner
            .create_embeddings_batch(&refs, &self.embedding_model)
            .await
            .map_err(to_model_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_base_urls_are_openai_compatible() {
        assert_eq!(Provider::OpenAI.base_url(), "https://api.openai.com/v1");
        assert_eq!(Provider::OpenRouter.base_url(), "https://openrouter.ai/api/v1");
    }
}
