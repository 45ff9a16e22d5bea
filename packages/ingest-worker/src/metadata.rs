//! Model-driven `MetadataExtractor` (§4.2: "call metadata extractor with
//! `(file_name, header, footer, signature, first-500-words(clean))`").

use std::sync::Arc;

use async_trait::async_trait;
use graph_extract::ModelClient;
use graph_loaders::{MetadataError, MetadataExtractionInput, MetadataExtractor};

const SCHEMA_NAME: &str = "document_metadata";

fn schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": { "type": "string" },
            "summary": { "type": "string" },
            "tags": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["title", "summary", "tags"],
        "additionalProperties": false
    })
}

pub struct ModelMetadataExtractor {
    model: Arc<dyn ModelClient>,
}

impl ModelMetadataExtractor {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl MetadataExtractor for ModelMetadataExtractor {
    async fn extract(
        &self,
        input: MetadataExtractionInput<'_>,
    ) -> Result<serde_json::Value, MetadataError> {
        let system = "Extract a short title, one-paragraph summary and a handful of topical \
                      tags from the document excerpt below. Respond with nothing else.";
        let user = format!(
            "file_name: {}\nheader: {}\nfooter: {}\nsignature: {}\n\nexcerpt:\n{}",
            input.file_name,
            input.header.unwrap_or(""),
            input.footer.unwrap_or(""),
            input.signature.unwrap_or(""),
            input.excerpt,
        );

        let raw = self
            .model
            .generate_structured(system, &user, schema(), SCHEMA_NAME)
            .await
            .map_err(|e| MetadataError::Model(Box::new(e)))?;

        serde_json::from_str(&raw).map_err(|e| MetadataError::Model(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_extract::ModelError;

    struct StubModel(String);

    #[async_trait]
    impl ModelClient for StubModel {
        async fn generate_structured(
            &self,
            _system: &str,
            _user: &str,
            _schema: serde_json::Value,
            _schema_name: &str,
        ) -> Result<String, ModelError> {
            Ok(self.0.clone())
        }

        async fn generate_text(&self, _system: &str, _user: &str) -> Result<String, ModelError> {
            Ok(self.0.clone())
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
            Ok(vec![])
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn parses_the_models_json_into_metadata() {
        let model: Arc<dyn ModelClient> = Arc::new(StubModel(
            r#"{"title":"Q3 report","summary":"Quarterly numbers.","tags":["finance"]}"#.to_string(),
        ));
        let extractor = ModelMetadataExtractor::new(model);

        let value = extractor
            .extract(MetadataExtractionInput {
                file_name: "q3.pdf",
                header: None,
                footer: None,
                signature: None,
                excerpt: "Revenue grew 12%...",
            })
            .await
            .unwrap();

        assert_eq!(value["title"], "Q3 report");
        assert_eq!(value["tags"][0], "finance");
    }

    #[tokio::test]
    async fn surfaces_unparsable_model_output_as_an_error() {
        let model: Arc<dyn ModelClient> = Arc::new(StubModel("not json".to_string()));
        let extractor = ModelMetadataExtractor::new(model);

        let result = extractor
            .extract(MetadataExtractionInput {
                file_name: "q3.pdf",
                header: None,
                footer: None,
                signature: None,
                excerpt: "...",
            })
            .await;

        assert!(result.is_err());
    }
}
