//! Document metadata extraction (§4.2: "call metadata extractor with
//! `(file_name, header, footer, signature, first-500-words(clean))`").

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct MetadataExtractionInput<'a> {
    pub file_name: &'a str,
    pub header: Option<&'a str>,
    pub footer: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub excerpt: &'a str,
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("model call failed: {0}")]
    Model(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The model-driven metadata extractor collaborator. §7 treats its failure
/// as fatal for the batch by default (a programming/data invariant), though
/// §9(c) flags that degrading to empty metadata may be preferable; see
/// DESIGN.md for the decision kept here.
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    async fn extract(
        &self,
        input: MetadataExtractionInput<'_>,
    ) -> Result<serde_json::Value, MetadataError>;
}

/// "Generic" files skip metadata entirely (§4.2: "Excel... 'Generic' files
/// skip metadata").
pub fn skips_metadata(kind: crate::dispatch::FileKind) -> bool {
    matches!(kind, crate::dispatch::FileKind::Generic)
}
