//! The black-box per-format content loader seam (§2 "Content Loaders",
//! §4.2 table). Office-to-PDF, OCR, ASR and Excel-to-CSV conversion are
//! external processes out of scope for this crate (§1); this trait is what
//! the preprocess stage calls to get canonical UTF-8 text back — one
//! artifact per produced output (one per sheet for Excel, one otherwise).

use async_trait::async_trait;
use thiserror::Error;

use crate::dispatch::FileKind;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("content loader failed: {0}")]
    Converter(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// One produced text artifact tagged with whatever the page-count heuristic
/// (§4.2 table) needs for this `FileKind`.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    /// `Some` only for Excel outputs (§4.2: "one file per sheet named
    /// `<basename>_<sheet>.txt`, sheet names sorted lexicographically").
    pub sheet_name: Option<String>,
    pub raw_text: String,
    pub pdf_page_count: Option<u32>,
    pub row_count: Option<u32>,
}

#[async_trait]
pub trait ContentLoader: Send + Sync {
    /// Runs the loader chain for `kind` (§4.2 table) and returns the
    /// produced artifact(s), still carrying `<doc-header|footer|signature>`
    /// tags for the caller to strip.
    async fn load(
        &self,
        kind: FileKind,
        file_name: &str,
        raw_bytes: &[u8],
    ) -> Result<Vec<LoadedArtifact>, LoadError>;
}
