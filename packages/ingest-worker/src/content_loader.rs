//! The in-process `ContentLoader`. Handles the kinds that need no external
//! conversion (plain text, CSV, anything falling through to `Generic`) by
//! treating the raw bytes as UTF-8 text. Office/PDF/image/audio conversion
//! is a genuinely external process (OCR, ASR, office-to-PDF) and is left
//! unimplemented here — wire a real converter-backed `ContentLoader` for
//! those kinds before deploying against documents of those types.

use async_trait::async_trait;
use graph_loaders::{ContentLoader, FileKind, LoadError, LoadedArtifact};

pub struct PlainTextContentLoader;

#[async_trait]
impl ContentLoader for PlainTextContentLoader {
    async fn load(
        &self,
        kind: FileKind,
        file_name: &str,
        raw_bytes: &[u8],
    ) -> Result<Vec<LoadedArtifact>, LoadError> {
        match kind {
            FileKind::PlainText | FileKind::Csv | FileKind::Generic => {
                let raw_text = String::from_utf8_lossy(raw_bytes).into_owned();
                let row_count = match kind {
                    FileKind::Csv => Some(raw_text.lines().count() as u32),
                    _ => None,
                };
                Ok(vec![LoadedArtifact {
                    sheet_name: None,
                    raw_text,
                    pdf_page_count: None,
                    row_count,
                }])
            }
            FileKind::Office | FileKind::Pdf | FileKind::Image | FileKind::Audio | FileKind::Excel => {
                let message = format!("no converter configured for {file_name} ({kind:?})");
                Err(LoadError::Converter(Box::new(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    message,
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_plain_text() {
        let loader = PlainTextContentLoader;
        let artifacts = loader.load(FileKind::PlainText, "notes.txt", b"hello world").await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].raw_text, "hello world");
        assert_eq!(artifacts[0].row_count, None);
    }

    #[tokio::test]
    async fn counts_csv_rows() {
        let loader = PlainTextContentLoader;
        let artifacts = loader.load(FileKind::Csv, "data.csv", b"a,b\n1,2\n3,4").await.unwrap();
        assert_eq!(artifacts[0].row_count, Some(3));
    }

    #[tokio::test]
    async fn rejects_kinds_needing_a_real_converter() {
        let loader = PlainTextContentLoader;
        let result = loader.load(FileKind::Image, "scan.png", b"\x89PNG").await;
        assert!(result.is_err());
    }
}
