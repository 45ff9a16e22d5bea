//! Per-extension loader dispatch (§4.2 table) and page-count heuristics.

use std::collections::HashMap;

/// One row of the §4.2 dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Office,    // doc/docx/odt/pptx: raw -> office-to-pdf -> OCR-per-page
    Pdf,       // raw -> (optional OCR-per-page)
    Image,     // raw -> captioner
    Audio,     // raw -> transcriber
    Csv,       // raw -> csv-normalize
    Excel,     // raw -> office-to-multi-CSV
    PlainText, // txt/md: raw
    Generic,   // anything else: raw, original key kept
}

const OFFICE_EXTS: &[&str] = &["doc", "docx", "odt", "pptx"];
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const AUDIO_EXTS: &[&str] = &["mp3", "wav", "m4a", "flac", "ogg"];
const EXCEL_EXTS: &[&str] = &["xlsx", "xls"];
const TEXT_EXTS: &[&str] = &["txt", "md"];

/// Dispatches by lowercased extension (§4.2 table). Callers should lowercase
/// via [`graph_types::ProjectFile::normalized_ext`] before calling this.
pub fn classify(ext: &str) -> FileKind {
    if OFFICE_EXTS.contains(&ext) {
        FileKind::Office
    } else if ext == "pdf" {
        FileKind::Pdf
    } else if IMAGE_EXTS.contains(&ext) {
        FileKind::Image
    } else if AUDIO_EXTS.contains(&ext) {
        FileKind::Audio
    } else if ext == "csv" {
        FileKind::Csv
    } else if EXCEL_EXTS.contains(&ext) {
        FileKind::Excel
    } else if TEXT_EXTS.contains(&ext) {
        FileKind::PlainText
    } else {
        FileKind::Generic
    }
}

/// §4.2 page-count heuristics, used to estimate OCR/ASR work and feed the
/// tokens->duration predictor.
pub fn estimate_pages(kind: FileKind, size_bytes: u64, pdf_page_count: Option<u32>, sheet_row_counts: &[u32]) -> u32 {
    let size_mb = (size_bytes as f64 / (1024.0 * 1024.0)).max(0.0);
    let size_kb = (size_bytes as f64 / 1024.0).max(0.0);
    match kind {
        FileKind::Office => pdf_page_count.unwrap_or(1),
        FileKind::Pdf => pdf_page_count.unwrap_or(1),
        FileKind::Image => 1,
        FileKind::Audio => size_mb.max(1.0).ceil() as u32,
        FileKind::Csv => (size_kb / 50.0).max(1.0).ceil() as u32,
        FileKind::Excel => sheet_row_counts
            .iter()
            .map(|rows| ((*rows as f64) / 2048.0).max(1.0).ceil() as u32)
            .sum::<u32>()
            .max(1),
        FileKind::PlainText => (size_kb / 50.0).max(1.0).ceil() as u32,
        FileKind::Generic => 1,
    }
}

/// §4.2: "strip the `<doc-header|footer|signature>` tags yielding the clean
/// text". Returns `(clean_text, header, footer, signature)`.
pub fn strip_doc_tags(raw: &str) -> (String, Option<String>, Option<String>, Option<String>) {
    lazy_static::lazy_static! {
        static ref TAG_RE: regex::Regex =
            regex::Regex::new(r"(?is)<doc-(header|footer|signature)>(.*?)</doc-(header|footer|signature)>").unwrap();
    }

    let mut tags: HashMap<&str, String> = HashMap::new();
    let mut clean = String::with_capacity(raw.len());
    let mut last_end = 0;
    for cap in TAG_RE.captures_iter(raw) {
        let whole = cap.get(0).unwrap();
        clean.push_str(&raw[last_end..whole.start()]);
        last_end = whole.end();
        let name = match &cap[1] {
            "header" => "header",
            "footer" => "footer",
            _ => "signature",
        };
        tags.insert(name, cap[2].trim().to_string());
    }
    clean.push_str(&raw[last_end..]);

    (
        clean.trim().to_string(),
        tags.get("header").cloned(),
        tags.get("footer").cloned(),
        tags.get("signature").cloned(),
    )
}

/// §4.2: "first-500-words(clean)" fed to the metadata extractor.
pub fn first_n_words(text: &str, n: usize) -> String {
    text.split_whitespace().take(n).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_extensions() {
        assert_eq!(classify("docx"), FileKind::Office);
        assert_eq!(classify("pptx"), FileKind::Office);
        assert_eq!(classify("pdf"), FileKind::Pdf);
        assert_eq!(classify("png"), FileKind::Image);
        assert_eq!(classify("mp3"), FileKind::Audio);
        assert_eq!(classify("csv"), FileKind::Csv);
        assert_eq!(classify("xlsx"), FileKind::Excel);
        assert_eq!(classify("txt"), FileKind::PlainText);
        assert_eq!(classify("weird"), FileKind::Generic);
    }

    #[test]
    fn strips_doc_tags() {
        let raw = "<doc-header>Acme Inc</doc-header>Body text.<doc-footer>page 1</doc-footer>";
        let (clean, header, footer, signature) = strip_doc_tags(raw);
        assert_eq!(clean, "Body text.");
        assert_eq!(header.as_deref(), Some("Acme Inc"));
        assert_eq!(footer.as_deref(), Some("page 1"));
        assert_eq!(signature, None);
    }

    #[test]
    fn first_n_words_truncates() {
        let text = "one two three four five";
        assert_eq!(first_n_words(text, 3), "one two three");
        assert_eq!(first_n_words(text, 100), text);
    }

    #[test]
    fn excel_page_estimate_sums_sheets() {
        let estimate = estimate_pages(FileKind::Excel, 0, None, &[100, 5000]);
        // sheet 1: max(100/2048,1)=1 ; sheet 2: ceil(5000/2048)=3
        assert_eq!(estimate, 4);
    }
}
