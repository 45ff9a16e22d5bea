//! Preprocess-stage collaborators (§4.2): per-extension loader dispatch,
//! the object-store seam, token counting, document metadata extraction and
//! process-time statistics. The per-format converters themselves (office-to-
//! pdf, OCR, ASR) are external black boxes (§1); this crate provides the
//! dispatch table, heuristics and the traits those converters plug into.

pub mod content_loader;
pub mod dispatch;
pub mod metadata;
pub mod object_store;
pub mod process_time;
pub mod tokens;

pub use content_loader::{ContentLoader, LoadError, LoadedArtifact};
pub use dispatch::{classify, estimate_pages, first_n_words, strip_doc_tags, FileKind};
pub use metadata::{skips_metadata, MetadataError, MetadataExtractionInput, MetadataExtractor};
pub use object_store::{InMemoryObjectStore, ObjectStore, ObjectStoreError};
pub use process_time::{PostgresProcessTimeStats, ProcessTimeKind, ProcessTimeStats};
pub use tokens::{ApproximateEncoder, TokenEncoder};
