//! Preprocess stage (§4.2): materialize per-file clean text in the object
//! store, count tokens, extract metadata, and update the batch's duration
//! estimate, all committed in one transaction before publishing to the
//! graph queue.

use std::time::Instant;

use sqlx::PgPool;

use graph_loaders::{
    classify, estimate_pages, first_n_words, skips_metadata, strip_doc_tags, ContentLoader,
    FileKind, MetadataExtractionInput, MetadataExtractor, ObjectStore, ProcessTimeKind,
    ProcessTimeStats, TokenEncoder,
};
use graph_types::{BatchId, CorrelationId, ProjectFile, ProjectFileId};

use crate::error::{CoreError, Result};

fn split_key(file_key: &str) -> (&str, &str) {
    match file_key.rsplit_once('/') {
        Some((dir, base)) => (dir, base),
        None => ("", file_key),
    }
}

fn strip_ext(base: &str) -> &str {
    match base.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => base,
    }
}

struct FileOutcome {
    file_id: ProjectFileId,
    token_count: i64,
    metadata: Option<serde_json::Value>,
}

/// Runs one file through the §4.2 loader/metadata/object-store pipeline and
/// returns its aggregate outcome.
async fn preprocess_file(
    object_store: &dyn ObjectStore,
    content_loader: &dyn ContentLoader,
    metadata_extractor: &dyn MetadataExtractor,
    encoder: &dyn TokenEncoder,
    file: &ProjectFile,
) -> Result<FileOutcome> {
    let kind = classify(&file.normalized_ext());
    let raw = object_store
        .get(&file.file_key)
        .await
        .map_err(CoreError::ObjectStore)?;

    if kind == FileKind::Generic {
        let raw_text = String::from_utf8_lossy(&raw).into_owned();
        let token_count = encoder.count(&raw_text) as i64;
        return Ok(FileOutcome {
            file_id: file.id,
            token_count,
            metadata: None,
        });
    }

    let artifacts = content_loader.load(kind, &file.name, &raw).await?;

    let (dir, base) = split_key(&file.file_key);
    let base_name = strip_ext(base);

    let mut sorted = artifacts;
    sorted.sort_by(|a, b| a.sheet_name.cmp(&b.sheet_name));

    let mut total_tokens = 0i64;
    let mut first_metadata = None;
    let mut pdf_pages: Option<u32> = None;
    let mut sheet_rows = Vec::new();

    for artifact in &sorted {
        let (clean, header, footer, signature) = strip_doc_tags(&artifact.raw_text);
        let tokens = encoder.count(&clean) as i64;
        total_tokens += tokens;
        pdf_pages = pdf_pages.or(artifact.pdf_page_count);
        if let Some(rows) = artifact.row_count {
            sheet_rows.push(rows);
        }

        if !skips_metadata(kind) && first_metadata.is_none() {
            let excerpt = first_n_words(&clean, 500);
            let metadata = metadata_extractor
                .extract(MetadataExtractionInput {
                    file_name: &file.name,
                    header: header.as_deref(),
                    footer: footer.as_deref(),
                    signature: signature.as_deref(),
                    excerpt: &excerpt,
                })
                .await
                .map_err(|e| CoreError::Model(Box::new(e)))?;
            first_metadata = Some(metadata);
        }

        let put_base = match &artifact.sheet_name {
            Some(sheet) => format!("{base_name}_{sheet}"),
            None => base_name.to_string(),
        };
        let _written_key = object_store
            .put(dir, &put_base, clean.into_bytes())
            .await
            .map_err(CoreError::ObjectStore)?;
    }

    let _ = estimate_pages(kind, raw.len() as u64, pdf_pages, &sheet_rows);

    Ok(FileOutcome {
        file_id: file.id,
        token_count: total_tokens,
        metadata: first_metadata,
    })
}

/// Runs the whole preprocess stage for a claimed batch's files, commits the
/// per-file results in one transaction, and updates the batch's duration
/// estimate. Publishing onto the graph queue is the caller's responsibility
/// once this returns successfully.
pub async fn run_preprocess(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    content_loader: &dyn ContentLoader,
    metadata_extractor: &dyn MetadataExtractor,
    encoder: &dyn TokenEncoder,
    process_time_stats: &dyn ProcessTimeStats,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    files: &[ProjectFile],
) -> Result<()> {
    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(files.len());
    for file in files {
        let outcome =
            preprocess_file(object_store, content_loader, metadata_extractor, encoder, file).await?;
        outcomes.push(outcome);
    }

    let total_tokens: i64 = outcomes.iter().map(|o| o.token_count).sum();
    let duration_ms = started.elapsed().as_millis() as i64;

    let predicted = process_time_stats
        .predict_duration_ms(ProcessTimeKind::Preprocess, total_tokens)
        .await
        .map_err(|e| CoreError::Model(e.to_string().into()))?;

    let mut tx = pool.begin().await?;
    for outcome in &outcomes {
        sqlx::query(
            "UPDATE project_files SET token_count = $2, metadata = COALESCE($3, metadata) WHERE id = $1",
        )
        .bind(outcome.file_id.as_uuid())
        .bind(outcome.token_count)
        .bind(&outcome.metadata)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE batches SET estimated_duration_ms = $3, updated_at = NOW() \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .bind(predicted)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    process_time_stats
        .observe(ProcessTimeKind::Preprocess, total_tokens, duration_ms)
        .await
        .map_err(|e| CoreError::Model(e.to_string().into()))?;

    crate::batch::mark_preprocessed(pool, correlation_id, batch_id).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_key_separates_dir_and_base() {
        assert_eq!(split_key("projects/42/file.docx"), ("projects/42", "file.docx"));
        assert_eq!(split_key("file.docx"), ("", "file.docx"));
    }

    #[test]
    fn strip_ext_removes_last_extension() {
        assert_eq!(strip_ext("file.docx"), "file");
        assert_eq!(strip_ext("noext"), "noext");
    }
}
