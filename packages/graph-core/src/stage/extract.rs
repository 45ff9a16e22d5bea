//! Phase A — ExtractAndStage (§4.3, no lease): per file, build units,
//! extract entities/relationships, dedup locally, then stage the result.
//! Runs with `parallel_files`-bounded concurrency across the batch's files.

use futures::stream::{self, StreamExt, TryStreamExt};
use sqlx::PgPool;

use graph_extract::{
    build_csv_units, build_units, dedup_document, extract_unit, DedupConfig, ModelClient,
    PromptKind,
};
use graph_loaders::{classify, FileKind, ObjectStore, TokenEncoder};
use graph_types::{
    BatchId, CorrelationId, Entity, EntitySource, ProjectFile, ProjectId, Relationship,
    RelationshipSource, StagedKind, StagedRow, TextUnit, TextUnitPublicId,
};

use crate::error::{CoreError, Result};
use crate::staging::StagingStore;

/// Default for `Config::from_env`'s `MAX_TOKENS_PER_UNIT`, used directly
/// only by callers that don't thread a configured value through (e.g. tests).
pub const DEFAULT_MAX_TOKENS: usize = 500;

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

fn prompt_kind_for(kind: FileKind) -> PromptKind {
    match kind {
        FileKind::Csv => PromptKind::Csv,
        FileKind::Image | FileKind::Audio | FileKind::Generic => PromptKind::Image,
        _ => PromptKind::Text,
    }
}

/// Loads the clean-text artifact(s) the preprocess stage wrote for `file`,
/// per the §4.2 naming convention (`<dir>/<basename>.txt`, or one file per
/// Excel sheet sorted lexicographically). Generic files keep their
/// original key and raw bytes.
async fn load_clean_texts(object_store: &dyn ObjectStore, file: &ProjectFile) -> Result<Vec<String>> {
    let kind = classify(&file.normalized_ext());
    if kind == FileKind::Generic {
        let raw = object_store.get(&file.file_key).await.map_err(CoreError::ObjectStore)?;
        return Ok(vec![String::from_utf8_lossy(&raw).into_owned()]);
    }

    let (dir, base) = split_key(&file.file_key);
    let base_name = strip_ext(base);

    if kind == FileKind::Excel {
        let prefix = if dir.is_empty() {
            format!("{base_name}_")
        } else {
            format!("{dir}/{base_name}_")
        };
        let mut keys = object_store
            .list_by_prefix(&prefix)
            .await
            .map_err(CoreError::ObjectStore)?;
        keys.sort();
        if keys.is_empty() {
            return Err(CoreError::MissingArtifact(format!(
                "no sheet text artifacts found for excel file {}",
                file.name
            )));
        }
        let mut texts = Vec::with_capacity(keys.len());
        for key in keys {
            let bytes = object_store.get(&key).await.map_err(CoreError::ObjectStore)?;
            texts.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        return Ok(texts);
    }

    let key = if dir.is_empty() {
        format!("{base_name}.txt")
    } else {
        format!("{dir}/{base_name}.txt")
    };
    let bytes = object_store.get(&key).await.map_err(CoreError::ObjectStore)?;
    Ok(vec![String::from_utf8_lossy(&bytes).into_owned()])
}

struct FileStaged {
    units: Vec<TextUnit>,
    entities: Vec<Entity>,
    entity_sources: Vec<EntitySource>,
    relationships: Vec<Relationship>,
    relationship_sources: Vec<RelationshipSource>,
}

async fn extract_file(
    object_store: &dyn ObjectStore,
    model: &dyn ModelClient,
    encoder: &dyn TokenEncoder,
    project_id: ProjectId,
    file: &ProjectFile,
    max_tokens_per_unit: usize,
) -> Result<FileStaged> {
    let kind = classify(&file.normalized_ext());

    if matches!(kind, FileKind::Excel) && file.token_count == Some(0) {
        return Ok(FileStaged {
            units: Vec::new(),
            entities: Vec::new(),
            entity_sources: Vec::new(),
            relationships: Vec::new(),
            relationship_sources: Vec::new(),
        });
    }

    let texts = load_clean_texts(object_store, file).await?;
    let prompt_kind = prompt_kind_for(kind);

    let mut all_entities = Vec::new();
    let mut all_entity_sources = Vec::new();
    let mut all_relationships = Vec::new();
    let mut all_relationship_sources = Vec::new();
    let mut all_units = Vec::new();

    for text in texts {
        let raw_units = match kind {
            FileKind::Csv => {
                let rows: Vec<Vec<String>> = text
                    .lines()
                    .map(|line| line.split(',').map(|c| c.to_string()).collect())
                    .collect();
                build_csv_units(&rows, max_tokens_per_unit, encoder)
            }
            FileKind::Image | FileKind::Audio | FileKind::Generic => {
                vec![graph_extract::Unit { text: text.clone() }]
            }
            _ => build_units(&text, max_tokens_per_unit, encoder),
        };

        for unit in raw_units {
            let public_id = TextUnitPublicId::new();
            let text_unit = TextUnit {
                id: None,
                public_id,
                project_file_id: file.id,
                text: unit.text,
            };

            let extraction = extract_unit(
                model,
                prompt_kind,
                project_id,
                &file.name,
                file.metadata.as_ref(),
                public_id,
                None,
            )
            .await
            .map_err(CoreError::Extract)?;

            all_units.push(text_unit);
            all_entities.extend(extraction.entities);
            all_entity_sources.extend(extraction.entity_sources);
            all_relationships.extend(extraction.relationships);
            all_relationship_sources.extend(extraction.relationship_sources);
        }
    }

    dedup_document(
        model,
        &mut all_entities,
        &mut all_entity_sources,
        &mut all_relationships,
        DedupConfig::default(),
    )
    .await
    .map_err(CoreError::Extract)?;

    // Document-local dedup folds/drops relationships (self-loops, duplicate
    // undirected pairs); drop sources that no longer have a surviving
    // relationship to attach to.
    let surviving: std::collections::HashSet<_> =
        all_relationships.iter().map(|r| r.public_id).collect();
    all_relationship_sources.retain(|s| surviving.contains(&s.relationship_public_id));

    Ok(FileStaged {
        units: all_units,
        entities: all_entities,
        entity_sources: all_entity_sources,
        relationships: all_relationships,
        relationship_sources: all_relationship_sources,
    })
}

fn staged_rows(
    correlation_id: CorrelationId,
    batch_id: BatchId,
    project_id: ProjectId,
    staged: &FileStaged,
) -> Result<Vec<StagedRow>> {
    let mut rows = Vec::new();
    for unit in &staged.units {
        rows.push(StagedRow {
            correlation_id,
            batch_id,
            project_id,
            kind: StagedKind::Unit,
            data: serde_json::to_value(unit).map_err(|e| CoreError::Model(Box::new(e)))?,
        });
    }
    for entity in &staged.entities {
        rows.push(StagedRow {
            correlation_id,
            batch_id,
            project_id,
            kind: StagedKind::Entity,
            data: serde_json::json!({"entity": entity, "sources": staged
                .entity_sources
                .iter()
                .filter(|s| s.entity_public_id == entity.public_id)
                .collect::<Vec<_>>()}),
        });
    }
    for relationship in &staged.relationships {
        rows.push(StagedRow {
            correlation_id,
            batch_id,
            project_id,
            kind: StagedKind::Relationship,
            data: serde_json::json!({"relationship": relationship, "sources": staged
                .relationship_sources
                .iter()
                .filter(|s| s.relationship_public_id == relationship.public_id)
                .collect::<Vec<_>>()}),
        });
    }
    Ok(rows)
}

/// Runs Phase A for every file in the batch, bounded by `parallel_files`,
/// then cleans up and writes the combined staged rows (§4.3 "Cleanup" /
/// "Write") and advances the batch to `indexing`.
pub async fn run_extract_and_stage(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    model: &dyn ModelClient,
    encoder: &dyn TokenEncoder,
    staging: &StagingStore,
    project_id: ProjectId,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    files: &[ProjectFile],
    parallel_files: usize,
    max_tokens_per_unit: usize,
) -> Result<()> {
    let staged_all: Vec<FileStaged> = stream::iter(files.iter())
        .map(|file| extract_file(object_store, model, encoder, project_id, file, max_tokens_per_unit))
        .buffer_unordered(parallel_files.max(1))
        .try_collect()
        .await?;

    staging.clear(correlation_id, batch_id).await?;

    for staged in &staged_all {
        let rows = staged_rows(correlation_id, batch_id, project_id, staged)?;
        staging.stage_all(&rows).await?;
    }

    crate::batch::advance_to_indexing(pool, correlation_id, batch_id).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_key_separates_dir_and_base() {
        assert_eq!(split_key("projects/1/a.csv"), ("projects/1", "a.csv"));
    }

    #[test]
    fn prompt_kind_maps_csv_and_text() {
        assert!(matches!(prompt_kind_for(FileKind::Csv), PromptKind::Csv));
        assert!(matches!(prompt_kind_for(FileKind::PlainText), PromptKind::Text));
        assert!(matches!(prompt_kind_for(FileKind::Image), PromptKind::Image));
    }
}
