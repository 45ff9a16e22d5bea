//! Description regeneration (§4.7): chunked incremental summarization over
//! every source description an entity/relationship has ever accumulated,
//! run whenever a batch gives it at least one new source.

use sqlx::PgPool;

use graph_extract::ModelClient;
use graph_types::{EntityId, RelationshipId, TextUnitId};

use crate::error::{CoreError, Result};

const CHUNK_SIZE: usize = 100;
const SYSTEM_PROMPT: &str =
    "You write a single concise description synthesizing multiple source fragments about the \
     same knowledge-graph entity or relationship. Respond with the description text only.";

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn initial_prompt(subject_name: &str, descriptions: &[String]) -> String {
    format!(
        "{subject_name}\n\nSource descriptions:\n{}",
        descriptions.join("\n")
    )
}

fn update_prompt(subject_name: &str, current_description: &str, new_chunk: &[String]) -> String {
    format!(
        "{subject_name}\n\nCurrent description:\n{current_description}\n\nNew source \
         descriptions:\n{}",
        new_chunk.join("\n")
    )
}

/// Runs the initial/update chunk loop and returns the final, normalized
/// description text.
async fn regenerate_description_text(
    model: &dyn ModelClient,
    subject_name: &str,
    source_descriptions: &[String],
) -> Result<String> {
    let mut current = String::new();
    for (i, chunk) in source_descriptions.chunks(CHUNK_SIZE).enumerate() {
        let prompt = if i == 0 {
            initial_prompt(subject_name, chunk)
        } else {
            update_prompt(subject_name, &current, chunk)
        };
        let raw = model
            .generate_text(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| CoreError::Model(Box::new(e)))?;
        current = normalize_whitespace(&raw);
    }
    Ok(current)
}

#[derive(sqlx::FromRow)]
struct EntityNameRow {
    name: String,
}

/// Regenerates one entity's description+embedding from *all* of its
/// remaining sources (not just the current batch's), then persists both
/// atomically.
pub async fn regenerate_entity_description(
    pool: &PgPool,
    model: &dyn ModelClient,
    entity_id: EntityId,
) -> Result<()> {
    regenerate_entity_description_for_units(pool, model, entity_id, None).await
}

/// As [`regenerate_entity_description`], but when `unit_ids` is `Some`,
/// restricts the source descriptions to those attached to one of those
/// text units (§4.8 job execution: "restricted to this correlation's unit
/// ids").
pub async fn regenerate_entity_description_for_units(
    pool: &PgPool,
    model: &dyn ModelClient,
    entity_id: EntityId,
    unit_ids: Option<&[TextUnitId]>,
) -> Result<()> {
    let entity = sqlx::query_as::<_, EntityNameRow>("SELECT name FROM entities WHERE id = $1")
        .bind(entity_id.as_uuid())
        .fetch_one(pool)
        .await?;

    let descriptions: Vec<String> = match unit_ids {
        Some(units) => {
            let unit_uuids: Vec<uuid::Uuid> = units.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query_scalar(
                "SELECT description FROM entity_sources \
                 WHERE entity_id = $1 AND text_unit_id = ANY($2) ORDER BY id",
            )
            .bind(entity_id.as_uuid())
            .bind(&unit_uuids)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT description FROM entity_sources WHERE entity_id = $1 ORDER BY id",
            )
            .bind(entity_id.as_uuid())
            .fetch_all(pool)
            .await?
        }
    };

    if descriptions.is_empty() {
        return Ok(());
    }

    let description = regenerate_description_text(model, &entity.name, &descriptions).await?;
    let embedding = model
        .embed(&description)
        .await
        .map_err(|e| CoreError::Model(Box::new(e)))?;
    let vector = pgvector::Vector::from(embedding);

    sqlx::query("UPDATE entities SET description = $1, embedding = $2 WHERE id = $3")
        .bind(&description)
        .bind(&vector)
        .bind(entity_id.as_uuid())
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct RelationshipNamesRow {
    source_name: String,
    target_name: String,
}

/// Regenerates one relationship's description+embedding. The entity-name
/// seed is `"<source_name> -> <target_name>"` (§4.7).
pub async fn regenerate_relationship_description(
    pool: &PgPool,
    model: &dyn ModelClient,
    relationship_id: RelationshipId,
) -> Result<()> {
    regenerate_relationship_description_for_units(pool, model, relationship_id, None).await
}

/// As [`regenerate_relationship_description`], restricted to sources
/// attached to one of `unit_ids` when given (§4.8 job execution).
pub async fn regenerate_relationship_description_for_units(
    pool: &PgPool,
    model: &dyn ModelClient,
    relationship_id: RelationshipId,
    unit_ids: Option<&[TextUnitId]>,
) -> Result<()> {
    let names = sqlx::query_as::<_, RelationshipNamesRow>(
        r#"
        SELECT src.name AS source_name, tgt.name AS target_name
        FROM relationships r
        JOIN entities src ON src.id = r.source_id
        JOIN entities tgt ON tgt.id = r.target_id
        WHERE r.id = $1
        "#,
    )
    .bind(relationship_id.as_uuid())
    .fetch_one(pool)
    .await?;

    let seed = format!("{} -> {}", names.source_name, names.target_name);

    let descriptions: Vec<String> = match unit_ids {
        Some(units) => {
            let unit_uuids: Vec<uuid::Uuid> = units.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query_scalar(
                "SELECT description FROM relationship_sources \
                 WHERE relationship_id = $1 AND text_unit_id = ANY($2) ORDER BY id",
            )
            .bind(relationship_id.as_uuid())
            .bind(&unit_uuids)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_scalar(
                "SELECT description FROM relationship_sources WHERE relationship_id = $1 ORDER BY id",
            )
            .bind(relationship_id.as_uuid())
            .fetch_all(pool)
            .await?
        }
    };

    if descriptions.is_empty() {
        return Ok(());
    }

    let description = regenerate_description_text(model, &seed, &descriptions).await?;
    let embedding = model
        .embed(&description)
        .await
        .map_err(|e| CoreError::Model(Box::new(e)))?;
    let vector = pgvector::Vector::from(embedding);

    sqlx::query("UPDATE relationships SET description = $1, embedding = $2 WHERE id = $3")
        .bind(&description)
        .bind(&vector)
        .bind(relationship_id.as_uuid())
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_newlines_and_collapses_runs() {
        let input = "line one\n\nline   two\tline three";
        assert_eq!(normalize_whitespace(input), "line one line two line three");
    }

    #[test]
    fn initial_prompt_includes_subject_and_descriptions() {
        let prompt = initial_prompt("Alice", &["desc one".to_string(), "desc two".to_string()]);
        assert!(prompt.contains("Alice"));
        assert!(prompt.contains("desc one"));
        assert!(prompt.contains("desc two"));
    }

    #[test]
    fn update_prompt_includes_current_and_new() {
        let prompt = update_prompt("Alice", "current", &["new one".to_string()]);
        assert!(prompt.contains("current"));
        assert!(prompt.contains("new one"));
    }
}
