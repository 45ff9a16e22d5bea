//! Phase B step 2: upsert `Entity` rows by `(project_id, public_id)` (chunk
//! 500), precomputing description embeddings in parallel-bounded batches.

use std::collections::HashMap;

use pgvector::Vector;
use sqlx::PgPool;

use graph_extract::ModelClient;
use graph_types::{Entity, EntityId, EntityPublicId, ProjectId};

use crate::error::{CoreError, Result};

pub const ENTITY_CHUNK_SIZE: usize = 500;

#[derive(sqlx::FromRow)]
struct UpsertedEntity {
    id: EntityId,
    public_id: EntityPublicId,
}

/// Fills in any missing `embedding` on `entities` by calling the model
/// client in chunk-sized batches, then upserts and returns the assigned
/// internal id for each `public_id`.
pub async fn upsert_entities(
    pool: &PgPool,
    model: &dyn ModelClient,
    project_id: ProjectId,
    entities: &mut [Entity],
) -> Result<HashMap<EntityPublicId, EntityId>> {
    for chunk in entities.chunks_mut(ENTITY_CHUNK_SIZE) {
        let to_embed: Vec<usize> = chunk
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_empty())
            .map(|(i, _)| i)
            .collect();
        if to_embed.is_empty() {
            continue;
        }
        let texts: Vec<String> = to_embed.iter().map(|&i| chunk[i].description.clone()).collect();
        let embeddings = model
            .embed_batch(&texts)
            .await
            .map_err(|e| CoreError::Model(Box::new(e)))?;
        for (idx, embedding) in to_embed.into_iter().zip(embeddings) {
            chunk[idx].embedding = embedding;
        }
    }

    let mut ids = HashMap::with_capacity(entities.len());

    for chunk in entities.chunks(ENTITY_CHUNK_SIZE) {
        let public_ids: Vec<uuid::Uuid> = chunk.iter().map(|e| *e.public_id.as_uuid()).collect();
        let names: Vec<&str> = chunk.iter().map(|e| e.name.as_str()).collect();
        let types: Vec<&str> = chunk.iter().map(|e| e.entity_type.as_str()).collect();
        let descriptions: Vec<&str> = chunk.iter().map(|e| e.description.as_str()).collect();
        let embeddings: Vec<Vector> = chunk
            .iter()
            .map(|e| Vector::from(e.embedding.clone()))
            .collect();
        let project_ids: Vec<uuid::Uuid> = chunk.iter().map(|_| *project_id.as_uuid()).collect();

        let rows = sqlx::query_as::<_, UpsertedEntity>(
            r#"
            INSERT INTO entities (project_id, public_id, name, type, description, embedding)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::text[], $4::text[], $5::text[], $6::vector[])
            ON CONFLICT (project_id, public_id) DO UPDATE
            SET name = EXCLUDED.name, type = EXCLUDED.type,
                description = EXCLUDED.description, embedding = EXCLUDED.embedding
            RETURNING id, public_id
            "#,
        )
        .bind(&project_ids)
        .bind(&public_ids)
        .bind(&names as &[&str])
        .bind(&types as &[&str])
        .bind(&descriptions as &[&str])
        .bind(&embeddings)
        .fetch_all(pool)
        .await?;

        for row in rows {
            ids.insert(row.public_id, row.id);
        }
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_matches_spec() {
        assert_eq!(ENTITY_CHUNK_SIZE, 500);
    }
}
