//! Phase B step 3: resolve relationship endpoints via a bulk
//! `GetEntityIDsByPublicIDs`, then upsert by `(project_id, public_id)`
//! (chunk 250). Missing endpoints are a hard error (§4.3 Phase B step 3).

use std::collections::HashMap;

use sqlx::PgPool;

use graph_types::{EntityId, EntityPublicId, ProjectId, Relationship, RelationshipId, RelationshipPublicId};

use crate::error::{CoreError, Result};

pub const RELATIONSHIP_CHUNK_SIZE: usize = 250;

#[derive(sqlx::FromRow)]
struct EntityIdRow {
    id: EntityId,
    public_id: EntityPublicId,
}

#[derive(sqlx::FromRow)]
struct UpsertedRelationship {
    id: RelationshipId,
    public_id: RelationshipPublicId,
}

/// Bulk-resolves entity internal ids for a set of public ids.
pub async fn get_entity_ids_by_public_ids(
    pool: &PgPool,
    project_id: ProjectId,
    public_ids: &[EntityPublicId],
) -> Result<HashMap<EntityPublicId, EntityId>> {
    if public_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let raw: Vec<uuid::Uuid> = public_ids.iter().map(|id| *id.as_uuid()).collect();
    let rows = sqlx::query_as::<_, EntityIdRow>(
        "SELECT id, public_id FROM entities WHERE project_id = $1 AND public_id = ANY($2::uuid[])",
    )
    .bind(project_id.as_uuid())
    .bind(&raw)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| (r.public_id, r.id)).collect())
}

/// Resolves endpoints, upserts relationships, and returns the assigned
/// internal id per `public_id`. Fails with [`CoreError::MissingEndpoints`]
/// if any relationship references an entity `public_id` with no resolved
/// internal id.
pub async fn upsert_relationships(
    pool: &PgPool,
    project_id: ProjectId,
    relationships: &mut [Relationship],
) -> Result<HashMap<RelationshipPublicId, RelationshipId>> {
    let mut wanted: Vec<EntityPublicId> = relationships
        .iter()
        .flat_map(|r| [r.source_public_id, r.target_public_id])
        .collect();
    wanted.sort_by_key(|id| *id.as_uuid());
    wanted.dedup();

    let entity_ids = get_entity_ids_by_public_ids(pool, project_id, &wanted).await?;

    let mut missing = Vec::new();
    for rel in relationships.iter_mut() {
        match (
            entity_ids.get(&rel.source_public_id),
            entity_ids.get(&rel.target_public_id),
        ) {
            (Some(&source_id), Some(&target_id)) => {
                rel.source_id = Some(source_id);
                rel.target_id = Some(target_id);
            }
            (source, target) => {
                if source.is_none() {
                    missing.push(rel.source_public_id.to_string());
                }
                if target.is_none() {
                    missing.push(rel.target_public_id.to_string());
                }
            }
        }
    }
    if !missing.is_empty() {
        return Err(CoreError::MissingEndpoints(missing));
    }

    let mut ids = HashMap::with_capacity(relationships.len());

    for chunk in relationships.chunks(RELATIONSHIP_CHUNK_SIZE) {
        let project_ids: Vec<uuid::Uuid> = chunk.iter().map(|_| *project_id.as_uuid()).collect();
        let public_ids: Vec<uuid::Uuid> = chunk.iter().map(|r| *r.public_id.as_uuid()).collect();
        let source_ids: Vec<uuid::Uuid> = chunk
            .iter()
            .map(|r| *r.source_id.expect("resolved above").as_uuid())
            .collect();
        let target_ids: Vec<uuid::Uuid> = chunk
            .iter()
            .map(|r| *r.target_id.expect("resolved above").as_uuid())
            .collect();
        let ranks: Vec<f32> = chunk.iter().map(|r| r.rank).collect();
        let descriptions: Vec<&str> = chunk.iter().map(|r| r.description.as_str()).collect();

        let rows = sqlx::query_as::<_, UpsertedRelationship>(
            r#"
            INSERT INTO relationships (project_id, public_id, source_id, target_id, rank, description)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::uuid[], $5::real[], $6::text[])
            ON CONFLICT (project_id, public_id) DO UPDATE
            SET source_id = EXCLUDED.source_id, target_id = EXCLUDED.target_id,
                rank = EXCLUDED.rank, description = EXCLUDED.description
            RETURNING id, public_id
            "#,
        )
        .bind(&project_ids)
        .bind(&public_ids)
        .bind(&source_ids)
        .bind(&target_ids)
        .bind(&ranks)
        .bind(&descriptions as &[&str])
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
        assert_eq!(RELATIONSHIP_CHUNK_SIZE, 250);
    }
}
