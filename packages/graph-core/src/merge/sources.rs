//! Phase B step 4: upsert entity+relationship sources (chunk 500) with
//! embeddings, resolving each source's unit/entity/relationship `public_id`
//! to the internal id assigned earlier in the same merge.

use std::collections::HashMap;

use pgvector::Vector;
use sqlx::PgPool;

use graph_extract::ModelClient;
use graph_types::{
    EntityId, EntityPublicId, EntitySource, RelationshipId, RelationshipPublicId,
    RelationshipSource, TextUnitId, TextUnitPublicId,
};

use crate::error::{CoreError, Result};

pub const SOURCE_CHUNK_SIZE: usize = 500;

async fn fill_embeddings(model: &dyn ModelClient, descriptions: &[String]) -> Result<Vec<Vec<f32>>> {
    model
        .embed_batch(descriptions)
        .await
        .map_err(|e| CoreError::Model(Box::new(e)))
}

pub async fn upsert_entity_sources(
    pool: &PgPool,
    model: &dyn ModelClient,
    sources: &mut [EntitySource],
    entity_ids: &HashMap<EntityPublicId, EntityId>,
    unit_ids: &HashMap<TextUnitPublicId, TextUnitId>,
) -> Result<()> {
    let mut missing = Vec::new();
    for source in sources.iter_mut() {
        match (
            entity_ids.get(&source.entity_public_id),
            unit_ids.get(&source.text_unit_public_id),
        ) {
            (Some(&entity_id), Some(&text_unit_id)) => {
                source.entity_id = Some(entity_id);
                source.text_unit_id = Some(text_unit_id);
            }
            _ => missing.push(source.public_id.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(CoreError::MissingEndpoints(missing));
    }

    for chunk in sources.chunks_mut(SOURCE_CHUNK_SIZE) {
        let to_embed: Vec<usize> = chunk
            .iter()
            .enumerate()
            .filter(|(_, s)| s.embedding.is_empty())
            .map(|(i, _)| i)
            .collect();
        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed.iter().map(|&i| chunk[i].description.clone()).collect();
            let embeddings = fill_embeddings(model, &texts).await?;
            for (idx, embedding) in to_embed.into_iter().zip(embeddings) {
                chunk[idx].embedding = embedding;
            }
        }

        let public_ids: Vec<uuid::Uuid> = chunk.iter().map(|s| *s.public_id.as_uuid()).collect();
        let entity_ids_bound: Vec<uuid::Uuid> = chunk
            .iter()
            .map(|s| *s.entity_id.expect("resolved above").as_uuid())
            .collect();
        let unit_ids_bound: Vec<uuid::Uuid> = chunk
            .iter()
            .map(|s| *s.text_unit_id.expect("resolved above").as_uuid())
            .collect();
        let descriptions: Vec<&str> = chunk.iter().map(|s| s.description.as_str()).collect();
        let embeddings: Vec<Vector> = chunk.iter().map(|s| Vector::from(s.embedding.clone())).collect();

        sqlx::query(
            r#"
            INSERT INTO entity_sources (public_id, entity_id, text_unit_id, description, embedding)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::text[], $5::vector[])
            ON CONFLICT (public_id) DO UPDATE
            SET entity_id = EXCLUDED.entity_id, text_unit_id = EXCLUDED.text_unit_id,
                description = EXCLUDED.description, embedding = EXCLUDED.embedding
            "#,
        )
        .bind(&public_ids)
        .bind(&entity_ids_bound)
        .bind(&unit_ids_bound)
        .bind(&descriptions as &[&str])
        .bind(&embeddings)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn upsert_relationship_sources(
    pool: &PgPool,
    model: &dyn ModelClient,
    sources: &mut [RelationshipSource],
    relationship_ids: &HashMap<RelationshipPublicId, RelationshipId>,
    unit_ids: &HashMap<TextUnitPublicId, TextUnitId>,
) -> Result<()> {
    let mut missing = Vec::new();
    for source in sources.iter_mut() {
        match (
            relationship_ids.get(&source.relationship_public_id),
            unit_ids.get(&source.text_unit_public_id),
        ) {
            (Some(&relationship_id), Some(&text_unit_id)) => {
                source.relationship_id = Some(relationship_id);
                source.text_unit_id = Some(text_unit_id);
            }
            _ => missing.push(source.public_id.to_string()),
        }
    }
    if !missing.is_empty() {
        return Err(CoreError::MissingEndpoints(missing));
    }

    for chunk in sources.chunks_mut(SOURCE_CHUNK_SIZE) {
        let to_embed: Vec<usize> = chunk
            .iter()
            .enumerate()
            .filter(|(_, s)| s.embedding.is_empty())
            .map(|(i, _)| i)
            .collect();
        if !to_embed.is_empty() {
            let texts: Vec<String> = to_embed.iter().map(|&i| chunk[i].description.clone()).collect();
            let embeddings = fill_embeddings(model, &texts).await?;
            for (idx, embedding) in to_embed.into_iter().zip(embeddings) {
                chunk[idx].embedding = embedding;
            }
        }

        let public_ids: Vec<uuid::Uuid> = chunk.iter().map(|s| *s.public_id.as_uuid()).collect();
        let relationship_ids_bound: Vec<uuid::Uuid> = chunk
            .iter()
            .map(|s| *s.relationship_id.expect("resolved above").as_uuid())
            .collect();
        let unit_ids_bound: Vec<uuid::Uuid> = chunk
            .iter()
            .map(|s| *s.text_unit_id.expect("resolved above").as_uuid())
            .collect();
        let descriptions: Vec<&str> = chunk.iter().map(|s| s.description.as_str()).collect();
        let embeddings: Vec<Vector> = chunk.iter().map(|s| Vector::from(s.embedding.clone())).collect();

        sqlx::query(
            r#"
            INSERT INTO relationship_sources (public_id, relationship_id, text_unit_id, description, embedding)
            SELECT * FROM UNNEST($1::uuid[], $2::uuid[], $3::uuid[], $4::text[], $5::vector[])
            ON CONFLICT (public_id) DO UPDATE
            SET relationship_id = EXCLUDED.relationship_id, text_unit_id = EXCLUDED.text_unit_id,
                description = EXCLUDED.description, embedding = EXCLUDED.embedding
            "#,
        )
        .bind(&public_ids)
        .bind(&relationship_ids_bound)
        .bind(&unit_ids_bound)
        .bind(&descriptions as &[&str])
        .bind(&embeddings)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_size_matches_spec() {
        assert_eq!(SOURCE_CHUNK_SIZE, 500);
    }
}
