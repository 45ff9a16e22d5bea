//! Phase B — MergeFromStaging (§4.3). Runs under the project lease; the
//! caller (`queue::worker`) acquires/releases it and owns steps 5-8
//! (cross-document dedup, description regeneration, staging cleanup,
//! release).

pub mod entities;
pub mod relationships;
pub mod sources;
pub mod text_units;

use std::collections::HashMap;

use sqlx::PgPool;

use graph_extract::ModelClient;
use graph_types::{
    Entity, EntityId, EntityPublicId, EntitySource, ProjectId, Relationship, RelationshipId,
    RelationshipPublicId, RelationshipSource, TextUnit, TextUnitId, TextUnitPublicId,
};

use crate::error::Result;

/// Internal ids assigned during a merge, carried forward into cross-document
/// dedup and description regeneration so they know which rows this batch
/// touched.
pub struct MergeResult {
    pub text_unit_ids: HashMap<TextUnitPublicId, TextUnitId>,
    pub entity_ids: HashMap<EntityPublicId, EntityId>,
    pub relationship_ids: HashMap<RelationshipPublicId, RelationshipId>,
}

/// Runs Phase B steps 1-4: upsert units, entities (with embeddings),
/// relationships (endpoint-resolved), then entity+relationship sources.
pub async fn merge_staged_batch(
    pool: &PgPool,
    model: &dyn ModelClient,
    project_id: ProjectId,
    units: &[TextUnit],
    mut entities: Vec<Entity>,
    mut entity_sources: Vec<EntitySource>,
    mut relationships: Vec<Relationship>,
    mut relationship_sources: Vec<RelationshipSource>,
) -> Result<MergeResult> {
    let text_unit_ids = text_units::upsert_text_units(pool, units).await?;

    let entity_ids = entities::upsert_entities(pool, model, project_id, &mut entities).await?;

    let relationship_ids =
        relationships::upsert_relationships(pool, project_id, &mut relationships).await?;

    sources::upsert_entity_sources(pool, model, &mut entity_sources, &entity_ids, &text_unit_ids)
        .await?;
    sources::upsert_relationship_sources(
        pool,
        model,
        &mut relationship_sources,
        &relationship_ids,
        &text_unit_ids,
    )
    .await?;

    Ok(MergeResult {
        text_unit_ids,
        entity_ids,
        relationship_ids,
    })
}
