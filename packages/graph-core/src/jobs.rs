//! Description job planner (§4.8): shards the entities+relationships
//! touched by a correlation into fixed-size jobs, persists them, and hands
//! the shard list back to the caller (`queue::worker`) to publish.

use sqlx::PgPool;

use graph_types::{
    CorrelationId, DescriptionJob, DescriptionJobId, DescriptionJobStatus, EntityId,
    RelationshipId,
};

use crate::error::Result;

#[derive(Clone, Copy)]
enum ShardItem {
    Entity(EntityId),
    Relationship(RelationshipId),
}

/// Partitions the affected entities+relationships into shards of at most
/// `shard_size`, ordered `(kind, id)` — entities (ascending id) before
/// relationships (ascending id) — so the same input always shards
/// identically (§4.8 step 3-4).
pub fn plan_shards(
    mut entity_ids: Vec<EntityId>,
    mut relationship_ids: Vec<RelationshipId>,
    shard_size: usize,
) -> Vec<(Vec<EntityId>, Vec<RelationshipId>)> {
    entity_ids.sort();
    relationship_ids.sort();

    let items: Vec<ShardItem> = entity_ids
        .into_iter()
        .map(ShardItem::Entity)
        .chain(relationship_ids.into_iter().map(ShardItem::Relationship))
        .collect();

    items
        .chunks(shard_size.max(1))
        .map(|chunk| {
            let mut entities = Vec::new();
            let mut relationships = Vec::new();
            for item in chunk {
                match item {
                    ShardItem::Entity(id) => entities.push(*id),
                    ShardItem::Relationship(id) => relationships.push(*id),
                }
            }
            (entities, relationships)
        })
        .collect()
}

/// Persists one `description_job` row per shard (`job_id = 1..=total_jobs`).
/// Publishing onto `description_queue` is the caller's responsibility, once
/// these rows are durably committed.
pub async fn create_description_jobs(
    pool: &PgPool,
    correlation_id: CorrelationId,
    shards: &[(Vec<EntityId>, Vec<RelationshipId>)],
) -> Result<Vec<DescriptionJob>> {
    let total_jobs = shards.len() as i32;
    let mut jobs = Vec::with_capacity(shards.len());

    for (i, (entity_ids, relationship_ids)) in shards.iter().enumerate() {
        let job_id: DescriptionJobId = (i + 1) as i32;
        let entity_uuids: Vec<uuid::Uuid> = entity_ids.iter().map(|id| *id.as_uuid()).collect();
        let relationship_uuids: Vec<uuid::Uuid> =
            relationship_ids.iter().map(|id| *id.as_uuid()).collect();

        sqlx::query(
            r#"
            INSERT INTO description_jobs
                (correlation_id, job_id, total_jobs, entity_ids, relationship_ids, status)
            VALUES ($1, $2, $3, $4, $5, 'pending')
            "#,
        )
        .bind(correlation_id.as_uuid())
        .bind(job_id)
        .bind(total_jobs)
        .bind(&entity_uuids)
        .bind(&relationship_uuids)
        .execute(pool)
        .await?;

        jobs.push(DescriptionJob {
            correlation_id,
            job_id,
            total_jobs,
            entity_ids: entity_ids.clone(),
            relationship_ids: relationship_ids.clone(),
            status: DescriptionJobStatus::Pending,
            error_message: None,
        });
    }

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_respect_size_and_kind_order() {
        let entities: Vec<EntityId> = (0..25).map(|_| EntityId::new()).collect();
        let relationships: Vec<RelationshipId> = (0..5).map(|_| RelationshipId::new()).collect();

        let shards = plan_shards(entities.clone(), relationships.clone(), 10);
        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].0.len(), 10);
        assert_eq!(shards[1].0.len(), 10);
        // Third shard holds the last 5 entities and all 5 relationships.
        assert_eq!(shards[2].0.len(), 5);
        assert_eq!(shards[2].1.len(), 5);
    }

    #[test]
    fn empty_input_produces_no_shards() {
        let shards = plan_shards(Vec::new(), Vec::new(), 10);
        assert!(shards.is_empty());
    }

    #[test]
    fn default_shard_size_matches_ai_parallel_req() {
        let entities: Vec<EntityId> = (0..10).map(|_| EntityId::new()).collect();
        let shards = plan_shards(entities, Vec::new(), 10);
        assert_eq!(shards.len(), 1);
    }
}
