//! Delete stage (§4.4): serialized with respect to ingest. Waits for
//! in-flight batches to drain, takes the project lease, deletes soft-deleted
//! files, sweeps orphans, regenerates descriptions for entities/relationships
//! that survived, then best-effort cleans up the object store.

use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use graph_extract::ModelClient;
use graph_loaders::ObjectStore;
use graph_types::{EntityId, ProjectId, RelationshipId};

use crate::description::{regenerate_entity_description, regenerate_relationship_description};
use crate::error::Result;
use crate::lease::{project_lock_key, AcquireMode, LeaseOptions};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

async fn has_pending_batches(pool: &PgPool, project_id: ProjectId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM batches WHERE project_id = $1 AND status NOT IN ('completed', 'failed')",
    )
    .bind(project_id.as_uuid())
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Step 1: `GetPendingBatchesForProject`, polled every 2s until empty or
/// cancelled.
pub async fn wait_for_drain(pool: &PgPool, project_id: ProjectId, cancel: &CancellationToken) -> Result<()> {
    loop {
        if !has_pending_batches(pool, project_id).await? {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(crate::error::CoreError::Cancelled),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

struct TouchedIds {
    entity_ids: Vec<EntityId>,
    relationship_ids: Vec<RelationshipId>,
}

/// Step 4: `DeleteFilesAndRegenerateDescriptions`. Deletes soft-deleted
/// `project_files`, sweeps orphan entities/relationships (no remaining
/// sources, I2), then regenerates descriptions for whatever survived.
async fn delete_files_and_regenerate_descriptions(
    pool: &PgPool,
    model: &dyn ModelClient,
    object_store: &dyn ObjectStore,
    project_id: ProjectId,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let deleted_files: Vec<(uuid::Uuid, String)> = sqlx::query_as(
        "SELECT id, file_key FROM project_files WHERE project_id = $1 AND deleted_at IS NOT NULL",
    )
    .bind(project_id.as_uuid())
    .fetch_all(&mut *tx)
    .await?;
    let deleted_keys: Vec<String> = deleted_files.iter().map(|(_, key)| key.clone()).collect();
    let deleted_file_ids: Vec<uuid::Uuid> = deleted_files.iter().map(|(id, _)| *id).collect();

    // Entities/relationships touched by the deleted files' units, captured
    // before the cascade so we know what to regenerate afterward.
    let touched_entities: Vec<(uuid::Uuid,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT es.entity_id
        FROM entity_sources es
        JOIN text_units tu ON tu.id = es.text_unit_id
        WHERE tu.project_file_id = ANY($1)
        "#,
    )
    .bind(&deleted_file_ids)
    .fetch_all(&mut *tx)
    .await?;
    let touched_relationships: Vec<(uuid::Uuid,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT rs.relationship_id
        FROM relationship_sources rs
        JOIN text_units tu ON tu.id = rs.text_unit_id
        WHERE tu.project_file_id = ANY($1)
        "#,
    )
    .bind(&deleted_file_ids)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM project_files WHERE id = ANY($1)")
        .bind(&deleted_file_ids)
        .execute(&mut *tx)
        .await?;

    // Orphan sweep (I2): no entity/relationship may exist without sources.
    sqlx::query(
        "DELETE FROM entities e WHERE e.project_id = $1 \
         AND NOT EXISTS (SELECT 1 FROM entity_sources es WHERE es.entity_id = e.id)",
    )
    .bind(project_id.as_uuid())
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "DELETE FROM relationships r WHERE r.project_id = $1 \
         AND NOT EXISTS (SELECT 1 FROM relationship_sources rs WHERE rs.relationship_id = r.id)",
    )
    .bind(project_id.as_uuid())
    .execute(&mut *tx)
    .await?;

    // Survivors among the touched ids (orphan sweep may have removed some).
    let surviving_entities: Vec<(uuid::Uuid,)> = sqlx::query_as(
        "SELECT id FROM entities WHERE id = ANY($1)",
    )
    .bind(touched_entities.iter().map(|(id,)| *id).collect::<Vec<_>>())
    .fetch_all(&mut *tx)
    .await?;
    let surviving_relationships: Vec<(uuid::Uuid,)> = sqlx::query_as(
        "SELECT id FROM relationships WHERE id = ANY($1)",
    )
    .bind(touched_relationships.iter().map(|(id,)| *id).collect::<Vec<_>>())
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let touched = TouchedIds {
        entity_ids: surviving_entities
            .into_iter()
            .map(|(id,)| EntityId::from_uuid(id))
            .collect(),
        relationship_ids: surviving_relationships
            .into_iter()
            .map(|(id,)| RelationshipId::from_uuid(id))
            .collect(),
    };

    for entity_id in touched.entity_ids {
        regenerate_entity_description(pool, model, entity_id).await?;
    }
    for relationship_id in touched.relationship_ids {
        regenerate_relationship_description(pool, model, relationship_id).await?;
    }

    // Step 5: best-effort object-store cleanup, errors logged only.
    for key in deleted_keys {
        if let Err(e) = object_store.delete(&key).await {
            tracing::warn!(key = %key, error = %e, "best-effort object store delete failed");
        }
    }

    Ok(())
}

/// Runs the full delete stage (§4.4 steps 1-5) for `project_id`.
pub async fn run_delete(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    model: &dyn ModelClient,
    project_id: ProjectId,
    cancel: &CancellationToken,
    lease_ttl_secs: u64,
) -> Result<()> {
    wait_for_drain(pool, project_id, cancel).await?;

    sqlx::query("UPDATE projects SET state = 'update' WHERE id = $1")
        .bind(project_id.as_uuid())
        .execute(pool)
        .await?;

    let revert_result = run_delete_under_lease(pool, object_store, model, project_id, lease_ttl_secs).await;

    // Revert happens unconditionally (the `defer` of §4.4 step 2) whether
    // the lease body succeeded or not.
    sqlx::query("UPDATE projects SET state = 'ready' WHERE id = $1")
        .bind(project_id.as_uuid())
        .execute(pool)
        .await?;

    revert_result
}

async fn run_delete_under_lease(
    pool: &PgPool,
    object_store: &dyn ObjectStore,
    model: &dyn ModelClient,
    project_id: ProjectId,
    lease_ttl_secs: u64,
) -> Result<()> {
    let key = project_lock_key(project_id.as_uuid());
    let lease = crate::lease::acquire(
        pool,
        &key,
        LeaseOptions {
            ttl: Duration::from_secs(lease_ttl_secs),
            mode: AcquireMode::Wait,
            ..Default::default()
        },
    )
    .await?;

    let result = delete_files_and_regenerate_descriptions(pool, model, object_store, project_id).await;

    lease.release().await;
    result
}
