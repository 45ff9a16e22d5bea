//! The four queue-driven consumer loops (§4.1, §4.3, §4.4, §4.8) plus the
//! finalization trigger that ties batch completion to description-job
//! fan-out and project readiness.
//!
//! Each loop pulls one message, runs the claim protocol, does the stage's
//! work, and acks on success or naks on failure so the broker redelivers.
//! "No row claimed" (another worker already moved the batch, or a stale
//! superseded message) is not an error — ack and move on.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use graph_extract::ModelClient;
use graph_loaders::{ContentLoader, MetadataExtractor, ObjectStore, ProcessTimeKind, ProcessTimeStats, TokenEncoder};
use graph_types::{
    BatchId, CorrelationId, Entity, EntityId, EntitySource, ProjectFile, ProjectId,
    QueueDeleteMsg, QueueDescriptionJobMsg, QueueProjectFileMsg, Relationship, RelationshipId,
    RelationshipSource, StagedKind, TextUnit, DELETE_QUEUE, DESCRIPTION_QUEUE, GRAPH_QUEUE,
    PREPROCESS_QUEUE,
};

use crate::dedup::{run_cross_document_dedup, CrossDocDedupConfig};
use crate::description::{
    regenerate_entity_description_for_units, regenerate_relationship_description_for_units,
};
use crate::error::{CoreError, Result};
use crate::jobs::{create_description_jobs, plan_shards};
use crate::lease::{project_lock_key, AcquireMode, LeaseOptions};
use crate::merge::merge_staged_batch;
use crate::queue::{decode_json, publish_json, Broker};
use crate::staging::StagingStore;

const POLL_WAIT: Duration = Duration::from_secs(5);
const DESCRIPTION_SHARD_SIZE: usize = 10;

/// Dependencies shared by all four consumer loops. Cheap to clone — every
/// field is already an `Arc`/pooled connection.
#[derive(Clone)]
pub struct WorkerDeps {
    pub pool: PgPool,
    pub broker: Arc<dyn Broker>,
    pub object_store: Arc<dyn ObjectStore>,
    pub content_loader: Arc<dyn ContentLoader>,
    pub metadata_extractor: Arc<dyn MetadataExtractor>,
    pub encoder: Arc<dyn TokenEncoder>,
    pub process_time_stats: Arc<dyn ProcessTimeStats>,
    pub model: Arc<dyn ModelClient>,
    pub staging: StagingStore,
    pub parallel_files: usize,
    pub max_tokens_per_unit: usize,
    pub preprocess_claim_timeout_secs: i64,
    pub graph_claim_timeout_secs: i64,
    pub lease_ttl_secs: u64,
}

async fn load_project_files(pool: &PgPool, ids: &[graph_types::ProjectFileId]) -> Result<Vec<ProjectFile>> {
    let rows = sqlx::query_as::<_, ProjectFile>(
        "SELECT id, project_id, name, file_key, ext, metadata, token_count, deleted_at \
         FROM project_files WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Runs one iteration of the preprocess consumer: pulls a message, claims
/// the batch, runs the stage, republishes onto the graph queue on success.
async fn handle_one_preprocess_message(deps: &WorkerDeps) -> Result<bool> {
    let Some(delivery) = deps.broker.next(PREPROCESS_QUEUE, POLL_WAIT).await? else {
        return Ok(false);
    };

    let msg: QueueProjectFileMsg = match decode_json(&delivery) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "undecodable preprocess message, dropping");
            delivery.ack().await?;
            return Ok(true);
        }
    };

    let claimed = crate::batch::try_start_preprocessing(
        &deps.pool,
        msg.correlation_id,
        msg.batch_id,
        deps.preprocess_claim_timeout_secs,
    )
    .await?;
    if claimed.is_none() {
        delivery.ack().await?;
        return Ok(true);
    }

    let ids: Vec<graph_types::ProjectFileId> = msg.project_files.iter().map(|f| f.id).collect();
    let files = load_project_files(&deps.pool, &ids).await?;

    let result = crate::stage::preprocess::run_preprocess(
        &deps.pool,
        deps.object_store.as_ref(),
        deps.content_loader.as_ref(),
        deps.metadata_extractor.as_ref(),
        deps.encoder.as_ref(),
        deps.process_time_stats.as_ref(),
        msg.correlation_id,
        msg.batch_id,
        &files,
    )
    .await;

    match result {
        Ok(()) => {
            publish_json(deps.broker.as_ref(), GRAPH_QUEUE, &msg).await?;
            delivery.ack().await?;
        }
        Err(e) => {
            crate::recovery::reset_batch_status_for_retry(
                &deps.pool,
                deps.broker.as_ref(),
                msg.correlation_id,
                msg.batch_id,
            )
            .await?;
            crate::batch::mark_failed(&deps.pool, msg.correlation_id, msg.batch_id, &e.to_string()).await?;
            delivery.nak().await?;
        }
    }

    Ok(true)
}

pub async fn run_preprocess_consumer(deps: WorkerDeps, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            result = handle_one_preprocess_message(&deps) => result,
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "preprocess consumer iteration failed");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

struct StagedBundle {
    units: Vec<TextUnit>,
    entities: Vec<Entity>,
    entity_sources: Vec<EntitySource>,
    relationships: Vec<Relationship>,
    relationship_sources: Vec<RelationshipSource>,
}

#[derive(serde::Deserialize)]
struct StagedEntityPayload {
    entity: Entity,
    sources: Vec<EntitySource>,
}

#[derive(serde::Deserialize)]
struct StagedRelationshipPayload {
    relationship: Relationship,
    sources: Vec<RelationshipSource>,
}

async fn load_staged_bundle(
    staging: &StagingStore,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<StagedBundle> {
    let unit_rows = staging.load(correlation_id, batch_id, StagedKind::Unit).await?;
    let entity_rows = staging.load(correlation_id, batch_id, StagedKind::Entity).await?;
    let relationship_rows = staging.load(correlation_id, batch_id, StagedKind::Relationship).await?;

    let mut units = Vec::with_capacity(unit_rows.len());
    for row in unit_rows {
        units.push(serde_json::from_value(row.data).map_err(|e| CoreError::Model(Box::new(e)))?);
    }

    let mut entities = Vec::with_capacity(entity_rows.len());
    let mut entity_sources = Vec::new();
    for row in entity_rows {
        let payload: StagedEntityPayload =
            serde_json::from_value(row.data).map_err(|e| CoreError::Model(Box::new(e)))?;
        entities.push(payload.entity);
        entity_sources.extend(payload.sources);
    }

    let mut relationships = Vec::with_capacity(relationship_rows.len());
    let mut relationship_sources = Vec::new();
    for row in relationship_rows {
        let payload: StagedRelationshipPayload =
            serde_json::from_value(row.data).map_err(|e| CoreError::Model(Box::new(e)))?;
        relationships.push(payload.relationship);
        relationship_sources.extend(payload.sources);
    }

    Ok(StagedBundle {
        units,
        entities,
        entity_sources,
        relationships,
        relationship_sources,
    })
}

/// Phase B (§4.3 steps under lease) plus finalization. Runs after Phase A
/// has staged the batch and advanced it to `indexing`.
async fn run_merge_and_finalize(
    deps: &WorkerDeps,
    project_id: ProjectId,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<()> {
    let key = project_lock_key(project_id.as_uuid());
    let lease = crate::lease::acquire(
        &deps.pool,
        &key,
        LeaseOptions {
            ttl: Duration::from_secs(deps.lease_ttl_secs),
            mode: AcquireMode::Wait,
            ..Default::default()
        },
    )
    .await?;

    let outcome = run_merge_under_lease(deps, project_id, correlation_id, batch_id).await;

    if outcome.is_err() {
        // Best-effort: drop the staged rows so a retry doesn't double-merge
        // a half-applied batch (§4.3 Phase B "on failure of any sub-step").
        let _ = deps.staging.clear(correlation_id, batch_id).await;
    }

    lease.release().await;
    outcome?;

    crate::batch::mark_completed(&deps.pool, correlation_id, batch_id).await?;

    if crate::batch::is_correlation_complete(&deps.pool, correlation_id).await? {
        finalize_correlation(deps, project_id, correlation_id).await?;
    }

    Ok(())
}

async fn run_merge_under_lease(
    deps: &WorkerDeps,
    project_id: ProjectId,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<()> {
    let bundle = load_staged_bundle(&deps.staging, correlation_id, batch_id).await?;

    let merge_result = merge_staged_batch(
        &deps.pool,
        deps.model.as_ref(),
        project_id,
        &bundle.units,
        bundle.entities,
        bundle.entity_sources,
        bundle.relationships,
        bundle.relationship_sources,
    )
    .await?;

    let started = std::time::Instant::now();

    let mut tx = deps.pool.begin().await?;
    run_cross_document_dedup(&mut tx, deps.model.as_ref(), project_id, CrossDocDedupConfig::default()).await?;
    tx.commit().await?;

    let unit_ids: Vec<_> = merge_result.text_unit_ids.values().copied().collect();
    for entity_id in merge_result.entity_ids.values() {
        regenerate_entity_description_for_units(&deps.pool, deps.model.as_ref(), *entity_id, Some(&unit_ids)).await?;
    }
    for relationship_id in merge_result.relationship_ids.values() {
        regenerate_relationship_description_for_units(
            &deps.pool,
            deps.model.as_ref(),
            *relationship_id,
            Some(&unit_ids),
        )
        .await?;
    }

    deps.staging.clear(correlation_id, batch_id).await?;

    let total_tokens: i64 = bundle.units.iter().map(|u| deps.encoder.count(&u.text) as i64).sum();
    let duration_ms = started.elapsed().as_millis() as i64;
    let _ = deps
        .process_time_stats
        .observe(ProcessTimeKind::GraphUpdate, total_tokens, duration_ms)
        .await;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct AffectedEntityRow {
    id: uuid::Uuid,
}

#[derive(sqlx::FromRow)]
struct AffectedRelationshipRow {
    id: uuid::Uuid,
}

/// §4.8: collects the entities+relationships touched by any batch of
/// `correlation_id`'s files and shards/publishes description jobs, then
/// checks whether the project can flip to `ready`.
async fn finalize_correlation(deps: &WorkerDeps, project_id: ProjectId, correlation_id: CorrelationId) -> Result<()> {
    let already_planned: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM description_jobs WHERE correlation_id = $1",
    )
    .bind(correlation_id.as_uuid())
    .fetch_one(&deps.pool)
    .await?;

    if already_planned == 0 {
        let entity_rows = sqlx::query_as::<_, AffectedEntityRow>(
            r#"
            SELECT DISTINCT e.id
            FROM entities e
            JOIN entity_sources es ON es.entity_id = e.id
            JOIN text_units tu ON tu.id = es.text_unit_id
            JOIN project_files pf ON pf.id = tu.project_file_id
            JOIN batches b ON b.project_id = pf.project_id AND pf.id = ANY(b.file_ids)
            WHERE b.correlation_id = $1
            "#,
        )
        .bind(correlation_id.as_uuid())
        .fetch_all(&deps.pool)
        .await?;

        let relationship_rows = sqlx::query_as::<_, AffectedRelationshipRow>(
            r#"
            SELECT DISTINCT r.id
            FROM relationships r
            JOIN relationship_sources rs ON rs.relationship_id = r.id
            JOIN text_units tu ON tu.id = rs.text_unit_id
            JOIN project_files pf ON pf.id = tu.project_file_id
            JOIN batches b ON b.project_id = pf.project_id AND pf.id = ANY(b.file_ids)
            WHERE b.correlation_id = $1
            "#,
        )
        .bind(correlation_id.as_uuid())
        .fetch_all(&deps.pool)
        .await?;

        let entity_ids: Vec<EntityId> = entity_rows.into_iter().map(|r| EntityId::from_uuid(r.id)).collect();
        let relationship_ids: Vec<RelationshipId> = relationship_rows
            .into_iter()
            .map(|r| RelationshipId::from_uuid(r.id))
            .collect();

        let shards = plan_shards(entity_ids, relationship_ids, DESCRIPTION_SHARD_SIZE);
        let jobs = create_description_jobs(&deps.pool, correlation_id, &shards).await?;

        for job in &jobs {
            let msg = QueueDescriptionJobMsg {
                project_id,
                correlation_id,
                job_id: job.job_id,
                total_jobs: job.total_jobs,
                entity_ids: job.entity_ids.clone(),
                relationship_ids: job.relationship_ids.clone(),
            };
            publish_json(deps.broker.as_ref(), DESCRIPTION_QUEUE, &msg).await?;
        }
    }

    maybe_mark_project_ready(deps, project_id, correlation_id).await
}

async fn are_all_description_jobs_completed(pool: &PgPool, correlation_id: CorrelationId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM description_jobs WHERE correlation_id = $1 AND status <> 'completed'",
    )
    .bind(correlation_id.as_uuid())
    .fetch_one(pool)
    .await?;
    Ok(count == 0)
}

async fn is_latest_correlation(pool: &PgPool, project_id: ProjectId, correlation_id: CorrelationId) -> Result<bool> {
    let latest: Option<uuid::Uuid> = sqlx::query_scalar(
        "SELECT latest_correlation_id FROM projects WHERE id = $1",
    )
    .bind(project_id.as_uuid())
    .fetch_one(pool)
    .await?;
    Ok(latest == Some(*correlation_id.as_uuid()))
}

async fn maybe_mark_project_ready(deps: &WorkerDeps, project_id: ProjectId, correlation_id: CorrelationId) -> Result<()> {
    if !crate::batch::is_correlation_complete(&deps.pool, correlation_id).await? {
        return Ok(());
    }
    if !are_all_description_jobs_completed(&deps.pool, correlation_id).await? {
        return Ok(());
    }
    if !is_latest_correlation(&deps.pool, project_id, correlation_id).await? {
        // A newer correlation superseded this one; leave project state alone.
        return Ok(());
    }

    sqlx::query("UPDATE projects SET state = 'ready' WHERE id = $1")
        .bind(project_id.as_uuid())
        .execute(&deps.pool)
        .await?;

    Ok(())
}

async fn handle_one_graph_message(deps: &WorkerDeps) -> Result<bool> {
    let Some(delivery) = deps.broker.next(GRAPH_QUEUE, POLL_WAIT).await? else {
        return Ok(false);
    };

    let msg: QueueProjectFileMsg = match decode_json(&delivery) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "undecodable graph message, dropping");
            delivery.ack().await?;
            return Ok(true);
        }
    };

    let claimed = crate::batch::try_start_extracting(
        &deps.pool,
        msg.correlation_id,
        msg.batch_id,
        deps.graph_claim_timeout_secs,
    )
    .await?;
    if claimed.is_none() {
        delivery.ack().await?;
        return Ok(true);
    }

    let ids: Vec<graph_types::ProjectFileId> = msg.project_files.iter().map(|f| f.id).collect();
    let files = load_project_files(&deps.pool, &ids).await?;

    let stage_result = crate::stage::extract::run_extract_and_stage(
        &deps.pool,
        deps.object_store.as_ref(),
        deps.model.as_ref(),
        deps.encoder.as_ref(),
        &deps.staging,
        msg.project_id,
        msg.correlation_id,
        msg.batch_id,
        &files,
        deps.parallel_files,
        deps.max_tokens_per_unit,
    )
    .await;

    let result = match stage_result {
        Ok(()) => run_merge_and_finalize(deps, msg.project_id, msg.correlation_id, msg.batch_id).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => delivery.ack().await?,
        Err(e) => {
            crate::recovery::reset_batch_status_for_retry(
                &deps.pool,
                deps.broker.as_ref(),
                msg.correlation_id,
                msg.batch_id,
            )
            .await?;
            crate::batch::mark_failed(&deps.pool, msg.correlation_id, msg.batch_id, &e.to_string()).await?;
            delivery.nak().await?;
        }
    }

    Ok(true)
}

pub async fn run_graph_consumer(deps: WorkerDeps, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            result = handle_one_graph_message(&deps) => result,
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "graph consumer iteration failed");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn try_start_description_job(
    pool: &PgPool,
    correlation_id: CorrelationId,
    job_id: graph_types::DescriptionJobId,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        UPDATE description_jobs
        SET status = 'running'
        WHERE correlation_id = $1 AND job_id = $2 AND status IN ('pending', 'failed')
        "#,
    )
    .bind(correlation_id.as_uuid())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(row.rows_affected() > 0)
}

async fn mark_description_job_completed(
    pool: &PgPool,
    correlation_id: CorrelationId,
    job_id: graph_types::DescriptionJobId,
    message: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "UPDATE description_jobs SET status = 'completed', error_message = $3 \
         WHERE correlation_id = $1 AND job_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(job_id)
    .bind(message)
    .execute(pool)
    .await?;
    Ok(())
}

async fn mark_description_job_failed(
    pool: &PgPool,
    correlation_id: CorrelationId,
    job_id: graph_types::DescriptionJobId,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE description_jobs SET status = 'failed', error_message = $3 \
         WHERE correlation_id = $1 AND job_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Restricts description regeneration to the unit ids belonging to this
/// correlation's files (§4.8 "job execution").
async fn correlation_unit_ids(pool: &PgPool, correlation_id: CorrelationId) -> Result<Vec<graph_types::TextUnitId>> {
    let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT tu.id
        FROM text_units tu
        JOIN project_files pf ON pf.id = tu.project_file_id
        JOIN batches b ON b.project_id = pf.project_id AND pf.id = ANY(b.file_ids)
        WHERE b.correlation_id = $1
        "#,
    )
    .bind(correlation_id.as_uuid())
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().map(graph_types::TextUnitId::from_uuid).collect())
}

async fn run_description_job(deps: &WorkerDeps, msg: &QueueDescriptionJobMsg) -> Result<()> {
    if !is_latest_correlation(&deps.pool, msg.project_id, msg.correlation_id).await? {
        mark_description_job_completed(
            &deps.pool,
            msg.correlation_id,
            msg.job_id,
            Some(graph_types::SKIPPED_SUPERSEDED_MESSAGE),
        )
        .await?;
        return Ok(());
    }

    let unit_ids = correlation_unit_ids(&deps.pool, msg.correlation_id).await?;

    for entity_id in &msg.entity_ids {
        regenerate_entity_description_for_units(&deps.pool, deps.model.as_ref(), *entity_id, Some(&unit_ids)).await?;
    }
    for relationship_id in &msg.relationship_ids {
        regenerate_relationship_description_for_units(
            &deps.pool,
            deps.model.as_ref(),
            *relationship_id,
            Some(&unit_ids),
        )
        .await?;
    }

    mark_description_job_completed(&deps.pool, msg.correlation_id, msg.job_id, None).await?;
    maybe_mark_project_ready(deps, msg.project_id, msg.correlation_id).await
}

async fn handle_one_description_message(deps: &WorkerDeps) -> Result<bool> {
    let Some(delivery) = deps.broker.next(DESCRIPTION_QUEUE, POLL_WAIT).await? else {
        return Ok(false);
    };

    let msg: QueueDescriptionJobMsg = match decode_json(&delivery) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "undecodable description message, dropping");
            delivery.ack().await?;
            return Ok(true);
        }
    };

    let claimed = try_start_description_job(&deps.pool, msg.correlation_id, msg.job_id).await?;
    if !claimed {
        delivery.ack().await?;
        return Ok(true);
    }

    match run_description_job(deps, &msg).await {
        Ok(()) => delivery.ack().await?,
        Err(e) => {
            mark_description_job_failed(&deps.pool, msg.correlation_id, msg.job_id, &e.to_string()).await?;
            delivery.nak().await?;
        }
    }

    Ok(true)
}

pub async fn run_description_consumer(deps: WorkerDeps, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            result = handle_one_description_message(&deps) => result,
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "description consumer iteration failed");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Runs one iteration of the delete consumer (§4.4): pulls a message off
/// `delete_queue` and runs the full drain-lease-delete-cleanup sequence for
/// that project. `cancel` also governs the stage's own drain wait.
async fn handle_one_delete_message(deps: &WorkerDeps, cancel: &CancellationToken) -> Result<bool> {
    let Some(delivery) = deps.broker.next(DELETE_QUEUE, POLL_WAIT).await? else {
        return Ok(false);
    };

    let msg: QueueDeleteMsg = match decode_json(&delivery) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "undecodable delete message, dropping");
            delivery.ack().await?;
            return Ok(true);
        }
    };

    let result = crate::stage::delete::run_delete(
        &deps.pool,
        deps.object_store.as_ref(),
        deps.model.as_ref(),
        msg.project_id,
        cancel,
        deps.lease_ttl_secs,
    )
    .await;

    match result {
        Ok(()) => delivery.ack().await?,
        Err(e) => {
            tracing::error!(error = %e, project_id = %msg.project_id, "delete stage failed");
            delivery.nak().await?;
        }
    }

    Ok(true)
}

pub async fn run_delete_consumer(deps: WorkerDeps, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            result = handle_one_delete_message(&deps, &cancel) => result,
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "delete consumer iteration failed");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

/// Runs `recover_stale_batches` on a fixed interval until cancelled (§4.9).
pub async fn run_recovery_loop(
    pool: PgPool,
    broker: Arc<dyn Broker>,
    interval: Duration,
    stale_threshold: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        match crate::recovery::recover_stale_batches(&pool, broker.as_ref(), stale_threshold).await {
            Ok(count) if count > 0 => tracing::info!(count, "recovered stale batches"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "stale batch recovery sweep failed"),
        }
    }
}
