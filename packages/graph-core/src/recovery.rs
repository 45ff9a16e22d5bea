//! Crash recovery (§4.9): a periodic sweep resets batches stuck in an active
//! status past a staleness threshold back to their active predecessor and
//! republishes them, plus a hook the broker's retry path calls to do the
//! same for one message without waiting for the sweep.

use std::time::Duration;

use sqlx::PgPool;

use graph_types::{
    BatchId, BatchStatus, CorrelationId, ProjectFileId, QueueProjectFile, QueueProjectFileMsg,
    GRAPH_QUEUE, PREPROCESS_QUEUE,
};

use crate::error::Result;
use crate::queue::{publish_json, Broker};

/// Default for `Config::from_env`'s `STALE_BATCH_THRESHOLD_SECS`: a batch is
/// considered abandoned once it's sat in an active status this long without
/// a status-row update (§4.9: recommended 10 minutes).
pub const STALE_THRESHOLD: Duration = Duration::from_secs(600);

#[derive(sqlx::FromRow)]
struct StaleBatchRow {
    correlation_id: CorrelationId,
    batch_id: BatchId,
    status: BatchStatus,
}

/// `GetStaleBatches`: active-status batches whose last update predates
/// `threshold`.
async fn get_stale_batches(pool: &PgPool, threshold: Duration) -> Result<Vec<StaleBatchRow>> {
    let rows = sqlx::query_as::<_, StaleBatchRow>(
        r#"
        SELECT correlation_id, batch_id, status
        FROM batches
        WHERE status IN ('preprocessing', 'extracting', 'indexing')
          AND updated_at < NOW() - ($1 * INTERVAL '1 second')
        "#,
    )
    .bind(threshold.as_secs() as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[derive(sqlx::FromRow)]
struct BatchEnvelopeRow {
    project_id: graph_types::ProjectId,
    total_batches: i32,
    operation: graph_types::BatchOperation,
    file_ids: Vec<ProjectFileId>,
}

async fn load_envelope_fields(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<Option<BatchEnvelopeRow>> {
    let row = sqlx::query_as::<_, BatchEnvelopeRow>(
        "SELECT project_id, total_batches, operation, file_ids FROM batches \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(sqlx::FromRow)]
struct ProjectFileRow {
    id: ProjectFileId,
    name: String,
    file_key: String,
    metadata: Option<serde_json::Value>,
}

/// Loads the still-existing (non-deleted) files for a batch. Returns `None`
/// if any of the batch's original `file_ids` no longer resolve — the batch
/// is skipped rather than republished with a partial file list (§4.9).
async fn load_surviving_files(
    pool: &PgPool,
    file_ids: &[ProjectFileId],
) -> Result<Option<Vec<ProjectFileRow>>> {
    let rows = sqlx::query_as::<_, ProjectFileRow>(
        "SELECT id, name, file_key, metadata FROM project_files \
         WHERE id = ANY($1) AND deleted_at IS NULL",
    )
    .bind(file_ids)
    .fetch_all(pool)
    .await?;

    if rows.len() != file_ids.len() {
        return Ok(None);
    }
    Ok(Some(rows))
}

async fn reset_and_republish(
    pool: &PgPool,
    broker: &dyn Broker,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    current: BatchStatus,
) -> Result<()> {
    let Some(target) = current.active_predecessor() else {
        return Ok(());
    };

    let Some(envelope_fields) = load_envelope_fields(pool, correlation_id, batch_id).await? else {
        return Ok(());
    };

    let Some(files) = load_surviving_files(pool, &envelope_fields.file_ids).await? else {
        tracing::warn!(
            %correlation_id,
            %batch_id,
            "skipping stale batch recovery: one or more files no longer exist"
        );
        return Ok(());
    };

    sqlx::query(
        "UPDATE batches SET status = $3, updated_at = NOW() \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .bind(target)
    .execute(pool)
    .await?;

    let queue = match target {
        BatchStatus::Pending => PREPROCESS_QUEUE,
        BatchStatus::Preprocessed => GRAPH_QUEUE,
        _ => return Ok(()),
    };

    let msg = QueueProjectFileMsg {
        message: "recovered".to_string(),
        project_id: envelope_fields.project_id,
        correlation_id,
        batch_id,
        total_batches: envelope_fields.total_batches,
        project_files: files
            .into_iter()
            .map(|f| QueueProjectFile {
                id: f.id,
                name: f.name,
                file_key: f.file_key,
                metadata: f.metadata,
            })
            .collect(),
        operation: envelope_fields.operation,
    };

    publish_json(broker, queue, &msg).await
}

/// `RecoverStaleBatches`: runs one sweep over every stale batch, resetting
/// and republishing each. Meant to be called on a recurring interval by the
/// worker's scheduler task.
pub async fn recover_stale_batches(pool: &PgPool, broker: &dyn Broker, threshold: Duration) -> Result<usize> {
    let stale = get_stale_batches(pool, threshold).await?;
    let count = stale.len();
    for batch in stale {
        reset_and_republish(pool, broker, batch.correlation_id, batch.batch_id, batch.status).await?;
    }
    Ok(count)
}

/// `ResetBatchStatusForRetry`: invoked by the broker's nak/retry path for one
/// specific message instead of waiting for the periodic sweep. Scoped to the
/// envelope's own `correlation_id`/`batch_id`.
pub async fn reset_batch_status_for_retry(
    pool: &PgPool,
    broker: &dyn Broker,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<()> {
    let current: Option<BatchStatus> = sqlx::query_scalar(
        "SELECT status FROM batches WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .fetch_optional(pool)
    .await?;

    let Some(current) = current else {
        return Ok(());
    };

    reset_and_republish(pool, broker, correlation_id, batch_id, current).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_threshold_is_ten_minutes() {
        assert_eq!(STALE_THRESHOLD, Duration::from_secs(600));
    }
}
