//! Claim protocol (§4.1): atomic conditional updates that move a batch to
//! its next active status. Every stage's consumer calls one of these before
//! doing any work; "no row" means acking and exiting, not an error.

use sqlx::PgPool;

use graph_types::{Batch, BatchId, BatchStatus, CorrelationId};

use crate::error::Result;

/// Defaults for `Config::from_env`'s `BATCH_CLAIM_TIMEOUT_SECS` (per stage);
/// used directly only by callers that don't thread a configured value
/// through (e.g. tests).
pub const PREPROCESS_CLAIM_TIMEOUT_SECS: i64 = 600;
pub const GRAPH_CLAIM_TIMEOUT_SECS: i64 = 1800;

async fn try_claim(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    next: BatchStatus,
    timeout_secs: i64,
) -> Result<Option<Batch>> {
    let row = sqlx::query_as::<_, Batch>(
        r#"
        UPDATE batches
        SET status = $3, updated_at = NOW()
        WHERE correlation_id = $1 AND batch_id = $2
          AND status IN ('pending', 'failed')
          AND updated_at < NOW() - ($4 * INTERVAL '1 second')
        RETURNING *
        "#,
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .bind(next)
    .bind(timeout_secs)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// `TryStartPreprocessingBatch` (§4.1: `pending|failed` -> `preprocessing`).
pub async fn try_start_preprocessing(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    timeout_secs: i64,
) -> Result<Option<Batch>> {
    try_claim(
        pool,
        correlation_id,
        batch_id,
        BatchStatus::Preprocessing,
        timeout_secs,
    )
    .await
}

/// `TryStartGraphBatch` (§4.1: `preprocessed|failed` -> `extracting`). The
/// claim predicate differs from preprocessing's — it admits `preprocessed`,
/// not `pending` — so this doesn't reuse `try_claim`.
pub async fn try_start_extracting(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    timeout_secs: i64,
) -> Result<Option<Batch>> {
    let row = sqlx::query_as::<_, Batch>(
        r#"
        UPDATE batches
        SET status = 'extracting', updated_at = NOW()
        WHERE correlation_id = $1 AND batch_id = $2
          AND status IN ('preprocessed', 'failed')
          AND updated_at < NOW() - ($3 * INTERVAL '1 second')
        RETURNING *
        "#,
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .bind(timeout_secs)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// `preprocessed→extracting` and `extracting→indexing` happen within one
/// worker message (§4.1); this just advances the in-memory/DB status once
/// Phase A has finished staging.
pub async fn advance_to_indexing(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<()> {
    sqlx::query(
        "UPDATE batches SET status = 'indexing', updated_at = NOW() \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_completed(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<()> {
    sqlx::query(
        "UPDATE batches SET status = 'completed', updated_at = NOW() \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_preprocessed(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
) -> Result<()> {
    sqlx::query(
        "UPDATE batches SET status = 'preprocessed', updated_at = NOW() \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Truncates an error to a reasonable column width before persisting it.
fn truncate_error(message: &str) -> String {
    const MAX_LEN: usize = 2000;
    if message.len() <= MAX_LEN {
        message.to_string()
    } else {
        format!("{}... (truncated)", &message[..MAX_LEN])
    }
}

/// Deferred failure handler (§4.1, §7 "Transient I/O"): marks the batch
/// `failed` with a truncated error message. Runs with its own 5s timeout so
/// it still records even if the caller's context was already cancelled.
pub async fn mark_failed(
    pool: &PgPool,
    correlation_id: CorrelationId,
    batch_id: BatchId,
    error: &str,
) -> Result<()> {
    let truncated = truncate_error(error);
    let deadline = std::time::Duration::from_secs(5);
    let query = sqlx::query(
        "UPDATE batches SET status = 'failed', error_message = $3, updated_at = NOW() \
         WHERE correlation_id = $1 AND batch_id = $2",
    )
    .bind(correlation_id.as_uuid())
    .bind(batch_id)
    .bind(&truncated);

    match tokio::time::timeout(deadline, query.execute(pool)).await {
        Ok(result) => {
            result?;
        }
        Err(_) => {
            tracing::warn!(
                batch_id = %batch_id,
                "timed out marking batch failed within deferred 5s window"
            );
        }
    }

    Ok(())
}

pub async fn is_correlation_complete(pool: &PgPool, correlation_id: CorrelationId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM batches WHERE correlation_id = $1 AND status <> 'completed'",
    )
    .bind(correlation_id.as_uuid())
    .fetch_one(pool)
    .await?;
    Ok(count == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_error_messages() {
        let long = "x".repeat(3000);
        let truncated = truncate_error(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with("(truncated)"));
    }

    #[test]
    fn leaves_short_errors_untouched() {
        assert_eq!(truncate_error("boom"), "boom");
    }
}
