//! Process-time statistics (§4.2 "update batch's estimated_duration_ms from
//! the historical tokens->duration predictor", §4.3 "Record a process_time
//! sample").
//!
//! Grounded in the teacher's split between a metrics repository and the job
//! runner that reads it (`postgresflow`'s `MetricsRepo` / `JobRunner`).

use async_trait::async_trait;
use sqlx::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessTimeKind {
    Preprocess,
    GraphCreation,
    GraphUpdate,
}

impl ProcessTimeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessTimeKind::Preprocess => "preprocess",
            ProcessTimeKind::GraphCreation => "graph_creation",
            ProcessTimeKind::GraphUpdate => "graph_update",
        }
    }
}

#[async_trait]
pub trait ProcessTimeStats: Send + Sync {
    async fn observe(
        &self,
        kind: ProcessTimeKind,
        tokens: i64,
        duration_ms: i64,
    ) -> anyhow::Result<()>;

    /// Predicts a duration in ms for `tokens`, based on historical samples
    /// of this kind. Returns `None` if there is no history yet.
    async fn predict_duration_ms(&self, kind: ProcessTimeKind, tokens: i64) -> anyhow::Result<Option<i64>>;
}

pub struct PostgresProcessTimeStats {
    pool: PgPool,
}

impl PostgresProcessTimeStats {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessTimeStats for PostgresProcessTimeStats {
    async fn observe(&self, kind: ProcessTimeKind, tokens: i64, duration_ms: i64) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO process_time_stats (kind, tokens, duration_ms, observed_at) \
             VALUES ($1, $2, $3, NOW())",
        )
        .bind(kind.as_str())
        .bind(tokens)
        .bind(duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn predict_duration_ms(&self, kind: ProcessTimeKind, tokens: i64) -> anyhow::Result<Option<i64>> {
        // Average ms-per-token over recent history for this kind, scaled to
        // the requested token count. A simple linear predictor, adequate
        // for the estimated_duration_ms progress hint it feeds (§4.2).
        let row: Option<(Option<f64>,)> = sqlx::query_as(
            "SELECT AVG(duration_ms::float8 / GREATEST(tokens, 1)) FROM ( \
                SELECT duration_ms, tokens FROM process_time_stats \
                WHERE kind = $1 ORDER BY observed_at DESC LIMIT 200 \
             ) recent",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        let row = row.and_then(|(avg,)| avg.map(|v| (v,)));

        Ok(row.map(|(ms_per_token,)| (ms_per_token * tokens as f64) as i64))
    }
}
