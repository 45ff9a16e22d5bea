//! Staging store: an ephemeral, append-only layer for units/entities/
//! relationships produced by Phase A, visible only until Phase B merges or
//! rolls them back (§4.3, I5).

use sqlx::PgPool;

use graph_types::{BatchId, CorrelationId, ProjectId, StagedKind, StagedRow};

use crate::error::Result;

pub struct StagingStore {
    pool: PgPool,
}

impl StagingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upserts one staged row. Retries are idempotent: callers delete any
    /// previously-staged rows for `(correlation, batch)` before writing
    /// (§4.3 "Cleanup"), so this never needs to dedup itself.
    pub async fn stage(&self, row: &StagedRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO staged_data (correlation_id, batch_id, project_id, kind, data)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(row.correlation_id.as_uuid())
        .bind(row.batch_id)
        .bind(row.project_id.as_uuid())
        .bind(row.kind)
        .bind(&row.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn stage_all(&self, rows: &[StagedRow]) -> Result<()> {
        for row in rows {
            self.stage(row).await?;
        }
        Ok(())
    }

    /// Deletes any previously-staged rows for `(correlation, batch)` —
    /// called both before writing (idempotent retry) and on rollback.
    pub async fn clear(&self, correlation_id: CorrelationId, batch_id: BatchId) -> Result<()> {
        sqlx::query("DELETE FROM staged_data WHERE correlation_id = $1 AND batch_id = $2")
            .bind(correlation_id.as_uuid())
            .bind(batch_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn load(
        &self,
        correlation_id: CorrelationId,
        batch_id: BatchId,
        kind: StagedKind,
    ) -> Result<Vec<StagedRow>> {
        let rows = sqlx::query_as::<_, StagedRowRecord>(
            r#"
            SELECT correlation_id, batch_id, project_id, kind, data
            FROM staged_data
            WHERE correlation_id = $1 AND batch_id = $2 AND kind = $3
            "#,
        )
        .bind(correlation_id.as_uuid())
        .bind(batch_id)
        .bind(kind)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StagedRowRecord::into_staged_row).collect())
    }

    pub async fn load_all_kinds(
        &self,
        correlation_id: CorrelationId,
        batch_id: BatchId,
        project_id: ProjectId,
    ) -> Result<Vec<StagedRow>> {
        let mut all = Vec::new();
        for kind in [StagedKind::Unit, StagedKind::Entity, StagedKind::Relationship] {
            all.extend(self.load(correlation_id, batch_id, kind).await?);
        }
        let _ = project_id;
        Ok(all)
    }
}

#[derive(sqlx::FromRow)]
struct StagedRowRecord {
    correlation_id: uuid::Uuid,
    batch_id: BatchId,
    project_id: uuid::Uuid,
    kind: StagedKind,
    data: serde_json::Value,
}

impl StagedRowRecord {
    fn into_staged_row(self) -> StagedRow {
        StagedRow {
            correlation_id: graph_types::Id::from_uuid(self.correlation_id),
            batch_id: self.batch_id,
            project_id: graph_types::Id::from_uuid(self.project_id),
            kind: self.kind,
            data: self.data,
        }
    }
}
