use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, CorrelationId, ProjectId};

/// §3 StagedRow. Ephemeral: visible only until its batch completes or rolls
/// back (I5), deleted on successful merge or rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "staged_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StagedKind {
    Unit,
    Entity,
    Relationship,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedRow {
    pub correlation_id: CorrelationId,
    pub batch_id: BatchId,
    pub project_id: ProjectId,
    pub kind: StagedKind,
    pub data: serde_json::Value,
}
