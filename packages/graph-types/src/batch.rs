use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, CorrelationId, ProjectFileId, ProjectId};

/// §4.1 batch state machine. Transitions are strictly monotone except for
/// `Failed`, reachable from any active state (I4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Preprocessing,
    Preprocessed,
    Extracting,
    Indexing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// The "active predecessor" a batch is reset to on recovery/retry
    /// (§4.9: preprocessing -> pending; extracting/indexing -> preprocessed).
    pub fn active_predecessor(self) -> Option<BatchStatus> {
        match self {
            BatchStatus::Preprocessing => Some(BatchStatus::Pending),
            BatchStatus::Extracting | BatchStatus::Indexing => Some(BatchStatus::Preprocessed),
            _ => None,
        }
    }

    /// Whether a claim may start from this status (§4.1 claim protocol:
    /// "iff current status is pending or failed").
    pub fn is_claimable(self) -> bool {
        matches!(self, BatchStatus::Pending | BatchStatus::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "batch_operation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BatchOperation {
    Create,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Batch {
    pub correlation_id: CorrelationId,
    pub batch_id: BatchId,
    pub project_id: ProjectId,
    pub total_batches: i32,
    pub operation: BatchOperation,
    pub file_ids: Vec<ProjectFileId>,
    pub status: BatchStatus,
    pub estimated_duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// §3 DescriptionJob: a shard of entities+relationships touched by one
/// correlation, ordered and partitioned by the description job planner
/// (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "description_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DescriptionJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DescriptionJobStatus {
    pub fn is_claimable(self) -> bool {
        matches!(
            self,
            DescriptionJobStatus::Pending | DescriptionJobStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionJob {
    pub correlation_id: CorrelationId,
    pub job_id: crate::ids::DescriptionJobId,
    pub total_jobs: i32,
    pub entity_ids: Vec<crate::ids::EntityId>,
    pub relationship_ids: Vec<crate::ids::RelationshipId>,
    pub status: DescriptionJobStatus,
    pub error_message: Option<String>,
}

/// The message body a superseded description job records instead of
/// treating it as an error (§7 "Superseded correlation").
pub const SKIPPED_SUPERSEDED_MESSAGE: &str = "skipped: superseded correlation";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_predecessor_matches_state_machine() {
        assert_eq!(
            BatchStatus::Preprocessing.active_predecessor(),
            Some(BatchStatus::Pending)
        );
        assert_eq!(
            BatchStatus::Extracting.active_predecessor(),
            Some(BatchStatus::Preprocessed)
        );
        assert_eq!(
            BatchStatus::Indexing.active_predecessor(),
            Some(BatchStatus::Preprocessed)
        );
        assert_eq!(BatchStatus::Pending.active_predecessor(), None);
        assert_eq!(BatchStatus::Completed.active_predecessor(), None);
    }

    #[test]
    fn only_pending_and_failed_are_claimable() {
        for status in [
            BatchStatus::Pending,
            BatchStatus::Preprocessing,
            BatchStatus::Preprocessed,
            BatchStatus::Extracting,
            BatchStatus::Indexing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(
                status.is_claimable(),
                matches!(status, BatchStatus::Pending | BatchStatus::Failed)
            );
        }
    }
}
