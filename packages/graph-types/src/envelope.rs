//! §6 broker envelope schemas: message bodies carried on `preprocess_queue`,
//! `graph_queue`, `description_queue` and `delete_queue`.

use serde::{Deserialize, Serialize};

use crate::batch::BatchOperation;
use crate::ids::{BatchId, CorrelationId, DescriptionJobId, EntityId, ProjectFileId, ProjectId, RelationshipId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueProjectFile {
    pub id: ProjectFileId,
    pub name: String,
    pub file_key: String,
    pub metadata: Option<serde_json::Value>,
}

/// Envelope carried by `preprocess_queue` and `graph_queue` (§6). The same
/// shape is republished unchanged from preprocess onto the graph queue
/// (§4.2 "publish a message with identical envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueProjectFileMsg {
    pub message: String,
    pub project_id: ProjectId,
    pub correlation_id: CorrelationId,
    pub batch_id: BatchId,
    pub total_batches: i32,
    pub project_files: Vec<QueueProjectFile>,
    pub operation: BatchOperation,
}

/// Envelope carried by `description_queue` (§6, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDescriptionJobMsg {
    pub project_id: ProjectId,
    pub correlation_id: CorrelationId,
    pub job_id: DescriptionJobId,
    pub total_jobs: i32,
    pub entity_ids: Vec<EntityId>,
    pub relationship_ids: Vec<RelationshipId>,
}

/// Envelope carried by `delete_queue` (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDeleteMsg {
    pub project_id: ProjectId,
}

pub const PREPROCESS_QUEUE: &str = "preprocess_queue";
pub const GRAPH_QUEUE: &str = "graph_queue";
pub const DESCRIPTION_QUEUE: &str = "description_queue";
pub const DELETE_QUEUE: &str = "delete_queue";

/// Sibling retry-queue name for a main queue (§6: TTL 10000ms, DLX -> default,
/// DLRK -> main).
pub fn retry_queue_name(main: &str) -> String {
    format!("{main}_retry")
}

/// Sibling dead-letter-queue name for a main queue.
pub fn dlq_name(main: &str) -> String {
    format!("{main}_dlq")
}
