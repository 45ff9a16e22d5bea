use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, ProjectFileId, ProjectId};

/// §3: project lifecycle state, driven only by the queue workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Ready,
    Create,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub state: ProjectState,
    pub current_step: Option<String>,
    pub percentage: Option<f32>,
    pub estimated_duration_ms: Option<i64>,
    /// The serialization anchor: a batch/job whose correlation differs from
    /// this is a superseded no-op at commit time (§3, §4.3 "Finalization
    /// trigger", §8 scenario 4).
    pub latest_correlation_id: Option<CorrelationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProjectFile {
    pub id: ProjectFileId,
    pub project_id: ProjectId,
    pub name: String,
    pub file_key: String,
    pub ext: String,
    pub metadata: Option<serde_json::Value>,
    pub token_count: Option<i64>,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ProjectFile {
    /// Lower-cased extension, used to dispatch the loader chain (§4.2 table).
    pub fn normalized_ext(&self) -> String {
        self.ext.trim_start_matches('.').to_ascii_lowercase()
    }
}
