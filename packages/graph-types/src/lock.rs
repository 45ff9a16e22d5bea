use serde::{Deserialize, Serialize};

/// §3 AppLock: single-row mutex per key, backing the §4.5 lease lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppLock {
    pub lock_key: String,
    /// Fencing token: unique per `Acquire`.
    pub locked_by: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// The lock key for a project's merge/delete mutex (§4.3, §4.4: "Acquire a
/// lease on key `project:<id>`").
pub fn project_lock_key(project_id: impl std::fmt::Display) -> String {
    format!("project:{project_id}")
}
