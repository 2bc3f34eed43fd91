use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata record kept in `<workspace>/codebase.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_job_id: Option<String>,
}

impl CodebaseMeta {
    pub fn new(id: &str, owner: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            label: Some(id.to_string()),
            owner: owner.to_string(),
            created_at: now,
            last_used_at: now,
            last_job_id: None,
        }
    }

    /// Refresh `last_used_at` for a run of `job_id`
    pub fn touch(&mut self, job_id: &str) {
        self.last_used_at = Utc::now();
        self.last_job_id = Some(job_id.to_string());
    }
}
