//! Persisted record of a sync run
//!
//! Written at start, refreshed on progress and finalized with the report, so
//! external collaborators (audit log, dashboards) can read run outcomes.

use chrono::{DateTime, Utc};
use civtrack_common::events::SyncKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncRunState {
    Running,
    /// Finished with `success = true` (item errors may still be present)
    Completed,
    /// Could not obtain the initial list
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub kind: SyncKind,
    pub state: SyncRunState,
    pub progress_percentage: u8,
    pub current_operation: String,
    /// Serialized stats of the matching report type
    pub stats: serde_json::Value,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncRun {
    pub fn start(kind: SyncKind) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            kind,
            state: SyncRunState::Running,
            progress_percentage: 0,
            current_operation: String::new(),
            stats: serde_json::Value::Null,
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to the terminal state matching `success`
    pub fn finish(&mut self, success: bool, stats: serde_json::Value, errors: Vec<String>) {
        self.state = if success {
            SyncRunState::Completed
        } else {
            SyncRunState::Failed
        };
        self.progress_percentage = 100;
        self.stats = stats;
        self.errors = errors;
        self.ended_at = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.state == SyncRunState::Running
    }
}
