//! Team-level status and result types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::TokenUsage;

/// Team workflow status state machine.
///
/// `Initial -> Running -> (Paused <-> Running) -> Finished`, with side
/// edges `Running|Paused -> Stopping -> Stopped -> Running` on restart and
/// any state to `Errored` / `Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Initial,
    Running,
    Paused,
    Stopping,
    Stopped,
    Errored,
    Finished,
    Blocked,
}

impl WorkflowStatus {
    /// Statuses from which a fresh run may begin.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Initial | WorkflowStatus::Stopped | WorkflowStatus::Finished
        )
    }

    /// Check if the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Stopped
                | WorkflowStatus::Errored
                | WorkflowStatus::Finished
                | WorkflowStatus::Blocked
        )
    }
}

/// Aggregate statistics for one workflow run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub task_count: usize,
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub llm_usage: TokenUsage,
}

/// Value returned by `Team::start` once the run reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub status: WorkflowStatus,
    /// Result of the final task when the run finished
    #[serde(default)]
    pub result: Option<Value>,
    pub stats: WorkflowStats,
    /// Failure description for `Errored` / `Blocked` runs
    #[serde(default)]
    pub error: Option<String>,
}
