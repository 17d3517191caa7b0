//! Workflow log - the ordered event sequence that is the system's
//! observable truth.
//!
//! Entries are appended by the team store with a monotonically increasing
//! sequence index and are never mutated or reordered. The `LogBus`
//! complements the journal held in team state:
//! - the journal persists entries for snapshot readers,
//! - the bus pushes the same entries to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::{AgentStatus, Task, TaskId, TaskStatus, WorkflowStatus};

/// Category-specific payload of a log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "log_type")]
pub enum WorkflowLogPayload {
    WorkflowStatusUpdate {
        workflow_status: WorkflowStatus,
        #[serde(default)]
        message: Option<String>,
    },
    TaskStatusUpdate {
        /// Snapshot of the task at the time of the transition
        task: Task,
        task_status: TaskStatus,
    },
    AgentStatusUpdate {
        agent_name: String,
        task_id: TaskId,
        agent_status: AgentStatus,
        /// Carried metadata: iteration index, messages, tool output, ...
        #[serde(default)]
        metadata: Value,
    },
}

/// One append-only, order-preserving workflow log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowLogEntry {
    /// Monotonically assigned sequence index
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: WorkflowLogPayload,
}

impl WorkflowLogEntry {
    /// Task status carried by this entry, when it is a `TaskStatusUpdate`.
    pub fn task_status(&self) -> Option<(&TaskId, TaskStatus)> {
        match &self.payload {
            WorkflowLogPayload::TaskStatusUpdate { task, task_status } => {
                Some((&task.id, *task_status))
            }
            _ => None,
        }
    }

    /// Workflow status carried by this entry, when it is a
    /// `WorkflowStatusUpdate`.
    pub fn workflow_status(&self) -> Option<WorkflowStatus> {
        match &self.payload {
            WorkflowLogPayload::WorkflowStatusUpdate {
                workflow_status, ..
            } => Some(*workflow_status),
            _ => None,
        }
    }

    /// Agent status carried by this entry, when it is an
    /// `AgentStatusUpdate`.
    pub fn agent_status(&self) -> Option<(&str, AgentStatus, &Value)> {
        match &self.payload {
            WorkflowLogPayload::AgentStatusUpdate {
                agent_name,
                agent_status,
                metadata,
                ..
            } => Some((agent_name.as_str(), *agent_status, metadata)),
            _ => None,
        }
    }
}

/// In-process realtime fan-out of appended log entries.
pub struct LogBus {
    tx: broadcast::Sender<WorkflowLogEntry>,
}

impl LogBus {
    /// Create a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an entry to all active subscribers.
    ///
    /// "No receiver" is not an error; the journal remains source-of-truth.
    pub fn publish(&self, entry: WorkflowLogEntry) {
        let _ = self.tx.send(entry);
    }

    /// Subscribe to entries appended from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowLogEntry> {
        self.tx.subscribe()
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
