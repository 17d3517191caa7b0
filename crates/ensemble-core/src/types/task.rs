//! Task type definitions
//!
//! A task is a unit of work bound to one agent. Its status walks the
//! kanban-style state machine enforced by the team store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type alias for Task ID
pub type TaskId = String;

/// Task state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for admission
    Todo,
    /// Dispatched to its agent runtime
    Doing,
    /// Parked at a suspension point
    Paused,
    /// Transient marker emitted between `Paused` and the next `Doing`
    Resumed,
    /// Blocked by the agent; terminal unless the team is restarted
    Blocked,
    /// Completed with a result
    Done,
    /// Failed; terminal
    Errored,
}

impl TaskStatus {
    /// Check if the status is terminal for the current run
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Errored | TaskStatus::Blocked)
    }

    /// Check if the task currently occupies an execution slot
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Doing | TaskStatus::Paused | TaskStatus::Resumed)
    }

    /// Check whether `self -> next` is a legal transition.
    ///
    /// A reset to `Todo` is legal from any state (stop / restart). A
    /// runtime may finish concurrently with a pause landing on its task,
    /// so terminal outcomes are accepted from `Paused`/`Resumed` too.
    pub fn can_transition(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Todo, Doing) => true,
            (Doing, Done | Paused | Blocked | Errored) => true,
            (Paused, Resumed | Done | Blocked | Errored) => true,
            (Resumed, Doing | Done | Blocked | Errored) => true,
            (_, Todo) => true,
            _ => false,
        }
    }
}

/// Accumulated token counters extracted from provider responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Fold another usage sample into this one.
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Per-task execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStats {
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    /// ReAct iterations consumed (0 for workflow-driven agents)
    #[serde(default)]
    pub iterations: u32,
    #[serde(default)]
    pub llm_usage: TokenUsage,
}

impl TaskStats {
    /// Stamp the end time and derive the duration.
    pub fn finish(&mut self, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at);
        if let Some(started) = self.started_at {
            let millis = ended_at.signed_duration_since(started).num_milliseconds();
            self.duration_ms = Some(millis.max(0) as u64);
        }
    }
}

/// Task - a unit of work bound to one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Stable opaque identifier
    pub id: TaskId,
    /// Optional human-facing identifier
    #[serde(default)]
    pub reference_id: Option<String>,
    /// What the task should accomplish; may contain `{placeholder}` tokens
    pub description: String,
    /// Shape of the expected result, fed to the agent prompt
    pub expected_output: String,
    /// Owning agent, by name
    pub agent: String,
    /// Tasks that must be `Done` before this one is admissible
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Opt-in to the parallel admission path
    #[serde(default)]
    pub allow_parallel_execution: bool,
    /// Current status
    pub status: TaskStatus,
    /// Result recorded when the task reaches `Done`
    #[serde(default)]
    pub result: Option<Value>,
    /// Execution statistics
    #[serde(default)]
    pub stats: TaskStats,
}

impl Task {
    /// Create a new task bound to the named agent.
    pub fn new(
        description: impl Into<String>,
        expected_output: impl Into<String>,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            reference_id: None,
            description: description.into(),
            expected_output: expected_output.into(),
            agent: agent.into(),
            dependencies: Vec::new(),
            allow_parallel_execution: false,
            status: TaskStatus::Todo,
            result: None,
            stats: TaskStats::default(),
        }
    }

    /// Override the generated id with a stable one.
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a human-facing reference id.
    pub fn with_reference_id(mut self, reference_id: impl Into<String>) -> Self {
        self.reference_id = Some(reference_id.into());
        self
    }

    /// Declare dependencies by task id.
    pub fn with_dependencies(mut self, dependencies: Vec<TaskId>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Opt in to parallel execution.
    pub fn with_parallel_execution(mut self, allow: bool) -> Self {
        self.allow_parallel_execution = allow;
        self
    }

    /// Reset run-scoped state, keeping identity and bindings.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Todo;
        self.result = None;
        self.stats = TaskStats::default();
    }
}
