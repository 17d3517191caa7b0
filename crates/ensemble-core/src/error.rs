//! Shared error taxonomy.
//!
//! Tool and parsing errors are recovered locally by the ReAct loop and
//! never surface here; everything that escalates to a task or the team is
//! one of these kinds.

use thiserror::Error;

/// Workflow error taxonomy.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// Cyclic dependencies, unknown agent, missing credential. Fails
    /// `start` synchronously.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Provider HTTP, auth or timeout failure after retry exhaustion.
    #[error("llm provider error: {0}")]
    LlmProvider(String),

    /// Tool schema mismatch or tool exception that exceeded recovery.
    #[error("tool invocation error: {0}")]
    ToolInvocation(String),

    /// Unparseable LLM output that exceeded recovery.
    #[error("malformed llm output: {0}")]
    MalformedLlmOutput(String),

    /// ReAct budget exhausted without a final answer.
    #[error("iteration limit exceeded after {iterations} iterations")]
    IterationLimitExceeded { iterations: u32 },

    /// The agent invoked `block_task`.
    #[error("task blocked: {reason}")]
    TaskBlocked { reason: String },

    /// The workflow-driven sub-workflow failed.
    #[error("sub-workflow failure: {0}")]
    SubWorkflowFailure(String),

    /// `stop` arrived during execution. Silent beyond the global
    /// `STOPPED` transition.
    #[error("cancelled")]
    Cancelled,

    /// Lifecycle operation called outside its precondition.
    #[error("invalid lifecycle transition: {0}")]
    InvalidTransition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl WorkflowError {
    /// Check if this error should fail the team when it reaches a task.
    pub fn is_fatal_for_team(&self) -> bool {
        matches!(
            self,
            WorkflowError::LlmProvider(_)
                | WorkflowError::SubWorkflowFailure(_)
                | WorkflowError::IterationLimitExceeded { .. }
                | WorkflowError::ToolInvocation(_)
                | WorkflowError::MalformedLlmOutput(_)
        )
    }
}
