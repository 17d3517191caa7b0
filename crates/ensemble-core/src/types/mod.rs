//! Core type definitions for Ensemble
//!
//! This module contains the fundamental types used throughout the system:
//! - Task: a unit of work bound to one agent, with its status state machine
//! - Agent: identity, LLM configuration, bound tools and runtime kind
//! - Team: workflow-level status and run results

mod agent;
mod task;
mod team;

pub use agent::{AgentDefinition, AgentKind, AgentState, AgentStatus, LlmConfig};
pub use task::{Task, TaskId, TaskStats, TaskStatus, TokenUsage};
pub use team::{WorkflowResult, WorkflowStats, WorkflowStatus};
