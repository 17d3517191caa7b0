//! Ensemble providers
//!
//! LLM collaborator abstractions: the chat-completion client trait with an
//! OpenAI-compatible HTTP implementation and scripted test doubles, plus
//! the parser turning raw model output into the closed set of ReAct shapes.

pub mod client;
pub mod output;

pub use client::{
    ChatCompletionOutput, ChatCompletionRequest, ChatMessage, HttpLlmClient, LlmClient, LlmError,
    LlmInvocation, RecordedCall, Role, ScriptedLlmClient,
};
pub use output::{parse_agent_output, AgentOutput, OutputParseError};
