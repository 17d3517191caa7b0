//! Agent type definitions
//!
//! An agent is a policy + capabilities bundle: an identity, an LLM
//! configuration, a set of bound tools and a runtime kind.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Runtime flavor driving the agent's tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Bounded think/act/observe loop with tool use
    React,
    /// Delegates to a declarative sub-workflow
    WorkflowDriven,
}

/// Last observed activity of an agent, carried on log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Idle,
    Thinking,
    ThinkingEnd,
    Observing,
    SelfQuestion,
    UsingTool,
    UsingToolEnd,
    UsingToolError,
    ToolDoesNotExist,
    WeirdLlmOutput,
    FinalAnswer,
    TaskCompleted,
    MaxIterationsError,
    DecidedToBlockTask,
    Paused,
    Resumed,
    WorkflowStepStarted,
    WorkflowStepCompleted,
    WorkflowStepFailed,
}

/// LLM invocation parameters owned by an agent.
///
/// The api key is not stored here: `api_key_env` names the entry in the
/// agent's env map so that credential rotation via `set_env` is visible to
/// the very next HTTP call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider label (e.g. "openai")
    pub provider: String,
    /// Model identifier
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Chat-completions endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Env-map key holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bounded retries for transient provider errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    1.0
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            max_tokens: None,
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Static agent declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Unique agent name, referenced by tasks
    pub name: String,
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub background: String,
    pub kind: AgentKind,
    /// ReAct iteration budget
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Names of tools bound to this agent
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub llm_config: LlmConfig,
}

fn default_max_iterations() -> u32 {
    10
}

impl AgentDefinition {
    /// Create a ReAct agent declaration.
    pub fn react(name: impl Into<String>, role: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            background: String::new(),
            kind: AgentKind::React,
            max_iterations: default_max_iterations(),
            tools: Vec::new(),
            llm_config: LlmConfig::default(),
        }
    }

    /// Create a workflow-driven agent declaration.
    pub fn workflow_driven(
        name: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            kind: AgentKind::WorkflowDriven,
            ..Self::react(name, role, goal)
        }
    }

    pub fn with_background(mut self, background: impl Into<String>) -> Self {
        self.background = background.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_llm_config(mut self, llm_config: LlmConfig) -> Self {
        self.llm_config = llm_config;
        self
    }
}

/// Live agent record held by the team store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub definition: AgentDefinition,
    pub status: AgentStatus,
    /// API keys and proxy URLs, replaced atomically by `set_env`
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentState {
    pub fn new(definition: AgentDefinition) -> Self {
        Self {
            definition,
            status: AgentStatus::Idle,
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}
