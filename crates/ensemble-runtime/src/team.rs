//! Public team surface.
//!
//! A `Team` is a cheap-to-clone handle over the orchestrator. `start`
//! drives the workflow to a terminal state; `pause`/`resume`/`stop` and
//! `set_env` can be called concurrently from other tasks, and observers
//! attach through selector subscriptions, the realtime log stream or the
//! cleaned-state snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch};

use ensemble_core::error::WorkflowError;
use ensemble_core::log::WorkflowLogEntry;
use ensemble_core::store::{
    CleanedState, ListenerError, LogLevel, SubscriptionId, TeamState, TeamStore,
};
use ensemble_core::tool::{Tool, ToolRegistry};
use ensemble_core::types::{
    AgentDefinition, AgentKind, Task, WorkflowResult, WorkflowStatus,
};
use ensemble_providers::client::{HttpLlmClient, LlmClient};

use crate::flow::StepWorkflow;
use crate::orchestrator::Orchestrator;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder assembling a team from tasks, agents and collaborators.
pub struct TeamBuilder {
    name: String,
    tasks: Vec<Task>,
    agents: Vec<AgentDefinition>,
    env: HashMap<String, String>,
    tools: ToolRegistry,
    client: Option<Arc<dyn LlmClient>>,
    flows: HashMap<String, Arc<dyn StepWorkflow>>,
    log_level: LogLevel,
    tool_timeout: Duration,
}

impl TeamBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
            agents: Vec::new(),
            env: HashMap::new(),
            tools: ToolRegistry::new(),
            client: None,
            flows: HashMap::new(),
            log_level: LogLevel::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn agent(mut self, agent: AgentDefinition) -> Self {
        self.agents.push(agent);
        self
    }

    /// Shared env (API keys, proxy URLs) seeded into every agent.
    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.register(tool);
        self
    }

    /// Replace the whole tool registry.
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Bind a sub-workflow to a workflow-driven agent.
    pub fn step_workflow(
        mut self,
        agent_name: impl Into<String>,
        flow: Arc<dyn StepWorkflow>,
    ) -> Self {
        self.flows.insert(agent_name.into(), flow);
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Team, WorkflowError> {
        for agent in &self.agents {
            if agent.kind == AgentKind::WorkflowDriven && !self.flows.contains_key(&agent.name) {
                return Err(WorkflowError::Configuration(format!(
                    "workflow-driven agent '{}' has no sub-workflow bound",
                    agent.name
                )));
            }
            if agent.kind == AgentKind::React && agent.max_iterations == 0 {
                return Err(WorkflowError::Configuration(format!(
                    "agent '{}' has a zero iteration budget",
                    agent.name
                )));
            }
            for tool in &agent.tools {
                if self.tools.get(tool).is_none() {
                    return Err(WorkflowError::Configuration(format!(
                        "agent '{}' references unregistered tool '{}'",
                        agent.name, tool
                    )));
                }
            }
        }

        let client: Arc<dyn LlmClient> = match self.client {
            Some(client) => client,
            None => Arc::new(
                HttpLlmClient::new()
                    .map_err(|e| WorkflowError::Configuration(e.to_string()))?,
            ),
        };

        let store = TeamStore::with_definitions(self.name, self.tasks, self.agents, self.env)?;
        store.set_log_level(self.log_level).map_err(WorkflowError::from)?;

        Ok(Team {
            inner: Arc::new(Orchestrator::new(
                Arc::new(store),
                Arc::new(self.tools),
                client,
                self.flows,
                self.tool_timeout,
            )),
        })
    }
}

/// Handle to one team. Clones share the same orchestrator.
#[derive(Clone)]
pub struct Team {
    inner: Arc<Orchestrator>,
}

impl Team {
    pub fn builder(name: impl Into<String>) -> TeamBuilder {
        TeamBuilder::new(name)
    }

    /// Start the workflow and drive it to a terminal state.
    pub async fn start(
        &self,
        inputs: HashMap<String, String>,
    ) -> Result<WorkflowResult, WorkflowError> {
        self.inner.run(inputs).await
    }

    /// Pause a running workflow at the next suspension points.
    pub fn pause(&self) -> Result<(), WorkflowError> {
        self.inner.pause()
    }

    /// Resume a paused workflow.
    pub fn resume(&self) -> Result<(), WorkflowError> {
        self.inner.resume()
    }

    /// Stop the workflow and wait until it reports `STOPPED`.
    pub async fn stop(&self) -> Result<(), WorkflowError> {
        self.inner.stop().await
    }

    /// Patch every agent's env; visible to the next provider call.
    pub fn set_env(&self, env: HashMap<String, String>) -> Result<(), WorkflowError> {
        self.inner.store.set_env(env).map_err(WorkflowError::from)
    }

    pub fn status(&self) -> Result<WorkflowStatus, WorkflowError> {
        self.inner.store.status().map_err(WorkflowError::from)
    }

    pub fn state(&self) -> Result<TeamState, WorkflowError> {
        self.inner.store.snapshot().map_err(WorkflowError::from)
    }

    pub fn cleaned_state(&self) -> Result<CleanedState, WorkflowError> {
        self.inner
            .store
            .cleaned_state()
            .map_err(WorkflowError::from)
    }

    /// Selector-based state subscription with value-equality gating.
    pub fn subscribe(
        &self,
        selector: impl Fn(&TeamState) -> Value + Send + Sync + 'static,
        listener: impl Fn(&Value) -> Result<(), ListenerError> + Send + Sync + 'static,
    ) -> Result<SubscriptionId, WorkflowError> {
        self.inner
            .store
            .subscribe(selector, listener)
            .map_err(WorkflowError::from)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.store.unsubscribe(id)
    }

    /// Tail the workflow log live.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<WorkflowLogEntry> {
        self.inner.store.subscribe_logs()
    }

    /// Watch workflow status transitions.
    pub fn status_watch(&self) -> watch::Receiver<WorkflowStatus> {
        self.inner.store.status_watch()
    }
}
