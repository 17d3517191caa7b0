//! Team state store
//!
//! The store is the single authoritative owner of tasks, agents, team
//! status and the workflow log. All mutation goes through typed
//! transitions; agent runtimes never share mutable state directly.
//!
//! Every mutation appends to the log under the state write lock (sequence
//! indices are therefore totally ordered), publishes the entry to the
//! realtime bus, and then runs selector subscriptions: each subscriber's
//! projection is recomputed and its listener invoked only when the
//! projected value changed.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::log::{LogBus, WorkflowLogEntry, WorkflowLogPayload};
use crate::queue;
use crate::types::{
    AgentDefinition, AgentKind, AgentState, AgentStatus, Task, TaskId, TaskStats, TaskStatus,
    WorkflowStatus,
};

/// Verbosity recorded in the cleaned-state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("illegal task transition {from:?} -> {to:?} for '{task_id}'")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("state lock poisoned")]
    Poisoned,
}

impl From<StoreError> for crate::error::WorkflowError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UnknownTask(_) | StoreError::UnknownAgent(_) => {
                crate::error::WorkflowError::Configuration(error.to_string())
            }
            StoreError::IllegalTransition { .. } => {
                crate::error::WorkflowError::InvalidTransition(error.to_string())
            }
            StoreError::Poisoned => crate::error::WorkflowError::Internal(error.to_string()),
        }
    }
}

/// Full in-memory team state.
#[derive(Debug, Clone, Serialize)]
pub struct TeamState {
    pub name: String,
    /// Tasks in declaration order
    pub tasks: Vec<Task>,
    pub agents: Vec<AgentState>,
    pub inputs: HashMap<String, String>,
    /// Narrative of completed task results fed to subsequent tasks
    pub workflow_context: String,
    pub team_workflow_status: WorkflowStatus,
    pub workflow_result: Option<Value>,
    pub executing_tasks: BTreeSet<TaskId>,
    pub pending_tasks: BTreeSet<TaskId>,
    pub queue_paused: bool,
    pub workflow_logs: Vec<WorkflowLogEntry>,
    pub log_level: LogLevel,
}

/// Agent projection without runtime-only data.
#[derive(Debug, Clone, Serialize)]
pub struct CleanedAgent {
    pub name: String,
    pub role: String,
    pub goal: String,
    pub background: String,
    pub kind: AgentKind,
    pub max_iterations: u32,
    pub tools: Vec<String>,
    pub status: AgentStatus,
}

impl From<&AgentState> for CleanedAgent {
    fn from(agent: &AgentState) -> Self {
        let def = &agent.definition;
        Self {
            name: def.name.clone(),
            role: def.role.clone(),
            goal: def.goal.clone(),
            background: def.background.clone(),
            kind: def.kind,
            max_iterations: def.max_iterations,
            tools: def.tools.clone(),
            status: agent.status,
        }
    }
}

/// Stable snapshot surfaced to consumers.
///
/// Strips the executing/pending id-sets and runtime-only handles; its JSON
/// shape is the compatibility contract.
#[derive(Debug, Clone, Serialize)]
pub struct CleanedState {
    pub name: String,
    pub tasks: Vec<Task>,
    pub agents: Vec<CleanedAgent>,
    pub workflow_logs: Vec<WorkflowLogEntry>,
    pub team_workflow_status: WorkflowStatus,
    pub workflow_result: Option<Value>,
    pub workflow_context: String,
    pub inputs: HashMap<String, String>,
    pub log_level: LogLevel,
}

/// Error returned by a subscription listener. A failing listener is logged
/// and unsubscribed; the stream continues.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Handle returned by `subscribe`, accepted by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type SelectorFn = dyn Fn(&TeamState) -> Value + Send + Sync;
type ListenerFn = dyn Fn(&Value) -> Result<(), ListenerError> + Send + Sync;

struct Subscriber {
    selector: Box<SelectorFn>,
    listener: Arc<ListenerFn>,
    last: Value,
}

/// The team state store.
pub struct TeamStore {
    state: RwLock<TeamState>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber: AtomicU64,
    /// Serializes subscriber dispatch so listeners observe mutations in
    /// log order.
    dispatch: Mutex<()>,
    bus: LogBus,
    status_tx: watch::Sender<WorkflowStatus>,
}

impl TeamStore {
    /// Build a store from declared tasks and agents.
    ///
    /// Rejects unknown agent bindings, duplicate agent names and cyclic
    /// task dependencies.
    pub fn new(
        name: impl Into<String>,
        tasks: Vec<Task>,
        agents: Vec<AgentState>,
    ) -> Result<Self, crate::error::WorkflowError> {
        queue::validate_dependencies(&tasks)?;

        let mut agent_names = std::collections::HashSet::new();
        for agent in &agents {
            if !agent_names.insert(agent.definition.name.as_str()) {
                return Err(crate::error::WorkflowError::Configuration(format!(
                    "duplicate agent name '{}'",
                    agent.definition.name
                )));
            }
        }
        for task in &tasks {
            if !agent_names.contains(task.agent.as_str()) {
                return Err(crate::error::WorkflowError::Configuration(format!(
                    "task '{}' is bound to unknown agent '{}'",
                    task.id, task.agent
                )));
            }
        }

        let pending: BTreeSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
        let (status_tx, _) = watch::channel(WorkflowStatus::Initial);
        Ok(Self {
            state: RwLock::new(TeamState {
                name: name.into(),
                tasks,
                agents,
                inputs: HashMap::new(),
                workflow_context: String::new(),
                team_workflow_status: WorkflowStatus::Initial,
                workflow_result: None,
                executing_tasks: BTreeSet::new(),
                pending_tasks: pending,
                queue_paused: false,
                workflow_logs: Vec::new(),
                log_level: LogLevel::default(),
            }),
            subscribers: Mutex::new(HashMap::new()),
            next_subscriber: AtomicU64::new(1),
            dispatch: Mutex::new(()),
            bus: LogBus::default(),
            status_tx,
        })
    }

    /// Convenience constructor from agent definitions with a shared env.
    pub fn with_definitions(
        name: impl Into<String>,
        tasks: Vec<Task>,
        definitions: Vec<AgentDefinition>,
        env: HashMap<String, String>,
    ) -> Result<Self, crate::error::WorkflowError> {
        let agents = definitions
            .into_iter()
            .map(|d| AgentState::new(d).with_env(env.clone()))
            .collect();
        Self::new(name, tasks, agents)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, TeamState>, StoreError> {
        self.state.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, TeamState>, StoreError> {
        self.state.write().map_err(|_| StoreError::Poisoned)
    }

    /// Clone the full state.
    pub fn snapshot(&self) -> Result<TeamState, StoreError> {
        Ok(self.read()?.clone())
    }

    /// Project the stable consumer-facing snapshot.
    pub fn cleaned_state(&self) -> Result<CleanedState, StoreError> {
        let state = self.read()?;
        Ok(CleanedState {
            name: state.name.clone(),
            tasks: state.tasks.clone(),
            agents: state.agents.iter().map(CleanedAgent::from).collect(),
            workflow_logs: state.workflow_logs.clone(),
            team_workflow_status: state.team_workflow_status,
            workflow_result: state.workflow_result.clone(),
            workflow_context: state.workflow_context.clone(),
            inputs: state.inputs.clone(),
            log_level: state.log_level,
        })
    }

    pub fn status(&self) -> Result<WorkflowStatus, StoreError> {
        Ok(self.read()?.team_workflow_status)
    }

    /// Watch workflow status transitions.
    pub fn status_watch(&self) -> watch::Receiver<WorkflowStatus> {
        self.status_tx.subscribe()
    }

    /// Subscribe to the realtime log stream.
    pub fn subscribe_logs(&self) -> broadcast::Receiver<WorkflowLogEntry> {
        self.bus.subscribe()
    }

    /// Register a selector-based subscription.
    ///
    /// The listener fires whenever the projection of the state differs by
    /// value from the last delivery. The projection at subscribe time is
    /// the baseline; no initial call is made.
    pub fn subscribe(
        &self,
        selector: impl Fn(&TeamState) -> Value + Send + Sync + 'static,
        listener: impl Fn(&Value) -> Result<(), ListenerError> + Send + Sync + 'static,
    ) -> Result<SubscriptionId, StoreError> {
        let baseline = (selector)(&*self.read()?);
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().map_err(|_| StoreError::Poisoned)?;
        subs.insert(
            id,
            Subscriber {
                selector: Box::new(selector),
                listener: Arc::new(listener),
                last: baseline,
            },
        );
        Ok(SubscriptionId(id))
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.remove(&id.0);
        }
    }

    pub fn task(&self, task_id: &str) -> Result<Task, StoreError> {
        self.read()?
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .ok_or_else(|| StoreError::UnknownTask(task_id.to_string()))
    }

    pub fn agent(&self, name: &str) -> Result<AgentState, StoreError> {
        self.read()?
            .agents
            .iter()
            .find(|a| a.definition.name == name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAgent(name.to_string()))
    }

    /// Resolve the agent owning a task.
    pub fn agent_for_task(&self, task_id: &str) -> Result<AgentState, StoreError> {
        let agent_name = self.task(task_id)?.agent;
        self.agent(&agent_name)
    }

    pub fn executing_tasks(&self) -> Result<BTreeSet<TaskId>, StoreError> {
        Ok(self.read()?.executing_tasks.clone())
    }

    pub fn queue_paused(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.queue_paused)
    }

    pub fn set_queue_paused(&self, paused: bool) -> Result<(), StoreError> {
        self.write()?.queue_paused = paused;
        self.notify_subscribers();
        Ok(())
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<(), StoreError> {
        self.write()?.log_level = level;
        Ok(())
    }

    pub fn workflow_context(&self) -> Result<String, StoreError> {
        Ok(self.read()?.workflow_context.clone())
    }

    pub fn all_tasks_done(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.tasks.iter().all(|t| t.status == TaskStatus::Done))
    }

    /// Set the team workflow status and append the matching log entry.
    pub fn set_workflow_status(
        &self,
        status: WorkflowStatus,
        message: Option<String>,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            state.team_workflow_status = status;
            self.append_locked(
                &mut state,
                WorkflowLogPayload::WorkflowStatusUpdate {
                    workflow_status: status,
                    message,
                },
            );
        }
        let _ = self.status_tx.send(status);
        tracing::info!(status = ?status, "team workflow status updated");
        self.notify_subscribers();
        Ok(())
    }

    /// Store the final workflow result.
    pub fn set_workflow_result(&self, result: Option<Value>) -> Result<(), StoreError> {
        self.write()?.workflow_result = result;
        self.notify_subscribers();
        Ok(())
    }

    /// Apply a task status transition and append the `TaskStatusUpdate`.
    pub fn transition_task(&self, task_id: &str, status: TaskStatus) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            let task = state
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| StoreError::UnknownTask(task_id.to_string()))?;
            if !task.status.can_transition(status) {
                return Err(StoreError::IllegalTransition {
                    task_id: task_id.to_string(),
                    from: task.status,
                    to: status,
                });
            }
            task.status = status;
            if status == TaskStatus::Doing && task.stats.started_at.is_none() {
                task.stats.started_at = Some(Utc::now());
            }
            let snapshot = task.clone();
            Self::reindex_locked(&mut state, task_id, status);
            self.append_locked(
                &mut state,
                WorkflowLogPayload::TaskStatusUpdate {
                    task: snapshot,
                    task_status: status,
                },
            );
        }
        tracing::debug!(task_id, status = ?status, "task status updated");
        self.notify_subscribers();
        Ok(())
    }

    /// Record a completed task: result, stats, `Done` transition and the
    /// workflow-context line in one linearized step.
    pub fn complete_task(
        &self,
        task_id: &str,
        result: Value,
        stats: TaskStats,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            let task = state
                .tasks
                .iter_mut()
                .find(|t| t.id == task_id)
                .ok_or_else(|| StoreError::UnknownTask(task_id.to_string()))?;
            if !task.status.can_transition(TaskStatus::Done) {
                return Err(StoreError::IllegalTransition {
                    task_id: task_id.to_string(),
                    from: task.status,
                    to: TaskStatus::Done,
                });
            }
            task.result = Some(result.clone());
            task.stats = stats;
            task.stats.finish(Utc::now());
            task.status = TaskStatus::Done;
            let snapshot = task.clone();

            let serialized = match &result {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            let line = format!("Task: {} / Result: {}\n", snapshot.description, serialized);
            state.workflow_context.push_str(&line);

            Self::reindex_locked(&mut state, task_id, TaskStatus::Done);
            self.append_locked(
                &mut state,
                WorkflowLogPayload::TaskStatusUpdate {
                    task: snapshot,
                    task_status: TaskStatus::Done,
                },
            );
        }
        tracing::info!(task_id, "task completed");
        self.notify_subscribers();
        Ok(())
    }

    /// Attach stats to a task without a status transition (error paths).
    pub fn record_task_stats(&self, task_id: &str, stats: TaskStats) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::UnknownTask(task_id.to_string()))?;
        task.stats = stats;
        task.stats.finish(Utc::now());
        Ok(())
    }

    /// Update an agent's observed status and append the log entry.
    pub fn agent_status(
        &self,
        agent_name: &str,
        task_id: &str,
        status: AgentStatus,
        metadata: Value,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            let agent = state
                .agents
                .iter_mut()
                .find(|a| a.definition.name == agent_name)
                .ok_or_else(|| StoreError::UnknownAgent(agent_name.to_string()))?;
            agent.status = status;
            self.append_locked(
                &mut state,
                WorkflowLogPayload::AgentStatusUpdate {
                    agent_name: agent_name.to_string(),
                    task_id: task_id.to_string(),
                    agent_status: status,
                    metadata,
                },
            );
        }
        self.notify_subscribers();
        Ok(())
    }

    /// Patch every agent's env atomically. Visible to the next read.
    pub fn set_env(&self, env: HashMap<String, String>) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            for agent in &mut state.agents {
                agent
                    .env
                    .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        tracing::info!(keys = env.len(), "agent env patched");
        self.notify_subscribers();
        Ok(())
    }

    /// Resolve `{placeholder}` tokens in task descriptions from inputs.
    /// Unresolved placeholders are left literal.
    pub fn interpolate_inputs(&self, inputs: HashMap<String, String>) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            for task in &mut state.tasks {
                for (key, value) in &inputs {
                    let token = format!("{{{key}}}");
                    if task.description.contains(&token) {
                        task.description = task.description.replace(&token, value);
                    }
                }
            }
            state.inputs = inputs;
        }
        self.notify_subscribers();
        Ok(())
    }

    /// Reset run-scoped state for a fresh `start`. The log is append-only
    /// and is intentionally not truncated.
    pub fn reset_for_start(&self) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            for task in &mut state.tasks {
                task.reset();
            }
            state.workflow_context.clear();
            state.workflow_result = None;
            state.executing_tasks.clear();
            state.pending_tasks = state.tasks.iter().map(|t| t.id.clone()).collect();
            state.queue_paused = false;
            for agent in &mut state.agents {
                agent.status = AgentStatus::Idle;
            }
        }
        self.notify_subscribers();
        Ok(())
    }

    /// Reset every non-`Done` task back to `Todo` (stop semantics),
    /// appending a `TaskStatusUpdate` for each reset task.
    pub fn reset_incomplete_tasks(&self) -> Result<(), StoreError> {
        {
            let mut state = self.write()?;
            let reset_ids: Vec<TaskId> = state
                .tasks
                .iter()
                .filter(|t| t.status != TaskStatus::Done && t.status != TaskStatus::Todo)
                .map(|t| t.id.clone())
                .collect();
            for id in reset_ids {
                let task = state
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == id)
                    .ok_or_else(|| StoreError::UnknownTask(id.clone()))?;
                task.reset();
                let snapshot = task.clone();
                Self::reindex_locked(&mut state, &id, TaskStatus::Todo);
                self.append_locked(
                    &mut state,
                    WorkflowLogPayload::TaskStatusUpdate {
                        task: snapshot,
                        task_status: TaskStatus::Todo,
                    },
                );
            }
        }
        self.notify_subscribers();
        Ok(())
    }

    fn reindex_locked(state: &mut TeamState, task_id: &str, status: TaskStatus) {
        match status {
            TaskStatus::Doing => {
                state.pending_tasks.remove(task_id);
                state.executing_tasks.insert(task_id.to_string());
            }
            TaskStatus::Todo => {
                state.executing_tasks.remove(task_id);
                state.pending_tasks.insert(task_id.to_string());
            }
            TaskStatus::Done | TaskStatus::Errored | TaskStatus::Blocked => {
                state.executing_tasks.remove(task_id);
                state.pending_tasks.remove(task_id);
            }
            TaskStatus::Paused | TaskStatus::Resumed => {}
        }
    }

    fn append_locked(&self, state: &mut TeamState, payload: WorkflowLogPayload) {
        let entry = WorkflowLogEntry {
            seq: state.workflow_logs.len() as u64,
            timestamp: Utc::now(),
            payload,
        };
        state.workflow_logs.push(entry.clone());
        // Published under the lock so bus consumers observe seq order.
        self.bus.publish(entry);
    }

    fn notify_subscribers(&self) {
        let _serialized = match self.dispatch.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };

        let pending: Vec<(SubscriptionId, Arc<ListenerFn>, Value)> = {
            let state = match self.state.read() {
                Ok(state) => state,
                Err(_) => return,
            };
            let mut subs = match self.subscribers.lock() {
                Ok(subs) => subs,
                Err(_) => return,
            };
            let mut changed = Vec::new();
            for (id, sub) in subs.iter_mut() {
                let value = (sub.selector)(&state);
                if value != sub.last {
                    sub.last = value.clone();
                    changed.push((SubscriptionId(*id), sub.listener.clone(), value));
                }
            }
            changed
        };

        for (id, listener, value) in pending {
            if let Err(err) = (listener)(&value) {
                tracing::warn!(error = %err, "subscription listener failed; unsubscribing");
                self.unsubscribe(id);
            }
        }
    }
}
