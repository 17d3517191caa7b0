//! Orchestrator - the workflow drive loop.
//!
//! A single logical loop owns admission and completion handling: it marks
//! admitted tasks `Doing` (so a parallel batch gets adjacent `DOING`
//! entries), spawns one runtime per task, and absorbs completion events
//! over a channel. Lifecycle operations mutate observable state
//! synchronously and nudge the loop with a `Recheck` event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use ensemble_core::error::WorkflowError;
use ensemble_core::queue;
use ensemble_core::store::TeamStore;
use ensemble_core::tool::ToolRegistry;
use ensemble_core::types::{
    AgentKind, TaskId, TaskStats, TaskStatus, TokenUsage, WorkflowResult, WorkflowStats,
    WorkflowStatus,
};
use ensemble_providers::client::LlmClient;

use crate::control::Controls;
use crate::flow::{FlowExecutor, StepWorkflow};
use crate::react::ReactExecutor;

/// Terminal outcome of one task execution.
#[derive(Debug)]
pub enum TaskOutcome {
    Done {
        result: Value,
        stats: TaskStats,
    },
    Blocked {
        reason: String,
    },
    Errored {
        error: WorkflowError,
        stats: TaskStats,
    },
    /// Stop arrived; silent beyond returning the execution slot.
    Cancelled,
}

impl TaskOutcome {
    pub(crate) fn failed(error: WorkflowError) -> Self {
        TaskOutcome::Errored {
            error,
            stats: TaskStats::default(),
        }
    }
}

/// Events absorbed by the drive loop.
#[derive(Debug)]
pub enum EngineEvent {
    Finished {
        task_id: TaskId,
        outcome: TaskOutcome,
    },
    /// A sub-workflow suspended itself; pause the team.
    SelfSuspended {
        task_id: TaskId,
    },
    /// Wake the loop to re-evaluate admission and terminal conditions.
    Recheck,
}

struct RunControls {
    controls: Controls,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    active: bool,
}

pub(crate) struct Orchestrator {
    pub(crate) store: Arc<TeamStore>,
    tools: Arc<ToolRegistry>,
    client: Arc<dyn LlmClient>,
    flows: HashMap<String, Arc<dyn StepWorkflow>>,
    controls: Mutex<RunControls>,
    tool_timeout: Duration,
}

impl Orchestrator {
    pub(crate) fn new(
        store: Arc<TeamStore>,
        tools: Arc<ToolRegistry>,
        client: Arc<dyn LlmClient>,
        flows: HashMap<String, Arc<dyn StepWorkflow>>,
        tool_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tools,
            client,
            flows,
            controls: Mutex::new(RunControls {
                controls: Controls::new(),
                events: None,
                active: false,
            }),
            tool_timeout,
        }
    }

    fn controls(&self) -> Result<MutexGuard<'_, RunControls>, WorkflowError> {
        self.controls
            .lock()
            .map_err(|_| WorkflowError::Internal("controls lock poisoned".to_string()))
    }

    /// Run the workflow to a terminal state.
    pub(crate) async fn run(
        &self,
        inputs: HashMap<String, String>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let status = self.store.status().map_err(WorkflowError::from)?;
        if !status.can_start() {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot start a workflow in status {:?}",
                status
            )));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        {
            let mut guard = self.controls()?;
            if guard.active {
                return Err(WorkflowError::InvalidTransition(
                    "a workflow run is already active".to_string(),
                ));
            }
            guard.controls = Controls::new();
            guard.events = Some(events_tx.clone());
            guard.active = true;
        }

        let started_at = Utc::now();
        self.store.reset_for_start().map_err(WorkflowError::from)?;
        self.store
            .interpolate_inputs(inputs)
            .map_err(WorkflowError::from)?;
        self.store
            .set_workflow_status(WorkflowStatus::Running, None)
            .map_err(WorkflowError::from)?;

        let result = self.drive(events_tx, events_rx, started_at).await;

        if let Ok(mut guard) = self.controls.lock() {
            guard.active = false;
            guard.events = None;
        }
        result
    }

    async fn drive(
        &self,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
        mut events_rx: mpsc::UnboundedReceiver<EngineEvent>,
        started_at: DateTime<Utc>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut handles: HashMap<TaskId, JoinHandle<()>> = HashMap::new();
        let mut failure: Option<String> = None;

        loop {
            let state = self.store.snapshot().map_err(WorkflowError::from)?;
            let drained = state.executing_tasks.is_empty();

            match state.team_workflow_status {
                WorkflowStatus::Stopping if drained => {
                    self.store
                        .reset_incomplete_tasks()
                        .map_err(WorkflowError::from)?;
                    self.store
                        .set_workflow_status(WorkflowStatus::Stopped, None)
                        .map_err(WorkflowError::from)?;
                    return self.build_result(WorkflowStatus::Stopped, failure, started_at);
                }
                WorkflowStatus::Errored if drained => {
                    return self.build_result(WorkflowStatus::Errored, failure, started_at);
                }
                WorkflowStatus::Blocked if drained => {
                    return self.build_result(WorkflowStatus::Blocked, failure, started_at);
                }
                WorkflowStatus::Running if drained => {
                    if state.tasks.iter().all(|t| t.status == TaskStatus::Done) {
                        let final_result = state.tasks.last().and_then(|t| t.result.clone());
                        self.store
                            .set_workflow_result(final_result)
                            .map_err(WorkflowError::from)?;
                        self.store
                            .set_workflow_status(WorkflowStatus::Finished, None)
                            .map_err(WorkflowError::from)?;
                        return self.build_result(WorkflowStatus::Finished, None, started_at);
                    }
                    let admissible = queue::next_batch(&state.tasks, &state.executing_tasks);
                    if admissible.is_empty() && !state.pending_tasks.is_empty() {
                        let reason = "no admissible tasks remain".to_string();
                        failure = Some(reason.clone());
                        self.store
                            .set_workflow_status(WorkflowStatus::Blocked, Some(reason))
                            .map_err(WorkflowError::from)?;
                        return self.build_result(WorkflowStatus::Blocked, failure, started_at);
                    }
                }
                _ => {}
            }

            if self.store.status().map_err(WorkflowError::from)? == WorkflowStatus::Running {
                self.admit(&mut handles, &events_tx)?;
            }

            let event = events_rx
                .recv()
                .await
                .ok_or_else(|| WorkflowError::Internal("engine channel closed".to_string()))?;
            match event {
                EngineEvent::Finished { task_id, outcome } => {
                    handles.remove(&task_id);
                    self.on_finished(&task_id, outcome, &mut failure)?;
                }
                EngineEvent::SelfSuspended { task_id } => {
                    tracing::info!(task_id = %task_id, "pausing team for suspended sub-workflow");
                    self.pause_now(Some("sub-workflow suspended".to_string()))?;
                }
                EngineEvent::Recheck => {}
            }
        }
    }

    fn admit(
        &self,
        handles: &mut HashMap<TaskId, JoinHandle<()>>,
        events_tx: &mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<(), WorkflowError> {
        if self.store.queue_paused().map_err(WorkflowError::from)? {
            return Ok(());
        }
        let state = self.store.snapshot().map_err(WorkflowError::from)?;
        if state.team_workflow_status != WorkflowStatus::Running {
            return Ok(());
        }

        let batch = queue::next_batch(&state.tasks, &state.executing_tasks);
        // Mark the whole batch before spawning anything so parallel tasks
        // get adjacent DOING entries.
        for task_id in &batch {
            self.store
                .transition_task(task_id, TaskStatus::Doing)
                .map_err(WorkflowError::from)?;
            tracing::info!(task_id = %task_id, "task admitted");
        }
        for task_id in batch {
            self.spawn_runtime(task_id, handles, events_tx)?;
        }
        Ok(())
    }

    fn spawn_runtime(
        &self,
        task_id: TaskId,
        handles: &mut HashMap<TaskId, JoinHandle<()>>,
        events_tx: &mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<(), WorkflowError> {
        let agent = self
            .store
            .agent_for_task(&task_id)
            .map_err(WorkflowError::from)?;
        let control = self.controls()?.controls.handle();
        let events = events_tx.clone();

        let handle = match agent.definition.kind {
            AgentKind::React => {
                let executor =
                    ReactExecutor::new(self.store.clone(), self.tools.clone(), self.client.clone())
                        .with_tool_timeout(self.tool_timeout);
                let id = task_id.clone();
                tokio::spawn(async move {
                    let outcome = executor.run(&id, control).await;
                    let _ = events.send(EngineEvent::Finished {
                        task_id: id,
                        outcome,
                    });
                })
            }
            AgentKind::WorkflowDriven => {
                let flow = self.flows.get(&agent.definition.name).cloned();
                let executor = FlowExecutor::new(self.store.clone());
                let id = task_id.clone();
                let agent_name = agent.definition.name.clone();
                tokio::spawn(async move {
                    let outcome = match flow {
                        Some(flow) => executor.run(&id, flow, control, events.clone()).await,
                        None => TaskOutcome::failed(WorkflowError::Configuration(format!(
                            "no sub-workflow registered for agent '{}'",
                            agent_name
                        ))),
                    };
                    let _ = events.send(EngineEvent::Finished {
                        task_id: id,
                        outcome,
                    });
                })
            }
        };
        handles.insert(task_id, handle);
        Ok(())
    }

    fn on_finished(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
        failure: &mut Option<String>,
    ) -> Result<(), WorkflowError> {
        match outcome {
            TaskOutcome::Done { result, stats } => {
                self.store
                    .complete_task(task_id, result, stats)
                    .map_err(WorkflowError::from)?;
            }
            TaskOutcome::Blocked { reason } => {
                self.store
                    .transition_task(task_id, TaskStatus::Blocked)
                    .map_err(WorkflowError::from)?;
                *failure = Some(reason.clone());
                self.store
                    .set_workflow_status(WorkflowStatus::Blocked, Some(reason))
                    .map_err(WorkflowError::from)?;
                // Runtimes parked by a concurrent pause must drain.
                self.controls()?.controls.run();
            }
            TaskOutcome::Errored { error, stats } => {
                tracing::error!(task_id, error = %error, "task errored");
                let _ = self.store.record_task_stats(task_id, stats);
                self.store
                    .transition_task(task_id, TaskStatus::Errored)
                    .map_err(WorkflowError::from)?;
                *failure = Some(error.to_string());
                self.store
                    .set_workflow_status(WorkflowStatus::Errored, Some(error.to_string()))
                    .map_err(WorkflowError::from)?;
                // Runtimes parked by a concurrent pause must drain.
                self.controls()?.controls.run();
            }
            TaskOutcome::Cancelled => {
                // Return the slot; the stop path resets non-Done statuses.
                let _ = self.store.transition_task(task_id, TaskStatus::Todo);
            }
        }
        Ok(())
    }

    /// Pause the team: status, queue flag, runtime signal, then mark every
    /// `Doing` task `Paused`.
    fn pause_now(&self, message: Option<String>) -> Result<(), WorkflowError> {
        self.store
            .set_workflow_status(WorkflowStatus::Paused, message)
            .map_err(WorkflowError::from)?;
        self.store
            .set_queue_paused(true)
            .map_err(WorkflowError::from)?;
        self.controls()?.controls.pause();

        let state = self.store.snapshot().map_err(WorkflowError::from)?;
        for task in &state.tasks {
            if task.status == TaskStatus::Doing {
                // A runtime may have completed concurrently; skip those.
                let _ = self.store.transition_task(&task.id, TaskStatus::Paused);
            }
        }
        Ok(())
    }

    pub(crate) fn pause(&self) -> Result<(), WorkflowError> {
        let status = self.store.status().map_err(WorkflowError::from)?;
        if status != WorkflowStatus::Running {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot pause a workflow in status {:?}",
                status
            )));
        }
        self.pause_now(None)
    }

    pub(crate) fn resume(&self) -> Result<(), WorkflowError> {
        let status = self.store.status().map_err(WorkflowError::from)?;
        if status != WorkflowStatus::Paused {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot resume a workflow in status {:?}",
                status
            )));
        }

        self.store
            .set_workflow_status(WorkflowStatus::Running, None)
            .map_err(WorkflowError::from)?;
        self.store
            .set_queue_paused(false)
            .map_err(WorkflowError::from)?;

        let state = self.store.snapshot().map_err(WorkflowError::from)?;
        for task in &state.tasks {
            if task.status == TaskStatus::Paused {
                self.store
                    .transition_task(&task.id, TaskStatus::Resumed)
                    .map_err(WorkflowError::from)?;
                self.store
                    .transition_task(&task.id, TaskStatus::Doing)
                    .map_err(WorkflowError::from)?;
            }
        }

        let guard = self.controls()?;
        guard.controls.run();
        if let Some(events) = &guard.events {
            let _ = events.send(EngineEvent::Recheck);
        }
        Ok(())
    }

    /// Request a stop and wait for the drive loop to reach `Stopped`.
    pub(crate) async fn stop(&self) -> Result<(), WorkflowError> {
        let status = self.store.status().map_err(WorkflowError::from)?;
        if !matches!(status, WorkflowStatus::Running | WorkflowStatus::Paused) {
            return Err(WorkflowError::InvalidTransition(format!(
                "cannot stop a workflow in status {:?}",
                status
            )));
        }

        self.store
            .set_workflow_status(WorkflowStatus::Stopping, None)
            .map_err(WorkflowError::from)?;
        let mut watch = self.store.status_watch();
        {
            let guard = self.controls()?;
            guard.controls.stop();
            if let Some(events) = &guard.events {
                let _ = events.send(EngineEvent::Recheck);
            }
        }

        loop {
            let current = *watch.borrow_and_update();
            if current == WorkflowStatus::Stopped {
                return Ok(());
            }
            if current.is_terminal() {
                return Err(WorkflowError::InvalidTransition(format!(
                    "stop resolved in status {:?}",
                    current
                )));
            }
            if watch.changed().await.is_err() {
                return Err(WorkflowError::Internal("status watch closed".to_string()));
            }
        }
    }

    fn build_result(
        &self,
        status: WorkflowStatus,
        error: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let state = self.store.snapshot().map_err(WorkflowError::from)?;
        let mut llm_usage = TokenUsage::default();
        let mut iterations = 0u32;
        for task in &state.tasks {
            llm_usage.absorb(&task.stats.llm_usage);
            iterations += task.stats.iterations;
        }
        let duration_ms = Utc::now()
            .signed_duration_since(started_at)
            .num_milliseconds()
            .max(0) as u64;

        Ok(WorkflowResult {
            status,
            result: state.workflow_result.clone(),
            stats: WorkflowStats {
                duration_ms: Some(duration_ms),
                task_count: state.tasks.len(),
                iterations,
                llm_usage,
            },
            error,
        })
    }
}
