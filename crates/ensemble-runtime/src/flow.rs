//! Workflow-driven agent runtime.
//!
//! Delegates task execution to a declarative sub-workflow collaborator.
//! Step boundary events reported by the collaborator become
//! `AgentStatusUpdate` entries; a `Suspended` outcome pauses the owning
//! task (and the team) until the controller's resume calls the
//! sub-workflow's `resume` with the suspension payload.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use ensemble_core::error::WorkflowError;
use ensemble_core::store::TeamStore;
use ensemble_core::types::AgentStatus;

use crate::control::{ControlHandle, ControlSignal, Interrupt};
use crate::orchestrator::{EngineEvent, TaskOutcome};

/// Step boundary status reported by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepEventStatus {
    Started,
    Completed,
    Failed,
    Suspended,
}

/// One step boundary event.
#[derive(Debug, Clone)]
pub struct StepEvent {
    pub step_id: String,
    pub status: StepEventStatus,
    pub payload: Value,
}

impl StepEvent {
    pub fn new(step_id: impl Into<String>, status: StepEventStatus) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Sink the collaborator reports step events into.
///
/// `report` is also the sub-workflow's cooperative suspension point: it
/// parks while the team is paused, so a paused team halts the step graph
/// at the next boundary.
#[async_trait]
pub trait StepEventSink: Send + Sync {
    async fn report(&self, event: StepEvent);
}

/// Context handed to the collaborator for the duration of one task.
pub struct StepContext {
    sink: Arc<dyn StepEventSink>,
    pub task_id: String,
    pub inputs: Value,
}

impl StepContext {
    pub fn new(sink: Arc<dyn StepEventSink>, task_id: impl Into<String>, inputs: Value) -> Self {
        Self {
            sink,
            task_id: task_id.into(),
            inputs,
        }
    }

    /// Report a step boundary.
    pub async fn report(&self, event: StepEvent) {
        self.sink.report(event).await;
    }
}

/// Result of driving the step graph.
#[derive(Debug, Clone)]
pub enum StepFlowOutcome {
    Done(Value),
    /// The step graph parked itself; the payload is handed back on resume.
    Suspended(Value),
    Failed(String),
    /// A step decided the task must not be done.
    Blocked(String),
}

/// The sub-workflow collaborator.
#[async_trait]
pub trait StepWorkflow: Send + Sync {
    async fn run(&self, input: Value, ctx: &StepContext) -> StepFlowOutcome;

    async fn resume(&self, resume_data: Value, ctx: &StepContext) -> StepFlowOutcome;
}

/// Sink translating step events into agent status log entries.
struct LogStepSink {
    store: Arc<TeamStore>,
    agent_name: String,
    task_id: String,
    control: ControlHandle,
}

#[async_trait]
impl StepEventSink for LogStepSink {
    async fn report(&self, event: StepEvent) {
        let status = match event.status {
            StepEventStatus::Started => AgentStatus::WorkflowStepStarted,
            StepEventStatus::Completed => AgentStatus::WorkflowStepCompleted,
            StepEventStatus::Failed => AgentStatus::WorkflowStepFailed,
            StepEventStatus::Suspended => AgentStatus::Paused,
        };
        let metadata = json!({
            "stepId": event.step_id,
            "stepStatus": event.status,
            "payload": event.payload,
        });
        if let Err(err) = self
            .store
            .agent_status(&self.agent_name, &self.task_id, status, metadata)
        {
            tracing::warn!(task_id = %self.task_id, error = %err, "failed to record step event");
        }

        // Cooperative pause at the step boundary. A stop unparks too; the
        // executor's outer select aborts the run right after.
        let mut control = self.control.clone();
        if control.current() == ControlSignal::Pause {
            let _ = control.wait_resumed().await;
        }
    }
}

/// Executes one task by driving its agent's sub-workflow.
pub struct FlowExecutor {
    store: Arc<TeamStore>,
}

impl FlowExecutor {
    pub fn new(store: Arc<TeamStore>) -> Self {
        Self { store }
    }

    pub async fn run(
        &self,
        task_id: &str,
        flow: Arc<dyn StepWorkflow>,
        mut control: ControlHandle,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> TaskOutcome {
        let task = match self.store.task(task_id) {
            Ok(task) => task,
            Err(err) => return TaskOutcome::failed(WorkflowError::from(err)),
        };
        let agent = match self.store.agent(&task.agent) {
            Ok(agent) => agent,
            Err(err) => return TaskOutcome::failed(WorkflowError::from(err)),
        };
        let context = self.store.workflow_context().unwrap_or_default();

        let ctx = StepContext::new(
            Arc::new(LogStepSink {
                store: self.store.clone(),
                agent_name: agent.definition.name.clone(),
                task_id: task_id.to_string(),
                control: control.clone(),
            }),
            task_id,
            json!({
                "task": task.description,
                "expectedOutput": task.expected_output,
                "context": context,
            }),
        );

        let stats = task.stats.clone();
        let initial = ctx.inputs.clone();

        let mut outcome = tokio::select! {
            outcome = flow.run(initial, &ctx) => outcome,
            _ = control.stopped() => return TaskOutcome::Cancelled,
        };

        loop {
            match outcome {
                StepFlowOutcome::Done(result) => {
                    return TaskOutcome::Done { result, stats };
                }
                StepFlowOutcome::Failed(message) => {
                    return TaskOutcome::Errored {
                        error: WorkflowError::SubWorkflowFailure(message),
                        stats,
                    };
                }
                StepFlowOutcome::Blocked(reason) => {
                    if let Err(err) = self.store.agent_status(
                        &agent.definition.name,
                        task_id,
                        AgentStatus::DecidedToBlockTask,
                        json!({ "reason": reason }),
                    ) {
                        tracing::warn!(task_id, error = %err, "failed to record block event");
                    }
                    return TaskOutcome::Blocked { reason };
                }
                StepFlowOutcome::Suspended(payload) => {
                    tracing::info!(task_id, "sub-workflow suspended");
                    let _ = events.send(EngineEvent::SelfSuspended {
                        task_id: task_id.to_string(),
                    });
                    // Wait for the orchestrator to acknowledge with a pause
                    // signal before parking for the resume.
                    match control.interrupted().await {
                        Interrupt::Paused => {}
                        Interrupt::Stopped => return TaskOutcome::Cancelled,
                    }
                    if control.wait_resumed().await.is_err() {
                        return TaskOutcome::Cancelled;
                    }
                    outcome = tokio::select! {
                        outcome = flow.resume(payload, &ctx) => outcome,
                        _ = control.stopped() => return TaskOutcome::Cancelled,
                    };
                }
            }
        }
    }
}
