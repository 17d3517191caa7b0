//! ReAct agent runtime - the bounded think/act/observe loop.
//!
//! Each iteration emits `THINKING` with `{iteration, messages}` metadata,
//! calls the LLM, and dispatches on the parsed output shape. Pause aborts
//! the in-flight iteration at a suspension point, restores the
//! iteration-start message snapshot and parks; on resume the same
//! iteration re-runs, so the post-resume `THINKING` metadata equals the
//! pre-pause one by value.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::{sleep, timeout};

use ensemble_core::error::WorkflowError;
use ensemble_core::store::TeamStore;
use ensemble_core::tool::{check_input, ToolRegistry, BLOCK_TASK, SELF_QUESTION};
use ensemble_core::types::{AgentState, AgentStatus, TokenUsage};
use ensemble_providers::client::{ChatMessage, LlmClient, LlmInvocation};
use ensemble_providers::output::{parse_agent_output, AgentOutput};

use crate::control::{ControlHandle, ControlSignal, Interrupt};
use crate::orchestrator::TaskOutcome;
use crate::prompts::{self, ToolCatalogEntry};

const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of one loop iteration.
enum IterationOutcome {
    Continue,
    Final(Value),
    Blocked(String),
}

/// Why an iteration did not produce an outcome.
enum IterationBreak {
    Paused,
    Stopped,
    Failed(WorkflowError),
}

impl From<Interrupt> for IterationBreak {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Paused => IterationBreak::Paused,
            Interrupt::Stopped => IterationBreak::Stopped,
        }
    }
}

/// Executes one task with a ReAct agent.
pub struct ReactExecutor {
    store: Arc<TeamStore>,
    tools: Arc<ToolRegistry>,
    client: Arc<dyn LlmClient>,
    tool_timeout: Duration,
}

impl ReactExecutor {
    pub fn new(
        store: Arc<TeamStore>,
        tools: Arc<ToolRegistry>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            store,
            tools,
            client,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    /// Drive the loop for one task until a terminal outcome.
    pub async fn run(&self, task_id: &str, mut control: ControlHandle) -> TaskOutcome {
        let task = match self.store.task(task_id) {
            Ok(task) => task,
            Err(err) => return TaskOutcome::failed(WorkflowError::from(err)),
        };
        let agent = match self.store.agent(&task.agent) {
            Ok(agent) => agent,
            Err(err) => return TaskOutcome::failed(WorkflowError::from(err)),
        };
        let context = self.store.workflow_context().unwrap_or_default();

        let agent_name = agent.definition.name.clone();
        let max_iterations = agent.definition.max_iterations.max(1);
        let catalog = self.catalog_for(&agent);
        let mut messages = vec![
            ChatMessage::system(prompts::build_system_prompt(&agent.definition, &catalog)),
            ChatMessage::user(prompts::build_task_prompt(
                &task.description,
                &task.expected_output,
                &context,
            )),
        ];

        let mut stats = task.stats.clone();
        let mut usage = TokenUsage::default();
        let mut iteration: u32 = 1;

        while iteration <= max_iterations {
            let snapshot = messages.clone();
            self.emit(
                &agent_name,
                task_id,
                AgentStatus::Thinking,
                json!({ "iteration": iteration, "messages": messages }),
            );

            let step = self
                .run_iteration(&agent_name, task_id, &mut messages, &mut usage, &mut control)
                .await;
            match step {
                Ok(IterationOutcome::Final(answer)) => {
                    stats.iterations = iteration;
                    stats.llm_usage = usage;
                    self.emit(
                        &agent_name,
                        task_id,
                        AgentStatus::TaskCompleted,
                        json!({ "iterations": iteration }),
                    );
                    return TaskOutcome::Done {
                        result: answer,
                        stats,
                    };
                }
                Ok(IterationOutcome::Blocked(reason)) => {
                    stats.iterations = iteration;
                    stats.llm_usage = usage;
                    return TaskOutcome::Blocked { reason };
                }
                Ok(IterationOutcome::Continue) => {
                    if iteration + 1 == max_iterations {
                        messages.push(ChatMessage::user(prompts::force_final_answer_feedback()));
                    }
                    iteration += 1;
                }
                Err(IterationBreak::Paused) => {
                    // Rewind the interrupted iteration and park. The next
                    // THINKING after resume repeats this iteration's
                    // metadata exactly.
                    messages = snapshot;
                    if control.wait_resumed().await.is_err() {
                        return TaskOutcome::Cancelled;
                    }
                }
                Err(IterationBreak::Stopped) => return TaskOutcome::Cancelled,
                Err(IterationBreak::Failed(error)) => {
                    stats.iterations = iteration;
                    stats.llm_usage = usage;
                    return TaskOutcome::Errored { error, stats };
                }
            }
        }

        stats.iterations = max_iterations;
        stats.llm_usage = usage;
        self.emit(
            &agent_name,
            task_id,
            AgentStatus::MaxIterationsError,
            json!({ "maxIterations": max_iterations }),
        );
        TaskOutcome::Errored {
            error: WorkflowError::IterationLimitExceeded {
                iterations: max_iterations,
            },
            stats,
        }
    }

    async fn run_iteration(
        &self,
        agent_name: &str,
        task_id: &str,
        messages: &mut Vec<ChatMessage>,
        usage: &mut TokenUsage,
        control: &mut ControlHandle,
    ) -> Result<IterationOutcome, IterationBreak> {
        // Re-read the agent so env and llm config changes apply to this
        // call, not just the next task.
        let agent = self
            .store
            .agent(agent_name)
            .map_err(|err| IterationBreak::Failed(WorkflowError::from(err)))?;
        let config = agent.definition.llm_config.clone();
        let api_key = agent.env.get(&config.api_key_env).cloned();
        let invocation = LlmInvocation::prepare(&config, api_key, messages.clone());

        let output = self
            .call_with_retries(invocation, config.max_retries, control)
            .await?;
        usage.absorb(&output.usage);

        let raw = output.content;
        messages.push(ChatMessage::assistant(raw.clone()));

        let parsed = match parse_agent_output(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(agent = agent_name, task_id, error = %err, "unparseable llm output");
                self.emit(
                    agent_name,
                    task_id,
                    AgentStatus::WeirdLlmOutput,
                    json!({ "error": err.to_string(), "output": raw }),
                );
                messages.push(ChatMessage::user(prompts::invalid_json_feedback()));
                return Ok(IterationOutcome::Continue);
            }
        };

        match parsed {
            AgentOutput::FinalAnswer { final_answer } => {
                self.emit(
                    agent_name,
                    task_id,
                    AgentStatus::FinalAnswer,
                    json!({ "finalAnswer": final_answer }),
                );
                Ok(IterationOutcome::Final(final_answer))
            }
            AgentOutput::Observation {
                observation,
                is_final_answer_ready,
            } => {
                self.emit(
                    agent_name,
                    task_id,
                    AgentStatus::Observing,
                    json!({
                        "observation": observation,
                        "isFinalAnswerReady": is_final_answer_ready
                    }),
                );
                if is_final_answer_ready {
                    self.emit(agent_name, task_id, AgentStatus::ThinkingEnd, Value::Null);
                    messages.push(ChatMessage::user(prompts::final_answer_request_feedback()));
                }
                Ok(IterationOutcome::Continue)
            }
            AgentOutput::ThoughtAction {
                thought,
                action,
                action_input,
            } => {
                if action == SELF_QUESTION {
                    self.emit(
                        agent_name,
                        task_id,
                        AgentStatus::SelfQuestion,
                        json!({ "thought": thought, "question": action_input }),
                    );
                    messages.push(ChatMessage::user(prompts::self_question_feedback(
                        &action_input,
                    )));
                    return Ok(IterationOutcome::Continue);
                }
                if action == BLOCK_TASK {
                    let reason = action_input
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| {
                            if thought.is_empty() {
                                "agent blocked the task".to_string()
                            } else {
                                thought.clone()
                            }
                        });
                    self.emit(
                        agent_name,
                        task_id,
                        AgentStatus::DecidedToBlockTask,
                        json!({ "reason": reason }),
                    );
                    return Ok(IterationOutcome::Blocked(reason));
                }
                self.execute_tool(&agent, task_id, &action, action_input, messages, control)
                    .await
            }
        }
    }

    async fn execute_tool(
        &self,
        agent: &AgentState,
        task_id: &str,
        action: &str,
        action_input: Value,
        messages: &mut Vec<ChatMessage>,
        control: &mut ControlHandle,
    ) -> Result<IterationOutcome, IterationBreak> {
        let agent_name = agent.definition.name.as_str();
        let bound = agent.definition.tools.iter().any(|t| t == action);
        let tool = if bound { self.tools.get(action) } else { None };
        let Some(tool) = tool else {
            self.emit(
                agent_name,
                task_id,
                AgentStatus::ToolDoesNotExist,
                json!({ "tool": action }),
            );
            messages.push(ChatMessage::user(prompts::tool_not_exist_feedback(
                action,
                &agent.definition.tools,
            )));
            return Ok(IterationOutcome::Continue);
        };

        if let Err(err) = check_input(&action_input, &tool.schema()) {
            self.emit(
                agent_name,
                task_id,
                AgentStatus::UsingToolError,
                json!({ "tool": action, "error": err.to_string() }),
            );
            messages.push(ChatMessage::user(prompts::invalid_tool_input_feedback(
                action,
                &err.to_string(),
            )));
            return Ok(IterationOutcome::Continue);
        }

        self.emit(
            agent_name,
            task_id,
            AgentStatus::UsingTool,
            json!({ "tool": action, "input": action_input }),
        );

        // Suspension point: the tool call is interruptible.
        let invocation = timeout(self.tool_timeout, tool.invoke(action_input));
        let result = tokio::select! {
            result = invocation => result,
            interrupt = control.interrupted() => return Err(interrupt.into()),
        };

        match result {
            Ok(Ok(output)) => {
                self.emit(
                    agent_name,
                    task_id,
                    AgentStatus::UsingToolEnd,
                    json!({ "tool": action, "output": output }),
                );
                messages.push(ChatMessage::user(prompts::tool_result_feedback(&output)));
            }
            Ok(Err(err)) => {
                tracing::warn!(agent = agent_name, task_id, tool = action, error = %err, "tool invocation failed");
                self.emit(
                    agent_name,
                    task_id,
                    AgentStatus::UsingToolError,
                    json!({ "tool": action, "error": err.to_string() }),
                );
                messages.push(ChatMessage::user(prompts::tool_error_feedback(
                    action,
                    &err.to_string(),
                )));
            }
            Err(_) => {
                let message = format!("timed out after {}s", self.tool_timeout.as_secs());
                self.emit(
                    agent_name,
                    task_id,
                    AgentStatus::UsingToolError,
                    json!({ "tool": action, "error": message }),
                );
                messages.push(ChatMessage::user(prompts::tool_error_feedback(
                    action, &message,
                )));
            }
        }
        Ok(IterationOutcome::Continue)
    }

    async fn call_with_retries(
        &self,
        invocation: LlmInvocation,
        max_retries: u32,
        control: &mut ControlHandle,
    ) -> Result<ensemble_providers::client::ChatCompletionOutput, IterationBreak> {
        let mut retries_used: u32 = 0;
        loop {
            // Suspension point before each HTTP request.
            match control.current() {
                ControlSignal::Pause => return Err(IterationBreak::Paused),
                ControlSignal::Stop => return Err(IterationBreak::Stopped),
                ControlSignal::Run => {}
            }

            let call = self.client.complete(invocation.clone());
            let result = tokio::select! {
                result = call => result,
                interrupt = control.interrupted() => return Err(interrupt.into()),
            };

            let error = match result {
                Ok(output) => return Ok(output),
                Err(error) => error,
            };

            if !error.is_retryable() || retries_used >= max_retries {
                return Err(IterationBreak::Failed(WorkflowError::LlmProvider(
                    error.to_string(),
                )));
            }

            let delay = retry_backoff(retries_used);
            retries_used += 1;
            tracing::warn!(
                model = %invocation.request.model,
                error = %error,
                retry_attempt = retries_used,
                retry_in_ms = delay.as_millis() as u64,
                "retrying llm call after transient error"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                interrupt = control.interrupted() => return Err(interrupt.into()),
            }
        }
    }

    fn catalog_for(&self, agent: &AgentState) -> Vec<ToolCatalogEntry> {
        agent
            .definition
            .tools
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| ToolCatalogEntry {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                schema: tool.schema(),
            })
            .collect()
    }

    fn emit(&self, agent_name: &str, task_id: &str, status: AgentStatus, metadata: Value) {
        if let Err(err) = self
            .store
            .agent_status(agent_name, task_id, status, metadata)
        {
            tracing::warn!(agent = agent_name, task_id, error = %err, "failed to record agent status");
        }
    }
}

fn retry_backoff(retries_used: u32) -> Duration {
    let shift = retries_used.min(16);
    let delay = RETRY_BASE_DELAY.saturating_mul(1 << shift);
    delay.min(RETRY_MAX_DELAY)
}
