//! End-to-end workflow scenarios driven through the public team surface
//! with scripted LLM and sub-workflow collaborators.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;

use ensemble_core::{
    AgentDefinition, AgentStatus, Task, TaskStatus, Tool, ToolError, WorkflowLogEntry,
    WorkflowStatus,
};
use ensemble_providers::client::{LlmError, ScriptedLlmClient};
use ensemble_runtime::{
    StepContext, StepEvent, StepEventStatus, StepFlowOutcome, StepWorkflow, Team,
};

const WAIT: Duration = Duration::from_secs(5);

fn final_answer(text: &str) -> String {
    json!({ "finalAnswer": text }).to_string()
}

fn observation(text: &str, ready: bool) -> String {
    json!({ "observation": text, "isFinalAnswerReady": ready }).to_string()
}

fn tool_call(thought: &str, action: &str, input: Value) -> String {
    json!({ "thought": thought, "action": action, "actionInput": input }).to_string()
}

fn react_agent(name: &str) -> AgentDefinition {
    AgentDefinition::react(name, "Generalist", "complete assigned tasks")
}

struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "look up a query"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolError> {
        Ok(json!(format!("results for {}", input["query"])))
    }
}

/// Two-phase sub-workflow: one step, a suspension, then completion.
struct SuspendingFlow;

#[async_trait]
impl StepWorkflow for SuspendingFlow {
    async fn run(&self, _input: Value, ctx: &StepContext) -> StepFlowOutcome {
        ctx.report(StepEvent::new("fetch", StepEventStatus::Started))
            .await;
        ctx.report(StepEvent::new("fetch", StepEventStatus::Completed))
            .await;
        StepFlowOutcome::Suspended(json!({ "checkpoint": 1 }))
    }

    async fn resume(&self, resume_data: Value, ctx: &StepContext) -> StepFlowOutcome {
        assert_eq!(resume_data["checkpoint"], 1);
        ctx.report(StepEvent::new("publish", StepEventStatus::Started))
            .await;
        ctx.report(StepEvent::new("publish", StepEventStatus::Completed))
            .await;
        StepFlowOutcome::Done(json!("flow-output"))
    }
}

struct FailingFlow;

#[async_trait]
impl StepWorkflow for FailingFlow {
    async fn run(&self, _input: Value, ctx: &StepContext) -> StepFlowOutcome {
        ctx.report(StepEvent::new("fetch", StepEventStatus::Failed))
            .await;
        StepFlowOutcome::Failed("backend unavailable".to_string())
    }

    async fn resume(&self, _resume_data: Value, _ctx: &StepContext) -> StepFlowOutcome {
        StepFlowOutcome::Failed("cannot resume".to_string())
    }
}

async fn wait_for_status(team: &Team, target: WorkflowStatus) {
    let mut watch = team.status_watch();
    timeout(WAIT, async {
        loop {
            if *watch.borrow_and_update() == target {
                return;
            }
            watch.changed().await.expect("status watch closed");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {:?}", target));
}

async fn wait_for_agent_entry(
    rx: &mut broadcast::Receiver<WorkflowLogEntry>,
    status: AgentStatus,
) -> WorkflowLogEntry {
    timeout(WAIT, async {
        loop {
            let entry = rx.recv().await.expect("log stream closed");
            if entry.agent_status().map(|(_, s, _)| s) == Some(status) {
                return entry;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for agent status {:?}", status))
}

async fn wait_for_task_entry(
    rx: &mut broadcast::Receiver<WorkflowLogEntry>,
    task_id: &str,
    status: TaskStatus,
) -> WorkflowLogEntry {
    timeout(WAIT, async {
        loop {
            let entry = rx.recv().await.expect("log stream closed");
            if entry.task_status() == Some((&task_id.to_string(), status)) {
                return entry;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for task {} {:?}", task_id, status))
}

fn task_status_seq(logs: &[WorkflowLogEntry], task_id: &str) -> Vec<TaskStatus> {
    logs.iter()
        .filter_map(|e| e.task_status())
        .filter(|(id, _)| id.as_str() == task_id)
        .map(|(_, status)| status)
        .collect()
}

fn workflow_status_seq(logs: &[WorkflowLogEntry]) -> Vec<WorkflowStatus> {
    logs.iter().filter_map(|e| e.workflow_status()).collect()
}

fn first_seq(logs: &[WorkflowLogEntry], task_id: &str, status: TaskStatus) -> u64 {
    logs.iter()
        .find(|e| e.task_status() == Some((&task_id.to_string(), status)))
        .map(|e| e.seq)
        .unwrap_or_else(|| panic!("no {:?} entry for {}", status, task_id))
}

/// Peak number of tasks simultaneously in `Doing`, replayed from the log.
fn max_concurrent_doing(logs: &[WorkflowLogEntry]) -> usize {
    let mut doing: Vec<String> = Vec::new();
    let mut peak = 0usize;
    for entry in logs {
        if let Some((task_id, status)) = entry.task_status() {
            match status {
                TaskStatus::Doing => {
                    if !doing.contains(task_id) {
                        doing.push(task_id.clone());
                    }
                }
                TaskStatus::Todo
                | TaskStatus::Paused
                | TaskStatus::Done
                | TaskStatus::Blocked
                | TaskStatus::Errored => doing.retain(|id| id != task_id),
                TaskStatus::Resumed => {}
            }
            peak = peak.max(doing.len());
        }
    }
    peak
}

// S1 - sequential sum: T2 depends on T1, one agent, strict ordering.
#[tokio::test]
async fn test_sequential_workflow_runs_tasks_in_order() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_reply(final_answer("three"));
    client.push_reply(final_answer("seven"));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("add 1 and 2", "a number", "solo").with_id("t1"))
        .task(
            Task::new("add 3 to the previous total", "a number", "solo")
                .with_id("t2")
                .with_dependencies(vec!["t1".to_string()]),
        )
        .llm_client(client.clone())
        .build()
        .expect("team");

    assert_eq!(team.status().unwrap(), WorkflowStatus::Initial);
    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);
    assert_eq!(result.result, Some(json!("seven")));
    assert_eq!(result.stats.iterations, 2);
    assert_eq!(result.stats.llm_usage.total_tokens, 30);

    let state = team.state().unwrap();
    assert_eq!(
        workflow_status_seq(&state.workflow_logs),
        vec![WorkflowStatus::Running, WorkflowStatus::Finished]
    );
    assert_eq!(
        task_status_seq(&state.workflow_logs, "t1"),
        vec![TaskStatus::Doing, TaskStatus::Done]
    );
    assert_eq!(
        task_status_seq(&state.workflow_logs, "t2"),
        vec![TaskStatus::Doing, TaskStatus::Done]
    );
    // Dependency ordering: T1's DONE precedes T2's first DOING.
    assert!(
        first_seq(&state.workflow_logs, "t1", TaskStatus::Done)
            < first_seq(&state.workflow_logs, "t2", TaskStatus::Doing)
    );
    assert_eq!(max_concurrent_doing(&state.workflow_logs), 1);
    // Context carried T1's result into T2's prompt.
    let calls = client.recorded();
    assert!(calls[1].messages[1].content.contains("Result: three"));
}

// S2 - parallel branches: B and C fan out right after A completes.
#[tokio::test]
async fn test_parallel_branches_start_near_simultaneously() {
    let client = Arc::new(ScriptedLlmClient::new());
    for _ in 0..3 {
        client.push_reply(final_answer("ok"));
    }

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("seed", "out", "solo").with_id("a"))
        .task(
            Task::new("branch b", "out", "solo")
                .with_id("b")
                .with_dependencies(vec!["a".to_string()])
                .with_parallel_execution(true),
        )
        .task(
            Task::new("branch c", "out", "solo")
                .with_id("c")
                .with_dependencies(vec!["a".to_string()])
                .with_parallel_execution(true),
        )
        .llm_client(client)
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);

    let state = team.state().unwrap();
    let a_done = first_seq(&state.workflow_logs, "a", TaskStatus::Done);
    let b_doing = first_seq(&state.workflow_logs, "b", TaskStatus::Doing);
    let c_doing = first_seq(&state.workflow_logs, "c", TaskStatus::Doing);
    assert!(b_doing > a_done && c_doing > a_done);
    assert!(b_doing - a_done <= 2);
    assert!(c_doing - a_done <= 2);
    assert!(b_doing.abs_diff(c_doing) <= 2);
}

// S3 - mixed parallelism: B and C overlap, D waits for the queue to drain.
#[tokio::test]
async fn test_mixed_parallelism_with_sequential_tail() {
    let client = Arc::new(ScriptedLlmClient::new().with_delay(Duration::from_millis(50)));
    for _ in 0..4 {
        client.push_reply(final_answer("ok"));
    }

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("seed", "out", "solo").with_id("a"))
        .task(
            Task::new("branch b", "out", "solo")
                .with_id("b")
                .with_dependencies(vec!["a".to_string()])
                .with_parallel_execution(true),
        )
        .task(
            Task::new("branch c", "out", "solo")
                .with_id("c")
                .with_dependencies(vec!["a".to_string()])
                .with_parallel_execution(true),
        )
        .task(
            Task::new("tail d", "out", "solo")
                .with_id("d")
                .with_dependencies(vec!["b".to_string()]),
        )
        .llm_client(client)
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);

    let state = team.state().unwrap();
    assert!(max_concurrent_doing(&state.workflow_logs) > 1);
    assert!(
        first_seq(&state.workflow_logs, "d", TaskStatus::Doing)
            > first_seq(&state.workflow_logs, "b", TaskStatus::Done)
    );
    // Sequential D never overlaps anything.
    let d_doing = first_seq(&state.workflow_logs, "d", TaskStatus::Doing);
    let c_done = first_seq(&state.workflow_logs, "c", TaskStatus::Done);
    assert!(d_doing > c_done);
}

// S4 - pause and resume during a ReAct iteration, with thinking-metadata
// consistency across the pause.
#[tokio::test]
async fn test_pause_and_resume_preserve_thinking_metadata() {
    let client = Arc::new(ScriptedLlmClient::new().with_delay(Duration::from_millis(300)));
    client.push_reply(final_answer("done"));
    client.push_reply(final_answer("done"));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("slow task", "out", "solo").with_id("t1"))
        .llm_client(client)
        .build()
        .expect("team");

    let mut logs = team.subscribe_logs();
    let runner = {
        let team = team.clone();
        tokio::spawn(async move { team.start(HashMap::new()).await })
    };

    wait_for_agent_entry(&mut logs, AgentStatus::Thinking).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    team.pause().expect("pause");

    assert_eq!(team.status().unwrap(), WorkflowStatus::Paused);
    let state = team.state().unwrap();
    assert_eq!(state.tasks[0].status, TaskStatus::Paused);
    assert!(state.queue_paused);

    tokio::time::sleep(Duration::from_millis(50)).await;
    team.resume().expect("resume");

    let result = runner.await.expect("join").expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);

    let state = team.state().unwrap();
    assert_eq!(
        task_status_seq(&state.workflow_logs, "t1"),
        vec![
            TaskStatus::Doing,
            TaskStatus::Paused,
            TaskStatus::Resumed,
            TaskStatus::Doing,
            TaskStatus::Done,
        ]
    );

    // Thinking metadata before the pause equals the first one after it.
    let paused_seq = first_seq(&state.workflow_logs, "t1", TaskStatus::Paused);
    let thinking: Vec<(u64, Value)> = state
        .workflow_logs
        .iter()
        .filter_map(|e| {
            e.agent_status()
                .filter(|(_, s, _)| *s == AgentStatus::Thinking)
                .map(|(_, _, metadata)| (e.seq, metadata.clone()))
        })
        .collect();
    let before = thinking
        .iter()
        .filter(|(seq, _)| *seq < paused_seq)
        .next_back()
        .expect("thinking before pause");
    let after = thinking
        .iter()
        .find(|(seq, _)| *seq > paused_seq)
        .expect("thinking after resume");
    assert_eq!(before.1, after.1);
}

// S5 - stop mid-flight: tasks return to TODO, status walks
// RUNNING -> STOPPING -> STOPPED.
#[tokio::test]
async fn test_stop_resets_incomplete_tasks() {
    let client = Arc::new(ScriptedLlmClient::new().with_delay(Duration::from_millis(300)));
    client.push_reply(final_answer("unused"));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("long task", "out", "solo").with_id("t1"))
        .task(
            Task::new("never starts", "out", "solo")
                .with_id("t2")
                .with_dependencies(vec!["t1".to_string()]),
        )
        .llm_client(client.clone())
        .build()
        .expect("team");

    let mut logs = team.subscribe_logs();
    let runner = {
        let team = team.clone();
        tokio::spawn(async move { team.start(HashMap::new()).await })
    };

    wait_for_agent_entry(&mut logs, AgentStatus::Thinking).await;
    team.stop().await.expect("stop");

    let result = runner.await.expect("join").expect("run");
    assert_eq!(result.status, WorkflowStatus::Stopped);

    let state = team.state().unwrap();
    assert_eq!(
        workflow_status_seq(&state.workflow_logs),
        vec![
            WorkflowStatus::Running,
            WorkflowStatus::Stopping,
            WorkflowStatus::Stopped,
        ]
    );
    for task in &state.tasks {
        assert_eq!(task.status, TaskStatus::Todo);
    }
    assert!(state.executing_tasks.is_empty());

    // The team can start again after a stop.
    client.push_reply(final_answer("first"));
    client.push_reply(final_answer("second"));
    let result = team.start(HashMap::new()).await.expect("second run");
    assert_eq!(result.status, WorkflowStatus::Finished);
}

// S6 - security block: the agent refuses via block_task.
#[tokio::test]
async fn test_block_task_blocks_team() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_reply(tool_call(
        "this request is unsafe",
        "block_task",
        json!({ "reason": "policy violation" }),
    ));

    let team = Team::builder("crew")
        .agent(react_agent("guard"))
        .task(Task::new("do something forbidden", "out", "guard").with_id("t1"))
        .llm_client(client)
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Blocked);
    assert_eq!(result.error.as_deref(), Some("policy violation"));

    let state = team.state().unwrap();
    assert_eq!(state.tasks[0].status, TaskStatus::Blocked);
    assert_eq!(state.team_workflow_status, WorkflowStatus::Blocked);
    assert!(state.workflow_logs.iter().any(|e| {
        e.agent_status().map(|(_, s, _)| s) == Some(AgentStatus::DecidedToBlockTask)
    }));
}

// S7 - set_env mid-flight: the next provider call carries the new key.
#[tokio::test]
async fn test_set_env_applies_to_next_llm_call() {
    let client = Arc::new(ScriptedLlmClient::new().with_delay(Duration::from_millis(300)));
    client.push_reply(final_answer("one"));
    client.push_reply(final_answer("two"));
    client.push_reply(final_answer("two"));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .env(HashMap::from([(
            "OPENAI_API_KEY".to_string(),
            "k1".to_string(),
        )]))
        .task(Task::new("first", "out", "solo").with_id("t1"))
        .task(
            Task::new("second", "out", "solo")
                .with_id("t2")
                .with_dependencies(vec!["t1".to_string()]),
        )
        .llm_client(client.clone())
        .build()
        .expect("team");

    let mut logs = team.subscribe_logs();
    let runner = {
        let team = team.clone();
        tokio::spawn(async move { team.start(HashMap::new()).await })
    };

    wait_for_task_entry(&mut logs, "t1", TaskStatus::Done).await;
    // Freeze T2, rotate the credential, resume: its (re-run) call must
    // carry the patched key.
    team.pause().expect("pause");
    team.set_env(HashMap::from([(
        "OPENAI_API_KEY".to_string(),
        "k2".to_string(),
    )]))
    .expect("set_env");
    team.resume().expect("resume");

    let result = runner.await.expect("join").expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);

    let calls = client.recorded();
    assert_eq!(calls[0].api_key.as_deref(), Some("k1"));
    for call in &calls[1..] {
        assert_eq!(call.api_key.as_deref(), Some("k2"));
    }
}

// Tool round: USING_TOOL / USING_TOOL_END entries and feedback re-entry.
#[tokio::test]
async fn test_tool_invocation_feeds_result_back() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_reply(tool_call(
        "need data",
        "search",
        json!({ "query": "rust orchestration" }),
    ));
    client.push_reply(observation("found it", true));
    client.push_reply(final_answer("rust orchestration is great"));

    let team = Team::builder("crew")
        .agent(react_agent("scout").with_tools(vec!["search".to_string()]))
        .tool(Arc::new(SearchTool))
        .task(Task::new("research the topic", "a summary", "scout").with_id("t1"))
        .llm_client(client.clone())
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);
    assert_eq!(result.stats.iterations, 3);

    let state = team.state().unwrap();
    let statuses: Vec<AgentStatus> = state
        .workflow_logs
        .iter()
        .filter_map(|e| e.agent_status().map(|(_, s, _)| s))
        .collect();
    assert!(statuses.contains(&AgentStatus::UsingTool));
    assert!(statuses.contains(&AgentStatus::UsingToolEnd));
    assert!(statuses.contains(&AgentStatus::Observing));
    assert!(statuses.contains(&AgentStatus::ThinkingEnd));

    // The tool output re-entered the loop as a user feedback message.
    let calls = client.recorded();
    let second_call_user = calls[1]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    assert!(second_call_user.contains("results for"));
}

// Unknown tool and unparseable output are coached, not fatal.
#[tokio::test]
async fn test_unknown_tool_and_weird_output_are_recovered() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_reply(tool_call("try something", "warp_drive", json!({})));
    client.push_reply("I just feel like chatting instead of JSON");
    client.push_reply(final_answer("recovered"));

    let team = Team::builder("crew")
        .agent(react_agent("scout").with_tools(vec!["search".to_string()]))
        .tool(Arc::new(SearchTool))
        .task(Task::new("research", "out", "scout").with_id("t1"))
        .llm_client(client.clone())
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);

    let state = team.state().unwrap();
    let statuses: Vec<AgentStatus> = state
        .workflow_logs
        .iter()
        .filter_map(|e| e.agent_status().map(|(_, s, _)| s))
        .collect();
    assert!(statuses.contains(&AgentStatus::ToolDoesNotExist));
    assert!(statuses.contains(&AgentStatus::WeirdLlmOutput));

    let calls = client.recorded();
    assert!(calls[1].messages.iter().any(|m| m.content.contains("does not exist")));
    assert!(calls[2]
        .messages
        .iter()
        .any(|m| m.content.contains("not a single valid JSON object")));
}

// Iteration budget: force-final-answer coaching, then a task error.
#[tokio::test]
async fn test_iteration_budget_exhaustion_errors_task() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_reply(observation("still thinking", false));
    client.push_reply(observation("still thinking", false));

    let team = Team::builder("crew")
        .agent(react_agent("solo").with_max_iterations(2))
        .task(Task::new("undecidable", "out", "solo").with_id("t1"))
        .llm_client(client.clone())
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Errored);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("iteration limit exceeded"));

    let state = team.state().unwrap();
    assert_eq!(state.tasks[0].status, TaskStatus::Errored);
    assert!(state.workflow_logs.iter().any(|e| {
        e.agent_status().map(|(_, s, _)| s) == Some(AgentStatus::MaxIterationsError)
    }));

    // Penultimate-iteration coaching reached the final call.
    let calls = client.recorded();
    assert!(calls[1]
        .messages
        .iter()
        .any(|m| m.content.contains("running out of iterations")));
}

// Transient provider errors retry; hard failures escalate.
#[tokio::test]
async fn test_provider_retry_then_success() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_error(LlmError::Timeout(1));
    client.push_reply(final_answer("eventually"));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("flaky", "out", "solo").with_id("t1"))
        .llm_client(client.clone())
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);
    assert_eq!(client.call_count(), 2);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried_and_fails_team() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_error(LlmError::Auth("bad key".to_string()));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("doomed", "out", "solo").with_id("t1"))
        .llm_client(client.clone())
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Errored);
    assert_eq!(client.call_count(), 1);
    assert_eq!(team.state().unwrap().tasks[0].status, TaskStatus::Errored);
}

// Workflow-driven agent: suspension pauses the task, resume completes it.
#[tokio::test]
async fn test_workflow_driven_agent_suspends_and_resumes() {
    let team = Team::builder("crew")
        .agent(AgentDefinition::workflow_driven(
            "pipeline",
            "Runner",
            "drive the step graph",
        ))
        .task(Task::new("run the pipeline", "pipeline output", "pipeline").with_id("t1"))
        .step_workflow("pipeline", Arc::new(SuspendingFlow))
        .llm_client(Arc::new(ScriptedLlmClient::new()))
        .build()
        .expect("team");

    let runner = {
        let team = team.clone();
        tokio::spawn(async move { team.start(HashMap::new()).await })
    };

    wait_for_status(&team, WorkflowStatus::Paused).await;
    assert_eq!(team.state().unwrap().tasks[0].status, TaskStatus::Paused);

    team.resume().expect("resume");
    let result = runner.await.expect("join").expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);
    assert_eq!(result.result, Some(json!("flow-output")));

    let state = team.state().unwrap();
    let statuses: Vec<AgentStatus> = state
        .workflow_logs
        .iter()
        .filter_map(|e| e.agent_status().map(|(_, s, _)| s))
        .collect();
    assert!(statuses.contains(&AgentStatus::WorkflowStepStarted));
    assert!(statuses.contains(&AgentStatus::WorkflowStepCompleted));
}

#[tokio::test]
async fn test_workflow_driven_failure_errors_task() {
    let team = Team::builder("crew")
        .agent(AgentDefinition::workflow_driven(
            "pipeline",
            "Runner",
            "drive the step graph",
        ))
        .task(Task::new("run the pipeline", "output", "pipeline").with_id("t1"))
        .step_workflow("pipeline", Arc::new(FailingFlow))
        .llm_client(Arc::new(ScriptedLlmClient::new()))
        .build()
        .expect("team");

    let result = team.start(HashMap::new()).await.expect("run");
    assert_eq!(result.status, WorkflowStatus::Errored);
    assert!(result
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("backend unavailable"));
    assert_eq!(team.state().unwrap().tasks[0].status, TaskStatus::Errored);
}

// Input interpolation resolves placeholders at start time.
#[tokio::test]
async fn test_inputs_interpolate_into_descriptions() {
    let client = Arc::new(ScriptedLlmClient::new());
    client.push_reply(final_answer("done"));

    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("Write about {topic} in {style}", "text", "solo").with_id("t1"))
        .llm_client(client.clone())
        .build()
        .expect("team");

    let result = team
        .start(HashMap::from([(
            "topic".to_string(),
            "orchestration".to_string(),
        )]))
        .await
        .expect("run");
    assert_eq!(result.status, WorkflowStatus::Finished);

    let task = &team.state().unwrap().tasks[0];
    assert_eq!(task.description, "Write about orchestration in {style}");
    assert!(client.recorded()[0].messages[1]
        .content
        .contains("Write about orchestration in {style}"));
}

// Lifecycle preconditions are enforced.
#[tokio::test]
async fn test_lifecycle_preconditions() {
    let team = Team::builder("crew")
        .agent(react_agent("solo"))
        .task(Task::new("work", "out", "solo").with_id("t1"))
        .llm_client(Arc::new(ScriptedLlmClient::new()))
        .build()
        .expect("team");

    assert!(team.pause().is_err());
    assert!(team.resume().is_err());
    assert!(team.stop().await.is_err());
}
