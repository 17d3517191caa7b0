//! Prompt assembly and coaching feedback for the ReAct loop.

use std::fmt::Write;

use ensemble_core::tool::{BLOCK_TASK, SELF_QUESTION};
use ensemble_core::types::AgentDefinition;
use serde_json::Value;

/// Tool catalog entry shown to the agent.
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Build the system prompt: persona, output contract and tool catalog.
pub fn build_system_prompt(agent: &AgentDefinition, tools: &[ToolCatalogEntry]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are {}, {}.", agent.name, agent.role);
    let _ = writeln!(prompt, "Your goal: {}", agent.goal);
    if !agent.background.is_empty() {
        let _ = writeln!(prompt, "Background: {}", agent.background);
    }

    prompt.push_str("\nAnswer with EXACTLY ONE JSON object per turn, in one of these shapes:\n");
    prompt.push_str(r#"{"thought":"...","action":"tool_name","actionInput":{...}}"#);
    prompt.push('\n');
    prompt.push_str(r#"{"observation":"...","isFinalAnswerReady":false}"#);
    prompt.push('\n');
    prompt.push_str(r#"{"finalAnswer":"..."}"#);
    prompt.push('\n');

    prompt.push_str("\nRules:\n");
    prompt.push_str("1) Return JSON only, no prose around it.\n");
    prompt.push_str("2) Use only tool names listed in the Tool Catalog.\n");
    let _ = writeln!(
        prompt,
        "3) Use action \"{}\" to reason about a question you can answer yourself.",
        SELF_QUESTION
    );
    let _ = writeln!(
        prompt,
        "4) Use action \"{}\" with actionInput {{\"reason\":\"...\"}} only if the task must not be done.",
        BLOCK_TASK
    );
    prompt.push_str("5) Produce finalAnswer as soon as you have what the task asks for.\n");

    prompt.push_str("\nTool Catalog:\n");
    if tools.is_empty() {
        prompt.push_str("(no tools bound)\n");
    }
    for tool in tools {
        let _ = writeln!(prompt, "- name: {}", tool.name);
        let _ = writeln!(prompt, "  description: {}", tool.description);
        let _ = writeln!(prompt, "  input_schema: {}", tool.schema);
    }
    prompt
}

/// Build the opening user message: the task plus accumulated context.
pub fn build_task_prompt(description: &str, expected_output: &str, context: &str) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Current task: {}", description);
    let _ = writeln!(prompt, "Expected output: {}", expected_output);
    prompt.push_str("\nFindings and insights from previous tasks:\n");
    if context.trim().is_empty() {
        prompt.push_str("None yet.\n");
    } else {
        prompt.push_str(context);
    }
    prompt
}

/// Fed back after a successful tool call.
pub fn tool_result_feedback(output: &Value) -> String {
    format!(
        "You got this result from the tool: {}. Use it to produce an observation, then decide whether the final answer is ready.",
        output
    )
}

/// Fed back when the named tool does not exist.
pub fn tool_not_exist_feedback(name: &str, known: &[String]) -> String {
    format!(
        "Hey, the tool \"{}\" does not exist. Choose one of your bound tools: [{}].",
        name,
        known.join(", ")
    )
}

/// Fed back when the tool input failed schema validation.
pub fn invalid_tool_input_feedback(name: &str, error: &str) -> String {
    format!(
        "The input you provided for tool \"{}\" is invalid: {}. Fix the actionInput to match the tool's schema and try again.",
        name, error
    )
}

/// Fed back when the tool itself failed.
pub fn tool_error_feedback(name: &str, error: &str) -> String {
    format!(
        "The tool \"{}\" failed: {}. You can retry it, try another tool, or continue from what you already know.",
        name, error
    )
}

/// Fed back when the raw output was not one of the three shapes.
pub fn invalid_json_feedback() -> String {
    "Your last answer was not a single valid JSON object in one of the allowed shapes. Answer again with exactly one JSON object.".to_string()
}

/// Fed back after a `self_question` action.
pub fn self_question_feedback(question: &Value) -> String {
    format!(
        "Awesome, please answer yourself the question: {}.",
        question
    )
}

/// Fed back once an observation reports the final answer is ready.
pub fn final_answer_request_feedback() -> String {
    "Great. Provide the final answer now, as {\"finalAnswer\": ...}.".to_string()
}

/// Last-chance prompt before the iteration budget runs out.
pub fn force_final_answer_feedback() -> String {
    "You are running out of iterations. You MUST answer with {\"finalAnswer\": ...} on your next turn, using everything you know so far.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_prompt_lists_tools_and_shapes() {
        let agent = AgentDefinition::react("scout", "a researcher", "find facts")
            .with_tools(vec!["search".to_string()]);
        let tools = vec![ToolCatalogEntry {
            name: "search".to_string(),
            description: "web search".to_string(),
            schema: json!({"type":"object","properties":{"query":{"type":"string"}}}),
        }];

        let prompt = build_system_prompt(&agent, &tools);
        assert!(prompt.contains("You are scout"));
        assert!(prompt.contains("Tool Catalog"));
        assert!(prompt.contains("- name: search"));
        assert!(prompt.contains("finalAnswer"));
        assert!(prompt.contains("self_question"));
        assert!(prompt.contains("block_task"));
    }

    #[test]
    fn test_task_prompt_includes_context_when_present() {
        let prompt = build_task_prompt("add numbers", "a sum", "Task: seed / Result: 3\n");
        assert!(prompt.contains("Current task: add numbers"));
        assert!(prompt.contains("Result: 3"));

        let empty = build_task_prompt("add numbers", "a sum", "");
        assert!(empty.contains("None yet."));
    }
}
