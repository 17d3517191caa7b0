//! Parsing of raw ReAct agent output.
//!
//! The model must answer with exactly one of three JSON shapes. Anything
//! else falls into the malformed-output path, which the runtime turns into
//! coaching feedback.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Closed representation of the three admissible output shapes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AgentOutput {
    /// `{"finalAnswer": ...}` — the task result.
    FinalAnswer {
        #[serde(rename = "finalAnswer")]
        final_answer: Value,
    },
    /// `{"thought": "...", "action": "...", "actionInput": {...}}` — a tool
    /// call or one of the reserved actions.
    ThoughtAction {
        #[serde(default)]
        thought: String,
        action: String,
        #[serde(rename = "actionInput", default)]
        action_input: Value,
    },
    /// `{"observation": "...", "isFinalAnswerReady": bool}`.
    Observation {
        observation: String,
        #[serde(rename = "isFinalAnswerReady", default)]
        is_final_answer_ready: bool,
    },
}

/// Output parsing errors.
#[derive(Debug, Clone, Error)]
pub enum OutputParseError {
    #[error("output contained no JSON object")]
    NoJson,

    #[error("output JSON matched none of the expected shapes: {0}")]
    UnexpectedShape(String),
}

/// Parse raw model output into one of the three shapes.
///
/// The model frequently wraps its JSON in prose or markdown fences, so the
/// first balanced JSON object found in the text is used.
pub fn parse_agent_output(raw: &str) -> Result<AgentOutput, OutputParseError> {
    let json = first_json_object(raw).ok_or(OutputParseError::NoJson)?;
    serde_json::from_str::<AgentOutput>(&json)
        .map_err(|e| OutputParseError::UnexpectedShape(e.to_string()))
}

/// Find the first balanced, parseable JSON object in free-form text.
fn first_json_object(text: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        match object_end(text, start) {
            Some(end) => {
                let candidate = &text[start..=end];
                let is_object = serde_json::from_str::<Value>(candidate)
                    .map(|v| v.is_object())
                    .unwrap_or(false);
                if is_object {
                    return Some(candidate.to_string());
                }
                search_from = start + 1;
            }
            None => search_from = start + 1,
        }
    }
    None
}

/// Index of the brace closing the object opened at `start`, honoring
/// string literals and escapes.
fn object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_final_answer() {
        let out = parse_agent_output(r#"{"finalAnswer": "Paris"}"#).unwrap();
        assert_eq!(
            out,
            AgentOutput::FinalAnswer {
                final_answer: json!("Paris")
            }
        );
    }

    #[test]
    fn test_parse_structured_final_answer() {
        let out = parse_agent_output(r#"{"finalAnswer": {"total": 7}}"#).unwrap();
        match out {
            AgentOutput::FinalAnswer { final_answer } => {
                assert_eq!(final_answer["total"], 7);
            }
            other => panic!("expected final answer, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_thought_action() {
        let raw = r#"{"thought":"look it up","action":"search","actionInput":{"query":"rust"}}"#;
        let out = parse_agent_output(raw).unwrap();
        match out {
            AgentOutput::ThoughtAction {
                thought,
                action,
                action_input,
            } => {
                assert_eq!(thought, "look it up");
                assert_eq!(action, "search");
                assert_eq!(action_input["query"], "rust");
            }
            other => panic!("expected thought/action, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_observation() {
        let raw = r#"{"observation":"the sum is 7","isFinalAnswerReady":true}"#;
        let out = parse_agent_output(raw).unwrap();
        assert_eq!(
            out,
            AgentOutput::Observation {
                observation: "the sum is 7".to_string(),
                is_final_answer_ready: true,
            }
        );
    }

    #[test]
    fn test_observation_ready_flag_defaults_false() {
        let out = parse_agent_output(r#"{"observation":"still working"}"#).unwrap();
        assert_eq!(
            out,
            AgentOutput::Observation {
                observation: "still working".to_string(),
                is_final_answer_ready: false,
            }
        );
    }

    #[test]
    fn test_parse_skips_markdown_fences_and_prose() {
        let raw = "Here is my answer:\n```json\n{\"finalAnswer\": \"42\"}\n```";
        let out = parse_agent_output(raw).unwrap();
        assert_eq!(
            out,
            AgentOutput::FinalAnswer {
                final_answer: json!("42")
            }
        );
    }

    #[test]
    fn test_parse_handles_braces_inside_strings() {
        let raw = r#"noise {"observation":"value with } brace"} end"#;
        let out = parse_agent_output(raw).unwrap();
        match out {
            AgentOutput::Observation { observation, .. } => {
                assert_eq!(observation, "value with } brace");
            }
            other => panic!("expected observation, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_skips_unparseable_brace_runs() {
        let raw = r#"{not json} then {"finalAnswer":"ok"}"#;
        let out = parse_agent_output(raw).unwrap();
        assert_eq!(
            out,
            AgentOutput::FinalAnswer {
                final_answer: json!("ok")
            }
        );
    }

    #[test]
    fn test_no_json_is_an_error() {
        assert!(matches!(
            parse_agent_output("I refuse to answer in JSON"),
            Err(OutputParseError::NoJson)
        ));
    }

    #[test]
    fn test_unknown_shape_is_an_error() {
        assert!(matches!(
            parse_agent_output(r#"{"verdict":"yes"}"#),
            Err(OutputParseError::UnexpectedShape(_))
        ));
    }
}
