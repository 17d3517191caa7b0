//! Declarative team configuration.
//!
//! One YAML file declares the team (agents, tasks, env, inputs) and the
//! LLM providers (backends with `api_key_env` indirection plus model
//! profiles). Loading validates the references before a team is built.

mod loader;

use std::collections::HashMap;

use serde::Deserialize;

use ensemble_core::types::{AgentKind, LlmConfig};

pub use loader::{load_config, parse_config, validate_config, ConfigError};

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnsembleConfig {
    pub version: u32,
    pub team: TeamSpec,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Team declaration: identity, shared env, agents and tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct TeamSpec {
    pub name: String,
    /// Default inputs, overridable at start time
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    /// Shared env seeded into every agent
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub agents: Vec<AgentSpec>,
    pub tasks: Vec<TaskSpec>,
}

/// One agent declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: String,
    pub goal: String,
    #[serde(default)]
    pub background: String,
    #[serde(default = "default_agent_kind")]
    pub kind: AgentKind,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Model profile reference; the default profile applies when absent
    #[serde(default)]
    pub model: Option<String>,
}

fn default_agent_kind() -> AgentKind {
    AgentKind::React
}

fn default_max_iterations() -> u32 {
    10
}

/// One task declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    /// Stable id; generated when absent (such tasks cannot be depended on)
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub reference_id: Option<String>,
    pub description: String,
    pub expected_output: String,
    pub agent: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub allow_parallel_execution: bool,
}

/// LLM provider configuration: backends carry endpoint/auth, model
/// profiles carry sampling presets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub default_backend: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
    #[serde(default)]
    pub models: Vec<ModelProfile>,
}

impl ProvidersConfig {
    pub fn get_backend(&self, name: &str) -> Option<&BackendSpec> {
        self.backends.iter().find(|b| b.name == name)
    }

    pub fn get_model(&self, name: &str) -> Option<&ModelProfile> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn default_backend(&self) -> Option<&BackendSpec> {
        match &self.default_backend {
            Some(name) => self.get_backend(name),
            None => self.backends.first(),
        }
    }

    pub fn default_model(&self) -> Option<&ModelProfile> {
        match &self.default_model {
            Some(name) => self.get_model(name),
            None => self.models.first(),
        }
    }

    /// Resolve a model profile reference into a concrete `LlmConfig`.
    ///
    /// Falls back to the default profile, then to `LlmConfig` defaults
    /// when no providers are declared at all.
    pub fn resolve_llm_config(&self, profile: Option<&str>) -> Result<LlmConfig, String> {
        let model = match profile {
            Some(name) => Some(
                self.get_model(name)
                    .ok_or_else(|| format!("model profile '{}' not found", name))?,
            ),
            None => self.default_model(),
        };
        let Some(model) = model else {
            return Ok(LlmConfig::default());
        };

        let backend = match &model.backend {
            Some(name) => Some(
                self.get_backend(name)
                    .ok_or_else(|| format!("backend '{}' not found", name))?,
            ),
            None => self.default_backend(),
        };

        let mut config = LlmConfig {
            model: model.model.clone(),
            ..LlmConfig::default()
        };
        if let Some(temperature) = model.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = model.max_tokens {
            config.max_tokens = Some(max_tokens);
        }
        if let Some(backend) = backend {
            config.provider = backend.kind.clone();
            if let Some(endpoint) = &backend.endpoint {
                config.endpoint = endpoint.clone();
            }
            if let Some(api_key_env) = &backend.api_key_env {
                config.api_key_env = api_key_env.clone();
            }
        }
        Ok(config)
    }
}

/// Backend: vendor, endpoint and credential indirection.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSpec {
    /// Backend identifier (e.g. "openai-main")
    pub name: String,
    /// Vendor kind (e.g. "openai")
    pub kind: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Name of the env entry holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
}

/// Model profile: sampling preset bound to a backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelProfile {
    /// Profile name (e.g. "fast", "deep")
    pub name: String,
    #[serde(default)]
    pub backend: Option<String>,
    /// Actual model identifier
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn providers() -> ProvidersConfig {
        ProvidersConfig {
            default_backend: None,
            default_model: Some("fast".to_string()),
            backends: vec![BackendSpec {
                name: "openai-main".to_string(),
                kind: "openai".to_string(),
                endpoint: Some("https://example.test/v1/chat/completions".to_string()),
                api_key_env: Some("OPENAI_API_KEY".to_string()),
            }],
            models: vec![
                ModelProfile {
                    name: "fast".to_string(),
                    backend: Some("openai-main".to_string()),
                    model: "gpt-4o-mini".to_string(),
                    temperature: Some(0.1),
                    max_tokens: None,
                },
                ModelProfile {
                    name: "deep".to_string(),
                    backend: None,
                    model: "gpt-4o".to_string(),
                    temperature: None,
                    max_tokens: Some(4096),
                },
            ],
        }
    }

    #[test]
    fn test_resolve_named_profile() {
        let config = providers().resolve_llm_config(Some("deep")).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.max_tokens, Some(4096));
        // Backend fell back to the first declared one.
        assert_eq!(config.provider, "openai");
        assert_eq!(config.endpoint, "https://example.test/v1/chat/completions");
    }

    #[test]
    fn test_resolve_default_profile() {
        let config = providers().resolve_llm_config(None).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.temperature, 0.1);
        assert_eq!(config.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn test_resolve_unknown_profile_fails() {
        let err = providers().resolve_llm_config(Some("ghost")).unwrap_err();
        assert!(err.contains("model profile 'ghost' not found"));
    }

    #[test]
    fn test_resolve_without_providers_uses_defaults() {
        let config = ProvidersConfig::default().resolve_llm_config(None).unwrap();
        assert_eq!(config.model, LlmConfig::default().model);
    }
}
