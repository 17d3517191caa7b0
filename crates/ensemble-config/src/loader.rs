//! Configuration loading and validation.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::EnsembleConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<EnsembleConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate config from a YAML string.
pub fn parse_config(content: &str) -> Result<EnsembleConfig, ConfigError> {
    let config: EnsembleConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate cross-references inside a parsed config.
pub fn validate_config(config: &EnsembleConfig) -> Result<(), ConfigError> {
    if config.version == 0 {
        return Err(ConfigError::Invalid(
            "version must be greater than 0".to_string(),
        ));
    }
    if config.team.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "team.name must not be empty".to_string(),
        ));
    }
    if config.team.agents.is_empty() {
        return Err(ConfigError::Invalid(
            "team.agents must not be empty".to_string(),
        ));
    }
    if config.team.tasks.is_empty() {
        return Err(ConfigError::Invalid(
            "team.tasks must not be empty".to_string(),
        ));
    }

    let mut agent_names = HashSet::new();
    for agent in &config.team.agents {
        if agent.name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "team.agents[].name must not be empty".to_string(),
            ));
        }
        if !agent_names.insert(agent.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate agent name '{}'",
                agent.name
            )));
        }
        if agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(format!(
                "team.agents[{}].max_iterations must be > 0",
                agent.name
            )));
        }
        if let Some(model) = &agent.model {
            if config.providers.get_model(model).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "team.agents[{}].model '{}' not found in providers.models",
                    agent.name, model
                )));
            }
        }
    }

    let task_ids: HashSet<&str> = config
        .team
        .tasks
        .iter()
        .filter_map(|t| t.id.as_deref())
        .collect();
    for task in &config.team.tasks {
        if task.description.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "team.tasks[].description must not be empty".to_string(),
            ));
        }
        if !agent_names.contains(task.agent.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "task '{}' is bound to unknown agent '{}'",
                task.id.as_deref().unwrap_or(&task.description),
                task.agent
            )));
        }
        for dep in &task.dependencies {
            if !task_ids.contains(dep.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "task '{}' depends on undeclared task id '{}'",
                    task.id.as_deref().unwrap_or(&task.description),
                    dep
                )));
            }
        }
    }

    for backend in &config.providers.backends {
        if backend.name.trim().is_empty() || backend.kind.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "providers.backends[].name and kind must not be empty".to_string(),
            ));
        }
    }
    for model in &config.providers.models {
        if model.name.trim().is_empty() || model.model.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "providers.models[].name and model must not be empty".to_string(),
            ));
        }
        if let Some(backend) = &model.backend {
            if config.providers.get_backend(backend).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "providers.models[{}].backend '{}' not found",
                    model.name, backend
                )));
            }
        }
    }

    Ok(())
}
