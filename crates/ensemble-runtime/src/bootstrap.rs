//! Bootstrap helpers: tracing setup and building a team from config.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use ensemble_config::EnsembleConfig;
use ensemble_core::error::WorkflowError;
use ensemble_core::tool::ToolRegistry;
use ensemble_core::types::{AgentDefinition, Task};
use ensemble_providers::client::LlmClient;

use crate::flow::StepWorkflow;
use crate::team::{Team, TeamBuilder};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialise tracing once, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Build a team from a validated config plus in-process collaborators.
///
/// Backend credentials named by `api_key_env` are resolved from the
/// process environment into the team env when present; `set_env` can
/// still patch them later.
pub fn team_from_config(
    config: &EnsembleConfig,
    tools: ToolRegistry,
    flows: HashMap<String, Arc<dyn StepWorkflow>>,
    client: Option<Arc<dyn LlmClient>>,
) -> Result<Team, WorkflowError> {
    ensemble_config::validate_config(config)
        .map_err(|e| WorkflowError::Configuration(e.to_string()))?;

    let mut env = config.team.env.clone();
    for backend in &config.providers.backends {
        if let Some(key_env) = &backend.api_key_env {
            if !env.contains_key(key_env) {
                match std::env::var(key_env) {
                    Ok(value) => {
                        env.insert(key_env.clone(), value);
                    }
                    Err(_) => {
                        tracing::warn!(
                            backend = %backend.name,
                            env_var = %key_env,
                            "credential env var not set; relying on set_env"
                        );
                    }
                }
            }
        }
    }

    let mut builder: TeamBuilder = Team::builder(&config.team.name).env(env).tools(tools);

    for spec in &config.team.agents {
        let llm_config = config
            .providers
            .resolve_llm_config(spec.model.as_deref())
            .map_err(WorkflowError::Configuration)?;
        let agent = AgentDefinition {
            name: spec.name.clone(),
            role: spec.role.clone(),
            goal: spec.goal.clone(),
            background: spec.background.clone(),
            kind: spec.kind,
            max_iterations: spec.max_iterations,
            tools: spec.tools.clone(),
            llm_config,
        };
        builder = builder.agent(agent);
    }

    for spec in &config.team.tasks {
        let mut task = Task::new(&spec.description, &spec.expected_output, &spec.agent)
            .with_dependencies(spec.dependencies.clone())
            .with_parallel_execution(spec.allow_parallel_execution);
        if let Some(id) = &spec.id {
            task = task.with_id(id);
        }
        if let Some(reference_id) = &spec.reference_id {
            task = task.with_reference_id(reference_id);
        }
        builder = builder.task(task);
    }

    for (agent_name, flow) in flows {
        builder = builder.step_workflow(agent_name, flow);
    }
    if let Some(client) = client {
        builder = builder.llm_client(client);
    }

    builder.build()
}
