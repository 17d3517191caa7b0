//! Ensemble runtime
//!
//! The orchestration engine: the `Team` public surface, the drive loop
//! behind it, and the two agent runtimes (ReAct and workflow-driven)
//! with cooperative pause/stop control.

pub mod bootstrap;
pub mod control;
pub mod flow;
pub mod orchestrator;
pub mod prompts;
pub mod react;
pub mod team;

pub use bootstrap::{init_tracing, team_from_config};
pub use control::{ControlHandle, ControlSignal, Controls, Interrupt};
pub use flow::{
    StepContext, StepEvent, StepEventSink, StepEventStatus, StepFlowOutcome, StepWorkflow,
};
pub use orchestrator::{EngineEvent, TaskOutcome};
pub use react::ReactExecutor;
pub use team::{Team, TeamBuilder};
