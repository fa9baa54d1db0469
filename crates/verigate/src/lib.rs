//! verigate - build-verification pipelines
//!
//! Provides a pipeline orchestrator that:
//! - Loads a declarative definition of projects and verification stages
//! - Runs format, audit, lint, build and test against every project
//! - Verifies projects concurrently, stages strictly in order
//! - Aggregates results into a report and a pass/fail gate

pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod identity;
pub mod pipeline;
pub mod project;
pub mod report;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod tools;
pub mod trigger;

// Re-export key types
pub use config::{
    discover_projects, ColorChoice, PipelineDefinition, ProjectEntry, ResolvedPipeline,
    RunSettings, StageOverride, DEFAULT_CONFIG_FILE, UNIFIED_PROJECT_NAME,
};
pub use error::{ConfigError, ExecError, FailureCategory, StageError};
pub use executor::{CommandExecutor, CommandOutput, Invocation, ProcessExecutor};
pub use gate::{Gate, GateVerdict, GateViolation};
pub use identity::RunIdentity;
pub use pipeline::{Orchestrator, PipelineEvent};
pub use project::{Project, ProjectState};
pub use report::{PipelineReport, ProjectReport, StageOutcome, StageRecord};
pub use runner::{RunResult, StageRunner};
pub use stage::{StageConfig, StageKind};
pub use telemetry::init_tracing;
pub use tools::{ToolInventory, ToolRequirement};
pub use trigger::{Trigger, TriggerEvent};
