//! Error taxonomy for pipeline configuration and stage execution.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::runner::RunResult;
use crate::stage::StageKind;

/// Errors raised while loading or resolving a pipeline definition.
///
/// Any of these aborts the invocation before a single stage runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read pipeline definition {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed pipeline definition: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize pipeline definition: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("repository root {0} is not a directory")]
    RepoRoot(PathBuf),

    #[error("unknown stage '{name}' in {location} (expected one of: format, audit, lint, build, test)")]
    UnknownStage { location: String, name: String },

    #[error("project '{project}' lists stage '{stage}' more than once")]
    DuplicateStage { project: String, stage: StageKind },

    #[error("stage '{stage}' is overridden more than once in the [stages] table")]
    DuplicateStageOverride { stage: StageKind },

    #[error("project '{project}' selects no stages")]
    NoStages { project: String },

    #[error("project '{0}' is defined more than once")]
    DuplicateProject(String),

    #[error("project name must not be empty")]
    EmptyProjectName,

    #[error("project '{project}' path {path} must be relative to the repository root")]
    AbsoluteProjectPath { project: String, path: PathBuf },

    #[error("project '{project}' path {path} does not exist")]
    ProjectPathMissing { project: String, path: PathBuf },

    #[error("project '{project}' path {path} is not a directory")]
    ProjectPathNotDirectory { project: String, path: PathBuf },

    #[error("stage '{stage}' override has an empty {field}")]
    EmptyCommand {
        stage: StageKind,
        field: &'static str,
    },

    #[error("no configured project is named '{0}'")]
    UnknownProjectFilter(String),
}

/// A stage name that is not one of the five builtin stages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage name: {0}")]
pub struct ParseStageError(pub String);

/// Errors produced by a [`crate::executor::CommandExecutor`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invocation has an empty command")]
    EmptyCommand,

    #[error("program '{program}' was not found")]
    NotFound { program: String },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {}s", .timeout.as_secs())]
    TimedOut { program: String, timeout: Duration },
}

/// Whether a failed stage points at the code under verification or at the
/// machine running the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The tool ran and rejected the project: a diff, vulnerability,
    /// warning, compile error or test failure.
    CodeDefect,
    /// The tool could not run at all.
    Environment,
}

impl FailureCategory {
    pub fn label(&self) -> &'static str {
        match self {
            FailureCategory::CodeDefect => "code defect",
            FailureCategory::Environment => "environment problem",
        }
    }
}

/// Errors returned by [`crate::runner::StageRunner::run_stage`].
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("{project}/{stage}: required tool '{tool}' is not installed")]
    ToolMissing {
        project: String,
        stage: StageKind,
        tool: String,
    },

    #[error("{}/{}: {}", .0.project, .0.stage, .0.exit_label())]
    Failure(Box<RunResult>),

    #[error("{project}/{stage}: timed out after {timeout_secs}s")]
    TimedOut {
        project: String,
        stage: StageKind,
        timeout_secs: u64,
    },

    #[error("{project}/{stage}: failed to start '{program}': {message}")]
    Spawn {
        project: String,
        stage: StageKind,
        program: String,
        message: String,
    },
}

impl StageError {
    /// Stage the error was raised for.
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::ToolMissing { stage, .. }
            | StageError::TimedOut { stage, .. }
            | StageError::Spawn { stage, .. } => *stage,
            StageError::Failure(result) => result.stage,
        }
    }

    /// Project the error was raised for.
    pub fn project(&self) -> &str {
        match self {
            StageError::ToolMissing { project, .. }
            | StageError::TimedOut { project, .. }
            | StageError::Spawn { project, .. } => project,
            StageError::Failure(result) => &result.project,
        }
    }

    pub fn category(&self) -> FailureCategory {
        match self {
            StageError::Failure(_) | StageError::TimedOut { .. } => FailureCategory::CodeDefect,
            StageError::ToolMissing { .. } | StageError::Spawn { .. } => {
                FailureCategory::Environment
            }
        }
    }
}
