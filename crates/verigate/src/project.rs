//! Projects and the per-project verification state machine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::stage::{StageConfig, StageKind};

/// A named, independently buildable unit of the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project name (unique within a pipeline).
    pub name: String,

    /// Path as written in the definition, relative to the repository root.
    pub path: PathBuf,

    /// Resolved root directory every stage runs in.
    pub root: PathBuf,

    /// Selected stages, always in execution order.
    pub stages: Vec<StageConfig>,
}

impl Project {
    /// Create a project. Stages are sorted into execution order and
    /// deduplicated by kind (first occurrence wins).
    pub fn new(
        name: impl Into<String>,
        path: PathBuf,
        root: PathBuf,
        mut stages: Vec<StageConfig>,
    ) -> Self {
        stages.sort_by_key(|s| s.kind);
        stages.dedup_by_key(|s| s.kind);
        Self {
            name: name.into(),
            path,
            root,
            stages,
        }
    }

    pub fn stage(&self, kind: StageKind) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    pub fn stage_kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(|s| s.kind).collect()
    }
}

/// Where a project is in its verification run.
///
/// `Pending → Formatting → Auditing → Linting → Building → Testing →
/// {Passed | Failed(stage)}`. Unselected stages are passed through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum ProjectState {
    Pending,
    Formatting,
    Auditing,
    Linting,
    Building,
    Testing,
    Passed,
    Failed(StageKind),
}

impl ProjectState {
    /// The running state for a stage.
    pub fn running(stage: StageKind) -> Self {
        match stage {
            StageKind::Format => ProjectState::Formatting,
            StageKind::Audit => ProjectState::Auditing,
            StageKind::Lint => ProjectState::Linting,
            StageKind::Build => ProjectState::Building,
            StageKind::Test => ProjectState::Testing,
        }
    }

    /// Stage currently executing, if any.
    pub fn current_stage(&self) -> Option<StageKind> {
        match self {
            ProjectState::Formatting => Some(StageKind::Format),
            ProjectState::Auditing => Some(StageKind::Audit),
            ProjectState::Linting => Some(StageKind::Lint),
            ProjectState::Building => Some(StageKind::Build),
            ProjectState::Testing => Some(StageKind::Test),
            ProjectState::Pending | ProjectState::Passed | ProjectState::Failed(_) => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectState::Passed | ProjectState::Failed(_))
    }

    pub fn failed_stage(&self) -> Option<StageKind> {
        match self {
            ProjectState::Failed(stage) => Some(*stage),
            _ => None,
        }
    }

    /// Move into `stage`. Returns `None` when the move would run a stage out
    /// of order or leave a terminal state.
    pub fn enter(self, stage: StageKind) -> Option<Self> {
        match self {
            ProjectState::Pending => Some(Self::running(stage)),
            _ if self.is_terminal() => None,
            _ => match self.current_stage() {
                Some(current) if stage > current => Some(Self::running(stage)),
                _ => None,
            },
        }
    }

    /// Fail the stage currently executing.
    pub fn fail(self) -> Option<Self> {
        self.current_stage().map(ProjectState::Failed)
    }

    /// Finish a run in which every selected stage passed.
    pub fn finish(self) -> Option<Self> {
        match self {
            ProjectState::Pending => Some(ProjectState::Passed),
            _ => self.current_stage().map(|_| ProjectState::Passed),
        }
    }
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectState::Pending => f.write_str("pending"),
            ProjectState::Formatting => f.write_str("formatting"),
            ProjectState::Auditing => f.write_str("auditing"),
            ProjectState::Linting => f.write_str("linting"),
            ProjectState::Building => f.write_str("building"),
            ProjectState::Testing => f.write_str("testing"),
            ProjectState::Passed => f.write_str("passed"),
            ProjectState::Failed(stage) => write!(f, "failed at {stage}"),
        }
    }
}
