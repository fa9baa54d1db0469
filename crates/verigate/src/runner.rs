//! Single-stage execution against one project.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RunSettings;
use crate::error::{ExecError, StageError};
use crate::executor::{CommandExecutor, Invocation};
use crate::project::Project;
use crate::stage::{StageConfig, StageKind};
use crate::tools::{resolve_in, ToolInventory};

/// Result of a stage whose tool ran to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunResult {
    /// Project name.
    pub project: String,

    /// Stage that ran.
    pub stage: StageKind,

    /// Command line that was executed.
    pub command: String,

    /// Exit code (`None` if terminated by a signal).
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl RunResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn exit_label(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exited with code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs stages inside a project's root directory.
#[derive(Clone)]
pub struct StageRunner {
    executor: Arc<dyn CommandExecutor>,
    inventory: Arc<ToolInventory>,
    settings: Arc<RunSettings>,
}

impl StageRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        inventory: Arc<ToolInventory>,
        settings: Arc<RunSettings>,
    ) -> Self {
        Self {
            executor,
            inventory,
            settings,
        }
    }

    /// Execute a single stage and return the result.
    ///
    /// A non-zero exit is returned as [`StageError::Failure`] carrying the
    /// captured output. A tool that the inventory marked missing, a relative
    /// program absent from the project root, or a program the OS cannot
    /// find at spawn time is [`StageError::ToolMissing`].
    pub async fn run_stage(
        &self,
        project: &Project,
        stage: &StageConfig,
    ) -> Result<RunResult, StageError> {
        // Relative programs resolve in the project root and spawn by absolute path.
        let resolved = match stage.tool.project_relative() {
            Some(program) => match resolve_in(&project.root, program) {
                Some(path) => Some(path),
                None => return Err(self.tool_missing(project, stage)),
            },
            None if self.inventory.is_available(&stage.tool) == Some(false) => {
                return Err(self.tool_missing(project, stage));
            }
            None => None,
        };

        let mut invocation = Invocation::from_command(&stage.command, &project.root)
            .map_err(|e| self.exec_error(project, stage, e))?
            .with_env(self.settings.stage_env())
            .with_timeout_secs(stage.timeout_secs);
        if let Some(path) = resolved {
            invocation.program = path.to_string_lossy().to_string();
        }

        debug!(
            project = %project.name,
            stage = %stage.kind,
            command = %invocation.command_line(),
            cwd = %project.root.display(),
            "Spawning stage"
        );

        let output = self
            .executor
            .execute(&invocation)
            .await
            .map_err(|e| self.exec_error(project, stage, e))?;

        let result = RunResult {
            project: project.name.clone(),
            stage: stage.kind,
            command: stage.command_line(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration_ms,
        };

        if result.passed() {
            info!(project = %project.name, stage = %stage.kind, duration_ms = result.duration_ms, "Stage passed");
            Ok(result)
        } else {
            info!(project = %project.name, stage = %stage.kind, exit = %result.exit_label(), "Stage failed");
            Err(StageError::Failure(Box::new(result)))
        }
    }

    fn tool_missing(&self, project: &Project, stage: &StageConfig) -> StageError {
        warn!(project = %project.name, stage = %stage.kind, tool = %stage.tool.name(), "Required tool missing");
        StageError::ToolMissing {
            project: project.name.clone(),
            stage: stage.kind,
            tool: stage.tool.name().to_string(),
        }
    }

    fn exec_error(&self, project: &Project, stage: &StageConfig, err: ExecError) -> StageError {
        match err {
            ExecError::NotFound { program } => StageError::ToolMissing {
                project: project.name.clone(),
                stage: stage.kind,
                tool: program,
            },
            ExecError::TimedOut { timeout, .. } => StageError::TimedOut {
                project: project.name.clone(),
                stage: stage.kind,
                timeout_secs: timeout.as_secs(),
            },
            ExecError::Spawn { program, source } => StageError::Spawn {
                project: project.name.clone(),
                stage: stage.kind,
                program,
                message: source.to_string(),
            },
            ExecError::EmptyCommand => StageError::Spawn {
                project: project.name.clone(),
                stage: stage.kind,
                program: String::new(),
                message: "stage has an empty command".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ProcessExecutor;
    use std::path::PathBuf;

    fn project_at(root: PathBuf, stages: Vec<StageConfig>) -> Project {
        Project::new("engine", PathBuf::from("engine"), root, stages)
    }

    fn runner(inventory: ToolInventory, settings: RunSettings) -> StageRunner {
        StageRunner::new(
            Arc::new(ProcessExecutor),
            Arc::new(inventory),
            Arc::new(settings),
        )
    }

    fn sh(kind: StageKind, script: &str) -> StageConfig {
        StageConfig::custom(
            kind,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            60,
        )
    }

    #[test]
    fn test_run_result_passed() {
        let result = RunResult {
            project: "engine".to_string(),
            stage: StageKind::Format,
            command: "cargo fmt".to_string(),
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 100,
        };
        assert!(result.passed());

        let failed = RunResult {
            exit_code: Some(1),
            ..result.clone()
        };
        assert!(!failed.passed());
        assert_eq!(failed.exit_label(), "exited with code 1");

        let killed = RunResult {
            exit_code: None,
            ..result
        };
        assert!(!killed.passed());
        assert_eq!(killed.exit_label(), "terminated by signal");
    }

    #[tokio::test]
    async fn test_run_stage_success_captures_output() {
        let dir = tempfile::tempdir().unwrap();
        let stage = sh(StageKind::Build, "echo compiled");
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);

        let result = runner(ToolInventory::default(), RunSettings::default())
            .run_stage(&project, &stage)
            .await
            .expect("stage should pass");
        assert_eq!(result.stage, StageKind::Build);
        assert!(result.stdout.contains("compiled"));
    }

    #[tokio::test]
    async fn test_run_stage_failure_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let stage = sh(StageKind::Format, "echo 'Diff in lib.rs' >&2; exit 1");
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);

        let err = runner(ToolInventory::default(), RunSettings::default())
            .run_stage(&project, &stage)
            .await
            .unwrap_err();
        match err {
            StageError::Failure(result) => {
                assert_eq!(result.exit_code, Some(1));
                assert!(result.stderr.contains("Diff in lib.rs"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_stage_tool_missing_from_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let stage = StageConfig::from_builtin(StageKind::Lint, 60);
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);
        let inventory = ToolInventory::from_entries([(stage.tool.clone(), false)]);

        let err = runner(inventory, RunSettings::default())
            .run_stage(&project, &stage)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ToolMissing { ref tool, .. } if tool == "clippy"));
    }

    #[tokio::test]
    async fn test_run_stage_unprobed_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let stage = StageConfig::custom(
            StageKind::Audit,
            vec!["verigate-no-such-auditor".to_string()],
            60,
        );
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);

        let err = runner(ToolInventory::default(), RunSettings::default())
            .run_stage(&project, &stage)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ToolMissing { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_stage_resolves_relative_program_in_project_root() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ci").join("lint.sh");
        std::fs::create_dir(dir.path().join("ci")).unwrap();
        std::fs::write(&script, "#!/bin/sh\necho linted\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let stage = StageConfig::custom(StageKind::Lint, vec!["./ci/lint.sh".to_string()], 60);
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);
        let inventory =
            ToolInventory::probe(&ProcessExecutor, [&stage.tool], std::path::Path::new("/")).await;

        let result = runner(inventory, RunSettings::default())
            .run_stage(&project, &stage)
            .await
            .expect("script inside the project root should run");
        assert!(result.stdout.contains("linted"));
        assert_eq!(result.command, "./ci/lint.sh");
    }

    #[tokio::test]
    async fn test_run_stage_relative_program_missing_from_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let stage = StageConfig::custom(StageKind::Lint, vec!["./ci/lint.sh".to_string()], 60);
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);

        let err = runner(ToolInventory::default(), RunSettings::default())
            .run_stage(&project, &stage)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::ToolMissing { ref tool, .. } if tool == "./ci/lint.sh"));
    }

    #[tokio::test]
    async fn test_run_stage_propagates_color() {
        let dir = tempfile::tempdir().unwrap();
        let stage = sh(StageKind::Test, "echo color=$CARGO_TERM_COLOR");
        let project = project_at(dir.path().to_path_buf(), vec![stage.clone()]);
        let settings = RunSettings {
            color: crate::config::ColorChoice::Never,
            ..RunSettings::default()
        };

        let result = runner(ToolInventory::default(), settings)
            .run_stage(&project, &stage)
            .await
            .unwrap();
        assert!(result.stdout.contains("color=never"));
    }
}
