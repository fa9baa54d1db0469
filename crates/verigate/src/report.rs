//! Aggregate report for one pipeline invocation.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{FailureCategory, StageError};
use crate::identity::RunIdentity;
use crate::project::ProjectState;
use crate::runner::RunResult;
use crate::stage::{StageConfig, StageKind};

/// How a stage ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Passed,
    Failed { exit_code: Option<i32> },
    TimedOut { timeout_secs: u64 },
    ToolMissing { tool: String },
    SpawnError { message: String },
    /// Not executed because an earlier stage of the same project failed.
    Skipped,
}

impl StageOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, StageOutcome::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageOutcome::Skipped)
    }

    /// Failure category, `None` for passed and skipped stages.
    pub fn category(&self) -> Option<FailureCategory> {
        match self {
            StageOutcome::Failed { .. } | StageOutcome::TimedOut { .. } => {
                Some(FailureCategory::CodeDefect)
            }
            StageOutcome::ToolMissing { .. } | StageOutcome::SpawnError { .. } => {
                Some(FailureCategory::Environment)
            }
            StageOutcome::Passed | StageOutcome::Skipped => None,
        }
    }

    /// Short human-readable description.
    pub fn describe(&self) -> String {
        match self {
            StageOutcome::Passed => "passed".to_string(),
            StageOutcome::Failed {
                exit_code: Some(code),
            } => format!("exited with code {code}"),
            StageOutcome::Failed { exit_code: None } => "terminated by signal".to_string(),
            StageOutcome::TimedOut { timeout_secs } => format!("timed out after {timeout_secs}s"),
            StageOutcome::ToolMissing { tool } => {
                format!("required tool '{tool}' is not installed")
            }
            StageOutcome::SpawnError { message } => format!("could not start: {message}"),
            StageOutcome::Skipped => "skipped".to_string(),
        }
    }
}

/// One stage of one project, as reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageRecord {
    pub stage: StageKind,
    pub command: String,
    pub outcome: StageOutcome,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub duration_ms: u64,
}

impl StageRecord {
    pub fn passed(result: RunResult) -> Self {
        Self {
            stage: result.stage,
            command: result.command,
            outcome: StageOutcome::Passed,
            stdout: result.stdout,
            stderr: result.stderr,
            duration_ms: result.duration_ms,
        }
    }

    pub fn from_error(error: StageError, config: &StageConfig, duration_ms: u64) -> Self {
        let (outcome, stdout, stderr, duration_ms) = match error {
            StageError::Failure(result) => {
                let result = *result;
                (
                    StageOutcome::Failed {
                        exit_code: result.exit_code,
                    },
                    result.stdout,
                    result.stderr,
                    result.duration_ms,
                )
            }
            StageError::TimedOut { timeout_secs, .. } => (
                StageOutcome::TimedOut { timeout_secs },
                String::new(),
                String::new(),
                duration_ms,
            ),
            StageError::ToolMissing { tool, .. } => (
                StageOutcome::ToolMissing { tool },
                String::new(),
                String::new(),
                duration_ms,
            ),
            StageError::Spawn { message, .. } => (
                StageOutcome::SpawnError { message },
                String::new(),
                String::new(),
                duration_ms,
            ),
        };
        Self {
            stage: config.kind,
            command: config.command_line(),
            outcome,
            stdout,
            stderr,
            duration_ms,
        }
    }

    pub fn skipped(config: &StageConfig) -> Self {
        Self {
            stage: config.kind,
            command: config.command_line(),
            outcome: StageOutcome::Skipped,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    /// Captured stdout and stderr, trimmed and joined.
    pub fn output(&self) -> String {
        [self.stdout.trim_end(), self.stderr.trim_end()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of verifying one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectReport {
    pub name: String,
    pub path: String,
    pub state: ProjectState,
    /// Every selected stage in execution order, including skipped ones.
    pub stages: Vec<StageRecord>,
    pub duration_ms: u64,
}

impl ProjectReport {
    pub fn passed(&self) -> bool {
        self.state == ProjectState::Passed
    }

    /// The stage that failed, if any.
    pub fn failure(&self) -> Option<&StageRecord> {
        self.stages
            .iter()
            .find(|s| !s.outcome.is_passed() && !s.outcome.is_skipped())
    }

    /// Stages that actually ran.
    pub fn executed(&self) -> impl Iterator<Item = &StageRecord> {
        self.stages.iter().filter(|s| !s.outcome.is_skipped())
    }
}

/// A failed `project/stage` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedStage<'a> {
    pub project: &'a str,
    pub record: &'a StageRecord,
}

impl FailedStage<'_> {
    /// `project/stage` label.
    pub fn label(&self) -> String {
        format!("{}/{}", self.project, self.record.stage)
    }
}

/// Combined outcome across all projects and stages of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub identity: RunIdentity,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Projects in definition order.
    pub projects: Vec<ProjectReport>,
    pub success: bool,
}

impl PipelineReport {
    /// Number of projects that passed.
    pub fn passed_count(&self) -> usize {
        self.projects.iter().filter(|p| p.passed()).count()
    }

    /// Number of projects that failed.
    pub fn failed_count(&self) -> usize {
        self.projects.iter().filter(|p| !p.passed()).count()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectReport> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Every failed stage, in project order.
    pub fn failures(&self) -> Vec<FailedStage<'_>> {
        self.projects
            .iter()
            .filter_map(|p| {
                p.failure().map(|record| FailedStage {
                    project: &p.name,
                    record,
                })
            })
            .collect()
    }

    /// Process exit status: 0 only when every project passed.
    pub fn exit_code(&self) -> i32 {
        if self.success {
            0
        } else {
            1
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let content = self.to_json_pretty().map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }

    /// Plain-text summary with captured output of failed stages.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Pipeline: {} (run {})", self.pipeline, self.run_id);
        if let Some(sha) = &self.identity.git_sha {
            let _ = writeln!(out, "Git SHA: {sha}");
        }
        let _ = writeln!(
            out,
            "Status: {}",
            if self.success { "✓ PASSED" } else { "✗ FAILED" }
        );
        let _ = writeln!(out, "Duration: {}ms", self.duration_ms);

        for project in &self.projects {
            let _ = writeln!(out);
            let mark = if project.passed() { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "{} {} ({}) - {}",
                mark,
                project.name,
                project.path,
                project.state
            );
            for stage in &project.stages {
                let status = match &stage.outcome {
                    StageOutcome::Passed => "✓",
                    StageOutcome::Skipped => "-",
                    _ => "✗",
                };
                let _ = writeln!(
                    out,
                    "    {} {:<7} {} ({}ms)",
                    status,
                    stage.stage.name(),
                    stage.outcome.describe(),
                    stage.duration_ms
                );
            }
        }

        let failures = self.failures();
        if !failures.is_empty() {
            let _ = writeln!(out, "\nFailures:");
            for failed in &failures {
                let category = failed
                    .record
                    .outcome
                    .category()
                    .map(|c| c.label())
                    .unwrap_or("failure");
                let _ = writeln!(
                    out,
                    "  - {} [{}]: {}",
                    failed.label(),
                    category,
                    failed.record.outcome.describe()
                );
                let output = failed.record.output();
                if !output.is_empty() {
                    for line in output.lines() {
                        let _ = writeln!(out, "      | {line}");
                    }
                }
            }
        }

        let _ = writeln!(
            out,
            "\nSummary: {}/{} projects passed",
            self.passed_count(),
            self.projects.len()
        );
        out
    }

    /// Markdown summary for pull request comments and check output.
    pub fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "# {} {}\n",
            if self.success { "✅" } else { "❌" },
            self.pipeline
        );
        out.push_str("| Project | ");
        for kind in StageKind::ORDERED {
            let _ = write!(out, "{} | ", kind.name());
        }
        out.push_str("Result |\n|---|");
        for _ in StageKind::ORDERED {
            out.push_str("---|");
        }
        out.push_str("---|\n");

        for project in &self.projects {
            let _ = write!(out, "| `{}` | ", project.name);
            for kind in StageKind::ORDERED {
                let cell = match project.stages.iter().find(|s| s.stage == kind) {
                    None => "n/a",
                    Some(record) => match record.outcome {
                        StageOutcome::Passed => "✅",
                        StageOutcome::Skipped => "⏭",
                        _ => "❌",
                    },
                };
                let _ = write!(out, "{cell} | ");
            }
            let _ = writeln!(out, "{} |", project.state);
        }

        for failed in self.failures() {
            let _ = writeln!(
                out,
                "\n<details><summary><code>{}</code>: {}</summary>\n",
                failed.label(),
                failed.record.outcome.describe()
            );
            let _ = writeln!(out, "```\n{}\n```\n</details>", failed.record.output());
        }
        out
    }
}
