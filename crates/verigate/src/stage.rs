//! Verification stage definitions and configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseStageError;
use crate::tools::ToolRequirement;

/// Default per-stage timeout in seconds (30 minutes).
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1_800;

/// The five verification stages, declared in execution order.
///
/// `Ord` follows declaration order, so sorting a set of stages yields the
/// order in which they run.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// cargo fmt --all -- --check
    Format,

    /// cargo audit
    Audit,

    /// cargo clippy --all-targets -- -D warnings
    Lint,

    /// cargo build --verbose
    Build,

    /// cargo test --verbose
    Test,
}

impl StageKind {
    /// Every stage in execution order.
    pub const ORDERED: [StageKind; 5] = [
        StageKind::Format,
        StageKind::Audit,
        StageKind::Lint,
        StageKind::Build,
        StageKind::Test,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Format => "format",
            StageKind::Audit => "audit",
            StageKind::Lint => "lint",
            StageKind::Build => "build",
            StageKind::Test => "test",
        }
    }

    /// Get the stage's default command.
    pub fn command(&self) -> Vec<String> {
        let argv: &[&str] = match self {
            StageKind::Format => &["cargo", "fmt", "--all", "--", "--check"],
            StageKind::Audit => &["cargo", "audit"],
            StageKind::Lint => &["cargo", "clippy", "--all-targets", "--", "-D", "warnings"],
            StageKind::Build => &["cargo", "build", "--verbose"],
            StageKind::Test => &["cargo", "test", "--verbose"],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }

    /// Get the external tool the default command depends on.
    ///
    /// `cargo fmt`, `cargo audit` and `cargo clippy` are separately
    /// installed cargo components, so each is probed through its own
    /// `--version` flag.
    pub fn tool(&self) -> ToolRequirement {
        let (name, probe): (&str, &[&str]) = match self {
            StageKind::Format => ("rustfmt", &["cargo", "fmt", "--version"]),
            StageKind::Audit => ("cargo-audit", &["cargo", "audit", "--version"]),
            StageKind::Lint => ("clippy", &["cargo", "clippy", "--version"]),
            StageKind::Build | StageKind::Test => ("cargo", &["cargo", "--version"]),
        };
        ToolRequirement::probe(name, probe.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ORDERED
            .into_iter()
            .find(|kind| kind.name() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ParseStageError(s.to_string()))
    }
}

/// Configuration for a verification stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Which stage this is.
    pub kind: StageKind,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Tool that must be installed for the command to run.
    pub tool: ToolRequirement,

    /// Timeout in seconds (0 disables the timeout).
    pub timeout_secs: u64,
}

impl StageConfig {
    /// Create a stage configuration with the builtin command.
    pub fn from_builtin(kind: StageKind, timeout_secs: u64) -> Self {
        Self {
            kind,
            command: kind.command(),
            tool: kind.tool(),
            timeout_secs,
        }
    }

    /// Create a stage configuration with a custom command.
    ///
    /// The tool requirement becomes the command's executable.
    pub fn custom(kind: StageKind, command: Vec<String>, timeout_secs: u64) -> Self {
        let program = command.first().cloned().unwrap_or_default();
        Self {
            kind,
            command,
            tool: ToolRequirement::on_path(program),
            timeout_secs,
        }
    }

    /// Replace the tool requirement with an explicit probe command.
    pub fn with_probe(mut self, probe: Vec<String>) -> Self {
        let name = self.tool.name().to_string();
        self.tool = ToolRequirement::probe(&name, probe);
        self
    }

    /// The command as a single display string.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}
