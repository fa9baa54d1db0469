//! External tool requirements and the per-invocation tool inventory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::executor::CommandExecutor;

/// An external tool a stage needs in order to run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolRequirement {
    /// Present when the probe command exits 0.
    Probe { name: String, command: Vec<String> },

    /// Present when the program resolves to an executable on `PATH`.
    OnPath { name: String, program: String },
}

impl ToolRequirement {
    pub fn probe(name: &str, command: Vec<String>) -> Self {
        ToolRequirement::Probe {
            name: name.to_string(),
            command,
        }
    }

    pub fn on_path(program: impl Into<String>) -> Self {
        let program = program.into();
        ToolRequirement::OnPath {
            name: program.clone(),
            program,
        }
    }

    /// Human-readable tool name.
    pub fn name(&self) -> &str {
        match self {
            ToolRequirement::Probe { name, .. } | ToolRequirement::OnPath { name, .. } => name,
        }
    }

    /// How the tool is checked, for display.
    pub fn describe(&self) -> String {
        match self {
            ToolRequirement::Probe { command, .. } => command.join(" "),
            ToolRequirement::OnPath { program, .. } if self.project_relative().is_some() => {
                format!("{program} in each project root")
            }
            ToolRequirement::OnPath { program, .. } => format!("{program} on PATH"),
        }
    }

    /// The program, when it is a relative path such as `./ci/lint.sh`.
    ///
    /// Such programs resolve against the project root the stage runs in,
    /// so they cannot be answered by the shared inventory.
    pub fn project_relative(&self) -> Option<&str> {
        match self {
            ToolRequirement::OnPath { program, .. } => {
                let path = Path::new(program);
                (path.is_relative() && path.components().count() > 1).then_some(program.as_str())
            }
            ToolRequirement::Probe { .. } => None,
        }
    }
}

/// Result of probing every required tool once, before any project starts.
///
/// Shared read-only across project runs.
#[derive(Debug, Clone, Default)]
pub struct ToolInventory {
    available: HashMap<ToolRequirement, bool>,
}

impl ToolInventory {
    /// Probe each distinct requirement exactly once.
    pub async fn probe<'a, I>(executor: &dyn CommandExecutor, requirements: I, cwd: &Path) -> Self
    where
        I: IntoIterator<Item = &'a ToolRequirement>,
    {
        let mut available = HashMap::new();
        for requirement in requirements {
            if available.contains_key(requirement) {
                continue;
            }
            if requirement.project_relative().is_some() {
                debug!(tool = %requirement.name(), "Checked per project at stage time");
                continue;
            }
            let present = executor.probe(requirement, cwd).await;
            if present {
                debug!(tool = %requirement.name(), "Tool available");
            } else {
                warn!(tool = %requirement.name(), probe = %requirement.describe(), "Tool not installed");
            }
            available.insert(requirement.clone(), present);
        }
        Self { available }
    }

    /// Build an inventory from known answers.
    pub fn from_entries(entries: impl IntoIterator<Item = (ToolRequirement, bool)>) -> Self {
        Self {
            available: entries.into_iter().collect(),
        }
    }

    /// `Some(true|false)` for probed tools, `None` for tools never probed.
    pub fn is_available(&self, requirement: &ToolRequirement) -> Option<bool> {
        self.available.get(requirement).copied()
    }

    /// Probed tools that are not installed, sorted by name.
    pub fn missing(&self) -> Vec<&ToolRequirement> {
        let mut missing: Vec<_> = self
            .available
            .iter()
            .filter(|(_, present)| !**present)
            .map(|(req, _)| req)
            .collect();
        missing.sort_by(|a, b| a.name().cmp(b.name()));
        missing
    }

    /// Every probed tool with its availability, sorted by name.
    pub fn entries(&self) -> Vec<(&ToolRequirement, bool)> {
        let mut entries: Vec<_> = self.available.iter().map(|(req, p)| (req, *p)).collect();
        entries.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        entries
    }
}

/// Resolve a program name the way a shell would.
///
/// Names containing a path separator are checked as paths; bare names are
/// searched in every `PATH` directory.
pub fn resolve_on_path(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return is_executable(as_path).then(|| as_path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| candidates(&dir, program))
        .find(|candidate| is_executable(candidate))
}

/// Resolve a relative program path inside `dir` to an absolute path.
pub fn resolve_in(dir: &Path, program: &str) -> Option<PathBuf> {
    let candidate = dir.join(program);
    if !is_executable(&candidate) {
        return None;
    }
    candidate.canonicalize().ok()
}

fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    let mut out = vec![dir.join(program)];
    if !std::env::consts::EXE_SUFFIX.is_empty() {
        out.push(dir.join(format!("{program}{}", std::env::consts::EXE_SUFFIX)));
    }
    out
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
