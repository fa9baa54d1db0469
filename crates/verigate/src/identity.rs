//! Run identity: definition digest and repository state.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::executor::PROBE_TIMEOUT;
use crate::project::Project;

/// Identity of one pipeline invocation.
///
/// Two invocations with the same identity verify the same plan against the
/// same source tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunIdentity {
    /// Repository root path.
    pub repo_root: PathBuf,

    /// SHA-256 digest of the ordered project/stage plan.
    pub definition_digest: String,

    /// Git commit SHA of the checkout, when it is a git repository.
    pub git_sha: Option<String>,

    /// `rustc --version` output, when rustc is installed.
    pub toolchain: Option<String>,
}

impl RunIdentity {
    /// Capture identity for `projects` checked out at `repo_root`.
    pub async fn capture(repo_root: &Path, projects: &[Project]) -> Self {
        let (git_sha, toolchain) =
            tokio::join!(capture_head_sha(repo_root), capture_toolchain(repo_root));
        Self {
            repo_root: repo_root.to_path_buf(),
            definition_digest: definition_digest(projects),
            git_sha,
            toolchain,
        }
    }
}

/// Compute deterministic digest of the project/stage plan.
///
/// Covers project names, paths, and each stage's kind, command and
/// timeout, in execution order.
pub fn definition_digest(projects: &[Project]) -> String {
    let mut hasher = Sha256::new();
    for project in projects {
        hasher.update(project.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(project.path.to_string_lossy().as_bytes());
        hasher.update(b"\0");
        for stage in &project.stages {
            hasher.update(stage.kind.name().as_bytes());
            hasher.update(b"\0");
            for arg in &stage.command {
                hasher.update(arg.as_bytes());
                hasher.update(b"\x1f");
            }
            hasher.update(stage.timeout_secs.to_le_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\x1e");
    }
    hex::encode(hasher.finalize())
}

/// HEAD commit SHA of the repository containing `repo_dir`.
pub async fn capture_head_sha(repo_dir: &Path) -> Option<String> {
    let mut command = Command::new("git");
    command.args(["rev-parse", "HEAD"]);
    command_stdout(command, repo_dir).await
}

/// `rustc --version` as seen from `repo_dir`.
///
/// Never lets rustup install a pinned toolchain just to answer.
async fn capture_toolchain(repo_dir: &Path) -> Option<String> {
    let mut command = Command::new("rustc");
    command.arg("--version").env("RUSTUP_AUTO_INSTALL", "0");
    command_stdout(command, repo_dir).await
}

/// Trimmed stdout of a short informational command, `None` on any failure.
async fn command_stdout(mut command: Command, dir: &Path) -> Option<String> {
    let program = command.as_std().get_program().to_string_lossy().to_string();
    command
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(program = %program, error = %e, "Identity command failed to start");
            return None;
        }
        Err(_) => {
            debug!(program = %program, "Identity command timed out");
            return None;
        }
    };

    if !output.status.success() {
        debug!(
            program = %program,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "Identity command failed"
        );
        return None;
    }

    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}
