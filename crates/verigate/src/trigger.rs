//! Events that start a pipeline run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What triggered an invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerEvent {
    /// A push to the mainline branch.
    Push,
    /// A pull request targeting the mainline branch.
    PullRequest,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Push => "push",
            TriggerEvent::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown trigger event '{0}' (expected push or pull_request)")]
pub struct ParseTriggerError(String);

impl FromStr for TriggerEvent {
    type Err = ParseTriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "push" => Ok(TriggerEvent::Push),
            "pull_request" | "pr" => Ok(TriggerEvent::PullRequest),
            _ => Err(ParseTriggerError(s.to_string())),
        }
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_events() -> Vec<TriggerEvent> {
    vec![TriggerEvent::Push, TriggerEvent::PullRequest]
}

/// The `[trigger]` table: which events on which branch run the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trigger {
    /// Mainline branch. Pushes must land on it; pull requests must target it.
    #[serde(default = "default_branch")]
    pub branch: String,

    #[serde(default = "default_events")]
    pub events: Vec<TriggerEvent>,
}

impl Default for Trigger {
    fn default() -> Self {
        Self {
            branch: default_branch(),
            events: default_events(),
        }
    }
}

impl Trigger {
    /// Whether `event` on `branch` should run the pipeline.
    ///
    /// `branch` may be a full ref (`refs/heads/main`).
    pub fn matches(&self, event: TriggerEvent, branch: &str) -> bool {
        let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
        self.events.contains(&event) && branch == self.branch
    }
}
