//! Pipeline definition loading and resolution.
//!
//! A definition is a TOML document (default `verigate.toml`) with one
//! shared stage table applied over a list of projects:
//!
//! ```toml
//! [pipeline]
//! name = "verify"
//! color = "always"
//!
//! [trigger]
//! branch = "main"
//!
//! [[project]]
//! name = "engine"
//! path = "engine"
//!
//! [[project]]
//! name = "cli"
//! path = "cli"
//!
//! [stages.audit]
//! timeout_secs = 600
//! ```
//!
//! [`PipelineDefinition::resolve`] turns it into a [`ResolvedPipeline`]
//! against a repository root, validating every project path and stage name.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::identity::definition_digest;
use crate::project::Project;
use crate::stage::{StageConfig, StageKind, DEFAULT_STAGE_TIMEOUT_SECS};
use crate::tools::ToolRequirement;
use crate::trigger::Trigger;

/// Default definition file name at the repository root.
pub const DEFAULT_CONFIG_FILE: &str = "verigate.toml";

/// Name of the single project verified when the definition lists none.
pub const UNIFIED_PROJECT_NAME: &str = "workspace";

/// Colour toggle propagated to every stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorChoice::Auto => "auto",
            ColorChoice::Always => "always",
            ColorChoice::Never => "never",
        }
    }

    /// Whether log output on stderr should carry ANSI escapes.
    pub fn use_ansi(&self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => std::io::stderr().is_terminal(),
        }
    }
}

impl fmt::Display for ColorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown color choice '{0}' (expected auto, always or never)")]
pub struct ParseColorError(String);

impl FromStr for ColorChoice {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" => Ok(ColorChoice::Always),
            "never" => Ok(ColorChoice::Never),
            _ => Err(ParseColorError(s.to_string())),
        }
    }
}

/// Invocation-wide settings passed explicitly to every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSettings {
    /// Colour toggle, exported to stages as `CARGO_TERM_COLOR`.
    pub color: ColorChoice,

    /// Maximum projects verified at once (0 = no limit).
    pub max_parallel: usize,

    /// Extra environment for every stage.
    pub env: BTreeMap<String, String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            color: ColorChoice::Auto,
            max_parallel: 0,
            env: BTreeMap::new(),
        }
    }
}

impl RunSettings {
    /// Environment layered over the inherited one for each stage process.
    pub fn stage_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        env.insert(
            "CARGO_TERM_COLOR".to_string(),
            self.color.as_str().to_string(),
        );
        env
    }
}

fn default_pipeline_name() -> String {
    "verify".to_string()
}

fn default_stage_timeout() -> u64 {
    DEFAULT_STAGE_TIMEOUT_SECS
}

/// The `[pipeline]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_name")]
    pub name: String,

    #[serde(default)]
    pub color: ColorChoice,

    /// Default timeout for every stage (0 disables).
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Maximum projects verified at once (0 = no limit).
    #[serde(default)]
    pub max_parallel: usize,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            name: default_pipeline_name(),
            color: ColorChoice::Auto,
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
            max_parallel: 0,
        }
    }
}

/// One `[[project]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectEntry {
    pub name: String,

    /// Root directory relative to the repository root.
    pub path: PathBuf,

    /// Stage subset; all five stages when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<String>>,
}

/// One `[stages.<name>]` override, shared by every project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,

    /// Command that must exit 0 for the stage's tool to count as installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// The declarative pipeline definition as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,

    #[serde(default, rename = "project", skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectEntry>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stages: BTreeMap<String, StageOverride>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl PipelineDefinition {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded pipeline definition");
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// A starter definition verifying the given projects with every stage.
    pub fn starter(projects: Vec<ProjectEntry>) -> Self {
        Self {
            trigger: Some(Trigger::default()),
            projects,
            ..Self::default()
        }
    }

    /// The shared stage table: builtin stages with overrides applied.
    fn stage_table(&self) -> Result<BTreeMap<StageKind, StageConfig>, ConfigError> {
        let timeout = self.pipeline.stage_timeout_secs;
        let mut table: BTreeMap<StageKind, StageConfig> = StageKind::ORDERED
            .into_iter()
            .map(|kind| (kind, StageConfig::from_builtin(kind, timeout)))
            .collect();

        let mut overridden = HashSet::new();
        for (name, stage_override) in &self.stages {
            let kind: StageKind = name.parse().map_err(|_| ConfigError::UnknownStage {
                location: "[stages] table".to_string(),
                name: name.clone(),
            })?;
            // `lint` and `LINT` name the same stage.
            if !overridden.insert(kind) {
                return Err(ConfigError::DuplicateStageOverride { stage: kind });
            }

            let mut config = match &stage_override.command {
                Some(command) if command.is_empty() || command[0].is_empty() => {
                    return Err(ConfigError::EmptyCommand {
                        stage: kind,
                        field: "command",
                    })
                }
                Some(command) => StageConfig::custom(kind, command.clone(), timeout),
                None => StageConfig::from_builtin(kind, timeout),
            };

            if let Some(probe) = &stage_override.probe {
                if probe.is_empty() || probe[0].is_empty() {
                    return Err(ConfigError::EmptyCommand {
                        stage: kind,
                        field: "probe",
                    });
                }
                config = config.with_probe(probe.clone());
            }

            if let Some(secs) = stage_override.timeout_secs {
                config.timeout_secs = secs;
            }

            table.insert(kind, config);
        }

        Ok(table)
    }

    /// Resolve the definition against a repository checkout.
    pub fn resolve(&self, repo_root: &Path) -> Result<ResolvedPipeline, ConfigError> {
        if !repo_root.is_dir() {
            return Err(ConfigError::RepoRoot(repo_root.to_path_buf()));
        }

        let table = self.stage_table()?;
        let projects = if self.projects.is_empty() {
            vec![Project::new(
                UNIFIED_PROJECT_NAME,
                PathBuf::from("."),
                repo_root.to_path_buf(),
                table.values().cloned().collect(),
            )]
        } else {
            let mut seen = HashSet::new();
            let mut projects = Vec::with_capacity(self.projects.len());
            for entry in &self.projects {
                if !seen.insert(entry.name.as_str()) {
                    return Err(ConfigError::DuplicateProject(entry.name.clone()));
                }
                projects.push(resolve_project(entry, repo_root, &table)?);
            }
            projects
        };

        Ok(ResolvedPipeline {
            name: self.pipeline.name.clone(),
            repo_root: repo_root.to_path_buf(),
            projects,
            settings: RunSettings {
                color: self.pipeline.color,
                max_parallel: self.pipeline.max_parallel,
                env: self.env.clone(),
            },
            trigger: self.trigger.clone(),
        })
    }
}

fn resolve_project(
    entry: &ProjectEntry,
    repo_root: &Path,
    table: &BTreeMap<StageKind, StageConfig>,
) -> Result<Project, ConfigError> {
    if entry.name.trim().is_empty() {
        return Err(ConfigError::EmptyProjectName);
    }
    if entry.path.is_absolute() {
        return Err(ConfigError::AbsoluteProjectPath {
            project: entry.name.clone(),
            path: entry.path.clone(),
        });
    }

    let root = repo_root.join(&entry.path);
    if !root.exists() {
        return Err(ConfigError::ProjectPathMissing {
            project: entry.name.clone(),
            path: root,
        });
    }
    if !root.is_dir() {
        return Err(ConfigError::ProjectPathNotDirectory {
            project: entry.name.clone(),
            path: root,
        });
    }

    let kinds = match &entry.stages {
        None => StageKind::ORDERED.to_vec(),
        Some(names) => {
            let mut kinds = Vec::with_capacity(names.len());
            for name in names {
                let kind: StageKind = name.parse().map_err(|_| ConfigError::UnknownStage {
                    location: format!("project '{}'", entry.name),
                    name: name.clone(),
                })?;
                if kinds.contains(&kind) {
                    return Err(ConfigError::DuplicateStage {
                        project: entry.name.clone(),
                        stage: kind,
                    });
                }
                kinds.push(kind);
            }
            kinds
        }
    };
    if kinds.is_empty() {
        return Err(ConfigError::NoStages {
            project: entry.name.clone(),
        });
    }

    let stages = kinds
        .into_iter()
        .filter_map(|kind| table.get(&kind).cloned())
        .collect();
    Ok(Project::new(
        entry.name.clone(),
        entry.path.clone(),
        root,
        stages,
    ))
}

/// A validated pipeline bound to a repository checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPipeline {
    pub name: String,
    pub repo_root: PathBuf,
    pub projects: Vec<Project>,
    pub settings: RunSettings,
    pub trigger: Option<Trigger>,
}

impl ResolvedPipeline {
    /// Load, parse and resolve a definition file.
    pub fn load(config_path: &Path, repo_root: &Path) -> Result<Self, ConfigError> {
        PipelineDefinition::from_path(config_path)?.resolve(repo_root)
    }

    /// SHA-256 over the ordered project/stage plan.
    pub fn digest(&self) -> String {
        definition_digest(&self.projects)
    }

    /// Every distinct tool requirement, in first-use order.
    pub fn tool_requirements(&self) -> Vec<&ToolRequirement> {
        let mut seen = HashSet::new();
        self.projects
            .iter()
            .flat_map(|p| p.stages.iter().map(|s| &s.tool))
            .filter(|tool| seen.insert(*tool))
            .collect()
    }

    /// Keep only the named projects.
    pub fn retain_projects(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if !self.projects.iter().any(|p| &p.name == name) {
                return Err(ConfigError::UnknownProjectFilter(name.clone()));
            }
        }
        self.projects.retain(|p| names.contains(&p.name));
        Ok(())
    }

    /// Override the timeout of every stage in every project.
    pub fn override_timeout(&mut self, secs: u64) {
        for stage in self.projects.iter_mut().flat_map(|p| p.stages.iter_mut()) {
            stage.timeout_secs = secs;
        }
    }
}

/// Immediate sub-directories of `repo_root` that contain a `Cargo.toml`,
/// as project entries sorted by name.
pub fn discover_projects(repo_root: &Path) -> std::io::Result<Vec<ProjectEntry>> {
    let mut entries = Vec::new();
    for dir_entry in std::fs::read_dir(repo_root)? {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        let name = dir_entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "target" || !path.is_dir() {
            continue;
        }
        if path.join("Cargo.toml").is_file() {
            entries.push(ProjectEntry {
                name: name.clone(),
                path: PathBuf::from(name),
                stages: None,
            });
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}
