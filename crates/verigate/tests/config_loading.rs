//! Integration tests for loading pipeline definitions from disk.

use std::path::{Path, PathBuf};

use verigate::{
    ColorChoice, ConfigError, PipelineDefinition, ResolvedPipeline, StageKind, ToolRequirement,
    TriggerEvent, DEFAULT_CONFIG_FILE,
};

fn write_definition(repo: &Path, source: &str) -> PathBuf {
    let path = repo.join(DEFAULT_CONFIG_FILE);
    std::fs::write(&path, source).unwrap();
    path
}

fn repo_with(projects: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in projects {
        std::fs::create_dir_all(dir.path().join(name)).unwrap();
    }
    dir
}

#[test]
fn test_load_full_definition() {
    let repo = repo_with(&["engine", "cli"]);
    let path = write_definition(
        repo.path(),
        r#"
[pipeline]
name = "chess"
color = "never"
stage_timeout_secs = 900
max_parallel = 1

[trigger]
branch = "trunk"
events = ["push"]

[[project]]
name = "engine"
path = "engine"

[[project]]
name = "cli"
path = "cli"
stages = ["test", "format"]

[stages.test]
command = ["cargo", "nextest", "run"]
probe = ["cargo", "nextest", "--version"]
timeout_secs = 3600

[env]
RUST_BACKTRACE = "1"
"#,
    );

    let pipeline = ResolvedPipeline::load(&path, repo.path()).unwrap();

    assert_eq!(pipeline.name, "chess");
    assert_eq!(pipeline.settings.color, ColorChoice::Never);
    assert_eq!(pipeline.settings.max_parallel, 1);
    assert_eq!(pipeline.settings.env.get("RUST_BACKTRACE").map(String::as_str), Some("1"));

    let trigger = pipeline.trigger.as_ref().unwrap();
    assert!(trigger.matches(TriggerEvent::Push, "trunk"));
    assert!(!trigger.matches(TriggerEvent::PullRequest, "trunk"));

    let engine = &pipeline.projects[0];
    assert_eq!(engine.stage_kinds(), StageKind::ORDERED.to_vec());
    assert_eq!(engine.root, repo.path().join("engine"));
    assert_eq!(engine.stage(StageKind::Build).unwrap().timeout_secs, 900);

    let cli = &pipeline.projects[1];
    assert_eq!(cli.stage_kinds(), vec![StageKind::Format, StageKind::Test]);
    let test = cli.stage(StageKind::Test).unwrap();
    assert_eq!(test.command_line(), "cargo nextest run");
    assert_eq!(test.timeout_secs, 3600);
    assert!(matches!(test.tool, ToolRequirement::Probe { .. }));
}

#[test]
fn test_unknown_stage_in_project_is_rejected() {
    let repo = repo_with(&["engine"]);
    let path = write_definition(
        repo.path(),
        r#"
[[project]]
name = "engine"
path = "engine"
stages = ["format", "bench"]
"#,
    );

    let err = ResolvedPipeline::load(&path, repo.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownStage { ref name, .. } if name == "bench"));
    assert!(err.to_string().contains("project 'engine'"));
}

#[test]
fn test_unknown_stage_override_is_rejected() {
    let repo = repo_with(&[]);
    let path = write_definition(
        repo.path(),
        r#"
[stages.deploy]
command = ["true"]
"#,
    );

    let err = ResolvedPipeline::load(&path, repo.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownStage { ref name, .. } if name == "deploy"));
}

#[test]
fn test_missing_project_path_is_rejected() {
    let repo = repo_with(&["engine"]);
    let path = write_definition(
        repo.path(),
        r#"
[[project]]
name = "engine"
path = "engine"

[[project]]
name = "cli"
path = "cli"
"#,
    );

    let err = ResolvedPipeline::load(&path, repo.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ProjectPathMissing { ref project, .. } if project == "cli"));
}

#[test]
fn test_duplicate_project_is_rejected() {
    let repo = repo_with(&["engine"]);
    let path = write_definition(
        repo.path(),
        r#"
[[project]]
name = "engine"
path = "engine"

[[project]]
name = "engine"
path = "engine"
"#,
    );

    let err = ResolvedPipeline::load(&path, repo.path()).unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateProject(ref name) if name == "engine"));
}

#[test]
fn test_unknown_field_is_rejected() {
    let repo = repo_with(&[]);
    let path = write_definition(
        repo.path(),
        r#"
[pipeline]
colour = "never"
"#,
    );

    let err = ResolvedPipeline::load(&path, repo.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_missing_file_is_read_error() {
    let repo = repo_with(&[]);
    let err =
        ResolvedPipeline::load(&repo.path().join("absent.toml"), repo.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_starter_definition_round_trips_through_disk() {
    let repo = repo_with(&["engine", "cli"]);
    std::fs::write(repo.path().join("engine").join("Cargo.toml"), "").unwrap();
    std::fs::write(repo.path().join("cli").join("Cargo.toml"), "").unwrap();

    let projects = verigate::discover_projects(repo.path()).unwrap();
    let starter = PipelineDefinition::starter(projects);
    let path = write_definition(repo.path(), &starter.to_toml_string().unwrap());

    let loaded = PipelineDefinition::from_path(&path).unwrap();
    assert_eq!(loaded, starter);
    let pipeline = loaded.resolve(repo.path()).unwrap();
    assert_eq!(pipeline.projects.len(), 2);
}

#[test]
fn test_workspace_definition_resolves() {
    let workspace = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(Path::parent)
        .unwrap();
    let pipeline =
        ResolvedPipeline::load(&workspace.join(DEFAULT_CONFIG_FILE), workspace).unwrap();

    let names: Vec<&str> = pipeline.projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["verigate", "verigate-cli"]);
    assert!(pipeline
        .projects
        .iter()
        .all(|p| p.stage_kinds() == StageKind::ORDERED.to_vec()));
}
