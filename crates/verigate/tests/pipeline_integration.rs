//! Integration tests running real processes against scratch repositories.
#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use verigate::{
    FailureCategory, Gate, Orchestrator, PipelineDefinition, ProcessExecutor, ProjectState,
    ResolvedPipeline, StageKind, StageOutcome,
};

/// Every stage appends its name to `trace.log` in the project root; the
/// format stage fails when an `unformatted` marker file is present.
fn traced_definition(extra: &str) -> String {
    format!(
        r#"
[pipeline]
name = "verify"
color = "never"

[[project]]
name = "engine"
path = "engine"

[[project]]
name = "cli"
path = "cli"

[stages.format]
command = ["sh", "-c", "echo format >> trace.log; test ! -f unformatted"]

[stages.audit]
command = ["sh", "-c", "echo audit >> trace.log"]

[stages.lint]
command = ["sh", "-c", "echo lint >> trace.log"]

[stages.build]
command = ["sh", "-c", "echo build >> trace.log"]

[stages.test]
command = ["sh", "-c", "echo test >> trace.log"]
{extra}
"#
    )
}

fn scratch_repo(projects: &[&str]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for name in projects {
        std::fs::create_dir(dir.path().join(name)).unwrap();
    }
    dir
}

fn resolve(source: &str, repo: &Path) -> ResolvedPipeline {
    PipelineDefinition::from_toml_str(source)
        .unwrap()
        .resolve(repo)
        .unwrap()
}

fn trace(repo: &Path, project: &str) -> Vec<String> {
    std::fs::read_to_string(repo.join(project).join("trace.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

async fn run(pipeline: &ResolvedPipeline) -> verigate::PipelineReport {
    Orchestrator::new(Arc::new(ProcessExecutor), pipeline.settings.clone())
        .run_all(pipeline)
        .await
}

/// Scenario: engine fails format, cli passes every stage.
#[tokio::test]
async fn test_engine_format_failure_does_not_stop_cli() {
    let repo = scratch_repo(&["engine", "cli"]);
    std::fs::write(repo.path().join("engine").join("unformatted"), "").unwrap();
    let pipeline = resolve(&traced_definition(""), repo.path());

    let report = run(&pipeline).await;

    assert!(!report.success);
    assert_eq!(report.exit_code(), 1);

    let engine = report.project("engine").unwrap();
    assert_eq!(engine.state, ProjectState::Failed(StageKind::Format));
    assert_eq!(trace(repo.path(), "engine"), vec!["format"]);
    assert!(engine.stages[1..].iter().all(|s| s.outcome == StageOutcome::Skipped));

    let cli = report.project("cli").unwrap();
    assert_eq!(cli.state, ProjectState::Passed);
    assert_eq!(
        trace(repo.path(), "cli"),
        vec!["format", "audit", "lint", "build", "test"]
    );

    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].label(), "engine/format");

    let verdict = Gate::evaluate(&report);
    assert!(!verdict.passed);
    assert_eq!(verdict.violations[0].category, FailureCategory::CodeDefect);
    assert!(report.render_text().contains("engine/format [code defect]"));
}

#[tokio::test]
async fn test_all_projects_pass() {
    let repo = scratch_repo(&["engine", "cli"]);
    let pipeline = resolve(&traced_definition(""), repo.path());

    let report = run(&pipeline).await;

    assert!(report.success, "{}", report.render_text());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.passed_count(), 2);
    assert!(Gate::evaluate(&report).passed);
}

#[tokio::test]
async fn test_stage_output_is_captured_on_failure() {
    let repo = scratch_repo(&["engine", "cli"]);
    let source = traced_definition("").replace(
        r#"command = ["sh", "-c", "echo build >> trace.log"]"#,
        r#"command = ["sh", "-c", "echo 'error[E0308]: mismatched types' >&2; exit 101"]"#,
    );
    let pipeline = resolve(&source, repo.path());

    let report = run(&pipeline).await;

    let engine = report.project("engine").unwrap();
    assert_eq!(engine.state, ProjectState::Failed(StageKind::Build));
    let failure = engine.failure().unwrap();
    assert_eq!(failure.outcome, StageOutcome::Failed { exit_code: Some(101) });
    assert!(failure.stderr.contains("mismatched types"));
    assert_eq!(trace(repo.path(), "engine"), vec!["format", "audit", "lint"]);
}

/// Scenario: the linter is not installed.
#[tokio::test]
async fn test_missing_linter_is_environment_problem() {
    let repo = scratch_repo(&["engine", "cli"]);
    let source = traced_definition("").replace(
        r#"command = ["sh", "-c", "echo lint >> trace.log"]"#,
        r#"command = ["verigate-test-linter-that-does-not-exist"]"#,
    );
    let pipeline = resolve(&source, repo.path());

    let report = run(&pipeline).await;

    assert!(!report.success);
    for name in ["engine", "cli"] {
        let project = report.project(name).unwrap();
        assert_eq!(project.state, ProjectState::Failed(StageKind::Lint));
        let failure = project.failure().unwrap();
        assert_eq!(
            failure.outcome,
            StageOutcome::ToolMissing {
                tool: "verigate-test-linter-that-does-not-exist".to_string()
            }
        );
        assert_eq!(
            failure.outcome.category(),
            Some(FailureCategory::Environment)
        );
        // Build and test never ran.
        assert_eq!(trace(repo.path(), name), vec!["format", "audit"]);
    }

    let verdict = Gate::evaluate(&report);
    assert_eq!(verdict.environment_problems().count(), 2);
}

#[tokio::test]
async fn test_project_local_lint_script_runs_in_each_project() {
    use std::os::unix::fs::PermissionsExt;

    let repo = scratch_repo(&["engine", "cli"]);
    let script = repo.path().join("engine").join("ci").join("lint.sh");
    std::fs::create_dir(repo.path().join("engine").join("ci")).unwrap();
    std::fs::write(&script, "#!/bin/sh\necho lint >> trace.log\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let source = traced_definition("").replace(
        r#"command = ["sh", "-c", "echo lint >> trace.log"]"#,
        r#"command = ["./ci/lint.sh"]"#,
    );
    let pipeline = resolve(&source, repo.path());

    let report = run(&pipeline).await;

    let engine = report.project("engine").unwrap();
    assert_eq!(engine.state, ProjectState::Passed, "{}", report.render_text());
    assert_eq!(
        trace(repo.path(), "engine"),
        vec!["format", "audit", "lint", "build", "test"]
    );

    // cli has no script of its own.
    let cli = report.project("cli").unwrap();
    assert_eq!(cli.state, ProjectState::Failed(StageKind::Lint));
    assert_eq!(
        cli.failure().unwrap().outcome,
        StageOutcome::ToolMissing {
            tool: "./ci/lint.sh".to_string()
        }
    );
}

#[tokio::test]
async fn test_timeout_kills_stage_and_fails_project() {
    let repo = scratch_repo(&["engine", "cli"]);
    let source = traced_definition("").replace(
        r#"command = ["sh", "-c", "echo audit >> trace.log"]"#,
        "command = [\"sleep\", \"30\"]\ntimeout_secs = 1",
    );
    let mut pipeline = resolve(&source, repo.path());
    pipeline.retain_projects(&["engine".to_string()]).unwrap();

    let started = std::time::Instant::now();
    let report = run(&pipeline).await;

    assert!(started.elapsed() < std::time::Duration::from_secs(20));
    let engine = report.project("engine").unwrap();
    assert_eq!(engine.state, ProjectState::Failed(StageKind::Audit));
    assert_eq!(
        engine.failure().unwrap().outcome,
        StageOutcome::TimedOut { timeout_secs: 1 }
    );
    assert_eq!(trace(repo.path(), "engine"), vec!["format"]);
}

#[tokio::test]
async fn test_color_and_env_reach_every_stage() {
    let repo = scratch_repo(&["engine"]);
    let source = r#"
[pipeline]
color = "always"

[[project]]
name = "engine"
path = "engine"
stages = ["test", "build"]

[stages.build]
command = ["sh", "-c", "echo \"$CARGO_TERM_COLOR $RUSTFLAGS\" > build.env"]

[stages.test]
command = ["sh", "-c", "echo \"$CARGO_TERM_COLOR $RUSTFLAGS\" > test.env"]

[env]
RUSTFLAGS = "-D warnings"
"#;
    let pipeline = resolve(source, repo.path());

    let report = run(&pipeline).await;

    assert!(report.success, "{}", report.render_text());
    let engine = report.project("engine").unwrap();
    let stages: Vec<StageKind> = engine.stages.iter().map(|s| s.stage).collect();
    assert_eq!(stages, vec![StageKind::Build, StageKind::Test]);
    for file in ["build.env", "test.env"] {
        let content = std::fs::read_to_string(repo.path().join("engine").join(file)).unwrap();
        assert_eq!(content.trim(), "always -D warnings");
    }
}

#[tokio::test]
async fn test_repeated_runs_are_deterministic() {
    let repo = scratch_repo(&["engine", "cli"]);
    std::fs::write(repo.path().join("cli").join("unformatted"), "").unwrap();
    let pipeline = resolve(&traced_definition(""), repo.path());

    let first = run(&pipeline).await;
    let second = run(&pipeline).await;

    let outcomes = |report: &verigate::PipelineReport| {
        report
            .projects
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    p.state,
                    p.stages.iter().map(|s| s.outcome.clone()).collect::<Vec<_>>(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(outcomes(&first), outcomes(&second));
    assert_eq!(
        first.identity.definition_digest,
        second.identity.definition_digest
    );
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_unified_mode_verifies_repository_root() {
    let repo = tempfile::tempdir().unwrap();
    let source = r#"
[stages.format]
command = ["sh", "-c", "echo format >> trace.log"]

[stages.audit]
command = ["true"]

[stages.lint]
command = ["true"]

[stages.build]
command = ["true"]

[stages.test]
command = ["true"]
"#;
    let pipeline = resolve(source, repo.path());

    let report = run(&pipeline).await;

    assert!(report.success, "{}", report.render_text());
    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].name, verigate::UNIFIED_PROJECT_NAME);
    assert!(repo.path().join("trace.log").is_file());
}
