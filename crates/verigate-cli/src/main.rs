//! verigate - build-verification pipeline CLI
//!
//! ## Commands
//!
//! - `run`: verify every project (format, audit, lint, build, test)
//! - `check`: validate the pipeline definition and print the plan
//! - `tools`: probe the external tools the pipeline needs
//! - `init`: write a starter `verigate.toml`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};

use verigate::{
    discover_projects, ColorChoice, Gate, Orchestrator, PipelineDefinition, PipelineEvent,
    PipelineReport, ProcessExecutor, ResolvedPipeline, TriggerEvent,
    DEFAULT_CONFIG_FILE,
};

/// Exit status when stages ran and a project failed, or the report could
/// not be written afterwards.
const EXIT_FAILURE: u8 = 1;

/// Exit status when the definition could not be loaded and nothing ran.
const EXIT_CONFIG_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "verigate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-verification pipeline: format, audit, lint, build, test")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where to find the definition and the checkout it applies to.
#[derive(clap::Args, Debug, Clone)]
struct Location {
    /// Pipeline definition (default: <repo>/verigate.toml)
    #[arg(short, long, env = "VERIGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Repository root
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the verification pipeline
    Run {
        #[command(flatten)]
        location: Location,

        /// Only verify these projects (repeatable)
        #[arg(short, long = "project")]
        projects: Vec<String>,

        /// Colour toggle passed to every stage
        #[arg(long, env = "VERIGATE_COLOR")]
        color: Option<ColorChoice>,

        /// Per-stage timeout in seconds for every stage (0 disables)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Maximum projects verified at once (0 = no limit)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Event that triggered this run (push, pull_request)
        #[arg(long, env = "VERIGATE_EVENT")]
        event: Option<TriggerEvent>,

        /// Branch the event refers to (default: the trigger's mainline)
        #[arg(long, env = "VERIGATE_BRANCH")]
        branch: Option<String>,

        /// Also write the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Report format on stdout
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Validate the pipeline definition and print the plan
    Check {
        #[command(flatten)]
        location: Location,
    },

    /// Probe the tools every stage needs
    Tools {
        #[command(flatten)]
        location: Location,
    },

    /// Write a starter verigate.toml
    Init {
        /// Repository root
        #[arg(short, long, default_value = ".")]
        repo: PathBuf,

        /// Overwrite an existing definition
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    verigate::init_tracing(cli.json, level, log_color(&cli.command).use_ansi());

    let result = match cli.command {
        Commands::Run {
            location,
            projects,
            color,
            timeout_secs,
            max_parallel,
            event,
            branch,
            report,
            format,
        } => {
            let options = RunOptions {
                projects,
                color,
                timeout_secs,
                max_parallel,
                event,
                branch,
                report,
                format,
            };
            cmd_run(&location, options).await
        }
        Commands::Check { location } => cmd_check(&location),
        Commands::Tools { location } => cmd_tools(&location).await,
        Commands::Init { repo, force } => cmd_init(&repo, force),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

struct RunOptions {
    projects: Vec<String>,
    color: Option<ColorChoice>,
    timeout_secs: Option<u64>,
    max_parallel: Option<usize>,
    event: Option<TriggerEvent>,
    branch: Option<String>,
    report: Option<PathBuf>,
    format: ReportFormat,
}

/// The definition file to load: `--config`, else `<repo>/verigate.toml`
/// when it exists.
fn definition_path(location: &Location) -> Option<PathBuf> {
    match &location.config {
        Some(path) => Some(path.clone()),
        None => Some(location.repo.join(DEFAULT_CONFIG_FILE)).filter(|path| path.is_file()),
    }
}

/// Colour for the CLI's own log lines: `--color`, else `[pipeline] color`.
///
/// Runs before logging is set up, so an unreadable definition just yields
/// `auto` here and is reported when the command loads it.
fn log_color(command: &Commands) -> ColorChoice {
    let (location, flag) = match command {
        Commands::Run {
            location, color, ..
        } => (Some(location), *color),
        Commands::Check { location } | Commands::Tools { location } => (Some(location), None),
        Commands::Init { .. } => (None, None),
    };
    flag.or_else(|| {
        let path = definition_path(location?)?;
        PipelineDefinition::from_path(&path)
            .ok()
            .map(|definition| definition.pipeline.color)
    })
    .unwrap_or_default()
}

/// Load and resolve the definition.
///
/// Without `--config` a missing `<repo>/verigate.toml` falls back to the
/// default definition, which verifies the repository root as one project.
fn load_pipeline(location: &Location) -> Result<ResolvedPipeline> {
    let repo = &location.repo;
    let definition = match definition_path(location) {
        Some(path) => PipelineDefinition::from_path(&path)
            .with_context(|| format!("Failed to load pipeline definition {}", path.display()))?,
        None => {
            info!(repo = %repo.display(), "No {} found; verifying the repository as a single project", DEFAULT_CONFIG_FILE);
            PipelineDefinition::default()
        }
    };
    definition
        .resolve(repo)
        .with_context(|| format!("Invalid pipeline definition for {}", repo.display()))
}

async fn cmd_run(location: &Location, options: RunOptions) -> Result<u8> {
    let mut pipeline = load_pipeline(location)?;
    pipeline.retain_projects(&options.projects)?;
    if let Some(color) = options.color {
        pipeline.settings.color = color;
    }
    if let Some(secs) = options.timeout_secs {
        pipeline.override_timeout(secs);
    }
    if let Some(max) = options.max_parallel {
        pipeline.settings.max_parallel = max;
    }

    if let Some(event) = options.event {
        let trigger = pipeline.trigger.clone().unwrap_or_default();
        let branch = options.branch.clone().unwrap_or_else(|| trigger.branch.clone());
        if !trigger.matches(event, &branch) {
            info!(event = %event, branch = %branch, mainline = %trigger.branch, "Trigger does not match; nothing to verify");
            println!(
                "Skipped: {event} on '{branch}' does not trigger pipeline '{}'",
                pipeline.name
            );
            return Ok(0);
        }
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_progress(rx));

    let orchestrator = Orchestrator::new(Arc::new(ProcessExecutor), pipeline.settings.clone())
        .with_events(tx);
    let report = orchestrator.run_all(&pipeline).await;
    drop(orchestrator);
    if let Err(e) = printer.await {
        warn!(error = %e, "Progress printer stopped");
    }

    // Stages have run; output errors no longer mean a bad definition.
    if let Err(e) = emit_report(&report, &options) {
        eprintln!("error: {e:#}");
        return Ok(EXIT_FAILURE);
    }
    Ok(exit_status(&report))
}

fn emit_report(report: &PipelineReport, options: &RunOptions) -> Result<()> {
    match options.format {
        ReportFormat::Text => print!("{}", report.render_text()),
        ReportFormat::Json => println!(
            "{}",
            report
                .to_json_pretty()
                .context("Failed to serialize report")?
        ),
        ReportFormat::Markdown => print!("{}", report.render_markdown()),
    }

    // Keep stdout machine-readable for JSON.
    if options.format == ReportFormat::Json {
        eprintln!("Gate: {}", Gate::evaluate(report).message);
    } else {
        print!("{}", gate_summary(report));
    }

    if let Some(path) = &options.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        debug!(path = %path.display(), "Wrote JSON report");
    }
    Ok(())
}

fn exit_status(report: &PipelineReport) -> u8 {
    u8::try_from(report.exit_code()).unwrap_or(EXIT_FAILURE)
}

fn gate_summary(report: &PipelineReport) -> String {
    let verdict = Gate::evaluate(report);
    let mut out = format!(
        "\nGate: {}\n",
        if verdict.passed { "✓ PASSED" } else { "✗ FAILED" }
    );
    if !verdict.violations.is_empty() {
        out.push_str("Violations:\n");
        for violation in &verdict.violations {
            out.push_str(&format!("  - {violation}\n"));
        }
    }
    out
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<PipelineEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::ProjectStarted { project } => {
                eprintln!("[{project}] started");
            }
            PipelineEvent::StageStarted { project, stage } => {
                eprintln!("[{project}] {stage} ...");
            }
            PipelineEvent::StageFinished {
                project,
                stage,
                outcome,
                duration_ms,
            } => {
                let mark = if outcome.is_passed() { "✓" } else { "✗" };
                eprintln!(
                    "[{project}] {mark} {stage} {} ({duration_ms}ms)",
                    outcome.describe()
                );
            }
            PipelineEvent::StageSkipped { project, stage } => {
                eprintln!("[{project}] - {stage} skipped");
            }
            PipelineEvent::ProjectFinished { project, state } => {
                eprintln!("[{project}] {state}");
            }
        }
    }
}

fn cmd_check(location: &Location) -> Result<u8> {
    let pipeline = load_pipeline(location)?;

    println!("Pipeline: {}", pipeline.name);
    println!("Repository: {}", pipeline.repo_root.display());
    println!("Colour: {}", pipeline.settings.color);
    match pipeline.settings.max_parallel {
        0 => println!("Parallelism: unbounded"),
        n => println!("Parallelism: {n}"),
    }
    if let Some(trigger) = &pipeline.trigger {
        let events: Vec<&str> = trigger.events.iter().map(|e| e.as_str()).collect();
        println!("Trigger: {} on '{}'", events.join(", "), trigger.branch);
    }
    println!();

    for project in &pipeline.projects {
        println!("{} ({})", project.name, project.path.display());
        for stage in &project.stages {
            let timeout = match stage.timeout_secs {
                0 => "no timeout".to_string(),
                secs => format!("{secs}s"),
            };
            println!(
                "    {:<7} {} [{}; needs {}]",
                stage.kind.name(),
                stage.command_line(),
                timeout,
                stage.tool.name()
            );
        }
    }

    println!();
    println!("Definition digest: {}", pipeline.digest());
    Ok(0)
}

async fn cmd_tools(location: &Location) -> Result<u8> {
    let pipeline = load_pipeline(location)?;
    let orchestrator = Orchestrator::new(Arc::new(ProcessExecutor), pipeline.settings.clone());
    let inventory = orchestrator.probe_tools(&pipeline).await;

    for (requirement, available) in inventory.entries() {
        let mark = if available { "✓" } else { "✗" };
        println!("  {} {:<12} {}", mark, requirement.name(), requirement.describe());
    }

    let missing = inventory.missing();
    if missing.is_empty() {
        println!("\nAll {} tool(s) available", inventory.entries().len());
        Ok(0)
    } else {
        println!("\n{} tool(s) missing", missing.len());
        Ok(1)
    }
}

fn cmd_init(repo: &Path, force: bool) -> Result<u8> {
    let path = repo.join(DEFAULT_CONFIG_FILE);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let projects = discover_projects(repo)
        .with_context(|| format!("Failed to scan {}", repo.display()))?;
    let count = projects.len();
    let definition = PipelineDefinition::starter(projects);
    let content = definition
        .to_toml_string()
        .context("Failed to render starter definition")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if count == 0 {
        println!(
            "✓ Wrote {} (no sub-projects found; the repository is verified as one project)",
            path.display()
        );
    } else {
        println!("✓ Wrote {} with {} project(s)", path.display(), count);
    }
    Ok(0)
}
