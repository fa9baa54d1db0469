//! Pipeline orchestration across projects.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ResolvedPipeline, RunSettings};
use crate::executor::CommandExecutor;
use crate::identity::RunIdentity;
use crate::project::{Project, ProjectState};
use crate::report::{PipelineReport, ProjectReport, StageOutcome, StageRecord};
use crate::runner::StageRunner;
use crate::stage::{StageConfig, StageKind};
use crate::tools::ToolInventory;

/// Stage-level progress published while the pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ProjectStarted {
        project: String,
    },
    StageStarted {
        project: String,
        stage: StageKind,
    },
    StageFinished {
        project: String,
        stage: StageKind,
        outcome: StageOutcome,
        duration_ms: u64,
    },
    StageSkipped {
        project: String,
        stage: StageKind,
    },
    ProjectFinished {
        project: String,
        state: ProjectState,
    },
}

/// Pipeline orchestrator.
///
/// Runs every project concurrently; stages within a project run strictly
/// in order and stop at the first failure.
#[derive(Clone)]
pub struct Orchestrator {
    executor: Arc<dyn CommandExecutor>,
    settings: Arc<RunSettings>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn CommandExecutor>, settings: RunSettings) -> Self {
        Self {
            executor,
            settings: Arc::new(settings),
            events: None,
        }
    }

    /// Publish progress events on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    /// Probe every tool the projects need, once.
    pub async fn probe_tools(&self, pipeline: &ResolvedPipeline) -> ToolInventory {
        ToolInventory::probe(
            self.executor.as_ref(),
            pipeline.tool_requirements(),
            &pipeline.repo_root,
        )
        .await
    }

    /// Run every selected stage of `project` in order.
    ///
    /// The first failing stage moves the project to `Failed(stage)`; the
    /// remaining stages are recorded as skipped and never spawned.
    pub async fn run_project(
        &self,
        project: &Project,
        inventory: Arc<ToolInventory>,
    ) -> ProjectReport {
        let start = Instant::now();
        let runner = StageRunner::new(
            Arc::clone(&self.executor),
            inventory,
            Arc::clone(&self.settings),
        );

        info!(project = %project.name, root = %project.root.display(), "Verifying project");
        self.emit(PipelineEvent::ProjectStarted {
            project: project.name.clone(),
        });

        let mut state = ProjectState::Pending;
        let mut records = Vec::with_capacity(project.stages.len());

        // Canonical order even when `stages` was built by hand.
        let mut ordered: Vec<&StageConfig> = project.stages.iter().collect();
        ordered.sort_by_key(|s| s.kind);

        for stage in ordered {
            if state.is_terminal() {
                self.emit(PipelineEvent::StageSkipped {
                    project: project.name.clone(),
                    stage: stage.kind,
                });
                records.push(StageRecord::skipped(stage));
                continue;
            }

            match state.enter(stage.kind) {
                Some(next) => state = next,
                None => {
                    warn!(project = %project.name, stage = %stage.kind, state = %state, "Duplicate stage skipped");
                    self.emit(PipelineEvent::StageSkipped {
                        project: project.name.clone(),
                        stage: stage.kind,
                    });
                    records.push(StageRecord::skipped(stage));
                    continue;
                }
            }

            self.emit(PipelineEvent::StageStarted {
                project: project.name.clone(),
                stage: stage.kind,
            });
            let stage_start = Instant::now();

            let record = match runner.run_stage(project, stage).await {
                Ok(result) => StageRecord::passed(result),
                Err(e) => {
                    warn!(project = %project.name, stage = %stage.kind, category = %e.category().label(), error = %e, "Stage failed; skipping remaining stages");
                    state = state.fail().unwrap_or(ProjectState::Failed(stage.kind));
                    StageRecord::from_error(e, stage, stage_start.elapsed().as_millis() as u64)
                }
            };

            self.emit(PipelineEvent::StageFinished {
                project: project.name.clone(),
                stage: stage.kind,
                outcome: record.outcome.clone(),
                duration_ms: record.duration_ms,
            });
            records.push(record);
        }

        if !state.is_terminal() {
            state = state.finish().unwrap_or(ProjectState::Passed);
        }

        info!(project = %project.name, state = %state, "Project finished");
        self.emit(PipelineEvent::ProjectFinished {
            project: project.name.clone(),
            state,
        });

        ProjectReport {
            name: project.name.clone(),
            path: project.path.to_string_lossy().to_string(),
            state,
            stages: records,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Verify every project and aggregate the results.
    ///
    /// Tools are probed before any project starts. Projects share no
    /// mutable state; a failure in one never stops another.
    pub async fn run_all(&self, pipeline: &ResolvedPipeline) -> PipelineReport {
        let start = Instant::now();
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();

        info!(
            run_id = %run_id,
            pipeline = %pipeline.name,
            projects = pipeline.projects.len(),
            "Starting pipeline"
        );

        let identity = RunIdentity::capture(&pipeline.repo_root, &pipeline.projects).await;
        let inventory = Arc::new(self.probe_tools(pipeline).await);
        let limit = match self.settings.max_parallel {
            0 => pipeline.projects.len().max(1),
            n => n,
        };
        let permits = Arc::new(Semaphore::new(limit));

        let mut tasks = Vec::with_capacity(pipeline.projects.len());
        for project in &pipeline.projects {
            let orchestrator = self.clone();
            let project = project.clone();
            let inventory = Arc::clone(&inventory);
            let permits = Arc::clone(&permits);

            tasks.push(tokio::spawn(async move {
                // The semaphore is never closed, so acquire only fails if it is.
                let _permit = permits.acquire_owned().await.ok();
                orchestrator.run_project(&project, inventory).await
            }));
        }

        let joined = futures::future::join_all(tasks).await;
        let projects: Vec<ProjectReport> = joined
            .into_iter()
            .zip(&pipeline.projects)
            .map(|(result, project)| match result {
                Ok(report) => report,
                Err(e) => {
                    error!(project = %project.name, error = %e, "Project task aborted");
                    aborted_report(project, &e.to_string())
                }
            })
            .collect();

        let success = projects.iter().all(|p| p.passed());
        let duration_ms = start.elapsed().as_millis() as u64;

        if success {
            info!(run_id = %run_id, duration_ms, "Pipeline passed");
        } else {
            let failed: Vec<String> = projects
                .iter()
                .filter_map(|p| p.failure().map(|f| format!("{}/{}", p.name, f.stage)))
                .collect();
            info!(run_id = %run_id, duration_ms, failed = ?failed, "Pipeline failed");
        }

        PipelineReport {
            run_id,
            pipeline: pipeline.name.clone(),
            identity,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            projects,
            success,
        }
    }
}

/// Report for a project whose task panicked or was cancelled.
fn aborted_report(project: &Project, message: &str) -> ProjectReport {
    let mut stages = project.stages.iter();
    let first = stages.next();
    let mut records = Vec::with_capacity(project.stages.len());
    if let Some(stage) = first {
        records.push(StageRecord {
            outcome: StageOutcome::SpawnError {
                message: format!("project task aborted: {message}"),
            },
            ..StageRecord::skipped(stage)
        });
    }
    records.extend(stages.map(StageRecord::skipped));

    ProjectReport {
        name: project.name.clone(),
        path: project.path.to_string_lossy().to_string(),
        state: ProjectState::Failed(first.map(|s| s.kind).unwrap_or(StageKind::Format)),
        stages: records,
        duration_ms: 0,
    }
}
