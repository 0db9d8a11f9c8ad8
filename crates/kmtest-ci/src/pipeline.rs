//! Pipeline orchestration and run reporting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::compile::CrossCompileStage;
use crate::config::{FailurePolicy, HarnessConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::execute::{backend_for, TestBackend};
use crate::link::NativeLinkStage;
use crate::runner::CommandRunner;
use crate::scan::{Project, ProjectScanner};
use crate::stage::Stage;
use crate::target::ArtifactRef;

/// A completed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    /// Stage that ran.
    pub stage: Stage,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Artifact the stage produced, if any.
    pub artifact: Option<PathBuf>,

    /// SHA-256 of that artifact.
    pub artifact_digest: Option<String>,
}

/// The stage at which a project stopped.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{stage} failed for project '{project}': {message}")]
pub struct StageFailure {
    pub project: String,
    pub stage: Stage,
    pub message: String,
    /// Exit code to surface (the child's own code when there was one).
    pub exit_code: i32,
}

impl StageFailure {
    fn new(project: &Project, stage: Stage, err: &HarnessError) -> Self {
        Self {
            project: project.name.clone(),
            stage,
            message: err.to_string(),
            exit_code: err.exit_code(),
        }
    }
}

/// Everything that happened to one project.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOutcome {
    /// Project directory name.
    pub project: String,

    /// Stages that completed, in order.
    pub stages: Vec<StageRecord>,

    /// First failing stage, if any. No stage after it was attempted.
    pub failure: Option<StageFailure>,
}

impl ProjectOutcome {
    fn new(project: &Project) -> Self {
        Self {
            project: project.name.clone(),
            stages: Vec::new(),
            failure: None,
        }
    }

    fn record(&mut self, stage: Stage, started: Instant, artifact: Option<&ArtifactRef>) {
        self.stages.push(StageRecord {
            stage,
            duration_ms: started.elapsed().as_millis() as u64,
            artifact: artifact.map(|a| a.path.clone()),
            artifact_digest: artifact.and_then(|a| a.digest().ok()),
        });
    }

    fn fail(mut self, project: &Project, stage: Stage, err: HarnessError) -> Self {
        error!(project = %project.name, stage = %stage, error = %err, "stage failed");
        self.failure = Some(StageFailure::new(project, stage, &err));
        self
    }

    /// Whether all three stages passed.
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Unique id for this run.
    pub run_id: Uuid,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Base directory that was scanned.
    pub base_dir: PathBuf,

    /// Per-project outcomes, in scan order.
    pub projects: Vec<ProjectOutcome>,

    /// Whether the run stopped early because of [`FailurePolicy::AbortRun`].
    pub aborted: bool,
}

impl PipelineResult {
    /// Green only when every discovered project passed. An empty run is green.
    pub fn success(&self) -> bool {
        self.projects.iter().all(ProjectOutcome::passed)
    }

    /// Number of projects that passed.
    pub fn passed_count(&self) -> usize {
        self.projects.iter().filter(|p| p.passed()).count()
    }

    /// Number of projects that failed.
    pub fn failed_count(&self) -> usize {
        self.projects.iter().filter(|p| !p.passed()).count()
    }

    pub fn first_failure(&self) -> Option<&StageFailure> {
        self.projects.iter().find_map(|p| p.failure.as_ref())
    }

    /// Process exit code: 0 when green, else the first failure's code.
    pub fn exit_code(&self) -> i32 {
        self.first_failure().map(|f| f.exit_code).unwrap_or(0)
    }

    /// Write the result as pretty JSON.
    pub fn write_report(&self, path: &Path) -> HarnessResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Scans the base directory and drives compile → link → test per project.
pub struct Pipeline {
    base: PathBuf,
    policy: FailurePolicy,
    scanner: ProjectScanner,
    compile: CrossCompileStage,
    link: NativeLinkStage,
    backend: Box<dyn TestBackend>,
    runner: Arc<dyn CommandRunner>,
}

impl Pipeline {
    /// Build a pipeline rooted at `base`. `base` should be absolute.
    pub fn new(
        base: impl Into<PathBuf>,
        config: &HarnessConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> HarnessResult<Self> {
        config.validate()?;
        let base = base.into();
        Ok(Self {
            policy: config.failure_policy,
            scanner: ProjectScanner::new(&base, config.marker.clone()),
            compile: CrossCompileStage::from_config(&base, config),
            link: NativeLinkStage::from_config(&base, config),
            backend: backend_for(&base, config)?,
            runner,
            base,
        })
    }

    pub fn scanner(&self) -> &ProjectScanner {
        &self.scanner
    }

    /// Run every discovered project.
    ///
    /// Stage failures are reported in the result, not as `Err`; `Err` means
    /// the harness itself could not run (e.g. the base directory is unreadable).
    pub async fn run(&self) -> HarnessResult<PipelineResult> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let projects = self.scanner.scan()?;
        if projects.is_empty() {
            warn!(base = %self.base.display(), "no test projects found");
        }
        info!(run_id = %run_id, projects = projects.len(), "starting test pipeline");

        let mut outcomes = Vec::with_capacity(projects.len());
        let mut aborted = false;
        for project in &projects {
            let outcome = self.run_project(project).await;
            let failed = !outcome.passed();
            outcomes.push(outcome);

            if failed && self.policy == FailurePolicy::AbortRun {
                aborted = true;
                break;
            }
        }

        let result = PipelineResult {
            run_id,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            base_dir: self.base.clone(),
            projects: outcomes,
            aborted,
        };

        if result.success() {
            info!(run_id = %run_id, passed = result.passed_count(), "test pipeline completed successfully");
        } else {
            info!(
                run_id = %run_id,
                passed = result.passed_count(),
                failed = result.failed_count(),
                aborted,
                "test pipeline failed"
            );
        }
        Ok(result)
    }

    /// Run the three stages for one project, stopping at the first failure.
    pub async fn run_project(&self, project: &Project) -> ProjectOutcome {
        let runner = self.runner.as_ref();
        let mut outcome = ProjectOutcome::new(project);
        info!(project = %project.name, "+ [{}]", project.name);

        let started = Instant::now();
        let archive = match self.compile.run(runner, project).await {
            Ok(archive) => archive,
            Err(e) => return outcome.fail(project, Stage::CrossCompile, e),
        };
        outcome.record(Stage::CrossCompile, started, Some(&archive));

        let started = Instant::now();
        let module = match self.link.run(runner, project, &archive).await {
            Ok(module) => module,
            Err(e) => return outcome.fail(project, Stage::NativeLink, e),
        };
        outcome.record(Stage::NativeLink, started, Some(&module));

        let started = Instant::now();
        if let Err(e) = self.backend.execute(runner, project, &module).await {
            return outcome.fail(project, Stage::TestExecution, e);
        }
        outcome.record(Stage::TestExecution, started, None);

        info!(project = %project.name, "all stages passed");
        outcome
    }
}
