//! Test execution stage.
//!
//! Backends decide *how* a project's tests run; all of them share the same
//! handoff: the kernel module path travels only through `KERNEL_MODULE`, and
//! the test harness is pinned to one thread because every test talks to the
//! same loaded module.
//!
//! - [`StandaloneBackend`]: `rustc --test` on the marker file, then run the binary
//! - [`IntegratedBackend`]: the toolchain's own test command in the project
//! - [`EmulatedBackend`]: standalone binary launched through an emulator wrapper

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::compile::path_str;
use crate::config::{ExecutionShape, HarnessConfig};
use crate::env::{
    EnvOverlay, CARGO_TARGET_DIR, KERNEL_MODULE, RUSTFLAGS, RUST_TEST_THREADS,
    STRICT_WARNINGS_FLAGS,
};
use crate::error::{HarnessError, HarnessResult};
use crate::runner::{CommandRunner, Invocation};
use crate::scan::{MarkerConvention, Project};
use crate::stage::Stage;
use crate::target::{ArtifactLayout, ArtifactRef, BuildProfile};

/// Test-harness flag forcing serial execution.
pub const SINGLE_THREAD_FLAG: &str = "--test-threads=1";

/// Environment every test process sees.
pub fn test_environment(kernel_module: &ArtifactRef) -> EnvOverlay {
    EnvOverlay::new()
        .with(KERNEL_MODULE, path_str(&kernel_module.path))
        .with(RUST_TEST_THREADS, "1")
}

/// A way of running a project's tests.
#[async_trait]
pub trait TestBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Commands to run, in order. The last one runs the tests.
    fn invocations(
        &self,
        project: &Project,
        kernel_module: &ArtifactRef,
    ) -> HarnessResult<Vec<Invocation>>;

    /// Run the commands in order, stopping at the first failure.
    async fn execute(
        &self,
        runner: &dyn CommandRunner,
        project: &Project,
        kernel_module: &ArtifactRef,
    ) -> HarnessResult<()> {
        let invocations = self.invocations(project, kernel_module)?;
        info!(project = %project.name, backend = self.name(), "running tests");
        for inv in &invocations {
            runner.run(inv).await?;
        }
        Ok(())
    }
}

/// Compiles the marker file into a test binary and runs it directly.
#[derive(Debug, Clone)]
pub struct StandaloneBackend {
    layout: ArtifactLayout,
    compiler: Vec<String>,
    support_args: Vec<String>,
    entry_file: String,
    strict_warnings: bool,
}

impl StandaloneBackend {
    pub fn from_config(base: &Path, config: &HarnessConfig) -> HarnessResult<Self> {
        let entry_file = match &config.marker {
            MarkerConvention::TestFile(name) => name.clone(),
            MarkerConvention::TestDirectory(_) => {
                return Err(HarnessError::Config(
                    "standalone test binaries need a test_file marker".to_string(),
                ))
            }
        };
        Ok(Self {
            layout: config.layout(base),
            compiler: config.test_compiler.clone(),
            support_args: config.test_support_args.clone(),
            entry_file,
            strict_warnings: config.strict_warnings,
        })
    }

    /// Where the compiled test binary is written.
    pub fn binary_path(&self, project: &Project) -> PathBuf {
        self.layout
            .output_root(project)
            .join(format!("{}-tests", project.normalized_name()))
    }

    fn compile_invocation(&self, project: &Project) -> HarnessResult<Invocation> {
        let mut inv = Invocation::from_command_line(&self.compiler)?
            .path_arg(&project.dir.join(&self.entry_file))
            .arg("-o")
            .path_arg(&self.binary_path(project))
            .args(self.support_args.iter().cloned())
            .current_dir(&project.dir)
            .for_stage(Stage::TestExecution);
        if self.strict_warnings {
            inv = inv.args(["-D", "warnings"]);
        }
        Ok(inv)
    }
}

#[async_trait]
impl TestBackend for StandaloneBackend {
    fn name(&self) -> &'static str {
        "standalone"
    }

    fn invocations(
        &self,
        project: &Project,
        kernel_module: &ArtifactRef,
    ) -> HarnessResult<Vec<Invocation>> {
        let run = Invocation::new(path_str(&self.binary_path(project)))
            .arg(SINGLE_THREAD_FLAG)
            .current_dir(&project.dir)
            .for_stage(Stage::TestExecution)
            .envs(&test_environment(kernel_module));
        Ok(vec![self.compile_invocation(project)?, run])
    }
}

/// Runs the toolchain's integrated test command inside the project.
#[derive(Debug, Clone)]
pub struct IntegratedBackend {
    command: Vec<String>,
    profile: BuildProfile,
    host_target_dir: Option<PathBuf>,
    strict_warnings: bool,
}

impl IntegratedBackend {
    pub fn from_config(base: &Path, config: &HarnessConfig) -> Self {
        Self {
            command: config.test_command.clone(),
            profile: config.profile,
            host_target_dir: config.resolved_host_target_dir(base),
            strict_warnings: config.strict_warnings,
        }
    }
}

#[async_trait]
impl TestBackend for IntegratedBackend {
    fn name(&self) -> &'static str {
        "integrated"
    }

    fn invocations(
        &self,
        project: &Project,
        kernel_module: &ArtifactRef,
    ) -> HarnessResult<Vec<Invocation>> {
        let mut inv = Invocation::from_command_line(&self.command)?;
        if let Some(flag) = self.profile.cargo_flag() {
            inv = inv.arg(flag);
        }
        inv = inv
            .arg("--")
            .arg(SINGLE_THREAD_FLAG)
            .current_dir(&project.dir)
            .for_stage(Stage::TestExecution)
            .envs(&test_environment(kernel_module));
        if let Some(dir) = &self.host_target_dir {
            inv = inv.env(CARGO_TARGET_DIR, path_str(dir));
        }
        if self.strict_warnings {
            inv = inv.env(RUSTFLAGS, STRICT_WARNINGS_FLAGS);
        }
        Ok(vec![inv])
    }
}

/// Builds a standalone binary and launches it through an emulator wrapper.
///
/// The wrapper is opaque: it receives the binary path followed by the test
/// harness arguments, and inherits the test environment.
#[derive(Debug, Clone)]
pub struct EmulatedBackend {
    standalone: StandaloneBackend,
    launcher: Vec<String>,
}

impl EmulatedBackend {
    pub fn from_config(base: &Path, config: &HarnessConfig) -> HarnessResult<Self> {
        if config.emulator.is_empty() {
            return Err(HarnessError::Config(
                "emulated execution needs an emulator launcher".to_string(),
            ));
        }
        Ok(Self {
            standalone: StandaloneBackend::from_config(base, config)?,
            launcher: config.emulator.clone(),
        })
    }
}

#[async_trait]
impl TestBackend for EmulatedBackend {
    fn name(&self) -> &'static str {
        "emulated"
    }

    fn invocations(
        &self,
        project: &Project,
        kernel_module: &ArtifactRef,
    ) -> HarnessResult<Vec<Invocation>> {
        let run = Invocation::from_command_line(&self.launcher)?
            .path_arg(&self.standalone.binary_path(project))
            .arg(SINGLE_THREAD_FLAG)
            .current_dir(&project.dir)
            .for_stage(Stage::TestExecution)
            .envs(&test_environment(kernel_module));
        Ok(vec![self.standalone.compile_invocation(project)?, run])
    }
}

/// Backend selected by the configuration's execution shape.
pub fn backend_for(base: &Path, config: &HarnessConfig) -> HarnessResult<Box<dyn TestBackend>> {
    Ok(match config.execution {
        ExecutionShape::Standalone => Box::new(StandaloneBackend::from_config(base, config)?),
        ExecutionShape::Integrated => Box::new(IntegratedBackend::from_config(base, config)),
        ExecutionShape::Emulated => Box::new(EmulatedBackend::from_config(base, config)?),
    })
}
