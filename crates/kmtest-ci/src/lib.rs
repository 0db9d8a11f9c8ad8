//! kmtest CI - build-and-test pipeline for kernel-module test projects
//!
//! Test code for a kernel module cannot run as an ordinary process: it is
//! cross-compiled for the module target, linked into a loadable module, and
//! only then exercised by a host-side test binary that is told where the
//! module lives. This crate orchestrates that sequence:
//! - Discovers test projects under a base directory
//! - Cross-compiles each into a static archive
//! - Links the archive into a kernel module with the native build
//! - Runs the project's tests single-threaded with `KERNEL_MODULE` set

pub mod compile;
pub mod config;
pub mod env;
pub mod error;
pub mod execute;
pub mod fakes;
pub mod link;
pub mod pipeline;
pub mod runner;
pub mod scan;
pub mod stage;
pub mod target;
pub mod telemetry;

// Re-export key types
pub use compile::CrossCompileStage;
pub use config::{ExecutionShape, FailurePolicy, Generation, HarnessConfig, LinkVariables};
pub use env::EnvOverlay;
pub use error::{HarnessError, HarnessResult};
pub use execute::{
    backend_for, EmulatedBackend, IntegratedBackend, StandaloneBackend, TestBackend,
    SINGLE_THREAD_FLAG,
};
pub use link::NativeLinkStage;
pub use pipeline::{Pipeline, PipelineResult, ProjectOutcome, StageFailure, StageRecord};
pub use runner::{CommandRunner, Invocation, ProcessRunner};
pub use scan::{MarkerConvention, Project, ProjectScanner};
pub use stage::Stage;
pub use target::{ArchiveNaming, ArtifactLayout, ArtifactRef, BuildProfile, OutputLayout, TargetSpec};
pub use telemetry::init_tracing;
