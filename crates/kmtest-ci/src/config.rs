//! Harness configuration.
//!
//! A [`HarnessConfig`] bundles the small set of policies that distinguish
//! one pipeline generation from another: marker convention, archive naming,
//! output layout and execution shape. It is read from `kmtest.json` in the
//! base directory when present; missing fields take the modern defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::scan::MarkerConvention;
use crate::target::{ArchiveNaming, ArtifactLayout, BuildProfile, OutputLayout, TargetSpec};

/// Config file looked up in the base directory.
pub const CONFIG_FILE_NAME: &str = "kmtest.json";

/// Kernel module produced by the link step, relative to the base directory.
pub const DEFAULT_KERNEL_MODULE: &str = "testmodule.ko";

/// Pipeline generation presets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// `tests.rs` marker, per-project output, standalone test binary
    Legacy,

    /// `tests/` marker, shared output, integrated `cargo test`
    #[default]
    Modern,
}

impl std::str::FromStr for Generation {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Generation::Legacy),
            "modern" => Ok(Generation::Modern),
            other => Err(HarnessError::Config(format!("unknown generation '{}'", other))),
        }
    }
}

/// How the test binary is run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionShape {
    /// Compile the marker file with `rustc --test` and run the binary
    Standalone,

    /// Delegate to the toolchain's test command inside the project
    #[default]
    Integrated,

    /// Standalone binary launched through a user-supplied emulator wrapper
    Emulated,
}

/// What to do with the remaining projects after one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole run at the first failing stage
    #[default]
    AbortRun,

    /// Record the failure and move on to the next project
    ContinueOnFailure,
}

/// Optional variables handed to the native build tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkVariables {
    /// `TEST_LIBRARY_ARCHIVE=<archive stem>`
    pub archive_stem: bool,

    /// `TEST_NAME`, `TEST_PATH` and `TEST_DIR`
    pub project_identity: bool,
}

impl Default for LinkVariables {
    fn default() -> Self {
        Self {
            archive_stem: true,
            project_identity: true,
        }
    }
}

/// Full harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Marker identifying a test project.
    pub marker: MarkerConvention,

    /// Cross-compilation target.
    pub target: TargetSpec,

    /// `RUST_TARGET_PATH`; defaults to the base directory's parent.
    pub target_search_path: Option<PathBuf>,

    /// `XBUILD_SYSROOT_PATH`, if any.
    pub sysroot: Option<PathBuf>,

    pub profile: BuildProfile,
    pub output_layout: OutputLayout,
    pub archive_naming: ArchiveNaming,

    /// Treat compiler warnings as errors (`RUSTFLAGS=-Dwarnings`).
    pub strict_warnings: bool,

    /// Cross-compiler command; `--target` is appended.
    pub cross_compiler: Vec<String>,

    /// Native build tool; `-C <base>` and variables are appended.
    pub native_build_tool: Vec<String>,

    pub link_variables: LinkVariables,

    /// Additional `KEY=VALUE` variables for the native build tool.
    pub extra_make_vars: BTreeMap<String, String>,

    /// Linked kernel module, relative to the base directory.
    pub kernel_module: PathBuf,

    pub execution: ExecutionShape,

    /// Integrated test command, run in the project directory.
    pub test_command: Vec<String>,

    /// Compiler for standalone test binaries.
    pub test_compiler: Vec<String>,

    /// Extra compiler args for standalone binaries (e.g. `-L`/`--extern`
    /// for the prebuilt test-support library).
    pub test_support_args: Vec<String>,

    /// Emulator launcher for [`ExecutionShape::Emulated`]; the test binary
    /// and its arguments are appended.
    pub emulator: Vec<String>,

    /// `CARGO_TARGET_DIR` for integrated test builds, relative to the base.
    pub host_target_dir: Option<PathBuf>,

    /// Per-command timeout; 0 disables it.
    pub stage_timeout_secs: u64,

    pub failure_policy: FailurePolicy,

    /// Log each command line before running it.
    pub echo_commands: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::modern()
    }
}

impl HarnessConfig {
    /// Current pipeline: `tests/` directories, shared output, `cargo test`.
    pub fn modern() -> Self {
        Self {
            marker: MarkerConvention::test_directory(),
            target: TargetSpec::default(),
            target_search_path: None,
            sysroot: Some(PathBuf::from("target-sysroot")),
            profile: BuildProfile::Debug,
            output_layout: OutputLayout::Shared,
            archive_naming: ArchiveNaming::TestCrate,
            strict_warnings: true,
            cross_compiler: vec!["cargo".to_string(), "xbuild".to_string()],
            native_build_tool: vec!["make".to_string()],
            link_variables: LinkVariables::default(),
            extra_make_vars: BTreeMap::new(),
            kernel_module: PathBuf::from(DEFAULT_KERNEL_MODULE),
            execution: ExecutionShape::Integrated,
            test_command: vec!["cargo".to_string(), "test".to_string()],
            test_compiler: vec!["rustc".to_string(), "--test".to_string()],
            test_support_args: Vec::new(),
            emulator: Vec::new(),
            host_target_dir: Some(PathBuf::from("target-test")),
            stage_timeout_secs: 0,
            failure_policy: FailurePolicy::AbortRun,
            echo_commands: true,
        }
    }

    /// First pipeline: `tests.rs` files compiled into standalone binaries.
    pub fn legacy() -> Self {
        Self {
            marker: MarkerConvention::test_file(),
            sysroot: None,
            output_layout: OutputLayout::ProjectScoped,
            archive_naming: ArchiveNaming::Discovered,
            strict_warnings: false,
            link_variables: LinkVariables {
                archive_stem: false,
                project_identity: false,
            },
            execution: ExecutionShape::Standalone,
            host_target_dir: None,
            ..Self::modern()
        }
    }

    pub fn for_generation(generation: Generation) -> Self {
        match generation {
            Generation::Legacy => Self::legacy(),
            Generation::Modern => Self::modern(),
        }
    }

    /// Parse a JSON config file.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "loaded harness config");
        Ok(config)
    }

    /// `kmtest.json` from `base` if it exists, otherwise `fallback`.
    pub fn discover(base: &Path, fallback: Generation) -> HarnessResult<Self> {
        let path = base.join(CONFIG_FILE_NAME);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::for_generation(fallback))
        }
    }

    /// Reject combinations that cannot work.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.cross_compiler.is_empty() {
            return Err(HarnessError::Config("cross_compiler is empty".to_string()));
        }
        if self.native_build_tool.is_empty() {
            return Err(HarnessError::Config("native_build_tool is empty".to_string()));
        }
        match self.execution {
            ExecutionShape::Integrated if self.test_command.is_empty() => {
                return Err(HarnessError::Config("test_command is empty".to_string()));
            }
            ExecutionShape::Standalone | ExecutionShape::Emulated => {
                if self.test_compiler.is_empty() {
                    return Err(HarnessError::Config("test_compiler is empty".to_string()));
                }
                if !matches!(self.marker, MarkerConvention::TestFile(_)) {
                    return Err(HarnessError::Config(
                        "standalone test binaries need a test_file marker".to_string(),
                    ));
                }
            }
            _ => {}
        }
        if self.execution == ExecutionShape::Emulated && self.emulator.is_empty() {
            return Err(HarnessError::Config(
                "emulated execution needs an emulator launcher".to_string(),
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }

    /// Absolute path of the linked kernel module.
    pub fn kernel_module_path(&self, base: &Path) -> PathBuf {
        base.join(&self.kernel_module)
    }

    /// Value for `RUST_TARGET_PATH`.
    pub fn resolved_target_search_path(&self, base: &Path) -> PathBuf {
        match &self.target_search_path {
            Some(path) => base.join(path),
            None => base.parent().unwrap_or(base).to_path_buf(),
        }
    }

    pub fn resolved_sysroot(&self, base: &Path) -> Option<PathBuf> {
        self.sysroot.as_ref().map(|p| base.join(p))
    }

    pub fn resolved_host_target_dir(&self, base: &Path) -> Option<PathBuf> {
        self.host_target_dir.as_ref().map(|p| base.join(p))
    }

    /// Artifact naming for this configuration rooted at `base`.
    pub fn layout(&self, base: &Path) -> ArtifactLayout {
        ArtifactLayout::new(
            base,
            self.target.resolved(base),
            self.profile,
            self.output_layout,
            self.archive_naming,
        )
    }
}
