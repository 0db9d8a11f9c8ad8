//! Cross-compile stage: build a test project into a static archive for the
//! kernel-module target.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::HarnessConfig;
use crate::env::{
    CARGO_TARGET_DIR, RUSTFLAGS, RUST_TARGET_PATH, STRICT_WARNINGS_FLAGS, XBUILD_SYSROOT_PATH,
};
use crate::error::HarnessResult;
use crate::runner::{CommandRunner, Invocation};
use crate::scan::Project;
use crate::stage::Stage;
use crate::target::{ArtifactLayout, ArtifactRef};

/// Invokes the cross-compiler for one project.
#[derive(Debug, Clone)]
pub struct CrossCompileStage {
    layout: ArtifactLayout,
    command: Vec<String>,
    target_search_path: PathBuf,
    sysroot: Option<PathBuf>,
    strict_warnings: bool,
}

impl CrossCompileStage {
    pub fn from_config(base: &Path, config: &HarnessConfig) -> Self {
        Self {
            layout: config.layout(base),
            command: config.cross_compiler.clone(),
            target_search_path: config.resolved_target_search_path(base),
            sysroot: config.resolved_sysroot(base),
            strict_warnings: config.strict_warnings,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// The cross-compiler command line for `project`.
    pub fn invocation(&self, project: &Project) -> HarnessResult<Invocation> {
        let mut inv = Invocation::from_command_line(&self.command)?
            .arg("--target")
            .arg(self.layout.target().cli_arg())
            .current_dir(&project.dir)
            .for_stage(Stage::CrossCompile)
            .env(RUST_TARGET_PATH, path_str(&self.target_search_path))
            .env(CARGO_TARGET_DIR, path_str(&self.layout.output_root(project)));

        if let Some(flag) = self.layout.profile().cargo_flag() {
            inv = inv.arg(flag);
        }
        if let Some(sysroot) = &self.sysroot {
            inv = inv.env(XBUILD_SYSROOT_PATH, path_str(sysroot));
        }
        if self.strict_warnings {
            inv = inv.env(RUSTFLAGS, STRICT_WARNINGS_FLAGS);
        }
        Ok(inv)
    }

    /// Build `project` and return the archive the link stage will consume.
    ///
    /// Any archive already at the computed path is removed first, so a zero
    /// exit without a freshly written archive there is an error.
    pub async fn run(
        &self,
        runner: &dyn CommandRunner,
        project: &Project,
    ) -> HarnessResult<ArtifactRef> {
        let inv = self.invocation(project)?;
        if let Some(expected) = self.layout.expected_archive(project) {
            expected.remove_stale()?;
        }
        info!(project = %project.name, target = %self.layout.target().triple(), "cross-compiling");
        runner.run(&inv).await?;

        let archive = self.layout.resolve_archive(project)?;
        info!(project = %project.name, archive = %archive, "archive ready");
        Ok(archive)
    }
}

pub(crate) fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
