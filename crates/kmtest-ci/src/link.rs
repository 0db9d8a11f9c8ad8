//! Native link stage: hand the cross-compiled archive to the makefile build
//! that produces the loadable kernel module.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::compile::path_str;
use crate::config::{HarnessConfig, LinkVariables};
use crate::env::{RUSTFLAGS, STRICT_WARNINGS_FLAGS};
use crate::error::HarnessResult;
use crate::runner::{CommandRunner, Invocation};
use crate::scan::Project;
use crate::stage::Stage;
use crate::target::ArtifactRef;

/// Path of the cross-compiled archive.
pub const TEST_LIBRARY: &str = "TEST_LIBRARY";
/// Archive file name without extension.
pub const TEST_LIBRARY_ARCHIVE: &str = "TEST_LIBRARY_ARCHIVE";
/// Normalized test crate name, `<name>_tests`.
pub const TEST_NAME: &str = "TEST_NAME";
/// Project directory name relative to the base directory.
pub const TEST_PATH: &str = "TEST_PATH";
/// Absolute project directory.
pub const TEST_DIR: &str = "TEST_DIR";

/// Invokes the native build tool for one project.
#[derive(Debug, Clone)]
pub struct NativeLinkStage {
    base: PathBuf,
    command: Vec<String>,
    variables: LinkVariables,
    extra_vars: BTreeMap<String, String>,
    strict_warnings: bool,
    kernel_module: PathBuf,
}

impl NativeLinkStage {
    pub fn from_config(base: &Path, config: &HarnessConfig) -> Self {
        Self {
            base: base.to_path_buf(),
            command: config.native_build_tool.clone(),
            variables: config.link_variables,
            extra_vars: config.extra_make_vars.clone(),
            strict_warnings: config.strict_warnings,
            kernel_module: config.kernel_module_path(base),
        }
    }

    /// Where the link step leaves the kernel module.
    pub fn kernel_module(&self) -> ArtifactRef {
        ArtifactRef::new(&self.kernel_module)
    }

    /// Build-description variables, in the order they are passed.
    pub fn make_vars(&self, project: &Project, archive: &ArtifactRef) -> Vec<(String, String)> {
        let mut vars = vec![(TEST_LIBRARY.to_string(), path_str(&archive.path))];
        if self.variables.archive_stem {
            vars.push((TEST_LIBRARY_ARCHIVE.to_string(), archive.stem()));
        }
        if self.variables.project_identity {
            vars.push((
                TEST_NAME.to_string(),
                format!("{}_tests", project.normalized_name()),
            ));
            vars.push((TEST_PATH.to_string(), project.name.clone()));
            vars.push((TEST_DIR.to_string(), path_str(&project.dir)));
        }
        vars.extend(self.extra_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// The native build command line for `project`.
    pub fn invocation(&self, project: &Project, archive: &ArtifactRef) -> HarnessResult<Invocation> {
        let mut inv = Invocation::from_command_line(&self.command)?
            .arg("-C")
            .path_arg(&self.base)
            .for_stage(Stage::NativeLink)
            .args(
                self.make_vars(project, archive)
                    .into_iter()
                    .map(|(k, v)| format!("{}={}", k, v)),
            );
        if self.strict_warnings {
            inv = inv.env(RUSTFLAGS, STRICT_WARNINGS_FLAGS);
        }
        Ok(inv)
    }

    /// Link `archive` and return the kernel module the tests will load.
    pub async fn run(
        &self,
        runner: &dyn CommandRunner,
        project: &Project,
        archive: &ArtifactRef,
    ) -> HarnessResult<ArtifactRef> {
        archive.ensure_exists(Stage::CrossCompile)?;

        let inv = self.invocation(project, archive)?;
        // every project links to the same path
        let module = self.kernel_module();
        module.remove_stale()?;

        info!(project = %project.name, archive = %archive, "linking kernel module");
        runner.run(&inv).await?;
        module.ensure_exists(Stage::NativeLink)?;
        Ok(module)
    }
}
