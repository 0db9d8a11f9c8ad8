//! Scoped loading of the kernel module under test.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};

use crate::error::{SupportError, SupportResult};

/// Variable the harness uses to hand over the module path.
pub const KERNEL_MODULE: &str = "KERNEL_MODULE";

/// Path of the module under test, as handed over by the harness.
pub fn kernel_module_path() -> SupportResult<PathBuf> {
    std::env::var_os(KERNEL_MODULE)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or(SupportError::ModulePathUnset)
}

/// Run a privileged command, failing on non-zero exit.
pub(crate) fn sudo(args: &[&str]) -> SupportResult<()> {
    let command = format!("sudo {}", args.join(" "));
    debug!(command = %command, "running privileged helper");
    let status = Command::new("sudo").args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(SupportError::CommandFailed {
            command,
            status: status.to_string(),
        })
    }
}

/// A module inserted with `insmod`, removed with `rmmod` on drop.
#[derive(Debug)]
pub struct LoadedModule {
    path: PathBuf,
}

impl LoadedModule {
    /// Insert the module at `path`.
    pub fn load(path: impl Into<PathBuf>) -> SupportResult<Self> {
        let path = path.into();
        sudo(&["insmod", &path.to_string_lossy()])?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if let Err(e) = sudo(&["rmmod", &self.path.to_string_lossy()]) {
            warn!(module = %self.path.display(), error = %e, "failed to unload module");
        }
    }
}

/// Clear the kernel log, load the module under test, and run `f` while it
/// is loaded. The module is unloaded when `f` returns or panics.
pub fn with_kernel_module<F, R>(f: F) -> SupportResult<R>
where
    F: FnOnce() -> R,
{
    let path = kernel_module_path()?;
    sudo(&["dmesg", "-C"])?;
    let _module = LoadedModule::load(path)?;
    Ok(f())
}
