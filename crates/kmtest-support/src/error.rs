//! Error types for kmtest-support

use thiserror::Error;

/// Errors that can occur while preparing the kernel-module environment
#[derive(Error, Debug)]
pub enum SupportError {
    /// `KERNEL_MODULE` is not set; the test was not started by the harness
    #[error("KERNEL_MODULE is not set; run tests through the kmtest harness")]
    ModulePathUnset,

    /// A privileged helper command failed
    #[error("`{command}` failed ({status})")]
    CommandFailed { command: String, status: String },

    /// Device not listed in /proc/devices
    #[error("device '{0}' not found in /proc/devices")]
    DeviceNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for support operations
pub type SupportResult<T> = std::result::Result<T, SupportError>;
