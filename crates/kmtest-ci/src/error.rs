//! Error types for kmtest-ci

use std::path::PathBuf;

use thiserror::Error;

use crate::stage::Stage;

/// Errors that can occur while driving the pipeline
#[derive(Error, Debug)]
pub enum HarnessError {
    /// External command exited non-zero (or was killed by a signal)
    #[error("external command failed: `{command}` ({})", describe_exit(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },

    /// External command exceeded the per-stage timeout and was killed
    #[error("external command timed out after {timeout_secs}s: `{command}`")]
    CommandTimedOut { command: String, timeout_secs: u64 },

    /// External command could not be started at all
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A stage reported success but its artifact is not where it should be
    #[error("{stage} reported success but {} does not exist", expected.display())]
    ArtifactNotFound { stage: Stage, expected: PathBuf },

    /// Archive discovery found more than one candidate
    #[error("expected exactly one archive in {}, found {}", dir.display(), candidates.len())]
    AmbiguousArtifact {
        dir: PathBuf,
        candidates: Vec<PathBuf>,
    },

    /// Base directory could not be listed
    #[error("failed to scan {}: {source}", dir.display())]
    Scan {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HarnessError {
    /// Exit code to surface to the caller of the harness.
    ///
    /// Child exit codes are propagated as-is; everything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            HarnessError::CommandFailed {
                exit_code: Some(code),
                ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Result type for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display_carries_command_and_code() {
        let err = HarnessError::CommandFailed {
            command: "cargo xbuild".to_string(),
            exit_code: Some(101),
        };
        let msg = err.to_string();
        assert!(msg.contains("cargo xbuild"));
        assert!(msg.contains("101"));
    }

    #[test]
    fn test_exit_code_propagates_child_code() {
        let err = HarnessError::CommandFailed {
            command: "make".to_string(),
            exit_code: Some(2),
        };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_defaults_to_one() {
        let signalled = HarnessError::CommandFailed {
            command: "make".to_string(),
            exit_code: None,
        };
        assert_eq!(signalled.exit_code(), 1);
        assert!(signalled.to_string().contains("signal"));

        let missing = HarnessError::ArtifactNotFound {
            stage: Stage::NativeLink,
            expected: PathBuf::from("/tmp/testmodule.ko"),
        };
        assert_eq!(missing.exit_code(), 1);
    }
}
