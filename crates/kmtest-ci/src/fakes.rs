//! In-memory fakes for the command runner (testing only)
//!
//! [`RecordingRunner`] records every invocation instead of spawning it.
//! Failures and produced files are scripted by matching a substring of the
//! rendered command line.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{HarnessError, HarnessResult};
use crate::runner::{CommandRunner, Invocation};

/// Command runner that records invocations and plays back a script.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    failures: Vec<(String, i32)>,
    outputs: Vec<(String, PathBuf)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `exit_code` when the command line contains `pattern`.
    pub fn failing_on(mut self, pattern: impl Into<String>, exit_code: i32) -> Self {
        self.failures.push((pattern.into(), exit_code));
        self
    }

    /// Create `path` (and its parents) when the command line contains
    /// `pattern` and the command succeeds.
    pub fn producing(mut self, pattern: impl Into<String>, path: impl AsRef<Path>) -> Self {
        self.outputs.push((pattern.into(), path.as_ref().to_path_buf()));
        self
    }

    /// Everything run so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Rendered command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }

    /// Number of recorded command lines containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> HarnessResult<()> {
        let line = invocation.to_string();
        self.invocations.lock().unwrap().push(invocation.clone());

        if let Some((_, code)) = self.failures.iter().find(|(p, _)| line.contains(p.as_str())) {
            return Err(HarnessError::CommandFailed {
                command: line,
                exit_code: Some(*code),
            });
        }

        for (pattern, path) in &self.outputs {
            if line.contains(pattern.as_str()) {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, line.as_bytes())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_in_order() {
        let runner = RecordingRunner::new();
        runner.run(&Invocation::new("a")).await.unwrap();
        runner.run(&Invocation::new("b").arg("x")).await.unwrap();
        assert_eq!(runner.command_lines(), vec!["a", "b x"]);
    }

    #[tokio::test]
    async fn test_scripted_failure_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/out.a");
        let runner = RecordingRunner::new()
            .failing_on("make", 2)
            .producing("xbuild", &out);

        runner
            .run(&Invocation::new("cargo").arg("xbuild"))
            .await
            .unwrap();
        assert!(out.is_file());

        let err = runner.run(&Invocation::new("make")).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(runner.count_matching("make"), 1);
    }
}
