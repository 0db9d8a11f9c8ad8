//! Test project discovery.
//!
//! A test project is an immediate subdirectory of the base directory that
//! carries a marker: a test-entry source file or a test directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HarnessError, HarnessResult};

/// How a directory identifies itself as a test project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum MarkerConvention {
    /// A regular file with this name, e.g. `tests.rs`
    TestFile(String),

    /// A directory with this name, e.g. `tests`
    TestDirectory(String),
}

impl MarkerConvention {
    pub fn test_file() -> Self {
        MarkerConvention::TestFile("tests.rs".to_string())
    }

    pub fn test_directory() -> Self {
        MarkerConvention::TestDirectory("tests".to_string())
    }

    pub fn name(&self) -> &str {
        match self {
            MarkerConvention::TestFile(name) | MarkerConvention::TestDirectory(name) => name,
        }
    }

    /// Whether `dir` carries this marker.
    pub fn matches(&self, dir: &Path) -> bool {
        let candidate = dir.join(self.name());
        match self {
            MarkerConvention::TestFile(_) => candidate.is_file(),
            MarkerConvention::TestDirectory(_) => candidate.is_dir(),
        }
    }
}

impl Default for MarkerConvention {
    fn default() -> Self {
        MarkerConvention::test_directory()
    }
}

/// A discovered test project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    /// Directory name; the project's identity.
    pub name: String,

    /// Absolute path of the project directory.
    pub dir: PathBuf,
}

impl Project {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    /// Name as the toolchain spells it in archive names: dashes become
    /// underscores.
    pub fn normalized_name(&self) -> String {
        self.name.replace('-', "_")
    }
}

/// Enumerates test projects under a base directory.
#[derive(Debug, Clone)]
pub struct ProjectScanner {
    base: PathBuf,
    marker: MarkerConvention,
}

impl ProjectScanner {
    pub fn new(base: impl Into<PathBuf>, marker: MarkerConvention) -> Self {
        Self {
            base: base.into(),
            marker,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// List marked subdirectories, sorted by name.
    ///
    /// Each call re-reads the directory.
    pub fn scan(&self) -> HarnessResult<Vec<Project>> {
        let scan_err = |source| HarnessError::Scan {
            dir: self.base.clone(),
            source,
        };

        let mut projects = Vec::new();
        for entry in std::fs::read_dir(&self.base).map_err(scan_err)? {
            let entry = entry.map_err(scan_err)?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!(path = %path.display(), "skipping directory with non UTF-8 name");
                continue;
            };

            if !self.marker.matches(&path) {
                debug!(project = %name, marker = %self.marker.name(), "no marker, skipping");
                continue;
            }

            projects.push(Project::new(name, path.clone()));
        }

        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }
}
