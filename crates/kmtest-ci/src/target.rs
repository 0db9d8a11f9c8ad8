//! Cross-compilation targets and artifact naming.
//!
//! [`ArtifactLayout`] is the only place that turns a project name into an
//! archive path. The compile stage validates against it and the link stage
//! consumes what it returns, so both agree on every byte of the path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};
use crate::scan::Project;
use crate::stage::Stage;

/// Default built-in target for kernel-module code.
pub const DEFAULT_TARGET: &str = "x86_64-linux-kernel-module";

/// Cross-compilation target: a name resolved through the target search
/// path, or a path to a target-description file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSpec {
    Named(String),
    File(PathBuf),
}

impl TargetSpec {
    /// Parse a CLI value: anything ending in `.json` or containing a path
    /// separator is a file.
    pub fn parse(value: &str) -> Self {
        if value.ends_with(".json") || value.contains(std::path::MAIN_SEPARATOR) {
            TargetSpec::File(PathBuf::from(value))
        } else {
            TargetSpec::Named(value.to_string())
        }
    }

    /// Directory name the cross-compiler uses under its output root.
    pub fn triple(&self) -> String {
        match self {
            TargetSpec::Named(name) => name.clone(),
            TargetSpec::File(path) => path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Value passed to `--target`.
    pub fn cli_arg(&self) -> String {
        match self {
            TargetSpec::Named(name) => name.clone(),
            TargetSpec::File(path) => path.to_string_lossy().into_owned(),
        }
    }

    /// Resolve relative target files against `base`.
    pub fn resolved(&self, base: &Path) -> Self {
        match self {
            TargetSpec::File(path) if path.is_relative() => TargetSpec::File(base.join(path)),
            other => other.clone(),
        }
    }
}

impl Default for TargetSpec {
    fn default() -> Self {
        TargetSpec::Named(DEFAULT_TARGET.to_string())
    }
}

/// Build profile of the cross-compiled archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildProfile {
    #[default]
    Debug,
    Release,
}

impl BuildProfile {
    pub fn dir_name(&self) -> &'static str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        }
    }

    /// Extra flag for cargo-style tools.
    pub fn cargo_flag(&self) -> Option<&'static str> {
        match self {
            BuildProfile::Debug => None,
            BuildProfile::Release => Some("--release"),
        }
    }
}

/// Where build output goes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `<project>/target`
    ProjectScoped,

    /// `<base>/target`, shared by every project
    #[default]
    Shared,
}

/// How the archive produced by the cross-compiler is named.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveNaming {
    /// `lib<name>.a`
    Crate,

    /// `lib<name>_tests.a`
    #[default]
    TestCrate,

    /// The single `lib*.a` in the profile directory
    Discovered,
}

/// A concrete artifact on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
}

impl ArtifactRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File name without extension, e.g. `libfoo_bar_tests`.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Fail with `ArtifactNotFound` unless the file exists.
    pub fn ensure_exists(&self, stage: Stage) -> HarnessResult<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(HarnessError::ArtifactNotFound {
                stage,
                expected: self.path.clone(),
            })
        }
    }

    /// Remove a leftover file at this path so only a fresh build can
    /// satisfy [`ensure_exists`](Self::ensure_exists).
    pub fn remove_stale(&self) -> HarnessResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed stale artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// SHA-256 of the file contents, hex encoded.
    pub fn digest(&self) -> HarnessResult<String> {
        let content = std::fs::read(&self.path)?;
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Computes output directories and archive paths for projects.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    base: PathBuf,
    target: TargetSpec,
    profile: BuildProfile,
    output: OutputLayout,
    naming: ArchiveNaming,
}

impl ArtifactLayout {
    pub fn new(
        base: impl Into<PathBuf>,
        target: TargetSpec,
        profile: BuildProfile,
        output: OutputLayout,
        naming: ArchiveNaming,
    ) -> Self {
        Self {
            base: base.into(),
            target,
            profile,
            output,
            naming,
        }
    }

    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    pub fn profile(&self) -> BuildProfile {
        self.profile
    }

    /// Directory passed to the cross-compiler as its output root.
    pub fn output_root(&self, project: &Project) -> PathBuf {
        match self.output {
            OutputLayout::ProjectScoped => project.dir.join("target"),
            OutputLayout::Shared => self.base.join("target"),
        }
    }

    /// `<output_root>/<triple>/<profile>`
    pub fn profile_dir(&self, project: &Project) -> PathBuf {
        self.output_root(project)
            .join(self.target.triple())
            .join(self.profile.dir_name())
    }

    /// Archive file name, when it is computable before the build.
    pub fn archive_file_name(&self, project: &Project) -> Option<String> {
        match self.naming {
            ArchiveNaming::Crate => Some(format!("lib{}.a", project.normalized_name())),
            ArchiveNaming::TestCrate => Some(format!("lib{}_tests.a", project.normalized_name())),
            ArchiveNaming::Discovered => None,
        }
    }

    /// Expected archive path, when computable before the build.
    pub fn expected_archive(&self, project: &Project) -> Option<ArtifactRef> {
        self.archive_file_name(project)
            .map(|name| ArtifactRef::new(self.profile_dir(project).join(name)))
    }

    /// Locate the archive after a successful cross-compile.
    pub fn resolve_archive(&self, project: &Project) -> HarnessResult<ArtifactRef> {
        if let Some(expected) = self.expected_archive(project) {
            expected.ensure_exists(Stage::CrossCompile)?;
            return Ok(expected);
        }

        let dir = self.profile_dir(project);
        let mut candidates = list_archives(&dir);
        match candidates.len() {
            0 => Err(HarnessError::ArtifactNotFound {
                stage: Stage::CrossCompile,
                expected: dir.join("lib*.a"),
            }),
            1 => Ok(ArtifactRef::new(candidates.remove(0))),
            _ => Err(HarnessError::AmbiguousArtifact { dir, candidates }),
        }
    }
}

fn list_archives(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut archives: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("lib") && n.ends_with(".a"))
                .unwrap_or(false)
        })
        .collect();
    archives.sort();
    archives
}
