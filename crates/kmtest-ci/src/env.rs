//! Per-invocation environment overlays.
//!
//! An [`EnvOverlay`] is merged on top of the ambient environment for exactly
//! one child process. It is never written back into the harness's own
//! process environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Directory searched by the cross-compiler for target-description files.
pub const RUST_TARGET_PATH: &str = "RUST_TARGET_PATH";
/// Compiler flags; carries the strict-warnings switch.
pub const RUSTFLAGS: &str = "RUSTFLAGS";
/// Build-output directory override.
pub const CARGO_TARGET_DIR: &str = "CARGO_TARGET_DIR";
/// Sysroot location for the cross-compiler.
pub const XBUILD_SYSROOT_PATH: &str = "XBUILD_SYSROOT_PATH";
/// Absolute path of the linked kernel module, read by the test process.
pub const KERNEL_MODULE: &str = "KERNEL_MODULE";
/// Test harness thread count.
pub const RUST_TEST_THREADS: &str = "RUST_TEST_THREADS";

/// Value of `RUSTFLAGS` when warnings are errors.
pub const STRICT_WARNINGS_FLAGS: &str = "-Dwarnings";

/// Variables layered on top of the ambient environment for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvOverlay {
    vars: BTreeMap<String, String>,
}

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Builder form of [`EnvOverlay::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Layer `other` on top of `self`; `other` wins on conflicts.
    pub fn merge(&mut self, other: &EnvOverlay) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvOverlay {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overlay = EnvOverlay::new();
        for (k, v) in iter {
            overlay.set(k, v);
        }
        overlay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_value() {
        let mut env = EnvOverlay::new();
        env.set(RUSTFLAGS, "-Cdebuginfo=0");
        env.set(RUSTFLAGS, STRICT_WARNINGS_FLAGS);
        assert_eq!(env.get(RUSTFLAGS), Some("-Dwarnings"));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn test_merge_other_wins() {
        let mut base = EnvOverlay::new()
            .with(CARGO_TARGET_DIR, "/a")
            .with(RUST_TARGET_PATH, "/targets");
        let top = EnvOverlay::new().with(CARGO_TARGET_DIR, "/b");
        base.merge(&top);

        assert_eq!(base.get(CARGO_TARGET_DIR), Some("/b"));
        assert_eq!(base.get(RUST_TARGET_PATH), Some("/targets"));
    }

    #[test]
    fn test_iteration_is_sorted() {
        let env: EnvOverlay = [("ZED", "1"), ("ALPHA", "2")].into_iter().collect();
        let keys: Vec<&str> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["ALPHA", "ZED"]);
    }

    #[test]
    fn test_overlay_does_not_touch_process_env() {
        let env = EnvOverlay::new().with("KMTEST_OVERLAY_ONLY", "1");
        assert_eq!(env.get("KMTEST_OVERLAY_ONLY"), Some("1"));
        assert!(std::env::var("KMTEST_OVERLAY_ONLY").is_err());
    }
}
