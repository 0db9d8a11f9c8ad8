//! Pipeline stage identities.

use serde::{Deserialize, Serialize};

/// The three stages every test project goes through, in order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Cross-compile the project into a static archive
    CrossCompile,

    /// Link the archive into a loadable kernel module
    NativeLink,

    /// Run the project's tests against the kernel module
    TestExecution,
}

impl Stage {
    /// Stages in execution order.
    pub const ORDER: [Stage; 3] = [Stage::CrossCompile, Stage::NativeLink, Stage::TestExecution];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::CrossCompile => "cross_compile",
            Stage::NativeLink => "native_link",
            Stage::TestExecution => "test_execution",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::CrossCompile.name(), "cross_compile");
        assert_eq!(Stage::NativeLink.name(), "native_link");
        assert_eq!(Stage::TestExecution.name(), "test_execution");
    }

    #[test]
    fn test_stage_order_is_sorted() {
        assert!(Stage::ORDER.windows(2).all(|w| w[0] < w[1]));
        assert!(Stage::CrossCompile < Stage::TestExecution);
    }

    #[test]
    fn test_stage_serde_snake_case() {
        let json = serde_json::to_string(&Stage::NativeLink).unwrap();
        assert_eq!(json, "\"native_link\"");
        let back: Stage = serde_json::from_str("\"test_execution\"").unwrap();
        assert_eq!(back, Stage::TestExecution);
    }
}
