//! Policy document loading.
//!
//! The policy is a free-form JSON document produced by an external
//! evaluator (`nix-instantiate --eval --strict --json <file>`). This
//! module parses it into a typed [`Policy`] with the defaults spelled out
//! in the specification; unknown top-level keys are ignored by `serde`,
//! and unknown per-type keys are warned about via [`TypePolicy`]'s
//! `#[serde(flatten)]` catch-all field. `#[serde(deny_unknown_fields)]` is
//! deliberately not used anywhere here, matching the source's tolerance of
//! extra keys.

mod system_type;
mod r#type;

pub use system_type::SystemType;
pub use r#type::TypePolicy;

use crate::error::{ControllerError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

fn default_tag() -> String {
    "hydra-provisioned".to_string()
}

fn default_status_command() -> Vec<String> {
    vec!["hydra-queue-runner".to_string(), "--status".to_string()]
}

/// The top-level policy document, parsed from the evaluator's stdout.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default = "default_tag")]
    pub tag: String,

    #[serde(default = "default_status_command")]
    pub status_command: Vec<String>,

    #[serde(default)]
    pub update_command: Option<Vec<String>>,

    #[serde(default)]
    pub system_types: HashMap<String, TypePolicy>,
}

impl Policy {
    /// Invoke the policy evaluator and parse its stdout.
    ///
    /// A non-zero exit or unparseable output is fatal: the run aborts
    /// before any side effect, per spec.md §7.
    pub async fn load(config_path: &Path) -> Result<Self> {
        let output = Command::new("nix-instantiate")
            .arg("--eval")
            .arg("--strict")
            .arg("--json")
            .arg(config_path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ControllerError::PolicyExec {
                path: config_path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(ControllerError::PolicyExitStatus {
                path: config_path.to_path_buf(),
                status: output.status.code().unwrap_or(-1),
            });
        }

        let mut policy: Policy = serde_json::from_slice(&output.stdout)?;
        policy.warn_on_unknown_fields();
        policy.drop_invalid_system_types();
        Ok(policy)
    }

    /// Top-level unknown keys are silently ignored by `serde` (spec.md §9);
    /// per-type unknown keys land in [`TypePolicy::unknown_fields`] instead
    /// of being discarded, so they can be warned about here.
    fn warn_on_unknown_fields(&self) {
        for (type_name, type_policy) in &self.system_types {
            for key in type_policy.unknown_fields.keys() {
                warn!(r#type = %type_name, key = %key, "unknown key in system type policy");
            }
        }
    }

    /// Drop any per-type policy that fails [`TypePolicy::validate`] (e.g.
    /// `minMachines > maxMachines`) so it can never reach `sizer::size`,
    /// whose `u32::clamp` call panics on an inverted range. The offending
    /// type then falls through to the Reconciler's existing "cannot
    /// provision type T" path for any backlog reported against it — this
    /// is also enforced directly inside `reconciler::reconcile`, so the
    /// invariant holds for any `Policy` value, not only ones built via
    /// `load`.
    fn drop_invalid_system_types(&mut self) {
        self.system_types.retain(|type_name, type_policy| match type_policy.validate() {
            Ok(()) => true,
            Err(msg) => {
                warn!(r#type = %type_name, error = %msg, "ignoring invalid system type policy");
                false
            }
        });
    }

    pub fn type_policy(&self, type_name: &str) -> Option<&TypePolicy> {
        self.system_types.get(type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let json = r#"{ "systemTypes": {} }"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.tag, "hydra-provisioned");
        assert_eq!(policy.status_command, vec!["hydra-queue-runner", "--status"]);
        assert!(policy.update_command.is_none());
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let json = r#"{ "systemTypes": {}, "somethingElse": 42 }"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.tag, "hydra-provisioned");
    }

    #[test]
    fn unknown_per_type_keys_are_captured_for_warning() {
        let json = r#"{
            "systemTypes": {
                "x86_64-linux": { "nixopsExpr": "/x", "frobnicate": true }
            }
        }"#;
        let policy: Policy = serde_json::from_str(json).unwrap();
        let type_policy = policy.type_policy("x86_64-linux").unwrap();
        assert!(type_policy.unknown_fields.contains_key("frobnicate"));
        // Doesn't panic and doesn't reject the document.
        policy.warn_on_unknown_fields();
    }

    #[test]
    fn invalid_type_policy_is_dropped_not_left_in_place() {
        let json = r#"{
            "systemTypes": {
                "x86_64-linux": { "nixopsExpr": "/x", "minMachines": 5, "maxMachines": 2 },
                "aarch64-linux": { "nixopsExpr": "/y", "minMachines": 0, "maxMachines": 2 }
            }
        }"#;
        let mut policy: Policy = serde_json::from_str(json).unwrap();
        policy.drop_invalid_system_types();
        assert!(policy.type_policy("x86_64-linux").is_none());
        assert!(policy.type_policy("aarch64-linux").is_some());
    }
}
