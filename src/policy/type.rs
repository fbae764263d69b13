use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

fn default_runnables_per_machine() -> u32 {
    10
}

fn default_max_machines() -> u32 {
    1
}

fn default_ssh_key() -> String {
    "-".to_string()
}

fn default_max_jobs() -> u32 {
    1
}

fn default_speed_factor() -> u32 {
    1
}

/// Per-machine-type policy (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypePolicy {
    pub nixops_expr: PathBuf,

    #[serde(default)]
    pub nix_path: Vec<PathBuf>,

    #[serde(default = "default_runnables_per_machine")]
    pub runnables_per_machine: u32,

    #[serde(default)]
    pub ignored_runnables: u32,

    #[serde(default)]
    pub min_machines: u32,

    #[serde(default = "default_max_machines")]
    pub max_machines: u32,

    #[serde(default)]
    pub grace_period: u64,

    #[serde(default)]
    pub stop_on_idle: bool,

    #[serde(default = "default_ssh_key")]
    pub ssh_key: String,

    #[serde(default = "default_max_jobs")]
    pub max_jobs: u32,

    #[serde(default = "default_speed_factor")]
    pub speed_factor: u32,

    /// Catches any key this struct doesn't name, so the loader can warn
    /// about it (spec.md §9: "unknown per-type keys warned about") without
    /// rejecting the document the way an unknown top-level key does not.
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl TypePolicy {
    /// `min ≤ max` invariant from spec.md §3. Values that violate it are
    /// not silently clamped — the caller (see `main`) drops this type's
    /// policy entirely rather than size against a backwards clamp range,
    /// so a misconfigured type fails loudly instead of producing a
    /// confusing sizing result later.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_machines > self.max_machines {
            return Err(format!(
                "minMachines ({}) must be <= maxMachines ({})",
                self.min_machines, self.max_machines
            ));
        }
        Ok(())
    }
}
