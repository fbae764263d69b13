//! Dispatcher status fetching and architecture folding (spec.md §4.1).

use crate::policy::SystemType;
use serde::Deserialize;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::warn;

/// Per-type backlog telemetry reported by the dispatcher.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TypeStatus {
    #[serde(default)]
    pub runnable: u64,
    #[serde(default)]
    pub last_active: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MachineStatus {
    #[serde(default)]
    pub current_jobs: u64,
}

/// The normalized dispatcher status document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherStatus {
    pub status: String,
    #[serde(default)]
    pub uptime: i64,
    #[serde(default)]
    pub machine_types: HashMap<String, TypeStatus>,
    #[serde(default)]
    pub machines: HashMap<String, MachineStatus>,
}

impl DispatcherStatus {
    /// The synthesized "down" status used whenever the fetch fails or the
    /// dispatcher itself reports `down`. The run proceeds with this —
    /// retention and retirement still happen — it just contributes zero
    /// demand.
    pub fn down() -> Self {
        Self {
            status: "down".to_string(),
            uptime: 0,
            machine_types: HashMap::new(),
            machines: HashMap::new(),
        }
    }

    /// Fold every `i686-linux...` machine type into its `x86_64-linux...`
    /// counterpart, summing `runnable` counts (spec.md §4.1). Mutates in
    /// place.
    pub fn fold_architectures(&mut self) {
        let source_keys: Vec<String> = self
            .machine_types
            .keys()
            .filter(|k| SystemType::new((*k).clone()).as_str().starts_with("i686-linux"))
            .cloned()
            .collect();

        for key in source_keys {
            let Some(target_key) = SystemType::new(key.clone())
                .fold_i686_to_x86_64()
                .map(|t| t.as_str().to_string())
            else {
                continue;
            };

            let folded = self.machine_types.remove(&key).unwrap_or_default();
            match self.machine_types.get_mut(&target_key) {
                Some(target) => target.runnable += folded.runnable,
                None => {
                    self.machine_types.insert(target_key, folded);
                }
            }
        }
    }
}

/// Execute `status_command` and parse its stdout. Never returns an error
/// to the caller — any failure (non-zero exit, malformed JSON, a `down`
/// status) is folded into the synthesized [`DispatcherStatus::down`], per
/// spec.md §4.1 and §7.
pub async fn fetch(status_command: &[String]) -> DispatcherStatus {
    let Some((program, args)) = status_command.split_first() else {
        warn!("statusCommand is empty, treating dispatcher as down");
        return DispatcherStatus::down();
    };

    let output = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            warn!(status = ?output.status, "dispatcher status command exited non-zero");
            return DispatcherStatus::down();
        }
        Err(source) => {
            warn!(error = %source, "failed to run dispatcher status command");
            return DispatcherStatus::down();
        }
    };

    let mut status: DispatcherStatus = match serde_json::from_slice(&output.stdout) {
        Ok(status) => status,
        Err(source) => {
            warn!(error = %source, "failed to parse dispatcher status JSON");
            return DispatcherStatus::down();
        }
    };

    if status.status == "down" {
        return DispatcherStatus::down();
    }

    status.fold_architectures();
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_into_existing_target() {
        let json = r#"{
            "status": "up", "uptime": 100,
            "machineTypes": {
                "i686-linux:": {"runnable": 7, "lastActive": 0},
                "x86_64-linux:": {"runnable": 3, "lastActive": 0}
            },
            "machines": {}
        }"#;
        let mut status: DispatcherStatus = serde_json::from_str(json).unwrap();
        status.fold_architectures();
        assert_eq!(status.machine_types.len(), 1);
        assert_eq!(status.machine_types["x86_64-linux:"].runnable, 10);
    }

    #[test]
    fn folds_by_renaming_when_no_target_exists() {
        let json = r#"{
            "status": "up", "uptime": 100,
            "machineTypes": {
                "i686-linux:kvm": {"runnable": 4, "lastActive": 0}
            },
            "machines": {}
        }"#;
        let mut status: DispatcherStatus = serde_json::from_str(json).unwrap();
        status.fold_architectures();
        assert_eq!(status.machine_types.len(), 1);
        assert_eq!(status.machine_types["x86_64-linux:kvm"].runnable, 4);
    }
}
