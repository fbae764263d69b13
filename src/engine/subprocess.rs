//! A `nixops`-CLI-backed [`super::DeploymentEngine`].
//!
//! The real deployment engine is an external collaborator (spec.md §1);
//! this implementation is a best-effort translation of the source's
//! direct `nixops.statefile` library use into subprocess calls against
//! the `nixops` command-line tool, so the binary has a working default
//! backend. It is not the focus of this crate — the reconciliation logic
//! in [`crate::reconciler`] is.

use super::{validate_argstr, DeploymentId, DeploymentInfo, DeploymentState, MachineInfo};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Path to the `nixops` executable and the state file it operates on.
pub struct NixopsEngine {
    nixops_bin: PathBuf,
    state_file: PathBuf,
}

impl NixopsEngine {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            nixops_bin: PathBuf::from("nixops"),
            state_file: state_file.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.nixops_bin);
        cmd.arg("--state").arg(&self.state_file);
        cmd
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, EngineError> {
        let output = self
            .command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::new(format!("failed to exec nixops {args:?}: {e}")))?;

        if !output.status.success() {
            return Err(EngineError::new(format!(
                "nixops {args:?} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output.stdout)
    }
}

fn parse_state(raw: &str) -> DeploymentState {
    match raw {
        "missing" => DeploymentState::Missing,
        "starting" => DeploymentState::Starting,
        "up" => DeploymentState::Up,
        "stopped" => DeploymentState::Stopped,
        other => DeploymentState::Other(other.to_string()),
    }
}

#[async_trait]
impl super::DeploymentEngine for NixopsEngine {
    async fn list(&self, tag: &str) -> Vec<DeploymentInfo> {
        let raw = match self.run(&["export"]).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        let parsed: serde_json::Value = match serde_json::from_slice(&raw) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        let Some(entries) = parsed.as_object() else {
            return Vec::new();
        };

        entries
            .values()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?.to_string();
                let args: HashMap<String, String> = entry
                    .get("args")
                    .and_then(|v| v.as_object())
                    .map(|obj| {
                        obj.iter()
                            .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                            .collect()
                    })
                    .unwrap_or_default();

                if args.get("tag").map(String::as_str) != Some(tag) {
                    return None;
                }

                let machine = entry.get("machine").and_then(|m| {
                    let ssh_name = m.get("sshName")?.as_str()?.to_string();
                    let public_host_key = m
                        .get("publicHostKey")
                        .and_then(|k| k.as_str())
                        .map(|s| s.as_bytes().to_vec());
                    let next_charge_time = m.get("nextChargeTime").and_then(|t| t.as_i64());
                    Some(MachineInfo {
                        ssh_name,
                        public_host_key,
                        next_charge_time,
                    })
                });

                let state = entry
                    .get("state")
                    .and_then(|s| s.as_str())
                    .map(parse_state)
                    .unwrap_or(DeploymentState::Missing);

                Some(DeploymentInfo {
                    id: DeploymentId(name),
                    args,
                    machine,
                    state,
                })
            })
            .collect()
    }

    async fn create(
        &self,
        name: &str,
        tag: &str,
        type_name: &str,
    ) -> Result<DeploymentId, EngineError> {
        validate_argstr(tag)?;
        validate_argstr(type_name)?;
        self.run(&["create", "--name", name]).await?;
        self.run(&["set-args", "--deployment", name, "--argstr", "tag", tag])
            .await?;
        self.run(&[
            "set-args",
            "--deployment",
            name,
            "--argstr",
            "type",
            type_name,
        ])
        .await?;
        Ok(DeploymentId(name.to_string()))
    }

    async fn set_recipe(
        &self,
        id: &DeploymentId,
        expr: &Path,
        nix_path: &[PathBuf],
    ) -> Result<(), EngineError> {
        let expr = expr.to_string_lossy().to_string();
        let mut args = vec!["modify".to_string(), "--deployment".to_string(), id.0.clone(), expr];
        for p in nix_path {
            args.push("-I".to_string());
            args.push(p.to_string_lossy().to_string());
        }
        let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&args_ref).await.map(|_| ())
    }

    async fn check(&self, id: &DeploymentId) -> DeploymentState {
        match self.run(&["check", "--deployment", &id.0]).await {
            Ok(raw) => parse_state(String::from_utf8_lossy(&raw).trim()),
            Err(_) => DeploymentState::Other("check-failed".to_string()),
        }
    }

    async fn deploy(&self, id: &DeploymentId, extra_nix_path: &Path) -> Result<(), EngineError> {
        let extra = format!("hydra-provisioner={}", extra_nix_path.to_string_lossy());
        self.run(&["deploy", "--deployment", &id.0, "--check", "-I", &extra])
            .await
            .map(|_| ())
    }

    async fn touch_keep_alive(&self, id: &DeploymentId) -> Result<(), EngineError> {
        self.run(&["ssh", "--deployment", &id.0, "--", "touch", "/run/keep-alive"])
            .await
            .map(|_| ())
    }

    async fn stop(&self, id: &DeploymentId) -> Result<(), EngineError> {
        self.run(&["stop", "--deployment", &id.0]).await.map(|_| ())
    }

    async fn destroy(&self, id: &DeploymentId) -> Result<(), EngineError> {
        self.run(&["destroy", "--deployment", &id.0, "--confirm"])
            .await
            .map(|_| ())
    }

    async fn delete(&self, id: &DeploymentId) -> Result<(), EngineError> {
        self.run(&["delete", "--deployment", &id.0]).await.map(|_| ())
    }
}
