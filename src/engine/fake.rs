//! In-memory deployment engine used by the test suite and by the
//! property tests in spec.md §8. Lets a test script state transitions
//! and inject failures on `check`/`deploy`/`touch_keep_alive` without a
//! real `nixops` state file.

use super::{validate_argstr, DeploymentId, DeploymentInfo, DeploymentState, MachineInfo};
use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct FakeDeployment {
    args: HashMap<String, String>,
    state: DeploymentState,
    machine: Option<MachineInfo>,
    recipe: Option<(PathBuf, Vec<PathBuf>)>,
    fail_check: bool,
    fail_deploy: bool,
    fail_keep_alive: bool,
    deploy_calls: u32,
    stopped: bool,
    destroyed: bool,
}

/// A scripted in-memory engine. Not thread-contended in practice (the
/// controller is single-threaded) but uses a `Mutex` so the trait's
/// `Send + Sync` bound is satisfiable without `unsafe`.
#[derive(Default)]
pub struct FakeEngine {
    deployments: Mutex<HashMap<String, FakeDeployment>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a deployment directly, bypassing `create`, for test setup.
    pub fn seed(
        &self,
        name: &str,
        tag: &str,
        type_name: &str,
        state: DeploymentState,
        machine: Option<MachineInfo>,
    ) {
        let mut args = HashMap::new();
        args.insert("tag".to_string(), tag.to_string());
        args.insert("type".to_string(), type_name.to_string());
        self.deployments.lock().unwrap().insert(
            name.to_string(),
            FakeDeployment {
                args,
                state,
                machine,
                recipe: None,
                fail_check: false,
                fail_deploy: false,
                fail_keep_alive: false,
                deploy_calls: 0,
                stopped: false,
                destroyed: false,
            },
        );
    }

    pub fn set_fail_check(&self, name: &str, fail: bool) {
        if let Some(d) = self.deployments.lock().unwrap().get_mut(name) {
            d.fail_check = fail;
        }
    }

    pub fn set_fail_deploy(&self, name: &str, fail: bool) {
        if let Some(d) = self.deployments.lock().unwrap().get_mut(name) {
            d.fail_deploy = fail;
        }
    }

    pub fn set_fail_keep_alive(&self, name: &str, fail: bool) {
        if let Some(d) = self.deployments.lock().unwrap().get_mut(name) {
            d.fail_keep_alive = fail;
        }
    }

    pub fn set_state(&self, name: &str, state: DeploymentState) {
        if let Some(d) = self.deployments.lock().unwrap().get_mut(name) {
            d.state = state;
        }
    }

    pub fn deploy_calls(&self, name: &str) -> u32 {
        self.deployments
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.deploy_calls)
            .unwrap_or(0)
    }

    pub fn is_stopped(&self, name: &str) -> bool {
        self.deployments
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.stopped)
            .unwrap_or(false)
    }

    pub fn is_destroyed(&self, name: &str) -> bool {
        self.deployments
            .lock()
            .unwrap()
            .get(name)
            .map(|d| d.destroyed)
            .unwrap_or(false)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.deployments.lock().unwrap().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.deployments.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl super::DeploymentEngine for FakeEngine {
    async fn list(&self, tag: &str) -> Vec<DeploymentInfo> {
        self.deployments
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, d)| d.args.get("tag").map(String::as_str) == Some(tag))
            .map(|(name, d)| DeploymentInfo {
                id: DeploymentId(name.clone()),
                args: d.args.clone(),
                machine: d.machine.clone(),
                state: d.state.clone(),
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
        let mut deployments = self.deployments.lock().unwrap();
        if deployments.contains_key(name) {
            return Err(EngineError::new(format!("deployment {name} already exists")));
        }
        let mut args = HashMap::new();
        args.insert("tag".to_string(), tag.to_string());
        args.insert("type".to_string(), type_name.to_string());
        deployments.insert(
            name.to_string(),
            FakeDeployment {
                args,
                state: DeploymentState::Missing,
                machine: None,
                recipe: None,
                fail_check: false,
                fail_deploy: false,
                fail_keep_alive: false,
                deploy_calls: 0,
                stopped: false,
                destroyed: false,
            },
        );
        Ok(DeploymentId(name.to_string()))
    }

    async fn set_recipe(
        &self,
        id: &DeploymentId,
        expr: &Path,
        nix_path: &[PathBuf],
    ) -> Result<(), EngineError> {
        let mut deployments = self.deployments.lock().unwrap();
        let d = deployments
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::new(format!("no such deployment: {}", id.0)))?;
        d.recipe = Some((expr.to_path_buf(), nix_path.to_vec()));
        Ok(())
    }

    async fn check(&self, id: &DeploymentId) -> DeploymentState {
        let mut deployments = self.deployments.lock().unwrap();
        let Some(d) = deployments.get_mut(&id.0) else {
            return DeploymentState::Missing;
        };
        if d.fail_check {
            d.state = DeploymentState::Other("unreachable".to_string());
        }
        d.state.clone()
    }

    async fn deploy(&self, id: &DeploymentId, _extra_nix_path: &Path) -> Result<(), EngineError> {
        let mut deployments = self.deployments.lock().unwrap();
        let d = deployments
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::new(format!("no such deployment: {}", id.0)))?;
        d.deploy_calls += 1;
        if d.fail_deploy {
            return Err(EngineError::new(format!("simulated deploy failure for {}", id.0)));
        }
        d.state = DeploymentState::Up;
        if d.machine.is_none() {
            d.machine = Some(MachineInfo {
                ssh_name: format!("{}.example", id.0),
                public_host_key: Some(b"fake-host-key".to_vec()),
                next_charge_time: None,
            });
        }
        Ok(())
    }

    async fn touch_keep_alive(&self, id: &DeploymentId) -> Result<(), EngineError> {
        let deployments = self.deployments.lock().unwrap();
        let d = deployments
            .get(&id.0)
            .ok_or_else(|| EngineError::new(format!("no such deployment: {}", id.0)))?;
        if d.fail_keep_alive {
            Err(EngineError::new(format!("simulated keep-alive failure for {}", id.0)))
        } else {
            Ok(())
        }
    }

    async fn stop(&self, id: &DeploymentId) -> Result<(), EngineError> {
        let mut deployments = self.deployments.lock().unwrap();
        let d = deployments
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::new(format!("no such deployment: {}", id.0)))?;
        d.stopped = true;
        d.state = DeploymentState::Stopped;
        Ok(())
    }

    async fn destroy(&self, id: &DeploymentId) -> Result<(), EngineError> {
        let mut deployments = self.deployments.lock().unwrap();
        let d = deployments
            .get_mut(&id.0)
            .ok_or_else(|| EngineError::new(format!("no such deployment: {}", id.0)))?;
        d.destroyed = true;
        d.state = DeploymentState::Missing;
        Ok(())
    }

    async fn delete(&self, id: &DeploymentId) -> Result<(), EngineError> {
        self.deployments.lock().unwrap().remove(&id.0);
        Ok(())
    }
}
