//! The deployment-engine capability interface (spec.md §6).
//!
//! The controller never talks to the deployment engine directly; it goes
//! through this trait, so the reconciliation logic is portable across
//! backends and can be exercised in tests against [`fake::FakeEngine`]
//! instead of a real `nixops` state file.

pub mod fake;
pub mod subprocess;

use crate::error::EngineError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Lifecycle state of a deployment's machine resource. Only `Up` is
/// usable; `Up`/`Starting` count as "active" for retirement purposes
/// (spec.md §3). Backends may report states this controller doesn't need
/// to distinguish; those fold into `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentState {
    Missing,
    Starting,
    Up,
    Stopped,
    Other(String),
}

impl DeploymentState {
    pub fn is_active(&self) -> bool {
        matches!(self, DeploymentState::Up | DeploymentState::Starting)
    }
}

/// Opaque handle to a deployment, stable for the lifetime of the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentId(pub String);

impl std::fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of the single machine resource a deployment manages, if it
/// has materialized one.
#[derive(Debug, Clone)]
pub struct MachineInfo {
    pub ssh_name: String,
    pub public_host_key: Option<Vec<u8>>,
    /// Absolute unix seconds of the next billing boundary, or `None` if
    /// the backend doesn't track paid time for this machine.
    pub next_charge_time: Option<i64>,
}

/// A point-in-time snapshot of one deployment, as returned by
/// [`DeploymentEngine::list`].
#[derive(Debug, Clone)]
pub struct DeploymentInfo {
    pub id: DeploymentId,
    pub args: HashMap<String, String>,
    pub machine: Option<MachineInfo>,
    pub state: DeploymentState,
}

impl DeploymentInfo {
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }
}

/// Shared guard used by engine implementations before setting an argstr
/// value: the source has a `FIXME: escaping` comment around stripping
/// `"` from arg values; this crate rejects such values outright instead.
pub fn validate_argstr(value: &str) -> Result<(), EngineError> {
    if value.contains('"') {
        Err(EngineError::new(format!(
            "deployment argument value must not contain '\"': {value:?}"
        )))
    } else {
        Ok(())
    }
}

/// The narrow interface onto the deployment engine (spec.md §6). All
/// methods are fallible except enumeration and state inspection, which
/// degrade to an "unusable" answer rather than erroring (mirroring the
/// source's tolerance of a failed `check()`).
#[async_trait]
pub trait DeploymentEngine: Send + Sync {
    /// All deployments currently tagged for this controller.
    async fn list(&self, tag: &str) -> Vec<DeploymentInfo>;

    /// Register a new deployment with the given name, tag, and type.
    /// Rejects values containing `"` rather than silently stripping them
    /// (spec.md §9, resolving the source's escaping TODO).
    async fn create(
        &self,
        name: &str,
        tag: &str,
        type_name: &str,
    ) -> Result<DeploymentId, EngineError>;

    /// Point a deployment at its recipe and search path, ahead of
    /// deploying it.
    async fn set_recipe(
        &self,
        id: &DeploymentId,
        expr: &Path,
        nix_path: &[PathBuf],
    ) -> Result<(), EngineError>;

    /// Probe the deployment's live state. Not internally cached; callers
    /// that want periodic caching per spec.md §9's open question do so
    /// above this trait.
    async fn check(&self, id: &DeploymentId) -> DeploymentState;

    /// Deploy with `check=true`, additionally searching `extra_nix_path`
    /// (the controller's own module path) for recipe imports.
    async fn deploy(&self, id: &DeploymentId, extra_nix_path: &Path) -> Result<(), EngineError>;

    /// Touch the `/run/keep-alive` sentinel over an ssh session to the
    /// deployment's machine.
    async fn touch_keep_alive(&self, id: &DeploymentId) -> Result<(), EngineError>;

    async fn stop(&self, id: &DeploymentId) -> Result<(), EngineError>;

    async fn destroy(&self, id: &DeploymentId) -> Result<(), EngineError>;

    async fn delete(&self, id: &DeploymentId) -> Result<(), EngineError>;
}
