use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors — these abort the run before (or during) it completes.
///
/// Everything else (status fetch failure, a demoted liveness check, a
/// deploy failure, a keep-alive failure, a stop/destroy failure) is
/// swallowed at its call site and logged instead of being represented
/// here, per the error taxonomy in the specification.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("usage: hydra-provisioner <CONFIG-FILE>")]
    Usage,

    #[error("failed to evaluate policy file {path}: {source}")]
    PolicyExec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("policy evaluator exited with status {status} for {path}")]
    PolicyExitStatus { path: PathBuf, status: i32 },

    #[error("failed to parse policy document: {0}")]
    PolicyParse(#[from] serde_json::Error),

    #[error("failed to hand off roster to the dispatcher: {0}")]
    RosterHandoff(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors surfaced by a [`crate::engine::DeploymentEngine`] call.
///
/// These are never fatal to a run; callers catch them, log, and continue
/// per spec.md §7 ("Deploy failure", "Keep-alive touch failure", "Stop /
/// destroy failure" rows).
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
