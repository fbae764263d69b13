//! Retirement of expired deployments (spec.md §4.7).

use crate::engine::{DeploymentEngine, DeploymentId, DeploymentInfo, DeploymentState};
use crate::policy::Policy;
use crate::reconciler::time_left;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// Stop or destroy every `expired` deployment, respecting paid time and
/// each type's `stopOnIdle` policy. Stop/destroy failures are logged and
/// the deployment is left in place for the next run to reclassify
/// (spec.md §7).
pub async fn retire_all(
    engine: &dyn DeploymentEngine,
    expired: &HashSet<DeploymentId>,
    all: &[DeploymentInfo],
    policy: &Policy,
    now: i64,
) {
    let by_id: HashMap<&DeploymentId, &DeploymentInfo> = all.iter().map(|d| (&d.id, d)).collect();

    for id in expired {
        let Some(depl) = by_id.get(id) else { continue };

        if depl.state.is_active() && time_left(depl, now) >= 10 * 60 {
            info!(deployment = %id, "not stopping/destroying: paid time remains");
            continue;
        }

        let stop_on_idle = depl
            .arg("type")
            .and_then(|t| policy.type_policy(t))
            .map(|p| p.stop_on_idle)
            .unwrap_or(false);

        if stop_on_idle {
            if depl.state != DeploymentState::Stopped {
                info!(deployment = %id, "stopping deployment");
                if let Err(e) = engine.stop(id).await {
                    warn!(deployment = %id, error = %e, "failed to stop deployment");
                }
            }
        } else {
            info!(deployment = %id, "destroying deployment");
            if let Err(e) = engine.destroy(id).await {
                warn!(deployment = %id, error = %e, "failed to destroy deployment resources");
                continue;
            }
            if let Err(e) = engine.delete(id).await {
                warn!(deployment = %id, error = %e, "failed to delete deployment record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::policy::TypePolicy;

    fn policy_with(type_name: &str, stop_on_idle: bool) -> Policy {
        let mut system_types = HashMap::new();
        system_types.insert(
            type_name.to_string(),
            TypePolicy {
                nixops_expr: "/x".into(),
                nix_path: vec![],
                runnables_per_machine: 10,
                ignored_runnables: 0,
                min_machines: 0,
                max_machines: 1,
                grace_period: 0,
                stop_on_idle,
                ssh_key: "-".into(),
                max_jobs: 1,
                speed_factor: 1,
                unknown_fields: HashMap::new(),
            },
        );
        Policy {
            tag: "hydra-provisioned".to_string(),
            status_command: vec![],
            update_command: None,
            system_types,
        }
    }

    #[tokio::test]
    async fn stop_on_idle_stops_not_destroys() {
        let engine = FakeEngine::new();
        engine.seed(
            "d-0",
            "hydra-provisioned",
            "t",
            DeploymentState::Up,
            Some(crate::engine::MachineInfo {
                ssh_name: "worker0".to_string(),
                public_host_key: None,
                next_charge_time: Some(0),
            }),
        );
        let policy = policy_with("t", true);
        let all = engine.list("hydra-provisioned").await;
        let mut expired = HashSet::new();
        expired.insert(DeploymentId("d-0".to_string()));

        retire_all(&engine, &expired, &all, &policy, 0).await;

        assert!(engine.is_stopped("d-0"));
        assert!(!engine.is_destroyed("d-0"));
    }

    #[tokio::test]
    async fn paid_time_blocks_destruction() {
        let engine = FakeEngine::new();
        engine.seed(
            "d-0",
            "hydra-provisioned",
            "t",
            DeploymentState::Up,
            Some(crate::engine::MachineInfo {
                ssh_name: "worker0".to_string(),
                public_host_key: None,
                next_charge_time: Some(20 * 60),
            }),
        );
        let policy = policy_with("t", false);
        let all = engine.list("hydra-provisioned").await;
        let mut expired = HashSet::new();
        expired.insert(DeploymentId("d-0".to_string()));

        retire_all(&engine, &expired, &all, &policy, 0).await;

        assert!(!engine.is_destroyed("d-0"));
        assert!(engine.exists("d-0"));
    }

    #[tokio::test]
    async fn default_destroys_and_deletes() {
        let engine = FakeEngine::new();
        engine.seed(
            "d-0",
            "hydra-provisioned",
            "t",
            DeploymentState::Up,
            Some(crate::engine::MachineInfo {
                ssh_name: "worker0".to_string(),
                public_host_key: None,
                next_charge_time: Some(0),
            }),
        );
        let policy = policy_with("t", false);
        let all = engine.list("hydra-provisioned").await;
        let mut expired = HashSet::new();
        expired.insert(DeploymentId("d-0".to_string()));

        retire_all(&engine, &expired, &all, &policy, 0).await;

        assert!(!engine.exists("d-0"));
    }
}
