//! Orchestrates one reconciliation run (spec.md §5 "Ordering guarantees").

use crate::context::RunContext;
use crate::engine::DeploymentEngine;
use crate::policy::Policy;
use crate::{deployer, reconciler, retirement, roster, status};
use std::collections::HashSet;
use tracing::info;

/// The outcome of one run, returned mainly so integration tests can
/// assert on it without re-deriving state from the engine.
#[derive(Debug)]
pub struct RunReport {
    pub roster: String,
    pub deployed: HashSet<crate::engine::DeploymentId>,
    pub expired: HashSet<crate::engine::DeploymentId>,
}

/// Run status fetch, sizing, selection, retention, deploy, roster
/// hand-off, and retirement, in that order. Ordering matters: status
/// must precede sizing; selection/retention must precede deploy/retire;
/// every deploy must finish before the roster is emitted; the roster
/// hand-off must finish before retirement runs, so a deployment is never
/// torn down while still named in the roster the dispatcher just saw.
pub async fn run_once(engine: &dyn DeploymentEngine, policy: &Policy, ctx: &RunContext) -> RunReport {
    let status = status::fetch(&policy.status_command).await;
    info!(status = %status.status, "fetched dispatcher status");

    let outcome = reconciler::reconcile(engine, policy, &status, ctx).await;
    info!(
        in_use = outcome.in_use.len(),
        unusable = outcome.unusable.len(),
        expired = outcome.expired.len(),
        "reconciliation complete"
    );

    let deployed = deployer::deploy_all(engine, &outcome.in_use, &HashSet::new(), ctx).await;

    let document = roster::render(&deployed, &outcome.unusable, &outcome.type_of, &engine.list(&ctx.tag).await, policy);
    if let Err(e) = roster::handoff(&document, &policy.update_command, &ctx.roster_path).await {
        tracing::error!(error = %e, "failed to hand off roster");
    }

    let all = engine.list(&ctx.tag).await;
    retirement::retire_all(engine, &outcome.expired, &all, policy, ctx.now).await;

    RunReport {
        roster: document,
        deployed,
        expired: outcome.expired,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::policy::TypePolicy;
    use std::collections::HashMap;

    fn policy_with(type_name: &str, min: u32, max: u32) -> Policy {
        let mut system_types = HashMap::new();
        system_types.insert(
            type_name.to_string(),
            TypePolicy {
                nixops_expr: "/etc/nixos/worker.nix".into(),
                nix_path: vec![],
                runnables_per_machine: 10,
                ignored_runnables: 0,
                min_machines: min,
                max_machines: max,
                grace_period: 0,
                stop_on_idle: false,
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
    async fn cold_start_creates_deploys_and_rosters_one_machine() {
        let engine = FakeEngine::new();
        // statusCommand is empty, so the dispatcher is treated as down and
        // contributes zero backlog; minMachines alone drives demand here.
        let policy = policy_with("x86_64-linux", 1, 3);
        let ctx = RunContext::new("hydra-provisioned".to_string(), 1_000_000);

        let report = run_once(&engine, &policy, &ctx).await;

        assert_eq!(report.deployed.len(), 1);
        assert_eq!(report.roster.lines().count(), 1);
        assert!(report.roster.contains("root@"));
    }

    #[tokio::test]
    async fn idempotent_on_second_run_with_no_backlog_change() {
        let engine = FakeEngine::new();
        let policy = policy_with("x86_64-linux", 1, 1);
        let ctx = RunContext::new("hydra-provisioned".to_string(), 1_000_000);

        let first = run_once(&engine, &policy, &ctx).await;
        let second = run_once(&engine, &policy, &ctx).await;

        assert_eq!(first.deployed.len(), 1);
        assert_eq!(second.deployed.len(), 1);
        assert_eq!(engine.names().len(), 1);
    }
}
