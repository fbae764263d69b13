//! Integration tests exercising `controller::run_once` end-to-end against
//! `FakeEngine`, mirroring the concrete scenarios and testable properties
//! this controller is designed around.

use hydra_provisioner::context::RunContext;
use hydra_provisioner::controller::run_once;
use hydra_provisioner::engine::fake::FakeEngine;
use hydra_provisioner::engine::{DeploymentId, DeploymentState, MachineInfo};
use hydra_provisioner::policy::{Policy, TypePolicy};
use std::collections::HashMap;

fn type_policy(min: u32, max: u32, grace_period: u64, stop_on_idle: bool) -> TypePolicy {
    TypePolicy {
        nixops_expr: "/etc/nixos/worker.nix".into(),
        nix_path: vec![],
        runnables_per_machine: 10,
        ignored_runnables: 0,
        min_machines: min,
        max_machines: max,
        grace_period,
        stop_on_idle,
        ssh_key: "ssh-worker".to_string(),
        max_jobs: 4,
        speed_factor: 1,
        unknown_fields: HashMap::new(),
    }
}

fn policy_with(type_name: &str, tp: TypePolicy) -> Policy {
    let mut system_types = HashMap::new();
    system_types.insert(type_name.to_string(), tp);
    Policy {
        tag: "hydra-provisioned".to_string(),
        status_command: vec![],
        update_command: None,
        system_types,
    }
}

/// Scenario 1: cold start with backlog creates at most one deployment per
/// run, converging over repeated runs (spec.md §8, "Cap" property).
#[tokio::test]
async fn cold_start_with_backlog_caps_creation_per_run() {
    let engine = FakeEngine::new();
    // No dispatcher wired up; minMachines alone drives demand so the test
    // doesn't depend on a real statusCommand subprocess.
    let policy = policy_with("x86_64-linux:big", type_policy(3, 3, 0, false));
    let ctx = RunContext::new("hydra-provisioned".to_string(), 1_000_000);

    run_once(&engine, &policy, &ctx).await;
    assert_eq!(engine.names().len(), 1, "at most one creation in the first run");

    run_once(&engine, &policy, &ctx).await;
    assert_eq!(engine.names().len(), 2, "a second run creates the next one");

    run_once(&engine, &policy, &ctx).await;
    assert_eq!(engine.names().len(), 3, "converges to minMachines after enough runs");

    run_once(&engine, &policy, &ctx).await;
    assert_eq!(engine.names().len(), 3, "stays put once satisfied (Floor/Cap)");
}

/// Scenario: paid time protects a deployment the current backlog no
/// longer demands (spec.md §4.4 rule 2).
#[tokio::test]
async fn paid_time_protects_deployment_past_its_demand() {
    let engine = FakeEngine::new();
    let now = 1_000_000i64;
    engine.seed(
        "hydra-provisioned-0",
        "hydra-provisioned",
        "x86_64-linux:big",
        DeploymentState::Up,
        Some(MachineInfo {
            ssh_name: "worker0".to_string(),
            public_host_key: Some(b"key".to_vec()),
            next_charge_time: Some(now + 45 * 60),
        }),
    );
    let policy = policy_with("x86_64-linux:big", type_policy(0, 1, 0, false));
    let ctx = RunContext::new("hydra-provisioned".to_string(), now);

    let report = run_once(&engine, &policy, &ctx).await;

    assert!(report.expired.is_empty());
    assert!(engine.exists("hydra-provisioned-0"));
    assert!(!engine.is_destroyed("hydra-provisioned-0"));
}

/// Scenario: a deployment used within its grace period is kept warm even
/// with zero demand, but still appears on the roster since it has a
/// non-zero grace period (spec.md §4.4 rule 4).
#[tokio::test]
async fn grace_period_keeps_deployment_warm_and_rostered() {
    let engine = FakeEngine::new();
    let now = 1_000_000i64;
    engine.seed(
        "hydra-provisioned-0",
        "hydra-provisioned",
        "x86_64-linux:big",
        DeploymentState::Up,
        Some(MachineInfo {
            ssh_name: "worker0".to_string(),
            public_host_key: Some(b"key".to_vec()),
            next_charge_time: Some(now), // no paid-time protection
        }),
    );
    let policy = policy_with("x86_64-linux:big", type_policy(0, 1, 3600, false));
    let ctx = RunContext::new("hydra-provisioned".to_string(), now);

    let report = run_once(&engine, &policy, &ctx).await;

    assert!(report.expired.is_empty());
    assert!(report.roster.contains("root@worker0"));
}

/// A `statusCommand` of `echo <json>` stands in for a real dispatcher in
/// tests that need a live (non-"down") status document: with an empty
/// `statusCommand` the dispatcher is always treated as down, which rule 4
/// (the imputed-last-active fallback) treats as "recently active" and
/// never expires — these tests need an actual elapsed-uptime value to
/// exercise genuine expiry.
fn echoed_status(uptime: i64) -> Vec<String> {
    let json = format!(
        r#"{{"status":"up","uptime":{uptime},"machineTypes":{{}},"machines":{{}}}}"#
    );
    vec!["echo".to_string(), json]
}

/// Scenario: with a live dispatcher reporting a long uptime (so the
/// imputed-last-active fallback is in the distant past) and no paid time
/// or grace period left, an unneeded deployment expires and is destroyed
/// outright. The job-activity branch of rule 3 is covered directly
/// against a synthetic status by the `reconciler::retention` unit tests.
#[tokio::test]
async fn unneeded_deployment_with_no_protection_expires_and_is_destroyed() {
    let engine = FakeEngine::new();
    let now = 1_000_000i64;
    engine.seed(
        "hydra-provisioned-0",
        "hydra-provisioned",
        "x86_64-linux:big",
        DeploymentState::Up,
        Some(MachineInfo {
            ssh_name: "worker0".to_string(),
            public_host_key: Some(b"key".to_vec()),
            next_charge_time: Some(now),
        }),
    );
    let mut policy = policy_with("x86_64-linux:big", type_policy(0, 1, 0, false));
    policy.status_command = echoed_status(100_000);
    let ctx = RunContext::new("hydra-provisioned".to_string(), now);

    let report = run_once(&engine, &policy, &ctx).await;

    assert!(report.expired.contains(&DeploymentId("hydra-provisioned-0".to_string())));
    assert!(!engine.exists("hydra-provisioned-0"));
}

/// Scenario: `stopOnIdle` stops rather than destroys an expired
/// deployment (spec.md §4.7).
#[tokio::test]
async fn stop_on_idle_type_is_stopped_not_destroyed() {
    let engine = FakeEngine::new();
    let now = 1_000_000i64;
    engine.seed(
        "hydra-provisioned-0",
        "hydra-provisioned",
        "x86_64-linux:big",
        DeploymentState::Up,
        Some(MachineInfo {
            ssh_name: "worker0".to_string(),
            public_host_key: Some(b"key".to_vec()),
            next_charge_time: Some(now),
        }),
    );
    let mut policy = policy_with("x86_64-linux:big", type_policy(0, 0, 0, true));
    policy.status_command = echoed_status(100_000);
    let ctx = RunContext::new("hydra-provisioned".to_string(), now);

    run_once(&engine, &policy, &ctx).await;

    assert!(engine.is_stopped("hydra-provisioned-0"));
    assert!(!engine.is_destroyed("hydra-provisioned-0"));
    assert!(engine.exists("hydra-provisioned-0"));
}

/// Property: the roster only ever lists deployments that were actually
/// (re)deployed this run — it's a subset of `deployed`, never a superset.
#[tokio::test]
async fn roster_is_a_subset_of_deployed() {
    let engine = FakeEngine::new();
    let policy = policy_with("x86_64-linux", type_policy(2, 2, 0, false));
    let ctx = RunContext::new("hydra-provisioned".to_string(), 1_000_000);

    // Two runs to materialize both machines.
    run_once(&engine, &policy, &ctx).await;
    let report = run_once(&engine, &policy, &ctx).await;

    let roster_lines = report.roster.lines().count();
    assert!(roster_lines <= report.deployed.len());
}

/// Property: tag isolation — a deployment tagged for a different
/// controller instance is never touched.
#[tokio::test]
async fn differently_tagged_deployment_is_left_alone() {
    let engine = FakeEngine::new();
    engine.seed(
        "other-0",
        "some-other-tag",
        "x86_64-linux",
        DeploymentState::Up,
        None,
    );
    let policy = policy_with("x86_64-linux", type_policy(0, 1, 0, false));
    let ctx = RunContext::new("hydra-provisioned".to_string(), 1_000_000);

    run_once(&engine, &policy, &ctx).await;

    assert!(engine.exists("other-0"));
    assert!(!engine.is_destroyed("other-0"));
    assert!(!engine.is_stopped("other-0"));
}

/// Property: idempotence — a second run against unchanged backlog and
/// inventory produces the same deployment count.
#[tokio::test]
async fn repeated_runs_are_idempotent_once_converged() {
    let engine = FakeEngine::new();
    let policy = policy_with("x86_64-linux", type_policy(1, 1, 0, false));
    let ctx = RunContext::new("hydra-provisioned".to_string(), 1_000_000);

    run_once(&engine, &policy, &ctx).await;
    let after_first = engine.names().len();
    run_once(&engine, &policy, &ctx).await;
    let after_second = engine.names().len();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second, 1);
}
