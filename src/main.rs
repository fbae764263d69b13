use anyhow::Context;
use clap::Parser;
use hydra_provisioner::controller;
use hydra_provisioner::context::RunContext;
use hydra_provisioner::engine::subprocess::NixopsEngine;
use hydra_provisioner::policy::Policy;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

/// Reconcile build-farm worker deployments against dispatcher backlog.
#[derive(Parser, Debug)]
#[command(name = "hydra-provisioner")]
struct Cli {
    /// Path to the policy expression to evaluate with `nix-instantiate`.
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // clap's own usage/help exit codes don't match spec.md §6's "exit 1 on
    // any usage error"; parse manually so a malformed invocation gets the
    // same exit code as a policy-load failure.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprint!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "run failed");
            ExitCode::FAILURE
        }
    }
}

/// Mirrors nixops's own default: `~/.nixops/deployments.nixops`, falling
/// back to a relative path if `$HOME` isn't set.
fn default_state_file() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".nixops/deployments.nixops"))
        .unwrap_or_else(|| PathBuf::from(".nixops/deployments.nixops"))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // `Policy::load` already drops any per-type policy that fails
    // `TypePolicy::validate()` (e.g. minMachines > maxMachines), logging
    // why; `reconciler::reconcile` enforces the same invariant again for
    // any `Policy` that didn't come through `load`.
    let policy = Policy::load(&cli.config)
        .await
        .with_context(|| format!("while loading policy from {}", cli.config.display()))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let ctx = RunContext::new(policy.tag.clone(), now);

    let state_file = std::env::var_os("HYDRA_PROVISIONER_STATE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(default_state_file);
    let engine = NixopsEngine::new(state_file);
    let report = controller::run_once(&engine, &policy, &ctx).await;

    tracing::info!(
        deployed = report.deployed.len(),
        expired = report.expired.len(),
        "run complete"
    );

    Ok(())
}
