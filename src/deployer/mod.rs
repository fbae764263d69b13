//! The deployer (spec.md §4.5). Sequential by design — a future version
//! may parallelise per deployment, but the roster emission step must
//! then wait on every deployment reaching a terminal pass/fail.

use crate::context::RunContext;
use crate::engine::{DeploymentEngine, DeploymentId};
use std::collections::HashSet;
use tracing::{info, warn};

/// Deploy every `in_use` deployment that isn't already up to date,
/// returning the subset that finished successfully *and* whose
/// keep-alive touch also succeeded — failure to keep-alive excludes a
/// deployment from the roster-eligible set (spec.md §9's chosen, stricter
/// reading of the source's ambiguous behavior here).
pub async fn deploy_all(
    engine: &dyn DeploymentEngine,
    in_use: &HashSet<DeploymentId>,
    up_to_date: &HashSet<DeploymentId>,
    ctx: &RunContext,
) -> HashSet<DeploymentId> {
    let mut deployed = HashSet::new();

    for id in in_use {
        if up_to_date.contains(id) {
            deployed.insert(id.clone());
            continue;
        }

        info!(deployment = %id, "deploying");
        if let Err(e) = engine.deploy(id, &ctx.own_modules_path).await {
            warn!(deployment = %id, error = %e, "error deploying");
            continue;
        }

        if let Err(e) = engine.touch_keep_alive(id).await {
            warn!(deployment = %id, error = %e, "error touching keep-alive sentinel");
            continue;
        }

        deployed.insert(id.clone());
    }

    deployed
}
