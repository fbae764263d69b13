//! The reconciler (spec.md §4.3 "Selection loop" and §4.4 "Retention").

mod retention;
mod selection;

pub use retention::{retain_one, time_left};
pub use selection::select_for_type;

use crate::context::RunContext;
use crate::engine::{DeploymentEngine, DeploymentId, DeploymentInfo};
use crate::policy::Policy;
use crate::sizer;
use crate::status::DispatcherStatus;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

/// The ephemeral per-run sets from spec.md §3: every deployment this run
/// touched lands in exactly one of `in_use` or `expired`; `unusable` is a
/// subset of `in_use`.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub in_use: HashSet<DeploymentId>,
    pub unusable: HashSet<DeploymentId>,
    pub expired: HashSet<DeploymentId>,
    /// The machine-type each in-use deployment was selected for, needed
    /// later by the roster emitter.
    pub type_of: HashMap<DeploymentId, String>,
}

/// Run the Sizer and Reconciler over every machine type named by the
/// policy or the status document, then apply retention to whatever is
/// left over (spec.md §5's "selection and retention decisions precede
/// any deploy or retire action").
pub async fn reconcile(
    engine: &dyn DeploymentEngine,
    policy: &Policy,
    status: &DispatcherStatus,
    ctx: &RunContext,
) -> ReconcileOutcome {
    let mut all = engine.list(&ctx.tag).await;

    let mut system_types: HashSet<String> = status.machine_types.keys().cloned().collect();
    system_types.extend(policy.system_types.keys().cloned());

    let mut outcome = ReconcileOutcome::default();

    for type_name in system_types {
        let Some(type_policy) = policy.type_policy(&type_name) else {
            warn!(r#type = %type_name, "cannot provision machines of this type");
            continue;
        };

        // `sizer::size`'s `u32::clamp(min, max)` panics if `min > max`;
        // guard here too (not just at `Policy::load`) so this invariant
        // holds for every `Policy` value reaching this function, however
        // it was constructed.
        if let Err(msg) = type_policy.validate() {
            warn!(r#type = %type_name, error = %msg, "cannot provision machines of this type");
            continue;
        }

        let runnable = status
            .machine_types
            .get(&type_name)
            .map(|s| s.runnable)
            .unwrap_or(0);
        let demand = sizer::size(runnable, type_policy);
        info!(
            r#type = %type_name,
            runnable,
            wanted = demand.wanted,
            allowed = demand.allowed,
            "sizing machine type"
        );

        let existing: Vec<DeploymentInfo> = all
            .iter()
            .filter(|d| d.arg("type") == Some(type_name.as_str()))
            .cloned()
            .collect();

        let selected = select_for_type(
            engine,
            &ctx.tag,
            &type_name,
            type_policy,
            demand.allowed,
            existing,
            &mut all,
        )
        .await;

        for id in selected {
            outcome.type_of.insert(id.clone(), type_name.clone());
            outcome.in_use.insert(id);
        }
    }

    for depl in &all {
        if outcome.in_use.contains(&depl.id) {
            continue;
        }

        let type_name = depl.arg("type").map(str::to_string);
        let type_policy = type_name.as_deref().and_then(|t| policy.type_policy(t));
        let type_status = type_name
            .as_deref()
            .and_then(|t| status.machine_types.get(t));

        match retain_one(depl, type_policy, type_status, ctx.now, status) {
            retention::Outcome::Expired => {
                outcome.expired.insert(depl.id.clone());
            }
            retention::Outcome::InUse => {
                if let Some(t) = type_name {
                    outcome.type_of.insert(depl.id.clone(), t);
                }
                outcome.in_use.insert(depl.id.clone());
            }
            retention::Outcome::InUseAndUnusable => {
                if let Some(t) = type_name {
                    outcome.type_of.insert(depl.id.clone(), t);
                }
                outcome.in_use.insert(depl.id.clone());
                outcome.unusable.insert(depl.id.clone());
            }
        }
    }

    outcome
}
