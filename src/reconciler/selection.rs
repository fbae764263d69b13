//! Selection loop (spec.md §4.3).

use crate::engine::{DeploymentEngine, DeploymentId, DeploymentInfo, DeploymentState};
use crate::policy::TypePolicy;
use std::collections::HashMap;
use tracing::{info, warn};

/// Smallest non-negative integer `n` such that `"<tag>-<n>"` is not
/// already taken among `existing` deployment names (spec.md §3).
fn allocate_name(tag: &str, existing: &[DeploymentInfo]) -> String {
    let taken: std::collections::HashSet<&str> =
        existing.iter().map(|d| d.id.0.as_str()).collect();
    let mut n = 0u64;
    loop {
        let candidate = format!("{tag}-{n}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}

/// Select deployments of `type_name` to satisfy `allowed` worker slots.
/// `existing` is the pool of deployments already tagged with this type;
/// `all` is the full working inventory, mutated so a created deployment
/// is visible to subsequent type iterations' name allocation.
pub async fn select_for_type(
    engine: &dyn DeploymentEngine,
    tag: &str,
    type_name: &str,
    type_policy: &TypePolicy,
    allowed: u32,
    mut existing: Vec<DeploymentInfo>,
    all: &mut Vec<DeploymentInfo>,
) -> Vec<DeploymentId> {
    // Prefer "up" deployments first; within a partition, order is
    // unspecified (spec.md §4.3 "Existing pool ordering").
    existing.sort_by_key(|d| d.state != DeploymentState::Up);

    let mut selected = Vec::new();
    let mut have = 0u32;
    let mut created = 0u32;

    while have < allowed {
        let accepted: Option<DeploymentInfo> = if existing.is_empty() {
            match engine.create(&allocate_name(tag, all), tag, type_name).await {
                Ok(id) => {
                    info!(deployment = %id, r#type = %type_name, "created deployment");
                    let info = DeploymentInfo {
                        id,
                        args: HashMap::from([
                            ("tag".to_string(), tag.to_string()),
                            ("type".to_string(), type_name.to_string()),
                        ]),
                        machine: None,
                        state: DeploymentState::Missing,
                    };
                    all.push(info.clone());
                    created += 1;
                    Some(info)
                }
                Err(e) => {
                    warn!(error = %e, r#type = %type_name, "failed to create deployment");
                    break;
                }
            }
        } else if existing[0].state == DeploymentState::Up {
            let new_state = engine.check(&existing[0].id).await;
            existing[0].state = new_state.clone();
            if new_state != DeploymentState::Up {
                existing.sort_by_key(|d| d.state != DeploymentState::Up);
                continue;
            }
            Some(existing.remove(0))
        } else if existing[0].state == DeploymentState::Missing {
            existing.remove(0);
            continue;
        } else {
            Some(existing.remove(0))
        };

        let Some(candidate) = accepted else {
            continue;
        };

        if let Err(e) = engine
            .set_recipe(&candidate.id, &type_policy.nixops_expr, &type_policy.nix_path)
            .await
        {
            warn!(deployment = %candidate.id, error = %e, "failed to set recipe");
        }

        selected.push(candidate.id);
        have += 1;

        if created >= 1 {
            break;
        }
    }

    selected
}
