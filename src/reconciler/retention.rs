//! Retention rules for deployments not selected by demand (spec.md §4.4).
//! Rules are checked in order; the first match fixes the outcome.

use crate::engine::{DeploymentInfo, DeploymentState};
use crate::policy::TypePolicy;
use crate::status::{DispatcherStatus, TypeStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Expired,
    InUse,
    InUseAndUnusable,
}

/// `timeLeft = max(nextChargeTime - now, 0)`, or `0` if the deployment
/// has no machine or no charge-time information (spec.md §3, §4.4).
pub fn time_left(depl: &DeploymentInfo, now: i64) -> i64 {
    depl.machine
        .as_ref()
        .and_then(|m| m.next_charge_time)
        .map(|t| (t - now).max(0))
        .unwrap_or(0)
}

pub fn retain_one(
    depl: &DeploymentInfo,
    type_policy: Option<&TypePolicy>,
    type_status: Option<&TypeStatus>,
    now: i64,
    status: &DispatcherStatus,
) -> Outcome {
    // Rule 1: not active at all -> expired.
    if !depl.state.is_active() {
        return Outcome::Expired;
    }

    // Rule 2: at least 30 minutes of paid time left -> keep it, we
    // already bought that time.
    if time_left(depl, now) >= 30 * 60 {
        return Outcome::InUse;
    }

    // Rule 3: currently serving a job -> keep it running to completion.
    if let Some(machine) = &depl.machine {
        let ssh_target = format!("root@{}", machine.ssh_name);
        if let Some(machine_status) = status.machines.get(&ssh_target) {
            if machine_status.current_jobs != 0 {
                let grace_period = type_policy.map(|p| p.grace_period).unwrap_or(0);
                return if grace_period == 0 {
                    Outcome::InUseAndUnusable
                } else {
                    Outcome::InUse
                };
            }
        }
    }

    // Rule 4: used recently enough to stay within the grace period.
    let grace_period = type_policy.map(|p| p.grace_period).unwrap_or(0);
    let last_active = match type_status.map(|s| s.last_active) {
        Some(ts) if ts != 0 => ts,
        _ => now - status.uptime + 1800,
    };
    if now - last_active < grace_period as i64 {
        return Outcome::InUse;
    }

    // Rule 5: nothing retains it.
    Outcome::Expired
}
