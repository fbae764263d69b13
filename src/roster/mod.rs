//! The roster emitter (spec.md §4.6).

use crate::engine::{DeploymentId, DeploymentInfo};
use crate::error::{ControllerError, Result};
use crate::policy::{Policy, SystemType};
use base64::Engine as _;
use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Render one roster line for `depl`, or `None` if it has no
/// materialized machine (shouldn't happen for anything in `deployed`,
/// but defends against a malformed fake/engine implementation).
fn render_line(depl: &DeploymentInfo, type_name: &str, policy: &Policy) -> Option<String> {
    let machine = depl.machine.as_ref()?;
    let type_policy = policy.type_policy(type_name)?;

    let type_id = SystemType::new(type_name.to_string());
    let mut systems: Vec<String> = type_id.systems().into_iter().map(str::to_string).collect();
    let features: Vec<&str> = type_id.features();

    if systems.iter().any(|s| s == "x86_64-linux") && !systems.iter().any(|s| s == "i686-linux") {
        systems.push("i686-linux".to_string());
    }

    let host_key = match &machine.public_host_key {
        Some(bytes) if !bytes.is_empty() => base64::engine::general_purpose::STANDARD.encode(bytes),
        _ => "-".to_string(),
    };

    let columns = [
        format!("root@{}", machine.ssh_name),
        systems.join(","),
        type_policy.ssh_key.clone(),
        type_policy.max_jobs.to_string(),
        type_policy.speed_factor.to_string(),
        if features.is_empty() { "-".to_string() } else { features.join(",") },
        if features.is_empty() { "-".to_string() } else { features.join(",") },
        host_key,
    ];

    assert!(columns.iter().all(|c| !c.is_empty()), "roster column must not be empty");

    Some(columns.join(" "))
}

/// Render the full roster document for `deployed \ unusable`.
pub fn render(
    deployed: &HashSet<DeploymentId>,
    unusable: &HashSet<DeploymentId>,
    type_of: &HashMap<DeploymentId, String>,
    all: &[DeploymentInfo],
    policy: &Policy,
) -> String {
    let by_id: HashMap<&DeploymentId, &DeploymentInfo> =
        all.iter().map(|d| (&d.id, d)).collect();

    let mut lines = Vec::new();
    for id in deployed {
        if unusable.contains(id) {
            continue;
        }
        let Some(depl) = by_id.get(id) else { continue };
        let Some(type_name) = type_of.get(id) else { continue };
        if let Some(line) = render_line(depl, type_name, policy) {
            lines.push(line);
        }
    }

    let mut doc = String::new();
    for line in lines {
        doc.push_str(&line);
        doc.push('\n');
    }
    doc
}

/// Hand the roster off to the dispatcher: either pipe it to
/// `update_command`'s stdin, or write it atomically to `roster_path`.
/// Either failure mode is fatal to the current run (spec.md §7) — the
/// next run will retry idempotently.
pub async fn handoff(
    document: &str,
    update_command: &Option<Vec<String>>,
    roster_path: &Path,
) -> Result<()> {
    match update_command {
        Some(argv) => pipe_to_command(document, argv).await,
        None => write_atomically(document, roster_path),
    }
}

async fn pipe_to_command(document: &str, argv: &[String]) -> Result<()> {
    let Some((program, args)) = argv.split_first() else {
        return Ok(());
    };

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
        .map_err(ControllerError::RosterHandoff)?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    stdin
        .write_all(document.as_bytes())
        .await
        .map_err(ControllerError::RosterHandoff)?;
    drop(stdin);

    let status = child.wait().await.map_err(ControllerError::RosterHandoff)?;
    if !status.success() {
        return Err(ControllerError::RosterHandoff(std::io::Error::other(
            format!("update command exited with {status}"),
        )));
    }
    Ok(())
}

fn write_atomically(document: &str, roster_path: &Path) -> Result<()> {
    let dir = roster_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(ControllerError::RosterHandoff)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(ControllerError::RosterHandoff)?;
    tmp.write_all(document.as_bytes())
        .map_err(ControllerError::RosterHandoff)?;
    tmp.persist(roster_path)
        .map_err(|e| ControllerError::RosterHandoff(e.error))?;
    Ok(())
}
