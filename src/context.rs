//! Process-wide, run-scoped configuration (spec.md §9 "Global ambient
//! state"). Bundled into a value constructed once at start-up instead of
//! true globals, so tests can construct an arbitrary context.

use std::path::PathBuf;

pub const DEFAULT_ROSTER_PATH: &str = "/var/lib/hydra/provisioner/machines";

/// Ambient configuration for a single run, plus the timestamp the whole
/// run treats as "now" (spec.md §3's `RunContext`).
#[derive(Debug, Clone)]
pub struct RunContext {
    pub tag: String,
    pub own_modules_path: PathBuf,
    pub roster_path: PathBuf,
    pub now: i64,
}

impl RunContext {
    /// Build the ambient context for `tag`, honoring the
    /// `HYDRA_PROVISIONER_ROSTER_PATH` / `HYDRA_PROVISIONER_OWN_MODULES`
    /// overrides (SPEC_FULL.md §9) and capturing `now` once.
    pub fn new(tag: String, now: i64) -> Self {
        let roster_path = std::env::var_os("HYDRA_PROVISIONER_ROSTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROSTER_PATH));

        let own_modules_path = std::env::var_os("HYDRA_PROVISIONER_OWN_MODULES")
            .map(PathBuf::from)
            .unwrap_or_else(own_modules_default);

        Self {
            tag,
            own_modules_path,
            roster_path,
            now,
        }
    }
}

/// Mirrors the source's `own_modules` fallback: prefer a `share/nix`
/// directory next to the executable, falling back to the executable's
/// own directory.
fn own_modules_default() -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));

    let candidate = exe_dir.join("../share/nix/hydra-provisioner");
    if candidate.exists() {
        candidate
    } else {
        exe_dir
    }
}
