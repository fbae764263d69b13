/// A machine-type identifier: `"<systems>:<features>"`.
///
/// Both sides are comma-separated lists; the `:<features>` suffix, and
/// the feature list itself, may be empty. A missing colon is treated as
/// absent features. This wraps a plain `String` rather than eagerly
/// parsing into a `Vec<String>`, because the identifier is also used
/// verbatim as a hash map key throughout the reconciler and status
/// fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemType(String);

impl SystemType {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Comma-separated systems list, e.g. `["x86_64-linux"]`.
    pub fn systems(&self) -> Vec<&str> {
        let systems = self.0.split(':').next().unwrap_or("");
        systems.split(',').filter(|s| !s.is_empty()).collect()
    }

    /// Comma-separated feature list, empty if the identifier has no
    /// `:features` suffix or the suffix itself is empty.
    pub fn features(&self) -> Vec<&str> {
        match self.0.split_once(':') {
            Some((_, features)) => features.split(',').filter(|s| !s.is_empty()).collect(),
            None => Vec::new(),
        }
    }

    /// Replace every `i686-linux` occurrence with `x86_64-linux`,
    /// returning `None` if the identifier does not start with it. Used
    /// by the status fetcher's architecture folding (spec.md §4.1).
    ///
    /// Rewrites all occurrences, not just the leading one, matching the
    /// original's unbounded `str.replace` — a feature literally named
    /// `i686-linux` (legal under the grammar in spec.md §3) would
    /// otherwise fold to a different string than `status`'s target-key
    /// computation expects.
    pub fn fold_i686_to_x86_64(&self) -> Option<SystemType> {
        if self.0.starts_with("i686-linux") {
            Some(SystemType(self.0.replace("i686-linux", "x86_64-linux")))
        } else {
            None
        }
    }
}

impl std::fmt::Display for SystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SystemType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SystemType {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
