// ABOUTME: Sensitive-path ceiling — credentials, VCS internals, and dotfiles never resolve above ask.
// ABOUTME: Also hosts the path normalization shared by rule matching.

use std::sync::LazyLock;

use glob::Pattern;

use super::types::PermissionLevel;

/// Fixed patterns, matched case-insensitively against a normalized absolute-looking path.
///
/// Credential and VCS directories are listed bare as well, so an operation on the
/// directory itself is caught along with its contents.
pub const SENSITIVE_PATTERNS: &[&str] = &[
    "*/.ssh",
    "*/.gnupg",
    "*/.aws",
    "*/.git",
    "*/.hg",
    "*/.svn",
    "*/.kube",
    "*/.docker",
    "*/.ssh/*",
    "*/.gnupg/*",
    "*/.aws/*",
    "*/.git/*",
    "*/.hg/*",
    "*/.svn/*",
    "*/.env",
    "*/.env.*",
    "*/.netrc",
    "*/.npmrc",
    "*/.pypirc",
    "*/.kube/config",
    "*/.docker/config.json",
    "*/id_rsa*",
    "*/id_ed25519*",
    "*.pem",
    "*.key",
    "*/credentials*",
    "*/.bashrc",
    "*/.zshrc",
    "*/.profile",
    "*/.bash_profile",
    "*/.gitconfig",
    "/etc/*",
];

static COMPILED: LazyLock<Vec<(&'static str, Pattern)>> = LazyLock::new(|| {
    SENSITIVE_PATTERNS
        .iter()
        .filter_map(|raw| Pattern::new(raw).ok().map(|p| (*raw, p)))
        .collect()
});

/// Expand a leading `~` to the home directory. Left unchanged when there is none.
pub fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{rest}", home.display()),
        None => path.to_string(),
    }
}

/// Lowercase, forward slashes, home expanded, leading `./` dropped, rooted at `/`.
pub fn normalize_path(path: &str) -> String {
    let expanded = expand_home(path.trim()).replace('\\', "/").to_lowercase();
    let mut trimmed = expanded.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// The first sensitive pattern the path falls under, if any.
pub fn sensitive_match(path: &str) -> Option<&'static str> {
    let normalized = normalize_path(path);
    COMPILED
        .iter()
        .find(|(_, pattern)| pattern.matches(&normalized))
        .map(|(raw, _)| *raw)
}

pub fn is_sensitive(path: &str) -> bool {
    sensitive_match(path).is_some()
}

/// Clamp `level` to at most `ask` for sensitive paths. Returns the clamped level and,
/// when a clamp happened, the override reason.
pub fn apply_ceiling(level: PermissionLevel, path: Option<&str>) -> (PermissionLevel, Option<String>) {
    if level != PermissionLevel::AllowSession {
        return (level, None);
    }
    match path.and_then(|p| sensitive_match(p).map(|pattern| (p, pattern))) {
        Some((path, pattern)) => (
            PermissionLevel::Ask,
            Some(format!("{path} matches sensitive pattern {pattern}; allow_session clamped to ask")),
        ),
        None => (level, None),
    }
}
