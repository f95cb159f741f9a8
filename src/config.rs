// ABOUTME: Configuration loading for clawgate.
// ABOUTME: Reads ~/.clawgate/config.toml with per-section defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::audit::AuditSettings;
use crate::gate::ApprovalMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gate: GateConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// Gate behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub mode: ApprovalMode,
    pub auto_allow_low: bool,
    pub low_requires_approval: bool,
    pub approval_timeout_seconds: u64,
    pub session_grant_ttl_seconds: Option<u64>,
    pub pending_ttl_seconds: Option<u64>,
    /// Persisted rules file. Defaults to ~/.clawgate/rules.json.
    pub rules_path: Option<PathBuf>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::Interactive,
            auto_allow_low: true,
            low_requires_approval: false,
            approval_timeout_seconds: 120,
            session_grant_ttl_seconds: None,
            pending_ttl_seconds: None,
            rules_path: None,
        }
    }
}

impl GateConfig {
    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_seconds)
    }

    pub fn session_grant_ttl(&self) -> Option<Duration> {
        self.session_grant_ttl_seconds.map(Duration::from_secs)
    }

    pub fn pending_ttl(&self) -> Option<Duration> {
        self.pending_ttl_seconds.map(Duration::from_secs)
    }

    pub fn resolved_rules_path(&self) -> PathBuf {
        self.rules_path.clone().unwrap_or_else(Config::rules_path)
    }
}

/// Audit trail storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub persist: bool,
    pub path: Option<PathBuf>,
    pub max_entries: Option<usize>,
    pub max_file_bytes: Option<u64>,
    pub keep_rotated: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist: true,
            path: None,
            max_entries: None,
            max_file_bytes: None,
            keep_rotated: 3,
        }
    }
}

impl AuditConfig {
    pub fn settings(&self) -> AuditSettings {
        AuditSettings {
            max_entries: self.max_entries,
            max_file_bytes: self.max_file_bytes,
            keep_rotated: self.keep_rotated,
        }
    }

    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::audit_path)
    }
}

/// Diagnostic logging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from ~/.clawgate/config.toml, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from an explicit path, falling back to defaults if it doesn't exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Base directory for clawgate state.
    pub fn base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clawgate")
    }

    /// Path to the config file.
    pub fn config_path() -> PathBuf {
        Self::base_dir().join("config.toml")
    }

    /// Path to the persisted rules file.
    pub fn rules_path() -> PathBuf {
        Self::base_dir().join("rules.json")
    }

    /// Default path to the audit log.
    pub fn audit_path() -> PathBuf {
        Self::base_dir().join("audit.jsonl")
    }
}
