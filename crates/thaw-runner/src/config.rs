use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thaw_core::{AdmissionLimits, RetentionPolicy, RetryPolicy, TieBreak};
use thiserror::Error;

/// Environment variable that overrides the selected cluster's password.
pub const PASSWORD_ENV: &str = "THAW_PASSWORD";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no clusters configured")]
    NoClusters,
    #[error("cluster '{0}' is defined more than once")]
    DuplicateCluster(String),
    #[error("unknown cluster '{0}'")]
    UnknownCluster(String),
    #[error("restore.batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("restore.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("admission.storage_safety_margin_pct must be 0..=100, got {0}")]
    MarginOutOfRange(u8),
    #[error("retention policy pattern '{pattern}' is not a valid regex: {reason}")]
    InvalidPolicyPattern { pattern: String, reason: String },
    #[error("restore.lock_lease_secs ({lease}) is shorter than one worst-case batch ({needed}s)")]
    LeaseTooShort { lease: u64, needed: u64 },
    #[error("restore.confirm_timeout_secs ({timeout}) must be shorter than restore.lock_lease_secs ({lease})")]
    ConfirmOutlastsLease { timeout: u64, lease: u64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Cluster used when `--cluster` is not given; defaults to the first entry.
    #[serde(default)]
    pub default_cluster: Option<String>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Relative paths resolve against the directory holding `.thaw/`; `~` is expanded.
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { db_path: ".thaw/thaw.db".to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub url: String,
    pub repository: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub restore_timeout_secs: u64,
    pub confirm_timeout_secs: u64,
    /// Lease on the restore lock, refreshed before every batch.
    pub lock_lease_secs: u64,
    pub tie_break: TieBreak,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            max_attempts: 3,
            retry_delay_secs: 30,
            restore_timeout_secs: 600,
            confirm_timeout_secs: 120,
            lock_lease_secs: 7200,
            tie_break: TieBreak::MostRecent,
        }
    }
}

impl RestoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(self.retry_delay_secs))
    }

    /// Longest a single batch can legitimately run: every task using every attempt.
    pub fn worst_case_batch_secs(&self) -> u64 {
        let per_attempt = self.restore_timeout_secs.saturating_add(self.retry_delay_secs);
        let per_task = u64::from(self.max_attempts).saturating_mul(per_attempt);
        per_task.saturating_mul(self.batch_size as u64)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_shards_per_node: u64,
    pub storage_safety_margin_pct: u8,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let limits = AdmissionLimits::default();
        Self {
            max_shards_per_node: limits.max_shards_per_node,
            storage_safety_margin_pct: limits.storage_safety_margin_pct,
        }
    }
}

impl AdmissionConfig {
    pub fn limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            max_shards_per_node: self.max_shards_per_node,
            storage_safety_margin_pct: self.storage_safety_margin_pct,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Age applied when no policy matches; unset keeps such snapshots forever.
    pub default_max_age_days: Option<u32>,
    pub policies: Vec<RetentionPolicy>,
}

impl Config {
    pub fn default_for_dir(root: &Path) -> Self {
        let name = root.file_name().and_then(|s| s.to_str()).unwrap_or("local");
        Self {
            default_cluster: Some("local".to_string()),
            store: StoreConfig::default(),
            restore: RestoreConfig::default(),
            admission: AdmissionConfig::default(),
            retention: RetentionConfig {
                default_max_age_days: None,
                policies: vec![RetentionPolicy { name_pattern: "k8s-access".to_string(), max_age_days: 90 }],
            },
            clusters: vec![ClusterConfig {
                name: "local".to_string(),
                url: "http://localhost:9200".to_string(),
                repository: format!("{}-snapshots", name),
                username: None,
                password: None,
                request_timeout_secs: default_request_timeout_secs(),
            }],
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.clusters.is_empty() {
            return Err(ConfigError::NoClusters);
        }
        let mut seen = HashSet::new();
        for c in &self.clusters {
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigError::DuplicateCluster(c.name.clone()));
            }
        }
        if let Some(name) = &self.default_cluster {
            if !seen.contains(name.as_str()) {
                return Err(ConfigError::UnknownCluster(name.clone()));
            }
        }
        if self.restore.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.restore.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.admission.storage_safety_margin_pct > 100 {
            return Err(ConfigError::MarginOutOfRange(self.admission.storage_safety_margin_pct));
        }
        for p in &self.retention.policies {
            Regex::new(&p.name_pattern).map_err(|e| ConfigError::InvalidPolicyPattern {
                pattern: p.name_pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        let needed = self.restore.worst_case_batch_secs();
        if self.restore.lock_lease_secs < needed {
            return Err(ConfigError::LeaseTooShort { lease: self.restore.lock_lease_secs, needed });
        }
        // a prompt still waiting for its answer must not look like an abandoned lock
        if self.restore.confirm_timeout_secs >= self.restore.lock_lease_secs {
            return Err(ConfigError::ConfirmOutlastsLease {
                timeout: self.restore.confirm_timeout_secs,
                lease: self.restore.lock_lease_secs,
            });
        }
        Ok(())
    }

    /// Named cluster, else `default_cluster`, else the first one listed.
    pub fn cluster(&self, name: Option<&str>) -> std::result::Result<&ClusterConfig, ConfigError> {
        match name.or(self.default_cluster.as_deref()) {
            Some(n) => self.clusters.iter().find(|c| c.name == n).ok_or_else(|| ConfigError::UnknownCluster(n.to_string())),
            None => self.clusters.first().ok_or(ConfigError::NoClusters),
        }
    }

    /// Copy safe to print: passwords replaced.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        for c in &mut cfg.clusters {
            if c.password.is_some() {
                c.password = Some("********".to_string());
            }
        }
        cfg
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serialize toml")
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".thaw").join("thaw.toml")
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.store.db_path).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }
}

impl ClusterConfig {
    /// Apply a password taken from the environment, if one was set.
    pub fn with_password_override(mut self, password: Option<String>) -> Self {
        if let Some(p) = password.filter(|p| !p.is_empty()) {
            self.password = Some(p);
        }
        self
    }
}
