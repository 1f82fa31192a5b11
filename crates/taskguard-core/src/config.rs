//! Guard configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Per-task-type policies live here: a task type not listed in `policies`
//! runs under `default_policy` (CONCURRENT_GUARD unless overridden).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{LockPolicy, TaskType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GuardConfig {
    /// Prefix of every lock key in the store.
    pub namespace: String,

    /// TTL used when the caller does not pass one.
    pub default_ttl_secs: u64,

    /// Deadline for a single store call before it counts as unavailable.
    pub store_timeout_ms: u64,

    /// Expiry of an EXCLUSIVE completion marker. `None` keeps it until cleared.
    pub completed_marker_ttl_secs: Option<u64>,

    pub reclaim_interval_secs: u64,

    /// RUNNING records idle longer than this are reclaimed.
    pub reclaim_max_age_secs: u64,

    pub heartbeat_interval_secs: u64,

    pub default_policy: LockPolicy,

    /// task_type → policy overrides.
    pub policies: BTreeMap<String, LockPolicy>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            namespace: "taskguard:".to_string(),
            default_ttl_secs: 600,
            store_timeout_ms: 2_000,
            completed_marker_ttl_secs: None,
            reclaim_interval_secs: 300,
            reclaim_max_age_secs: 900,
            heartbeat_interval_secs: 60,
            default_policy: LockPolicy::ConcurrentGuard,
            policies: BTreeMap::new(),
        }
    }
}

impl GuardConfig {
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: GuardConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace must not be empty".to_string()));
        }
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid("default_ttl_secs must be > 0".to_string()));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout_ms must be > 0".to_string()));
        }
        if self.reclaim_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reclaim_interval_secs must be > 0".to_string(),
            ));
        }
        if self.completed_marker_ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "completed_marker_ttl_secs must be > 0 when set".to_string(),
            ));
        }
        if self.heartbeat_interval_secs == 0
            || self.heartbeat_interval_secs >= self.default_ttl_secs
        {
            return Err(ConfigError::Invalid(format!(
                "heartbeat_interval_secs ({}) must be > 0 and shorter than default_ttl_secs ({})",
                self.heartbeat_interval_secs, self.default_ttl_secs
            )));
        }
        if self.reclaim_max_age_secs < self.default_ttl_secs {
            return Err(ConfigError::Invalid(format!(
                "reclaim_max_age_secs ({}) must not be shorter than default_ttl_secs ({})",
                self.reclaim_max_age_secs, self.default_ttl_secs
            )));
        }
        for task_type in self.policies.keys() {
            TaskType::new(task_type.as_str())
                .map_err(|e| ConfigError::Invalid(format!("policies: {e}")))?;
        }
        Ok(())
    }

    pub fn with_policy(mut self, task_type: impl Into<String>, policy: LockPolicy) -> Self {
        self.policies.insert(task_type.into(), policy);
        self
    }

    pub fn policy_for(&self, task_type: &str) -> LockPolicy {
        self.policies
            .get(task_type)
            .copied()
            .unwrap_or(self.default_policy)
    }

    pub fn has_explicit_policy(&self, task_type: &str) -> bool {
        self.policies.contains_key(task_type)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn completed_marker_ttl(&self) -> Option<Duration> {
        self.completed_marker_ttl_secs.map(Duration::from_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs)
    }

    pub fn reclaim_max_age(&self) -> Duration {
        Duration::from_secs(self.reclaim_max_age_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
