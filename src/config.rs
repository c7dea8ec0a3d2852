use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::handle::PanicPolicy;
use crate::hosts::{ConcurrencyPolicy, HostSpec};

pub const DEADLINE_ENV: &str = "PAREXEC_DEADLINE_MS";
pub const POLL_ENV: &str = "PAREXEC_POLL_MS";

fn default_poll_ms() -> u64 {
    20
}

/// Executor settings as read from a YAML run profile.
///
/// ```yaml
/// deadline_ms: 5000
/// hosts:
///   - { name: node-a, slots: 2 }
///   - { slots: 1 }
/// ```
///
/// A non-empty `hosts` list wins over `max_parallel`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    pub deadline_ms: u64,

    #[serde(default)]
    pub max_parallel: Option<usize>,

    #[serde(default)]
    pub hosts: Vec<HostSpec>,

    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,

    #[serde(default)]
    pub panic_policy: PanicPolicy,
}

impl ExecutorConfig {
    pub fn flat(max_parallel: usize, deadline_ms: u64) -> Self {
        Self {
            deadline_ms,
            max_parallel: Some(max_parallel),
            hosts: Vec::new(),
            poll_ms: default_poll_ms(),
            panic_policy: PanicPolicy::default(),
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: ExecutorConfig =
            serde_yaml::from_str(yaml).context("failed to parse executor config yaml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let yaml = fs::read_to_string(path)
            .with_context(|| format!("failed to read executor config '{}'", path.display()))?;
        Self::from_yaml_str(&yaml)
            .with_context(|| format!("invalid executor config '{}'", path.display()))
    }

    /// Override `deadline_ms` / `poll_ms` from `PAREXEC_DEADLINE_MS` / `PAREXEC_POLL_MS`.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(ms) = env_positive_u64(DEADLINE_ENV)? {
            self.deadline_ms = ms;
        }
        if let Some(ms) = env_positive_u64(POLL_ENV)? {
            self.poll_ms = ms;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.deadline_ms == 0 {
            return Err(ExecError::invalid_argument("deadline_ms must be > 0"));
        }
        if self.poll_ms == 0 {
            return Err(ExecError::invalid_argument("poll_ms must be > 0"));
        }
        self.policy()?.resolve()?;
        Ok(())
    }

    pub fn policy(&self) -> Result<ConcurrencyPolicy, ExecError> {
        if !self.hosts.is_empty() {
            return Ok(ConcurrencyPolicy::Hosts(self.hosts.clone()));
        }
        match self.max_parallel {
            Some(n) => Ok(ConcurrencyPolicy::MaxParallel(n)),
            None => Err(ExecError::invalid_argument(
                "config needs either max_parallel or a non-empty hosts list",
            )),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn poll_quantum(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }
}

fn env_positive_u64(key: &str) -> Result<Option<u64>> {
    let Ok(raw) = env::var(key) else {
        return Ok(None);
    };
    let parsed: u64 = raw
        .trim()
        .parse()
        .map_err(|_| anyhow!("invalid {key}: '{raw}' (must be a positive integer)"))?;
    if parsed == 0 {
        return Err(anyhow!("invalid {key}: '{raw}' (must be a positive integer)"));
    }
    Ok(Some(parsed))
}
