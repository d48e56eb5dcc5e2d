//! Configuration for the operator.

use std::time::Duration;

use anyhow::{Context, Result};
use hpascale_reconcile::{DEFAULT_RETRY_BASE, DEFAULT_RETRY_MAX, DEFAULT_SAFETY_INTERVAL};

use crate::manager::ManagerConfig;
use crate::task::BackoffPolicy;

/// Operator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace to watch; all namespaces when `None`.
    pub watch_namespace: Option<String>,

    /// Longest a task sleeps before re-evaluating its schedule.
    pub safety_interval: Duration,

    /// Base delay before retrying a failed convergence.
    pub retry_base: Duration,

    /// Cap on the retry delay.
    pub retry_max: Duration,

    /// Controller name on emitted events and field manager on patches.
    pub reporter: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            safety_interval: DEFAULT_SAFETY_INTERVAL,
            retry_base: DEFAULT_RETRY_BASE,
            retry_max: DEFAULT_RETRY_MAX,
            reporter: "hpascale-operator".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let watch_namespace =
            lookup("HPASCALE_WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let safety_interval = parse_secs(&lookup, "HPASCALE_SAFETY_INTERVAL_SECS")?
            .unwrap_or(defaults.safety_interval);
        if safety_interval.is_zero() {
            anyhow::bail!("HPASCALE_SAFETY_INTERVAL_SECS must be greater than zero");
        }

        let retry_base = match lookup("HPASCALE_RETRY_BASE_MS") {
            Some(raw) => Duration::from_millis(
                raw.parse()
                    .with_context(|| format!("invalid HPASCALE_RETRY_BASE_MS: {raw}"))?,
            ),
            None => defaults.retry_base,
        };

        let retry_max = parse_secs(&lookup, "HPASCALE_RETRY_MAX_SECS")?
            .unwrap_or(defaults.retry_max)
            .min(safety_interval);

        let reporter = lookup("HPASCALE_REPORTER").unwrap_or(defaults.reporter);

        let log_level = lookup("HPASCALE_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            watch_namespace,
            safety_interval,
            retry_base,
            retry_max,
            reporter,
            log_level,
        })
    }

    /// Settings handed to the task manager.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            safety_interval: self.safety_interval,
            retry: BackoffPolicy {
                base: self.retry_base,
                max: self.retry_max,
                jitter: 0.25,
            },
        }
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>> {
    match lookup(key) {
        Some(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid {key}: {raw}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        None => Ok(None),
    }
}
