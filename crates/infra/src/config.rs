//! Scheduler configuration, read from the environment once at startup.

use std::time::Duration;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: String, value: String },
}

/// Knobs for the lock, cache, dedupe filter and upstream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Locks held longer than this are reclaimed by the maintenance sweep.
    pub lock_max_run: Duration,
    pub lock_sweep_interval: Duration,
    pub cache_sweep_interval: Duration,
    /// TTL for snapshots written by polling tasks.
    pub cache_default_ttl: Duration,
    pub dedupe_window: Duration,
    pub tracker_base_url: String,
    pub tracker_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_max_run: Duration::from_secs(600),
            lock_sweep_interval: Duration::from_secs(60),
            cache_sweep_interval: Duration::from_secs(60),
            cache_default_ttl: Duration::from_secs(300),
            dedupe_window: Duration::from_secs(60),
            tracker_base_url: "https://dev.azure.com".to_string(),
            tracker_timeout: Duration::from_secs(30),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            lock_max_run: secs(&lookup, "LOCK_MAX_RUN_SECS", defaults.lock_max_run)?,
            lock_sweep_interval: secs(
                &lookup,
                "LOCK_SWEEP_INTERVAL_SECS",
                defaults.lock_sweep_interval,
            )?,
            cache_sweep_interval: secs(
                &lookup,
                "CACHE_SWEEP_INTERVAL_SECS",
                defaults.cache_sweep_interval,
            )?,
            cache_default_ttl: secs(&lookup, "CACHE_DEFAULT_TTL_SECS", defaults.cache_default_ttl)?,
            dedupe_window: secs(&lookup, "DEDUPE_WINDOW_SECS", defaults.dedupe_window)?,
            tracker_base_url: lookup("TRACKER_BASE_URL")
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.tracker_base_url),
            tracker_timeout: secs(&lookup, "TRACKER_TIMEOUT_SECS", defaults.tracker_timeout)?,
        })
    }
}

/// Positive whole seconds. Zero is rejected: every interval here drives a timer.
pub fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}
