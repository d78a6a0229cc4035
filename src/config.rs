//! Application-level configuration loading for the synchronization core.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::sync::retry::RetryPolicy;

/// Default location on disk where the core looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SHOWSYNC_CONFIG_PATH";

/// A client is online iff its last heartbeat is younger than this.
const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(12);
/// Interval between subscription liveness sweeps.
const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(30);
/// Delay between tearing subscriptions down and re-establishing them.
const DEFAULT_STABILIZATION_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
/// Immutable runtime configuration injected into [`SyncCore`](crate::sync::SyncCore).
pub struct SyncConfig {
    /// Presence TTL applied by the in-memory presence map.
    pub presence_ttl: Duration,
    /// Interval of the background subscription liveness sweep.
    pub liveness_interval: Duration,
    /// Stabilization delay applied before mass re-subscription.
    pub stabilization_delay: Duration,
    /// Backoff policy applied to subscription establishment.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            presence_ttl: DEFAULT_PRESENCE_TTL,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            stabilization_delay: DEFAULT_STABILIZATION_DELAY,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded sync configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    presence_ttl_ms: u64,
    liveness_interval_ms: u64,
    stabilization_delay_ms: u64,
    retry: RawRetry,
}

#[derive(Debug, Deserialize)]
/// JSON representation of the retry policy section.
struct RawRetry {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl From<RawConfig> for SyncConfig {
    fn from(value: RawConfig) -> Self {
        Self {
            presence_ttl: Duration::from_millis(value.presence_ttl_ms),
            liveness_interval: Duration::from_millis(value.liveness_interval_ms),
            stabilization_delay: Duration::from_millis(value.stabilization_delay_ms),
            retry: RetryPolicy {
                base_delay: Duration::from_millis(value.retry.base_delay_ms),
                max_delay: Duration::from_millis(value.retry.max_delay_ms),
                max_attempts: value.retry.max_attempts,
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_converts_to_durations() {
        let raw = RawConfig {
            presence_ttl_ms: 5_000,
            liveness_interval_ms: 10_000,
            stabilization_delay_ms: 250,
            retry: RawRetry {
                base_delay_ms: 100,
                max_delay_ms: 2_000,
                max_attempts: 4,
            },
        };

        let config: SyncConfig = raw.into();
        assert_eq!(config.presence_ttl, Duration::from_secs(5));
        assert_eq!(config.liveness_interval, Duration::from_secs(10));
        assert_eq!(config.stabilization_delay, Duration::from_millis(250));
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = SyncConfig::default();
        assert_eq!(config.presence_ttl, Duration::from_secs(12));
        assert_eq!(config.liveness_interval, Duration::from_secs(30));
    }
}
