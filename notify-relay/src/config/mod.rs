//! Relay configuration.
//!
//! Settings are plain serde structs with defaults matching the deployed
//! notification service. [`RelayConfig::from_env`] layers environment
//! overrides (optionally loaded from a `.env` file) on top of the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consumer::ReconnectPolicy;
use crate::{Error, Result};

/// Seven days, the lifetime of a recipient's cached notification list.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Default number of records returned by `list_recent`.
pub const DEFAULT_RECENT_LIMIT: usize = 50;

/// Default number of records returned for a single recipient.
pub const DEFAULT_RECIPIENT_LIMIT: usize = 20;

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub broker: BrokerSettings,
    pub cache: CacheSettings,
    pub reconnect: ReconnectPolicy,
    pub logging: LoggingSettings,
}

/// Broker subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Topic carrying domain events.
    pub topic: String,
    /// Consumer group used for offset commits.
    pub group_id: String,
    /// Upper bound for subscribe/commit/publish calls, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            topic: "app-events".to_string(),
            group_id: "notification-service-group".to_string(),
            operation_timeout_ms: 5_000,
        }
    }
}

impl BrokerSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Per-recipient cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache connection URL (only used by networked backends).
    pub url: String,
    /// Prefix for per-recipient list keys (`<prefix>:<recipient>`).
    pub key_prefix: String,
    /// Expiry applied on every write to a recipient list.
    pub ttl_secs: u64,
    /// Maximum entries kept per recipient list.
    pub max_entries: usize,
    /// Upper bound for a single cache call, in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: "redis://redis-service:6379".to_string(),
            key_prefix: "notifications".to_string(),
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
            max_entries: 100,
            operation_timeout_ms: 2_000,
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Cache key holding a recipient's notification list.
    pub fn recipient_key(&self, recipient_id: &str) -> String {
        format!("{}:{}", self.key_prefix, recipient_id)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set.
    pub filter: String,
    /// Directory for daily-rotated log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: crate::logging::DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
        }
    }
}

impl RelayConfig {
    /// Build the configuration from defaults plus environment overrides.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(topic) = lookup("NOTIFY_TOPIC") {
            self.broker.topic = topic;
        }
        if let Some(group_id) = lookup("NOTIFY_GROUP_ID") {
            self.broker.group_id = group_id;
        }

        if let Some(url) = lookup("REDIS_URL") {
            self.cache.url = url;
        } else if lookup("REDIS_HOST").is_some() || lookup("REDIS_PORT").is_some() {
            let host = lookup("REDIS_HOST").unwrap_or_else(|| "redis-service".to_string());
            let port: u16 = parse_var(&lookup, "REDIS_PORT")?.unwrap_or(6379);
            self.cache.url = format!("redis://{}:{}", host, port);
        }
        if let Some(ttl) = parse_var(&lookup, "NOTIFY_CACHE_TTL_SECS")? {
            self.cache.ttl_secs = ttl;
        }
        if let Some(max_entries) = parse_var(&lookup, "NOTIFY_CACHE_MAX_ENTRIES")? {
            self.cache.max_entries = max_entries;
        }

        if let Some(filter) = lookup("NOTIFY_LOG_FILTER") {
            self.logging.filter = filter;
        }
        if let Some(dir) = lookup("LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.broker.topic.trim().is_empty() {
            return Err(Error::config("broker topic must not be empty"));
        }
        if self.broker.operation_timeout_ms == 0 || self.cache.operation_timeout_ms == 0 {
            return Err(Error::config("operation timeouts must be non-zero"));
        }
        if self.cache.ttl_secs == 0 {
            return Err(Error::config("cache ttl must be non-zero"));
        }
        if self.cache.ttl_secs > DEFAULT_CACHE_TTL_SECS {
            return Err(Error::config(format!(
                "cache ttl must not exceed {} seconds",
                DEFAULT_CACHE_TTL_SECS
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::config("cache max_entries must be non-zero"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::config(format!("invalid {}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.broker.topic, "app-events");
        assert_eq!(config.broker.group_id, "notification-service-group");
        assert_eq!(config.cache.ttl(), Duration::from_secs(604_800));
        assert_eq!(config.cache.recipient_key("u1"), "notifications:u1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let mut config = RelayConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("NOTIFY_TOPIC", "domain-events"),
                ("REDIS_HOST", "cache.local"),
                ("REDIS_PORT", "6380"),
                ("NOTIFY_CACHE_MAX_ENTRIES", "10"),
            ]))
            .unwrap();

        assert_eq!(config.broker.topic, "domain-events");
        assert_eq!(config.cache.url, "redis://cache.local:6380");
        assert_eq!(config.cache.max_entries, 10);
    }

    #[test]
    fn test_invalid_numeric_override() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("NOTIFY_CACHE_TTL_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = RelayConfig::default();
        config.cache.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_ttl_over_seven_days() {
        let mut config = RelayConfig::default();
        config.cache.ttl_secs = DEFAULT_CACHE_TTL_SECS;
        assert!(config.validate().is_ok());

        let huge = u64::MAX.to_string();
        config
            .apply_overrides(lookup_from(&[("NOTIFY_CACHE_TTL_SECS", huge.as_str())]))
            .unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        config.cache.ttl_secs = DEFAULT_CACHE_TTL_SECS + 1;
        assert!(config.validate().is_err());
    }
}
