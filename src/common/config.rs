//! Configuration for tierkv

use crate::common::utils::{parse_duration, MAX_TABLE_LEN};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Coordinator tuning
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Ordered tier chain, primary first
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            coordinator: CoordinatorConfig::default(),
            tiers: Vec::new(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `TIERKV__*` environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("TIERKV")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.coordinator.validate()?;
        for (level, tier) in self.tiers.iter().enumerate() {
            if tier.shards.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "tier {} has no shards",
                    level
                )));
            }
        }
        Ok(())
    }
}

/// Coordinator tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Emit counters to the metrics sink on a timer
    #[serde(default)]
    pub instrumentation: bool,

    /// Metrics flush cadence
    #[serde(default = "default_metrics_interval", with = "duration_str")]
    pub metrics_interval: Duration,

    /// Age of `last_use_utc` past which a primary hit schedules a touch
    #[serde(default = "default_touch_after", with = "duration_str")]
    pub touch_after: Duration,

    /// In-flight touches allowed before touches run inline
    #[serde(default = "default_touch_threshold")]
    pub touch_threshold: usize,

    /// Upper bound on table name length
    #[serde(default = "default_max_table_len")]
    pub max_table_len: usize,
}

fn default_metrics_interval() -> Duration {
    Duration::from_secs(3)
}
fn default_touch_after() -> Duration {
    Duration::from_secs(86400)
}
fn default_touch_threshold() -> usize {
    64
}
fn default_max_table_len() -> usize {
    MAX_TABLE_LEN
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            instrumentation: false,
            metrics_interval: default_metrics_interval(),
            touch_after: default_touch_after(),
            touch_threshold: default_touch_threshold(),
            max_table_len: default_max_table_len(),
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.metrics_interval.is_zero() {
            return Err(Error::InvalidConfig("metrics_interval must be > 0".into()));
        }
        if self.touch_threshold == 0 {
            return Err(Error::InvalidConfig("touch_threshold must be > 0".into()));
        }
        if self.max_table_len == 0 {
            return Err(Error::InvalidConfig("max_table_len must be > 0".into()));
        }
        Ok(())
    }
}

/// One level of the fallback chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierConfig {
    pub shards: Vec<ShardConfig>,
}

/// Backing technology of a shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShardConfig {
    Memory,
    Sled { path: PathBuf },
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{}ms", d.as_millis()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
