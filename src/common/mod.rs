//! Common utilities and types shared across tierkv

pub mod clock;
pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, CoordinatorConfig, ShardConfig, TierConfig};
pub use error::{Error, Result};
pub use hash::{key_hash, shard_index};
pub use metrics::{CounterKind, CounterSample, MemorySink, MetricsCollector, MetricsSink, TracingSink};
pub use utils::{display_key, is_stale, parse_duration, validate_key, validate_table, WILDCARD_TABLE};
