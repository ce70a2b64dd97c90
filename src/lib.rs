//! # tierkv
//!
//! A tiered key/value store coordinator with:
//! - Read-through fallback across an ordered chain of storage tiers
//! - Write-back promotion of fallback hits into the primary tier
//! - Delete fan-out so stale fallback copies can be purged
//! - Throttled background refresh of stale primary records
//! - Lock-free per-table counters flushed on a timer
//!
//! ## Architecture
//!
//! ```text
//!            ┌──────────────────────┐
//!  caller ──▶│   StoreCoordinator   │── counters ──▶ MetricsSink
//!            └──────────┬───────────┘
//!                       │ get: first hit wins, put: tier 0 only, delete: all tiers
//!   ┌───────────────────▼──┐   next   ┌──────────────────────┐   next   ┌─────────┐
//!   │ Tier 0 (primary)     │─────────▶│ Tier 1               │─────────▶│ Tier N  │
//!   │ router → shard 0..n  │          │ router → shard 0..m  │          │  ...    │
//!   └──────────────────────┘          └──────────────────────┘          └─────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tierkv::coordinator::{TierChain, TierSpec};
//! use tierkv::shard::{Expiration, MemShard, Shard};
//! use tierkv::{CoordinatorConfig, StoreCoordinator};
//!
//! # async fn run() -> tierkv::Result<()> {
//! let primary: Vec<Arc<dyn Shard>> = vec![Arc::new(MemShard::new("hot"))];
//! let archive: Vec<Arc<dyn Shard>> = vec![Arc::new(MemShard::new("cold"))];
//!
//! let coord = StoreCoordinator::new(CoordinatorConfig::default());
//! coord.configure(TierChain::build(vec![TierSpec::new(primary), TierSpec::new(archive)])?)?;
//! coord.start()?;
//!
//! coord.put("orders", b"o-1", "pending", Expiration::never()).await?;
//! let order = coord.get::<String>("orders", b"o-1", false).await?;
//! assert!(order.is_assigned());
//!
//! coord.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod common;
pub mod coordinator;
pub mod shard;

// Re-export commonly used types
pub use common::{Config, CoordinatorConfig, Error, Result};
pub use coordinator::StoreCoordinator;
pub use shard::{Expiration, RecordEnvelope, Shard};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
