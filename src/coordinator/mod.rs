//! Tiered store coordinator
//!
//! The coordinator is responsible for:
//! - Read-through fallback across the tier chain
//! - Write-back promotion of fallback hits into the primary tier
//! - Delete fan-out to every tier
//! - Throttled background touches for stale primary hits
//! - Lifecycle and the metrics flush timer

pub mod server;
pub mod tier;
pub mod touch;

pub use server::{CoordinatorState, StoreCoordinator};
pub use tier::{HashRouter, Tier, TierChain, TierRouter, TierSpec};
pub use touch::{TouchMode, TouchScheduler};
