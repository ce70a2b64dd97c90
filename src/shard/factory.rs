//! Build shards and tier chains from configuration

use super::{MemShard, Shard};
use crate::common::{Clock, ShardConfig, TierConfig};
use crate::coordinator::{TierChain, TierSpec};
use crate::{Error, Result};
use std::sync::Arc;

/// Instantiate one shard
pub fn build_shard(name: String, config: &ShardConfig, clock: Arc<dyn Clock>) -> Result<Arc<dyn Shard>> {
    match config {
        ShardConfig::Memory => Ok(Arc::new(MemShard::with_clock(name, clock))),
        #[cfg(feature = "sled-backend")]
        ShardConfig::Sled { path } => Ok(Arc::new(super::SledShard::open_with_clock(
            name, path, clock,
        )?)),
        #[cfg(not(feature = "sled-backend"))]
        ShardConfig::Sled { path } => Err(Error::InvalidConfig(format!(
            "shard {} at {} needs the `sled-backend` feature",
            name,
            path.display()
        ))),
    }
}

/// Instantiate every tier, primary first
pub fn build_chain(tiers: &[TierConfig], clock: Arc<dyn Clock>) -> Result<TierChain> {
    let mut specs = Vec::with_capacity(tiers.len());
    for (level, tier) in tiers.iter().enumerate() {
        if tier.shards.is_empty() {
            return Err(Error::InvalidConfig(format!("tier {} has no shards", level)));
        }
        let shards = tier
            .shards
            .iter()
            .enumerate()
            .map(|(idx, shard)| build_shard(format!("tier{}/shard{}", level, idx), shard, clock.clone()))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(level, shards = shards.len(), "tier built");
        specs.push(TierSpec::new(shards));
    }
    TierChain::build(specs)
}
