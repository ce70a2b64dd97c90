//! Tier chain
//!
//! A tier is one level of the fallback chain: a fixed shard set plus a
//! deterministic router. Level 0 is the primary tier and the only one that
//! receives writes. The chain is built once and never changes afterwards.

use crate::common::shard_index;
use crate::shard::Shard;
use crate::{Error, Result};
use std::sync::Arc;

/// Maps a key to one shard index within a tier
pub trait TierRouter: Send + Sync {
    /// Must be a pure function of `key` and `shard_count`
    fn route(&self, key: &[u8], shard_count: usize) -> usize;
}

/// BLAKE3-modulo placement
#[derive(Debug, Default, Clone, Copy)]
pub struct HashRouter;

impl TierRouter for HashRouter {
    fn route(&self, key: &[u8], shard_count: usize) -> usize {
        shard_index(key, shard_count)
    }
}

/// Declarative description of one tier, in chain order
pub struct TierSpec {
    shards: Vec<Arc<dyn Shard>>,
    router: Arc<dyn TierRouter>,
}

impl TierSpec {
    pub fn new(shards: Vec<Arc<dyn Shard>>) -> Self {
        Self {
            shards,
            router: Arc::new(HashRouter),
        }
    }

    pub fn with_router(mut self, router: Arc<dyn TierRouter>) -> Self {
        self.router = router;
        self
    }
}

pub struct Tier {
    fallback_level: usize,
    shards: Vec<Arc<dyn Shard>>,
    router: Arc<dyn TierRouter>,
    next: Option<Box<Tier>>,
}

impl Tier {
    pub fn fallback_level(&self) -> usize {
        self.fallback_level
    }

    pub fn is_primary(&self) -> bool {
        self.fallback_level == 0
    }

    pub fn shards(&self) -> &[Arc<dyn Shard>] {
        &self.shards
    }

    pub fn next(&self) -> Option<&Tier> {
        self.next.as_deref()
    }

    /// Shard that owns `key` in this tier
    pub fn route_key(&self, key: &[u8]) -> &Arc<dyn Shard> {
        let idx = self.router.route(key, self.shards.len());
        // routers returning out-of-range indices are clamped rather than trusted
        &self.shards[idx % self.shards.len()]
    }
}

impl std::fmt::Debug for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tier")
            .field("fallback_level", &self.fallback_level)
            .field(
                "shards",
                &self.shards.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .field("next", &self.next)
            .finish()
    }
}

/// Singly linked, acyclic list of tiers with strictly increasing levels
#[derive(Debug, Default)]
pub struct TierChain {
    head: Option<Box<Tier>>,
    len: usize,
}

impl TierChain {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Link `specs` in order; the first spec becomes level 0
    pub fn build(specs: Vec<TierSpec>) -> Result<Self> {
        let len = specs.len();
        let mut head: Option<Box<Tier>> = None;
        for (level, spec) in specs.into_iter().enumerate().rev() {
            if spec.shards.is_empty() {
                return Err(Error::InvalidConfig(format!("tier {} has no shards", level)));
            }
            head = Some(Box::new(Tier {
                fallback_level: level,
                shards: spec.shards,
                router: spec.router,
                next: head,
            }));
        }
        Ok(Self { head, len })
    }

    pub fn primary(&self) -> Option<&Tier> {
        self.head.as_deref()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn iter(&self) -> TierIter<'_> {
        TierIter {
            current: self.primary(),
        }
    }

    pub fn tier(&self, level: usize) -> Option<&Tier> {
        self.iter().nth(level)
    }
}

pub struct TierIter<'a> {
    current: Option<&'a Tier>,
}

impl<'a> Iterator for TierIter<'a> {
    type Item = &'a Tier;

    fn next(&mut self) -> Option<Self::Item> {
        let tier = self.current?;
        self.current = tier.next();
        Some(tier)
    }
}
