//! In-memory shard backed by a concurrent hash map

use super::{Expiration, RecordEnvelope, Shard, StoredRecord};
use crate::common::{Clock, SystemClock};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use scc::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    table: String,
    key: Vec<u8>,
}

impl RecordKey {
    fn new(table: &str, key: &[u8]) -> Self {
        Self {
            table: table.to_string(),
            key: key.to_vec(),
        }
    }
}

/// Per-shard call counts
#[derive(Debug, Default)]
pub struct ShardCalls {
    pub gets: AtomicU64,
    pub puts: AtomicU64,
    pub deletes: AtomicU64,
    pub touches: AtomicU64,
}

impl ShardCalls {
    pub fn total(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
            + self.puts.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
            + self.touches.load(Ordering::Relaxed)
    }
}

pub struct MemShard {
    name: String,
    map: scc::HashMap<RecordKey, StoredRecord>,
    clock: Arc<dyn Clock>,
    calls: ShardCalls,
}

impl MemShard {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_clock(name, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            map: scc::HashMap::new(),
            clock,
            calls: ShardCalls::default(),
        }
    }

    /// Number of stored records, expired ones included until next access
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn calls(&self) -> &ShardCalls {
        &self.calls
    }
}

#[async_trait]
impl Shard for MemShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, table: &str, key: &[u8]) -> Result<RecordEnvelope<Bytes>> {
        self.calls.gets.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        match self.map.entry_async(RecordKey::new(table, key)).await {
            Entry::Occupied(entry) => {
                if entry.get().is_expired(now) {
                    entry.remove();
                    return Ok(RecordEnvelope::unassigned());
                }
                Ok(entry.get().to_envelope())
            }
            Entry::Vacant(_) => Ok(RecordEnvelope::unassigned()),
        }
    }

    async fn put_raw(
        &self,
        table: &str,
        key: &[u8],
        value: Bytes,
        expiration: Expiration,
    ) -> Result<()> {
        self.calls.puts.fetch_add(1, Ordering::Relaxed);
        let record = StoredRecord::new(value, expiration, self.clock.as_ref());
        match self.map.entry_async(RecordKey::new(table, key)).await {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() = record;
            }
            Entry::Vacant(entry) => {
                entry.insert_entry(record);
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, key: &[u8]) -> Result<bool> {
        self.calls.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .map
            .remove_async(&RecordKey::new(table, key))
            .await
            .is_some())
    }

    async fn touch(&self, table: &str, key: &[u8]) -> Result<()> {
        self.calls.touches.fetch_add(1, Ordering::Relaxed);
        let now = self.clock.now();
        if let Entry::Occupied(mut entry) = self.map.entry_async(RecordKey::new(table, key)).await {
            entry.get_mut().last_use_utc = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use chrono::Utc;

    #[tokio::test]
    async fn test_put_get_delete() {
        let shard = MemShard::new("mem-0");
        shard
            .put_raw("orders", b"k1", Bytes::from_static(b"v1"), Expiration::never())
            .await
            .unwrap();

        let env = shard.get_raw("orders", b"k1").await.unwrap();
        assert_eq!(env.value().unwrap().as_ref(), b"v1");

        // tables are separate namespaces
        assert!(!shard.get_raw("users", b"k1").await.unwrap().is_assigned());

        assert!(shard.delete("orders", b"k1").await.unwrap());
        assert!(!shard.delete("orders", b"k1").await.unwrap());
        assert!(!shard.get_raw("orders", b"k1").await.unwrap().is_assigned());
        assert_eq!(shard.calls().total(), 6);
    }

    #[tokio::test]
    async fn test_sliding_expiration_and_touch() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let shard = MemShard::with_clock("mem-0", clock.clone());
        shard
            .put_raw("t", b"k", Bytes::from_static(b"v"), Expiration::sliding(2))
            .await
            .unwrap();

        clock.advance(chrono::Duration::days(1));
        shard.touch("t", b"k").await.unwrap();
        let env = shard.get_raw("t", b"k").await.unwrap();
        assert_eq!(env.last_use_utc(), clock.now());

        clock.advance(chrono::Duration::days(3));
        assert!(!shard.get_raw("t", b"k").await.unwrap().is_assigned());
        assert!(shard.is_empty());
    }

    #[tokio::test]
    async fn test_absolute_expiration() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let shard = MemShard::with_clock("mem-0", clock.clone());
        let at = clock.now() + chrono::Duration::hours(1);
        shard
            .put_raw("t", b"k", Bytes::from_static(b"v"), Expiration::absolute(at))
            .await
            .unwrap();

        assert!(shard.get_raw("t", b"k").await.unwrap().is_assigned());
        clock.advance(chrono::Duration::hours(2));
        assert!(!shard.get_raw("t", b"k").await.unwrap().is_assigned());
    }

    #[tokio::test]
    async fn test_touch_missing_is_noop() {
        let shard = MemShard::new("mem-0");
        shard.touch("t", b"missing").await.unwrap();
        assert_eq!(shard.len(), 0);
    }
}
