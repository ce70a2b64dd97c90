//! Persistent shard on top of sled

use super::{Expiration, RecordEnvelope, Shard, StoredRecord};
use crate::common::{Clock, SystemClock};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

pub struct SledShard {
    name: String,
    db: sled::Db,
    clock: Arc<dyn Clock>,
}

impl SledShard {
    pub fn open(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_clock(name, path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        let db = sled::open(path.as_ref()).map_err(|e| Error::shard(name.clone(), e))?;
        Ok(Self { name, db, clock })
    }

    /// `table \0 key`; table names never contain NUL
    fn storage_key(table: &str, key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(table.len() + 1 + key.len());
        out.extend_from_slice(table.as_bytes());
        out.push(0);
        out.extend_from_slice(key);
        out
    }

    fn decode(&self, raw: &[u8]) -> Result<StoredRecord> {
        bincode::deserialize(raw).map_err(|e| self.err(format!("corrupted record: {}", e)))
    }

    fn store(&self, storage_key: &[u8], record: &StoredRecord) -> Result<()> {
        let raw = bincode::serialize(record).map_err(|e| self.err(e))?;
        self.db.insert(storage_key, raw).map_err(|e| self.err(e))?;
        Ok(())
    }

    fn err(&self, reason: impl std::fmt::Display) -> Error {
        Error::shard(self.name.clone(), reason)
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| self.err(e))?;
        Ok(())
    }
}

#[async_trait]
impl Shard for SledShard {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_raw(&self, table: &str, key: &[u8]) -> Result<RecordEnvelope<Bytes>> {
        let storage_key = Self::storage_key(table, key);
        let mut current = self.db.get(&storage_key).map_err(|e| self.err(e))?;
        loop {
            let Some(raw) = current else {
                return Ok(RecordEnvelope::unassigned());
            };
            let record = self.decode(&raw)?;
            if !record.is_expired(self.clock.now()) {
                return Ok(record.to_envelope());
            }
            // only remove the exact bytes that expired; a concurrent put wins
            match self
                .db
                .compare_and_swap(&storage_key, Some(&raw), None as Option<&[u8]>)
                .map_err(|e| self.err(e))?
            {
                Ok(()) => return Ok(RecordEnvelope::unassigned()),
                Err(conflict) => current = conflict.current,
            }
        }
    }

    async fn put_raw(
        &self,
        table: &str,
        key: &[u8],
        value: Bytes,
        expiration: Expiration,
    ) -> Result<()> {
        let record = StoredRecord::new(value, expiration, self.clock.as_ref());
        self.store(&Self::storage_key(table, key), &record)
    }

    async fn delete(&self, table: &str, key: &[u8]) -> Result<bool> {
        let removed = self
            .db
            .remove(Self::storage_key(table, key))
            .map_err(|e| self.err(e))?;
        Ok(removed.is_some())
    }

    async fn touch(&self, table: &str, key: &[u8]) -> Result<()> {
        let now = self.clock.now();
        // rewrite last_use on whatever record is current at update time
        self.db
            .update_and_fetch(Self::storage_key(table, key), |current| {
                let raw = current?;
                match bincode::deserialize::<StoredRecord>(raw) {
                    Ok(mut record) => {
                        record.last_use_utc = now;
                        bincode::serialize(&record).ok().or_else(|| Some(raw.to_vec()))
                    }
                    Err(_) => Some(raw.to_vec()),
                }
            })
            .map_err(|e| self.err(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ManualClock;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Mutex};
    use tempfile::TempDir;

    /// Parks the first armed `now()` call until released
    struct GateClock {
        base: DateTime<Utc>,
        armed: AtomicBool,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Clock for GateClock {
        fn now(&self) -> DateTime<Utc> {
            if self.armed.swap(false, Ordering::AcqRel) {
                let _ = self.entered.lock().unwrap().send(());
                let _ = self.release.lock().unwrap().recv();
            }
            self.base
        }
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shard");

        {
            let shard = SledShard::open("sled-0", &path).unwrap();
            shard
                .put_raw("orders", &[1, 2], Bytes::from_static(b"v1"), Expiration::sliding(5))
                .await
                .unwrap();
            shard.flush().await.unwrap();
        }

        let shard = SledShard::open("sled-0", &path).unwrap();
        let env = shard.get_raw("orders", &[1, 2]).await.unwrap();
        assert_eq!(env.value().unwrap().as_ref(), b"v1");
        assert_eq!(env.sliding_expiration_days(), 5);

        assert!(shard.delete("orders", &[1, 2]).await.unwrap());
        assert!(!shard.get_raw("orders", &[1, 2]).await.unwrap().is_assigned());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_touch_keeps_concurrent_put() {
        let dir = TempDir::new().unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let clock = Arc::new(GateClock {
            base: Utc::now(),
            armed: AtomicBool::new(false),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let shard = Arc::new(
            SledShard::open_with_clock("sled-0", dir.path().join("shard"), clock.clone()).unwrap(),
        );
        shard
            .put_raw("t", b"k", Bytes::from_static(b"old"), Expiration::never())
            .await
            .unwrap();

        clock.armed.store(true, Ordering::Release);
        let toucher = {
            let shard = shard.clone();
            tokio::spawn(async move { shard.touch("t", b"k").await })
        };
        tokio::task::spawn_blocking(move || entered_rx.recv().unwrap())
            .await
            .unwrap();

        // lands while the touch is parked
        shard
            .put_raw("t", b"k", Bytes::from_static(b"new"), Expiration::never())
            .await
            .unwrap();
        release_tx.send(()).unwrap();
        toucher.await.unwrap().unwrap();

        let env = shard.get_raw("t", b"k").await.unwrap();
        assert_eq!(env.value().unwrap().as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_expired_record_removed_on_read() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let shard =
            SledShard::open_with_clock("sled-0", dir.path().join("shard"), clock.clone()).unwrap();

        shard
            .put_raw("t", b"k", Bytes::from_static(b"v"), Expiration::sliding(1))
            .await
            .unwrap();
        clock.advance(chrono::Duration::days(2));
        assert!(!shard.get_raw("t", b"k").await.unwrap().is_assigned());
        assert!(!shard.delete("t", b"k").await.unwrap());

        shard
            .put_raw("t", b"k", Bytes::from_static(b"v2"), Expiration::sliding(1))
            .await
            .unwrap();
        clock.advance(chrono::Duration::hours(12));
        shard.touch("t", b"k").await.unwrap();
        clock.advance(chrono::Duration::hours(20));
        let env = shard.get_raw("t", b"k").await.unwrap();
        assert_eq!(env.value().unwrap().as_ref(), b"v2");
        assert_eq!(env.last_use_utc(), clock.now() - chrono::Duration::hours(20));
    }
}
