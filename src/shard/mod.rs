//! Shard contract
//!
//! A shard is one physical storage partition inside a tier. The coordinator
//! only ever talks to `dyn Shard`; each backing technology provides its own
//! implementation.

pub mod factory;
pub mod memory;
#[cfg(feature = "sled-backend")]
pub mod sled_shard;

pub use factory::{build_chain, build_shard};
pub use memory::MemShard;
#[cfg(feature = "sled-backend")]
pub use sled_shard::SledShard;

use crate::common::Clock;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Expiration policy attached to a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiration {
    /// Days of inactivity after which the record expires; negative disables
    pub sliding_days: i32,
    /// Hard expiry instant
    pub absolute_utc: Option<DateTime<Utc>>,
}

impl Default for Expiration {
    fn default() -> Self {
        Self {
            sliding_days: -1,
            absolute_utc: None,
        }
    }
}

impl Expiration {
    pub fn never() -> Self {
        Self::default()
    }

    pub fn sliding(days: i32) -> Self {
        Self {
            sliding_days: days,
            absolute_utc: None,
        }
    }

    pub fn absolute(at: DateTime<Utc>) -> Self {
        Self {
            sliding_days: -1,
            absolute_utc: Some(at),
        }
    }

    /// Has a record last used at `last_use` expired at `now`?
    pub fn is_expired(&self, last_use: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if let Some(at) = self.absolute_utc {
            if at <= now {
                return true;
            }
        }
        self.sliding_days >= 0
            && now.signed_duration_since(last_use) > chrono::Duration::days(self.sliding_days.into())
    }
}

/// Result of a lookup. An unassigned envelope is the canonical miss.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEnvelope<T> {
    value: Option<T>,
    expiration: Expiration,
    last_use_utc: DateTime<Utc>,
}

impl<T> RecordEnvelope<T> {
    pub fn assigned(value: T, expiration: Expiration, last_use_utc: DateTime<Utc>) -> Self {
        Self {
            value: Some(value),
            expiration,
            last_use_utc,
        }
    }

    pub fn unassigned() -> Self {
        Self {
            value: None,
            expiration: Expiration::default(),
            last_use_utc: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    pub fn sliding_expiration_days(&self) -> i32 {
        self.expiration.sliding_days
    }

    pub fn absolute_expiration_utc(&self) -> Option<DateTime<Utc>> {
        self.expiration.absolute_utc
    }

    pub fn last_use_utc(&self) -> DateTime<Utc> {
        self.last_use_utc
    }

    pub fn try_map<U, E>(
        self,
        f: impl FnOnce(T) -> std::result::Result<U, E>,
    ) -> std::result::Result<RecordEnvelope<U>, E> {
        let value = match self.value {
            Some(v) => Some(f(v)?),
            None => None,
        };
        Ok(RecordEnvelope {
            value,
            expiration: self.expiration,
            last_use_utc: self.last_use_utc,
        })
    }
}

impl<T> Default for RecordEnvelope<T> {
    fn default() -> Self {
        Self::unassigned()
    }
}

impl RecordEnvelope<Bytes> {
    /// Decode a raw envelope into a typed one
    pub fn decode<T: DeserializeOwned>(self) -> Result<RecordEnvelope<T>> {
        self.try_map(|raw| serde_json::from_slice(&raw).map_err(Error::from))
    }
}

/// Encode a typed payload; a value that serializes to `null` is rejected
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let raw = serde_json::to_vec(value)?;
    if raw == b"null" {
        return Err(Error::validation("value", "value cannot be null"));
    }
    Ok(Bytes::from(raw))
}

/// A single storage partition
#[async_trait]
pub trait Shard: Send + Sync {
    /// Identifier used in logs and errors
    fn name(&self) -> &str;

    async fn get_raw(&self, table: &str, key: &[u8]) -> Result<RecordEnvelope<Bytes>>;

    async fn put_raw(
        &self,
        table: &str,
        key: &[u8],
        value: Bytes,
        expiration: Expiration,
    ) -> Result<()>;

    /// Returns true if a record was removed
    async fn delete(&self, table: &str, key: &[u8]) -> Result<bool>;

    /// Refresh the record's last-use time; absent records are ignored
    async fn touch(&self, table: &str, key: &[u8]) -> Result<()>;
}

/// Record layout shared by the bundled shard backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub value: Bytes,
    pub expiration: Expiration,
    pub last_use_utc: DateTime<Utc>,
}

impl StoredRecord {
    pub fn new(value: Bytes, expiration: Expiration, clock: &dyn Clock) -> Self {
        Self {
            value,
            expiration,
            last_use_utc: clock.now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.is_expired(self.last_use_utc, now)
    }

    pub fn to_envelope(&self) -> RecordEnvelope<Bytes> {
        RecordEnvelope::assigned(self.value.clone(), self.expiration, self.last_use_utc)
    }
}
