//! Store coordinator
//!
//! Routes table/key operations across the tier chain:
//! - reads walk the chain until the first hit and promote fallback hits into the primary tier
//! - writes only ever go to the primary tier
//! - deletes fan out to every tier
//!
//! Counters are always collected. Instrumentation only decides whether they
//! are periodically flushed to the metrics sink.

use crate::common::{
    display_key, is_stale, validate_key, validate_table, Clock, CoordinatorConfig, CounterKind,
    MetricsCollector, MetricsSink, SystemClock, TracingSink,
};
use crate::common::metrics::run_flush_loop;
use crate::coordinator::tier::{Tier, TierChain};
use crate::coordinator::touch::{TouchMode, TouchScheduler};
use crate::shard::{encode_value, Expiration, RecordEnvelope};
use crate::{Error, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordinatorState {
    Created = 0,
    Configured = 1,
    Started = 2,
    Running = 3,
    StopSignaled = 4,
    Stopped = 5,
}

impl CoordinatorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CoordinatorState::Created,
            1 => CoordinatorState::Configured,
            2 => CoordinatorState::Started,
            3 => CoordinatorState::Running,
            4 => CoordinatorState::StopSignaled,
            _ => CoordinatorState::Stopped,
        }
    }
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorState::Created => write!(f, "created"),
            CoordinatorState::Configured => write!(f, "configured"),
            CoordinatorState::Started => write!(f, "started"),
            CoordinatorState::Running => write!(f, "running"),
            CoordinatorState::StopSignaled => write!(f, "stop-signaled"),
            CoordinatorState::Stopped => write!(f, "stopped"),
        }
    }
}

pub struct StoreCoordinator {
    config: CoordinatorConfig,
    state: AtomicU8,
    staged: Mutex<Option<TierChain>>,
    chain: OnceLock<TierChain>,
    metrics: Arc<MetricsCollector>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    touches: TouchScheduler,
    instrumentation: AtomicBool,
    flush_token: Mutex<Option<CancellationToken>>,
    background: TaskTracker,
}

impl StoreCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MetricsCollector::new()),
            Arc::new(TracingSink),
            Arc::new(SystemClock),
        )
    }

    /// Build with an injected counter registry, metrics sink and clock
    pub fn with_parts(
        config: CoordinatorConfig,
        metrics: Arc<MetricsCollector>,
        sink: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let touches = TouchScheduler::new(config.touch_threshold, metrics.clone());
        let instrumentation = AtomicBool::new(config.instrumentation);
        Self {
            config,
            state: AtomicU8::new(CoordinatorState::Created as u8),
            staged: Mutex::new(None),
            chain: OnceLock::new(),
            metrics,
            sink,
            clock,
            touches,
            instrumentation,
            flush_token: Mutex::new(None),
            background: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn touches(&self) -> &TouchScheduler {
        &self.touches
    }

    /// The active tier chain, once started
    pub fn chain(&self) -> Option<&TierChain> {
        self.chain.get()
    }

    fn transition(&self, from: CoordinatorState, to: CoordinatorState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| Error::InvalidTransition {
                from: CoordinatorState::from_u8(actual).to_string(),
                to: to.to_string(),
            })
    }

    /// Install the tier chain. May be repeated until `start`.
    pub fn configure(&self, chain: TierChain) -> Result<()> {
        let mut staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
        match self.state() {
            CoordinatorState::Created => {
                self.transition(CoordinatorState::Created, CoordinatorState::Configured)?
            }
            CoordinatorState::Configured => {}
            other => {
                return Err(Error::InvalidTransition {
                    from: other.to_string(),
                    to: CoordinatorState::Configured.to_string(),
                })
            }
        }
        tracing::info!(tiers = chain.len(), "tier chain configured");
        *staged = Some(chain);
        Ok(())
    }

    /// Activate the configured chain and begin serving
    pub fn start(&self) -> Result<()> {
        let mut staged = self.staged.lock().unwrap_or_else(|e| e.into_inner());
        if self.state() == CoordinatorState::Created {
            return Err(Error::EmptyTierChain);
        }
        self.transition(CoordinatorState::Configured, CoordinatorState::Started)?;

        let chain = match staged.take() {
            Some(chain) if !chain.is_empty() => chain,
            other => {
                *staged = other;
                self.state
                    .store(CoordinatorState::Configured as u8, Ordering::Release);
                return Err(Error::EmptyTierChain);
            }
        };
        let tiers = chain.len();
        if self.chain.set(chain).is_err() {
            return Err(Error::Internal("tier chain already installed".into()));
        }

        if self.instrumentation.load(Ordering::Acquire) {
            if let Err(e) = self.spawn_flush_loop() {
                self.state
                    .store(CoordinatorState::Stopped as u8, Ordering::Release);
                return Err(e);
            }
        }

        self.transition(CoordinatorState::Started, CoordinatorState::Running)?;
        tracing::info!(
            tiers,
            instrumentation = self.instrumentation.load(Ordering::Acquire),
            touch_threshold = self.touches.threshold(),
            "coordinator running"
        );
        Ok(())
    }

    /// Signal stop, tear down the metrics timer and wait for outstanding touches
    pub async fn stop(&self) -> Result<()> {
        loop {
            let current = self.state();
            let next = match current {
                CoordinatorState::StopSignaled | CoordinatorState::Stopped => return Ok(()),
                CoordinatorState::Running => CoordinatorState::StopSignaled,
                _ => CoordinatorState::Stopped,
            };
            if self.transition(current, next).is_ok() {
                if next == CoordinatorState::Stopped {
                    tracing::info!("coordinator stopped before start");
                    return Ok(());
                }
                break;
            }
        }

        tracing::info!("coordinator stopping");
        self.cancel_flush_loop();
        self.background.close();
        self.background.wait().await;
        self.touches.shutdown().await;

        self.state
            .store(CoordinatorState::Stopped as u8, Ordering::Release);
        tracing::info!("coordinator stopped");
        Ok(())
    }

    /// Turn periodic emission on or off. Enabling zeroes every counter.
    pub fn set_instrumentation(&self, enabled: bool) -> Result<()> {
        let state = self.state();
        if matches!(
            state,
            CoordinatorState::StopSignaled | CoordinatorState::Stopped
        ) {
            return Err(Error::NotRunning {
                operation: "set_instrumentation",
                state: state.to_string(),
            });
        }

        let was = self.instrumentation.swap(enabled, Ordering::AcqRel);
        match (was, enabled) {
            (false, true) => {
                self.metrics.reset();
                if state == CoordinatorState::Running {
                    self.spawn_flush_loop()?;
                }
                tracing::info!("instrumentation enabled");
            }
            (true, false) => {
                self.cancel_flush_loop();
                tracing::info!("instrumentation disabled");
            }
            _ => {}
        }
        Ok(())
    }

    pub fn instrumentation_enabled(&self) -> bool {
        self.instrumentation.load(Ordering::Acquire)
    }

    fn spawn_flush_loop(&self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Internal(format!("metrics timer needs a tokio runtime: {}", e)))?;
        let token = CancellationToken::new();
        let previous = self
            .flush_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        self.background.spawn_on(
            run_flush_loop(
                self.metrics.clone(),
                self.sink.clone(),
                self.config.metrics_interval,
                token,
            ),
            &handle,
        );
        Ok(())
    }

    fn cancel_flush_loop(&self) {
        let token = self
            .flush_token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    fn running_chain(&self, operation: &'static str) -> Result<&TierChain> {
        let state = self.state();
        if state != CoordinatorState::Running {
            return Err(Error::NotRunning {
                operation,
                state: state.to_string(),
            });
        }
        self.chain.get().ok_or_else(|| Error::NotRunning {
            operation,
            state: state.to_string(),
        })
    }

    /// Check table name and key before any tier is touched
    pub fn validate(&self, table: &str, key: &[u8]) -> Result<()> {
        validate_table(table, self.config.max_table_len)?;
        validate_key(key)
    }

    fn primary<'a>(&self, chain: &'a TierChain) -> Result<&'a Tier> {
        chain.primary().ok_or(Error::EmptyTierChain)
    }

    /// Read through the tier chain
    pub async fn get_raw(
        &self,
        table: &str,
        key: &[u8],
        skip_touch: bool,
    ) -> Result<RecordEnvelope<Bytes>> {
        let chain = self.running_chain("get")?;
        self.validate(table, key)?;

        for tier in chain.iter() {
            let shard = tier.route_key(key);
            // an error is not a miss: it ends the walk
            let record = shard.get_raw(table, key).await?;
            if !record.is_assigned() {
                tracing::trace!(table, level = tier.fallback_level(), "tier miss");
                continue;
            }

            if tier.is_primary() {
                self.metrics.incr(CounterKind::Hit, table);
                let stale = is_stale(record.last_use_utc(), self.clock.now(), self.config.touch_after);
                if !skip_touch && stale {
                    let mode = self
                        .touches
                        .schedule(shard.clone(), table.to_string(), Bytes::copy_from_slice(key))
                        .await;
                    if mode != TouchMode::Skipped {
                        self.metrics.incr(CounterKind::Touch, table);
                    }
                }
            } else {
                self.metrics.incr(CounterKind::FallbackHit, table);
                self.promote(chain, tier, table, key, &record).await;
            }
            return Ok(record);
        }

        self.metrics.incr(CounterKind::Miss, table);
        Ok(RecordEnvelope::unassigned())
    }

    /// Typed read; payloads are JSON encoded
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &[u8],
        skip_touch: bool,
    ) -> Result<RecordEnvelope<T>> {
        self.get_raw(table, key, skip_touch).await?.decode()
    }

    /// Copy a fallback hit into the primary tier. Failures are counted and logged only.
    async fn promote(
        &self,
        chain: &TierChain,
        found_in: &Tier,
        table: &str,
        key: &[u8],
        record: &RecordEnvelope<Bytes>,
    ) {
        let Some(value) = record.value() else {
            return;
        };
        self.metrics.incr(CounterKind::Migration, table);

        let result = match self.primary(chain) {
            Ok(primary) => {
                primary
                    .route_key(key)
                    .put_raw(table, key, value.clone(), record.expiration())
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => tracing::debug!(
                table,
                level = found_in.fallback_level(),
                key = %display_key(key),
                "promoted record into primary tier"
            ),
            Err(e) => {
                self.metrics.incr(CounterKind::Error, table);
                tracing::warn!(
                    operation = "promote",
                    table,
                    level = found_in.fallback_level(),
                    key = %display_key(key),
                    "promotion write-back failed: {}",
                    e
                );
            }
        }
    }

    /// Write to the primary tier
    pub async fn put_raw(
        &self,
        table: &str,
        key: &[u8],
        value: impl Into<Bytes>,
        expiration: Expiration,
    ) -> Result<()> {
        let chain = self.running_chain("put")?;
        self.validate(table, key)?;
        self.write_primary(chain, table, key, value.into(), expiration)
            .await
    }

    /// Typed write; a value that serializes to `null` is rejected
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        table: &str,
        key: &[u8],
        value: &T,
        expiration: Expiration,
    ) -> Result<()> {
        let chain = self.running_chain("put")?;
        self.validate(table, key)?;
        let value = encode_value(value)?;
        self.write_primary(chain, table, key, value, expiration)
            .await
    }

    async fn write_primary(
        &self,
        chain: &TierChain,
        table: &str,
        key: &[u8],
        value: Bytes,
        expiration: Expiration,
    ) -> Result<()> {
        let primary = self.primary(chain)?;
        primary
            .route_key(key)
            .put_raw(table, key, value, expiration)
            .await?;
        self.metrics.incr(CounterKind::Put, table);
        Ok(())
    }

    /// Delete from every tier. Returns true if any tier removed a record.
    ///
    /// Every tier is attempted even if one fails; the first shard error is
    /// returned once the fan-out completes.
    pub async fn delete(&self, table: &str, key: &[u8]) -> Result<bool> {
        let chain = self.running_chain("delete")?;
        self.validate(table, key)?;

        let mut deleted = false;
        let mut first_error = None;
        for tier in chain.iter() {
            match tier.route_key(key).delete(table, key).await {
                Ok(true) => {
                    deleted = true;
                    let kind = if tier.is_primary() {
                        CounterKind::DeleteHit
                    } else {
                        CounterKind::DeleteFallbackHit
                    };
                    self.metrics.incr(kind, table);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(table, level = tier.fallback_level(), "delete failed: {}", e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if !deleted {
            self.metrics.incr(CounterKind::DeleteMiss, table);
        }
        Ok(deleted)
    }
}
