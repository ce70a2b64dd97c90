//! Background last-use refresh
//!
//! Touches run detached while fewer than `threshold` are in flight. Past the
//! threshold the caller awaits the touch itself, so a read burst degrades to
//! slower reads instead of an unbounded task backlog.

use crate::common::{display_key, CounterKind, MetricsCollector};
use crate::shard::Shard;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// How a scheduled touch was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchMode {
    Detached,
    Inline,
    /// Scheduler already shut down; nothing ran
    Skipped,
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct TouchScheduler {
    in_flight: Arc<AtomicUsize>,
    threshold: usize,
    tracker: TaskTracker,
    metrics: Arc<MetricsCollector>,
}

impl TouchScheduler {
    pub fn new(threshold: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            threshold,
            tracker: TaskTracker::new(),
            metrics,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Refresh `key` on `shard`. Failures are counted and logged, never returned.
    pub async fn schedule(&self, shard: Arc<dyn Shard>, table: String, key: Bytes) -> TouchMode {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = InFlight(self.in_flight.clone());
        if self.tracker.is_closed() {
            tracing::debug!(table = %table, "touch scheduler shut down, skipping touch");
            return TouchMode::Skipped;
        }
        let metrics = self.metrics.clone();

        if in_flight < self.threshold {
            self.tracker.spawn(async move {
                let _guard = guard;
                run_touch(shard.as_ref(), &table, &key, &metrics).await;
            });
            TouchMode::Detached
        } else {
            tracing::debug!(in_flight, table = %table, "touch threshold reached, running inline");
            run_touch(shard.as_ref(), &table, &key, &metrics).await;
            drop(guard);
            TouchMode::Inline
        }
    }

    /// Stop accepting touches and wait for every running one to finish
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        // inline touches and schedules that raced the close
        while self.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

async fn run_touch(shard: &dyn Shard, table: &str, key: &[u8], metrics: &MetricsCollector) {
    if let Err(e) = shard.touch(table, key).await {
        metrics.incr(CounterKind::Error, table);
        tracing::warn!(
            operation = "touch",
            table = %table,
            shard = shard.name(),
            key = %display_key(key),
            "touch failed: {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::{Expiration, RecordEnvelope};
    use crate::Result;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Blocks every touch until released
    struct GatedShard {
        gate: Notify,
        fail: bool,
    }

    #[async_trait]
    impl Shard for GatedShard {
        fn name(&self) -> &str {
            "gated"
        }

        async fn get_raw(&self, _table: &str, _key: &[u8]) -> Result<RecordEnvelope<Bytes>> {
            Ok(RecordEnvelope::unassigned())
        }

        async fn put_raw(&self, _: &str, _: &[u8], _: Bytes, _: Expiration) -> Result<()> {
            Ok(())
        }

        async fn delete(&self, _table: &str, _key: &[u8]) -> Result<bool> {
            Ok(false)
        }

        async fn touch(&self, _table: &str, _key: &[u8]) -> Result<()> {
            if self.fail {
                return Err(crate::Error::shard("gated", "unavailable"));
            }
            self.gate.notified().await;
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_detached_until_threshold() {
        let metrics = Arc::new(MetricsCollector::new());
        let scheduler = TouchScheduler::new(4, metrics);
        let shard = Arc::new(GatedShard {
            gate: Notify::new(),
            fail: false,
        });

        for _ in 0..3 {
            let mode = scheduler
                .schedule(shard.clone(), "t".into(), Bytes::from_static(b"k"))
                .await;
            assert_eq!(mode, TouchMode::Detached);
        }
        assert_eq!(scheduler.in_flight(), 3);

        // fourth touch would reach the threshold, so the caller runs it
        let inline = scheduler.schedule(shard.clone(), "t".into(), Bytes::from_static(b"k"));
        tokio::pin!(inline);
        tokio::select! {
            _ = &mut inline => panic!("inline touch finished before gate opened"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }
        assert_eq!(scheduler.in_flight(), 4);

        shard.gate.notify_waiters();
        assert_eq!(inline.await, TouchMode::Inline);

        // release anything still parked
        while scheduler.in_flight() > 0 {
            shard.gate.notify_waiters();
            tokio::task::yield_now().await;
        }
        scheduler.shutdown().await;
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_counts_error() {
        let metrics = Arc::new(MetricsCollector::new());
        let scheduler = TouchScheduler::new(64, metrics.clone());
        let shard = Arc::new(GatedShard {
            gate: Notify::new(),
            fail: true,
        });

        scheduler
            .schedule(shard, "orders".into(), Bytes::from_static(b"k"))
            .await;
        scheduler.shutdown().await;

        assert_eq!(metrics.get(CounterKind::Error, "orders"), 1);
        assert_eq!(scheduler.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_schedule_after_shutdown_is_skipped() {
        let metrics = Arc::new(MetricsCollector::new());
        let scheduler = TouchScheduler::new(64, metrics.clone());
        let shard = Arc::new(GatedShard {
            gate: Notify::new(),
            fail: true,
        });
        scheduler.shutdown().await;

        let mode = scheduler
            .schedule(shard, "t".into(), Bytes::from_static(b"k"))
            .await;
        assert_eq!(mode, TouchMode::Skipped);
        assert_eq!(scheduler.in_flight(), 0);
        // a failing touch would have counted an error had it run
        assert_eq!(metrics.get(CounterKind::Error, "t"), 0);
    }
}
