//! Operational counters for the tier coordinator
//!
//! Every counter exists once per table and once for the `*` aggregate.
//! Increments are lock-free atomics; the periodic flush sweeps the table map
//! and swaps each non-zero counter back to zero, so every emitted value is the
//! delta since the previous flush.

use crate::common::utils::WILDCARD_TABLE;
use crate::Result;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Named counters tracked per table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Hit,
    FallbackHit,
    Miss,
    Touch,
    Put,
    DeleteHit,
    DeleteFallbackHit,
    DeleteMiss,
    Error,
    Migration,
}

impl CounterKind {
    pub const ALL: [CounterKind; 10] = [
        CounterKind::Hit,
        CounterKind::FallbackHit,
        CounterKind::Miss,
        CounterKind::Touch,
        CounterKind::Put,
        CounterKind::DeleteHit,
        CounterKind::DeleteFallbackHit,
        CounterKind::DeleteMiss,
        CounterKind::Error,
        CounterKind::Migration,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CounterKind::Hit => "hit",
            CounterKind::FallbackHit => "fallback_hit",
            CounterKind::Miss => "miss",
            CounterKind::Touch => "touch",
            CounterKind::Put => "put",
            CounterKind::DeleteHit => "delete_hit",
            CounterKind::DeleteFallbackHit => "delete_fallback_hit",
            CounterKind::DeleteMiss => "delete_miss",
            CounterKind::Error => "error",
            CounterKind::Migration => "migration",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Counter for tracking operation counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Read and zero in one step
    pub fn take(&self) -> i64 {
        self.value.swap(0, Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// The full counter set for one table
#[derive(Debug, Default)]
pub struct TableCounters {
    counters: [Counter; CounterKind::ALL.len()],
}

impl TableCounters {
    pub fn counter(&self, kind: CounterKind) -> &Counter {
        &self.counters[kind.index()]
    }
}

/// One `(counter, table, value)` observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSample {
    pub counter: CounterKind,
    pub table: String,
    pub value: i64,
}

/// Destination for flushed counters
pub trait MetricsSink: Send + Sync {
    fn emit(&self, sample: &CounterSample) -> Result<()>;
}

/// Emits each sample as a structured log record
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn emit(&self, sample: &CounterSample) -> Result<()> {
        tracing::info!(
            target: "tierkv::metrics",
            counter = sample.counter.name(),
            table = %sample.table,
            value = sample.value,
        );
        Ok(())
    }
}

/// Keeps every emitted sample in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<CounterSample>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CounterSample> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sum of every emitted value for `(counter, table)`
    pub fn total(&self, counter: CounterKind, table: &str) -> i64 {
        self.events()
            .iter()
            .filter(|s| s.counter == counter && s.table == table)
            .map(|s| s.value)
            .sum()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&self, sample: &CounterSample) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sample.clone());
        Ok(())
    }
}

/// Registry of per-table counters, owned by one coordinator
#[derive(Default)]
pub struct MetricsCollector {
    tables: scc::HashMap<String, Arc<TableCounters>>,
    global: TableCounters,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, table: &str) -> Arc<TableCounters> {
        if let Some(counters) = self.tables.read(table, |_, v| v.clone()) {
            return counters;
        }
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| Arc::new(TableCounters::default()))
            .get()
            .clone()
    }

    /// Increment `kind` for `table` and for the aggregate
    pub fn incr(&self, kind: CounterKind, table: &str) {
        self.table(table).counter(kind).inc();
        self.global.counter(kind).inc();
    }

    /// Current value; `*` reads the aggregate
    pub fn get(&self, kind: CounterKind, table: &str) -> i64 {
        if table == WILDCARD_TABLE {
            return self.global.counter(kind).get();
        }
        self.tables
            .read(table, |_, v| v.counter(kind).get())
            .unwrap_or(0)
    }

    /// Non-zero counters, left in place
    pub fn snapshot(&self) -> Vec<CounterSample> {
        self.sweep(Counter::get)
    }

    /// Non-zero counters, zeroed as they are read
    pub fn drain(&self) -> Vec<CounterSample> {
        self.sweep(Counter::take)
    }

    fn sweep(&self, read: impl Fn(&Counter) -> i64) -> Vec<CounterSample> {
        let mut samples = Vec::new();
        let mut collect = |table: &str, counters: &TableCounters| {
            for kind in CounterKind::ALL {
                let value = read(counters.counter(kind));
                if value != 0 {
                    samples.push(CounterSample {
                        counter: kind,
                        table: table.to_string(),
                        value,
                    });
                }
            }
        };
        self.tables.scan(|table, counters| collect(table.as_str(), counters));
        collect(WILDCARD_TABLE, &self.global);
        samples
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.tables.scan(|_, counters| {
            for kind in CounterKind::ALL {
                counters.counter(kind).reset();
            }
        });
        for kind in CounterKind::ALL {
            self.global.counter(kind).reset();
        }
    }

    /// Drain into `sink`; returns the number of samples emitted
    pub fn flush(&self, sink: &dyn MetricsSink) -> usize {
        let mut emitted = 0;
        for sample in self.drain() {
            match sink.emit(&sample) {
                Ok(()) => emitted += 1,
                Err(e) => {
                    tracing::warn!(
                        operation = "metrics_flush",
                        table = %sample.table,
                        counter = sample.counter.name(),
                        "metrics emission failed: {}",
                        e
                    );
                    if sample.table != WILDCARD_TABLE {
                        self.incr(CounterKind::Error, &sample.table);
                    }
                }
            }
        }
        emitted
    }

    /// Generate Prometheus-compatible metrics output
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let samples = self.snapshot();

        for kind in CounterKind::ALL {
            let _ = writeln!(
                out,
                "# HELP tierkv_{}_total Number of {} events per table",
                kind.name(),
                kind.name()
            );
            let _ = writeln!(out, "# TYPE tierkv_{}_total counter", kind.name());
            for sample in samples.iter().filter(|s| s.counter == kind) {
                let _ = writeln!(
                    out,
                    "tierkv_{}_total{{table=\"{}\"}} {}",
                    kind.name(),
                    sample.table,
                    sample.value
                );
            }
        }

        out
    }
}

/// Periodically flush `collector` into `sink` until `token` is cancelled.
/// A final flush runs on cancellation.
pub async fn run_flush_loop(
    collector: Arc<MetricsCollector>,
    sink: Arc<dyn MetricsSink>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let emitted = collector.flush(sink.as_ref());
                tracing::trace!(emitted, "metrics flushed");
            }
            _ = token.cancelled() => {
                collector.flush(sink.as_ref());
                tracing::debug!("metrics flush loop stopped");
                break;
            }
        }
    }
}
