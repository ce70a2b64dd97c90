//! Metrics emission through the coordinator's flush timer

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tierkv::common::{CounterKind, MemorySink, MetricsCollector, SystemClock};
use tierkv::coordinator::{TierChain, TierSpec};
use tierkv::shard::MemShard;
use tierkv::{CoordinatorConfig, Expiration, Shard, StoreCoordinator};

fn two_tier_chain() -> (TierChain, Arc<MemShard>) {
    let fallback = Arc::new(MemShard::new("fallback"));
    let chain = TierChain::build(vec![
        TierSpec::new(vec![Arc::new(MemShard::new("primary")) as Arc<dyn Shard>]),
        TierSpec::new(vec![fallback.clone() as Arc<dyn Shard>]),
    ])
    .unwrap();
    (chain, fallback)
}

fn instrumented(interval: Duration) -> (StoreCoordinator, Arc<MemorySink>, Arc<MemShard>) {
    let sink = Arc::new(MemorySink::new());
    let config = CoordinatorConfig {
        instrumentation: true,
        metrics_interval: interval,
        ..CoordinatorConfig::default()
    };
    let coord = StoreCoordinator::with_parts(
        config,
        Arc::new(MetricsCollector::new()),
        sink.clone(),
        Arc::new(SystemClock),
    );
    let (chain, fallback) = two_tier_chain();
    coord.configure(chain).unwrap();
    coord.start().unwrap();
    (coord, sink, fallback)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_timer_emits_and_resets() {
    let (coord, sink, fallback) = instrumented(Duration::from_millis(50));
    fallback
        .put_raw("orders", b"k", Bytes::from_static(b"v"), Expiration::never())
        .await
        .unwrap();

    coord.get_raw("orders", b"k", false).await.unwrap();
    coord.get_raw("orders", b"absent", false).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(sink.total(CounterKind::FallbackHit, "orders"), 1);
    assert_eq!(sink.total(CounterKind::Migration, "orders"), 1);
    assert_eq!(sink.total(CounterKind::Miss, "orders"), 1);
    assert_eq!(sink.total(CounterKind::Miss, "*"), 1);
    // emitted counters are zeroed
    assert_eq!(coord.metrics().get(CounterKind::Miss, "orders"), 0);

    coord.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_flushes_remaining_counts() {
    let (coord, sink, _) = instrumented(Duration::from_secs(3600));

    coord.put_raw("t", b"k", "v", Expiration::never()).await.unwrap();
    coord.delete("t", b"k").await.unwrap();
    assert!(sink.events().is_empty());

    coord.stop().await.unwrap();
    assert_eq!(sink.total(CounterKind::Put, "t"), 1);
    assert_eq!(sink.total(CounterKind::DeleteHit, "t"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_disabled_instrumentation_never_emits() {
    let sink = Arc::new(MemorySink::new());
    let config = CoordinatorConfig {
        instrumentation: false,
        metrics_interval: Duration::from_millis(20),
        ..CoordinatorConfig::default()
    };
    let coord = StoreCoordinator::with_parts(
        config,
        Arc::new(MetricsCollector::new()),
        sink.clone(),
        Arc::new(SystemClock),
    );
    coord.configure(two_tier_chain().0).unwrap();
    coord.start().unwrap();

    coord.get_raw("t", b"k", false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    coord.stop().await.unwrap();

    assert!(sink.events().is_empty());
    assert_eq!(coord.metrics().get(CounterKind::Miss, "t"), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_enable_at_runtime_starts_timer() {
    let sink = Arc::new(MemorySink::new());
    let config = CoordinatorConfig {
        metrics_interval: Duration::from_millis(30),
        ..CoordinatorConfig::default()
    };
    let coord = StoreCoordinator::with_parts(
        config,
        Arc::new(MetricsCollector::new()),
        sink.clone(),
        Arc::new(SystemClock),
    );
    coord.configure(two_tier_chain().0).unwrap();
    coord.start().unwrap();

    // counted but discarded when instrumentation is switched on
    coord.get_raw("t", b"before", false).await.unwrap();
    coord.set_instrumentation(true).unwrap();
    coord.get_raw("t", b"after", false).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.total(CounterKind::Miss, "t"), 1);

    coord.stop().await.unwrap();
    assert!(coord.set_instrumentation(false).unwrap_err().is_usage());
}
