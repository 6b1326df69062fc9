use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use metrics::Unit;
use metrics_bridge::{Counter, FunctionTimer, InMemorySink, MeterRegistry, SnapshotCollector};
use proptest::prelude::*;

#[derive(Default)]
struct TestTimer {
    count: AtomicU64,
    total_micros: AtomicU64,
}

fn collector() -> (Arc<MeterRegistry>, SnapshotCollector) {
    let registry = Arc::new(MeterRegistry::new());
    let collector = SnapshotCollector::new(Arc::clone(&registry), Arc::new(InMemorySink::new()));
    (registry, collector)
}

proptest! {
    #[test]
    fn function_timer_reflects_accessor_state(
        invocations in proptest::collection::vec(0u64..10_000_000, 0..64),
    ) {
        let (registry, collector) = collector();
        let state = Arc::new(TestTimer::default());
        FunctionTimer::builder(
            "work",
            &state,
            |t: &TestTimer| t.count.load(Ordering::Relaxed),
            |t: &TestTimer| t.total_micros.load(Ordering::Relaxed) as f64,
            Unit::Microseconds,
        )
        .tag("kind", "property")
        .register(&registry)
        .unwrap();

        for micros in &invocations {
            state.count.fetch_add(1, Ordering::Relaxed);
            state.total_micros.fetch_add(*micros, Ordering::Relaxed);
        }
        let total_micros: u64 = invocations.iter().sum();

        let first = collector.collect();
        let second = collector.collect();

        for snapshot in [&first, &second] {
            let count = snapshot.points("work.count");
            prop_assert_eq!(count.len(), 1);
            prop_assert_eq!(count[0].value(), invocations.len() as f64);
            prop_assert!(count[0].has_attributes(&[("kind", "property")]));

            let sum = snapshot.points("work.sum");
            prop_assert_eq!(sum.len(), 1);
            prop_assert_eq!(sum[0].value(), total_micros as f64 / 1e6);
        }

        // Re-collecting without mutation changes nothing but the timestamps.
        prop_assert_eq!(first.points("work.count")[0].value(), second.points("work.count")[0].value());
        prop_assert_eq!(first.points("work.sum")[0].value(), second.points("work.sum")[0].value());
    }

    #[test]
    fn same_name_counters_are_never_merged(values in proptest::collection::vec(0u64..1_000, 1..16)) {
        let (registry, collector) = collector();
        for (i, value) in values.iter().enumerate() {
            Counter::builder("requests")
                .tag("shard", i.to_string())
                .register(&registry)
                .unwrap()
                .increment(*value);
        }

        let snapshot = collector.collect();
        let points = snapshot.points("requests");
        prop_assert_eq!(points.len(), values.len());
        for (i, value) in values.iter().enumerate() {
            let shard = i.to_string();
            let point = points.iter().find(|p| p.attribute("shard") == Some(shard.as_str())).unwrap();
            prop_assert_eq!(point.value(), *value as f64);
        }
    }
}
