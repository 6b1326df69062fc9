use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use metrics::Unit;
use metrics_bridge::{
    Await, CollectorBuilder, Counter, ExportQuery, FunctionTimer, InMemorySink, MeterRegistry,
};
use tracing::info;

#[derive(Default)]
struct JobStats {
    completed: AtomicU64,
    busy_nanos: AtomicU64,
}

impl JobStats {
    fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    fn busy_nanos(&self) -> f64 {
        self.busy_nanos.load(Ordering::Relaxed) as f64
    }
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).init();

    let registry = Arc::new(MeterRegistry::new());
    let sink = Arc::new(InMemorySink::new());
    let collector = CollectorBuilder::new()
        .with_interval(Duration::from_millis(250))
        .spawn(Arc::clone(&registry), sink.clone())
        .expect("failed to spawn collector");

    let stats = Arc::new(JobStats::default());
    FunctionTimer::builder(
        "jobs",
        &stats,
        JobStats::completed,
        JobStats::busy_nanos,
        Unit::Nanoseconds,
    )
    .description("Completed background jobs")
    .tag("queue", "default")
    .register(&registry)
    .expect("failed to register timer");

    let failures = Counter::builder("jobs.failed")
        .tag("queue", "default")
        .register(&registry)
        .expect("failed to register counter");

    for i in 0..10u64 {
        let start = Instant::now();
        thread::sleep(Duration::from_millis(20 + i * 5));
        stats.completed.fetch_add(1, Ordering::Relaxed);
        stats.busy_nanos.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        if i % 4 == 0 {
            failures.increment(1);
        }
    }

    Await::new()
        .until(&*sink, "jobs.count", |points| points.iter().any(|p| p.value() == 10.0))
        .assert_satisfied();

    for name in ["jobs.count", "jobs.sum", "jobs.failed"] {
        let unit = sink.descriptor(name).map(|d| d.unit().to_owned()).unwrap_or_default();
        for point in sink.query(name) {
            info!(instrument = name, value = point.value(), unit = %unit, "Exported point.");
        }
    }

    collector.stop();
}
