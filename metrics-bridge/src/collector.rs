//! Snapshot collection.

use std::{
    collections::HashMap,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, SystemTime},
};

use crossbeam_channel::{select, tick, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::{
    adapter::{adapt, Adaptation},
    error::BuildError,
    meter::MeterId,
    registry::MeterRegistry,
    sink::ExportSink,
    snapshot::{DataPoint, ExportSnapshot, SnapshotBuilder},
};

const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_THREAD_NAME: &str = "metrics-bridge-collector";

struct CachedAdaptation {
    sequence: u64,
    adaptation: Arc<Adaptation>,
}

/// Turns the current state of every registered meter into an [`ExportSnapshot`].
///
/// Each call to [`collect`](SnapshotCollector::collect) is independent: the only state carried
/// between calls is a cache of meter adaptations, and snapshots are handed to the sink rather
/// than retained.
pub struct SnapshotCollector {
    registry: Arc<MeterRegistry>,
    sink: Arc<dyn ExportSink>,
    cache: Mutex<HashMap<MeterId, CachedAdaptation>>,
}

impl SnapshotCollector {
    /// Creates a collector reading from `registry` and publishing to `sink`.
    pub fn new(registry: Arc<MeterRegistry>, sink: Arc<dyn ExportSink>) -> Self {
        Self { registry, sink, cache: Mutex::new(HashMap::new()) }
    }

    /// The registry this collector reads from.
    pub fn registry(&self) -> &Arc<MeterRegistry> {
        &self.registry
    }

    /// Runs one collection pass and publishes the resulting snapshot to the sink.
    ///
    /// Every listed meter is read once, producing one point per derived instrument. Meters whose
    /// state object is gone produce no points. The published snapshot is also returned.
    pub fn collect(&self) -> ExportSnapshot {
        let listed = self.registry.list();
        let mut builder = SnapshotBuilder::new();
        let mut points = 0usize;

        {
            let mut cache = self.cache.lock();
            let live: HashMap<&MeterId, u64> =
                listed.iter().map(|r| (r.meter().id(), r.sequence())).collect();
            cache.retain(|id, cached| live.get(id) == Some(&cached.sequence));

            for registered in &listed {
                let meter = registered.meter();
                let adaptation = match cache.get(meter.id()) {
                    Some(cached) => Arc::clone(&cached.adaptation),
                    None => match adapt(meter) {
                        Ok(adaptation) => {
                            let adaptation = Arc::new(adaptation);
                            cache.insert(
                                meter.id().clone(),
                                CachedAdaptation {
                                    sequence: registered.sequence(),
                                    adaptation: Arc::clone(&adaptation),
                                },
                            );
                            adaptation
                        }
                        Err(e) => {
                            error!(
                                meter = %meter.id(),
                                error = %e,
                                "Failed to adapt registered meter."
                            );
                            continue;
                        }
                    },
                };

                let timestamp = SystemTime::now();
                let attributes: Vec<_> = meter.id().tags().cloned().collect();
                let mut sampled = false;
                for (descriptor, value) in adaptation.sample(meter) {
                    builder.push(descriptor, DataPoint::new(value, attributes.clone(), timestamp));
                    points += 1;
                    sampled = true;
                }
                if !sampled {
                    trace!(meter = %meter.id(), "Skipping meter whose state is gone.");
                }
            }
        }

        let snapshot = builder.build();
        trace!(meters = listed.len(), instruments = snapshot.len(), points, "Collected snapshot.");
        self.sink.publish(&snapshot);
        snapshot
    }
}

/// Builder for a periodically running [`SnapshotCollector`].
pub struct CollectorBuilder {
    interval: Duration,
    thread_name: String,
}

impl CollectorBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often snapshots are collected.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the name of the background collection thread.
    ///
    /// Defaults to `metrics-bridge-collector`.
    #[must_use]
    pub fn with_thread_name<N: Into<String>>(mut self, name: N) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Builds a collector and spawns a background thread that collects immediately, then once
    /// per interval, until the returned handle is stopped or dropped.
    ///
    /// # Errors
    ///
    /// If the background thread cannot be spawned, an error will be returned.
    pub fn spawn(
        self,
        registry: Arc<MeterRegistry>,
        sink: Arc<dyn ExportSink>,
    ) -> Result<CollectorHandle, BuildError> {
        let collector = Arc::new(SnapshotCollector::new(registry, sink));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let interval = self.interval;

        let background = Arc::clone(&collector);
        let thread = std::thread::Builder::new()
            .name(self.thread_name)
            .spawn(move || {
                let ticker = tick(interval);
                background.collect();
                loop {
                    select! {
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            background.collect();
                        }
                    }
                }
                debug!("Snapshot collector stopped.");
            })
            .map_err(|_| BuildError::Backend)?;

        debug!(?interval, "Spawned snapshot collector.");
        Ok(CollectorHandle { collector, shutdown: Some(shutdown_tx), thread: Some(thread) })
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        CollectorBuilder {
            interval: DEFAULT_COLLECTION_INTERVAL,
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
        }
    }
}

/// Handle to a background collector.
///
/// Dropping the handle stops the background thread.
pub struct CollectorHandle {
    collector: Arc<SnapshotCollector>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CollectorHandle {
    /// The collector driven by the background thread, for on-demand collection.
    pub fn collector(&self) -> &Arc<SnapshotCollector> {
        &self.collector
    }

    /// Stops the background thread and waits for it to exit.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        // Dropping the sender disconnects the channel, which wakes the background thread.
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Snapshot collector thread panicked.");
            }
        }
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use metrics::Unit;

    use super::*;
    use crate::{
        instrument::InstrumentKind,
        meter::{Counter, FunctionTimer, Gauge, Timer},
        sink::{ExportQuery, InMemorySink},
    };

    fn setup() -> (Arc<MeterRegistry>, Arc<InMemorySink>, SnapshotCollector) {
        let registry = Arc::new(MeterRegistry::new());
        let sink = Arc::new(InMemorySink::new());
        let collector = SnapshotCollector::new(Arc::clone(&registry), sink.clone());
        (registry, sink, collector)
    }

    #[test]
    fn same_name_meters_stay_separate_points() {
        let (registry, _, collector) = setup();
        let get = Counter::builder("requests").tag("method", "GET").register(&registry).unwrap();
        let post = Counter::builder("requests").tag("method", "POST").register(&registry).unwrap();
        get.increment(1);
        post.increment(2);

        let snapshot = collector.collect();
        let requests = snapshot.get("requests").expect("requests should be exported");
        assert_eq!(requests.descriptor().kind(), InstrumentKind::MonotonicSum);

        let points = requests.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value(), 1.0);
        assert!(points[0].has_attributes(&[("method", "GET")]));
        assert_eq!(points[1].value(), 2.0);
        assert!(points[1].has_attributes(&[("method", "POST")]));
    }

    #[test]
    fn snapshots_are_published_and_returned() {
        let (registry, sink, collector) = setup();
        Counter::builder("requests").register(&registry).unwrap().increment(4);

        let snapshot = collector.collect();
        assert_eq!(snapshot.points("requests")[0].value(), 4.0);
        assert_eq!(sink.query("requests")[0].value(), 4.0);
    }

    #[test]
    fn produced_snapshots_do_not_follow_the_meter() {
        let (registry, _, collector) = setup();
        let counter = Counter::builder("requests").register(&registry).unwrap();
        counter.increment(1);

        let first = collector.collect();
        counter.increment(10);
        registry.remove(counter.id());
        let second = collector.collect();

        assert_eq!(first.points("requests")[0].value(), 1.0);
        assert!(second.points("requests").is_empty());
    }

    #[test]
    fn timer_exports_count_sum_and_max() {
        let (registry, _, collector) = setup();
        let timer =
            Timer::builder("request.latency").tag("route", "/").register(&registry).unwrap();
        timer.record(Duration::from_millis(250));
        timer.record(Duration::from_millis(750));

        let snapshot = collector.collect();
        assert_eq!(snapshot.points("request.latency.count")[0].value(), 2.0);
        assert_eq!(snapshot.points("request.latency.sum")[0].value(), 1.0);
        assert_eq!(snapshot.points("request.latency.max")[0].value(), 0.75);
        assert_eq!(
            snapshot.get("request.latency.max").unwrap().descriptor().kind(),
            InstrumentKind::Gauge
        );
    }

    #[test]
    fn dropped_state_is_skipped() {
        let (registry, _, collector) = setup();
        let state = Arc::new(12.5f64);
        Gauge::builder("queue.depth", &state, |v: &f64| *v).register(&registry).unwrap();
        assert_eq!(collector.collect().points("queue.depth")[0].value(), 12.5);

        drop(state);
        assert!(collector.collect().get("queue.depth").is_none());
    }

    #[test]
    fn reregistered_meter_is_adapted_again() {
        let (registry, _, collector) = setup();
        let first = Arc::new(AtomicU64::new(1_000));
        let timer = FunctionTimer::builder(
            "jobs",
            &first,
            |_: &AtomicU64| 1,
            |v: &AtomicU64| v.load(Ordering::Relaxed) as f64,
            Unit::Milliseconds,
        )
        .register(&registry)
        .unwrap();
        assert_eq!(collector.collect().points("jobs.sum")[0].value(), 1.0);

        registry.remove(timer.id());
        let second = Arc::new(AtomicU64::new(3));
        FunctionTimer::builder(
            "jobs",
            &second,
            |_: &AtomicU64| 1,
            |v: &AtomicU64| v.load(Ordering::Relaxed) as f64,
            Unit::Seconds,
        )
        .register(&registry)
        .unwrap();
        assert_eq!(collector.collect().points("jobs.sum")[0].value(), 3.0);
    }

    #[test]
    fn background_collector_publishes_until_stopped() {
        let registry = Arc::new(MeterRegistry::new());
        let sink = Arc::new(InMemorySink::with_capacity(1024));
        Counter::builder("requests").register(&registry).unwrap().increment(1);

        let handle = CollectorBuilder::new()
            .with_interval(Duration::from_millis(5))
            .spawn(Arc::clone(&registry), sink.clone())
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        handle.stop();

        let published = sink.snapshots().len();
        assert!(published >= 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sink.snapshots().len(), published);
        assert_eq!(sink.query("requests")[0].value(), 1.0);
    }
}
