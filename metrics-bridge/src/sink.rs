//! Export sinks.

use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::{
    instrument::InstrumentDescriptor,
    snapshot::{DataPoint, ExportSnapshot},
};

const DEFAULT_HISTORY_CAPACITY: usize = 16;

/// Destination of collected snapshots.
pub trait ExportSink: Send + Sync {
    /// Publishes a freshly collected snapshot.
    fn publish(&self, snapshot: &ExportSnapshot);
}

/// Read access to exported state, used to verify what a sink has received.
pub trait ExportQuery: Send + Sync {
    /// Gets the points currently exported under `name`.
    ///
    /// Empty if nothing was ever exported under `name`, or if the sink was cleared since.
    fn query(&self, name: &str) -> Vec<DataPoint>;

    /// Gets the descriptor of the instrument currently exported under `name`.
    fn descriptor(&self, name: &str) -> Option<InstrumentDescriptor>;

    /// Discards all exported state.
    fn clear(&self);
}

impl<S: ExportSink + ?Sized> ExportSink for Arc<S> {
    fn publish(&self, snapshot: &ExportSnapshot) {
        (**self).publish(snapshot);
    }
}

impl<Q: ExportQuery + ?Sized> ExportQuery for Arc<Q> {
    fn query(&self, name: &str) -> Vec<DataPoint> {
        (**self).query(name)
    }

    fn descriptor(&self, name: &str) -> Option<InstrumentDescriptor> {
        (**self).descriptor(name)
    }

    fn clear(&self) {
        (**self).clear();
    }
}

/// Publishes every snapshot to several sinks in turn.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ExportSink>>,
}

impl FanoutSink {
    /// Creates a fanout over `sinks`.
    pub fn new(sinks: Vec<Arc<dyn ExportSink>>) -> Self {
        Self { sinks }
    }

    /// Adds another sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ExportSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ExportSink for FanoutSink {
    fn publish(&self, snapshot: &ExportSnapshot) {
        for sink in &self.sinks {
            sink.publish(snapshot);
        }
    }
}

/// Keeps recently published snapshots in memory.
///
/// Queries are answered from the most recently published snapshot, so an instrument that stops
/// being collected disappears from query results as soon as the next snapshot is published.
pub struct InMemorySink {
    snapshots: Mutex<VecDeque<Arc<ExportSnapshot>>>,
    capacity: usize,
}

impl InMemorySink {
    /// Creates a sink that keeps the last 16 snapshots.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Creates a sink that keeps the last `capacity` snapshots, and at least one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { snapshots: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// The most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<ExportSnapshot>> {
        self.snapshots.lock().back().cloned()
    }

    /// Every retained snapshot, oldest first.
    pub fn snapshots(&self) -> Vec<Arc<ExportSnapshot>> {
        self.snapshots.lock().iter().cloned().collect()
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportSink for InMemorySink {
    fn publish(&self, snapshot: &ExportSnapshot) {
        let mut snapshots = self.snapshots.lock();
        if snapshots.len() == self.capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(Arc::new(snapshot.clone()));
    }
}

impl ExportQuery for InMemorySink {
    fn query(&self, name: &str) -> Vec<DataPoint> {
        self.latest().map(|snapshot| snapshot.points(name).to_vec()).unwrap_or_default()
    }

    fn descriptor(&self, name: &str) -> Option<InstrumentDescriptor> {
        self.latest()?.get(name).map(|data| data.descriptor().clone())
    }

    fn clear(&self) {
        self.snapshots.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{collector::SnapshotCollector, meter::Counter, registry::MeterRegistry};

    #[test]
    fn queries_answer_from_the_latest_snapshot() {
        let registry = Arc::new(MeterRegistry::new());
        let sink = Arc::new(InMemorySink::new());
        let collector = SnapshotCollector::new(Arc::clone(&registry), sink.clone());

        let counter = Counter::builder("requests").register(&registry).unwrap();
        counter.increment(3);
        collector.collect();
        assert_eq!(sink.query("requests")[0].value(), 3.0);

        registry.remove(counter.id());
        collector.collect();
        assert!(sink.query("requests").is_empty());
        assert!(sink.descriptor("requests").is_none());

        // Older snapshots are untouched by the removal.
        let history = sink.snapshots();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].points("requests")[0].value(), 3.0);
    }

    #[test]
    fn history_is_bounded() {
        let sink = InMemorySink::with_capacity(2);
        for _ in 0..5 {
            sink.publish(&ExportSnapshot::empty());
        }
        assert_eq!(sink.snapshots().len(), 2);
    }

    #[test]
    fn clear_discards_everything() {
        let sink = InMemorySink::new();
        sink.publish(&ExportSnapshot::empty());
        sink.clear();

        assert!(sink.latest().is_none());
        assert!(sink.query("anything").is_empty());
    }

    #[test]
    fn fanout_publishes_to_every_sink() {
        let first = Arc::new(InMemorySink::new());
        let second = Arc::new(InMemorySink::new());
        let fanout = FanoutSink::new(vec![first.clone() as Arc<dyn ExportSink>])
            .with_sink(second.clone());

        fanout.publish(&ExportSnapshot::empty());
        assert_eq!(first.snapshots().len(), 1);
        assert_eq!(second.snapshots().len(), 1);
    }
}
