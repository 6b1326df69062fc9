#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]
#![deny(missing_docs)]

mod instruments;

use std::sync::Arc;

use metrics_bridge::{ExportSink, ExportSnapshot};
use opentelemetry::metrics::Meter;
use parking_lot::RwLock;
use tracing::debug;

use crate::instruments::{identity, InstrumentIdentity, Latest, OtelInstrument};

/// An [`ExportSink`] that exposes published snapshots through OpenTelemetry.
///
/// One observable instrument is registered per distinct name, kind, value type and unit. When a
/// name is reused by an incompatible instrument (after the meter that owned it was removed), a new
/// instrument is registered and the old one stops observing.
///
/// Observable instruments report what their callback observes at collection time. Under
/// cumulative temporality the OpenTelemetry SDK keeps reporting the last value of an attribute set
/// that is no longer observed, so points of removed meters only disappear from the export when the
/// reader uses delta temporality.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use metrics_bridge::{MeterRegistry, SnapshotCollector};
/// use metrics_bridge_otel::OpenTelemetrySink;
/// use opentelemetry::metrics::MeterProvider;
/// use opentelemetry_sdk::metrics::SdkMeterProvider;
///
/// let provider = SdkMeterProvider::default();
/// let sink = Arc::new(OpenTelemetrySink::new(provider.meter("my_app")));
/// let registry = Arc::new(MeterRegistry::new());
/// let collector = SnapshotCollector::new(registry, sink);
/// collector.collect();
/// ```
pub struct OpenTelemetrySink {
    meter: Meter,
    latest: Latest,
    instruments: scc::HashMap<InstrumentIdentity, OtelInstrument>,
}

impl OpenTelemetrySink {
    /// Creates a sink registering its instruments on `meter`.
    pub fn new(meter: Meter) -> Self {
        Self {
            meter,
            latest: Arc::new(RwLock::new(Arc::new(ExportSnapshot::empty()))),
            instruments: scc::HashMap::new(),
        }
    }

    /// Number of OpenTelemetry instruments registered so far.
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }
}

impl ExportSink for OpenTelemetrySink {
    fn publish(&self, snapshot: &ExportSnapshot) {
        *self.latest.write() = Arc::new(snapshot.clone());

        for (name, data) in snapshot.iter() {
            let key = identity(data.descriptor());
            if self.instruments.contains(&key) {
                continue;
            }
            let _ = self.instruments.entry(key).or_insert_with(|| {
                debug!(
                    instrument = name,
                    descriptor = %data.descriptor(),
                    "Registering OpenTelemetry instrument."
                );
                OtelInstrument::register(&self.meter, data.descriptor(), &self.latest)
            });
        }
    }
}
