//! Observable OpenTelemetry instruments backed by the latest published snapshot.

use std::sync::Arc;

use metrics_bridge::{DataPoint, ExportSnapshot, InstrumentDescriptor, InstrumentKind, ValueType};
use opentelemetry::metrics::{
    AsyncInstrumentBuilder, Meter, ObservableCounter, ObservableGauge, ObservableUpDownCounter,
};
use opentelemetry::KeyValue;
use parking_lot::RwLock;

/// The snapshot every instrument callback reads from.
pub(crate) type Latest = Arc<RwLock<Arc<ExportSnapshot>>>;

/// Everything that makes two instruments of the same name distinct streams.
pub(crate) type InstrumentIdentity = (String, InstrumentKind, ValueType, String);

pub(crate) fn identity(descriptor: &InstrumentDescriptor) -> InstrumentIdentity {
    (
        descriptor.name().to_owned(),
        descriptor.kind(),
        descriptor.value_type(),
        descriptor.unit().to_owned(),
    )
}

#[allow(dead_code)] // prevent from drop
pub(crate) enum OtelInstrument {
    IntegerCounter(ObservableCounter<u64>),
    FloatCounter(ObservableCounter<f64>),
    UpDownCounter(ObservableUpDownCounter<f64>),
    Gauge(ObservableGauge<f64>),
}

impl OtelInstrument {
    /// Registers the instrument described by `descriptor` on `meter`.
    pub(crate) fn register(meter: &Meter, descriptor: &InstrumentDescriptor, latest: &Latest) -> Self {
        let name = descriptor.name().to_owned();
        let expected = descriptor.clone();
        match (descriptor.kind(), descriptor.value_type()) {
            (InstrumentKind::MonotonicSum, ValueType::Integer) => {
                let builder = describe(descriptor, meter.u64_observable_counter(name));
                let latest = Arc::clone(latest);
                let counter = builder
                    .with_callback(move |observer| {
                        for point in current_points(&latest.read(), &expected) {
                            observer.observe(point.value() as u64, &attributes(point));
                        }
                    })
                    .build();
                Self::IntegerCounter(counter)
            }
            (InstrumentKind::MonotonicSum, ValueType::Float) => {
                let builder = describe(descriptor, meter.f64_observable_counter(name));
                let latest = Arc::clone(latest);
                let counter = builder
                    .with_callback(move |observer| {
                        for point in current_points(&latest.read(), &expected) {
                            observer.observe(point.value(), &attributes(point));
                        }
                    })
                    .build();
                Self::FloatCounter(counter)
            }
            (InstrumentKind::NonMonotonicSum, _) => {
                let builder =
                    describe(descriptor, meter.f64_observable_up_down_counter(name));
                let latest = Arc::clone(latest);
                let counter = builder
                    .with_callback(move |observer| {
                        for point in current_points(&latest.read(), &expected) {
                            observer.observe(point.value(), &attributes(point));
                        }
                    })
                    .build();
                Self::UpDownCounter(counter)
            }
            (InstrumentKind::Gauge, _) => {
                let builder = describe(descriptor, meter.f64_observable_gauge(name));
                let latest = Arc::clone(latest);
                let gauge = builder
                    .with_callback(move |observer| {
                        for point in current_points(&latest.read(), &expected) {
                            observer.observe(point.value(), &attributes(point));
                        }
                    })
                    .build();
                Self::Gauge(gauge)
            }
        }
    }
}

fn describe<'a, I, M>(
    descriptor: &InstrumentDescriptor,
    builder: AsyncInstrumentBuilder<'a, I, M>,
) -> AsyncInstrumentBuilder<'a, I, M> {
    let builder = builder.with_unit(descriptor.unit().to_owned());
    if descriptor.description().is_empty() {
        builder
    } else {
        builder.with_description(descriptor.description().to_owned())
    }
}

/// Points of the latest snapshot that belong to the instrument described by `expected`.
///
/// A name reused by an incompatible instrument yields nothing, so a stream never receives points of
/// another kind, value type or unit.
fn current_points<'a>(
    snapshot: &'a ExportSnapshot,
    expected: &InstrumentDescriptor,
) -> &'a [DataPoint] {
    match snapshot.get(expected.name()) {
        Some(data) if data.descriptor().is_compatible_with(expected) => data.points(),
        _ => &[],
    }
}

fn attributes(point: &DataPoint) -> Vec<KeyValue> {
    point
        .attributes()
        .iter()
        .map(|label| KeyValue::new(label.key().to_string(), label.value().to_string()))
        .collect()
}
