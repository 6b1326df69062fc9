//! Maps meters onto canonical export instruments.

use std::borrow::Cow;

use crate::{
    error::BridgeError,
    instrument::{InstrumentDescriptor, InstrumentKind, ValueType},
    meter::{Meter, MeterKind, Reading},
    unit::{export_unit, per_second, DIMENSIONLESS, SECONDS},
};

/// Which part of a reading an instrument exports.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Extractor {
    Value,
    Count,
    Total,
    Max,
}

/// The instruments derived from one meter, and how to extract each of their values.
#[derive(Debug)]
pub struct Adaptation {
    instruments: Vec<(InstrumentDescriptor, Extractor)>,
    // Source time units per second.
    divisor: f64,
}

impl Adaptation {
    /// Descriptors of every derived instrument.
    pub fn descriptors(&self) -> impl Iterator<Item = &InstrumentDescriptor> {
        self.instruments.iter().map(|(descriptor, _)| descriptor)
    }

    /// Reads `meter` once and evaluates every extractor against that single reading.
    ///
    /// Returns nothing if the meter's state object is gone.
    pub(crate) fn sample<'a>(
        &'a self,
        meter: &Meter,
    ) -> impl Iterator<Item = (&'a InstrumentDescriptor, f64)> + 'a {
        let reading = meter.read();
        self.instruments.iter().filter_map(move |(descriptor, extractor)| {
            let value = self.extract(*extractor, reading.as_ref()?)?;
            Some((descriptor, value))
        })
    }

    fn extract(&self, extractor: Extractor, reading: &Reading) -> Option<f64> {
        match (extractor, reading) {
            (Extractor::Value, Reading::Value(value)) => Some(*value),
            (Extractor::Count, Reading::Timer { count, .. }) => Some(*count as f64),
            (Extractor::Total, Reading::Timer { total, .. }) => Some(total / self.divisor),
            (Extractor::Max, Reading::Timer { max, .. }) => max.map(|max| max / self.divisor),
            _ => None,
        }
    }
}

/// Adapts `meter` into its export instruments.
///
/// This is a pure function of the meter's declared metadata: the meter's state is not read.
///
/// # Errors
///
/// Fails with [`BridgeError::UnsupportedTimeUnit`] if the meter is a timer whose time unit cannot
/// be converted to seconds.
pub fn adapt(meter: &Meter) -> Result<Adaptation, BridgeError> {
    let name = meter.name();
    let description: Cow<'static, str> = meter.description().unwrap_or_default().to_owned().into();
    let describe = |suffix: Option<&str>, kind, value_type, unit: Cow<'static, str>| {
        let name = match suffix {
            Some(suffix) => format!("{name}.{suffix}"),
            None => name.to_owned(),
        };
        InstrumentDescriptor::new(name, kind, value_type, unit, description.clone())
    };

    let (instruments, divisor) = match meter.kind() {
        MeterKind::Counter => {
            let counter = describe(
                None,
                InstrumentKind::MonotonicSum,
                ValueType::Integer,
                export_unit(meter.base_unit()),
            );
            (vec![(counter, Extractor::Value)], 1.0)
        }
        MeterKind::FunctionCounter => {
            let counter = describe(
                None,
                InstrumentKind::MonotonicSum,
                ValueType::Float,
                export_unit(meter.base_unit()),
            );
            (vec![(counter, Extractor::Value)], 1.0)
        }
        MeterKind::Gauge => {
            let gauge =
                describe(None, InstrumentKind::Gauge, ValueType::Float, export_unit(meter.base_unit()));
            (vec![(gauge, Extractor::Value)], 1.0)
        }
        kind @ (MeterKind::FunctionTimer | MeterKind::Timer) => {
            let time_unit = meter.time_unit().unwrap_or(metrics::Unit::Nanoseconds);
            let divisor = per_second(time_unit).ok_or_else(|| BridgeError::UnsupportedTimeUnit {
                id: meter.id().clone(),
                unit: time_unit,
            })?;

            let mut instruments = vec![
                (
                    describe(
                        Some("count"),
                        InstrumentKind::MonotonicSum,
                        ValueType::Integer,
                        Cow::Borrowed(DIMENSIONLESS),
                    ),
                    Extractor::Count,
                ),
                (
                    describe(
                        Some("sum"),
                        InstrumentKind::MonotonicSum,
                        ValueType::Float,
                        Cow::Borrowed(SECONDS),
                    ),
                    Extractor::Total,
                ),
            ];
            if kind == MeterKind::Timer {
                instruments.push((
                    describe(
                        Some("max"),
                        InstrumentKind::Gauge,
                        ValueType::Float,
                        Cow::Borrowed(SECONDS),
                    ),
                    Extractor::Max,
                ));
            }
            (instruments, divisor)
        }
    };

    Ok(Adaptation { instruments, divisor })
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
        meter::{FunctionTimer, Gauge},
        registry::MeterRegistry,
    };

    #[derive(Default)]
    struct TestTimer {
        count: AtomicU64,
        total_nanos: AtomicU64,
    }

    impl TestTimer {
        fn add(&self, duration: std::time::Duration) {
            self.count.fetch_add(1, Ordering::Relaxed);
            self.total_nanos.fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    fn function_timer(registry: &MeterRegistry, state: &Arc<TestTimer>, unit: Unit) -> FunctionTimer {
        FunctionTimer::builder(
            "testFunctionTimerSeconds",
            state,
            |t: &TestTimer| t.count.load(Ordering::Relaxed),
            |t: &TestTimer| t.total_nanos.load(Ordering::Relaxed) as f64,
            unit,
        )
        .description("This is a test function timer")
        .tag("tag", "value")
        .register(registry)
        .expect("registration should succeed")
    }

    #[test]
    fn function_timer_maps_to_count_and_sum() {
        let registry = MeterRegistry::new();
        let state = Arc::new(TestTimer::default());
        let timer = function_timer(&registry, &state, Unit::Nanoseconds);

        let adaptation = adapt(timer.meter()).unwrap();
        let descriptors: Vec<_> = adaptation.descriptors().collect();
        assert_eq!(descriptors.len(), 2);

        let count = descriptors[0];
        assert_eq!(count.name(), "testFunctionTimerSeconds.count");
        assert_eq!(count.kind(), InstrumentKind::MonotonicSum);
        assert_eq!(count.value_type(), ValueType::Integer);
        assert_eq!(count.unit(), "1");
        assert_eq!(count.description(), "This is a test function timer");

        let sum = descriptors[1];
        assert_eq!(sum.name(), "testFunctionTimerSeconds.sum");
        assert_eq!(sum.kind(), InstrumentKind::MonotonicSum);
        assert_eq!(sum.value_type(), ValueType::Float);
        assert_eq!(sum.unit(), "s");
        assert_eq!(sum.description(), "This is a test function timer");
    }

    #[test]
    fn durations_are_converted_to_seconds() {
        let registry = MeterRegistry::new();
        let state = Arc::new(TestTimer::default());
        let timer = function_timer(&registry, &state, Unit::Nanoseconds);
        state.add(std::time::Duration::from_secs(42));

        let adaptation = adapt(timer.meter()).unwrap();
        let values: Vec<_> = adaptation
            .sample(timer.meter())
            .map(|(descriptor, value)| (descriptor.name().to_owned(), value))
            .collect();

        assert_eq!(
            values,
            vec![
                ("testFunctionTimerSeconds.count".to_owned(), 1.0),
                ("testFunctionTimerSeconds.sum".to_owned(), 42.0),
            ]
        );
    }

    #[test]
    fn millisecond_totals_are_scaled() {
        let registry = MeterRegistry::new();
        let state = Arc::new(AtomicU64::new(1500));
        let timer = FunctionTimer::builder(
            "batch",
            &state,
            |_: &AtomicU64| 3,
            |millis: &AtomicU64| millis.load(Ordering::Relaxed) as f64,
            Unit::Milliseconds,
        )
        .register(&registry)
        .unwrap();

        let adaptation = adapt(timer.meter()).unwrap();
        let sum = adaptation.sample(timer.meter()).find(|(d, _)| d.name() == "batch.sum").unwrap();
        assert_eq!(sum.1, 1.5);
    }

    #[test]
    fn dropped_state_yields_no_values() {
        let registry = MeterRegistry::new();
        let state = Arc::new(5.0f64);
        let gauge = Gauge::builder("level", &state, |v: &f64| *v).register(&registry).unwrap();
        let adaptation = adapt(gauge.meter()).unwrap();
        assert_eq!(adaptation.sample(gauge.meter()).count(), 1);

        drop(state);
        assert_eq!(adaptation.sample(gauge.meter()).count(), 0);
    }
}
