//! Meter kinds, their handles, and their builders.
//!
//! Meters are the mutable, push-style side of the bridge: application code updates them in place,
//! and the collector reads them on its own cadence. Every meter is identified by its name and tag
//! set, and belongs to one of a closed set of [`MeterKind`]s.

use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use metrics::{IntoLabels, Key, Label, Unit};

use crate::{error::BridgeError, registry::MeterRegistry};

type ValueFn = Box<dyn Fn() -> Option<f64> + Send + Sync>;
type TimerFn = Box<dyn Fn() -> Option<(u64, f64)> + Send + Sync>;

/// Kind of a meter.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MeterKind {
    /// Push-style monotonic counter.
    Counter,
    /// Function-backed point-in-time value.
    Gauge,
    /// Function-backed monotonic counter.
    FunctionCounter,
    /// Function-backed invocation count and cumulative duration.
    FunctionTimer,
    /// Push-style invocation count, cumulative duration, and maximum duration.
    Timer,
}

impl fmt::Display for MeterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeterKind::Counter => "counter",
            MeterKind::Gauge => "gauge",
            MeterKind::FunctionCounter => "function counter",
            MeterKind::FunctionTimer => "function timer",
            MeterKind::Timer => "timer",
        };
        f.write_str(name)
    }
}

/// Identity of a meter: its name plus its tag set.
///
/// Tags are stored sorted by key, so two identities built from the same tags in a different order
/// are equal. When a tag key is given more than once, the last value wins.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MeterId(Key);

impl MeterId {
    /// Creates an identity from a name and a set of tags.
    pub fn new<N, L>(name: N, tags: L) -> Self
    where
        N: Into<String>,
        L: IntoLabels,
    {
        let mut by_key = BTreeMap::new();
        for label in tags.into_labels() {
            by_key.insert(label.key().to_owned(), label);
        }
        let labels: Vec<Label> = by_key.into_values().collect();
        MeterId(Key::from_parts(name.into(), labels))
    }

    /// Meter name.
    pub fn name(&self) -> &str {
        self.0.name()
    }

    /// Tags, sorted by key.
    pub fn tags(&self) -> impl Iterator<Item = &Label> {
        self.0.labels()
    }

    /// The underlying `metrics` key.
    pub fn key(&self) -> &Key {
        &self.0
    }
}

impl fmt::Display for MeterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        let mut tags = self.tags().peekable();
        if tags.peek().is_some() {
            f.write_str("{")?;
            for (i, label) in tags.enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", label.key(), label.value())?;
            }
            f.write_str("}")?;
        }
        Ok(())
    }
}

/// Raw state of a push-style timer, in nanoseconds.
#[derive(Debug, Default)]
pub(crate) struct TimerCell {
    count: AtomicU64,
    total_nanos: AtomicU64,
    max_nanos: AtomicU64,
}

impl TimerCell {
    fn record(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_nanos.fetch_max(nanos, Ordering::Relaxed);
    }
}

/// Where a meter gets its values from.
pub(crate) enum Source {
    Counter(Arc<AtomicU64>),
    Gauge(ValueFn),
    FunctionCounter(ValueFn),
    FunctionTimer { read: TimerFn, time_unit: Unit },
    Timer(Arc<TimerCell>),
}

/// One read of a meter's current state.
///
/// Durations are still in the meter's own time unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Reading {
    Value(f64),
    Timer { count: u64, total: f64, max: Option<f64> },
}

/// A registered meter.
pub struct Meter {
    id: MeterId,
    description: Option<Cow<'static, str>>,
    base_unit: Option<Unit>,
    source: Source,
}

impl Meter {
    /// Identity of the meter.
    pub fn id(&self) -> &MeterId {
        &self.id
    }

    /// Name of the meter.
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Kind of the meter.
    pub fn kind(&self) -> MeterKind {
        match &self.source {
            Source::Counter(_) => MeterKind::Counter,
            Source::Gauge(_) => MeterKind::Gauge,
            Source::FunctionCounter(_) => MeterKind::FunctionCounter,
            Source::FunctionTimer { .. } => MeterKind::FunctionTimer,
            Source::Timer(_) => MeterKind::Timer,
        }
    }

    /// Description, if one was given.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Base unit hint, if one was given.
    pub fn base_unit(&self) -> Option<Unit> {
        self.base_unit
    }

    /// Unit the meter accumulates durations in, for timer kinds.
    pub fn time_unit(&self) -> Option<Unit> {
        match &self.source {
            Source::FunctionTimer { time_unit, .. } => Some(*time_unit),
            Source::Timer(_) => Some(Unit::Nanoseconds),
            _ => None,
        }
    }

    /// Reads the current state of the meter once.
    ///
    /// Returns `None` if the meter is function-backed and its state object has been dropped.
    pub(crate) fn read(&self) -> Option<Reading> {
        match &self.source {
            Source::Counter(value) => Some(Reading::Value(value.load(Ordering::Relaxed) as f64)),
            Source::Gauge(read) | Source::FunctionCounter(read) => read().map(Reading::Value),
            Source::FunctionTimer { read, .. } => {
                read().map(|(count, total)| Reading::Timer { count, total, max: None })
            }
            Source::Timer(cell) => Some(Reading::Timer {
                count: cell.count.load(Ordering::Relaxed),
                total: cell.total_nanos.load(Ordering::Relaxed) as f64,
                max: Some(cell.max_nanos.load(Ordering::Relaxed) as f64),
            }),
        }
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("description", &self.description)
            .field("base_unit", &self.base_unit)
            .finish_non_exhaustive()
    }
}

struct MeterOptions {
    name: String,
    description: Option<Cow<'static, str>>,
    base_unit: Option<Unit>,
    tags: Vec<Label>,
}

impl MeterOptions {
    fn new(name: String) -> Self {
        Self { name, description: None, base_unit: None, tags: Vec::new() }
    }

    fn into_meter(self, source: Source) -> Meter {
        Meter {
            id: MeterId::new(self.name, self.tags),
            description: self.description,
            base_unit: self.base_unit,
            source,
        }
    }
}

macro_rules! meter_options {
    () => {
        /// Sets the description carried by every instrument derived from this meter.
        #[must_use]
        pub fn description<D>(mut self, description: D) -> Self
        where
            D: Into<Cow<'static, str>>,
        {
            self.options.description = Some(description.into());
            self
        }

        /// Sets the base unit hint.
        ///
        /// Timer kinds always export durations in seconds and ignore this hint.
        #[must_use]
        pub fn base_unit(mut self, unit: Unit) -> Self {
            self.options.base_unit = Some(unit);
            self
        }

        /// Adds a tag.
        #[must_use]
        pub fn tag<K, V>(mut self, key: K, value: V) -> Self
        where
            K: Into<metrics::SharedString>,
            V: Into<metrics::SharedString>,
        {
            self.options.tags.push(Label::new(key, value));
            self
        }

        /// Adds a set of tags.
        #[must_use]
        pub fn tags<L: IntoLabels>(mut self, tags: L) -> Self {
            self.options.tags.extend(tags.into_labels());
            self
        }
    };
}

fn weak_reader<T, R, F>(state: &Arc<T>, f: F) -> Box<dyn Fn() -> Option<R> + Send + Sync>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> R + Send + Sync + 'static,
{
    let state = Arc::downgrade(state);
    Box::new(move || state.upgrade().map(|state| f(&state)))
}

/// A push-style monotonic counter.
///
/// Clones share the same underlying value.
#[derive(Clone, Debug)]
pub struct Counter {
    meter: Arc<Meter>,
    value: Arc<AtomicU64>,
}

impl Counter {
    /// Starts building a counter.
    pub fn builder<N: Into<String>>(name: N) -> CounterBuilder {
        CounterBuilder { options: MeterOptions::new(name.into()) }
    }

    /// Increments the counter by `value`.
    pub fn increment(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Current value of the counter.
    pub fn count(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Identity of the underlying meter.
    pub fn id(&self) -> &MeterId {
        self.meter.id()
    }

    /// The underlying meter.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }
}

/// Builder for [`Counter`].
pub struct CounterBuilder {
    options: MeterOptions,
}

impl CounterBuilder {
    meter_options!();

    /// Registers the counter.
    ///
    /// # Errors
    ///
    /// Fails if a meter with the same identity is already registered, or if the counter's
    /// instrument collides with an instrument of another meter.
    pub fn register(self, registry: &MeterRegistry) -> Result<Counter, BridgeError> {
        let value = Arc::new(AtomicU64::new(0));
        let meter = registry.register(self.options.into_meter(Source::Counter(Arc::clone(&value))))?;
        Ok(Counter { meter, value })
    }
}

/// A gauge backed by a function of a caller-supplied state object.
#[derive(Clone, Debug)]
pub struct Gauge {
    meter: Arc<Meter>,
}

impl Gauge {
    /// Starts building a gauge reporting `f(state)`.
    ///
    /// Only a weak reference to `state` is kept: once every other reference is dropped, the gauge
    /// stops producing points.
    pub fn builder<N, T, F>(name: N, state: &Arc<T>, f: F) -> GaugeBuilder
    where
        N: Into<String>,
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        GaugeBuilder { options: MeterOptions::new(name.into()), read: weak_reader(state, f) }
    }

    /// Current value, or `None` if the state object is gone.
    pub fn value(&self) -> Option<f64> {
        match self.meter.read() {
            Some(Reading::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Identity of the underlying meter.
    pub fn id(&self) -> &MeterId {
        self.meter.id()
    }

    /// The underlying meter.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }
}

/// Builder for [`Gauge`].
pub struct GaugeBuilder {
    options: MeterOptions,
    read: ValueFn,
}

impl GaugeBuilder {
    meter_options!();

    /// Registers the gauge.
    ///
    /// # Errors
    ///
    /// Fails if a meter with the same identity is already registered, or if the gauge's
    /// instrument collides with an instrument of another meter.
    pub fn register(self, registry: &MeterRegistry) -> Result<Gauge, BridgeError> {
        let meter = registry.register(self.options.into_meter(Source::Gauge(self.read)))?;
        Ok(Gauge { meter })
    }
}

/// A monotonic counter backed by a function of a caller-supplied state object.
#[derive(Clone, Debug)]
pub struct FunctionCounter {
    meter: Arc<Meter>,
}

impl FunctionCounter {
    /// Starts building a counter reporting `f(state)`.
    ///
    /// `f` must never decrease. Only a weak reference to `state` is kept.
    pub fn builder<N, T, F>(name: N, state: &Arc<T>, f: F) -> FunctionCounterBuilder
    where
        N: Into<String>,
        T: Send + Sync + 'static,
        F: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        FunctionCounterBuilder {
            options: MeterOptions::new(name.into()),
            read: weak_reader(state, f),
        }
    }

    /// Current count, or `None` if the state object is gone.
    pub fn count(&self) -> Option<f64> {
        match self.meter.read() {
            Some(Reading::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Identity of the underlying meter.
    pub fn id(&self) -> &MeterId {
        self.meter.id()
    }

    /// The underlying meter.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }
}

/// Builder for [`FunctionCounter`].
pub struct FunctionCounterBuilder {
    options: MeterOptions,
    read: ValueFn,
}

impl FunctionCounterBuilder {
    meter_options!();

    /// Registers the counter.
    ///
    /// # Errors
    ///
    /// Fails if a meter with the same identity is already registered, or if the counter's
    /// instrument collides with an instrument of another meter.
    pub fn register(self, registry: &MeterRegistry) -> Result<FunctionCounter, BridgeError> {
        let meter = registry.register(self.options.into_meter(Source::FunctionCounter(self.read)))?;
        Ok(FunctionCounter { meter })
    }
}

/// A timer backed by functions of a caller-supplied state object.
///
/// Exports `<name>.count`, the number of timed invocations, and `<name>.sum`, the cumulative
/// duration in seconds.
#[derive(Clone, Debug)]
pub struct FunctionTimer {
    meter: Arc<Meter>,
}

impl FunctionTimer {
    /// Starts building a function timer.
    ///
    /// `count` returns the number of timed invocations and `total` the cumulative duration
    /// expressed in `time_unit`. Both must be pure reads that never decrease. Only a weak reference
    /// to `state` is kept.
    pub fn builder<N, T, C, D>(
        name: N,
        state: &Arc<T>,
        count: C,
        total: D,
        time_unit: Unit,
    ) -> FunctionTimerBuilder
    where
        N: Into<String>,
        T: Send + Sync + 'static,
        C: Fn(&T) -> u64 + Send + Sync + 'static,
        D: Fn(&T) -> f64 + Send + Sync + 'static,
    {
        FunctionTimerBuilder {
            options: MeterOptions::new(name.into()),
            read: weak_reader(state, move |state| (count(state), total(state))),
            time_unit,
        }
    }

    /// Current invocation count, or `None` if the state object is gone.
    pub fn count(&self) -> Option<u64> {
        match self.meter.read() {
            Some(Reading::Timer { count, .. }) => Some(count),
            _ => None,
        }
    }

    /// Identity of the underlying meter.
    pub fn id(&self) -> &MeterId {
        self.meter.id()
    }

    /// The underlying meter.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }
}

/// Builder for [`FunctionTimer`].
pub struct FunctionTimerBuilder {
    options: MeterOptions,
    read: TimerFn,
    time_unit: Unit,
}

impl FunctionTimerBuilder {
    meter_options!();

    /// Registers the timer.
    ///
    /// # Errors
    ///
    /// Fails if the time unit cannot be converted to seconds, if a meter with the same identity
    /// is already registered, or if one of the timer's instruments collides with an instrument of
    /// another meter.
    pub fn register(self, registry: &MeterRegistry) -> Result<FunctionTimer, BridgeError> {
        let source = Source::FunctionTimer { read: self.read, time_unit: self.time_unit };
        let meter = registry.register(self.options.into_meter(source))?;
        Ok(FunctionTimer { meter })
    }
}

/// A push-style timer.
///
/// Exports `<name>.count`, `<name>.sum`, and `<name>.max`, the longest duration recorded so far.
/// Clones share the same underlying state.
#[derive(Clone, Debug)]
pub struct Timer {
    meter: Arc<Meter>,
    cell: Arc<TimerCell>,
}

impl Timer {
    /// Starts building a timer.
    pub fn builder<N: Into<String>>(name: N) -> TimerBuilder {
        TimerBuilder { options: MeterOptions::new(name.into()) }
    }

    /// Records a single timed invocation.
    pub fn record(&self, duration: Duration) {
        self.cell.record(duration);
    }

    /// Runs `f`, recording how long it took.
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.record(start.elapsed());
        result
    }

    /// Number of recorded invocations.
    pub fn count(&self) -> u64 {
        self.cell.count.load(Ordering::Relaxed)
    }

    /// Cumulative recorded duration.
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.cell.total_nanos.load(Ordering::Relaxed))
    }

    /// Identity of the underlying meter.
    pub fn id(&self) -> &MeterId {
        self.meter.id()
    }

    /// The underlying meter.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }
}

/// Builder for [`Timer`].
pub struct TimerBuilder {
    options: MeterOptions,
}

impl TimerBuilder {
    meter_options!();

    /// Registers the timer.
    ///
    /// # Errors
    ///
    /// Fails if a meter with the same identity is already registered, or if one of the timer's
    /// instruments collides with an instrument of another meter.
    pub fn register(self, registry: &MeterRegistry) -> Result<Timer, BridgeError> {
        let cell = Arc::new(TimerCell::default());
        let meter = registry.register(self.options.into_meter(Source::Timer(Arc::clone(&cell))))?;
        Ok(Timer { meter, cell })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_tag_order() {
        let a = MeterId::new("requests", &[("method", "GET"), ("status", "200")]);
        let b = MeterId::new("requests", &[("status", "200"), ("method", "GET")]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "requests{method=GET,status=200}");

        let c = MeterId::new("requests", &[("method", "POST"), ("status", "200")]);
        assert_ne!(a, c);
    }

    #[test]
    fn last_tag_value_wins() {
        let id = MeterId::new("requests", &[("method", "GET"), ("method", "POST")]);
        let tags: Vec<_> = id.tags().map(|label| (label.key(), label.value())).collect();
        assert_eq!(tags, vec![("method", "POST")]);
    }

    #[test]
    fn untagged_identity_display() {
        let id = MeterId::new("uptime", Vec::<Label>::new());
        assert_eq!(id.to_string(), "uptime");
    }

    #[test]
    fn timer_cell_tracks_count_total_and_max() {
        let cell = TimerCell::default();
        cell.record(Duration::from_millis(5));
        cell.record(Duration::from_millis(20));
        cell.record(Duration::from_millis(10));

        assert_eq!(cell.count.load(Ordering::Relaxed), 3);
        assert_eq!(cell.total_nanos.load(Ordering::Relaxed), 35_000_000);
        assert_eq!(cell.max_nanos.load(Ordering::Relaxed), 20_000_000);
    }

    #[test]
    fn function_source_stops_when_state_is_dropped() {
        let state = Arc::new(7u64);
        let read = weak_reader(&state, |value| *value as f64);
        assert_eq!(read(), Some(7.0));

        drop(state);
        assert_eq!(read(), None);
    }
}
