//! Bridges mutable, push-style meters into immutable, pull-style export snapshots.
//!
//! Application code registers meters in a [`MeterRegistry`] and updates them in place. A
//! [`SnapshotCollector`] periodically lists the registry, maps every meter onto one or more
//! canonical instruments, and publishes the resulting [`ExportSnapshot`] to an [`ExportSink`].
//!
//! # Meters and instruments
//!
//! Each [`MeterKind`] maps onto a fixed set of instruments:
//!
//! - [`Counter`] and [`FunctionCounter`] export `<name>` as a monotonic sum.
//! - [`Gauge`] exports `<name>` as a gauge.
//! - [`FunctionTimer`] exports `<name>.count` (a dimensionless monotonic sum) and `<name>.sum` (the
//!   cumulative duration, always in seconds, whatever unit the meter accumulates in).
//! - [`Timer`] exports the same as [`FunctionTimer`] plus `<name>.max`, a gauge in seconds.
//!
//! Every data point carries exactly the tags of the meter that produced it. Meters that share a name
//! but differ in tags contribute separate points to the same instrument.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::{
//!     atomic::{AtomicU64, Ordering},
//!     Arc,
//! };
//!
//! use metrics::Unit;
//! use metrics_bridge::{
//!     ExportQuery, FunctionTimer, InMemorySink, MeterRegistry, SnapshotCollector,
//! };
//!
//! #[derive(Default)]
//! struct Jobs {
//!     count: AtomicU64,
//!     total_nanos: AtomicU64,
//! }
//!
//! let registry = Arc::new(MeterRegistry::new());
//! let sink = Arc::new(InMemorySink::new());
//! let collector = SnapshotCollector::new(Arc::clone(&registry), sink.clone());
//!
//! let jobs = Arc::new(Jobs::default());
//! FunctionTimer::builder(
//!     "jobs",
//!     &jobs,
//!     |jobs: &Jobs| jobs.count.load(Ordering::Relaxed),
//!     |jobs: &Jobs| jobs.total_nanos.load(Ordering::Relaxed) as f64,
//!     Unit::Nanoseconds,
//! )
//! .description("Background jobs")
//! .tag("queue", "default")
//! .register(&registry)
//! .expect("failed to register timer");
//!
//! jobs.count.fetch_add(1, Ordering::Relaxed);
//! jobs.total_nanos.fetch_add(1_500_000_000, Ordering::Relaxed);
//!
//! collector.collect();
//! assert_eq!(sink.query("jobs.count")[0].value(), 1.0);
//! assert_eq!(sink.query("jobs.sum")[0].value(), 1.5);
//! ```

#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod adapter;
pub use self::adapter::{adapt, Adaptation};

mod collector;
pub use self::collector::{CollectorBuilder, CollectorHandle, SnapshotCollector};

mod error;
pub use self::error::{BridgeError, BuildError};

mod instrument;
pub use self::instrument::{InstrumentDescriptor, InstrumentKind, ValueType};

mod meter;
pub use self::meter::{
    Counter, CounterBuilder, FunctionCounter, FunctionCounterBuilder, FunctionTimer,
    FunctionTimerBuilder, Gauge, GaugeBuilder, Meter, MeterId, MeterKind, Timer, TimerBuilder,
};

mod observe;
pub use self::observe::{Await, LastObserved, Observation, ObservationError};

mod registry;
pub use self::registry::{MeterRegistry, RegisteredMeter};

mod sink;
pub use self::sink::{ExportQuery, ExportSink, FanoutSink, InMemorySink};

mod snapshot;
pub use self::snapshot::{DataPoint, ExportSnapshot, InstrumentData};

pub mod unit;
