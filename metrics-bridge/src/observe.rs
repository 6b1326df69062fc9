//! Waiting on eventually-consistent export state.
//!
//! Collection runs on its own cadence, so what a sink holds lags behind what the application has
//! done. [`Await`] polls a sink until the points exported under an instrument satisfy a predicate,
//! or until its timeout elapses.
//!
//! ```rust
//! use std::{sync::Arc, time::Duration};
//!
//! use metrics_bridge::{Await, CollectorBuilder, Counter, InMemorySink, MeterRegistry};
//!
//! let registry = Arc::new(MeterRegistry::new());
//! let sink = Arc::new(InMemorySink::new());
//! let _collector = CollectorBuilder::new()
//!     .with_interval(Duration::from_millis(10))
//!     .spawn(Arc::clone(&registry), sink.clone())
//!     .expect("failed to spawn collector");
//!
//! let requests = Counter::builder("requests").register(&registry).expect("failed to register");
//! requests.increment(3);
//!
//! let points = Await::new()
//!     .until(&*sink, "requests", |points| points.iter().any(|p| p.value() == 3.0))
//!     .into_result()
//!     .expect("requests were never exported");
//! assert_eq!(points.len(), 1);
//! ```

use std::{
    fmt,
    thread::sleep,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::trace;

use crate::{sink::ExportQuery, snapshot::DataPoint};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

/// What a timed-out observation saw on its final attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum LastObserved {
    /// Nothing was exported under the instrument name.
    Nothing,
    /// Points were exported, but the predicate did not hold for them.
    Points(Vec<DataPoint>),
}

impl fmt::Display for LastObserved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LastObserved::Nothing => f.write_str("nothing was exported"),
            LastObserved::Points(points) => {
                write!(f, "predicate failed on {} exported point(s):", points.len())?;
                for point in points {
                    write!(f, " [value={}", point.value())?;
                    for label in point.attributes() {
                        write!(f, " {}={}", label.key(), label.value())?;
                    }
                    f.write_str("]")?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of waiting on an instrument.
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// The predicate held.
    Satisfied {
        /// Instrument name.
        instrument: String,
        /// Number of polls, including the successful one.
        attempts: usize,
        /// The points the predicate held for.
        points: Vec<DataPoint>,
    },
    /// The timeout elapsed before the predicate held.
    TimedOut {
        /// Instrument name.
        instrument: String,
        /// Number of polls.
        attempts: usize,
        /// Time spent polling.
        elapsed: Duration,
        /// State seen on the final poll.
        last: LastObserved,
    },
}

impl Observation {
    /// Returns `true` if the predicate held.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Observation::Satisfied { .. })
    }

    /// Converts the observation into a `Result`, yielding the matching points on success.
    ///
    /// # Errors
    ///
    /// If the observation timed out, an error describing the last observed state is returned.
    pub fn into_result(self) -> Result<Vec<DataPoint>, ObservationError> {
        match self {
            Observation::Satisfied { points, .. } => Ok(points),
            Observation::TimedOut { instrument, attempts, elapsed, last } => {
                Err(ObservationError { instrument, attempts, elapsed, last })
            }
        }
    }

    /// Returns the matching points, panicking with the last observed state on timeout.
    ///
    /// # Panics
    ///
    /// Panics if the observation timed out.
    #[track_caller]
    pub fn assert_satisfied(self) -> Vec<DataPoint> {
        match self.into_result() {
            Ok(points) => points,
            Err(e) => panic!("{e}"),
        }
    }
}

/// A timed-out observation.
#[derive(Clone, Debug, Error)]
#[error("timed out after {elapsed:?} and {attempts} attempt(s) waiting on `{instrument}`: {last}")]
pub struct ObservationError {
    /// Instrument name.
    pub instrument: String,
    /// Number of polls.
    pub attempts: usize,
    /// Time spent polling.
    pub elapsed: Duration,
    /// State seen on the final poll.
    pub last: LastObserved,
}

/// Polls exported state until a predicate holds or a timeout elapses.
///
/// Polling is the only blocking wait in the bridge. It is bounded by the timeout: each attempt
/// queries the sink, and unless the predicate holds the caller's thread sleeps for the interval
/// (or whatever remains of the timeout, if shorter) before the next one.
#[derive(Clone, Copy, Debug)]
pub struct Await {
    timeout: Duration,
    interval: Duration,
}

impl Await {
    /// Creates an `Await` with the default timeout and interval.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total time budget.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the pause between polls.
    ///
    /// Defaults to 100 milliseconds.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Waits until `predicate` holds for the points exported under `instrument`.
    ///
    /// The predicate is evaluated at least once, even with a zero timeout, and may be handed an
    /// empty slice when nothing is exported.
    pub fn until<Q, P>(&self, query: &Q, instrument: &str, mut predicate: P) -> Observation
    where
        Q: ExportQuery + ?Sized,
        P: FnMut(&[DataPoint]) -> bool,
    {
        let start = Instant::now();
        // An unrepresentable deadline means waiting for as long as it takes.
        let deadline = start.checked_add(self.timeout);
        let mut attempts = 0;
        loop {
            attempts += 1;
            let points = query.query(instrument);
            if predicate(&points) {
                trace!(instrument, attempts, "Observation satisfied.");
                return Observation::Satisfied {
                    instrument: instrument.to_owned(),
                    attempts,
                    points,
                };
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                let last = if points.is_empty() {
                    LastObserved::Nothing
                } else {
                    LastObserved::Points(points)
                };
                trace!(instrument, attempts, "Observation timed out.");
                return Observation::TimedOut {
                    instrument: instrument.to_owned(),
                    attempts,
                    elapsed: now - start,
                    last,
                };
            }

            let remaining = deadline.map_or(self.interval, |deadline| deadline - now);
            sleep(self.interval.min(remaining));
        }
    }

    /// Waits until nothing is exported under `instrument`.
    pub fn until_empty<Q>(&self, query: &Q, instrument: &str) -> Observation
    where
        Q: ExportQuery + ?Sized,
    {
        self.until(query, instrument, <[DataPoint]>::is_empty)
    }
}

impl Default for Await {
    fn default() -> Self {
        Await { timeout: DEFAULT_TIMEOUT, interval: DEFAULT_INTERVAL }
    }
}
