use metrics::Unit;
use thiserror::Error;

use crate::meter::{MeterId, MeterKind};

/// Configuration errors raised while registering or adapting a meter.
///
/// All of these surface at registration time: a meter that fails with one of them never becomes
/// visible to a collection cycle.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A meter with the same name and tag set is already registered.
    #[error("meter `{id}` is already registered")]
    DuplicateMeter {
        /// Identity of the rejected meter.
        id: MeterId,
    },

    /// The meter reports durations in a unit that cannot be converted to seconds.
    #[error("meter `{id}` reports durations in unsupported time unit `{}`", .unit.as_str())]
    UnsupportedTimeUnit {
        /// Identity of the rejected meter.
        id: MeterId,
        /// The declared source unit.
        unit: Unit,
    },

    /// An instrument derived from the meter collides with one owned by a different kind of meter,
    /// or with one exported under a different kind, value type, or unit.
    #[error(
        "instrument `{instrument}` derived from meter `{id}` conflicts with the instrument already exported by a {existing} meter"
    )]
    InstrumentConflict {
        /// Name of the colliding instrument.
        instrument: String,
        /// Identity of the rejected meter.
        id: MeterId,
        /// Kind of the meter that already owns the instrument name.
        existing: MeterKind,
    },
}

/// Errors that could occur while spawning a background collector.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Failed to spawn the background collection thread.
    #[error("failed to spawn background thread for the snapshot collector")]
    Backend,
}
