//! Unit handling.
//!
//! Source meters describe their values with [`metrics::Unit`]. Exported instruments carry a
//! UCUM-style unit string instead, and every duration is exported in seconds no matter which time
//! unit the source meter accumulated it in.

use std::borrow::Cow;

use metrics::Unit;

/// Unit string of dimensionless instruments, such as invocation counts.
pub const DIMENSIONLESS: &str = "1";

/// Unit string of every exported duration.
pub const SECONDS: &str = "s";

/// Returns how many `unit`s make up one second, or `None` if `unit` is not a time unit.
pub fn per_second(unit: Unit) -> Option<f64> {
    match unit {
        Unit::Nanoseconds => Some(1e9),
        Unit::Microseconds => Some(1e6),
        Unit::Milliseconds => Some(1e3),
        Unit::Seconds => Some(1.0),
        _ => None,
    }
}

/// Renders an optional base-unit hint as the unit string of an exported instrument.
pub fn export_unit(unit: Option<Unit>) -> Cow<'static, str> {
    let label = match unit {
        None | Some(Unit::Count) => DIMENSIONLESS,
        Some(Unit::Seconds) => SECONDS,
        Some(Unit::Milliseconds) => "ms",
        Some(Unit::Microseconds) => "us",
        Some(Unit::Nanoseconds) => "ns",
        Some(Unit::Bytes) => "By",
        Some(Unit::Percent) => "%",
        Some(other) => return Cow::Owned(other.as_canonical_label().to_owned()),
    };
    Cow::Borrowed(label)
}
