//! Descriptors of exported instruments.

use std::{borrow::Cow, fmt};

/// Semantic kind of an exported instrument.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum InstrumentKind {
    /// Cumulative value that only increases over the lifetime of its source.
    MonotonicSum,
    /// Cumulative value that may also decrease.
    NonMonotonicSum,
    /// Point-in-time value.
    Gauge,
}

impl InstrumentKind {
    /// Returns `true` if this kind only ever increases.
    pub fn is_monotonic(&self) -> bool {
        matches!(self, InstrumentKind::MonotonicSum)
    }
}

/// Numeric representation an exporter should use for an instrument.
///
/// Data points always carry an `f64`; integer instruments only ever hold whole values.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ValueType {
    /// Whole, non-negative values, such as invocation counts.
    Integer,
    /// Floating-point values.
    Float,
}

/// Describes a canonical, exported instrument derived from a meter.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct InstrumentDescriptor {
    name: String,
    kind: InstrumentKind,
    value_type: ValueType,
    unit: Cow<'static, str>,
    description: Cow<'static, str>,
}

impl InstrumentDescriptor {
    pub(crate) fn new(
        name: String,
        kind: InstrumentKind,
        value_type: ValueType,
        unit: Cow<'static, str>,
        description: Cow<'static, str>,
    ) -> Self {
        Self { name, kind, value_type, unit, description }
    }

    /// Instrument name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Semantic kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Numeric representation.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Canonical unit string, such as `1` or `s`.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Human-readable description, empty if the source meter declared none.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether `other` may share this instrument's name.
    ///
    /// Distinct meters may contribute points to one instrument only when they agree on everything
    /// but the description.
    pub fn is_compatible_with(&self, other: &InstrumentDescriptor) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.value_type == other.value_type
            && self.unit == other.unit
    }
}

impl fmt::Display for InstrumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?}, unit={})", self.name, self.kind, self.value_type, self.unit)
    }
}
