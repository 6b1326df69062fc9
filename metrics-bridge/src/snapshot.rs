//! Immutable export snapshots.

use std::time::SystemTime;

use indexmap::IndexMap;
use metrics::Label;

use crate::instrument::InstrumentDescriptor;

/// A single timestamped, attributed observation of an instrument.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPoint {
    value: f64,
    attributes: Vec<Label>,
    timestamp: SystemTime,
}

impl DataPoint {
    pub(crate) fn new(value: f64, attributes: Vec<Label>, timestamp: SystemTime) -> Self {
        Self { value, attributes, timestamp }
    }

    /// Observed value, already converted to the instrument's unit.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Attributes of this point: exactly the tags of the meter that produced it, sorted by key.
    pub fn attributes(&self) -> &[Label] {
        &self.attributes
    }

    /// Gets the value of the attribute named `key`, if present.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.iter().find(|label| label.key() == key).map(Label::value)
    }

    /// Returns `true` if the attributes are exactly the given key/value pairs, in any order.
    pub fn has_attributes(&self, expected: &[(&str, &str)]) -> bool {
        self.attributes.len() == expected.len()
            && expected.iter().all(|(key, value)| self.attribute(key) == Some(*value))
    }

    /// When the point was extracted from its meter.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// All points exported under a single instrument name.
#[derive(Clone, Debug)]
pub struct InstrumentData {
    descriptor: InstrumentDescriptor,
    points: Vec<DataPoint>,
}

impl InstrumentData {
    /// Descriptor of the instrument.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.descriptor
    }

    /// Points in the order their meters were registered.
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }
}

/// Immutable set of data points collected in one pass across every registered meter.
///
/// A snapshot owns all of its data: meters keep changing after it has been produced, and removing
/// a meter never alters a snapshot that already exists.
#[derive(Clone, Debug)]
pub struct ExportSnapshot {
    instruments: IndexMap<String, InstrumentData>,
    collected_at: SystemTime,
}

impl ExportSnapshot {
    /// Creates an empty snapshot.
    pub fn empty() -> Self {
        Self { instruments: IndexMap::new(), collected_at: SystemTime::now() }
    }

    /// Gets the data exported under `name`.
    pub fn get(&self, name: &str) -> Option<&InstrumentData> {
        self.instruments.get(name)
    }

    /// Gets the points exported under `name`, which is empty if nothing was exported under it.
    pub fn points(&self, name: &str) -> &[DataPoint] {
        self.instruments.get(name).map(|data| data.points()).unwrap_or(&[])
    }

    /// Iterates over every instrument in the snapshot.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstrumentData)> {
        self.instruments.iter().map(|(name, data)| (name.as_str(), data))
    }

    /// Names of every instrument in the snapshot.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(String::as_str)
    }

    /// Number of instruments in the snapshot.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Returns `true` if no instrument was exported.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// When collection of this snapshot started.
    pub fn collected_at(&self) -> SystemTime {
        self.collected_at
    }
}

/// Accumulates points for a single collection pass.
pub(crate) struct SnapshotBuilder {
    instruments: IndexMap<String, InstrumentData>,
    collected_at: SystemTime,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { instruments: IndexMap::new(), collected_at: SystemTime::now() }
    }

    /// Appends `point` under the descriptor's name.
    ///
    /// Points from distinct meters are kept side by side, never merged.
    pub fn push(&mut self, descriptor: &InstrumentDescriptor, point: DataPoint) {
        self.instruments
            .entry(descriptor.name().to_owned())
            .or_insert_with(|| InstrumentData { descriptor: descriptor.clone(), points: Vec::new() })
            .points
            .push(point);
    }

    pub fn build(self) -> ExportSnapshot {
        ExportSnapshot { instruments: self.instruments, collected_at: self.collected_at }
    }
}
