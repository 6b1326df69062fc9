//! Concurrency-safe meter registry.

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    adapter::adapt,
    error::BridgeError,
    instrument::InstrumentDescriptor,
    meter::{Meter, MeterId, MeterKind},
};

/// A meter as listed by the registry.
#[derive(Clone, Debug)]
pub struct RegisteredMeter {
    meter: Arc<Meter>,
    sequence: u64,
}

impl RegisteredMeter {
    /// The meter.
    pub fn meter(&self) -> &Arc<Meter> {
        &self.meter
    }

    /// Registration sequence number.
    ///
    /// Every registration gets a new, strictly increasing number, so a meter that is removed and
    /// registered again under the same identity is distinguishable from its predecessor.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

struct InstrumentOwner {
    descriptor: InstrumentDescriptor,
    meter_kind: MeterKind,
    meters: usize,
}

struct Entry {
    registered: RegisteredMeter,
    instruments: Vec<String>,
}

#[derive(Default)]
struct Inner {
    meters: IndexMap<MeterId, Entry>,
    instruments: HashMap<String, InstrumentOwner>,
    next_sequence: u64,
}

impl Inner {
    fn check_conflicts(
        &self,
        meter: &Meter,
        descriptors: &[InstrumentDescriptor],
    ) -> Result<(), BridgeError> {
        for descriptor in descriptors {
            if let Some(owner) = self.instruments.get(descriptor.name()) {
                if owner.meter_kind != meter.kind()
                    || !owner.descriptor.is_compatible_with(descriptor)
                {
                    return Err(BridgeError::InstrumentConflict {
                        instrument: descriptor.name().to_owned(),
                        id: meter.id().clone(),
                        existing: owner.meter_kind,
                    });
                }
            }
        }
        Ok(())
    }

    fn release_instruments(&mut self, names: &[String]) {
        for name in names {
            if let Some(owner) = self.instruments.get_mut(name) {
                owner.meters -= 1;
                if owner.meters == 0 {
                    self.instruments.remove(name);
                }
            }
        }
    }
}

/// Holds every registered meter, keyed by identity.
///
/// The registry is an explicitly constructed value: share it with an [`Arc`] between the code that
/// registers meters and the [`SnapshotCollector`][crate::SnapshotCollector] that reads them.
///
/// Registration, removal, and listing may all happen concurrently. A listing is always a
/// consistent view: every meter in it was registered, and not yet removed, at one single point in
/// time.
#[derive(Default)]
pub struct MeterRegistry {
    inner: RwLock<Inner>,
}

impl MeterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `meter`, making it visible to the next collection cycle.
    ///
    /// The meter is adapted before anything becomes visible, so a meter that fails here leaves no
    /// trace in the registry.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnsupportedTimeUnit`] if the meter cannot be adapted.
    /// - [`BridgeError::DuplicateMeter`] if a meter with the same name and tags is registered.
    /// - [`BridgeError::InstrumentConflict`] if a derived instrument name is already exported by an
    ///   incompatible meter.
    pub fn register(&self, meter: Meter) -> Result<Arc<Meter>, BridgeError> {
        let result = self.try_register(meter);
        if let Err(e) = &result {
            warn!(error = %e, "Rejected meter registration.");
        }
        result
    }

    fn try_register(&self, meter: Meter) -> Result<Arc<Meter>, BridgeError> {
        let descriptors: Vec<InstrumentDescriptor> =
            adapt(&meter)?.descriptors().cloned().collect();

        let mut inner = self.inner.write();
        if inner.meters.contains_key(meter.id()) {
            return Err(BridgeError::DuplicateMeter { id: meter.id().clone() });
        }
        inner.check_conflicts(&meter, &descriptors)?;

        let kind = meter.kind();
        let instruments = descriptors.iter().map(|d| d.name().to_owned()).collect();
        for descriptor in descriptors {
            inner
                .instruments
                .entry(descriptor.name().to_owned())
                .or_insert_with(|| InstrumentOwner { descriptor, meter_kind: kind, meters: 0 })
                .meters += 1;
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;

        let meter = Arc::new(meter);
        let id = meter.id().clone();
        debug!(meter = %id, kind = %kind, sequence, "Registered meter.");
        let registered = RegisteredMeter { meter: Arc::clone(&meter), sequence };
        inner.meters.insert(id, Entry { registered, instruments });
        Ok(meter)
    }

    /// Removes the meter with the given identity.
    ///
    /// Removing a meter that is not registered is a no-op. Snapshots produced before the removal
    /// are unaffected.
    ///
    /// Returns `true` if the meter was registered.
    pub fn remove(&self, id: &MeterId) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.meters.shift_remove(id);
        match removed {
            Some(entry) => {
                inner.release_instruments(&entry.instruments);
                debug!(meter = %id, "Removed meter.");
                true
            }
            None => false,
        }
    }

    /// Lists every registered meter, in registration order.
    pub fn list(&self) -> Vec<RegisteredMeter> {
        self.inner.read().meters.values().map(|entry| entry.registered.clone()).collect()
    }

    /// Finds every registered meter with the given name, whatever its tags.
    pub fn find(&self, name: &str) -> Vec<Arc<Meter>> {
        self.inner
            .read()
            .meters
            .values()
            .filter(|entry| entry.registered.meter.name() == name)
            .map(|entry| Arc::clone(&entry.registered.meter))
            .collect()
    }

    /// Gets the meter with the given identity.
    pub fn get(&self, id: &MeterId) -> Option<Arc<Meter>> {
        self.inner.read().meters.get(id).map(|entry| Arc::clone(&entry.registered.meter))
    }

    /// Number of registered meters.
    pub fn len(&self) -> usize {
        self.inner.read().meters.len()
    }

    /// Returns `true` if no meter is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().meters.is_empty()
    }

    /// Removes every meter.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let removed = inner.meters.len();
        inner.meters.clear();
        inner.instruments.clear();
        debug!(removed, "Cleared meter registry.");
    }
}
