//! Keyed snapshot cache consumed by the presentation layer.
//!
//! One explicit value with a defined lifecycle: created per session, passed
//! as a dependency, invalidated by key. The cache is the only shared
//! mutable structure in the engine; each key holds an immutable snapshot
//! behind an `Arc`, so writes are atomic swaps and last-write-wins per key
//! needs no finer-grained locking.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::record::PublicId;
use crate::types::{PlantLog, PlantPot, WeatherReading, WeatherStation};

/// Coordinate of one cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// All pots owned by an identity.
    Pots(PublicId),
    /// One pot by owner and identifier.
    Pot(PublicId, String),
    /// Watering logs of one pot.
    Logs(PublicId, String),
    /// All known weather stations.
    Stations,
    /// Latest reading of one station.
    Reading(PublicId),
}

/// Immutable snapshot stored per key.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// Reconciled pot list, newest first.
    Pots(Vec<PlantPot>),
    /// Current pot at a coordinate, if any.
    Pot(Option<PlantPot>),
    /// Log entries, newest first.
    Logs(Vec<PlantLog>),
    /// Known stations, newest first.
    Stations(Vec<WeatherStation>),
    /// Latest reading, if any.
    Reading(Option<WeatherReading>),
}

/// Session-scoped snapshot store.
#[derive(Default)]
pub struct Cache {
    entries: RwLock<HashMap<CacheKey, Arc<Snapshot>>>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for a key, if cached.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Snapshot>> {
        self.entries.read().get(key).cloned()
    }

    /// Store a snapshot, replacing any previous value (last write wins).
    pub fn put(&self, key: CacheKey, snapshot: Snapshot) {
        self.entries.write().insert(key, Arc::new(snapshot));
    }

    /// Drop the snapshot for a key, forcing the next read through to the
    /// relay. Unknown keys are a no-op.
    pub fn invalidate(&self, key: &CacheKey) {
        self.entries.write().remove(key);
    }

    /// Drop every view a pot record can affect: the owner's pot list and
    /// the point lookup for this identifier.
    pub fn invalidate_pot_views(&self, owner: &PublicId, identifier: &str) {
        let mut entries = self.entries.write();
        entries.remove(&CacheKey::Pots(owner.clone()));
        entries.remove(&CacheKey::Pot(owner.clone(), identifier.to_string()));
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no snapshots.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
