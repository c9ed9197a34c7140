//! Reconciliation of addressable records under concurrent writes and
//! tombstones.
//!
//! Given one relay's view of an addressable kind plus the owner's deletion
//! records, compute the single current record per coordinate:
//!
//! 1. Collect tombstone targets (`e` record ids, `a` coordinates).
//! 2. Drop tombstoned records. Both historical coordinate variants are
//!    checked: the device-identity form (`kind:author:d`) and the
//!    owner-identity form (`kind:p-tag:d`).
//! 3. Group survivors by coordinate and keep the record with the highest
//!    `created_at`; ties break to the lexicographically smallest id.
//!
//! The result is deterministic and idempotent. It converges only over the
//! record set one relay returned at one point in time; no cross-relay
//! guarantee is made.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::record::{Coordinate, PublicId, Record};
use crate::validate;

/// Tombstone targets extracted from a batch of deletion records.
///
/// Deletion authorization is structural: a deletion only takes effect on a
/// record whose owner (`p` tag) or author identity matches the deleting
/// identity. Tombstones therefore remember who requested each removal.
#[derive(Debug, Default)]
pub struct Tombstones {
    /// Deleted record ids, each with the identities that requested deletion.
    by_id: HashMap<String, HashSet<PublicId>>,
    /// Deleted coordinates (string form), with requesting identities.
    by_coord: HashMap<String, HashSet<PublicId>>,
}

impl Tombstones {
    /// Collect tombstones from deletion records, skipping malformed ones.
    pub fn collect(deletions: &[Record]) -> Self {
        let mut out = Self::default();
        for record in deletions {
            if !validate::deletion(record) {
                debug!(id = %record.id, "Dropping malformed deletion record");
                continue;
            }
            for tag in &record.tags {
                match (tag.name(), tag.value()) {
                    (Some("e"), Some(id)) if !id.is_empty() => {
                        out.by_id
                            .entry(id.to_string())
                            .or_default()
                            .insert(record.identity.clone());
                    }
                    (Some("a"), Some(coord)) if !coord.is_empty() => {
                        out.by_coord
                            .entry(coord.to_string())
                            .or_default()
                            .insert(record.identity.clone());
                    }
                    _ => {}
                }
            }
        }
        out
    }

    /// Whether any tombstones were collected.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_coord.is_empty()
    }

    fn id_deleted_by(&self, id: &str, authorized: &[&PublicId]) -> bool {
        self.by_id
            .get(id)
            .is_some_and(|who| authorized.iter().any(|a| who.contains(a)))
    }

    fn coord_deleted_by(&self, coord: &str, authorized: &[&PublicId]) -> bool {
        self.by_coord
            .get(coord)
            .is_some_and(|who| authorized.iter().any(|a| who.contains(a)))
    }
}

/// Coordinate under the owner-derivation rule: `(kind, p-tag, d)`.
///
/// Records without a `p` tag fall back to the author identity, so the same
/// grouping works for self-owned addressable kinds.
fn owner_coordinate(record: &Record) -> Option<Coordinate> {
    let identifier = record.identifier()?;
    let owner = record
        .tag_value("p")
        .and_then(|p| PublicId::parse(p).ok())
        .unwrap_or_else(|| record.identity.clone());
    Some(Coordinate::new(record.kind, owner, identifier))
}

fn is_tombstoned(record: &Record, tombstones: &Tombstones) -> bool {
    let device = &record.identity;
    let owner = record.tag_value("p").and_then(|p| PublicId::parse(p).ok());
    let mut authorized: Vec<&PublicId> = vec![device];
    if let Some(owner) = owner.as_ref() {
        authorized.push(owner);
    }

    if tombstones.id_deleted_by(&record.id, &authorized) {
        return true;
    }

    if let Some(identifier) = record.identifier() {
        let device_coord =
            Coordinate::new(record.kind, device.clone(), identifier).to_string();
        if tombstones.coord_deleted_by(&device_coord, &authorized) {
            return true;
        }
        if let Some(owner) = owner.as_ref() {
            let owner_coord = Coordinate::new(record.kind, owner.clone(), identifier).to_string();
            if tombstones.coord_deleted_by(&owner_coord, &authorized) {
                return true;
            }
        }
    }

    false
}

/// Reconcile a batch of validated addressable records against the owner's
/// deletion records.
///
/// Returns the per-coordinate winners, newest first (ties by id for a fully
/// deterministic order). Re-running on its own output returns the same set.
pub fn reconcile(records: Vec<Record>, deletions: &[Record]) -> Vec<Record> {
    let tombstones = Tombstones::collect(deletions);

    let mut winners: HashMap<Coordinate, Record> = HashMap::new();
    for record in records {
        if is_tombstoned(&record, &tombstones) {
            debug!(id = %record.id, "Dropping tombstoned record");
            continue;
        }
        let Some(coordinate) = owner_coordinate(&record) else {
            debug!(id = %record.id, "Dropping record without identifier");
            continue;
        };
        match winners.entry(coordinate) {
            Entry::Occupied(mut entry) => {
                if supersedes(&record, entry.get()) {
                    entry.insert(record);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
    }

    let mut out: Vec<Record> = winners.into_values().collect();
    out.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Latest-write-wins ordering: higher `created_at` wins, ties break to the
/// lexicographically smallest id.
fn supersedes(candidate: &Record, current: &Record) -> bool {
    candidate.created_at > current.created_at
        || (candidate.created_at == current.created_at && candidate.id < current.id)
}
