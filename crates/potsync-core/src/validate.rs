//! Shape validation for raw relay records.
//!
//! Pure predicates with no I/O. A record that fails its shape contract is
//! dropped from query results without surfacing an error; relays are
//! untrusted and malformed records are data hygiene, not a caller problem.

use crate::record::Record;
use crate::types::{
    KIND_DELETION, KIND_PLANT_LOG, KIND_PLANT_POT, KIND_WEATHER_READING, KIND_WEATHER_STATION,
};

/// Validate a plant pot record (strict variant).
///
/// Requires matching kind, a non-empty `d` tag, a non-empty `p` tag and a
/// non-empty payload. Ownership cannot be computed without `p` and the
/// device secret cannot be recovered without the payload, so the permissive
/// variant that skips those checks is not used here.
pub fn plant_pot(record: &Record) -> bool {
    record.kind == KIND_PLANT_POT
        && record.identifier().is_some_and(|d| !d.is_empty())
        && record.tag_value("p").is_some_and(|p| !p.is_empty())
        && !record.payload.is_empty()
}

/// Validate a watering log record: matching kind and an `a` tag.
pub fn log_entry(record: &Record) -> bool {
    record.kind == KIND_PLANT_LOG && record.tag_value("a").is_some()
}

/// Validate a deletion record: matching kind and at least one target tag.
pub fn deletion(record: &Record) -> bool {
    record.kind == KIND_DELETION
        && (record.tag_value("e").is_some() || record.tag_value("a").is_some())
}

/// Validate a weather station record: matching kind and a `name` tag.
pub fn weather_station(record: &Record) -> bool {
    record.kind == KIND_WEATHER_STATION && record.tag_value("name").is_some()
}

/// Validate a weather reading record: matching kind only.
pub fn weather_reading(record: &Record) -> bool {
    record.kind == KIND_WEATHER_READING
}

/// Dispatch validation by expected kind.
///
/// Unknown kinds are rejected rather than passed through structurally.
pub fn for_kind(record: &Record, kind: u32) -> bool {
    match kind {
        KIND_PLANT_POT => plant_pot(record),
        KIND_PLANT_LOG => log_entry(record),
        KIND_DELETION => deletion(record),
        KIND_WEATHER_STATION => weather_station(record),
        KIND_WEATHER_READING => weather_reading(record),
        _ => false,
    }
}
