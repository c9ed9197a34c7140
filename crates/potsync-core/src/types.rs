//! Core domain types for Potsync
//!
//! Typed views over raw records, decoded through the tag codec. A view keeps
//! the underlying [`Record`] so the payload, id and timestamps stay
//! available for republishing and deletion.

use serde::{Deserialize, Serialize};

use crate::record::{Coordinate, PublicId, Record};
use crate::tags;

/// Kind number of plant pot records (addressable).
pub const KIND_PLANT_POT: u32 = 30000;
/// Kind number of watering log records (append-only).
pub const KIND_PLANT_LOG: u32 = 30001;
/// Kind number of deletion records (tombstones).
pub const KIND_DELETION: u32 = 5;
/// Kind number of weather station metadata records.
pub const KIND_WEATHER_STATION: u32 = 16158;
/// Kind number of weather telemetry records.
pub const KIND_WEATHER_READING: u32 = 4223;

/// `client` tag value stamped on records written by this implementation.
pub const CLIENT_TAG: &str = "potsync";

/// One queued command on a plant pot.
///
/// Projected from a repeated `task` tag; the duration stays a decimal string
/// because that is the wire representation the device reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterTask {
    /// Command type, e.g. `water`.
    pub task_type: String,
    /// Duration in seconds, as a decimal string.
    pub duration: String,
}

impl WaterTask {
    /// Create a watering task with the given duration in seconds.
    pub fn water(seconds: u64) -> Self {
        Self {
            task_type: "water".to_string(),
            duration: seconds.to_string(),
        }
    }

    /// Parsed duration in seconds, if the string is a valid decimal.
    pub fn duration_seconds(&self) -> Option<u64> {
        self.duration.parse().ok()
    }
}

/// Format a duration in seconds into a short human-readable form.
///
/// `45` becomes `45s`, `120` becomes `2m`, `150` becomes `2m 30s`.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{}s", seconds);
    }
    let minutes = seconds / 60;
    let remaining = seconds % 60;
    if remaining == 0 {
        format!("{}m", minutes)
    } else {
        format!("{}m {}s", minutes, remaining)
    }
}

/// Current state of a plant pot, derived from its latest non-deleted record.
///
/// The record is authored by the *device* identity; the human owner is
/// carried in the `p` tag. The payload is the device secret encrypted to the
/// owner and stays opaque at this layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantPot {
    /// The underlying record (device-signed).
    pub record: Record,
    /// The `d`-tag identifier, unique per owner.
    pub identifier: String,
    /// The owner identity from the `p` tag.
    pub owner: PublicId,
    /// Optional display name.
    pub name: Option<String>,
    /// Optional assigned weather station identity.
    pub weather_station: Option<PublicId>,
    /// Queued commands, in tag order.
    pub tasks: Vec<WaterTask>,
}

impl PlantPot {
    /// Project a validated plant pot record into its typed view.
    ///
    /// Returns `None` when the record is missing the identifying tags; pair
    /// with [`validate::plant_pot`](crate::validate::plant_pot) on the read
    /// path so this never fires on relay data.
    pub fn from_record(record: Record) -> Option<Self> {
        let identifier = record.identifier()?.to_string();
        let owner = PublicId::parse(record.tag_value("p")?).ok()?;
        let name = record.tag_value("name").map(String::from);
        let weather_station = record
            .tag_value("weather_station")
            .and_then(|v| PublicId::parse(v).ok());
        let tasks = tags::decode_tasks(&record.tags);
        Some(Self {
            record,
            identifier,
            owner,
            name,
            weather_station,
            tasks,
        })
    }

    /// Device identity that authored the pot record.
    pub fn device(&self) -> &PublicId {
        &self.record.identity
    }

    /// Owner-identity coordinate, used in log addresses and deletions.
    pub fn owner_coordinate(&self) -> Coordinate {
        Coordinate::new(KIND_PLANT_POT, self.owner.clone(), self.identifier.clone())
    }

    /// Device-identity coordinate, the historical deletion target variant.
    pub fn device_coordinate(&self) -> Coordinate {
        Coordinate::new(
            KIND_PLANT_POT,
            self.record.identity.clone(),
            self.identifier.clone(),
        )
    }
}

/// A completed-task log entry referencing a plant pot.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantLog {
    /// The underlying record (device-signed, immutable).
    pub record: Record,
    /// The referenced pot address from the `a` tag.
    pub address: String,
    /// Tasks recorded as completed, in tag order.
    pub tasks: Vec<WaterTask>,
}

impl PlantLog {
    /// Project a validated log record into its typed view.
    pub fn from_record(record: Record) -> Option<Self> {
        let address = record.tag_value("a")?.to_string();
        let tasks = tags::decode_tasks(&record.tags);
        Some(Self {
            record,
            address,
            tasks,
        })
    }

    /// The pot identifier parsed from the address, if well-formed.
    pub fn pot_identifier(&self) -> Option<String> {
        Coordinate::parse(&self.address)
            .ok()
            .map(|c| c.identifier)
    }
}

/// Read-only weather station metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherStation {
    /// The underlying record.
    pub record: Record,
    /// Station display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Optional geohash of the station location.
    pub geohash: Option<String>,
}

impl WeatherStation {
    /// Project a validated station record into its typed view.
    pub fn from_record(record: Record) -> Option<Self> {
        let name = record.tag_value("name")?.to_string();
        let description = record.tag_value("description").map(String::from);
        let geohash = record.tag_value("g").map(String::from);
        Some(Self {
            record,
            name,
            description,
            geohash,
        })
    }

    /// Station identity (the record author).
    pub fn station_id(&self) -> &PublicId {
        &self.record.identity
    }
}

/// Latest telemetry from a weather station.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReading {
    /// The underlying record.
    pub record: Record,
}

impl WeatherReading {
    /// Wrap a validated reading record.
    pub fn from_record(record: Record) -> Self {
        Self { record }
    }

    /// Temperature as a decimal string, if reported.
    pub fn temperature(&self) -> Option<&str> {
        self.record.tag_value("temp")
    }

    /// Humidity as a decimal string, if reported.
    pub fn humidity(&self) -> Option<&str> {
        self.record.tag_value("humidity")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Tag;

    fn identity(byte: u8) -> PublicId {
        PublicId::from_bytes(&[byte; 32])
    }

    fn signed(kind: u32, author: PublicId, tags: Vec<Tag>, payload: &str) -> Record {
        let id = Record::compute_id(&author, 100, kind, &tags, payload);
        Record {
            id,
            identity: author,
            kind,
            created_at: 100,
            tags,
            payload: payload.to_string(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(60), "1m");
        assert_eq!(format_duration(150), "2m 30s");
    }

    #[test]
    fn test_water_task_duration_seconds() {
        assert_eq!(WaterTask::water(30).duration_seconds(), Some(30));
        let bad = WaterTask {
            task_type: "water".to_string(),
            duration: "soon".to_string(),
        };
        assert_eq!(bad.duration_seconds(), None);
    }

    #[test]
    fn test_plant_pot_projection() {
        let owner = identity(1);
        let device = identity(2);
        let record = signed(
            KIND_PLANT_POT,
            device.clone(),
            vec![
                Tag::new("d", &["tomato-1"]),
                Tag::new("name", &["Balcony Tomato"]),
                Tag::new("p", &[owner.as_str()]),
                Tag::new("task", &["water", "30"]),
            ],
            "ciphertext",
        );

        let pot = PlantPot::from_record(record).expect("valid pot record");
        assert_eq!(pot.identifier, "tomato-1");
        assert_eq!(pot.owner, owner);
        assert_eq!(pot.device(), &device);
        assert_eq!(pot.name.as_deref(), Some("Balcony Tomato"));
        assert_eq!(pot.tasks, vec![WaterTask::water(30)]);
        assert_eq!(
            pot.owner_coordinate().to_string(),
            format!("30000:{}:tomato-1", owner)
        );
        assert_eq!(
            pot.device_coordinate().to_string(),
            format!("30000:{}:tomato-1", device)
        );
    }

    #[test]
    fn test_plant_pot_projection_requires_identifying_tags() {
        let record = signed(
            KIND_PLANT_POT,
            identity(3),
            vec![Tag::new("d", &["lonely"])],
            "ciphertext",
        );
        assert!(PlantPot::from_record(record).is_none());
    }

    #[test]
    fn test_plant_log_pot_identifier() {
        let owner = identity(4);
        let address = format!("30000:{}:basil", owner);
        let record = signed(
            KIND_PLANT_LOG,
            identity(5),
            vec![Tag::new("a", &[&address]), Tag::new("task", &["water", "5"])],
            "",
        );

        let log = PlantLog::from_record(record).expect("valid log record");
        assert_eq!(log.address, address);
        assert_eq!(log.pot_identifier().as_deref(), Some("basil"));
        assert_eq!(log.tasks, vec![WaterTask::water(5)]);
    }

    #[test]
    fn test_weather_projections() {
        let station = signed(
            KIND_WEATHER_STATION,
            identity(6),
            vec![
                Tag::new("name", &["Roof Station"]),
                Tag::new("g", &["u4pruyd"]),
            ],
            "",
        );
        let station = WeatherStation::from_record(station).expect("valid station");
        assert_eq!(station.name, "Roof Station");
        assert_eq!(station.geohash.as_deref(), Some("u4pruyd"));

        let reading = signed(
            KIND_WEATHER_READING,
            identity(6),
            vec![Tag::new("temp", &["21.5"]), Tag::new("humidity", &["40"])],
            "",
        );
        let reading = WeatherReading::from_record(reading);
        assert_eq!(reading.temperature(), Some("21.5"));
        assert_eq!(reading.humidity(), Some("40"));
    }
}
