//! Tag codec: between the log's flat tag lists and typed domain values.
//!
//! The wire format is positional. A queued command is one
//! `["task", type, duration-seconds]` tag; identifying attributes (`d`,
//! `name`, `p`, `weather_station`, `client`) each use a two-element tag.
//! Task order is significant: tasks are appended, never reordered, and the
//! device works through them front to back.

use tracing::debug;

use crate::record::{PublicId, Tag};
use crate::types::{WaterTask, CLIENT_TAG};

/// Tag name carrying a queued command.
pub const TASK_TAG: &str = "task";

/// Encode tasks into `task` tags, preserving input order.
///
/// Callers append these after the identifying tags; see [`pot_tags`].
pub fn encode_tasks(tasks: &[WaterTask]) -> Vec<Tag> {
    tasks
        .iter()
        .map(|t| Tag::new(TASK_TAG, &[&t.task_type, &t.duration]))
        .collect()
}

/// Decode the `task` tags of a record into typed tasks, in tag order.
///
/// A `task` tag with fewer than three positions is malformed and is dropped,
/// the same absorb policy validation uses for whole records.
pub fn decode_tasks(tags: &[Tag]) -> Vec<WaterTask> {
    tags.iter()
        .filter(|t| t.name() == Some(TASK_TAG))
        .filter_map(|t| match t.0.as_slice() {
            [_, task_type, duration, ..] => Some(WaterTask {
                task_type: task_type.clone(),
                duration: duration.clone(),
            }),
            _ => {
                debug!(tag = ?t.0, "Dropping malformed task tag");
                None
            }
        })
        .collect()
}

/// First value of the first tag with the given name.
///
/// Duplicate tags of non-repeatable kinds are tolerated by first occurrence
/// in order of arrival; no merging is attempted.
pub fn single_tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.name() == Some(name))
        .and_then(Tag::value)
}

/// Build the full tag list of a plant pot record.
///
/// Tag order on the wire: `d`, `name` (if any), `p`, `weather_station`
/// (if any), `client`, then one `task` tag per queued command.
pub fn pot_tags(
    identifier: &str,
    owner: &PublicId,
    name: Option<&str>,
    weather_station: Option<&PublicId>,
    tasks: &[WaterTask],
) -> Vec<Tag> {
    let mut tags = Vec::with_capacity(4 + tasks.len());
    tags.push(Tag::new("d", &[identifier]));
    if let Some(name) = name {
        tags.push(Tag::new("name", &[name]));
    }
    tags.push(Tag::new("p", &[owner.as_str()]));
    if let Some(station) = weather_station {
        tags.push(Tag::new("weather_station", &[station.as_str()]));
    }
    tags.push(Tag::new("client", &[CLIENT_TAG]));
    tags.extend(encode_tasks(tasks));
    tags
}
