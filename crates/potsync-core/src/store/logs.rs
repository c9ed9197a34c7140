//! Watering log store: append-only completion records.
//!
//! Log entries reference their pot through the owner-identity address
//! `30000:<owner>:<identifier>` and are never updated or superseded; the
//! set only grows. Reads are a recency sort, not a reconciliation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{PotSyncError, PotSyncResult};
use crate::record::{Coordinate, Filter, PublicId, RecordDraft, Tag};
use crate::relay::RelayClient;
use crate::signer::{LocalSigner, Signer};
use crate::store::{bounded_query, now_ts};
use crate::tags;
use crate::types::{PlantLog, PlantPot, WaterTask, KIND_PLANT_LOG, KIND_PLANT_POT};
use crate::validate;

/// Read access to watering logs plus the device-side completion write.
pub struct LogStore<R> {
    relay: Arc<R>,
    /// Owner identity used to derive log addresses.
    owner: PublicId,
}

impl<R: RelayClient> LogStore<R> {
    /// Create a store over a relay, scoped to one owner.
    pub fn new(relay: Arc<R>, owner: PublicId) -> Self {
        Self { relay, owner }
    }

    /// Completion logs of one pot, newest first.
    pub async fn list(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Vec<PlantLog>> {
        let address = self.address(identifier);
        let filters = vec![Filter::kinds(&[KIND_PLANT_LOG]).a_tag(&address)];
        let records = bounded_query(self.relay.as_ref(), filters, cancel).await?;

        let mut logs: Vec<PlantLog> = records
            .into_iter()
            .filter(|r| {
                let ok = validate::log_entry(r);
                if !ok {
                    debug!(id = %r.id, "Dropping invalid log record");
                }
                ok
            })
            .filter_map(PlantLog::from_record)
            .collect();
        logs.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        Ok(logs)
    }

    /// Publish a device-signed completion record for one task.
    ///
    /// Called on behalf of the device after it finishes a command; the log
    /// carries the completed task tag so readers can render what ran.
    pub async fn log_completion(
        &self,
        pot: &PlantPot,
        task: &WaterTask,
        device: &LocalSigner,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantLog> {
        let address = self.address(&pot.identifier);
        let mut record_tags = vec![Tag::new("a", &[&address])];
        record_tags.extend(tags::encode_tasks(std::slice::from_ref(task)));

        let draft = RecordDraft {
            kind: KIND_PLANT_LOG,
            created_at: now_ts(),
            tags: record_tags,
            payload: String::new(),
        };
        let record = device.sign(draft).await?;
        self.relay.publish(record.clone(), cancel).await?;
        info!(identifier = %pot.identifier, task = %task.task_type, "Logged task completion");

        PlantLog::from_record(record)
            .ok_or_else(|| PotSyncError::Format("composed log record lost its address".into()))
    }

    /// Address string of a pot under this owner: the owner-identity
    /// coordinate in string form.
    pub fn address(&self, identifier: &str) -> String {
        Coordinate::new(KIND_PLANT_POT, self.owner.clone(), identifier).to_string()
    }
}
