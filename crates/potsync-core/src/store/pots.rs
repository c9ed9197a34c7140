//! Plant pot store: reconciled reads and device-signed writes.
//!
//! A pot record is authored by its device identity; the owner is carried in
//! the `p` tag. Every mutation is a full read-modify-republish of the
//! record at its coordinate: there is no delta update at the wire level.
//! The device signer is recovered on demand by decrypting the secret stored
//! in the pot payload with the owner capability.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{PotSyncError, PotSyncResult};
use crate::record::{Filter, PublicId, Record, RecordDraft, Tag};
use crate::reconcile;
use crate::relay::RelayClient;
use crate::secret;
use crate::signer::{LocalSigner, Signer};
use crate::store::{bounded_query, now_ts};
use crate::tags;
use crate::types::{PlantPot, WaterTask, KIND_DELETION, KIND_PLANT_POT};
use crate::validate;

/// Read/write access to plant pots owned by one identity.
pub struct PotStore<R, S> {
    relay: Arc<R>,
    /// Owner capability: signs deletions, holds the secret box.
    signer: Arc<S>,
}

impl<R: RelayClient, S: Signer> PotStore<R, S> {
    /// Create a store over a relay and the owner's signer.
    pub fn new(relay: Arc<R>, signer: Arc<S>) -> Self {
        Self { relay, signer }
    }

    /// Owner identity this store is scoped to.
    pub fn owner(&self) -> PublicId {
        self.signer.public_id()
    }

    /// All current pots of the owner, newest first.
    ///
    /// Fetches the pot records and the owner's tombstones in one round
    /// trip, validates, reconciles, and projects the winners.
    pub async fn list(&self, cancel: &CancellationToken) -> PotSyncResult<Vec<PlantPot>> {
        let owner = self.owner();
        let filters = vec![
            Filter::kinds(&[KIND_PLANT_POT]).p_tag(&owner),
            Filter::kinds(&[KIND_DELETION]).authors(&[&owner]),
        ];
        let records = bounded_query(self.relay.as_ref(), filters, cancel).await?;
        Ok(Self::reconcile_pots(records))
    }

    /// The current pot with the given identifier, if it exists.
    pub async fn get(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Option<PlantPot>> {
        let owner = self.owner();
        let filters = vec![
            Filter::kinds(&[KIND_PLANT_POT]).p_tag(&owner).d_tag(identifier),
            Filter::kinds(&[KIND_DELETION]).authors(&[&owner]),
        ];
        let records = bounded_query(self.relay.as_ref(), filters, cancel).await?;
        Ok(Self::reconcile_pots(records)
            .into_iter()
            .find(|pot| pot.identifier == identifier))
    }

    /// Create a pot: generate a device keypair, escrow its secret to the
    /// owner, and publish the device-signed record.
    pub async fn create(
        &self,
        identifier: &str,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let owner = self.owner();
        let device = LocalSigner::generate();
        let encrypted = self.signer.encrypt(&owner, &device.secret_hex()).await?;

        let draft = RecordDraft {
            kind: KIND_PLANT_POT,
            created_at: now_ts(),
            tags: tags::pot_tags(identifier, &owner, name, None, &[]),
            payload: encrypted,
        };
        let record = device.sign(draft).await?;
        self.relay.publish(record.clone(), cancel).await?;

        info!(identifier, device = %device.public_id(), "Created plant pot");
        project_pot(record)
    }

    /// Append a task to the pot's queue.
    pub async fn add_task(
        &self,
        identifier: &str,
        task: WaterTask,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.require(identifier, cancel).await?;
        let mut tasks = pot.tasks.clone();
        tasks.push(task);
        self.republish(&pot, pot.name.as_deref(), pot.weather_station.as_ref(), &tasks, cancel)
            .await
    }

    /// Remove the task at `index` from the pot's queue.
    ///
    /// The full record is rewritten with every task tag except the removed
    /// one; order of the remaining tasks is preserved.
    pub async fn remove_task(
        &self,
        identifier: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.require(identifier, cancel).await?;
        if index >= pot.tasks.len() {
            return Err(PotSyncError::NotFound(format!(
                "task {} of pot {:?} (queue holds {})",
                index,
                identifier,
                pot.tasks.len()
            )));
        }
        let mut tasks = pot.tasks.clone();
        tasks.remove(index);
        self.republish(&pot, pot.name.as_deref(), pot.weather_station.as_ref(), &tasks, cancel)
            .await
    }

    /// Set or clear the pot's display name.
    pub async fn set_name(
        &self,
        identifier: &str,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.require(identifier, cancel).await?;
        self.republish(&pot, name, pot.weather_station.as_ref(), &pot.tasks, cancel)
            .await
    }

    /// Assign or clear the pot's weather station reference.
    pub async fn set_weather_station(
        &self,
        identifier: &str,
        station: Option<&PublicId>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.require(identifier, cancel).await?;
        self.republish(&pot, pot.name.as_deref(), station, &pot.tasks, cancel)
            .await
    }

    /// Tombstone a pot: publish an owner-signed deletion referencing the
    /// record id and both coordinate variants.
    pub async fn delete(&self, identifier: &str, cancel: &CancellationToken) -> PotSyncResult<()> {
        let pot = self.require(identifier, cancel).await?;
        let draft = RecordDraft {
            kind: KIND_DELETION,
            created_at: now_ts(),
            tags: vec![
                Tag::new("e", &[&pot.record.id]),
                Tag::new("a", &[&pot.device_coordinate().to_string()]),
                Tag::new("a", &[&pot.owner_coordinate().to_string()]),
            ],
            payload: String::new(),
        };
        let record = self.signer.sign(draft).await?;
        self.relay.publish(record, cancel).await?;
        info!(identifier, "Deleted plant pot");
        Ok(())
    }

    /// Recover the device signer from the pot's encrypted secret.
    pub async fn device_signer(&self, pot: &PlantPot) -> PotSyncResult<LocalSigner> {
        let secret_hex = secret::decrypt_device_secret(self.signer.as_ref(), pot).await?;
        LocalSigner::from_secret_hex(&secret_hex)
    }

    /// Decrypted device secret of a pot, canonical lowercase hex.
    pub async fn device_secret(&self, pot: &PlantPot) -> PotSyncResult<String> {
        secret::decrypt_device_secret(self.signer.as_ref(), pot).await
    }

    async fn require(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        self.get(identifier, cancel)
            .await?
            .ok_or_else(|| PotSyncError::NotFound(format!("plant pot {:?}", identifier)))
    }

    /// Rewrite a pot record with the given attributes and republish it at
    /// the same coordinate, signed by the recovered device identity.
    async fn republish(
        &self,
        pot: &PlantPot,
        name: Option<&str>,
        station: Option<&PublicId>,
        tasks: &[WaterTask],
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let device = self.device_signer(pot).await?;
        // A rewrite within the same second must still supersede the record
        // it replaces; the reconciler tie-break would otherwise be free to
        // keep the old version.
        let created_at = now_ts().max(pot.record.created_at + 1);
        let draft = RecordDraft {
            kind: KIND_PLANT_POT,
            created_at,
            tags: tags::pot_tags(&pot.identifier, &pot.owner, name, station, tasks),
            // The escrowed secret travels unchanged across rewrites.
            payload: pot.record.payload.clone(),
        };
        let record = device.sign(draft).await?;
        self.relay.publish(record.clone(), cancel).await?;
        debug!(identifier = %pot.identifier, tasks = tasks.len(), "Republished plant pot");
        project_pot(record)
    }

    fn reconcile_pots(records: Vec<Record>) -> Vec<PlantPot> {
        let (deletions, candidates): (Vec<Record>, Vec<Record>) = records
            .into_iter()
            .partition(|r| r.kind == KIND_DELETION);
        let valid: Vec<Record> = candidates
            .into_iter()
            .filter(|r| {
                let ok = validate::plant_pot(r);
                if !ok {
                    debug!(id = %r.id, "Dropping invalid pot record");
                }
                ok
            })
            .collect();
        reconcile::reconcile(valid, &deletions)
            .into_iter()
            .filter_map(|record| {
                let id = record.id.clone();
                let pot = PlantPot::from_record(record);
                if pot.is_none() {
                    debug!(%id, "Dropping unprojectable pot record");
                }
                pot
            })
            .collect()
    }
}

/// Project a freshly composed record into its typed view.
fn project_pot(record: Record) -> PotSyncResult<PlantPot> {
    PlantPot::from_record(record)
        .ok_or_else(|| PotSyncError::Format("composed pot record lost identifying tags".into()))
}
