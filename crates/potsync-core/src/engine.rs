//! Main PotEngine - the primary entry point for Potsync
//!
//! PotEngine composes the relay seam, the owner's signing capability, the
//! per-session cache and the entity stores into one read-through facade:
//!
//! - Reads check the cache first and fall through to a bounded relay query;
//!   a successful result is stored, a failure leaves the cache untouched.
//! - Writes publish first and invalidate the affected cache keys only after
//!   the relay confirms, so there is never optimistic state to roll back.
//! - Watches run alongside, invalidating the same keys as pushes arrive.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use potsync_core::{LocalSigner, MemoryRelay, PotEngine, WaterTask};
//! use tokio_util::sync::CancellationToken;
//!
//! let relay = Arc::new(MemoryRelay::new());
//! let owner = Arc::new(LocalSigner::generate());
//! let engine = PotEngine::new(relay, owner);
//! let cancel = CancellationToken::new();
//!
//! engine.create_pot("tomato-1", Some("Balcony Tomato"), &cancel).await?;
//! engine.add_task("tomato-1", WaterTask::water(30), &cancel).await?;
//! for pot in engine.list_pots(&cancel).await? {
//!     println!("{}: {} tasks queued", pot.identifier, pot.tasks.len());
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::{Cache, CacheKey, Snapshot};
use crate::error::{PotSyncError, PotSyncResult};
use crate::record::PublicId;
use crate::relay::RelayClient;
use crate::secret::SecretExport;
use crate::signer::Signer;
use crate::store::{LogStore, PotStore, WeatherStore};
use crate::subscription::{ChangeEvent, SubscriptionManager, WatchKind, WatchState};
use crate::types::{PlantLog, PlantPot, WaterTask, WeatherReading, WeatherStation};

/// Session facade over one relay and one owner identity.
pub struct PotEngine<R, S> {
    cache: Arc<Cache>,
    pots: PotStore<R, S>,
    logs: LogStore<R>,
    weather: WeatherStore<R>,
    subscriptions: SubscriptionManager<R>,
}

impl<R: RelayClient, S: Signer> PotEngine<R, S> {
    /// Create an engine for the given relay and owner signer.
    ///
    /// The cache is created here, scoped to this session; it is never a
    /// global.
    pub fn new(relay: Arc<R>, signer: Arc<S>) -> Self {
        let owner = signer.public_id();
        info!(%owner, "Initializing PotEngine");

        let cache = Arc::new(Cache::new());
        let pots = PotStore::new(relay.clone(), signer);
        let logs = LogStore::new(relay.clone(), owner.clone());
        let weather = WeatherStore::new(relay.clone());
        let subscriptions = SubscriptionManager::new(relay, cache.clone(), owner);

        Self {
            cache,
            pots,
            logs,
            weather,
            subscriptions,
        }
    }

    /// Owner identity of this session.
    pub fn owner(&self) -> PublicId {
        self.pots.owner()
    }

    /// The session cache.
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    // ═══════════════════════════════════════════════════════════════════
    // Reads (cache read-through)
    // ═══════════════════════════════════════════════════════════════════

    /// All current pots of the owner, newest first.
    pub async fn list_pots(&self, cancel: &CancellationToken) -> PotSyncResult<Vec<PlantPot>> {
        let key = CacheKey::Pots(self.owner());
        if let Some(snapshot) = self.cache.get(&key) {
            if let Snapshot::Pots(pots) = &*snapshot {
                return Ok(pots.clone());
            }
        }
        let pots = self.pots.list(cancel).await?;
        self.cache.put(key, Snapshot::Pots(pots.clone()));
        Ok(pots)
    }

    /// The current pot with the given identifier, if any.
    pub async fn get_pot(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Option<PlantPot>> {
        let key = CacheKey::Pot(self.owner(), identifier.to_string());
        if let Some(snapshot) = self.cache.get(&key) {
            if let Snapshot::Pot(pot) = &*snapshot {
                return Ok(pot.clone());
            }
        }
        let pot = self.pots.get(identifier, cancel).await?;
        self.cache.put(key, Snapshot::Pot(pot.clone()));
        Ok(pot)
    }

    /// Completion logs of one pot, newest first.
    pub async fn list_logs(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Vec<PlantLog>> {
        let key = CacheKey::Logs(self.owner(), identifier.to_string());
        if let Some(snapshot) = self.cache.get(&key) {
            if let Snapshot::Logs(logs) = &*snapshot {
                return Ok(logs.clone());
            }
        }
        let logs = self.logs.list(identifier, cancel).await?;
        self.cache.put(key, Snapshot::Logs(logs.clone()));
        Ok(logs)
    }

    /// Known weather stations, newest first.
    pub async fn weather_stations(
        &self,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Vec<WeatherStation>> {
        if let Some(snapshot) = self.cache.get(&CacheKey::Stations) {
            if let Snapshot::Stations(stations) = &*snapshot {
                return Ok(stations.clone());
            }
        }
        let stations = self.weather.stations(cancel).await?;
        self.cache
            .put(CacheKey::Stations, Snapshot::Stations(stations.clone()));
        Ok(stations)
    }

    /// Latest reading from one station, if any.
    pub async fn latest_reading(
        &self,
        station: &PublicId,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Option<WeatherReading>> {
        let key = CacheKey::Reading(station.clone());
        if let Some(snapshot) = self.cache.get(&key) {
            if let Snapshot::Reading(reading) = &*snapshot {
                return Ok(reading.clone());
            }
        }
        let reading = self.weather.latest_reading(station, cancel).await?;
        self.cache.put(key, Snapshot::Reading(reading.clone()));
        Ok(reading)
    }

    /// Decrypted device secret of a pot, in both export forms.
    pub async fn device_secret(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<SecretExport> {
        let pot = self.require_pot(identifier, cancel).await?;
        let hex = self.pots.device_secret(&pot).await?;
        SecretExport::from_hex(&hex)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Writes (publish, then invalidate)
    // ═══════════════════════════════════════════════════════════════════

    /// Create a pot with a fresh device keypair.
    pub async fn create_pot(
        &self,
        identifier: &str,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.pots.create(identifier, name, cancel).await?;
        self.cache.invalidate_pot_views(&self.owner(), identifier);
        Ok(pot)
    }

    /// Append a task to a pot's queue.
    pub async fn add_task(
        &self,
        identifier: &str,
        task: WaterTask,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.pots.add_task(identifier, task, cancel).await?;
        self.cache.invalidate_pot_views(&self.owner(), identifier);
        Ok(pot)
    }

    /// Remove the task at `index` from a pot's queue.
    pub async fn remove_task(
        &self,
        identifier: &str,
        index: usize,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.pots.remove_task(identifier, index, cancel).await?;
        self.cache.invalidate_pot_views(&self.owner(), identifier);
        Ok(pot)
    }

    /// Set or clear a pot's display name.
    pub async fn set_name(
        &self,
        identifier: &str,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self.pots.set_name(identifier, name, cancel).await?;
        self.cache.invalidate_pot_views(&self.owner(), identifier);
        Ok(pot)
    }

    /// Assign or clear a pot's weather station.
    pub async fn set_weather_station(
        &self,
        identifier: &str,
        station: Option<&PublicId>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        let pot = self
            .pots
            .set_weather_station(identifier, station, cancel)
            .await?;
        self.cache.invalidate_pot_views(&self.owner(), identifier);
        Ok(pot)
    }

    /// Tombstone a pot.
    pub async fn delete_pot(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<()> {
        self.pots.delete(identifier, cancel).await?;
        self.cache.invalidate_pot_views(&self.owner(), identifier);
        Ok(())
    }

    /// Complete the front task of a pot's queue, as the device would:
    /// publish the completion log, then republish the pot without the task.
    pub async fn complete_task(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<(PlantLog, PlantPot)> {
        let pot = self.require_pot(identifier, cancel).await?;
        let task = pot.tasks.first().cloned().ok_or_else(|| {
            PotSyncError::NotFound(format!("pot {:?} has no queued tasks", identifier))
        })?;

        let device = self.pots.device_signer(&pot).await?;
        let log = self
            .logs
            .log_completion(&pot, &task, &device, cancel)
            .await?;
        let updated = self.pots.remove_task(identifier, 0, cancel).await?;

        let owner = self.owner();
        self.cache.invalidate_pot_views(&owner, identifier);
        self.cache
            .invalidate(&CacheKey::Logs(owner, identifier.to_string()));
        Ok((log, updated))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Live subscriptions
    // ═══════════════════════════════════════════════════════════════════

    /// Start watching a record class; `false` if already watching.
    pub async fn start_watch(&self, kind: WatchKind) -> PotSyncResult<bool> {
        self.subscriptions.start(kind).await
    }

    /// Stop a watch; `false` if it was not running.
    pub async fn stop_watch(&self, kind: WatchKind) -> bool {
        self.subscriptions.stop(kind).await
    }

    /// Current state of a watch.
    pub async fn watch_state(&self, kind: WatchKind) -> WatchState {
        self.subscriptions.state(kind).await
    }

    /// Subscribe to change events emitted by watches.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.subscriptions.subscribe_events()
    }

    /// Cancel all watches.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
    }

    async fn require_pot(
        &self,
        identifier: &str,
        cancel: &CancellationToken,
    ) -> PotSyncResult<PlantPot> {
        self.get_pot(identifier, cancel)
            .await?
            .ok_or_else(|| PotSyncError::NotFound(format!("plant pot {:?}", identifier)))
    }
}
