//! Live subscriptions that keep the cache fresh as records arrive.
//!
//! One background task per watched record class. Each pushed record is
//! re-validated, the affected cache keys are invalidated (forcing the next
//! read through to the relay), and a typed [`ChangeEvent`] is broadcast to
//! observers.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──start──▶ Connecting ──subscribed──▶ Subscribed ──cancel/EOF──▶ Closed
//! ```
//!
//! `Closed` is terminal: no automatic reconnect, callers own the retry
//! policy. Cancellation is token-based, safe to invoke repeatedly and from
//! any task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Cache, CacheKey};
use crate::error::PotSyncResult;
use crate::record::{Coordinate, Filter, PublicId, Record};
use crate::relay::RelayClient;
use crate::types::{KIND_PLANT_LOG, KIND_PLANT_POT};
use crate::validate;

/// Capacity of the change event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Record classes a subscription can watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Pot records owned by the session identity.
    Pots,
    /// Log records referencing the session identity's pots.
    Logs,
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchKind::Pots => write!(f, "pots"),
            WatchKind::Logs => write!(f, "logs"),
        }
    }
}

/// State of one watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatchState {
    /// Not watching.
    #[default]
    Idle,
    /// Establishing the relay subscription.
    Connecting,
    /// Receiving pushes.
    Subscribed,
    /// Cancelled or the relay closed the stream; terminal.
    Closed,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchState::Idle => write!(f, "Idle"),
            WatchState::Connecting => write!(f, "Connecting"),
            WatchState::Subscribed => write!(f, "Subscribed"),
            WatchState::Closed => write!(f, "Closed"),
        }
    }
}

/// Notifications emitted as pushed records update the cache.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// The owner's pot list changed (some pot was created, rewritten or
    /// superseded).
    PotListChanged {
        /// Owner whose list is stale.
        owner: PublicId,
    },
    /// One pot changed.
    PotChanged {
        /// Owner of the pot.
        owner: PublicId,
        /// The pot identifier.
        identifier: String,
    },
    /// A completion log arrived for one pot.
    LogAppended {
        /// Owner of the pot.
        owner: PublicId,
        /// The pot identifier parsed from the log address.
        identifier: String,
    },
    /// A watch transitioned state.
    WatchStateChanged {
        /// Which watch.
        kind: WatchKind,
        /// The new state.
        state: WatchState,
    },
    /// A watch failed to establish or lost its stream.
    WatchFailed {
        /// Which watch.
        kind: WatchKind,
        /// Failure description.
        message: String,
    },
}

struct WatchEntry {
    task_handle: JoinHandle<()>,
    cancel: CancellationToken,
    state: WatchState,
}

/// Maintains long-lived live queries and routes pushes into the cache.
pub struct SubscriptionManager<R> {
    relay: Arc<R>,
    cache: Arc<Cache>,
    owner: PublicId,
    watches: Arc<RwLock<HashMap<WatchKind, WatchEntry>>>,
    event_tx: broadcast::Sender<ChangeEvent>,
}

impl<R: RelayClient> SubscriptionManager<R> {
    /// Create a manager for one owner session.
    pub fn new(relay: Arc<R>, cache: Arc<Cache>, owner: PublicId) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            relay,
            cache,
            owner,
            watches: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    /// Subscribe to change events.
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Current state of a watch; `Idle` if it was never started.
    pub async fn state(&self, kind: WatchKind) -> WatchState {
        let watches = self.watches.read().await;
        watches.get(&kind).map(|w| w.state).unwrap_or_default()
    }

    /// Whether a watch is registered (in any non-idle state).
    pub async fn is_watching(&self, kind: WatchKind) -> bool {
        self.watches.read().await.contains_key(&kind)
    }

    /// Start watching a record class.
    ///
    /// Returns `false` if the watch already exists. The subscription runs
    /// until [`stop`](Self::stop) or until the relay closes the stream.
    pub async fn start(&self, kind: WatchKind) -> PotSyncResult<bool> {
        // The lock is held across the spawn so the task's first state
        // update cannot run before its entry exists.
        let mut watches = self.watches.write().await;
        if watches.contains_key(&kind) {
            debug!(%kind, "Watch already running");
            return Ok(false);
        }

        info!(%kind, owner = %self.owner, "Starting watch");

        let cancel = CancellationToken::new();
        let filters = self.filters_for(kind);
        let relay = self.relay.clone();
        let cache = self.cache.clone();
        let watches_ref = self.watches.clone();
        let event_tx = self.event_tx.clone();
        let task_cancel = cancel.clone();

        let task_handle = tokio::spawn(async move {
            Self::watch_task(kind, filters, relay, cache, watches_ref, event_tx, task_cancel)
                .await;
        });

        watches.insert(
            kind,
            WatchEntry {
                task_handle,
                cancel,
                state: WatchState::Connecting,
            },
        );
        drop(watches);

        let _ = self.event_tx.send(ChangeEvent::WatchStateChanged {
            kind,
            state: WatchState::Connecting,
        });

        Ok(true)
    }

    /// Stop a watch.
    ///
    /// Idempotent: stopping an unknown or already closed watch returns
    /// `false`. Cancelling stops delivery and releases the relay
    /// subscription; the token may be cancelled again freely.
    pub async fn stop(&self, kind: WatchKind) -> bool {
        let entry = {
            let mut watches = self.watches.write().await;
            watches.remove(&kind)
        };

        if let Some(entry) = entry {
            info!(%kind, "Stopping watch");
            entry.cancel.cancel();
            let _ = self.event_tx.send(ChangeEvent::WatchStateChanged {
                kind,
                state: WatchState::Closed,
            });
            true
        } else {
            debug!(%kind, "Watch not running");
            false
        }
    }

    /// Cancel every watch.
    pub async fn shutdown(&self) {
        let mut watches = self.watches.write().await;
        for (kind, entry) in watches.drain() {
            debug!(%kind, "Cancelling watch");
            entry.cancel.cancel();
            entry.task_handle.abort();
        }
    }

    fn filters_for(&self, kind: WatchKind) -> Vec<Filter> {
        match kind {
            WatchKind::Pots => vec![Filter::kinds(&[KIND_PLANT_POT]).p_tag(&self.owner)],
            // Prefix address match: every log referencing one of the
            // owner's pots, regardless of identifier.
            WatchKind::Logs => {
                let prefix = format!("{}:{}:", KIND_PLANT_POT, self.owner);
                vec![Filter::kinds(&[KIND_PLANT_LOG]).a_tag(&prefix)]
            }
        }
    }

    async fn update_state(
        watches: &Arc<RwLock<HashMap<WatchKind, WatchEntry>>>,
        kind: WatchKind,
        state: WatchState,
        event_tx: &broadcast::Sender<ChangeEvent>,
    ) {
        let mut watches = watches.write().await;
        if let Some(entry) = watches.get_mut(&kind) {
            if entry.state != state {
                entry.state = state;
                let _ = event_tx.send(ChangeEvent::WatchStateChanged { kind, state });
            }
        }
    }

    async fn watch_task(
        kind: WatchKind,
        filters: Vec<Filter>,
        relay: Arc<R>,
        cache: Arc<Cache>,
        watches: Arc<RwLock<HashMap<WatchKind, WatchEntry>>>,
        event_tx: broadcast::Sender<ChangeEvent>,
        cancel: CancellationToken,
    ) {
        debug!(%kind, "Watch task started");

        let mut rx = match relay.subscribe(filters, cancel.clone()).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(%kind, error = %e, "Failed to establish subscription");
                let _ = event_tx.send(ChangeEvent::WatchFailed {
                    kind,
                    message: e.to_string(),
                });
                Self::update_state(&watches, kind, WatchState::Closed, &event_tx).await;
                return;
            }
        };

        Self::update_state(&watches, kind, WatchState::Subscribed, &event_tx).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(%kind, "Watch cancelled");
                    break;
                }
                pushed = rx.recv() => {
                    match pushed {
                        Some(record) => {
                            Self::handle_record(kind, &record, &cache, &event_tx);
                        }
                        None => {
                            warn!(%kind, "Relay closed the subscription stream");
                            let _ = event_tx.send(ChangeEvent::WatchFailed {
                                kind,
                                message: "subscription stream closed".to_string(),
                            });
                            break;
                        }
                    }
                }
            }
        }

        Self::update_state(&watches, kind, WatchState::Closed, &event_tx).await;
        debug!(%kind, "Watch task ended");
    }

    /// Route one pushed record: re-validate, invalidate the affected cache
    /// keys, broadcast the change.
    fn handle_record(
        kind: WatchKind,
        record: &Record,
        cache: &Cache,
        event_tx: &broadcast::Sender<ChangeEvent>,
    ) {
        match kind {
            WatchKind::Pots => {
                if !validate::plant_pot(record) {
                    debug!(id = %record.id, "Dropping invalid pushed pot record");
                    return;
                }
                let Some(owner) = record
                    .tag_value("p")
                    .and_then(|p| PublicId::parse(p).ok())
                else {
                    return;
                };
                let Some(identifier) = record.identifier().map(String::from) else {
                    return;
                };
                cache.invalidate_pot_views(&owner, &identifier);
                let _ = event_tx.send(ChangeEvent::PotListChanged {
                    owner: owner.clone(),
                });
                let _ = event_tx.send(ChangeEvent::PotChanged { owner, identifier });
            }
            WatchKind::Logs => {
                if !validate::log_entry(record) {
                    debug!(id = %record.id, "Dropping invalid pushed log record");
                    return;
                }
                let Some(coord) = record
                    .tag_value("a")
                    .and_then(|a| Coordinate::parse(a).ok())
                else {
                    debug!(id = %record.id, "Pushed log has unparseable address");
                    return;
                };
                cache.invalidate(&CacheKey::Logs(
                    coord.identity.clone(),
                    coord.identifier.clone(),
                ));
                let _ = event_tx.send(ChangeEvent::LogAppended {
                    owner: coord.identity,
                    identifier: coord.identifier,
                });
            }
        }
    }
}

impl<R> Drop for SubscriptionManager<R> {
    fn drop(&mut self) {
        // Watch tasks select on their tokens; cancelling here releases the
        // relay subscriptions even when the caller forgets shutdown().
        if let Ok(watches) = self.watches.try_read() {
            for entry in watches.values() {
                entry.cancel.cancel();
            }
        }
    }
}
