//! Potsync Core Library
//!
//! Client-side sync engine for plant-pot watering queues stored in a
//! remote, append-only, signed record log.
//!
//! ## Overview
//!
//! The authoritative state of every plant pot lives on one or more
//! untrusted relays as immutable signed records. Two identities write to
//! it: the human owner and the pot's IoT device. Potsync reconciles
//! whatever a relay returns into a single current value per pot
//! (latest-write-wins at each coordinate, tombstones honored), keeps a
//! session cache fresh through live subscriptions, and speaks the log's
//! tag-based wire format, including the device secret escrowed in each pot
//! payload.
//!
//! ## Core Principles
//!
//! - **Derived state**: a pot's current value is computed from the record
//!   set, never stored; reconciliation is deterministic and idempotent.
//! - **Typed failures**: every operation succeeds with a fully-formed value
//!   or fails with one [`PotSyncError`] kind; malformed relay records are
//!   absorbed silently.
//! - **Explicit lifecycles**: the cache is a per-session dependency, every
//!   suspending call threads a cancellation token, and subscriptions never
//!   reconnect behind the caller's back.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use potsync_core::{LocalSigner, MemoryRelay, PotEngine, WaterTask};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = Arc::new(MemoryRelay::new());
//!     let owner = Arc::new(LocalSigner::generate());
//!     let engine = PotEngine::new(relay, owner);
//!     let cancel = CancellationToken::new();
//!
//!     engine.create_pot("tomato-1", Some("Balcony Tomato"), &cancel).await?;
//!     engine.add_task("tomato-1", WaterTask::water(30), &cancel).await?;
//!
//!     for pot in engine.list_pots(&cancel).await? {
//!         println!("{}: {} tasks queued", pot.identifier, pot.tasks.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod relay;
pub mod secret;
pub mod signer;
pub mod store;
pub mod subscription;
pub mod tags;
pub mod types;
pub mod validate;

// Re-exports
pub use cache::{Cache, CacheKey, Snapshot};
pub use engine::PotEngine;
pub use error::{PotSyncError, PotSyncResult};
pub use reconcile::{reconcile, Tombstones};
pub use record::{Coordinate, Filter, PublicId, Record, RecordDraft, Tag};
pub use relay::{MemoryRelay, RelayClient};
pub use secret::SecretExport;
pub use signer::{verify_record, LocalSigner, Signer};
pub use store::{LogStore, PotStore, WeatherStore, QUERY_TIMEOUT};
pub use subscription::{ChangeEvent, SubscriptionManager, WatchKind, WatchState};
pub use types::*;
