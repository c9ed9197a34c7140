//! Relay client seam.
//!
//! The network transport to the record log is an external collaborator: the
//! engine only needs a bounded query, a publish, and a push subscription.
//! Every suspending call threads a [`CancellationToken`] so callers can
//! compose deadlines and external cancel sources into a single parameter;
//! cancelling is safe from any task and any number of times.

pub mod memory;

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::PotSyncResult;
use crate::record::{Filter, Record};

pub use memory::MemoryRelay;

/// Bidirectional query/subscribe channel to one relay.
///
/// Implementations own reconnection and transport details; the engine owns
/// nothing network-shaped beyond this trait. No ordering is guaranteed
/// between independent calls; the reconciler's recency rule is the only
/// ordering mechanism.
pub trait RelayClient: Send + Sync + 'static {
    /// Fetch all records matching any of the filters (one-shot).
    ///
    /// The caller bounds this with a deadline; the relay itself does not
    /// retry or time out internally.
    fn query(
        &self,
        filters: Vec<Filter>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = PotSyncResult<Vec<Record>>> + Send;

    /// Publish a signed record to the relay.
    fn publish(
        &self,
        record: Record,
        cancel: &CancellationToken,
    ) -> impl Future<Output = PotSyncResult<()>> + Send;

    /// Open a live subscription; matching records are pushed into the
    /// returned channel as they arrive.
    ///
    /// The subscription lives until the token is cancelled or the receiver
    /// is dropped, whichever comes first. No automatic reconnect: when the
    /// channel closes, the caller owns the retry policy.
    fn subscribe(
        &self,
        filters: Vec<Filter>,
        cancel: CancellationToken,
    ) -> impl Future<Output = PotSyncResult<mpsc::Receiver<Record>>> + Send;
}
