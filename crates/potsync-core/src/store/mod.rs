//! Typed read and write paths per entity kind.
//!
//! Each store composes the relay seam with validation, the tag codec and
//! the reconciler. Reads are bounded by [`QUERY_TIMEOUT`]; writes sign
//! through the appropriate capability (owner for deletions, the recovered
//! device signer for pot mutations) and publish without optimistic cache
//! updates, so a failed publish leaves no state to roll back.

pub mod logs;
pub mod pots;
pub mod weather;

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{PotSyncError, PotSyncResult};
use crate::record::{Filter, Record};
use crate::relay::RelayClient;

pub use logs::LogStore;
pub use pots::PotStore;
pub use weather::WeatherStore;

/// Deadline applied to every one-shot relay query.
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(3000);

/// Run a relay query under the fixed deadline.
///
/// The deadline is independent of subscription lifetimes, which are
/// caller-controlled and unbounded. No internal retry: a timeout surfaces
/// as [`PotSyncError::Timeout`] and the caller decides.
pub(crate) async fn bounded_query<R: RelayClient>(
    relay: &R,
    filters: Vec<Filter>,
    cancel: &CancellationToken,
) -> PotSyncResult<Vec<Record>> {
    let started = Instant::now();
    match tokio::time::timeout(QUERY_TIMEOUT, relay.query(filters, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(PotSyncError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}

/// Current unix timestamp in seconds.
pub(crate) fn now_ts() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
