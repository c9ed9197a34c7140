//! In-memory relay: a local record log implementing [`RelayClient`].
//!
//! Backs tests and the CLI's file-based log. Query semantics mirror a real
//! relay: multi-filter union, newest-first ordering, per-filter limits.
//! Publish rejects records whose signature does not verify; the relay may
//! be untrusted but this one at least refuses to grow garbage.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{PotSyncError, PotSyncResult};
use crate::record::{Filter, Record};
use crate::relay::RelayClient;
use crate::signer::verify_record;

/// Capacity of each subscription push channel.
const PUSH_CHANNEL_CAPACITY: usize = 256;

struct Subscriber {
    filters: Vec<Filter>,
    tx: mpsc::Sender<Record>,
    cancel: CancellationToken,
}

/// In-memory record log.
///
/// Cheap to clone via [`Arc`]; all state is interior.
#[derive(Default)]
pub struct MemoryRelay {
    records: RwLock<Vec<Record>>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Injected response latency, for deadline tests.
    latency: Option<Duration>,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a relay that delays every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Preload records, skipping any whose signature does not verify.
    ///
    /// Returns the number of records accepted.
    pub fn seed(&self, records: Vec<Record>) -> usize {
        let mut store = self.records.write();
        let mut accepted = 0;
        for record in records {
            if verify_record(&record) {
                store.push(record);
                accepted += 1;
            } else {
                debug!(id = %record.id, "Rejecting unverifiable seed record");
            }
        }
        accepted
    }

    /// Snapshot of every stored record, oldest first.
    pub fn snapshot(&self) -> Vec<Record> {
        self.records.read().clone()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    async fn simulate_latency(&self, cancel: &CancellationToken) -> PotSyncResult<()> {
        if cancel.is_cancelled() {
            return Err(PotSyncError::Cancelled);
        }
        if let Some(latency) = self.latency {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel.cancelled() => return Err(PotSyncError::Cancelled),
            }
        }
        Ok(())
    }

    fn run_query(&self, filters: &[Filter]) -> Vec<Record> {
        let store = self.records.read();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out: Vec<Record> = Vec::new();
        for filter in filters {
            let mut matches: Vec<&Record> =
                store.iter().filter(|r| filter.matches(r)).collect();
            // Newest first before applying the per-filter limit.
            matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
            if let Some(limit) = filter.limit {
                matches.truncate(limit);
            }
            for record in matches {
                if seen.insert(record.id.clone()) {
                    out.push(record.clone());
                }
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    fn fanout_targets(&self, record: &Record) -> Vec<mpsc::Sender<Record>> {
        let mut subs = self.subscribers.lock();
        subs.retain(|s| !s.cancel.is_cancelled() && !s.tx.is_closed());
        subs.iter()
            .filter(|s| s.filters.iter().any(|f| f.matches(record)))
            .map(|s| s.tx.clone())
            .collect()
    }
}

impl RelayClient for MemoryRelay {
    async fn query(
        &self,
        filters: Vec<Filter>,
        cancel: &CancellationToken,
    ) -> PotSyncResult<Vec<Record>> {
        self.simulate_latency(cancel).await?;
        Ok(self.run_query(&filters))
    }

    async fn publish(&self, record: Record, cancel: &CancellationToken) -> PotSyncResult<()> {
        self.simulate_latency(cancel).await?;
        if !verify_record(&record) {
            return Err(PotSyncError::Publish(format!(
                "record {} failed signature verification",
                record.id
            )));
        }

        self.records.write().push(record.clone());

        // Senders are collected under the lock, awaited outside it.
        let targets = self.fanout_targets(&record);
        for tx in targets {
            if tx.send(record.clone()).await.is_err() {
                debug!("Subscriber channel closed during fanout");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        filters: Vec<Filter>,
        cancel: CancellationToken,
    ) -> PotSyncResult<mpsc::Receiver<Record>> {
        if cancel.is_cancelled() {
            return Err(PotSyncError::Cancelled);
        }
        let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
        self.subscribers.lock().push(Subscriber {
            filters,
            tx,
            cancel,
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordDraft, Tag};
    use crate::signer::{LocalSigner, Signer};
    use crate::types::KIND_PLANT_POT;

    async fn signed_pot(signer: &LocalSigner, owner: &LocalSigner, d: &str, at: u64) -> Record {
        signer
            .sign(RecordDraft {
                kind: KIND_PLANT_POT,
                created_at: at,
                tags: vec![
                    Tag::new("d", &[d]),
                    Tag::new("p", &[owner.public_id().as_str()]),
                ],
                payload: "ciphertext".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_then_query() {
        let relay = MemoryRelay::new();
        let device = LocalSigner::generate();
        let owner = LocalSigner::generate();
        let cancel = CancellationToken::new();

        let record = signed_pot(&device, &owner, "basil", 100).await;
        relay.publish(record.clone(), &cancel).await.unwrap();

        let found = relay
            .query(vec![Filter::kinds(&[KIND_PLANT_POT])], &cancel)
            .await
            .unwrap();
        assert_eq!(found, vec![record]);
    }

    #[tokio::test]
    async fn test_publish_rejects_forged_record() {
        let relay = MemoryRelay::new();
        let device = LocalSigner::generate();
        let owner = LocalSigner::generate();
        let cancel = CancellationToken::new();

        let mut record = signed_pot(&device, &owner, "basil", 100).await;
        record.payload = "tampered".to_string();

        let result = relay.publish(record, &cancel).await;
        assert!(matches!(result, Err(PotSyncError::Publish(_))));
        assert!(relay.is_empty());
    }

    #[tokio::test]
    async fn test_query_newest_first_with_limit() {
        let relay = MemoryRelay::new();
        let device = LocalSigner::generate();
        let owner = LocalSigner::generate();
        let cancel = CancellationToken::new();

        for (d, at) in [("a", 100), ("b", 300), ("c", 200)] {
            relay
                .publish(signed_pot(&device, &owner, d, at).await, &cancel)
                .await
                .unwrap();
        }

        let found = relay
            .query(vec![Filter::kinds(&[KIND_PLANT_POT]).limit(2)], &cancel)
            .await
            .unwrap();
        let stamps: Vec<u64> = found.iter().map(|r| r.created_at).collect();
        assert_eq!(stamps, vec![300, 200]);
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_publishes() {
        let relay = MemoryRelay::new();
        let device = LocalSigner::generate();
        let owner = LocalSigner::generate();
        let other_owner = LocalSigner::generate();
        let cancel = CancellationToken::new();

        let mut rx = relay
            .subscribe(
                vec![Filter::kinds(&[KIND_PLANT_POT]).p_tag(&owner.public_id())],
                cancel.child_token(),
            )
            .await
            .unwrap();

        let mine = signed_pot(&device, &owner, "basil", 100).await;
        let theirs = signed_pot(&device, &other_owner, "cactus", 101).await;
        relay.publish(theirs, &cancel).await.unwrap();
        relay.publish(mine.clone(), &cancel).await.unwrap();

        let pushed = rx.recv().await.unwrap();
        assert_eq!(pushed, mine);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_receiving() {
        let relay = MemoryRelay::new();
        let device = LocalSigner::generate();
        let owner = LocalSigner::generate();
        let cancel = CancellationToken::new();
        let sub_cancel = CancellationToken::new();

        let mut rx = relay
            .subscribe(vec![Filter::kinds(&[KIND_PLANT_POT])], sub_cancel.clone())
            .await
            .unwrap();

        sub_cancel.cancel();
        // Cancelling twice is a no-op, not an error.
        sub_cancel.cancel();

        relay
            .publish(signed_pot(&device, &owner, "basil", 100).await, &cancel)
            .await
            .unwrap();

        // The subscriber was pruned on publish; the channel closes with no
        // delivery.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_cancellable() {
        let relay = MemoryRelay::with_latency(Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let query = relay.query(vec![Filter::kinds(&[KIND_PLANT_POT])], &cancel);
        tokio::pin!(query);

        tokio::select! {
            biased;
            _ = &mut query => panic!("query resolved before cancel"),
            _ = async { cancel.cancel(); } => {}
        }
        assert!(matches!(query.await, Err(PotSyncError::Cancelled)));
    }
}
