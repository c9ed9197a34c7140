//! End-to-end engine tests over the in-memory relay.
//!
//! Everything runs through the same path a network relay would see:
//! compose, sign, publish, query, validate, reconcile, cache.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use potsync_core::{
    CacheKey, ChangeEvent, LocalSigner, MemoryRelay, PlantPot, PotEngine, PotStore, PotSyncError,
    RecordDraft, RelayClient, Signer, Snapshot, Tag, WatchKind, WatchState, WaterTask,
    KIND_WEATHER_READING, KIND_WEATHER_STATION,
};

fn engine_over(relay: Arc<MemoryRelay>, signer: Arc<LocalSigner>) -> PotEngine<MemoryRelay, LocalSigner> {
    PotEngine::new(relay, signer)
}

fn fresh_engine() -> (Arc<MemoryRelay>, Arc<LocalSigner>, PotEngine<MemoryRelay, LocalSigner>) {
    let relay = Arc::new(MemoryRelay::new());
    let signer = Arc::new(LocalSigner::generate());
    let engine = engine_over(relay.clone(), signer.clone());
    (relay, signer, engine)
}

// ============================================================================
// Pot lifecycle
// ============================================================================

#[tokio::test]
async fn test_create_and_list_pots() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine
        .create_pot("tomato-1", Some("Balcony Tomato"), &cancel)
        .await
        .unwrap();
    engine.create_pot("basil", None, &cancel).await.unwrap();

    let pots = engine.list_pots(&cancel).await.unwrap();
    assert_eq!(pots.len(), 2);

    let tomato = engine.get_pot("tomato-1", &cancel).await.unwrap().unwrap();
    assert_eq!(tomato.name.as_deref(), Some("Balcony Tomato"));
    assert_eq!(tomato.owner, engine.owner());
    assert!(tomato.tasks.is_empty());
    // The record is authored by the device, not the owner.
    assert_ne!(*tomato.device(), engine.owner());
}

#[tokio::test]
async fn test_task_append_preserves_order() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("tomato-1", None, &cancel).await.unwrap();
    engine
        .add_task("tomato-1", WaterTask::water(30), &cancel)
        .await
        .unwrap();
    let pot = engine
        .add_task("tomato-1", WaterTask::water(5), &cancel)
        .await
        .unwrap();

    assert_eq!(pot.tasks, vec![WaterTask::water(30), WaterTask::water(5)]);

    // The rewritten record ends with the task tags in queue order.
    let task_tags: Vec<&Tag> = pot
        .record
        .tags
        .iter()
        .filter(|t| t.name() == Some("task"))
        .collect();
    assert_eq!(task_tags[0].0, vec!["task", "water", "30"]);
    assert_eq!(task_tags[1].0, vec!["task", "water", "5"]);
}

#[tokio::test]
async fn test_rewrite_supersedes_previous_version() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("basil", None, &cancel).await.unwrap();
    engine
        .add_task("basil", WaterTask::water(10), &cancel)
        .await
        .unwrap();

    // Both versions are in the log, but only the rewrite is current.
    let pots = engine.list_pots(&cancel).await.unwrap();
    assert_eq!(pots.len(), 1);
    assert_eq!(pots[0].tasks.len(), 1);
}

#[tokio::test]
async fn test_remove_task_rewrites_remaining_queue() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("tomato-1", None, &cancel).await.unwrap();
    for seconds in [30, 5, 8] {
        engine
            .add_task("tomato-1", WaterTask::water(seconds), &cancel)
            .await
            .unwrap();
    }

    let pot = engine.remove_task("tomato-1", 1, &cancel).await.unwrap();
    assert_eq!(pot.tasks, vec![WaterTask::water(30), WaterTask::water(8)]);

    let out_of_range = engine.remove_task("tomato-1", 9, &cancel).await;
    assert!(matches!(out_of_range, Err(PotSyncError::NotFound(_))));
}

#[tokio::test]
async fn test_rename_and_station_assignment_keep_tasks() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();
    let station = LocalSigner::generate().public_id();

    engine.create_pot("basil", None, &cancel).await.unwrap();
    engine
        .add_task("basil", WaterTask::water(30), &cancel)
        .await
        .unwrap();

    let renamed = engine
        .set_name("basil", Some("Kitchen Basil"), &cancel)
        .await
        .unwrap();
    assert_eq!(renamed.name.as_deref(), Some("Kitchen Basil"));
    assert_eq!(renamed.tasks.len(), 1);

    let assigned = engine
        .set_weather_station("basil", Some(&station), &cancel)
        .await
        .unwrap();
    assert_eq!(assigned.weather_station.as_ref(), Some(&station));
    assert_eq!(assigned.name.as_deref(), Some("Kitchen Basil"));
    assert_eq!(assigned.tasks.len(), 1);
}

#[tokio::test]
async fn test_delete_pot_removes_every_version() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("basil", None, &cancel).await.unwrap();
    engine
        .add_task("basil", WaterTask::water(30), &cancel)
        .await
        .unwrap();
    engine.delete_pot("basil", &cancel).await.unwrap();

    assert!(engine.list_pots(&cancel).await.unwrap().is_empty());
    assert!(engine.get_pot("basil", &cancel).await.unwrap().is_none());
}

// ============================================================================
// Device flow: secret recovery and task completion
// ============================================================================

#[tokio::test]
async fn test_device_secret_export_forms() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("tomato-1", None, &cancel).await.unwrap();
    let export = engine.device_secret("tomato-1", &cancel).await.unwrap();

    assert_eq!(export.hex.len(), 64);
    assert!(export.bech32.starts_with("nsec1"));

    // The recovered secret really is the device's signing key.
    let pot = engine.get_pot("tomato-1", &cancel).await.unwrap().unwrap();
    let device = LocalSigner::from_secret_hex(&export.hex).unwrap();
    assert_eq!(device.public_id(), *pot.device());
}

#[tokio::test]
async fn test_recovered_device_signer_matches_author() {
    let relay = Arc::new(MemoryRelay::new());
    let signer = Arc::new(LocalSigner::generate());
    let store = PotStore::new(relay.clone(), signer.clone());
    let cancel = CancellationToken::new();

    let pot = store.create("basil", None, &cancel).await.unwrap();
    let device = store.device_signer(&pot).await.unwrap();
    assert_eq!(device.public_id(), pot.record.identity);
}

#[tokio::test]
async fn test_complete_task_logs_and_pops_queue() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("tomato-1", None, &cancel).await.unwrap();
    engine
        .add_task("tomato-1", WaterTask::water(30), &cancel)
        .await
        .unwrap();
    engine
        .add_task("tomato-1", WaterTask::water(5), &cancel)
        .await
        .unwrap();

    let (log, pot) = engine.complete_task("tomato-1", &cancel).await.unwrap();
    assert_eq!(log.tasks, vec![WaterTask::water(30)]);
    assert_eq!(pot.tasks, vec![WaterTask::water(5)]);
    // The log is signed by the device identity.
    assert_eq!(log.record.identity, *pot.device());

    let logs = engine.list_logs("tomato-1", &cancel).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].pot_identifier().as_deref(), Some("tomato-1"));

    // Draining the queue: completing the last task works, then NotFound.
    let (last_log, drained) = engine.complete_task("tomato-1", &cancel).await.unwrap();
    assert_eq!(last_log.tasks, vec![WaterTask::water(5)]);
    assert!(drained.tasks.is_empty());
    assert!(matches!(
        engine.complete_task("tomato-1", &cancel).await,
        Err(PotSyncError::NotFound(_))
    ));
}

// ============================================================================
// Cache behavior
// ============================================================================

#[tokio::test]
async fn test_reads_are_served_from_cache() {
    // The relay would take a minute to answer; a warm cache answers anyway.
    let relay = Arc::new(MemoryRelay::with_latency(Duration::from_secs(60)));
    let signer = Arc::new(LocalSigner::generate());
    let engine = engine_over(relay, signer);
    let cancel = CancellationToken::new();

    engine
        .cache()
        .put(CacheKey::Pots(engine.owner()), Snapshot::Pots(vec![]));

    let pots = engine.list_pots(&cancel).await.unwrap();
    assert!(pots.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_query_timeout_leaves_cache_untouched() {
    let relay = Arc::new(MemoryRelay::with_latency(Duration::from_secs(60)));
    let signer = Arc::new(LocalSigner::generate());
    let engine = engine_over(relay, signer);
    let cancel = CancellationToken::new();

    let result = engine.list_pots(&cancel).await;
    assert!(matches!(result, Err(PotSyncError::Timeout { .. })));
    assert!(engine.cache().is_empty());
}

#[tokio::test]
async fn test_writes_invalidate_cached_views() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();

    engine.create_pot("basil", None, &cancel).await.unwrap();
    let before = engine.list_pots(&cancel).await.unwrap();
    assert_eq!(before[0].tasks.len(), 0);

    engine
        .add_task("basil", WaterTask::water(30), &cancel)
        .await
        .unwrap();

    // The list read after the write reflects the rewrite, not the snapshot.
    let after = engine.list_pots(&cancel).await.unwrap();
    assert_eq!(after[0].tasks.len(), 1);
}

// ============================================================================
// Live subscriptions
// ============================================================================

async fn wait_for_subscribed(
    rx: &mut tokio::sync::broadcast::Receiver<ChangeEvent>,
    kind: WatchKind,
) {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for watch state")
            .expect("event channel closed")
        {
            ChangeEvent::WatchStateChanged { kind: k, state }
                if k == kind && state == WatchState::Subscribed => break,
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_pot_push_invalidates_cache_and_notifies() {
    let relay = Arc::new(MemoryRelay::new());
    let signer = Arc::new(LocalSigner::generate());
    let watcher = engine_over(relay.clone(), signer.clone());
    let writer = engine_over(relay.clone(), signer.clone());
    let cancel = CancellationToken::new();

    // Warm the watcher's cache, then start the live query.
    watcher.list_pots(&cancel).await.unwrap();
    assert!(!watcher.cache().is_empty());

    let mut events = watcher.subscribe_changes();
    watcher.start_watch(WatchKind::Pots).await.unwrap();
    wait_for_subscribed(&mut events, WatchKind::Pots).await;

    writer.create_pot("pushed-pot", None, &cancel).await.unwrap();

    // The push lands as a pot-list invalidation plus a change event.
    let mut saw_list_change = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(ChangeEvent::PotListChanged { owner })) => {
                assert_eq!(owner, watcher.owner());
                saw_list_change = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_list_change, "no PotListChanged event arrived");

    assert!(watcher
        .cache()
        .get(&CacheKey::Pots(watcher.owner()))
        .is_none());

    // The forced re-read sees the pushed pot.
    let pots = watcher.list_pots(&cancel).await.unwrap();
    assert_eq!(pots.len(), 1);
    assert_eq!(pots[0].identifier, "pushed-pot");
}

#[tokio::test]
async fn test_log_push_invalidates_log_view() {
    let relay = Arc::new(MemoryRelay::new());
    let signer = Arc::new(LocalSigner::generate());
    let watcher = engine_over(relay.clone(), signer.clone());
    let writer = engine_over(relay.clone(), signer.clone());
    let cancel = CancellationToken::new();

    writer.create_pot("tomato-1", None, &cancel).await.unwrap();
    writer
        .add_task("tomato-1", WaterTask::water(30), &cancel)
        .await
        .unwrap();

    // Warm the log view, then watch.
    watcher.list_logs("tomato-1", &cancel).await.unwrap();

    let mut events = watcher.subscribe_changes();
    watcher.start_watch(WatchKind::Logs).await.unwrap();
    wait_for_subscribed(&mut events, WatchKind::Logs).await;

    writer.complete_task("tomato-1", &cancel).await.unwrap();

    let mut saw_log = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(ChangeEvent::LogAppended { identifier, .. })) => {
                assert_eq!(identifier, "tomato-1");
                saw_log = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }
    assert!(saw_log, "no LogAppended event arrived");

    let logs = watcher.list_logs("tomato-1", &cancel).await.unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn test_stop_watch_is_terminal_and_idempotent() {
    let (_relay, _signer, engine) = fresh_engine();

    engine.start_watch(WatchKind::Pots).await.unwrap();
    assert!(engine.stop_watch(WatchKind::Pots).await);
    assert!(!engine.stop_watch(WatchKind::Pots).await);
    assert_eq!(engine.watch_state(WatchKind::Pots).await, WatchState::Idle);
}

// ============================================================================
// Weather entities
// ============================================================================

async fn publish_station(relay: &MemoryRelay, station: &LocalSigner, name: &str, at: u64) {
    let cancel = CancellationToken::new();
    let record = station
        .sign(RecordDraft {
            kind: KIND_WEATHER_STATION,
            created_at: at,
            tags: vec![
                Tag::new("name", &[name]),
                Tag::new("g", &["u4pruyd"]),
            ],
            payload: String::new(),
        })
        .await
        .unwrap();
    relay.publish(record, &cancel).await.unwrap();
}

async fn publish_reading(relay: &MemoryRelay, station: &LocalSigner, temp: &str, at: u64) {
    let cancel = CancellationToken::new();
    let record = station
        .sign(RecordDraft {
            kind: KIND_WEATHER_READING,
            created_at: at,
            tags: vec![
                Tag::new("temp", &[temp]),
                Tag::new("humidity", &["40"]),
            ],
            payload: String::new(),
        })
        .await
        .unwrap();
    relay.publish(record, &cancel).await.unwrap();
}

#[tokio::test]
async fn test_weather_station_listing_and_latest_reading() {
    let (relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();
    let station = LocalSigner::generate();

    publish_station(&relay, &station, "Roof Station", 100).await;
    publish_reading(&relay, &station, "19.5", 200).await;
    publish_reading(&relay, &station, "21.0", 300).await;

    let stations = engine.weather_stations(&cancel).await.unwrap();
    assert_eq!(stations.len(), 1);
    assert_eq!(stations[0].name, "Roof Station");

    let reading = engine
        .latest_reading(&station.public_id(), &cancel)
        .await
        .unwrap()
        .expect("station has readings");
    assert_eq!(reading.temperature(), Some("21.0"));
    assert_eq!(reading.humidity(), Some("40"));
}

#[tokio::test]
async fn test_unknown_station_has_no_reading() {
    let (_relay, _signer, engine) = fresh_engine();
    let cancel = CancellationToken::new();
    let nobody = LocalSigner::generate().public_id();

    let reading = engine.latest_reading(&nobody, &cancel).await.unwrap();
    assert!(reading.is_none());
}

// ============================================================================
// Multi-owner isolation
// ============================================================================

#[tokio::test]
async fn test_owners_only_see_their_own_pots() {
    let relay = Arc::new(MemoryRelay::new());
    let alice = engine_over(relay.clone(), Arc::new(LocalSigner::generate()));
    let bob = engine_over(relay.clone(), Arc::new(LocalSigner::generate()));
    let cancel = CancellationToken::new();

    alice.create_pot("tomato-1", None, &cancel).await.unwrap();
    bob.create_pot("cactus", None, &cancel).await.unwrap();

    let alice_pots: Vec<PlantPot> = alice.list_pots(&cancel).await.unwrap();
    assert_eq!(alice_pots.len(), 1);
    assert_eq!(alice_pots[0].identifier, "tomato-1");

    let bob_pots = bob.list_pots(&cancel).await.unwrap();
    assert_eq!(bob_pots.len(), 1);
    assert_eq!(bob_pots[0].identifier, "cactus");
}
