// Integration tests for the data sync engine over the in-process cache and
// store backends.

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use state_sync::{
    CacheBackend, MemoryCache, MemoryDocumentStore, StateStore, SyncError, SyncSettings,
};

use crate::support::{manual_flush_settings, sync_engine, FlakyCache, FlakyStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlayerState {
    id: u64,
    name: String,
    score: i32,
}

fn player(id: u64, score: i32) -> PlayerState {
    PlayerState {
        id,
        name: format!("player-{id}"),
        score,
    }
}

#[tokio::test]
async fn cache_aside_fills_and_then_hits() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store.clone(), manual_flush_settings());

    let loads = Arc::new(AtomicUsize::new(0));

    let expected = player(1, 100);
    let loaded = {
        let loads = loads.clone();
        let value = expected.clone();
        engine
            .cache_aside("player:1", move || async move {
                loads.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            })
            .await?
    };
    assert_eq!(loaded, Some(expected.clone()));
    assert_eq!(loads.load(Ordering::Relaxed), 1);

    // Second read is served from the cache without touching the loader.
    let cached = {
        let loads = loads.clone();
        engine
            .cache_aside::<PlayerState, _, _>("player:1", move || async move {
                loads.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            })
            .await?
    };
    assert_eq!(cached, Some(expected));
    assert_eq!(loads.load(Ordering::Relaxed), 1);

    let stats = engine.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.hit_rate, 0.5);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cache_aside_with_absent_source_stays_absent() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store, manual_flush_settings());

    let missing = engine
        .cache_aside::<PlayerState, _, _>("player:404", || async { Ok(None) })
        .await?;
    assert_eq!(missing, None);
    assert_eq!(cache.get("player:404").await?, None);
    assert_eq!(engine.stats().cache_misses, 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cache_aside_loader_error_does_not_poison_the_cache() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store, manual_flush_settings());

    let failed = engine
        .cache_aside::<PlayerState, _, _>("player:2", || async {
            Err(SyncError::persistence("source unavailable"))
        })
        .await;
    assert!(matches!(
        failed,
        Err(SyncError::PersistenceRejected { .. })
    ));
    assert_eq!(cache.get("player:2").await?, None);

    // Once the source recovers, the same key loads normally.
    let recovered = engine
        .cache_aside("player:2", || async { Ok(Some(player(2, 7))) })
        .await?;
    assert_eq!(recovered, Some(player(2, 7)));

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn write_through_is_visible_to_cache_aside_without_loader() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store.clone(), manual_flush_settings());

    let value = player(3, 42);
    engine.write_through("player:3", &value, None).await?;
    assert!(store.load("player:3").await?.is_some());

    let loads = Arc::new(AtomicUsize::new(0));
    let read = {
        let loads = loads.clone();
        engine
            .cache_aside::<PlayerState, _, _>("player:3", move || async move {
                loads.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            })
            .await?
    };
    assert_eq!(read, Some(value));
    assert_eq!(loads.load(Ordering::Relaxed), 0, "loader must not run on a hit");
    assert_eq!(engine.stats().write_through_count, 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn write_through_store_failure_surfaces_and_invalidates_cache() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(FlakyStore::default());
    let engine = sync_engine(cache.clone(), store.clone(), manual_flush_settings());

    store.fail_next_saves(1);
    let failed = engine.write_through("player:4", &player(4, 1), None).await;
    assert!(matches!(failed, Err(SyncError::PersistenceRejected { .. })));

    // The orphaned cache entry was invalidated, so readers re-converge
    // through the loader instead of seeing an unpersisted value.
    assert_eq!(cache.get("player:4").await?, None);
    let stats = engine.stats();
    assert_eq!(stats.sync_failure_count, 1);
    assert_eq!(stats.write_through_count, 0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn write_behind_coalesces_and_flushes_latest_values() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store.clone(), manual_flush_settings());

    engine.write_behind("k1", &player(1, 1), None).await?;
    engine.write_behind("k1", &player(1, 2), None).await?;
    engine.write_behind("k2", &player(2, 3), None).await?;
    assert_eq!(engine.pending_count(), 2);
    assert_eq!(engine.stats().write_behind_count, 3);

    // The cache already serves the newest value while persistence waits.
    let cached = engine
        .cache_aside::<PlayerState, _, _>("k1", || async { Ok(None) })
        .await?;
    assert_eq!(cached, Some(player(1, 2)));

    let report = engine.flush_pending_writes().await?;
    assert_eq!(report.flushed, 2);
    assert_eq!(report.dead_lettered, 0);
    assert_eq!(engine.pending_count(), 0);

    // Persistence received exactly the coalesced values.
    let k1: PlayerState = serde_json::from_slice(&store.load("k1").await?.expect("k1"))?;
    let k2: PlayerState = serde_json::from_slice(&store.load("k2").await?.expect("k2"))?;
    assert_eq!(k1, player(1, 2));
    assert_eq!(k2, player(2, 3));

    let stats = engine.stats();
    assert!(stats.last_flush_time.is_some());
    assert_eq!(stats.pending_count, 0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn write_behind_cache_failure_queues_nothing() -> Result<(), SyncError> {
    let cache = Arc::new(FlakyCache::default());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store, manual_flush_settings());

    cache.fail_next_sets(1);
    let failed = engine.write_behind("k", &player(9, 9), None).await;
    assert!(matches!(failed, Err(SyncError::Transport { .. })));
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(engine.stats().write_behind_count, 0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn flush_retries_then_dead_letters() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(FlakyStore::default());
    let settings = SyncSettings {
        max_retries: 2,
        ..manual_flush_settings()
    };
    let engine = sync_engine(cache.clone(), store.clone(), settings);

    engine.write_behind("doomed", &player(5, 5), None).await?;
    store.fail_next_saves(u32::MAX);

    let first = engine.flush_pending_writes().await?;
    assert_eq!(first.retried, 1);
    assert_eq!(engine.pending_count(), 1, "entry stays queued within budget");

    let second = engine.flush_pending_writes().await?;
    assert_eq!(second.dead_lettered, 1);
    assert_eq!(engine.pending_count(), 0);

    let letters = engine.dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].key, "doomed");
    assert_eq!(letters[0].retries, 2);
    assert_eq!(engine.stats().sync_failure_count, 1);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn delete_discards_pending_and_clears_both_sides() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store.clone(), manual_flush_settings());

    // Persisted value plus a queued overwrite.
    engine.write_through("k", &player(6, 1), None).await?;
    engine.write_behind("k", &player(6, 2), None).await?;
    assert_eq!(engine.pending_count(), 1);

    engine.delete("k").await?;
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(cache.get("k").await?, None);
    assert_eq!(store.load("k").await?, None);

    // The discarded pending write must not resurrect the key.
    let report = engine.flush_pending_writes().await?;
    assert_eq!(report.flushed, 0);
    assert_eq!(store.load("k").await?, None);

    let gone = engine
        .cache_aside::<PlayerState, _, _>("k", || async { Ok(None) })
        .await?;
    assert_eq!(gone, None);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn empty_flush_is_a_quick_no_op() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache, store, manual_flush_settings());

    let report = engine.flush_pending_writes().await?;
    assert_eq!(report, Default::default());
    assert!(engine.stats().last_flush_time.is_none());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn reaching_the_batch_threshold_nudges_the_flusher() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let settings = SyncSettings {
        batch_threshold: 2,
        flush_interval: Duration::from_secs(600),
        ..manual_flush_settings()
    };
    let engine = sync_engine(cache, store.clone(), settings);

    engine.write_behind("t1", &player(1, 1), None).await?;
    assert_eq!(store.len(), 0, "below the threshold nothing flushes");

    engine.write_behind("t2", &player(2, 2), None).await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.pending_count(), 0);
    assert!(store.load("t1").await?.is_some());
    assert!(store.load("t2").await?.is_some());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn interval_timer_flushes_on_its_own() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let settings = SyncSettings {
        flush_interval: Duration::from_millis(100),
        ..manual_flush_settings()
    };
    let engine = sync_engine(cache, store.clone(), settings);

    engine.write_behind("timed", &player(8, 8), None).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(store.load("timed").await?.is_some());
    assert_eq!(engine.pending_count(), 0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_drains_the_queue_and_disposes() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache, store.clone(), manual_flush_settings());

    engine.write_behind("parting", &player(7, 7), None).await?;
    engine.shutdown().await;

    assert!(store.load("parting").await?.is_some(), "final flush must run");

    let refused = engine.write_through("after", &player(1, 1), None).await;
    assert!(matches!(refused, Err(SyncError::Disposed { .. })));
    let refused = engine.flush_pending_writes().await;
    assert!(matches!(refused, Err(SyncError::Disposed { .. })));

    // Teardown is idempotent.
    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn ttl_on_write_behind_applies_to_the_cache_entry() -> Result<(), SyncError> {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(MemoryDocumentStore::new());
    let engine = sync_engine(cache.clone(), store, manual_flush_settings());

    engine
        .write_behind("fleeting", &player(1, 1), Some(Duration::from_millis(40)))
        .await?;
    assert!(cache.get("fleeting").await?.is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get("fleeting").await?, None, "cache entry expired");
    assert_eq!(engine.pending_count(), 1, "queued write is TTL-independent");

    engine.shutdown().await;
    Ok(())
}
