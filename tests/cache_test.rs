//! Integration tests for the voice model cache.

mod common;

use common::{FakeLoader, add_voice, add_voice_config, temp_dir};
use std::sync::atomic::Ordering;
use std::time::Duration;
use voxq::cache::{VoiceCache, VoiceLibrary};
use voxq::error::Error;

const IDLE: Duration = Duration::from_secs(60);

fn cache_with(loader: FakeLoader, keys: &[&str]) -> VoiceCache<FakeLoader> {
    let dir = temp_dir("cache");
    for key in keys {
        add_voice(&dir, key);
    }
    VoiceCache::new(loader, VoiceLibrary::new(dir), IDLE)
}

// ---------------------------------------------------------------------------
// Hits and misses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeat_acquire_reuses_the_same_model() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    let first = cache.acquire("voiceA", None).await.unwrap().serial;
    let second = cache.acquire("voiceA", None).await.unwrap().serial;

    assert_eq!(first, second);
    assert_eq!(loader.builds(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cold_acquires_build_once() {
    let loader = FakeLoader {
        delay: Duration::from_millis(50),
        ..FakeLoader::default()
    };
    let cache = cache_with(loader.clone(), &["voiceA"]);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.acquire("voiceA", None).await.unwrap().serial })
        })
        .collect();

    let mut serials = Vec::new();
    for task in tasks {
        serials.push(task.await.unwrap());
    }

    assert_eq!(loader.builds(), 1);
    assert!(serials.iter().all(|s| *s == serials[0]));
}

#[tokio::test]
async fn override_applies_on_miss_and_hit() {
    let cache = cache_with(FakeLoader::default(), &["voiceA"]);

    let voice = cache.acquire("voiceA", Some("en-US-AriaNeural")).await.unwrap();
    assert_eq!(voice.voice.as_deref(), Some("en-US-AriaNeural"));
    let serial = voice.serial;
    drop(voice);

    let voice = cache.acquire("voiceA", Some("en-GB-RyanNeural")).await.unwrap();
    assert_eq!(voice.voice.as_deref(), Some("en-GB-RyanNeural"));
    assert_eq!(voice.serial, serial);
    drop(voice);

    // No override leaves the current voice alone.
    let voice = cache.acquire("voiceA", None).await.unwrap();
    assert_eq!(voice.voice.as_deref(), Some("en-GB-RyanNeural"));
}

#[tokio::test]
async fn voice_config_defaults_are_loaded() {
    let dir = temp_dir("defaults");
    add_voice(&dir, "voiceA");
    add_voice_config(
        &dir,
        "voiceA",
        "[voice]\nedge_voice = \"en-US-GuyNeural\"\nrvc_pitch = 4\n",
    );
    let cache = VoiceCache::new(FakeLoader::default(), VoiceLibrary::new(dir), IDLE);

    let voice = cache.acquire("voiceA", None).await.unwrap();
    let defaults = &voice.definition().defaults;
    assert_eq!(defaults.edge_voice.as_deref(), Some("en-US-GuyNeural"));
    assert_eq!(defaults.rvc_pitch, Some(4));
    assert_eq!(defaults.tts_rate, None);
    assert_eq!(voice.voice.as_deref(), Some("en-US-GuyNeural"));
}

#[tokio::test]
async fn malformed_voice_config_is_a_config_error() {
    let dir = temp_dir("bad-toml");
    add_voice(&dir, "voiceA");
    add_voice_config(&dir, "voiceA", "[voice\nedge_voice = ");
    let cache = VoiceCache::new(FakeLoader::default(), VoiceLibrary::new(dir), IDLE);

    let result = cache.acquire("voiceA", None).await;
    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(cache.stats().cached_models, 0);
}

// ---------------------------------------------------------------------------
// Missing definitions and failed builds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_voice_is_not_found_and_not_cached() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    let result = cache.acquire("missingVoice", None).await;

    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(cache.stats().cached_models, 0);
    assert_eq!(loader.builds(), 0);
}

#[tokio::test]
async fn missing_index_file_is_not_found() {
    let dir = temp_dir("no-index");
    add_voice(&dir, "voiceA");
    std::fs::remove_file(dir.join("voiceA").join("voiceA.index")).unwrap();
    let cache = VoiceCache::new(FakeLoader::default(), VoiceLibrary::new(dir), IDLE);

    match cache.acquire("voiceA", None).await {
        Err(Error::NotFound(msg)) => assert!(msg.contains("index")),
        Err(e) => panic!("expected NotFound, got {e}"),
        Ok(_) => panic!("expected NotFound, got a model"),
    }
}

#[tokio::test]
async fn path_like_keys_are_rejected() {
    let cache = cache_with(FakeLoader::default(), &["voiceA"]);

    for key in ["", "..", "voiceA/../voiceA", "a\\b"] {
        let result = cache.acquire(key, None).await;
        assert!(
            matches!(result, Err(Error::NotFound(_))),
            "key {key:?} should be rejected"
        );
    }
    assert_eq!(cache.stats().cached_models, 0);
}

#[tokio::test]
async fn failed_build_installs_nothing_and_retries() {
    let loader = FakeLoader::default();
    loader.fail.store(true, Ordering::SeqCst);
    let cache = cache_with(loader.clone(), &["voiceA"]);

    assert!(cache.acquire("voiceA", None).await.is_err());
    assert_eq!(cache.stats().cached_models, 0);

    loader.fail.store(false, Ordering::SeqCst);
    let voice = cache.acquire("voiceA", None).await.unwrap();
    assert_eq!(voice.serial, 1);
}

#[tokio::test]
async fn failed_lookups_leave_no_lock_slots() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    for i in 0..200 {
        let result = cache.acquire(&format!("missing{i}"), None).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
    assert_eq!(cache.tracked_keys(), 0);

    loader.fail.store(true, Ordering::SeqCst);
    assert!(cache.acquire("voiceA", None).await.is_err());
    assert_eq!(cache.tracked_keys(), 0);
}

#[tokio::test]
async fn lock_slots_are_released_after_eviction() {
    let cache = cache_with(FakeLoader::default(), &["voiceA", "voiceB"]);

    drop(cache.acquire("voiceA", None).await.unwrap());
    drop(cache.acquire("voiceB", None).await.unwrap());
    assert_eq!(cache.tracked_keys(), 2);

    assert!(cache.evict("voiceA").await);
    assert_eq!(cache.tracked_keys(), 1);
    cache.clear().await;
    assert_eq!(cache.tracked_keys(), 0);
}

// ---------------------------------------------------------------------------
// Locking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn same_key_waits_for_the_current_holder() {
    let cache = cache_with(FakeLoader::default(), &["voiceA"]);

    let held = cache.acquire("voiceA", None).await.unwrap();
    let blocked =
        tokio::time::timeout(Duration::from_millis(50), cache.acquire("voiceA", None)).await;
    assert!(blocked.is_err(), "second acquire should wait");

    drop(held);
    let voice = tokio::time::timeout(Duration::from_secs(1), cache.acquire("voiceA", None))
        .await
        .expect("acquire after release")
        .unwrap();
    assert_eq!(voice.key(), "voiceA");
}

#[tokio::test]
async fn different_keys_do_not_block_each_other() {
    let cache = cache_with(FakeLoader::default(), &["voiceA", "voiceB"]);

    let _held = cache.acquire("voiceA", None).await.unwrap();
    let other = tokio::time::timeout(Duration::from_secs(1), cache.acquire("voiceB", None))
        .await
        .expect("voiceB should not wait on voiceA")
        .unwrap();
    assert_eq!(other.key(), "voiceB");
}

#[tokio::test]
async fn stats_do_not_wait_on_held_keys() {
    let cache = cache_with(FakeLoader::default(), &["voiceA", "voiceB"]);

    drop(cache.acquire("voiceB", None).await.unwrap());
    let _held = cache.acquire("voiceA", None).await.unwrap();

    let stats = cache.stats();
    assert_eq!(stats.cached_models, 2);
    assert_eq!(stats.models, vec!["voiceA".to_string(), "voiceB".to_string()]);
    assert!(stats.last_used.contains_key("voiceA"));
}

// ---------------------------------------------------------------------------
// Eviction
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn idle_entries_are_evicted_and_rebuilt() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    let first = cache.acquire("voiceA", None).await.unwrap().serial;
    let second = cache.acquire("voiceA", None).await.unwrap().serial;
    assert_eq!(first, second);

    tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
    assert_eq!(cache.stats().cached_models, 0);

    let third = cache.acquire("voiceA", None).await.unwrap().serial;
    assert_ne!(third, first);
    assert_eq!(loader.builds(), 2);
}

#[tokio::test(start_paused = true)]
async fn access_rearms_the_idle_timer() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    drop(cache.acquire("voiceA", None).await.unwrap());
    tokio::time::sleep(Duration::from_secs(40)).await;
    drop(cache.acquire("voiceA", None).await.unwrap());

    // 80s after the first use, 40s after the refresh.
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(cache.stats().cached_models, 1);
    assert_eq!(loader.builds(), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(cache.stats().cached_models, 0);
}

#[tokio::test(start_paused = true)]
async fn idle_window_starts_when_the_handle_is_released() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    // Held past the idle window, as a long synthesis would be.
    let held = cache.acquire("voiceA", None).await.unwrap();
    tokio::time::sleep(IDLE + Duration::from_secs(30)).await;
    assert_eq!(cache.stats().cached_models, 1);
    drop(held);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(cache.stats().cached_models, 1, "just used, not idle");

    tokio::time::sleep(IDLE).await;
    assert_eq!(cache.stats().cached_models, 0);
    assert_eq!(cache.tracked_keys(), 0);
    assert_eq!(loader.builds(), 1);
}

#[tokio::test(start_paused = true)]
async fn idle_eviction_releases_the_lock_slot() {
    let cache = cache_with(FakeLoader::default(), &["voiceA"]);

    drop(cache.acquire("voiceA", None).await.unwrap());
    assert_eq!(cache.tracked_keys(), 1);

    tokio::time::sleep(IDLE + Duration::from_secs(1)).await;
    assert_eq!(cache.tracked_keys(), 0);
}

#[tokio::test]
async fn explicit_evict_is_idempotent() {
    let loader = FakeLoader::default();
    let cache = cache_with(loader.clone(), &["voiceA"]);

    drop(cache.acquire("voiceA", None).await.unwrap());
    assert!(cache.evict("voiceA").await);
    assert!(!cache.evict("voiceA").await);
    assert!(!cache.evict("neverSeen").await);

    drop(cache.acquire("voiceA", None).await.unwrap());
    assert_eq!(loader.builds(), 2);
}

#[tokio::test]
async fn clear_evicts_everything() {
    let cache = cache_with(FakeLoader::default(), &["voiceA", "voiceB"]);

    drop(cache.acquire("voiceA", None).await.unwrap());
    drop(cache.acquire("voiceB", None).await.unwrap());
    assert_eq!(cache.stats().cached_models, 2);

    assert_eq!(cache.clear().await, 2);
    let stats = cache.stats();
    assert_eq!(stats.cached_models, 0);
    assert!(stats.models.is_empty());
    assert!(stats.last_used.is_empty());
}
