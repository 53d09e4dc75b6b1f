//! Keyed voice model cache with idle eviction.
//!
//! Building a voice model is slow, so one instance per voice key is kept
//! warm and handed out to synthesis work. Each key has its own async lock:
//! construction for a key happens at most once at a time, and different
//! keys never wait on each other. The global map lock only guards the
//! per-key lock table and the stats view; it is never held across an await.
//!
//! Every entry carries a generation number and a cancellable eviction task.
//! A hit aborts the old task and arms a new one under a fresh generation,
//! and an eviction task only removes the entry if the generation still
//! matches, so a just-refreshed entry is never evicted by a stale timer.
//! Releasing a handle re-arms the timer the same way, so the idle window
//! counts from the end of use. Lock slots for keys that end up caching
//! nothing are dropped from the table.

pub mod command;
pub mod library;

pub use command::{CommandVoice, CommandVoiceLoader};
pub use library::{VoiceDefaults, VoiceDefinition, VoiceLibrary};

use crate::error::{Error, Result};
use crate::telemetry::metrics;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{Mutex as KeyLock, OwnedMappedMutexGuard, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default idle window before an unused model is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One synthesis call against a loaded model.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub text: String,
    pub pitch: i32,
    pub rate: i32,
    pub output: PathBuf,
}

/// A loaded voice model.
pub trait VoiceModel: Send + Sync + 'static {
    /// Swap the base TTS voice used by subsequent synthesis.
    fn set_voice(&mut self, voice: &str);

    /// Render `job.text` to `job.output`.
    fn synthesize(&mut self, job: &SynthesisJob) -> impl Future<Output = Result<()>> + Send;
}

/// Builds models from resolved definitions.
pub trait VoiceLoader: Send + Sync + 'static {
    type Model: VoiceModel;

    fn load(
        &self,
        definition: &VoiceDefinition,
    ) -> impl Future<Output = Result<Self::Model>> + Send;
}

/// Read-only view of the cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub cached_models: usize,
    pub models: Vec<String>,
    pub last_used: BTreeMap<String, DateTime<Utc>>,
}

struct CacheEntry<M> {
    model: M,
    definition: VoiceDefinition,
    last_used_at: DateTime<Utc>,
    generation: u64,
    eviction: JoinHandle<()>,
}

impl<M> Drop for CacheEntry<M> {
    fn drop(&mut self) {
        self.eviction.abort();
    }
}

struct Slot<M> {
    entry: Option<CacheEntry<M>>,
}

struct KeyState<M> {
    lock: Arc<KeyLock<Slot<M>>>,
    /// Mirror of the entry's last use, readable without the key lock.
    last_used: Option<DateTime<Utc>>,
}

struct Inner<L: VoiceLoader> {
    loader: L,
    library: VoiceLibrary,
    idle_timeout: Duration,
    generation: AtomicU64,
    keys: Mutex<HashMap<String, KeyState<L::Model>>>,
}

/// Exclusive use of a cached model.
///
/// Holds the key's lock: other acquisitions of the same key, and its
/// eviction, wait until this is dropped. Do not keep it beyond the call
/// that needed the model. The idle window restarts when it is dropped.
pub struct VoiceHandle<L: VoiceLoader> {
    key: String,
    inner: Arc<Inner<L>>,
    entry: OwnedMappedMutexGuard<Slot<L::Model>, CacheEntry<L::Model>>,
}

impl<L: VoiceLoader> VoiceHandle<L> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn definition(&self) -> &VoiceDefinition {
        &self.entry.definition
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.entry.last_used_at
    }
}

impl<L: VoiceLoader> std::ops::Deref for VoiceHandle<L> {
    type Target = L::Model;

    fn deref(&self) -> &L::Model {
        &self.entry.model
    }
}

impl<L: VoiceLoader> std::ops::DerefMut for VoiceHandle<L> {
    fn deref_mut(&mut self) -> &mut L::Model {
        &mut self.entry.model
    }
}

impl<L: VoiceLoader> Drop for VoiceHandle<L> {
    fn drop(&mut self) {
        // Outside a runtime the timer armed at acquire stays in place.
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let now = Utc::now();
        let generation = self.inner.next_generation();
        let entry = &mut *self.entry;
        entry.last_used_at = now;
        entry.eviction.abort();
        entry.generation = generation;
        entry.eviction = schedule_eviction(&self.inner, &self.key, generation);
        self.inner.set_last_used(&self.key, Some(now));
    }
}

/// Process-wide voice model cache. Cheap to clone; clones share entries.
pub struct VoiceCache<L: VoiceLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: VoiceLoader> Clone for VoiceCache<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: VoiceLoader> VoiceCache<L> {
    pub fn new(loader: L, library: VoiceLibrary, idle_timeout: Duration) -> Self {
        info!(
            models_dir = %library.base_dir().display(),
            idle_secs = idle_timeout.as_secs(),
            "voice cache initialized"
        );
        Self {
            inner: Arc::new(Inner {
                loader,
                library,
                idle_timeout,
                generation: AtomicU64::new(0),
                keys: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Get the model for `key`, building it on first use.
    ///
    /// `voice_override` is applied to the model whether or not it was
    /// cached.
    ///
    /// # Errors
    /// `NotFound` if the key has no backing definition; any loader error
    /// on construction. Nothing is cached on failure.
    pub async fn acquire(
        &self,
        key: &str,
        voice_override: Option<&str>,
    ) -> Result<VoiceHandle<L>> {
        library::validate_key(key)?;

        let lock = self.inner.key_lock(key);
        let mut slot = lock.lock_owned().await;
        let now = Utc::now();

        if let Some(entry) = slot.entry.as_mut() {
            debug!(key, "using cached voice model");
            metrics::cache_lookups().add(1, &[KeyValue::new("result", "hit")]);
            entry.last_used_at = now;
            entry.eviction.abort();
            entry.generation = self.inner.next_generation();
            entry.eviction = schedule_eviction(&self.inner, key, entry.generation);
        } else {
            metrics::cache_lookups().add(1, &[KeyValue::new("result", "miss")]);
            let (definition, model) = match self.inner.build(key).await {
                Ok(built) => built,
                Err(e) => {
                    drop(slot);
                    self.inner.prune(key);
                    return Err(e);
                }
            };

            let generation = self.inner.next_generation();
            slot.entry = Some(CacheEntry {
                model,
                definition,
                last_used_at: now,
                generation,
                eviction: schedule_eviction(&self.inner, key, generation),
            });
        }

        self.inner.set_last_used(key, Some(now));

        let mut entry = OwnedMutexGuard::try_map(slot, |s| s.entry.as_mut())
            .map_err(|_| Error::Other(format!("voice entry for {key} vanished under lock")))?;
        if let Some(voice) = voice_override {
            entry.model.set_voice(voice);
        }

        Ok(VoiceHandle {
            key: key.to_string(),
            inner: Arc::clone(&self.inner),
            entry,
        })
    }

    /// Drop the entry for `key`, if any. Returns whether one was removed.
    pub async fn evict(&self, key: &str) -> bool {
        self.inner.remove(key, None).await
    }

    /// Evict every entry. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let keys: Vec<String> = self.inner.lock_keys().keys().cloned().collect();
        let mut removed = 0;
        for key in keys {
            if self.inner.remove(&key, None).await {
                removed += 1;
            }
        }
        removed
    }

    /// Keys with a slot in the lock table, cached or not.
    pub fn tracked_keys(&self) -> usize {
        self.inner.lock_keys().len()
    }

    /// Snapshot of live entries. Never waits on a key lock.
    pub fn stats(&self) -> CacheStats {
        let keys = self.inner.lock_keys();
        let last_used: BTreeMap<String, DateTime<Utc>> = keys
            .iter()
            .filter_map(|(k, state)| state.last_used.map(|t| (k.clone(), t)))
            .collect();
        CacheStats {
            cached_models: last_used.len(),
            models: last_used.keys().cloned().collect(),
            last_used,
        }
    }
}

impl<L: VoiceLoader> Inner<L> {
    fn lock_keys(&self) -> std::sync::MutexGuard<'_, HashMap<String, KeyState<L::Model>>> {
        // The map holds plain data; a panic mid-update cannot leave it torn.
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key_lock(&self, key: &str) -> Arc<KeyLock<Slot<L::Model>>> {
        let mut keys = self.lock_keys();
        let state = keys.entry(key.to_string()).or_insert_with(|| KeyState {
            lock: Arc::new(KeyLock::new(Slot { entry: None })),
            last_used: None,
        });
        Arc::clone(&state.lock)
    }

    async fn build(&self, key: &str) -> Result<(VoiceDefinition, L::Model)> {
        let definition = self.library.resolve(key).await?;
        info!(key, "building voice model");
        let model = self.loader.load(&definition).await.map_err(|e| {
            warn!(key, error = %e, "voice model construction failed");
            e
        })?;
        Ok((definition, model))
    }

    /// Forget `key`'s lock slot if it is empty and nobody else holds it.
    /// Callers must have released their own guard and lock handle.
    fn prune(&self, key: &str) {
        let mut keys = self.lock_keys();
        let unused = keys.get(key).is_some_and(|state| {
            Arc::strong_count(&state.lock) == 1
                && state
                    .lock
                    .try_lock()
                    .is_ok_and(|slot| slot.entry.is_none())
        });
        if unused {
            keys.remove(key);
        }
    }

    fn set_last_used(&self, key: &str, at: Option<DateTime<Utc>>) {
        if let Some(state) = self.lock_keys().get_mut(key) {
            state.last_used = at;
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Remove the entry under its key lock. With `expected` set, only an
    /// entry of that generation is removed.
    async fn remove(&self, key: &str, expected: Option<u64>) -> bool {
        let lock = {
            let keys = self.lock_keys();
            match keys.get(key) {
                Some(state) => Arc::clone(&state.lock),
                None => return false,
            }
        };
        let mut slot = lock.lock().await;

        let matches = match (&slot.entry, expected) {
            (Some(entry), Some(generation)) => entry.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }

        // Dropping the entry aborts its eviction task and releases the model.
        drop(slot.entry.take());
        self.set_last_used(key, None);
        drop(slot);
        drop(lock);
        self.prune(key);

        let reason = if expected.is_some() { "idle" } else { "explicit" };
        metrics::cache_evictions().add(1, &[KeyValue::new("reason", reason)]);
        info!(key, reason, "voice model evicted");
        true
    }
}

fn schedule_eviction<L: VoiceLoader>(
    inner: &Arc<Inner<L>>,
    key: &str,
    generation: u64,
) -> JoinHandle<()> {
    let weak: Weak<Inner<L>> = Arc::downgrade(inner);
    let key = key.to_string();
    let idle = inner.idle_timeout;
    tokio::spawn(async move {
        tokio::time::sleep(idle).await;
        if let Some(inner) = weak.upgrade() {
            inner.remove(&key, Some(generation)).await;
        }
    })
}
