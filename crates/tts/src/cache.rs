//! Fingerprint cache for synthesized audio
//!
//! Keyed by `(engine, voice, language, speed, text_hash)`. The cache is a
//! bounded LRU; an in-flight table guarantees at-most-one concurrent
//! synthesis per fingerprint - later requesters wait on the first job's gate
//! and then hit the freshly filled cache entry.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use voicehub_core::EngineKind;

use crate::TtsError;

/// Deterministic synthesis key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub engine: EngineKind,
    pub voice: String,
    pub language: String,
    /// Speaking rate in hundredths, so the key stays hashable
    pub speed_centi: u16,
    pub text_hash: u64,
}

impl Fingerprint {
    pub fn new(engine: EngineKind, voice: &str, language: &str, speed: f32, text: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        Self {
            engine,
            voice: voice.to_string(),
            language: language.to_string(),
            speed_centi: (speed.clamp(0.25, 4.0) * 100.0).round() as u16,
            text_hash: hasher.finish(),
        }
    }
}

/// Finalized audio stored per fingerprint
#[derive(Debug, Clone)]
pub struct CachedAudio {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
}

/// Cache counters for `staged_tts_control{action:"get_stats"}`
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Bounded LRU cache with a single-flight in-flight table
pub struct FingerprintCache {
    enabled: bool,
    entries: Mutex<LruCache<Fingerprint, Arc<CachedAudio>>>,
    in_flight: DashMap<Fingerprint, Arc<AsyncMutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FingerprintCache {
    pub fn new(capacity: usize, enabled: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity >= 1");
        Self {
            enabled,
            entries: Mutex::new(LruCache::new(capacity)),
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up the fingerprint or run `producer` to fill it. Concurrent
    /// callers for the same fingerprint attach to the first job: they block
    /// on its gate and then observe the cached result.
    pub async fn get_or_synthesize<F>(
        &self,
        fingerprint: Fingerprint,
        producer: F,
    ) -> Result<Arc<CachedAudio>, TtsError>
    where
        F: std::future::Future<Output = Result<CachedAudio, TtsError>>,
    {
        if !self.enabled {
            return Ok(Arc::new(producer.await?));
        }

        if let Some(hit) = self.lookup(&fingerprint) {
            return Ok(hit);
        }

        let gate = {
            let entry = self
                .in_flight
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())));
            entry.value().clone()
        };
        let guard = gate.lock().await;

        // The first holder may have filled the entry while we waited.
        if let Some(hit) = self.lookup(&fingerprint) {
            drop(guard);
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = producer.await;
        let audio = match result {
            Ok(audio) => Arc::new(audio),
            Err(e) => {
                drop(guard);
                self.in_flight.remove(&fingerprint);
                return Err(e);
            }
        };

        self.entries.lock().put(fingerprint.clone(), audio.clone());
        drop(guard);
        self.in_flight.remove(&fingerprint);

        Ok(audio)
    }

    fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<CachedAudio>> {
        let hit = self.entries.lock().get(fingerprint).cloned();
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Drop every cached entry; the next synthesis for any fingerprint
    /// misses the cache.
    pub fn clear(&self) {
        self.entries.lock().clear();
        tracing::info!("Fingerprint cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            enabled: self.enabled,
            entries: entries.len(),
            capacity: entries.cap().get(),
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn fingerprint(text: &str) -> Fingerprint {
        Fingerprint::new(EngineKind::Piper, "de-thorsten-low", "de", 1.0, text)
    }

    fn audio() -> CachedAudio {
        CachedAudio {
            samples: vec![0.1f32; 240].into(),
            sample_rate: 24000,
        }
    }

    #[test]
    fn test_fingerprint_equality() {
        assert_eq!(fingerprint("hallo"), fingerprint("hallo"));
        assert_ne!(fingerprint("hallo"), fingerprint("welt"));
        let slow = Fingerprint::new(EngineKind::Piper, "v", "de", 0.8, "hallo");
        let fast = Fingerprint::new(EngineKind::Piper, "v", "de", 1.2, "hallo");
        assert_ne!(slow, fast);
    }

    #[tokio::test]
    async fn test_second_lookup_hits() {
        let cache = FingerprintCache::new(8, true);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = cache
                .get_or_synthesize(fingerprint("hallo"), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(audio())
                })
                .await
                .unwrap();
            assert_eq!(result.sample_rate, 24000);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrency() {
        let cache = Arc::new(FingerprintCache::new(8, true));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_synthesize(fingerprint("konkurrenz"), async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(audio())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut first: Option<Arc<CachedAudio>> = None;
        for task in tasks {
            let result = task.await.unwrap();
            if let Some(expected) = &first {
                assert!(Arc::ptr_eq(expected, &result), "all requesters share one PCM");
            } else {
                first = Some(result);
            }
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_forces_miss() {
        let cache = FingerprintCache::new(8, true);
        let calls = AtomicUsize::new(0);

        let produce = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(audio())
        };
        cache
            .get_or_synthesize(fingerprint("hallo"), produce())
            .await
            .unwrap();
        cache.clear();
        cache
            .get_or_synthesize(fingerprint("hallo"), produce())
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_is_not_cached() {
        let cache = FingerprintCache::new(8, true);

        let err = cache
            .get_or_synthesize(fingerprint("kaputt"), async {
                Err(TtsError::Timeout)
            })
            .await;
        assert!(err.is_err());

        let ok = cache
            .get_or_synthesize(fingerprint("kaputt"), async { Ok(audio()) })
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_produces() {
        let cache = FingerprintCache::new(8, false);
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .get_or_synthesize(fingerprint("hallo"), async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(audio())
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_is_bounded() {
        let cache = FingerprintCache::new(2, true);
        for text in ["a", "b", "c", "d"] {
            cache
                .get_or_synthesize(fingerprint(text), async { Ok(audio()) })
                .await
                .unwrap();
        }
        assert!(cache.stats().entries <= 2);
    }
}
