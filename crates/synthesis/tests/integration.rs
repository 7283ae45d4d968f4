//! Integration tests for the synthesis adapter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dubsync_segment::AudioClip;
use dubsync_synthesis::stub::{FnBackend, ScriptedBackend};
use dubsync_synthesis::{
    CacheError, CallGate, ClipStore, ServiceError, SynthesisAdapter, SynthesisRequest,
};

struct CountingGate(AtomicU64);

#[async_trait]
impl CallGate for CountingGate {
    async fn admit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MemoryStore(Mutex<HashMap<(String, i64), AudioClip>>);

impl ClipStore for MemoryStore {
    fn load(&self, request: &SynthesisRequest) -> Result<Option<AudioClip>, CacheError> {
        let map = self.0.lock().unwrap();
        Ok(map.get(&(request.text.clone(), request.rate_key())).cloned())
    }

    fn store(&self, request: &SynthesisRequest, clip: &AudioClip) -> Result<(), CacheError> {
        self.0
            .lock()
            .unwrap()
            .insert((request.text.clone(), request.rate_key()), clip.clone());
        Ok(())
    }
}

/// Records which threads touched the store.
#[derive(Default)]
struct ThreadTrackingStore {
    inner: MemoryStore,
    threads: Mutex<Vec<std::thread::ThreadId>>,
}

impl ClipStore for ThreadTrackingStore {
    fn load(&self, request: &SynthesisRequest) -> Result<Option<AudioClip>, CacheError> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        self.inner.load(request)
    }

    fn store(&self, request: &SynthesisRequest, clip: &AudioClip) -> Result<(), CacheError> {
        self.threads.lock().unwrap().push(std::thread::current().id());
        self.inner.store(request, clip)
    }
}

fn request(rate: f64) -> SynthesisRequest {
    SynthesisRequest {
        text: "Bonjour tout le monde".into(),
        rate,
        voice: "voice".into(),
        language: "fr".into(),
    }
}

// ============================================================================
// Gating
// ============================================================================

mod gating {
    use super::*;

    #[tokio::test]
    async fn test_every_backend_call_is_gated() {
        let gate = CountingGate(AtomicU64::new(0));
        let primary = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Err(ServiceError::transient("429"))],
        ));
        let secondary = Arc::new(ScriptedBackend::new("k2", vec![Ok(1.0)]));
        let adapter = SynthesisAdapter::new(primary).with_secondary(secondary);

        adapter.synthesize(&request(1.0), &gate).await.unwrap();

        assert_eq!(gate.0.load(Ordering::SeqCst), 2);
        assert_eq!(adapter.usage().calls, 2);
    }
}

// ============================================================================
// Caching
// ============================================================================

mod caching {
    use super::*;

    #[tokio::test]
    async fn test_cache_hit_skips_gate_and_backend() {
        let gate = CountingGate(AtomicU64::new(0));
        let backend = Arc::new(FnBackend::new("k1", |r: &SynthesisRequest| Ok(2.0 / r.rate)));
        let adapter =
            SynthesisAdapter::new(backend.clone()).with_cache(Arc::new(MemoryStore::default()));

        let first = adapter.synthesize(&request(1.0), &gate).await.unwrap();
        let second = adapter.synthesize(&request(1.0), &gate).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.calls(), 1);
        assert_eq!(gate.0.load(Ordering::SeqCst), 1);
        assert_eq!(adapter.usage().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_different_rate_misses() {
        let backend = Arc::new(FnBackend::new("k1", |r: &SynthesisRequest| Ok(2.0 / r.rate)));
        let adapter =
            SynthesisAdapter::new(backend.clone()).with_cache(Arc::new(MemoryStore::default()));
        let gate = CountingGate(AtomicU64::new(0));

        adapter.synthesize(&request(1.0), &gate).await.unwrap();
        adapter.synthesize(&request(1.1), &gate).await.unwrap();

        assert_eq!(backend.calls(), 2);
        assert_eq!(adapter.usage().cache_hits, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_cache_io_stays_off_the_async_thread() {
        let runtime_thread = std::thread::current().id();
        let backend = Arc::new(FnBackend::new("k1", |r: &SynthesisRequest| Ok(2.0 / r.rate)));
        let store = Arc::new(ThreadTrackingStore::default());
        let adapter = SynthesisAdapter::new(backend.clone()).with_cache(store.clone());
        let gate = CountingGate(AtomicU64::new(0));

        adapter.synthesize(&request(1.0), &gate).await.unwrap();
        adapter.synthesize(&request(1.0), &gate).await.unwrap();

        let threads = store.threads.lock().unwrap();
        // miss, write, hit
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|id| *id != runtime_thread));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let backend = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Err(ServiceError::exhausted("bad")), Ok(1.0)],
        ));
        let store = Arc::new(MemoryStore::default());
        let adapter = SynthesisAdapter::new(backend.clone()).with_cache(store.clone());
        let gate = CountingGate(AtomicU64::new(0));

        assert!(adapter.synthesize(&request(1.0), &gate).await.is_err());
        assert!(store.0.lock().unwrap().is_empty());
        assert!(adapter.synthesize(&request(1.0), &gate).await.is_ok());
        assert_eq!(store.0.lock().unwrap().len(), 1);
    }
}
