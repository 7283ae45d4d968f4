use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dubsync_segment::AudioClip;
use serde::Serialize;

use crate::{CallGate, ClipStore, Result, ServiceError, SpeechBackend, SynthesisRequest};

/// Snapshot of adapter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdapterUsage {
    /// Backend calls actually made (each failover retry counts).
    pub calls: u64,
    pub failovers: u64,
    pub exhausted: u64,
    pub cache_hits: u64,
}

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    failovers: AtomicU64,
    exhausted: AtomicU64,
    cache_hits: AtomicU64,
}

/// Synthesis client over one or two credentials.
///
/// A transient failure switches the active credential and retries once on the
/// other one. A credential is never retried right after it failed; once both
/// have failed for a request the error is [`ServiceError::Exhausted`]. The
/// adapter does no pacing of its own: every backend call awaits the caller's
/// [`CallGate`].
pub struct SynthesisAdapter {
    slots: Vec<Arc<dyn SpeechBackend>>,
    active: AtomicUsize,
    cache: Option<Arc<dyn ClipStore>>,
    counters: Counters,
}

impl SynthesisAdapter {
    pub fn new(primary: Arc<dyn SpeechBackend>) -> Self {
        Self {
            slots: vec![primary],
            active: AtomicUsize::new(0),
            cache: None,
            counters: Counters::default(),
        }
    }

    /// Add the backup credential.
    pub fn with_secondary(mut self, secondary: Arc<dyn SpeechBackend>) -> Self {
        self.slots.truncate(1);
        self.slots.push(secondary);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ClipStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn has_failover(&self) -> bool {
        self.slots.len() > 1
    }

    /// Index of the credential the next request starts with.
    pub fn active_slot(&self) -> usize {
        self.active.load(Ordering::Relaxed) % self.slots.len()
    }

    pub fn usage(&self) -> AdapterUsage {
        AdapterUsage {
            calls: self.counters.calls.load(Ordering::Relaxed),
            failovers: self.counters.failovers.load(Ordering::Relaxed),
            exhausted: self.counters.exhausted.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub async fn synthesize(
        &self,
        request: &SynthesisRequest,
        gate: &dyn CallGate,
    ) -> Result<AudioClip> {
        if let Some(clip) = self.cached(request).await {
            return Ok(clip);
        }

        let first = self.active_slot();
        let error = match self.call_slot(first, request, gate).await {
            Ok(clip) => return Ok(self.remember(request, clip).await),
            Err(e) => e,
        };

        if !error.is_retryable() {
            return Err(self.exhaust(error.message()));
        }
        if !self.has_failover() {
            return Err(self.exhaust(&format!("no backup credential: {}", error.message())));
        }

        let second = (first + 1) % self.slots.len();
        self.active.store(second, Ordering::Relaxed);
        self.counters.failovers.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            from = self.slots[first].name(),
            to = self.slots[second].name(),
            error = %error,
            "credential_failover"
        );

        match self.call_slot(second, request, gate).await {
            Ok(clip) => Ok(self.remember(request, clip).await),
            Err(e) => Err(self.exhaust(&format!("all credentials failed: {}", e.message()))),
        }
    }

    async fn call_slot(
        &self,
        slot: usize,
        request: &SynthesisRequest,
        gate: &dyn CallGate,
    ) -> Result<AudioClip> {
        gate.admit().await;
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let backend = &self.slots[slot];
        let result = backend.synthesize(request).await;
        if let Err(e) = &result {
            tracing::debug!(backend = backend.name(), error = %e, "backend_call_failed");
        }
        result
    }

    fn exhaust(&self, message: &str) -> ServiceError {
        self.counters.exhausted.fetch_add(1, Ordering::Relaxed);
        ServiceError::exhausted(message)
    }

    /// Cache lookups run on the blocking pool; stores may do disk I/O.
    async fn cached(&self, request: &SynthesisRequest) -> Option<AudioClip> {
        let cache = Arc::clone(self.cache.as_ref()?);
        let key = request.clone();
        let loaded = tokio::task::spawn_blocking(move || cache.load(&key))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| e.to_string()));
        match loaded {
            Ok(Some(clip)) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(rate = request.rate, "synthesis_cache_hit");
                Some(clip)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "synthesis_cache_read_failed");
                None
            }
        }
    }

    async fn remember(&self, request: &SynthesisRequest, clip: AudioClip) -> AudioClip {
        if let Some(cache) = &self.cache {
            let cache = Arc::clone(cache);
            let key = request.clone();
            let stored = clip.clone();
            let written = tokio::task::spawn_blocking(move || cache.store(&key, &stored))
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| r.map_err(|e| e.to_string()));
            if let Err(e) = written {
                tracing::warn!(error = %e, "synthesis_cache_write_failed");
            }
        }
        clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::ScriptedBackend;
    use crate::Ungated;

    fn request() -> SynthesisRequest {
        SynthesisRequest {
            text: "Hola mundo".into(),
            rate: 1.0,
            voice: "voice-a".into(),
            language: "es".into(),
        }
    }

    #[tokio::test]
    async fn test_primary_success() {
        let primary = Arc::new(ScriptedBackend::new("k1", vec![Ok(2.0)]));
        let adapter = SynthesisAdapter::new(primary.clone());

        let clip = adapter.synthesize(&request(), &Ungated).await.unwrap();
        assert!((clip.duration_secs() - 2.0).abs() < 1e-3);
        assert_eq!(primary.calls(), 1);
        assert_eq!(adapter.usage().calls, 1);
    }

    #[tokio::test]
    async fn test_transient_fails_over_and_stays() {
        let primary = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Err(ServiceError::transient("429"))],
        ));
        let secondary = Arc::new(ScriptedBackend::new("k2", vec![Ok(1.0), Ok(1.5)]));
        let adapter = SynthesisAdapter::new(primary.clone()).with_secondary(secondary.clone());

        adapter.synthesize(&request(), &Ungated).await.unwrap();
        assert_eq!(adapter.active_slot(), 1);

        // Next request starts on the backup credential.
        adapter.synthesize(&request(), &Ungated).await.unwrap();
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 2);
        assert_eq!(adapter.usage().failovers, 1);
    }

    #[tokio::test]
    async fn test_both_credentials_fail() {
        let primary = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Err(ServiceError::transient("timeout"))],
        ));
        let secondary = Arc::new(ScriptedBackend::new(
            "k2",
            vec![Err(ServiceError::transient("timeout"))],
        ));
        let adapter = SynthesisAdapter::new(primary.clone()).with_secondary(secondary.clone());

        let err = adapter.synthesize(&request(), &Ungated).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 1);
        assert_eq!(adapter.usage().exhausted, 1);
    }

    #[tokio::test]
    async fn test_exhausted_skips_failover() {
        let primary = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Err(ServiceError::exhausted("invalid text"))],
        ));
        let secondary = Arc::new(ScriptedBackend::new("k2", vec![Ok(1.0)]));
        let adapter = SynthesisAdapter::new(primary).with_secondary(secondary.clone());

        assert!(adapter.synthesize(&request(), &Ungated).await.is_err());
        assert_eq!(secondary.calls(), 0);
        assert_eq!(adapter.active_slot(), 0);
    }

    #[tokio::test]
    async fn test_single_credential_transient_is_exhausted() {
        let primary = Arc::new(ScriptedBackend::new(
            "k1",
            vec![Err(ServiceError::transient("503"))],
        ));
        let adapter = SynthesisAdapter::new(primary.clone());

        let err = adapter.synthesize(&request(), &Ungated).await.unwrap_err();
        assert!(matches!(err, ServiceError::Exhausted { .. }));
        assert_eq!(primary.calls(), 1);
    }
}
