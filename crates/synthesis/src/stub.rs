//! Deterministic backends that produce tone clips of a modelled duration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dubsync_segment::AudioClip;

use crate::{Result, ServiceError, SpeechBackend, SynthesisRequest};

/// Sample rate of stub clips; low to keep tests light.
pub const STUB_SAMPLE_RATE: u32 = 8000;

const TONE_LEVEL: f32 = 0.1;

fn tone(duration_secs: f64, sample_rate: u32) -> AudioClip {
    let len = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
    AudioClip::new(sample_rate, vec![TONE_LEVEL; len])
}

/// Backend whose clip duration is a pure function of the request.
///
/// The same `(text, rate)` always yields the same clip.
pub struct FnBackend<F> {
    name: String,
    model: F,
    sample_rate: u32,
    calls: AtomicU64,
}

impl<F> FnBackend<F>
where
    F: Fn(&SynthesisRequest) -> Result<f64> + Send + Sync,
{
    pub fn new(name: impl Into<String>, model: F) -> Self {
        Self {
            name: name.into(),
            model,
            sample_rate: STUB_SAMPLE_RATE,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<F> SpeechBackend for FnBackend<F>
where
    F: Fn(&SynthesisRequest) -> Result<f64> + Send + Sync,
{
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioClip> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let duration = (self.model)(request)?;
        Ok(tone(duration, self.sample_rate))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Duration model of a speaker at `words_per_second` with a fixed lead-in.
pub fn words_model(
    words_per_second: f64,
    overhead_secs: f64,
) -> impl Fn(&SynthesisRequest) -> Result<f64> + Send + Sync {
    move |request| {
        let words = request.text.split_whitespace().count();
        if words == 0 {
            return Err(ServiceError::exhausted("empty text"));
        }
        Ok(words as f64 / words_per_second / request.rate + overhead_secs)
    }
}

/// Backend replaying a fixed sequence of outcomes (durations or errors).
pub struct ScriptedBackend {
    name: String,
    script: Mutex<VecDeque<Result<f64>>>,
    calls: AtomicU64,
}

impl ScriptedBackend {
    pub fn new(name: impl Into<String>, script: Vec<Result<f64>>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(script.into()),
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<AudioClip> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let next = self
            .script
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(ServiceError::exhausted("script finished")));
        next.map(|duration| tone(duration, STUB_SAMPLE_RATE))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
