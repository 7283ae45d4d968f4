//! Speech synthesis boundary.
//!
//! - [`SpeechBackend`]: one credential's client for a TTS service
//! - [`SynthesisAdapter`]: two credential slots with failover, optional cache
//! - [`CallGate`]: admission control supplied by the caller (rate limiting)
//! - [`minimax`]: HTTP backend for the MiniMax t2a_v2 API
//! - [`stub`]: deterministic backends for tests and dry runs

mod adapter;
pub mod minimax;
pub mod stub;
mod wav;

pub use adapter::{AdapterUsage, SynthesisAdapter};
pub use wav::{decode_audio_payload, decode_wav, encode_wav};

use async_trait::async_trait;
use dubsync_segment::AudioClip;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ServiceError {
    /// Worth retrying, possibly with another credential.
    #[error("transient synthesis failure: {message}")]
    Transient { message: String },

    /// Not worth retrying.
    #[error("synthesis exhausted: {message}")]
    Exhausted { message: String },
}

impl ServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::Exhausted {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message } | Self::Exhausted { message } => message,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// One synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    /// Speech rate multiplier, 1.0 is the voice's natural pace.
    pub rate: f64,
    pub voice: String,
    pub language: String,
}

impl SynthesisRequest {
    /// Rate rounded to thousandths, used for cache keys.
    pub fn rate_key(&self) -> i64 {
        (self.rate * 1000.0).round() as i64
    }
}

/// Client for a TTS service bound to a single credential.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioClip>;

    /// Label for logs (never the credential itself).
    fn name(&self) -> &str;
}

/// Admission control awaited before every backend call.
#[async_trait]
pub trait CallGate: Send + Sync {
    async fn admit(&self);
}

/// Gate that admits immediately.
pub struct Ungated;

#[async_trait]
impl CallGate for Ungated {
    async fn admit(&self) {}
}

#[derive(Debug, thiserror::Error)]
#[error("clip cache error: {0}")]
pub struct CacheError(pub String);

/// Persistent store of previously synthesized clips.
pub trait ClipStore: Send + Sync {
    fn load(&self, request: &SynthesisRequest) -> std::result::Result<Option<AudioClip>, CacheError>;

    fn store(&self, request: &SynthesisRequest, clip: &AudioClip) -> std::result::Result<(), CacheError>;
}
