//! Core data model for dubbing synchronization.
//!
//! A [`SegmentRecord`] follows one subtitle cue from translated text to an
//! accepted audio clip. It carries:
//! - the immutable target window and texts
//! - the mutable working text and speech rate
//! - an append-only log of [`Attempt`]s
//! - the terminal [`Quality`] and accepted [`AudioClip`]

mod audio;
mod record;

pub use audio::{AudioClip, DEFAULT_SAMPLE_RATE};
pub use record::{Attempt, AttemptKind, Cue, Quality, RateBounds, SegmentRecord};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RecordError {
    #[error("segment {id}: invalid window {start}..{end}")]
    InvalidWindow { id: String, start: f64, end: f64 },

    #[error("invalid rate bounds {min}..{max}")]
    InvalidBounds { min: f64, max: f64 },

    #[error("segment {0} is already terminal")]
    Terminal(String),

    #[error("segment {id}: no attempt at index {index}")]
    UnknownAttempt { id: String, index: usize },
}

pub type Result<T> = std::result::Result<T, RecordError>;
