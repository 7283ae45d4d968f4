//! Final assembly of a dubbing job.
//!
//! Takes terminal records in start order, trims clips that would run into
//! the next segment, mixes them onto one timeline and builds the job report.

mod mix;
mod report;
mod window;

pub use mix::{Aggregator, Placement, Timeline};
pub use report::{FlagReason, FlaggedSegment, JobReport, RateSpread, SegmentReport, SpeedBucket};
pub use window::{available_windows, GapPolicy};

#[derive(Debug, thiserror::Error)]
pub enum TimelineError {
    #[error("segment {0} has not reached a terminal state")]
    NonTerminal(String),

    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TimelineError>;
