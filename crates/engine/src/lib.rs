//! Timing-synchronization engine for dubbing.
//!
//! Each segment runs a [`ConvergenceController`]: estimate, synthesize,
//! measure, adjust rate or text, repeat until the clip fits its window or
//! the budget runs out. A [`Scheduler`] runs controllers on a bounded worker
//! pool behind a shared [`RateLimiter`], and stops the job on cancellation or
//! a sustained service outage.

mod config;
mod controller;
pub mod escalation;
mod limiter;
pub mod progress;
mod scheduler;

pub use config::{ConfigError, EscalationPolicy, OptimizationMode, RateLimitConfig, SyncConfig};
pub use controller::{
    ConvergenceController, ExhaustReason, JobContext, OutageMonitor, Termination, UsageCounters,
};
pub use limiter::RateLimiter;
pub use progress::{InMemoryProgress, NullProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use scheduler::{JobOutcome, JobUsage, Scheduler};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job cancelled after {} of {} segments", .outcome.completed(), .outcome.records.len())]
    Cancelled { outcome: Box<JobOutcome> },

    #[error("synthesis service outage: {consecutive} consecutive segments lost")]
    ServiceOutage {
        consecutive: u32,
        outcome: Box<JobOutcome>,
    },

    #[error("worker task failed: {message}")]
    Worker {
        message: String,
        outcome: Box<JobOutcome>,
    },
}

impl JobError {
    /// Partial results of a job that stopped early.
    pub fn outcome(&self) -> Option<&JobOutcome> {
        match self {
            Self::Cancelled { outcome }
            | Self::ServiceOutage { outcome, .. }
            | Self::Worker { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
