//! Progress notifications for a running job.

use std::sync::{Arc, Mutex};

use dubsync_segment::Quality;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    JobStarted {
        job_id: String,
        total: usize,
        workers: usize,
    },
    SegmentFinished {
        segment_id: String,
        quality: Quality,
        attempts: usize,
        completed: usize,
        total: usize,
    },
    JobFinished {
        job_id: String,
        completed: usize,
        total: usize,
        cancelled: bool,
    },
}

impl ProgressEvent {
    /// Completed fraction in `[0, 1]`, where meaningful.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            Self::SegmentFinished {
                completed, total, ..
            }
            | Self::JobFinished {
                completed, total, ..
            } if *total > 0 => Some(*completed as f64 / *total as f64),
            _ => None,
        }
    }
}

/// Receiver of progress events. Called from worker tasks.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

pub type ProgressSinkRef = Arc<dyn ProgressSink>;

/// Captures events for inspection in tests.
#[derive(Default)]
pub struct InMemoryProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().expect("progress mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("progress mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().expect("progress mutex poisoned").is_empty()
    }
}

impl ProgressSink for InMemoryProgress {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().expect("progress mutex poisoned").push(event);
    }
}

/// Discards all events.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Logs events through `tracing`.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::JobStarted {
                job_id,
                total,
                workers,
            } => tracing::info!(job = %job_id, total, workers, "job_started"),
            ProgressEvent::SegmentFinished {
                segment_id,
                quality,
                completed,
                total,
                ..
            } => tracing::info!(
                segment = %segment_id,
                quality = %quality,
                progress = format!("{completed}/{total}"),
                "segment_finished"
            ),
            ProgressEvent::JobFinished {
                job_id,
                completed,
                total,
                cancelled,
            } => tracing::info!(job = %job_id, completed, total, cancelled, "job_finished"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_progress() {
        let sink = InMemoryProgress::new();
        sink.emit(ProgressEvent::JobStarted {
            job_id: "j".into(),
            total: 2,
            workers: 1,
        });
        sink.emit(ProgressEvent::SegmentFinished {
            segment_id: "1".into(),
            quality: Quality::Converged,
            attempts: 1,
            completed: 1,
            total: 2,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events()[1].fraction(), Some(0.5));
        assert_eq!(sink.events()[0].fraction(), None);
    }

    #[test]
    fn test_event_json_shape() {
        let event = ProgressEvent::SegmentFinished {
            segment_id: "7".into(),
            quality: Quality::WithinToleranceFallback,
            attempts: 3,
            completed: 4,
            total: 10,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "segment_finished");
        assert_eq!(json["quality"], "within_tolerance_fallback");
    }
}
