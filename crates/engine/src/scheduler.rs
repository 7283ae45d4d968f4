//! Bounded worker pool running one controller per segment.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dubsync_segment::{Cue, Quality, SegmentRecord};
use dubsync_synthesis::AdapterUsage;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::controller::{ConvergenceController, JobContext};
use crate::progress::{NullProgress, ProgressEvent, ProgressSinkRef};
use crate::JobError;

/// Service usage over a whole job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobUsage {
    /// Synthesis requests issued by controllers (a failover retry is one request).
    pub synthesis_requests: u64,
    pub adapter: AdapterUsage,
    pub rewrites_applied: u64,
    pub estimate_skips: u64,
    pub service_exhaustions: u64,
}

/// Terminal records of a job, ordered by start time.
#[derive(Debug)]
pub struct JobOutcome {
    pub job_id: String,
    pub records: Vec<SegmentRecord>,
    pub usage: JobUsage,
    pub calibration: f64,
    pub elapsed: Duration,
}

impl JobOutcome {
    /// Records a controller actually processed.
    pub fn completed(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.quality() != Some(Quality::Failed))
            .count()
    }
}

pub struct Scheduler {
    ctx: Arc<JobContext>,
    progress: ProgressSinkRef,
}

type Queue = Arc<Mutex<mpsc::Receiver<SegmentRecord>>>;

impl Scheduler {
    pub fn new(ctx: JobContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            progress: Arc::new(NullProgress),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSinkRef) -> Self {
        self.progress = progress;
        self
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    /// Build records from cues (ids must be unique) and run them.
    pub async fn run(&self, cues: Vec<Cue>) -> Result<JobOutcome, JobError> {
        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(cues.len());
        for cue in cues {
            if !seen.insert(cue.id.clone()) {
                return Err(JobError::InvalidInput(format!("duplicate segment id {}", cue.id)));
            }
            let record = SegmentRecord::new(cue, self.ctx.bounds)
                .map_err(|e| JobError::InvalidInput(e.to_string()))?;
            records.push(record);
        }
        self.run_records(records).await
    }

    pub async fn run_records(&self, records: Vec<SegmentRecord>) -> Result<JobOutcome, JobError> {
        let started = Instant::now();
        let job_id = Uuid::new_v4().to_string();
        let total = records.len();
        let workers = self.ctx.config.max_concurrent_workers.clamp(1, total.max(1));

        self.progress.emit(ProgressEvent::JobStarted {
            job_id: job_id.clone(),
            total,
            workers,
        });
        tracing::info!(job = %job_id, total, workers, "job_scheduled");

        // Fresh copies stand in for records lost with a failed worker task.
        let originals = records.clone();
        let (queue_tx, queue_rx) = mpsc::channel(total.max(1));
        for record in records {
            if let Err(e) = queue_tx.try_send(record) {
                tracing::error!(error = %e, "segment_not_queued");
            }
        }
        drop(queue_tx);
        let queue: Queue = Arc::new(Mutex::new(queue_rx));

        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let completed = Arc::new(AtomicUsize::new(0));
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let ctx = Arc::clone(&self.ctx);
            let queue = Arc::clone(&queue);
            let done_tx = done_tx.clone();
            let progress = Arc::clone(&self.progress);
            let completed = Arc::clone(&completed);
            pool.spawn(async move {
                while !ctx.cancel.is_cancelled() {
                    let next = queue.lock().await.recv().await;
                    let Some(mut record) = next else {
                        break;
                    };

                    let termination = ConvergenceController::new(&ctx).run(&mut record).await;
                    if let Err(e) = &termination {
                        tracing::error!(worker, segment = %record.id(), error = %e, "controller_failed");
                    }
                    if !record.is_terminal() {
                        let _ = record.fail();
                    }

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    progress.emit(ProgressEvent::SegmentFinished {
                        segment_id: record.id().to_string(),
                        quality: record.quality().unwrap_or(Quality::Failed),
                        attempts: record.attempts().len(),
                        completed: done,
                        total,
                    });
                    if done_tx.send(record).is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);

        let mut worker_failure = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "worker_task_failed");
                worker_failure.get_or_insert_with(|| e.to_string());
            }
        }

        let mut finished = Vec::with_capacity(total);
        while let Ok(record) = done_rx.try_recv() {
            finished.push(record);
        }
        // Records never picked up because the job stopped early.
        let mut left = queue.lock().await;
        while let Ok(mut record) = left.try_recv() {
            let _ = record.fail();
            finished.push(record);
        }
        drop(left);
        let seen: HashSet<String> = finished.iter().map(|r| r.id().to_string()).collect();
        for mut record in originals {
            if !seen.contains(record.id()) {
                let _ = record.fail();
                finished.push(record);
            }
        }

        finished.sort_by(|a, b| {
            a.start()
                .total_cmp(&b.start())
                .then_with(|| a.id().cmp(b.id()))
        });
        let learned = self.ctx.learn_from(&finished);
        tracing::debug!(
            learned,
            factor = self.ctx.calibration.factor(),
            "calibration_updated"
        );

        let outcome = JobOutcome {
            job_id: job_id.clone(),
            records: finished,
            usage: self.usage(),
            calibration: self.ctx.calibration.factor(),
            elapsed: started.elapsed(),
        };
        let cancelled = self.ctx.cancel.is_cancelled();
        self.progress.emit(ProgressEvent::JobFinished {
            job_id,
            completed: outcome.completed(),
            total,
            cancelled,
        });

        if self.ctx.outages.is_tripped() {
            return Err(JobError::ServiceOutage {
                consecutive: self.ctx.config.max_consecutive_outages,
                outcome: Box::new(outcome),
            });
        }
        if let Some(message) = worker_failure {
            return Err(JobError::Worker {
                message,
                outcome: Box::new(outcome),
            });
        }
        if cancelled {
            return Err(JobError::Cancelled {
                outcome: Box::new(outcome),
            });
        }

        tracing::info!(
            job = %outcome.job_id,
            segments = total,
            requests = outcome.usage.synthesis_requests,
            elapsed_ms = outcome.elapsed.as_millis() as u64,
            "job_completed"
        );
        Ok(outcome)
    }

    fn usage(&self) -> JobUsage {
        let usage = &self.ctx.usage;
        JobUsage {
            synthesis_requests: usage.synthesis_requests.load(Ordering::Relaxed),
            adapter: self.ctx.adapter.usage(),
            rewrites_applied: usage.rewrites_applied.load(Ordering::Relaxed),
            estimate_skips: usage.estimate_skips.load(Ordering::Relaxed),
            service_exhaustions: usage.service_exhaustions.load(Ordering::Relaxed),
        }
    }
}
