//! Per-segment convergence state machine.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dubsync_estimator::{Calibration, DurationEstimator};
use dubsync_rewrite::{NoopRewriter, TextRewriter};
use dubsync_segment::{
    Attempt, AttemptKind, AudioClip, Quality, RateBounds, RecordError, SegmentRecord,
    DEFAULT_SAMPLE_RATE,
};
use dubsync_synthesis::{CallGate, SynthesisAdapter, SynthesisRequest};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::escalation::{default_strategies, Adjustment, AdjustmentContext, EscalationStrategy};
use crate::limiter::RateLimiter;
use crate::JobError;

/// Job-wide counters not owned by the adapter.
#[derive(Debug, Default)]
pub struct UsageCounters {
    pub synthesis_requests: AtomicU64,
    pub rewrites_applied: AtomicU64,
    pub estimate_skips: AtomicU64,
    pub service_exhaustions: AtomicU64,
}

/// Counts segments lost to service exhaustion in a row.
#[derive(Debug)]
pub struct OutageMonitor {
    consecutive: AtomicU32,
    threshold: u32,
    tripped: AtomicBool,
}

impl OutageMonitor {
    /// `threshold == 0` disables the monitor.
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: AtomicU32::new(0),
            threshold,
            tripped: AtomicBool::new(false),
        }
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::Relaxed);
    }

    /// Returns true when this failure trips the monitor.
    pub fn record_failure(&self) -> bool {
        let count = self.consecutive.fetch_add(1, Ordering::Relaxed) + 1;
        if self.threshold == 0 || count < self.threshold {
            return false;
        }
        !self.tripped.swap(true, Ordering::AcqRel)
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }
}

/// Everything a controller shares with the rest of the job.
pub struct JobContext {
    pub config: SyncConfig,
    pub bounds: RateBounds,
    pub voice: String,
    pub language: String,
    pub estimator: DurationEstimator,
    /// Fixed while a job runs; see [`JobContext::learn_from`].
    pub calibration: Arc<Calibration>,
    pub adapter: Arc<SynthesisAdapter>,
    pub gate: Arc<dyn CallGate>,
    pub strategies: Vec<Arc<dyn EscalationStrategy>>,
    pub cancel: CancellationToken,
    pub usage: UsageCounters,
    pub outages: OutageMonitor,
    /// Sample rate of silence that stands in for failed segments.
    pub silence_sample_rate: u32,
}

impl JobContext {
    /// Validates `config` (after applying its optimization mode) and sets up
    /// a rate limiter and the default strategies with no rewriter.
    pub fn new(config: SyncConfig, adapter: Arc<SynthesisAdapter>) -> Result<Self, JobError> {
        let config = config.resolved();
        config.validate()?;
        let bounds = config.rate_bounds()?;
        Ok(Self {
            bounds,
            voice: String::new(),
            language: "en".to_string(),
            estimator: DurationEstimator::default(),
            calibration: Arc::new(Calibration::default()),
            adapter,
            gate: Arc::new(RateLimiter::new(&config.rate_limit)),
            strategies: default_strategies(Arc::new(NoopRewriter)),
            cancel: CancellationToken::new(),
            usage: UsageCounters::default(),
            outages: OutageMonitor::new(config.max_consecutive_outages),
            silence_sample_rate: DEFAULT_SAMPLE_RATE,
            config,
        })
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Use the default strategy order with `rewriter` for text changes.
    pub fn with_rewriter(mut self, rewriter: Arc<dyn TextRewriter>) -> Self {
        self.strategies = default_strategies(rewriter);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<Arc<dyn EscalationStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn CallGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_calibration(mut self, calibration: Arc<Calibration>) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_estimator(mut self, estimator: DurationEstimator) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_silence_sample_rate(mut self, sample_rate: u32) -> Self {
        self.silence_sample_rate = sample_rate;
        self
    }

    /// Fold converged segments into the calibration factor, in the order
    /// given. Returns how many were observed.
    ///
    /// Controllers only read the factor; the scheduler calls this once every
    /// segment is terminal.
    pub fn learn_from(&self, records: &[SegmentRecord]) -> usize {
        let mut observed = 0;
        for record in records {
            if record.quality() != Some(Quality::Converged) {
                continue;
            }
            let Some(attempt) = record.accepted_attempt() else {
                continue;
            };
            let raw = self
                .estimator
                .raw_estimate(&attempt.working_text, &self.language, attempt.speech_rate);
            if raw > 0.0 {
                self.calibration.observe(attempt.measured_duration / raw);
                observed += 1;
            }
        }
        observed
    }
}

/// Why a controller stopped without converging.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum ExhaustReason {
    BudgetSpent,
    /// The next adjustment would repeat the previous input.
    NoProgress,
    ServiceExhausted(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Converged,
    Exhausted(ExhaustReason),
}

enum State {
    Estimating,
    Synthesizing,
    Measuring(AudioClip),
    Adjusting { measured: f64 },
    Converged,
    Exhausted(ExhaustReason),
}

struct Best {
    index: usize,
    abs_error: f64,
    clip: AudioClip,
}

/// Drives one [`SegmentRecord`] from its first estimate to a terminal quality.
pub struct ConvergenceController<'a> {
    ctx: &'a JobContext,
}

impl<'a> ConvergenceController<'a> {
    pub fn new(ctx: &'a JobContext) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, record: &mut SegmentRecord) -> Result<Termination, RecordError> {
        let ctx = self.ctx;
        let budget = ctx.config.synthesis_budget();
        let target = record.target_duration();
        let mut calls = 0u32;
        let mut rewrites = 0u32;
        let mut best: Option<Best> = None;
        let mut estimated: Option<usize> = None;
        let mut state = if ctx.config.estimation_enabled() {
            State::Estimating
        } else {
            State::Synthesizing
        };

        loop {
            let starts_work = matches!(
                state,
                State::Estimating | State::Synthesizing | State::Adjusting { .. }
            );
            if starts_work && ctx.cancel.is_cancelled() {
                state = State::Exhausted(ExhaustReason::Cancelled);
            }

            state = match state {
                State::Estimating => {
                    estimated = Some(self.estimate(record, &mut rewrites).await?);
                    if budget == 0 {
                        State::Exhausted(ExhaustReason::BudgetSpent)
                    } else {
                        State::Synthesizing
                    }
                }
                State::Synthesizing if calls >= budget => {
                    State::Exhausted(ExhaustReason::BudgetSpent)
                }
                State::Synthesizing => {
                    calls += 1;
                    record.note_synthesis_call()?;
                    ctx.usage.synthesis_requests.fetch_add(1, Ordering::Relaxed);
                    let request = SynthesisRequest {
                        text: record.working_text().to_string(),
                        rate: record.speech_rate(),
                        voice: ctx.voice.clone(),
                        language: ctx.language.clone(),
                    };
                    match ctx.adapter.synthesize(&request, ctx.gate.as_ref()).await {
                        Ok(clip) => {
                            ctx.outages.record_success();
                            State::Measuring(clip)
                        }
                        Err(e) => {
                            tracing::warn!(segment = %record.id(), error = %e, "synthesis_exhausted");
                            ctx.usage.service_exhaustions.fetch_add(1, Ordering::Relaxed);
                            if ctx.outages.record_failure() {
                                tracing::error!(
                                    consecutive = ctx.outages.consecutive(),
                                    "service_outage_detected"
                                );
                                ctx.cancel.cancel();
                            }
                            State::Exhausted(ExhaustReason::ServiceExhausted(e.to_string()))
                        }
                    }
                }
                State::Measuring(clip) => {
                    let measured = clip.duration_secs();
                    let attempt = Attempt::new(
                        AttemptKind::Synthesized,
                        record.working_text(),
                        record.speech_rate(),
                        measured,
                        target,
                    );
                    let error = attempt.timing_error;
                    let index = record.push_attempt(attempt)?;
                    tracing::debug!(
                        segment = %record.id(),
                        attempt = index,
                        rate = record.speech_rate(),
                        measured,
                        target,
                        error,
                        "attempt_measured"
                    );

                    if error.abs() <= ctx.config.sync_tolerance {
                        record.accept(index, Quality::Converged, clip, false)?;
                        State::Converged
                    } else {
                        if best.as_ref().map_or(true, |b| error.abs() < b.abs_error) {
                            best = Some(Best {
                                index,
                                abs_error: error.abs(),
                                clip,
                            });
                        }
                        if calls >= budget {
                            State::Exhausted(ExhaustReason::BudgetSpent)
                        } else {
                            State::Adjusting { measured }
                        }
                    }
                }
                State::Adjusting { measured } => {
                    match self.propose(record, measured, rewrites, false).await {
                        Some(adjustment) if !self.repeats_input(record, &adjustment) => {
                            tracing::debug!(
                                segment = %record.id(),
                                strategy = adjustment.strategy,
                                rate = adjustment.rate,
                                "adjustment_applied"
                            );
                            if let Some(text) = adjustment.text {
                                record.set_working_text(text)?;
                                rewrites += 1;
                                ctx.usage.rewrites_applied.fetch_add(1, Ordering::Relaxed);
                            }
                            record.set_speech_rate(adjustment.rate)?;
                            State::Synthesizing
                        }
                        _ => State::Exhausted(ExhaustReason::NoProgress),
                    }
                }
                State::Converged => {
                    tracing::info!(
                        segment = %record.id(),
                        attempts = record.attempts().len(),
                        rate = record.speech_rate(),
                        ratio = record.sync_ratio().unwrap_or_default(),
                        "segment_converged"
                    );
                    return Ok(Termination::Converged);
                }
                State::Exhausted(reason) => {
                    self.settle(record, &reason, best.take(), estimated)?;
                    tracing::info!(
                        segment = %record.id(),
                        reason = ?reason,
                        quality = %record.quality().unwrap_or(Quality::Failed),
                        attempts = record.attempts().len(),
                        "segment_exhausted"
                    );
                    return Ok(Termination::Exhausted(reason));
                }
            };
        }
    }

    /// Seed the rate from a local estimate and log it as an attempt.
    /// Out-of-bounds estimates get a text rewrite before any synthesis.
    async fn estimate(&self, record: &mut SegmentRecord, rewrites: &mut u32) -> Result<usize, RecordError> {
        let ctx = self.ctx;
        let factor = ctx.calibration.factor();
        let target = record.target_duration();
        let text = record.working_text().to_string();

        let implied = ctx.estimator.implied_rate(&text, &ctx.language, target, factor);
        let seed = record.set_speech_rate(implied)?;
        let predicted = ctx.estimator.estimate(&text, &ctx.language, seed, factor);
        let index = record.push_attempt(Attempt::new(
            AttemptKind::Estimated,
            text.as_str(),
            seed,
            predicted,
            target,
        ))?;
        tracing::debug!(segment = %record.id(), implied, seed, predicted, "segment_estimated");

        if implied > 0.0 && !ctx.bounds.contains(implied) {
            ctx.usage.estimate_skips.fetch_add(1, Ordering::Relaxed);
            if let Some(adjustment) = self.propose(record, predicted, *rewrites, true).await {
                if let Some(new_text) = adjustment.text {
                    let reseeded =
                        ctx.estimator
                            .implied_rate(&new_text, &ctx.language, target, factor);
                    record.set_working_text(new_text)?;
                    record.set_speech_rate(reseeded)?;
                    *rewrites += 1;
                    ctx.usage.rewrites_applied.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(index)
    }

    /// First proposal from the strategy list.
    async fn propose(
        &self,
        record: &SegmentRecord,
        measured: f64,
        rewrites_used: u32,
        text_only: bool,
    ) -> Option<Adjustment> {
        let ctx = self.ctx;
        let adjust = AdjustmentContext {
            segment_id: record.id(),
            text: record.working_text(),
            language: &ctx.language,
            rate: record.speech_rate(),
            measured,
            target: record.target_duration(),
            tolerance: ctx.config.sync_tolerance,
            bounds: ctx.bounds,
            policy: &ctx.config.escalation,
            rewrites_used,
        };
        for strategy in &ctx.strategies {
            if text_only && !strategy.adjusts_text() {
                continue;
            }
            if let Some(adjustment) = strategy.propose(&adjust).await {
                return Some(adjustment);
            }
        }
        None
    }

    fn repeats_input(&self, record: &SegmentRecord, adjustment: &Adjustment) -> bool {
        let same_text = adjustment
            .text
            .as_deref()
            .map_or(true, |t| t == record.working_text());
        let same_rate = (self.ctx.bounds.clamp(adjustment.rate) - record.speech_rate()).abs() < 1e-9;
        same_text && same_rate
    }

    /// Accept the best available attempt for a segment that did not converge,
    /// or silence of the target length when the service was exhausted.
    fn settle(
        &self,
        record: &mut SegmentRecord,
        reason: &ExhaustReason,
        best: Option<Best>,
        estimated: Option<usize>,
    ) -> Result<(), RecordError> {
        let fallback = self.ctx.config.fallback_tolerance();
        let grade = |abs_error: f64| {
            if abs_error <= fallback {
                Quality::WithinToleranceFallback
            } else {
                Quality::Degraded
            }
        };

        let target = record.target_duration();
        let silence = AudioClip::silence(target, self.ctx.silence_sample_rate);
        // A service that gave up always leaves a flagged gap, even after an
        // earlier measured attempt.
        let service_failed = matches!(reason, ExhaustReason::ServiceExhausted(_));
        if !service_failed {
            if let Some(best) = best {
                return record.accept(best.index, grade(best.abs_error), best.clip, false);
            }
            if let Some(index) = estimated {
                let abs_error = record.attempts()[index].timing_error.abs();
                return record.accept(index, grade(abs_error), silence, true);
            }
        }

        let fill = Attempt::new(
            AttemptKind::SilenceFill,
            record.working_text(),
            record.speech_rate(),
            target,
            target,
        );
        let index = record.push_attempt(fill)?;
        tracing::warn!(segment = %record.id(), duration = target, "segment_silence_filled");
        record.accept(index, Quality::Degraded, silence, true)
    }
}
