//! Per-segment and job-level diagnostics.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use dubsync_engine::{JobOutcome, JobUsage, SyncConfig};
use dubsync_segment::{AttemptKind, Quality, SegmentRecord};
use serde::Serialize;

use crate::mix::Timeline;
use crate::window::{available_windows, GapPolicy};
use crate::Result;

const SPEED_BUCKET_WIDTH: f64 = 0.05;
const TOO_SHORT_RATIO: f64 = 0.8;
const TOO_SHORT_MIN_GAP_SECS: f64 = 0.5;
const TOO_LONG_RATIO: f64 = 1.2;

#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub id: String,
    pub start: f64,
    pub end: f64,
    pub attempts_count: usize,
    pub synthesis_calls: u32,
    pub final_rate: f64,
    pub sync_ratio: Option<f64>,
    pub timing_error: Option<f64>,
    pub quality: Quality,
    pub audio_gap: bool,
    pub trimmed: bool,
    /// Longest clip the segment could take without crowding its successor.
    pub available_window: f64,
    pub actual_duration: Option<f64>,
    pub final_text: String,
}

impl SegmentReport {
    fn from_record(record: &SegmentRecord, trimmed: bool, available_window: f64) -> Self {
        Self {
            id: record.id().to_string(),
            start: record.start(),
            end: record.end(),
            attempts_count: record.attempts().len(),
            synthesis_calls: record.synthesis_calls(),
            final_rate: record.speech_rate(),
            sync_ratio: record.sync_ratio(),
            timing_error: record.accepted_attempt().map(|a| a.timing_error),
            quality: record.quality().unwrap_or(Quality::Failed),
            audio_gap: record.audio_gap(),
            trimmed,
            available_window,
            actual_duration: record.actual_duration(),
            final_text: record.working_text().to_string(),
        }
    }

    fn flag_reasons(&self) -> Vec<FlagReason> {
        let mut reasons = Vec::new();
        match self.quality {
            Quality::Failed => reasons.push(FlagReason::Failed),
            Quality::Degraded => reasons.push(FlagReason::Degraded),
            _ => {}
        }
        if self.audio_gap {
            reasons.push(FlagReason::AudioGap);
        }
        if self.trimmed {
            reasons.push(FlagReason::Trimmed);
        }
        if !self.audio_gap
            && self
                .actual_duration
                .is_some_and(|secs| secs > self.available_window + 1e-9)
        {
            reasons.push(FlagReason::ExceedsWindow);
        }
        if let Some(ratio) = self.sync_ratio {
            let short_by = (self.end - self.start) * (1.0 - ratio);
            if ratio < TOO_SHORT_RATIO && short_by > TOO_SHORT_MIN_GAP_SECS {
                reasons.push(FlagReason::TooShort);
            }
            if ratio > TOO_LONG_RATIO {
                reasons.push(FlagReason::TooLong);
            }
        }
        reasons
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    Failed,
    Degraded,
    /// Silence stands in for speech.
    AudioGap,
    Trimmed,
    /// Longer than the segment plus the usable gap after it.
    ExceedsWindow,
    TooShort,
    TooLong,
}

impl FlagReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Degraded => "degraded",
            Self::AudioGap => "audio_gap",
            Self::Trimmed => "trimmed",
            Self::ExceedsWindow => "exceeds_window",
            Self::TooShort => "too_short",
            Self::TooLong => "too_long",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedSegment {
    pub id: String,
    pub reasons: Vec<FlagReason>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateSpread {
    pub min: f64,
    pub max: f64,
    pub spread: f64,
    pub limit: f64,
    pub exceeds_limit: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeedBucket {
    pub from: f64,
    pub to: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub quality_distribution: BTreeMap<String, usize>,
    pub percent_converged: f64,
    pub percent_within_tolerance: f64,
    /// Synthesis calls per segment.
    pub average_iterations: f64,
    pub average_abs_timing_error: f64,
    pub usage: JobUsage,
    pub calibration_factor: f64,
    pub rate_spread: Option<RateSpread>,
    pub speed_distribution: Vec<SpeedBucket>,
    pub flagged: Vec<FlaggedSegment>,
    pub timeline_secs: f64,
    pub elapsed_ms: u64,
    pub segments: Vec<SegmentReport>,
}

impl JobReport {
    pub fn build(outcome: &JobOutcome, timeline: &Timeline, config: &SyncConfig) -> Self {
        let windows = available_windows(&outcome.records, GapPolicy::from_config(config));
        let segments: Vec<SegmentReport> = outcome
            .records
            .iter()
            .zip(windows)
            .map(|(record, window)| {
                let trimmed = timeline
                    .placement(record.id())
                    .is_some_and(|p| p.trimmed);
                SegmentReport::from_record(record, trimmed, window)
            })
            .collect();
        let total = segments.len();

        let mut quality_distribution = BTreeMap::new();
        for quality in [
            Quality::Converged,
            Quality::WithinToleranceFallback,
            Quality::Degraded,
            Quality::Failed,
        ] {
            let count = segments.iter().filter(|s| s.quality == quality).count();
            quality_distribution.insert(quality.as_str().to_string(), count);
        }

        let converged = quality_distribution[Quality::Converged.as_str()];
        let within = converged + quality_distribution[Quality::WithinToleranceFallback.as_str()];
        let errors: Vec<f64> = segments
            .iter()
            .filter_map(|s| s.timing_error)
            .map(f64::abs)
            .collect();

        // Rates of segments that produced speech.
        let rates: Vec<f64> = outcome
            .records
            .iter()
            .filter(|r| {
                r.accepted_attempt()
                    .is_some_and(|a| a.kind == AttemptKind::Synthesized)
            })
            .map(SegmentRecord::speech_rate)
            .collect();

        let flagged = segments
            .iter()
            .filter_map(|s| {
                let reasons = s.flag_reasons();
                (!reasons.is_empty()).then(|| FlaggedSegment {
                    id: s.id.clone(),
                    reasons,
                })
            })
            .collect();

        Self {
            job_id: outcome.job_id.clone(),
            generated_at: Utc::now(),
            total,
            percent_converged: percent(converged, total),
            percent_within_tolerance: percent(within, total),
            average_iterations: mean(segments.iter().map(|s| s.synthesis_calls as f64), total),
            average_abs_timing_error: mean(errors.iter().copied(), errors.len()),
            quality_distribution,
            usage: outcome.usage,
            calibration_factor: outcome.calibration,
            rate_spread: rate_spread(&rates, config.max_speed_variation),
            speed_distribution: speed_buckets(&rates, config.min_speed_ratio, config.max_speed_ratio),
            flagged,
            timeline_secs: timeline.duration_secs(),
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            segments,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        tracing::info!(path = %path.as_ref().display(), "report_written");
        Ok(())
    }

    /// Plain-text summary for terminals and logs.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Dubbing sync report ({})", self.job_id);
        let _ = writeln!(out, "Segments: {}", self.total);
        for (quality, count) in &self.quality_distribution {
            let _ = writeln!(out, "  {quality}: {count}");
        }
        let _ = writeln!(
            out,
            "Converged: {:.1}%  within tolerance: {:.1}%",
            self.percent_converged, self.percent_within_tolerance
        );
        let _ = writeln!(
            out,
            "Average iterations: {:.2}  average |timing error|: {:.1}%",
            self.average_iterations,
            self.average_abs_timing_error * 100.0
        );
        let _ = writeln!(
            out,
            "Synthesis calls: {}  failovers: {}  cache hits: {}  rewrites: {}  estimate skips: {}",
            self.usage.adapter.calls,
            self.usage.adapter.failovers,
            self.usage.adapter.cache_hits,
            self.usage.rewrites_applied,
            self.usage.estimate_skips
        );
        if let Some(spread) = &self.rate_spread {
            let _ = writeln!(
                out,
                "Speech rate: {:.3}..{:.3} (spread {:.3}{})",
                spread.min,
                spread.max,
                spread.spread,
                if spread.exceeds_limit { ", above limit" } else { "" }
            );
        }
        for bucket in &self.speed_distribution {
            let _ = writeln!(out, "  {:.2}-{:.2}: {}", bucket.from, bucket.to, bucket.count);
        }
        if !self.flagged.is_empty() {
            let _ = writeln!(out, "Flagged segments ({}):", self.flagged.len());
            for flagged in &self.flagged {
                let reasons: Vec<&str> = flagged.reasons.iter().map(FlagReason::as_str).collect();
                let _ = writeln!(out, "  {}: {}", flagged.id, reasons.join(", "));
            }
        }
        out
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    count as f64 * 100.0 / total as f64
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

fn rate_spread(rates: &[f64], limit: f64) -> Option<RateSpread> {
    let min = rates.iter().copied().min_by(f64::total_cmp)?;
    let max = rates.iter().copied().max_by(f64::total_cmp)?;
    let spread = max - min;
    Some(RateSpread {
        min,
        max,
        spread,
        limit,
        exceeds_limit: spread > limit + 1e-9,
    })
}

/// Fixed-width buckets over the rate bounds; the top bucket includes `max`.
fn speed_buckets(rates: &[f64], min: f64, max: f64) -> Vec<SpeedBucket> {
    let count = ((max - min) / SPEED_BUCKET_WIDTH - 1e-9).ceil().max(1.0) as usize;
    let mut buckets: Vec<SpeedBucket> = (0..count)
        .map(|i| SpeedBucket {
            from: min + i as f64 * SPEED_BUCKET_WIDTH,
            to: (min + (i + 1) as f64 * SPEED_BUCKET_WIDTH).min(max),
            count: 0,
        })
        .collect();
    for rate in rates {
        let index = (((rate - min) / SPEED_BUCKET_WIDTH + 1e-9).floor().max(0.0) as usize).min(count - 1);
        buckets[index].count += 1;
    }
    buckets
}
