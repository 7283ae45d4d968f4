use std::io::BufWriter;
use std::path::Path;

use dubsync_engine::SyncConfig;
use dubsync_segment::{AudioClip, SegmentRecord, DEFAULT_SAMPLE_RATE};
use hound::{WavSpec, WavWriter};
use serde::Serialize;

use crate::{Result, TimelineError};

const MAX_FADE_SECS: f64 = 0.1;
/// Clip length kept when an overlap leaves no room at all.
const CRUSHED_CLIP_SECS: f64 = 0.2;
const CRUSHED_FADE_SECS: f64 = 0.05;

/// Where one segment's clip landed on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placement {
    pub segment_id: String,
    pub start: f64,
    /// First sample of the clip in [`Timeline::samples`].
    pub offset: usize,
    pub clip_secs: f64,
    pub placed_secs: f64,
    pub trimmed: bool,
}

/// Mixed output of a job.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
    /// In start order; records without audio have no placement.
    pub placements: Vec<Placement>,
}

impl Timeline {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn placement(&self, segment_id: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.segment_id == segment_id)
    }

    pub fn trimmed_count(&self) -> usize {
        self.placements.iter().filter(|p| p.trimmed).count()
    }

    /// Write the timeline as 16-bit mono PCM.
    pub fn write_wav(&self, path: impl AsRef<Path>) -> Result<()> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let file = std::fs::File::create(path.as_ref())?;
        let mut writer = WavWriter::new(BufWriter::new(file), spec)?;
        for &sample in &self.samples {
            let int_sample = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer.write_sample(int_sample)?;
        }
        writer.finalize()?;

        tracing::info!(
            path = %path.as_ref().display(),
            duration_secs = self.duration_secs(),
            "timeline_written"
        );
        Ok(())
    }
}

/// Assembles terminal records into one timeline.
#[derive(Debug, Clone)]
pub struct Aggregator {
    min_overlap_buffer: f64,
}

impl Aggregator {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            min_overlap_buffer: config.min_overlap_buffer,
        }
    }

    /// Cut `clip` (placed at `start`) so it ends `min_overlap_buffer` before
    /// `next_start`. Returns `None` when it already fits.
    pub fn repair_overlap(&self, clip: &AudioClip, start: f64, next_start: f64) -> Option<AudioClip> {
        let length = clip.duration_secs();
        let overlap = start + length - next_start;
        if overlap <= 0.0 {
            return None;
        }
        let allowed = length - overlap - self.min_overlap_buffer;
        if allowed > 0.0 {
            Some(clip.truncated(allowed, MAX_FADE_SECS.min(allowed / 10.0)))
        } else {
            Some(clip.truncated(CRUSHED_CLIP_SECS, CRUSHED_FADE_SECS))
        }
    }

    /// Mix every record's accepted clip at its start time.
    ///
    /// Fails if any record is not terminal. The timeline runs at the first
    /// clip's sample rate; other clips are resampled to it.
    pub fn assemble(&self, records: &[SegmentRecord]) -> Result<Timeline> {
        if let Some(open) = records.iter().find(|r| !r.is_terminal()) {
            return Err(TimelineError::NonTerminal(open.id().to_string()));
        }

        let mut ordered: Vec<&SegmentRecord> = records.iter().collect();
        ordered.sort_by(|a, b| a.start().total_cmp(&b.start()).then_with(|| a.id().cmp(b.id())));

        let sample_rate = ordered
            .iter()
            .find_map(|r| r.audio())
            .map(|clip| clip.sample_rate)
            .filter(|rate| *rate > 0)
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        let mut clips = Vec::with_capacity(ordered.len());
        for (i, record) in ordered.iter().enumerate() {
            let Some(clip) = record.audio() else {
                continue;
            };
            let clip = clip.resampled(sample_rate);
            let next_start = ordered.get(i + 1).map(|next| next.start());
            let repaired = next_start.and_then(|next| self.repair_overlap(&clip, record.start(), next));
            if let Some(cut) = &repaired {
                tracing::debug!(
                    segment = %record.id(),
                    from_secs = clip.duration_secs(),
                    to_secs = cut.duration_secs(),
                    "overlap_trimmed"
                );
            }
            let placement = Placement {
                segment_id: record.id().to_string(),
                start: record.start(),
                offset: (record.start() * sample_rate as f64).round() as usize,
                clip_secs: clip.duration_secs(),
                placed_secs: repaired.as_ref().unwrap_or(&clip).duration_secs(),
                trimmed: repaired.is_some(),
            };
            clips.push((placement, repaired.unwrap_or(clip)));
        }

        let last_end = ordered.iter().map(|r| r.end()).fold(0.0, f64::max);
        let end_samples = (last_end * sample_rate as f64).round() as usize;
        let len = clips
            .iter()
            .map(|(p, clip)| p.offset + clip.samples.len())
            .fold(end_samples, usize::max);

        let mut samples = vec![0.0f32; len];
        for (placement, clip) in &clips {
            for (dst, src) in samples[placement.offset..].iter_mut().zip(clip.samples.iter()) {
                *dst += *src;
            }
        }

        let placements: Vec<Placement> = clips.into_iter().map(|(p, _)| p).collect();
        let trimmed = placements.iter().filter(|p| p.trimmed).count();
        if trimmed > 0 {
            tracing::info!(trimmed, total = placements.len(), "overlaps_repaired");
        }

        Ok(Timeline {
            sample_rate,
            samples,
            placements,
        })
    }
}
