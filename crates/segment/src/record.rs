use serde::{Deserialize, Serialize};

use crate::{AudioClip, RecordError, Result};

/// One subtitle cue as handed to the engine after translation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cue {
    pub id: String,
    /// Window start in seconds.
    pub start: f64,
    /// Window end in seconds.
    pub end: f64,
    #[serde(default)]
    pub source_text: String,
    pub translated_text: String,
}

/// Inclusive speech-rate bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateBounds {
    min: f64,
    max: f64,
}

impl RateBounds {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min <= 0.0 || min > max {
            return Err(RecordError::InvalidBounds { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn clamp(&self, rate: f64) -> f64 {
        if rate.is_nan() {
            return 1.0_f64.clamp(self.min, self.max);
        }
        rate.clamp(self.min, self.max)
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.min && rate <= self.max
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttemptKind {
    /// Duration predicted locally, no service call.
    Estimated,
    /// Duration measured from synthesized audio.
    Synthesized,
    /// Silence standing in for speech after the service gave up.
    SilenceFill,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attempt {
    pub kind: AttemptKind,
    pub working_text: String,
    pub speech_rate: f64,
    pub measured_duration: f64,
    /// `(measured - target) / target`.
    pub timing_error: f64,
}

impl Attempt {
    pub fn new(
        kind: AttemptKind,
        working_text: impl Into<String>,
        speech_rate: f64,
        measured_duration: f64,
        target_duration: f64,
    ) -> Self {
        Self {
            kind,
            working_text: working_text.into(),
            speech_rate,
            measured_duration,
            timing_error: (measured_duration - target_duration) / target_duration,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Converged,
    WithinToleranceFallback,
    Degraded,
    Failed,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::WithinToleranceFallback => "within_tolerance_fallback",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A subtitle segment moving through synthesis.
///
/// Fields are private: the window and texts are fixed at creation, the
/// attempt log only grows, and once a quality is assigned no further
/// mutation is accepted.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentRecord {
    id: String,
    start: f64,
    end: f64,
    target_duration: f64,
    source_text: String,
    translated_text: String,
    working_text: String,
    speech_rate: f64,
    bounds: RateBounds,
    attempts: Vec<Attempt>,
    synthesis_calls: u32,
    accepted: Option<usize>,
    actual_duration: Option<f64>,
    quality: Option<Quality>,
    audio_gap: bool,
    #[serde(skip)]
    audio: Option<AudioClip>,
}

impl SegmentRecord {
    pub fn new(cue: Cue, bounds: RateBounds) -> Result<Self> {
        let valid = cue.start.is_finite() && cue.end.is_finite() && cue.start >= 0.0;
        if !valid || cue.end <= cue.start {
            return Err(RecordError::InvalidWindow {
                id: cue.id,
                start: cue.start,
                end: cue.end,
            });
        }

        Ok(Self {
            target_duration: cue.end - cue.start,
            working_text: cue.translated_text.clone(),
            speech_rate: bounds.clamp(1.0),
            id: cue.id,
            start: cue.start,
            end: cue.end,
            source_text: cue.source_text,
            translated_text: cue.translated_text,
            bounds,
            attempts: Vec::new(),
            synthesis_calls: 0,
            accepted: None,
            actual_duration: None,
            quality: None,
            audio_gap: false,
            audio: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn target_duration(&self) -> f64 {
        self.target_duration
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn translated_text(&self) -> &str {
        &self.translated_text
    }

    pub fn working_text(&self) -> &str {
        &self.working_text
    }

    pub fn speech_rate(&self) -> f64 {
        self.speech_rate
    }

    pub fn bounds(&self) -> RateBounds {
        self.bounds
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn synthesis_calls(&self) -> u32 {
        self.synthesis_calls
    }

    pub fn accepted_attempt(&self) -> Option<&Attempt> {
        self.accepted.and_then(|i| self.attempts.get(i))
    }

    pub fn actual_duration(&self) -> Option<f64> {
        self.actual_duration
    }

    /// `actual_duration / target_duration`, once an attempt is accepted.
    pub fn sync_ratio(&self) -> Option<f64> {
        self.actual_duration.map(|d| d / self.target_duration)
    }

    pub fn quality(&self) -> Option<Quality> {
        self.quality
    }

    pub fn is_terminal(&self) -> bool {
        self.quality.is_some()
    }

    /// True when the accepted audio is silence standing in for speech.
    pub fn audio_gap(&self) -> bool {
        self.audio_gap
    }

    pub fn audio(&self) -> Option<&AudioClip> {
        self.audio.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_terminal() {
            return Err(RecordError::Terminal(self.id.clone()));
        }
        Ok(())
    }

    pub fn set_working_text(&mut self, text: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        self.working_text = text.into();
        Ok(())
    }

    /// Set the speech rate, clamped into the record's bounds. Returns the stored value.
    pub fn set_speech_rate(&mut self, rate: f64) -> Result<f64> {
        self.ensure_open()?;
        self.speech_rate = self.bounds.clamp(rate);
        Ok(self.speech_rate)
    }

    pub fn note_synthesis_call(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.synthesis_calls += 1;
        Ok(())
    }

    /// Append to the attempt log. Returns the attempt's index.
    pub fn push_attempt(&mut self, mut attempt: Attempt) -> Result<usize> {
        self.ensure_open()?;
        attempt.speech_rate = self.bounds.clamp(attempt.speech_rate);
        self.attempts.push(attempt);
        Ok(self.attempts.len() - 1)
    }

    /// Accept one logged attempt and finish the record.
    ///
    /// `audio_gap` marks `audio` as silence standing in for speech.
    pub fn accept(
        &mut self,
        index: usize,
        quality: Quality,
        audio: AudioClip,
        audio_gap: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let attempt = self
            .attempts
            .get(index)
            .ok_or_else(|| RecordError::UnknownAttempt {
                id: self.id.clone(),
                index,
            })?;

        self.actual_duration = Some(attempt.measured_duration);
        self.working_text = attempt.working_text.clone();
        self.speech_rate = attempt.speech_rate;
        self.accepted = Some(index);
        self.quality = Some(quality);
        self.audio = Some(audio);
        self.audio_gap = audio_gap;
        Ok(())
    }

    /// Mark a record that was never processed (e.g. the job stopped first).
    pub fn fail(&mut self) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!(segment = %self.id, "segment_marked_failed");
        self.quality = Some(Quality::Failed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(start: f64, end: f64) -> Cue {
        Cue {
            id: "1".into(),
            start,
            end,
            source_text: "Hello there".into(),
            translated_text: "Hola".into(),
        }
    }

    fn bounds() -> RateBounds {
        RateBounds::new(0.95, 1.15).unwrap()
    }

    #[test]
    fn test_rejects_empty_window() {
        let err = SegmentRecord::new(cue(2.0, 2.0), bounds()).unwrap_err();
        assert!(matches!(err, RecordError::InvalidWindow { .. }));
        assert!(SegmentRecord::new(cue(f64::NAN, 2.0), bounds()).is_err());
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(RateBounds::new(1.2, 1.0).is_err());
        assert!(RateBounds::new(0.0, 1.0).is_err());
        assert!(RateBounds::new(1.0, 1.0).is_ok());
    }

    #[test]
    fn test_rate_is_clamped() {
        let mut record = SegmentRecord::new(cue(0.0, 5.0), bounds()).unwrap();
        assert_eq!(record.set_speech_rate(1.2).unwrap(), 1.15);
        assert_eq!(record.set_speech_rate(0.5).unwrap(), 0.95);
        assert_eq!(record.set_speech_rate(f64::NAN).unwrap(), 1.0);
    }

    #[test]
    fn test_attempt_timing_error() {
        let attempt = Attempt::new(AttemptKind::Synthesized, "x", 1.0, 6.0, 5.0);
        assert!((attempt.timing_error - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_accept_is_final() {
        let mut record = SegmentRecord::new(cue(1.0, 6.0), bounds()).unwrap();
        assert_eq!(record.target_duration(), 5.0);
        let idx = record
            .push_attempt(Attempt::new(AttemptKind::Synthesized, "Hola", 1.0, 5.2, 5.0))
            .unwrap();
        record
            .accept(idx, Quality::Converged, AudioClip::silence(5.2, 100), false)
            .unwrap();

        assert!(record.is_terminal());
        assert!((record.sync_ratio().unwrap() - 1.04).abs() < 1e-9);
        assert_eq!(
            record.push_attempt(Attempt::new(AttemptKind::Synthesized, "x", 1.0, 1.0, 5.0)),
            Err(RecordError::Terminal("1".into()))
        );
        assert!(record.set_working_text("other").is_err());
        assert!(record.fail().is_err());
        assert_eq!(record.attempts().len(), 1);
    }

    #[test]
    fn test_accept_unknown_attempt() {
        let mut record = SegmentRecord::new(cue(0.0, 1.0), bounds()).unwrap();
        let err = record
            .accept(3, Quality::Degraded, AudioClip::silence(1.0, 10), true)
            .unwrap_err();
        assert!(matches!(err, RecordError::UnknownAttempt { index: 3, .. }));
        assert!(!record.is_terminal());
    }

    #[test]
    fn test_cue_deserializes_without_source() {
        let cue: Cue =
            serde_json::from_str(r#"{"id":"7","start":0.5,"end":1.5,"translated_text":"Hi"}"#)
                .unwrap();
        assert_eq!(cue.source_text, "");
        assert_eq!(cue.translated_text, "Hi");
    }
}
