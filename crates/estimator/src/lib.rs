//! Speech duration estimation.
//!
//! Predicts how long a text takes to speak without calling a synthesis
//! service. Predictions are cheap and imprecise; they seed the convergence
//! loop and are corrected by a per-job [`Calibration`] factor learned from
//! measured audio.

mod calibration;
mod profile;

pub use calibration::{Calibration, DEFAULT_SMOOTHING};
pub use profile::LanguageProfile;

/// Seconds added per sentence-ending pause (`.!?` and CJK equivalents).
pub const MAJOR_PAUSE_SECS: f64 = 0.35;
/// Seconds added per clause pause (`,;:` and CJK equivalents).
pub const MINOR_PAUSE_SECS: f64 = 0.18;
/// Fixed safety margin added to every estimate.
pub const BUFFER_SECS: f64 = 0.2;

/// Counts extracted from a text for estimation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextShape {
    /// Whitespace-delimited words (excluding ideographic characters).
    pub words: usize,
    /// Han and kana characters, each spoken as its own unit.
    pub ideographs: usize,
    pub major_pauses: usize,
    pub minor_pauses: usize,
}

impl TextShape {
    pub fn of(text: &str) -> Self {
        let mut shape = Self::default();
        for c in text.chars() {
            match c {
                '.' | '!' | '?' | '。' | '！' | '？' => shape.major_pauses += 1,
                ',' | ';' | ':' | '，' | '；' | '：' | '、' => shape.minor_pauses += 1,
                c if is_ideograph(c) => shape.ideographs += 1,
                _ => {}
            }
        }
        shape.words = text
            .split_whitespace()
            .filter(|token| {
                token
                    .chars()
                    .any(|c| c.is_alphanumeric() && !is_ideograph(c))
            })
            .count();
        shape
    }

    pub fn is_empty(&self) -> bool {
        self.words == 0 && self.ideographs == 0
    }
}

fn is_ideograph(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF   // hiragana, katakana
        | 0x3400..=0x4DBF // CJK extension A
        | 0x4E00..=0x9FFF // CJK unified
        | 0xF900..=0xFAFF)
}

/// Heuristic duration estimator.
#[derive(Debug, Clone)]
pub struct DurationEstimator {
    /// Scales every pause contribution.
    pub pause_multiplier: f64,
}

impl Default for DurationEstimator {
    fn default() -> Self {
        Self {
            pause_multiplier: 1.0,
        }
    }
}

impl DurationEstimator {
    /// Uncalibrated estimate in seconds of `text` spoken at `rate`.
    pub fn raw_estimate(&self, text: &str, language: &str, rate: f64) -> f64 {
        let shape = TextShape::of(text);
        if shape.is_empty() {
            return 0.0;
        }
        let profile = LanguageProfile::for_language(language);
        let rate = if rate > 0.0 { rate } else { 1.0 };

        let spoken = shape.words as f64 / profile.words_per_second
            + shape.ideographs as f64 / profile.chars_per_second;
        let pauses = (shape.major_pauses as f64 * MAJOR_PAUSE_SECS
            + shape.minor_pauses as f64 * MINOR_PAUSE_SECS)
            * profile.pause_weight
            * self.pause_multiplier;

        (spoken + pauses) / rate + profile.overhead_secs + BUFFER_SECS
    }

    /// Estimate corrected by a calibration factor.
    pub fn estimate(&self, text: &str, language: &str, rate: f64, calibration: f64) -> f64 {
        self.raw_estimate(text, language, rate) * calibration
    }

    /// Rate that would make the calibrated estimate at 1.0 fit `target_secs`.
    ///
    /// Unbounded; callers clamp.
    pub fn implied_rate(&self, text: &str, language: &str, target_secs: f64, calibration: f64) -> f64 {
        if target_secs <= 0.0 {
            return f64::INFINITY;
        }
        self.estimate(text, language, 1.0, calibration) / target_secs
    }
}
