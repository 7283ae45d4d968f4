use std::sync::Arc;

/// Sample rate used for generated silence when no clip sets one (MiniMax default output).
pub const DEFAULT_SAMPLE_RATE: u32 = 32000;

/// Mono audio clip with shared sample storage.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Sample rate of the audio data.
    pub sample_rate: u32,
    /// Audio samples (shared ownership so superseded clips can be dropped cheaply).
    pub samples: Arc<[f32]>,
}

impl AudioClip {
    pub fn new(sample_rate: u32, samples: impl Into<Arc<[f32]>>) -> Self {
        Self {
            sample_rate,
            samples: samples.into(),
        }
    }

    /// Silence of exactly `round(duration * sample_rate)` samples.
    pub fn silence(duration_secs: f64, sample_rate: u32) -> Self {
        let len = (duration_secs.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(sample_rate, vec![0.0; len])
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Cut the clip to `max_secs`, fading the last `fade_secs` linearly to zero.
    ///
    /// Returns the clip unchanged when it already fits.
    pub fn truncated(&self, max_secs: f64, fade_secs: f64) -> Self {
        let keep = (max_secs.max(0.0) * self.sample_rate as f64) as usize;
        if keep >= self.samples.len() {
            return self.clone();
        }

        let mut out = self.samples[..keep].to_vec();
        let fade = ((fade_secs.max(0.0) * self.sample_rate as f64) as usize).min(keep);
        if fade > 0 {
            let from = keep - fade;
            for (i, sample) in out[from..].iter_mut().enumerate() {
                let gain = 1.0 - (i + 1) as f32 / fade as f32;
                *sample *= gain;
            }
        }
        Self::new(self.sample_rate, out)
    }

    /// Linear-interpolation resample to `to_rate`.
    pub fn resampled(&self, to_rate: u32) -> Self {
        if to_rate == self.sample_rate || self.sample_rate == 0 || to_rate == 0 {
            return self.clone();
        }
        let samples = &self.samples;
        let ratio = to_rate as f64 / self.sample_rate as f64;
        let new_len = (samples.len() as f64 * ratio) as usize;
        let mut output = Vec::with_capacity(new_len);
        for i in 0..new_len {
            let src_idx = i as f64 / ratio;
            let idx = src_idx.floor() as usize;
            let frac = src_idx.fract() as f32;
            let sample = if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else if idx < samples.len() {
                samples[idx]
            } else {
                0.0
            };
            output.push(sample);
        }
        Self::new(to_rate, output)
    }
}
