use std::sync::atomic::{AtomicU64, Ordering};

/// Weight given to each new observation.
pub const DEFAULT_SMOOTHING: f64 = 0.3;

/// Observed ratios outside this range are treated as outliers and ignored.
const RATIO_RANGE: (f64, f64) = (0.25, 4.0);

/// Running measured/estimated ratio shared by all controllers of a job.
///
/// Stored as `f64` bits in an atomic so concurrent updates never tear.
/// Concurrent observations are last-writer-wins on the smoothed value.
#[derive(Debug)]
pub struct Calibration {
    factor_bits: AtomicU64,
    samples: AtomicU64,
    smoothing: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl Calibration {
    pub fn new(smoothing: f64) -> Self {
        Self {
            factor_bits: AtomicU64::new(1.0_f64.to_bits()),
            samples: AtomicU64::new(0),
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn factor(&self) -> f64 {
        f64::from_bits(self.factor_bits.load(Ordering::Acquire))
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Fold in one `measured / raw_estimate` ratio. Returns the new factor.
    ///
    /// The first accepted observation replaces the neutral starting value.
    pub fn observe(&self, ratio: f64) -> f64 {
        if !ratio.is_finite() || ratio < RATIO_RANGE.0 || ratio > RATIO_RANGE.1 {
            tracing::debug!(ratio, "calibration_outlier_ignored");
            return self.factor();
        }

        let first = self.samples.fetch_add(1, Ordering::Relaxed) == 0;
        let alpha = self.smoothing;
        let previous = self
            .factor_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let current = f64::from_bits(bits);
                let next = if first {
                    ratio
                } else {
                    alpha * ratio + (1.0 - alpha) * current
                };
                Some(next.to_bits())
            })
            .unwrap_or_else(|bits| bits);

        let current = f64::from_bits(previous);
        let updated = if first {
            ratio
        } else {
            alpha * ratio + (1.0 - alpha) * current
        };
        tracing::debug!(ratio, factor = updated, "calibration_updated");
        updated
    }
}
