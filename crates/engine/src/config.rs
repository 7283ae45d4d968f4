//! Tuning knobs for a dubbing job.

use dubsync_segment::RateBounds;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("invalid config `{field}`: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError {
        field,
        reason: reason.into(),
    }
}

/// Preset trade-offs between service cost and timing precision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMode {
    /// One synthesis per segment, loose tolerance.
    Economic,
    Balanced,
    /// Tight tolerance, more calls, no estimate-based seeding.
    Precise,
}

impl std::str::FromStr for OptimizationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "economic" => Ok(Self::Economic),
            "balanced" => Ok(Self::Balanced),
            "precise" => Ok(Self::Precise),
            other => Err(invalid("optimization_mode", format!("unknown mode {other:?}"))),
        }
    }
}

/// Shared token bucket for synthesis calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    /// Calls admitted back-to-back before pacing starts.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 40,
            burst: 3,
        }
    }
}

/// When to prefer rewriting text over changing speech rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Rate correction alone is used when its predicted error is within
    /// `sync_tolerance * rate_reach_factor`.
    pub rate_reach_factor: f64,
    /// Smallest length factor ever requested from the rewriter.
    pub min_length_factor: f64,
    /// Largest length factor ever requested from the rewriter.
    pub max_length_factor: f64,
    pub max_text_rewrites: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            rate_reach_factor: 1.0,
            min_length_factor: 0.4,
            max_length_factor: 1.6,
            max_text_rewrites: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Accepted relative timing error, e.g. 0.15 = within 15% of the window.
    pub sync_tolerance: f64,
    /// Best-effort results within `sync_tolerance * this` count as
    /// `within_tolerance_fallback` rather than `degraded`.
    pub fallback_tolerance_multiplier: f64,
    /// Synthesis rounds per segment.
    pub max_iterations: u32,
    pub min_speed_ratio: f64,
    pub max_speed_ratio: f64,
    /// Largest spread of final rates across a job before the report flags it.
    pub max_speed_variation: f64,
    pub max_api_calls_per_segment: u32,
    pub max_concurrent_workers: usize,
    /// Seconds of silence kept before the next segment when space allows.
    pub preferred_breathing_gap: f64,
    /// Minimum seconds between one clip's end and the next segment's start.
    pub min_overlap_buffer: f64,
    pub enable_cost_optimization: bool,
    pub use_estimation_first: bool,
    /// Consecutive segments lost to service exhaustion before the job aborts.
    pub max_consecutive_outages: u32,
    /// Applied on top of the other fields by [`SyncConfig::resolved`].
    pub optimization_mode: Option<OptimizationMode>,
    pub rate_limit: RateLimitConfig,
    pub escalation: EscalationPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_tolerance: 0.15,
            fallback_tolerance_multiplier: 1.5,
            max_iterations: 3,
            min_speed_ratio: 0.95,
            max_speed_ratio: 1.15,
            max_speed_variation: 0.1,
            max_api_calls_per_segment: 4,
            max_concurrent_workers: 6,
            preferred_breathing_gap: 0.3,
            min_overlap_buffer: 0.05,
            enable_cost_optimization: true,
            use_estimation_first: true,
            max_consecutive_outages: 3,
            optimization_mode: None,
            rate_limit: RateLimitConfig::default(),
            escalation: EscalationPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Overwrite the mode-controlled fields with `mode`'s preset.
    pub fn with_mode(mut self, mode: OptimizationMode) -> Self {
        let (iterations, calls, tolerance, estimate_first) = match mode {
            OptimizationMode::Economic => (1, 1, 0.2, true),
            OptimizationMode::Balanced => (2, 3, 0.15, true),
            OptimizationMode::Precise => (3, 6, 0.1, false),
        };
        self.max_iterations = iterations;
        self.max_api_calls_per_segment = calls;
        self.sync_tolerance = tolerance;
        self.use_estimation_first = estimate_first;
        self.optimization_mode = Some(mode);
        self
    }

    /// The config with its `optimization_mode` preset (if any) applied.
    pub fn resolved(self) -> Self {
        match self.optimization_mode {
            Some(mode) => self.with_mode(mode),
            None => self,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("sync_tolerance", self.sync_tolerance),
            ("min_speed_ratio", self.min_speed_ratio),
            ("max_speed_ratio", self.max_speed_ratio),
            ("rate_reach_factor", self.escalation.rate_reach_factor),
            ("min_length_factor", self.escalation.min_length_factor),
        ];
        for (field, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(field, format!("must be positive, got {value}")));
            }
        }
        let non_negative = [
            ("max_speed_variation", self.max_speed_variation),
            ("preferred_breathing_gap", self.preferred_breathing_gap),
            ("min_overlap_buffer", self.min_overlap_buffer),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(field, format!("must not be negative, got {value}")));
            }
        }
        if self.fallback_tolerance_multiplier < 1.0 {
            return Err(invalid(
                "fallback_tolerance_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.min_speed_ratio > self.max_speed_ratio {
            return Err(invalid(
                "min_speed_ratio",
                format!(
                    "{} exceeds max_speed_ratio {}",
                    self.min_speed_ratio, self.max_speed_ratio
                ),
            ));
        }
        if self.escalation.min_length_factor > self.escalation.max_length_factor {
            return Err(invalid(
                "min_length_factor",
                "exceeds max_length_factor",
            ));
        }
        if self.max_concurrent_workers == 0 {
            return Err(invalid("max_concurrent_workers", "must be at least 1"));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(invalid("requests_per_minute", "must be at least 1"));
        }
        Ok(())
    }

    pub fn rate_bounds(&self) -> Result<RateBounds, ConfigError> {
        RateBounds::new(self.min_speed_ratio, self.max_speed_ratio)
            .map_err(|e| invalid("min_speed_ratio", e.to_string()))
    }

    /// Synthesis calls a single segment may make.
    pub fn synthesis_budget(&self) -> u32 {
        self.max_iterations.min(self.max_api_calls_per_segment)
    }

    pub fn estimation_enabled(&self) -> bool {
        self.enable_cost_optimization && self.use_estimation_first
    }

    pub fn fallback_tolerance(&self) -> f64 {
        self.sync_tolerance * self.fallback_tolerance_multiplier
    }
}
