//! Ordered adjustment strategies tried when an attempt misses its window.
//!
//! The controller asks each strategy in turn for a proposal and applies the
//! first one offered. Accepting the best attempt so far is not a strategy; it
//! is what happens when the budget runs out.

use std::sync::Arc;

use async_trait::async_trait;
use dubsync_rewrite::{RewriteRequest, TextRewriter};
use dubsync_segment::RateBounds;

use crate::config::EscalationPolicy;

/// What the last attempt looked like.
#[derive(Debug, Clone)]
pub struct AdjustmentContext<'a> {
    pub segment_id: &'a str,
    pub text: &'a str,
    pub language: &'a str,
    /// Rate the measured duration was produced at.
    pub rate: f64,
    /// Measured (or, before any synthesis, estimated) duration at `rate`.
    pub measured: f64,
    pub target: f64,
    pub tolerance: f64,
    pub bounds: RateBounds,
    pub policy: &'a EscalationPolicy,
    pub rewrites_used: u32,
}

impl AdjustmentContext<'_> {
    /// Rate that would hit the target exactly if duration scales as `1 / rate`.
    pub fn ideal_rate(&self) -> f64 {
        self.rate * self.measured / self.target
    }

    pub fn clamped_rate(&self) -> f64 {
        self.bounds.clamp(self.ideal_rate())
    }

    pub fn predicted_at(&self, rate: f64) -> f64 {
        self.measured * self.rate / rate
    }

    pub fn predicted_error_at(&self, rate: f64) -> f64 {
        (self.predicted_at(rate) - self.target) / self.target
    }
}

/// A proposed next input for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjustment {
    pub strategy: &'static str,
    /// Replacement working text, if the strategy changed it.
    pub text: Option<String>,
    pub rate: f64,
}

#[async_trait]
pub trait EscalationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// True if the strategy changes text rather than only rate.
    fn adjusts_text(&self) -> bool {
        false
    }

    async fn propose(&self, ctx: &AdjustmentContext<'_>) -> Option<Adjustment>;
}

/// Change rate only, when the clamped rate is predicted to land in tolerance.
pub struct RateCorrection;

#[async_trait]
impl EscalationStrategy for RateCorrection {
    fn name(&self) -> &'static str {
        "rate_correction"
    }

    async fn propose(&self, ctx: &AdjustmentContext<'_>) -> Option<Adjustment> {
        let rate = ctx.clamped_rate();
        let reach = ctx.tolerance * ctx.policy.rate_reach_factor;
        (ctx.predicted_error_at(rate).abs() <= reach).then(|| Adjustment {
            strategy: self.name(),
            text: None,
            rate,
        })
    }
}

/// Ask the rewriter for a shorter or longer line, then re-derive the rate
/// assuming duration scales with character count.
pub struct TextRewrite {
    rewriter: Arc<dyn TextRewriter>,
}

impl TextRewrite {
    pub fn new(rewriter: Arc<dyn TextRewriter>) -> Self {
        Self { rewriter }
    }
}

#[async_trait]
impl EscalationStrategy for TextRewrite {
    fn name(&self) -> &'static str {
        "text_rewrite"
    }

    fn adjusts_text(&self) -> bool {
        true
    }

    async fn propose(&self, ctx: &AdjustmentContext<'_>) -> Option<Adjustment> {
        if ctx.rewrites_used >= ctx.policy.max_text_rewrites {
            return None;
        }
        let predicted = ctx.predicted_at(ctx.clamped_rate());
        if predicted <= 0.0 {
            return None;
        }
        let factor = (ctx.target / predicted)
            .clamp(ctx.policy.min_length_factor, ctx.policy.max_length_factor);

        let request = RewriteRequest {
            text: ctx.text,
            language: ctx.language,
            target_length_factor: factor,
        };
        let rewritten = match self.rewriter.rewrite(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    segment = %ctx.segment_id,
                    rewriter = self.rewriter.name(),
                    error = %e,
                    "rewrite_unavailable"
                );
                return None;
            }
        };
        let rewritten = rewritten.trim();
        if rewritten.is_empty() || rewritten == ctx.text.trim() {
            return None;
        }

        let old_len = ctx.text.chars().count().max(1) as f64;
        let length_ratio = rewritten.chars().count() as f64 / old_len;
        let rate = ctx
            .bounds
            .clamp(ctx.rate * ctx.measured * length_ratio / ctx.target);

        tracing::debug!(
            segment = %ctx.segment_id,
            factor,
            length_ratio,
            rate,
            "text_rewritten"
        );
        Some(Adjustment {
            strategy: self.name(),
            text: Some(rewritten.to_string()),
            rate,
        })
    }
}

/// Move as far toward the ideal rate as the bounds allow.
pub struct ClampedRate;

#[async_trait]
impl EscalationStrategy for ClampedRate {
    fn name(&self) -> &'static str {
        "clamped_rate"
    }

    async fn propose(&self, ctx: &AdjustmentContext<'_>) -> Option<Adjustment> {
        Some(Adjustment {
            strategy: self.name(),
            text: None,
            rate: ctx.clamped_rate(),
        })
    }
}

/// Rate correction, then text rewrite, then clamped rate.
pub fn default_strategies(rewriter: Arc<dyn TextRewriter>) -> Vec<Arc<dyn EscalationStrategy>> {
    vec![
        Arc::new(RateCorrection),
        Arc::new(TextRewrite::new(rewriter)),
        Arc::new(ClampedRate),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use dubsync_rewrite::{HeuristicRewriter, NoopRewriter, RewriteError};

    struct Offline;

    #[async_trait]
    impl TextRewriter for Offline {
        async fn rewrite(&self, _request: &RewriteRequest<'_>) -> dubsync_rewrite::Result<String> {
            Err(RewriteError::Unavailable("offline".into()))
        }

        fn name(&self) -> &str {
            "offline"
        }
    }

    fn context<'a>(policy: &'a EscalationPolicy, text: &'a str, measured: f64) -> AdjustmentContext<'a> {
        AdjustmentContext {
            segment_id: "1",
            text,
            language: "en",
            rate: 1.0,
            measured,
            target: 5.0,
            tolerance: 0.15,
            bounds: RateBounds::new(0.95, 1.15).unwrap(),
            policy,
            rewrites_used: 0,
        }
    }

    #[test]
    fn test_context_math() {
        let policy = EscalationPolicy::default();
        let ctx = context(&policy, "x", 6.0);
        assert!((ctx.ideal_rate() - 1.2).abs() < 1e-12);
        assert_eq!(ctx.clamped_rate(), 1.15);
        assert!((ctx.predicted_at(1.15) - 5.2174).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_rate_correction_when_reachable() {
        let policy = EscalationPolicy::default();
        let adj = RateCorrection.propose(&context(&policy, "x", 6.0)).await.unwrap();
        assert_eq!(adj.rate, 1.15);
        assert!(adj.text.is_none());
    }

    #[tokio::test]
    async fn test_rate_correction_declines_when_far() {
        let policy = EscalationPolicy::default();
        // 9s at 1.15 is still ~57% long.
        assert!(RateCorrection.propose(&context(&policy, "x", 9.0)).await.is_none());
    }

    #[tokio::test]
    async fn test_reach_factor_is_tunable() {
        let policy = EscalationPolicy {
            rate_reach_factor: 4.0,
            ..Default::default()
        };
        assert!(RateCorrection.propose(&context(&policy, "x", 9.0)).await.is_some());
    }

    #[tokio::test]
    async fn test_text_rewrite_shortens() {
        let policy = EscalationPolicy::default();
        let text = "We really need to leave right now. The storm is coming over the hills fast!";
        let strategy = TextRewrite::new(Arc::new(HeuristicRewriter));
        let adj = strategy.propose(&context(&policy, text, 9.0)).await.unwrap();

        let new_text = adj.text.unwrap();
        assert!(new_text.chars().count() < text.chars().count());
        assert!(adj.rate >= 0.95 && adj.rate <= 1.15);
    }

    #[tokio::test]
    async fn test_text_rewrite_respects_limit() {
        let policy = EscalationPolicy {
            max_text_rewrites: 1,
            ..Default::default()
        };
        let mut ctx = context(&policy, "We really really must go now.", 9.0);
        ctx.rewrites_used = 1;
        let strategy = TextRewrite::new(Arc::new(HeuristicRewriter));
        assert!(strategy.propose(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_unavailable_or_unchanged_rewrite_declines() {
        let policy = EscalationPolicy::default();
        let ctx = context(&policy, "Some text here.", 9.0);
        assert!(TextRewrite::new(Arc::new(Offline)).propose(&ctx).await.is_none());
        assert!(TextRewrite::new(Arc::new(NoopRewriter)).propose(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn test_default_order_falls_through_to_clamp() {
        let policy = EscalationPolicy::default();
        let ctx = context(&policy, "Some text here.", 9.0);
        let strategies = default_strategies(Arc::new(Offline));

        let mut chosen = None;
        for strategy in &strategies {
            if let Some(adj) = strategy.propose(&ctx).await {
                chosen = Some(adj);
                break;
            }
        }
        let adj = chosen.unwrap();
        assert_eq!(adj.strategy, "clamped_rate");
        assert_eq!(adj.rate, 1.15);
    }
}
