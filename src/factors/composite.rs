// =============================================================================
// Composite Scorer — regime-weighted factor blend with social add-on
// =============================================================================
//
// internal_total_100 = w_m * momentum
//                    + w_t * technical_resid
//                    + w_sd * (volume_resid (+) quality_resid)
//                    + w_c * catalyst_resid
//
// Every component is clipped to [0, 100] before weighting and the blend is
// clipped to [0, 100] after. Momentum is protected twice: its weight never
// drops below 0.25 (enforced by the weight router) and the blend never falls
// below 85% of the momentum core itself, so a high-momentum symbol cannot be
// dragged down by empty residuals.
//
// When no catalyst feed exists, its weight is redistributed pro-rata over
// the remaining components.
//
// The freshness penalty is "worst feed wins": the oldest constituent feed
// sets a multiplicative penalty on the internal total (1.0 up to 2h, linear
// down to 0.8 at 4h, clamped there). The capped social residual is added
// after the penalty: final = internal_total_100 + social_resid_capped,
// giving a score in [-10, 110].

use tracing::debug;

use crate::regime::weights::WeightVector;
use crate::regime::Regime;
use crate::types::{CompositeScore, FreshnessReport, OrthogonalFactors, ScoreComponent};

/// The blend never drops below this fraction of the momentum core.
const MOMENTUM_PROTECTION_RATIO: f64 = 0.85;

/// Feed age at which the freshness penalty starts.
const PENALTY_START_SECS: f64 = 2.0 * 3600.0;

/// Feed age at which the penalty bottoms out.
const PENALTY_FULL_SECS: f64 = 4.0 * 3600.0;

/// Penalty floor multiplier (20% reduction).
const PENALTY_FLOOR: f64 = 0.8;

/// Multiplicative freshness penalty for the given oldest-feed age.
///
/// Non-increasing in age: 1.0 for ages up to 2h, linear down to 0.8 at 4h,
/// clamped at 0.8 beyond.
pub fn freshness_penalty(oldest_feed_age_secs: u64) -> f64 {
    let age = oldest_feed_age_secs as f64;
    if age <= PENALTY_START_SECS {
        return 1.0;
    }
    let t = ((age - PENALTY_START_SECS) / (PENALTY_FULL_SECS - PENALTY_START_SECS)).min(1.0);
    1.0 - t * (1.0 - PENALTY_FLOOR)
}

/// Stateless scorer; weights arrive per call from the router snapshot.
pub struct CompositeScorer;

impl CompositeScorer {
    /// Blend an orthogonalized factor vector under the given regime weights.
    pub fn score(
        factors: &OrthogonalFactors,
        regime: Regime,
        weights: WeightVector,
        freshness: FreshnessReport,
    ) -> CompositeScore {
        let clip = |v: f64| v.clamp(0.0, 100.0);

        let momentum = clip(factors.momentum_core);
        let technical = clip(factors.technical_resid);
        let supply_demand = clip((factors.volume_resid + factors.quality_resid) / 2.0);

        // Redistribute the catalyst weight when the feed is absent.
        let (w, catalyst_value) = match factors.catalyst_resid {
            Some(c) => (weights, Some(clip(c))),
            None => {
                let remaining = 1.0 - weights.catalyst;
                (
                    WeightVector {
                        momentum: weights.momentum / remaining,
                        technical: weights.technical / remaining,
                        supply_demand: weights.supply_demand / remaining,
                        catalyst: 0.0,
                    },
                    None,
                )
            }
        };

        let mut components = vec![
            ScoreComponent {
                name: "momentum_core".to_string(),
                weight: w.momentum,
                value: momentum,
                contribution: w.momentum * momentum,
            },
            ScoreComponent {
                name: "technical".to_string(),
                weight: w.technical,
                value: technical,
                contribution: w.technical * technical,
            },
            ScoreComponent {
                name: "supply_demand".to_string(),
                weight: w.supply_demand,
                value: supply_demand,
                contribution: w.supply_demand * supply_demand,
            },
        ];
        if let Some(c) = catalyst_value {
            components.push(ScoreComponent {
                name: "catalyst".to_string(),
                weight: w.catalyst,
                value: c,
                contribution: w.catalyst * c,
            });
        }

        let blend: f64 = components.iter().map(|c| c.contribution).sum();

        // Momentum protection floor.
        let protected = blend.max(MOMENTUM_PROTECTION_RATIO * momentum);

        let internal_total_100 = clip(protected) * freshness.penalty_multiplier;
        let final_score_with_social = internal_total_100 + factors.social_resid_capped;

        debug!(
            symbol = %factors.symbol,
            %regime,
            blend = format!("{blend:.2}"),
            internal = format!("{internal_total_100:.2}"),
            social = format!("{:+.2}", factors.social_resid_capped),
            final_score = format!("{final_score_with_social:.2}"),
            "composite scored"
        );

        CompositeScore {
            symbol: factors.symbol.clone(),
            factors: factors.clone(),
            internal_total_100,
            final_score_with_social,
            regime_label: regime.to_string(),
            data_freshness: freshness,
            components,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn orth(m: f64, t: f64, v: f64, q: f64, s: f64) -> OrthogonalFactors {
        OrthogonalFactors {
            symbol: "TESTUSDT".to_string(),
            momentum_core: m,
            technical_resid: t,
            volume_resid: v,
            quality_resid: q,
            catalyst_resid: None,
            social_resid: s,
            social_resid_capped: s.clamp(-10.0, 10.0),
            warnings: Vec::new(),
        }
    }

    fn choppy_weights() -> WeightVector {
        WeightVector::choppy().normalized().unwrap()
    }

    #[test]
    fn healthy_inputs_score_in_the_expected_band() {
        // Strong-but-ordinary inputs under the normal regime.
        let score = CompositeScorer::score(
            &orth(85.0, 65.0, 75.0, 60.0, 45.0),
            Regime::Choppy,
            choppy_weights(),
            FreshnessReport::fresh(),
        );
        assert!(
            (70.0..=90.0).contains(&score.final_score_with_social),
            "got {}",
            score.final_score_with_social
        );
    }

    #[test]
    fn weak_inputs_stay_below_the_entry_bar() {
        let score = CompositeScorer::score(
            &orth(45.0, 35.0, 25.0, 30.0, 15.0),
            Regime::Choppy,
            choppy_weights(),
            FreshnessReport::fresh(),
        );
        assert!(
            (30.0..=50.0).contains(&score.final_score_with_social),
            "got {}",
            score.final_score_with_social
        );
        assert!(score.final_score_with_social < 75.0);
    }

    #[test]
    fn momentum_dominated_vector_is_protected() {
        let score = CompositeScorer::score(
            &orth(90.0, 20.0, 10.0, 15.0, 5.0),
            Regime::Choppy,
            choppy_weights(),
            FreshnessReport::fresh(),
        );
        // The floor keeps the blend from collapsing under weak residuals.
        assert!(score.internal_total_100 >= 0.85 * 90.0 - 1e-9);
        assert!(
            (65.0..=85.0).contains(&score.final_score_with_social),
            "got {}",
            score.final_score_with_social
        );
        // Social contributes no more than its cap.
        assert!(score.final_score_with_social - score.internal_total_100 <= 10.0);
    }

    #[test]
    fn final_score_range_is_bounded() {
        let max = CompositeScorer::score(
            &orth(100.0, 100.0, 100.0, 100.0, 150.0),
            Regime::TrendingBull,
            WeightVector::trending_bull().normalized().unwrap(),
            FreshnessReport::fresh(),
        );
        assert!(max.final_score_with_social <= 110.0);

        let min = CompositeScorer::score(
            &orth(0.0, -50.0, -50.0, -50.0, -150.0),
            Regime::RiskOff,
            WeightVector::risk_off().normalized().unwrap(),
            FreshnessReport::fresh(),
        );
        assert!(min.final_score_with_social >= -10.0);
    }

    #[test]
    fn negative_residuals_clip_to_zero_not_below() {
        let score = CompositeScorer::score(
            &orth(50.0, -80.0, -80.0, -80.0, 0.0),
            Regime::Choppy,
            choppy_weights(),
            FreshnessReport::fresh(),
        );
        // Only momentum contributes; protection floor applies.
        assert!((score.internal_total_100 - 0.85 * 50.0).abs() < 1e-9);
    }

    #[test]
    fn catalyst_weight_redistributes_when_absent() {
        let mut with_catalyst = orth(80.0, 80.0, 80.0, 80.0, 0.0);
        with_catalyst.catalyst_resid = Some(80.0);

        let a = CompositeScorer::score(
            &with_catalyst,
            Regime::Choppy,
            choppy_weights(),
            FreshnessReport::fresh(),
        );
        let b = CompositeScorer::score(
            &orth(80.0, 80.0, 80.0, 80.0, 0.0),
            Regime::Choppy,
            choppy_weights(),
            FreshnessReport::fresh(),
        );
        // Uniform 80s must score 80 either way.
        assert!((a.internal_total_100 - 80.0).abs() < 1e-9);
        assert!((b.internal_total_100 - 80.0).abs() < 1e-9);
    }

    #[test]
    fn freshness_penalty_is_monotone_and_floored() {
        assert_eq!(freshness_penalty(0), 1.0);
        assert_eq!(freshness_penalty(2 * 3600), 1.0);

        let mut previous = 1.0;
        for age_mins in (120..=300).step_by(10) {
            let p = freshness_penalty(age_mins * 60);
            assert!(p <= previous, "penalty increased at {age_mins}m");
            previous = p;
        }

        assert!((freshness_penalty(3 * 3600) - 0.9).abs() < 1e-9);
        assert!((freshness_penalty(4 * 3600) - 0.8).abs() < 1e-9);
        assert!((freshness_penalty(10 * 3600) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn stale_feed_reduces_internal_before_social() {
        let mut freshness = FreshnessReport::fresh();
        freshness.oldest_feed_age_secs = 4 * 3600;
        freshness.penalty_multiplier = freshness_penalty(freshness.oldest_feed_age_secs);

        let score = CompositeScorer::score(
            &orth(100.0, 100.0, 100.0, 100.0, 10.0),
            Regime::Choppy,
            choppy_weights(),
            freshness,
        );
        assert!((score.internal_total_100 - 80.0).abs() < 1e-9);
        assert!((score.final_score_with_social - 90.0).abs() < 1e-9);
    }
}
