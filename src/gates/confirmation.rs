// =============================================================================
// Pre-Movement Confirmation — 2-of-3 core confirmations
// =============================================================================
//
// The pre-movement discipline requires two of three core confirmations:
//
//   - funding z-score at or above threshold
//   - whale composite at or above threshold
//   - supply-squeeze proxy at or above threshold
//
// The squeeze proxy itself is 2-of-4 over {reserve depletion, large
// withdrawals, staking inflow, derivatives OI jump}, scored as the fraction
// of components that clear their thresholds.
//
// In risk-off conditions (which the btc_driven label canonicalizes into) a
// volume-confirmation boost applies: a 24h volume ratio at or above the
// boost threshold lowers the requirement to 1-of-3 plus the volume
// confirmation itself.
//
// The precedence score ranks gate-passing candidates: funding is the most
// influential confirmation (3.0), then whale (2.0), supply (1.0), and the
// volume boost (0.5).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfirmationConfig;
use crate::gates::entry::GateCheck;
use crate::regime::Regime;

/// Precedence weights per passed confirmation.
const PRECEDENCE_FUNDING: f64 = 3.0;
const PRECEDENCE_WHALE: f64 = 2.0;
const PRECEDENCE_SUPPLY: f64 = 1.0;
const PRECEDENCE_VOLUME_BOOST: f64 = 0.5;

// =============================================================================
// Types
// =============================================================================

/// Supply-squeeze sub-component observations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqueezeInputs {
    /// Exchange reserve depletion over 7d, percent.
    pub reserve_depletion_pct: Option<f64>,
    /// Large-withdrawal volume over 24h, USD.
    pub large_withdrawals_usd: Option<f64>,
    /// Net staking inflow over 24h, USD.
    pub staking_inflow_usd: Option<f64>,
    /// Derivatives open-interest jump over 24h, percent.
    pub oi_jump_pct: Option<f64>,
}

/// Observations for one confirmation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfirmationInputs {
    pub funding_z: Option<f64>,
    /// Whale activity composite in [0, 1].
    pub whale_composite: Option<f64>,
    /// 24h volume vs trailing average.
    pub volume_ratio_24h: Option<f64>,
    pub squeeze: SqueezeInputs,
}

/// Squeeze proxy outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezeProxy {
    /// Fraction of sub-components that cleared their thresholds.
    pub score: f64,
    pub components: Vec<GateCheck>,
    pub passed_count: usize,
}

/// Complete confirmation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResult {
    pub passed: bool,
    /// "2-of-3" or "1-of-3+volume" when the boost applied.
    pub requirement: String,
    pub confirmations: Vec<GateCheck>,
    pub squeeze_proxy: SqueezeProxy,
    pub volume_boost_applied: bool,
    pub precedence_score: f64,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Evaluate the supply-squeeze proxy (2-of-4 sub-components).
pub fn squeeze_proxy(inputs: &SqueezeInputs, cfg: &ConfirmationConfig) -> SqueezeProxy {
    let component = |name: &str, value: Option<f64>, threshold: f64, unit: &str| GateCheck {
        name: name.to_string(),
        passed: value.map(|v| v >= threshold).unwrap_or(false),
        value,
        threshold,
        description: format!("{name} vs minimum {threshold:.0}{unit}"),
    };

    let components = vec![
        component(
            "reserve_depletion",
            inputs.reserve_depletion_pct,
            cfg.reserve_depletion_pct,
            "%",
        ),
        component(
            "large_withdrawals",
            inputs.large_withdrawals_usd,
            cfg.large_withdrawal_usd,
            " USD",
        ),
        component(
            "staking_inflow",
            inputs.staking_inflow_usd,
            cfg.staking_inflow_usd,
            " USD",
        ),
        component("oi_jump", inputs.oi_jump_pct, cfg.oi_jump_pct, "%"),
    ];

    let passed_count = components.iter().filter(|c| c.passed).count();
    SqueezeProxy {
        score: passed_count as f64 / components.len() as f64,
        components,
        passed_count,
    }
}

/// Run the 2-of-3 confirmation discipline for one symbol.
pub fn evaluate(
    symbol: &str,
    regime: Regime,
    inputs: &ConfirmationInputs,
    cfg: &ConfirmationConfig,
) -> ConfirmationResult {
    let squeeze = squeeze_proxy(&inputs.squeeze, cfg);

    let funding = GateCheck {
        name: "funding_z".to_string(),
        passed: inputs.funding_z.map(|z| z >= cfg.funding_z_min).unwrap_or(false),
        value: inputs.funding_z,
        threshold: cfg.funding_z_min,
        description: format!("funding z-score vs minimum {:.1}σ", cfg.funding_z_min),
    };
    let whale = GateCheck {
        name: "whale_composite".to_string(),
        passed: inputs
            .whale_composite
            .map(|w| w >= cfg.whale_composite_min)
            .unwrap_or(false),
        value: inputs.whale_composite,
        threshold: cfg.whale_composite_min,
        description: format!("whale composite vs minimum {:.2}", cfg.whale_composite_min),
    };
    let supply = GateCheck {
        name: "supply_squeeze".to_string(),
        passed: squeeze.score >= cfg.squeeze_proxy_min,
        value: Some(squeeze.score),
        threshold: cfg.squeeze_proxy_min,
        description: format!(
            "supply-squeeze proxy ({}-of-4) vs minimum {:.2}",
            squeeze.passed_count, cfg.squeeze_proxy_min
        ),
    };

    let core_passed = [&funding, &whale, &supply]
        .iter()
        .filter(|c| c.passed)
        .count();

    // Volume boost only applies in risk-off conditions.
    let volume_confirmed = inputs
        .volume_ratio_24h
        .map(|r| r >= cfg.volume_boost_ratio)
        .unwrap_or(false);
    let volume_boost_applied = regime == Regime::RiskOff && volume_confirmed;

    let (passed, requirement) = if volume_boost_applied {
        (core_passed >= 1, "1-of-3+volume".to_string())
    } else {
        (core_passed >= 2, "2-of-3".to_string())
    };

    let mut precedence_score = 0.0;
    if funding.passed {
        precedence_score += PRECEDENCE_FUNDING;
    }
    if whale.passed {
        precedence_score += PRECEDENCE_WHALE;
    }
    if supply.passed {
        precedence_score += PRECEDENCE_SUPPLY;
    }
    if volume_boost_applied {
        precedence_score += PRECEDENCE_VOLUME_BOOST;
    }

    debug!(
        symbol,
        %regime,
        core_passed,
        passed,
        precedence = format!("{precedence_score:.1}"),
        "confirmation evaluated"
    );

    ConfirmationResult {
        passed,
        requirement,
        confirmations: vec![funding, whale, supply],
        squeeze_proxy: squeeze,
        volume_boost_applied,
        precedence_score,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ConfirmationConfig {
        ConfirmationConfig::default()
    }

    fn strong_inputs() -> ConfirmationInputs {
        ConfirmationInputs {
            funding_z: Some(2.5),
            whale_composite: Some(0.8),
            volume_ratio_24h: Some(1.0),
            squeeze: SqueezeInputs {
                reserve_depletion_pct: Some(6.0),
                large_withdrawals_usd: Some(80_000_000.0),
                staking_inflow_usd: None,
                oi_jump_pct: Some(2.0),
            },
        }
    }

    #[test]
    fn two_of_three_passes() {
        // Funding + whale confirmed; squeeze confirmed too (2-of-4).
        let result = evaluate("X", Regime::Choppy, &strong_inputs(), &cfg());
        assert!(result.passed);
        assert_eq!(result.requirement, "2-of-3");
        // All three passed: 3.0 + 2.0 + 1.0.
        assert!((result.precedence_score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn one_of_three_fails_without_boost() {
        let inputs = ConfirmationInputs {
            funding_z: Some(2.5),
            whale_composite: Some(0.2),
            volume_ratio_24h: Some(3.0),
            squeeze: SqueezeInputs::default(),
        };
        // Volume is high but the regime is not risk-off: no boost.
        let result = evaluate("X", Regime::Choppy, &inputs, &cfg());
        assert!(!result.passed);
    }

    #[test]
    fn volume_boost_lowers_requirement_in_risk_off() {
        let inputs = ConfirmationInputs {
            funding_z: Some(2.5),
            whale_composite: Some(0.2),
            volume_ratio_24h: Some(3.0),
            squeeze: SqueezeInputs::default(),
        };
        let result = evaluate("X", Regime::RiskOff, &inputs, &cfg());
        assert!(result.passed);
        assert!(result.volume_boost_applied);
        assert_eq!(result.requirement, "1-of-3+volume");
        // Funding 3.0 + volume boost 0.5.
        assert!((result.precedence_score - 3.5).abs() < 1e-9);
    }

    #[test]
    fn boost_needs_the_volume_ratio_not_just_the_regime() {
        let inputs = ConfirmationInputs {
            funding_z: Some(2.5),
            whale_composite: Some(0.2),
            volume_ratio_24h: Some(1.5),
            squeeze: SqueezeInputs::default(),
        };
        let result = evaluate("X", Regime::RiskOff, &inputs, &cfg());
        assert!(!result.passed);
        assert!(!result.volume_boost_applied);
    }

    #[test]
    fn squeeze_proxy_needs_two_of_four() {
        let one = SqueezeInputs {
            reserve_depletion_pct: Some(6.0),
            ..Default::default()
        };
        let proxy = squeeze_proxy(&one, &cfg());
        assert_eq!(proxy.passed_count, 1);
        assert!(proxy.score < cfg().squeeze_proxy_min);

        let two = SqueezeInputs {
            reserve_depletion_pct: Some(6.0),
            oi_jump_pct: Some(7.0),
            ..Default::default()
        };
        let proxy = squeeze_proxy(&two, &cfg());
        assert_eq!(proxy.passed_count, 2);
        assert!(proxy.score >= cfg().squeeze_proxy_min);
    }

    #[test]
    fn missing_data_counts_as_unconfirmed() {
        let result = evaluate("X", Regime::Choppy, &ConfirmationInputs::default(), &cfg());
        assert!(!result.passed);
        assert!((result.precedence_score - 0.0).abs() < f64::EPSILON);
        assert!(result.confirmations.iter().all(|c| !c.passed));
    }

    #[test]
    fn precedence_orders_funding_above_whale() {
        let funding_only = ConfirmationInputs {
            funding_z: Some(2.5),
            ..Default::default()
        };
        let whale_only = ConfirmationInputs {
            whale_composite: Some(0.9),
            ..Default::default()
        };
        let a = evaluate("X", Regime::Choppy, &funding_only, &cfg());
        let b = evaluate("X", Regime::Choppy, &whale_only, &cfg());
        assert!(a.precedence_score > b.precedence_score);
    }
}
