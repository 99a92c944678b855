// =============================================================================
// Orthogonalizer — Gram-Schmidt residualization with a protected momentum core
// =============================================================================
//
// Fixed projection order:
//
//   momentum (untouched) -> technical -> volume & quality (fused into one
//   supply/demand block, or individually, per config) -> catalyst -> social
//
// Each factor has the part correlated with the preceding axes subtracted,
// with projection coefficients estimated from a rolling window of recent
// factor snapshots. The subtraction removes only the correlated *deviation*,
// so residuals stay on the raw 0-100 scale; with no usable history the
// factors pass through unchanged.
//
// Invariants enforced here:
//   - output momentum_core is bit-identical to the input
//   - every non-momentum residual is clamped to |r| <= 150
//   - the social residual is additionally hard-clipped to [-10, +10]
//   - a degenerate projection (NaN/inf) zeroes the offending factor and
//     surfaces a warning instead of aborting the evaluation

use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::warn;

use crate::types::{OrthogonalFactors, RawFactors};

/// Hard bound on any non-momentum residual.
pub const RESIDUAL_BOUND: f64 = 150.0;

/// Hard cap on the social residual.
pub const SOCIAL_CAP: f64 = 10.0;

/// Minimum history samples before projections are estimated.
const MIN_SAMPLES: usize = 10;

/// Rolling history capacity.
const HISTORY_CAPACITY: usize = 256;

/// Projection axes in their fixed order (momentum first, social last).
const AXIS_MOMENTUM: usize = 0;

pub struct Orthogonalizer {
    /// Collapse volume and quality into one fused supply/demand axis.
    fuse_volume_quality: bool,
    history: RwLock<VecDeque<RawFactors>>,
}

impl Orthogonalizer {
    pub fn new(fuse_volume_quality: bool) -> Self {
        Self {
            fuse_volume_quality,
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    /// Residualize one factor snapshot against the rolling history, then
    /// record it for future projections.
    pub fn orthogonalize(&self, raw: &RawFactors) -> OrthogonalFactors {
        let result = self.residualize_against_history(raw);

        let mut history = self.history.write();
        if history.len() == HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(raw.clone());

        result
    }

    fn residualize_against_history(&self, raw: &RawFactors) -> OrthogonalFactors {
        let mut warnings = Vec::new();

        // Build the axis matrix (axes × samples) from history plus the
        // current sample's axis values.
        let (series, current) = {
            let history = self.history.read();
            let usable: Vec<&RawFactors> = history.iter().collect();
            (
                build_axis_series(&usable, self.fuse_volume_quality),
                axis_values(raw, self.fuse_volume_quality),
            )
        };

        let resids = if series.first().map(|axis| axis.len()).unwrap_or(0) >= MIN_SAMPLES {
            residualize_sample(&series, &current)
        } else {
            // Insufficient history: pass factors through untouched.
            current.clone()
        };

        // Unpack per the fused/individual layout. Momentum is copied from
        // the input, never from the residual pipeline.
        let (technical, volume, quality, catalyst, social) = if self.fuse_volume_quality {
            let sd = resids[2];
            (resids[1], sd, sd, raw.catalyst.map(|_| resids[3]), *resids.last().unwrap())
        } else {
            (
                resids[1],
                resids[2],
                resids[3],
                raw.catalyst.map(|_| resids[4]),
                *resids.last().unwrap(),
            )
        };

        let mut sanitize = |name: &str, value: f64| -> f64 {
            if !value.is_finite() {
                warnings.push(format!("{name}: degenerate projection, factor zeroed"));
                warn!(symbol = %raw.symbol, factor = name, "degenerate residual zeroed");
                return 0.0;
            }
            value.clamp(-RESIDUAL_BOUND, RESIDUAL_BOUND)
        };

        let technical_resid = sanitize("technical", technical);
        let volume_resid = sanitize("volume", volume);
        let quality_resid = sanitize("quality", quality);
        let catalyst_resid = catalyst.map(|c| sanitize("catalyst", c));
        let social_resid = sanitize("social", social);
        let social_resid_capped = social_resid.clamp(-SOCIAL_CAP, SOCIAL_CAP);

        OrthogonalFactors {
            symbol: raw.symbol.clone(),
            momentum_core: raw.momentum_core,
            technical_resid,
            volume_resid,
            quality_resid,
            catalyst_resid,
            social_resid,
            social_resid_capped,
            warnings,
        }
    }
}

/// Axis values for one snapshot, in projection order. Catalyst defaults to
/// the neutral midpoint when absent so history stays rectangular.
fn axis_values(raw: &RawFactors, fused: bool) -> Vec<f64> {
    let catalyst = raw.catalyst.unwrap_or(50.0);
    if fused {
        vec![
            raw.momentum_core,
            raw.technical,
            (raw.volume + raw.quality) / 2.0,
            catalyst,
            raw.social,
        ]
    } else {
        vec![
            raw.momentum_core,
            raw.technical,
            raw.volume,
            raw.quality,
            catalyst,
            raw.social,
        ]
    }
}

/// History matrix: one series per axis.
fn build_axis_series(history: &[&RawFactors], fused: bool) -> Vec<Vec<f64>> {
    let axes = if fused { 5 } else { 6 };
    let mut series = vec![Vec::with_capacity(history.len()); axes];
    for raw in history {
        for (axis, value) in axis_values(raw, fused).into_iter().enumerate() {
            series[axis].push(value);
        }
    }
    series
}

/// Gram-Schmidt over the centered history series, then apply the same
/// projection coefficients to the current sample.
///
/// Residuals are expressed in raw units: only the correlated deviation is
/// subtracted, never the axis's own mean.
pub(crate) fn residualize_sample(series: &[Vec<f64>], current: &[f64]) -> Vec<f64> {
    let n = series[0].len() as f64;
    let means: Vec<f64> = series.iter().map(|axis| axis.iter().sum::<f64>() / n).collect();

    // Centered residual series per axis, built in projection order.
    let mut resid_series: Vec<Vec<f64>> = Vec::with_capacity(series.len());
    // Centered residual deviation of the current sample per axis.
    let mut resid_current: Vec<f64> = Vec::with_capacity(series.len());
    let mut out = Vec::with_capacity(series.len());

    for (i, axis) in series.iter().enumerate() {
        let mut centered: Vec<f64> = axis.iter().map(|v| v - means[i]).collect();
        let mut current_dev = current[i] - means[i];

        if i != AXIS_MOMENTUM {
            for j in 0..i {
                let prior = &resid_series[j];
                let denom: f64 = prior.iter().map(|v| v * v).sum();
                if denom < f64::EPSILON {
                    continue; // Degenerate prior axis: skip the projection.
                }
                let beta: f64 =
                    centered.iter().zip(prior).map(|(a, b)| a * b).sum::<f64>() / denom;
                for (value, p) in centered.iter_mut().zip(prior) {
                    *value -= beta * p;
                }
                current_dev -= beta * resid_current[j];
            }
        }

        // Raw-unit residual: the axis mean plus the uncorrelated deviation.
        out.push(if i == AXIS_MOMENTUM {
            current[i]
        } else {
            means[i] + current_dev
        });
        resid_series.push(centered);
        resid_current.push(current_dev);
    }

    out
}

/// Pearson correlation of two equal-length series.
#[cfg(test)]
pub(crate) fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let cov: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum();
    let var_a: f64 = a.iter().map(|x| (x - mean_a).powi(2)).sum();
    let var_b: f64 = b.iter().map(|y| (y - mean_b).powi(2)).sum();
    if var_a < f64::EPSILON || var_b < f64::EPSILON {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn raw(symbol: &str, m: f64, t: f64, v: f64, q: f64, s: f64) -> RawFactors {
        RawFactors {
            symbol: symbol.to_string(),
            momentum_core: m,
            technical: t,
            volume: v,
            quality: q,
            catalyst: None,
            social: s,
            timestamp: 0,
        }
    }

    #[test]
    fn momentum_core_is_bit_identical() {
        let orth = Orthogonalizer::new(true);
        // A momentum value with a non-trivial bit pattern.
        let momentum = 85.000000000000014;
        let input = raw("BTCUSDT", momentum, 65.0, 75.0, 60.0, 45.0);

        // With and without history.
        for _ in 0..30 {
            let out = orth.orthogonalize(&input);
            assert_eq!(out.momentum_core.to_bits(), momentum.to_bits());
        }
    }

    #[test]
    fn social_is_hard_capped() {
        let orth = Orthogonalizer::new(true);
        let out = orth.orthogonalize(&raw("X", 50.0, 50.0, 50.0, 50.0, 95.0));
        assert!(out.social_resid_capped.abs() <= SOCIAL_CAP);
        assert_eq!(out.social_resid_capped, SOCIAL_CAP);
    }

    #[test]
    fn residuals_stay_bounded() {
        let orth = Orthogonalizer::new(false);
        // Feed wild history then a wild sample.
        for i in 0..40 {
            let x = (i as f64) * 13.0 % 100.0;
            orth.orthogonalize(&raw("X", x, 100.0 - x, x * 0.5, 100.0 - x * 0.5, x));
        }
        let out = orth.orthogonalize(&raw("X", 100.0, 100.0, 100.0, 100.0, 100.0));
        for r in [out.technical_resid, out.volume_resid, out.quality_resid, out.social_resid] {
            assert!(r.abs() <= RESIDUAL_BOUND);
        }
    }

    #[test]
    fn passthrough_without_history() {
        let orth = Orthogonalizer::new(true);
        let out = orth.orthogonalize(&raw("X", 85.0, 65.0, 75.0, 60.0, 5.0));
        assert_eq!(out.technical_resid, 65.0);
        assert_eq!(out.volume_resid, 67.5);
        assert_eq!(out.quality_resid, 67.5);
        assert_eq!(out.social_resid, 5.0);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn residual_series_decorrelates_against_momentum() {
        // technical = 0.8 * momentum + small wobble: strongly correlated.
        let n = 60;
        let momentum: Vec<f64> = (0..n).map(|i| 30.0 + (i as f64 * 7.0) % 60.0).collect();
        let technical: Vec<f64> = momentum
            .iter()
            .enumerate()
            .map(|(i, m)| 0.8 * m + 3.0 * ((i as f64) * 0.9).sin())
            .collect();
        let series = vec![momentum.clone(), technical.clone()];

        assert!(pearson(&momentum, &technical).abs() > 0.9);

        // Residualize every sample against the full history.
        let resid_tech: Vec<f64> = (0..n)
            .map(|k| residualize_sample(&series, &[momentum[k], technical[k]])[1])
            .collect();

        assert!(
            pearson(&momentum, &resid_tech).abs() <= 0.1,
            "residual correlation {} above tolerance",
            pearson(&momentum, &resid_tech)
        );
    }

    #[test]
    fn degenerate_projection_zeroes_factor_with_warning() {
        let orth = Orthogonalizer::new(true);
        let mut input = raw("X", 50.0, f64::NAN, 50.0, 50.0, 5.0);
        input.technical = f64::NAN;

        let out = orth.orthogonalize(&input);
        assert_eq!(out.technical_resid, 0.0);
        assert!(!out.warnings.is_empty());
        // The rest of the vector survives.
        assert_eq!(out.volume_resid, 50.0);
    }

    #[test]
    fn catalyst_absent_stays_absent() {
        let orth = Orthogonalizer::new(true);
        let out = orth.orthogonalize(&raw("X", 50.0, 50.0, 50.0, 50.0, 5.0));
        assert!(out.catalyst_resid.is_none());

        let mut with_catalyst = raw("X", 50.0, 50.0, 50.0, 50.0, 5.0);
        with_catalyst.catalyst = Some(70.0);
        let out = orth.orthogonalize(&with_catalyst);
        assert!(out.catalyst_resid.is_some());
    }
}
