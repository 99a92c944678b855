// =============================================================================
// CVD Residual Analysis — flow/price divergence detection
// =============================================================================
//
// Fits a daily OLS regression of per-bar CVD change against per-bar price
// change, both winsorized at the 5th/95th percentiles, and inspects the
// latest residual: flow that the price move does not explain.
//
// Requirements for the regression path: at least 50 points and R² >= 0.3.
// On that path significance is the z-test: |z| >= 2 on the latest residual.
//
// When the fit is degenerate (too few points or weak R²) the analysis falls
// back to a percentile rank of the latest CVD change over the last 20
// points; on the fallback path the percentile alone decides significance
// (rank >= 80), the z-test does not apply.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::providers::CvdPoint;

/// Minimum points for the regression path.
const MIN_REGRESSION_POINTS: usize = 50;

/// Minimum fit quality for the regression path.
const MIN_R_SQUARED: f64 = 0.3;

/// Winsorization percentiles.
const WINSOR_LO: f64 = 0.05;
const WINSOR_HI: f64 = 0.95;

/// z-score for regression-path significance.
const SIGNIFICANCE_Z: f64 = 2.0;

/// Fallback window length.
const FALLBACK_WINDOW: usize = 20;

/// Fallback percentile threshold.
const FALLBACK_PERCENTILE: f64 = 80.0;

// =============================================================================
// Types
// =============================================================================

/// Fitted regression: cvd_change = beta0 + beta1 * price_change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CvdRegressionModel {
    pub beta0: f64,
    pub beta1: f64,
    pub r_squared: f64,
    pub n: usize,
}

/// Method that produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvdMethod {
    Regression,
    PercentileFallback,
}

/// Divergence verdict for the latest point of a CVD series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvdResidualResult {
    pub method: CvdMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<CvdRegressionModel>,
    /// Latest residual (regression) or latest CVD change (fallback).
    pub latest_value: f64,
    /// Percentile rank of the latest value within its reference set.
    pub percentile_rank: f64,
    /// z-score of the latest residual; regression path only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
    pub significant: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

// =============================================================================
// Analysis
// =============================================================================

/// Analyze a CVD series (oldest first). Returns `None` when the series is
/// too short to say anything at all.
pub fn analyze_cvd(series: &[CvdPoint]) -> Option<CvdResidualResult> {
    if series.len() < 3 {
        return None;
    }

    // Per-bar deltas.
    let price_changes: Vec<f64> = series.windows(2).map(|w| w[1].price - w[0].price).collect();
    let cvd_changes: Vec<f64> = series.windows(2).map(|w| w[1].cvd - w[0].cvd).collect();

    if cvd_changes.len() >= MIN_REGRESSION_POINTS {
        let x = winsorize(&price_changes);
        let y = winsorize(&cvd_changes);

        match fit_ols(&x, &y) {
            Some(model) if model.r_squared >= MIN_R_SQUARED => {
                return Some(regression_verdict(&x, &y, model));
            }
            Some(model) => {
                debug!(
                    r_squared = format!("{:.3}", model.r_squared),
                    "CVD fit below R² floor, falling back to percentile rank"
                );
                return Some(percentile_verdict(
                    &cvd_changes,
                    vec![format!(
                        "regression R² {:.2} below {MIN_R_SQUARED}, percentile fallback used",
                        model.r_squared
                    )],
                ));
            }
            None => {
                return Some(percentile_verdict(
                    &cvd_changes,
                    vec!["degenerate regression inputs, percentile fallback used".to_string()],
                ));
            }
        }
    }

    Some(percentile_verdict(
        &cvd_changes,
        vec![format!(
            "only {} points (< {MIN_REGRESSION_POINTS}), percentile fallback used",
            cvd_changes.len()
        )],
    ))
}

fn regression_verdict(x: &[f64], y: &[f64], model: CvdRegressionModel) -> CvdResidualResult {
    let residuals: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(xi, yi)| yi - (model.beta0 + model.beta1 * xi))
        .collect();

    let latest = *residuals.last().unwrap();
    let n = residuals.len() as f64;
    let mean = residuals.iter().sum::<f64>() / n;
    let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    let z = if std > f64::EPSILON {
        (latest - mean) / std
    } else {
        0.0
    };

    CvdResidualResult {
        method: CvdMethod::Regression,
        model: Some(model),
        latest_value: latest,
        percentile_rank: percentile_rank(&residuals, latest),
        z_score: Some(z),
        significant: z.abs() >= SIGNIFICANCE_Z,
        warnings: Vec::new(),
    }
}

fn percentile_verdict(cvd_changes: &[f64], warnings: Vec<String>) -> CvdResidualResult {
    let window_start = cvd_changes.len().saturating_sub(FALLBACK_WINDOW);
    let window = &cvd_changes[window_start..];
    let latest = *window.last().unwrap();
    let rank = percentile_rank(window, latest);

    CvdResidualResult {
        method: CvdMethod::PercentileFallback,
        model: None,
        latest_value: latest,
        percentile_rank: rank,
        z_score: None,
        significant: rank >= FALLBACK_PERCENTILE,
        warnings,
    }
}

// =============================================================================
// Numerics
// =============================================================================

/// Clamp a series to its 5th/95th percentile values.
fn winsorize(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let lo = quantile(&sorted, WINSOR_LO);
    let hi = quantile(&sorted, WINSOR_HI);
    values.iter().map(|v| v.clamp(lo, hi)).collect()
}

/// Linear-interpolated quantile of a sorted series.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let t = position - lower as f64;
        sorted[lower] * (1.0 - t) + sorted[upper] * t
    }
}

/// Share of values at or below `value`, as a percentage.
fn percentile_rank(values: &[f64], value: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let at_or_below = values.iter().filter(|v| **v <= value).count();
    at_or_below as f64 / values.len() as f64 * 100.0
}

/// Ordinary least squares of y on x. `None` when x is degenerate.
fn fit_ols(x: &[f64], y: &[f64]) -> Option<CvdRegressionModel> {
    let n = x.len() as f64;
    if x.len() != y.len() || x.len() < 3 {
        return None;
    }

    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;

    let ss_xx: f64 = x.iter().map(|xi| (xi - mean_x).powi(2)).sum();
    let ss_xy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - mean_x) * (yi - mean_y)).sum();
    let ss_yy: f64 = y.iter().map(|yi| (yi - mean_y).powi(2)).sum();

    if ss_xx < f64::EPSILON || ss_yy < f64::EPSILON {
        return None;
    }

    let beta1 = ss_xy / ss_xx;
    let beta0 = mean_y - beta1 * mean_x;
    let r_squared = (ss_xy * ss_xy) / (ss_xx * ss_yy);

    Some(CvdRegressionModel {
        beta0,
        beta1,
        r_squared,
        n: x.len(),
    })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    /// Series where CVD change tracks price change tightly, with an optional
    /// divergent final bar.
    fn tracking_series(n: usize, divergent_tail: bool) -> Vec<CvdPoint> {
        let mut price = 100.0;
        let mut cvd = 0.0;
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let dp = 1.5 * ((i as f64) * 0.8).sin();
            price += dp;
            let mut dcvd = 40.0 * dp + 0.5 * ((i as f64) * 2.1).cos();
            if divergent_tail && i == n - 1 {
                dcvd += 500.0; // Huge flow the price move does not explain.
            }
            cvd += dcvd;
            out.push(CvdPoint {
                timestamp: i as i64 * 86_400_000,
                price,
                cvd,
                volume: 1_000.0,
            });
        }
        out
    }

    #[test]
    fn too_short_series_yields_none() {
        assert!(analyze_cvd(&tracking_series(2, false)).is_none());
    }

    #[test]
    fn well_fit_series_without_divergence_is_insignificant() {
        let result = analyze_cvd(&tracking_series(120, false)).unwrap();
        assert_eq!(result.method, CvdMethod::Regression);
        let model = result.model.unwrap();
        assert!(model.r_squared >= MIN_R_SQUARED, "R² = {}", model.r_squared);
        assert!(!result.significant);
    }

    #[test]
    fn divergent_tail_is_significant_on_the_regression_path() {
        let result = analyze_cvd(&tracking_series(120, true)).unwrap();
        assert_eq!(result.method, CvdMethod::Regression);
        assert!(result.z_score.unwrap().abs() >= SIGNIFICANCE_Z);
        assert!(result.significant);
        assert!(result.percentile_rank >= 95.0);
    }

    #[test]
    fn short_series_takes_the_percentile_fallback() {
        let result = analyze_cvd(&tracking_series(30, false)).unwrap();
        assert_eq!(result.method, CvdMethod::PercentileFallback);
        assert!(result.z_score.is_none());
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn noise_series_falls_back_on_weak_fit() {
        // CVD changes unrelated to price changes.
        let mut price = 100.0;
        let mut cvd = 0.0;
        let series: Vec<CvdPoint> = (0..100)
            .map(|i| {
                price += ((i as f64) * 0.8).sin();
                cvd += 100.0 * ((i as f64) * 2.7).cos();
                CvdPoint {
                    timestamp: i as i64,
                    price,
                    cvd,
                    volume: 1.0,
                }
            })
            .collect();

        let result = analyze_cvd(&series).unwrap();
        assert_eq!(result.method, CvdMethod::PercentileFallback);
        assert!(result.warnings.iter().any(|w| w.contains("R²")));
    }

    #[test]
    fn fallback_significance_is_percentile_only() {
        // A fallback series whose last change tops the 20-point window.
        let mut cvd = 0.0;
        let mut series: Vec<CvdPoint> = (0..25)
            .map(|i| {
                cvd += 1.0;
                CvdPoint {
                    timestamp: i as i64,
                    price: 100.0 + i as f64 * 0.01,
                    cvd,
                    volume: 1.0,
                }
            })
            .collect();
        // Final surge.
        let last = series.last().unwrap();
        series.push(CvdPoint {
            timestamp: last.timestamp + 1,
            price: last.price,
            cvd: last.cvd + 50.0,
            volume: 1.0,
        });

        let result = analyze_cvd(&series).unwrap();
        assert_eq!(result.method, CvdMethod::PercentileFallback);
        assert!(result.percentile_rank >= FALLBACK_PERCENTILE);
        assert!(result.significant);
    }

    #[test]
    fn winsorize_clamps_outliers() {
        let mut values = vec![1.0; 98];
        values.push(1000.0);
        values.push(-1000.0);
        let w = winsorize(&values);
        assert!(w.iter().all(|v| v.abs() <= 1.0 + 1e-9));
    }

    #[test]
    fn percentile_rank_bounds() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile_rank(&values, 5.0), 100.0);
        assert_eq!(percentile_rank(&values, 1.0), 20.0);
        assert_eq!(percentile_rank(&values, 0.0), 0.0);
    }
}
