// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the market into one of four regimes from market-wide indicators.
// Re-evaluated on a 4-hour cadence; between evaluations readers see the last
// published snapshot.
//
// Classification precedence (first match wins):
//
//   1. RISK_OFF      — any two of {VIX spike, BTC -15%/24h, stablecoin-volume
//                      spike >= 3x, extreme funding >= 0.1%} with cumulative
//                      confidence >= 0.3
//   2. HIGH_VOL      — realized vol or the VIX-equivalent above threshold
//   3. TRENDING_BULL — strong positive BTC momentum + low cross-section
//                      dispersion
//   4. CHOPPY        — everything else

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RegimeDetectorConfig;

/// Regime re-evaluation cadence.
pub const UPDATE_INTERVAL_MS: i64 = 4 * 3_600 * 1000;

// =============================================================================
// Types
// =============================================================================

/// The four market regimes the scanner routes weights for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    TrendingBull,
    Choppy,
    HighVol,
    RiskOff,
}

impl Regime {
    /// Canonicalize a regime label, folding the aliases seen in configs and
    /// upstream feeds. Unknown labels map to the conservative default.
    pub fn from_label(label: &str) -> Regime {
        match label.trim().to_ascii_lowercase().as_str() {
            "trending_bull" | "trending" | "bull" => Regime::TrendingBull,
            "choppy" | "chop" | "normal" | "calm" => Regime::Choppy,
            "high_vol" | "volatile" | "highvol" => Regime::HighVol,
            "risk_off" | "riskoff" | "bear" | "btc_driven" => Regime::RiskOff,
            _ => Regime::Choppy,
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrendingBull => write!(f, "trending_bull"),
            Self::Choppy => write!(f, "choppy"),
            Self::HighVol => write!(f, "high_vol"),
            Self::RiskOff => write!(f, "risk_off"),
        }
    }
}

/// Market-wide indicator inputs to one classification pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketIndicators {
    /// BTC 24h change, percent (signed).
    pub btc_change_24h_pct: f64,

    /// Share of tracked symbols advancing over 24h, percent.
    pub breadth_advancing_pct: f64,

    /// Cross-sectional dispersion of 24h returns (stdev, fractional).
    pub cross_section_dispersion: f64,

    /// Realized volatility, 7d annualized (fractional, 0.75 = 75%).
    pub realized_vol_7d: f64,

    /// VIX-equivalent level.
    pub vix_proxy: f64,

    /// Largest absolute funding rate across venues, percent per interval.
    pub max_abs_funding_pct: f64,

    /// Stablecoin volume vs its trailing average (1.0 = normal).
    pub stablecoin_volume_ratio: f64,

    /// Snapshot time (ms since epoch).
    pub timestamp: i64,
}

/// Published classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub regime: Regime,
    pub confidence: f64,
    /// Risk-off trigger descriptions, when any fired.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub trigger_reasons: Vec<String>,
    /// When this classification was made (ms since epoch).
    pub determined_at: i64,
    /// When the next 4h re-evaluation is due (ms since epoch).
    pub next_update_due: i64,
}

// =============================================================================
// Detector
// =============================================================================

/// Thread-safe detector that caches the latest snapshot. Shared via `Arc`;
/// writers publish a whole new snapshot, readers clone it.
pub struct RegimeDetector {
    cfg: RegimeDetectorConfig,
    state: RwLock<Option<RegimeSnapshot>>,
}

impl RegimeDetector {
    pub fn new(cfg: RegimeDetectorConfig) -> Self {
        Self {
            cfg,
            state: RwLock::new(None),
        }
    }

    /// Classify `indicators` and publish the snapshot.
    pub fn evaluate(&self, indicators: &MarketIndicators) -> RegimeSnapshot {
        let (regime, confidence, trigger_reasons) = classify(&self.cfg, indicators);

        let now = Utc::now().timestamp_millis();
        let snapshot = RegimeSnapshot {
            regime,
            confidence,
            trigger_reasons,
            determined_at: now,
            next_update_due: now + UPDATE_INTERVAL_MS,
        };

        let previous = self.state.read().as_ref().map(|s| s.regime);
        if previous != Some(regime) {
            info!(%regime, confidence = format!("{confidence:.2}"), "regime changed");
        } else {
            debug!(%regime, confidence = format!("{confidence:.2}"), "regime re-confirmed");
        }

        *self.state.write() = Some(snapshot.clone());
        snapshot
    }

    /// Last published snapshot without recomputing.
    pub fn current(&self) -> Option<RegimeSnapshot> {
        self.state.read().clone()
    }

    /// Whether the 4h re-evaluation is due.
    pub fn update_due(&self) -> bool {
        match self.state.read().as_ref() {
            Some(snapshot) => Utc::now().timestamp_millis() >= snapshot.next_update_due,
            None => true,
        }
    }
}

// =============================================================================
// Classification logic
// =============================================================================

/// Determine the regime, a confidence score, and any risk-off triggers.
fn classify(
    cfg: &RegimeDetectorConfig,
    ind: &MarketIndicators,
) -> (Regime, f64, Vec<String>) {
    // 1. RISK_OFF — accumulate independent triggers.
    let mut triggers: Vec<(String, f64)> = Vec::new();
    if ind.vix_proxy >= cfg.vix_spike {
        triggers.push((format!("vix_spike({:.1})", ind.vix_proxy), 0.3));
    }
    if ind.btc_change_24h_pct <= -cfg.btc_drop_pct {
        triggers.push((format!("btc_drop({:+.1}%)", ind.btc_change_24h_pct), 0.4));
    }
    if ind.stablecoin_volume_ratio >= cfg.stable_volume_spike_ratio {
        triggers.push((
            format!("stablecoin_spike({:.1}x)", ind.stablecoin_volume_ratio),
            0.2,
        ));
    }
    if ind.max_abs_funding_pct >= cfg.funding_extreme_pct {
        triggers.push((format!("extreme_funding({:.3}%)", ind.max_abs_funding_pct), 0.2));
    }

    let cumulative: f64 = triggers.iter().map(|(_, c)| c).sum();
    if triggers.len() >= 2 && cumulative >= cfg.min_risk_off_confidence {
        let reasons = triggers.into_iter().map(|(r, _)| r).collect();
        return (Regime::RiskOff, cumulative.min(1.0), reasons);
    }

    // 2. HIGH_VOL
    if ind.realized_vol_7d >= cfg.high_vol_realized || ind.vix_proxy >= cfg.vix_spike {
        let conf = remap(
            ind.realized_vol_7d.max(ind.vix_proxy / cfg.vix_spike * cfg.high_vol_realized),
            cfg.high_vol_realized,
            cfg.high_vol_realized * 2.0,
            0.6,
            1.0,
        );
        return (Regime::HighVol, conf, Vec::new());
    }

    // 3. TRENDING_BULL
    if ind.btc_change_24h_pct >= cfg.bull_btc_change_pct
        && ind.cross_section_dispersion <= cfg.bull_max_dispersion
    {
        let momentum_conf = remap(
            ind.btc_change_24h_pct,
            cfg.bull_btc_change_pct,
            cfg.bull_btc_change_pct * 3.0,
            0.6,
            1.0,
        );
        let breadth_conf = remap(ind.breadth_advancing_pct, 50.0, 90.0, 0.5, 1.0);
        return (Regime::TrendingBull, (momentum_conf + breadth_conf) / 2.0, Vec::new());
    }

    // 4. CHOPPY — default.
    (Regime::Choppy, 0.5, Vec::new())
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`,
/// clamped to the output range.
fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        ((value - in_lo) / (in_hi - in_lo)).clamp(0.0, 1.0)
    };
    out_lo + t * (out_hi - out_lo)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn calm_indicators() -> MarketIndicators {
        MarketIndicators {
            btc_change_24h_pct: 0.5,
            breadth_advancing_pct: 50.0,
            cross_section_dispersion: 0.2,
            realized_vol_7d: 0.4,
            vix_proxy: 18.0,
            max_abs_funding_pct: 0.01,
            stablecoin_volume_ratio: 1.0,
            timestamp: 0,
        }
    }

    fn cfg() -> RegimeDetectorConfig {
        RegimeDetectorConfig::default()
    }

    #[test]
    fn calm_market_is_choppy() {
        let (regime, conf, _) = classify(&cfg(), &calm_indicators());
        assert_eq!(regime, Regime::Choppy);
        assert!(conf > 0.0);
    }

    #[test]
    fn two_triggers_enter_risk_off() {
        let mut ind = calm_indicators();
        ind.btc_change_24h_pct = -16.0;
        ind.stablecoin_volume_ratio = 3.5;

        let (regime, conf, reasons) = classify(&cfg(), &ind);
        assert_eq!(regime, Regime::RiskOff);
        assert!(conf >= 0.3);
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn single_trigger_is_not_risk_off() {
        let mut ind = calm_indicators();
        ind.btc_change_24h_pct = -20.0;

        let (regime, _, _) = classify(&cfg(), &ind);
        assert_ne!(regime, Regime::RiskOff);
    }

    #[test]
    fn risk_off_dominates_high_vol_and_trend() {
        let mut ind = calm_indicators();
        // Conditions for all three at once.
        ind.vix_proxy = 40.0;
        ind.max_abs_funding_pct = 0.15;
        ind.realized_vol_7d = 1.2;
        ind.btc_change_24h_pct = 8.0;
        ind.cross_section_dispersion = 0.1;

        let (regime, _, _) = classify(&cfg(), &ind);
        assert_eq!(regime, Regime::RiskOff);
    }

    #[test]
    fn high_vol_beats_trending() {
        let mut ind = calm_indicators();
        ind.realized_vol_7d = 1.0;
        ind.btc_change_24h_pct = 8.0;

        let (regime, _, _) = classify(&cfg(), &ind);
        assert_eq!(regime, Regime::HighVol);
    }

    #[test]
    fn strong_btc_with_low_dispersion_is_trending() {
        let mut ind = calm_indicators();
        ind.btc_change_24h_pct = 5.0;
        ind.breadth_advancing_pct = 70.0;
        ind.cross_section_dispersion = 0.2;

        let (regime, conf, _) = classify(&cfg(), &ind);
        assert_eq!(regime, Regime::TrendingBull);
        assert!(conf >= 0.5);
    }

    #[test]
    fn high_dispersion_blocks_trending() {
        let mut ind = calm_indicators();
        ind.btc_change_24h_pct = 5.0;
        ind.cross_section_dispersion = 0.6;

        let (regime, _, _) = classify(&cfg(), &ind);
        assert_eq!(regime, Regime::Choppy);
    }

    #[test]
    fn aliases_canonicalize() {
        assert_eq!(Regime::from_label("bear"), Regime::RiskOff);
        assert_eq!(Regime::from_label("btc_driven"), Regime::RiskOff);
        assert_eq!(Regime::from_label("normal"), Regime::Choppy);
        assert_eq!(Regime::from_label("calm"), Regime::Choppy);
        assert_eq!(Regime::from_label("TRENDING_BULL"), Regime::TrendingBull);
        assert_eq!(Regime::from_label("volatile"), Regime::HighVol);
        assert_eq!(Regime::from_label("martian"), Regime::Choppy);
    }

    #[test]
    fn detector_publishes_snapshot_with_cadence() {
        let detector = RegimeDetector::new(cfg());
        assert!(detector.update_due());

        let snapshot = detector.evaluate(&calm_indicators());
        assert_eq!(snapshot.next_update_due - snapshot.determined_at, UPDATE_INTERVAL_MS);
        assert!(!detector.update_due());
        assert_eq!(detector.current().unwrap().regime, Regime::Choppy);
    }
}
