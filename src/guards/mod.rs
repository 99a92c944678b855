// =============================================================================
// Guard Layer — freshness / fatigue / late-fill / proximity
// =============================================================================
//
// Four pre-entry guards, each with a per-regime profile and a global safety
// clamp. The clamp is applied AFTER profile selection, so a misconfigured
// profile can never exceed the absolute hard limits:
//
//   | guard     | rejects                          | safety clamp       |
//   |-----------|----------------------------------|--------------------|
//   | freshness | signal older than N bars         | <= 5 bars          |
//   | fatigue   | 24h gain > pct AND 4h RSI > rsi  | pct <= 25, rsi <= 80 |
//   | late_fill | delay since trigger > N seconds  | <= 60 s            |
//   | proximity | entry distance > k * ATR         | —                  |
//
// The GUARDS_REGIME_AWARE environment variable toggles regime-aware
// profiles; any non-affirmative value falls back to the baseline (choppy)
// profile for every regime.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{GuardConfig, GuardProfile};
use crate::regime::Regime;

/// Absolute safety limits, applied after the regime profile.
pub const MAX_FRESHNESS_BARS: u32 = 5;
pub const MAX_FATIGUE_GAIN_PCT: f64 = 25.0;
pub const MAX_FATIGUE_RSI: f64 = 80.0;
pub const MAX_LATE_FILL_SECS: u64 = 60;

/// Environment variable that switches regime-aware guard profiles on.
pub const REGIME_AWARE_ENV: &str = "GUARDS_REGIME_AWARE";

// =============================================================================
// Types
// =============================================================================

/// Per-symbol observations the guards evaluate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardInputs {
    /// Bars elapsed since the entry signal fired.
    pub bars_since_signal: u32,

    /// 24h price change, percent (signed).
    pub gain_24h_pct: f64,

    /// 4h RSI, when kline data was available.
    pub rsi_4h: Option<f64>,

    /// Whether 4h momentum has re-accelerated since the gain built up.
    pub accel_renewed: bool,

    /// Seconds since the trigger fired.
    pub seconds_since_trigger: u64,

    /// Whether provider infrastructure is currently healthy.
    pub infra_healthy: bool,

    /// Entry distance from the trigger in ATR multiples.
    pub atr_distance: Option<f64>,
}

/// One guard's verdict with a machine-readable reason code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub name: String,
    pub passed: bool,
    /// Machine-readable reason code (stable across releases).
    pub reason: String,
    pub threshold_used: f64,
    /// Whether a regime-specific profile was in effect.
    pub regime_aware: bool,
}

/// Aggregate verdict over all four guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub passed: bool,
    pub results: Vec<GuardResult>,
}

impl GuardVerdict {
    /// Names of the guards that rejected.
    pub fn failed_guards(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.passed)
            .map(|r| r.name.as_str())
            .collect()
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct GuardEngine {
    cfg: GuardConfig,
    regime_aware: bool,
}

impl GuardEngine {
    pub fn new(cfg: GuardConfig, regime_aware: bool) -> Self {
        info!(regime_aware, "guard engine initialised");
        Self { cfg, regime_aware }
    }

    /// Build from config, reading the regime-aware toggle from the
    /// environment.
    pub fn from_env(cfg: GuardConfig) -> Self {
        Self::new(cfg, regime_aware_from_env())
    }

    /// Profile in effect for `regime` (baseline when regime-aware is off),
    /// before safety clamping.
    fn profile_for(&self, regime: Regime) -> GuardProfile {
        if !self.regime_aware {
            return self.cfg.choppy;
        }
        match regime {
            Regime::TrendingBull => self.cfg.trending_bull,
            Regime::Choppy => self.cfg.choppy,
            Regime::HighVol => self.cfg.high_vol,
            Regime::RiskOff => self.cfg.risk_off,
        }
    }

    /// Evaluate all four guards. Guards never short-circuit: the verdict
    /// always carries one result per guard.
    pub fn evaluate(&self, regime: Regime, inputs: &GuardInputs) -> GuardVerdict {
        let profile = self.profile_for(regime);
        let results = vec![
            self.freshness(&profile, inputs),
            self.fatigue(&profile, inputs),
            self.late_fill(&profile, inputs),
            self.proximity(&profile, inputs),
        ];

        let passed = results.iter().all(|r| r.passed);
        if !passed {
            debug!(
                %regime,
                failed = ?results.iter().filter(|r| !r.passed).map(|r| r.name.as_str()).collect::<Vec<_>>(),
                "guard layer rejected"
            );
        }

        GuardVerdict { passed, results }
    }

    fn freshness(&self, profile: &GuardProfile, inputs: &GuardInputs) -> GuardResult {
        let bars_max = profile.freshness_bars_max.min(MAX_FRESHNESS_BARS);
        let passed = inputs.bars_since_signal <= bars_max;

        GuardResult {
            name: "freshness".to_string(),
            passed,
            reason: if passed {
                "within_bar_budget".to_string()
            } else {
                format!("signal_age_{}_bars_exceeds_{}", inputs.bars_since_signal, bars_max)
            },
            threshold_used: f64::from(bars_max),
            regime_aware: self.regime_aware,
        }
    }

    fn fatigue(&self, profile: &GuardProfile, inputs: &GuardInputs) -> GuardResult {
        let gain_max = profile.fatigue_gain_pct.min(MAX_FATIGUE_GAIN_PCT);
        let rsi_max = profile.fatigue_rsi_max.min(MAX_FATIGUE_RSI);

        let overextended = inputs.gain_24h_pct > gain_max;
        let overbought = inputs.rsi_4h.map(|rsi| rsi > rsi_max).unwrap_or(false);
        let mut fatigued = overextended && overbought;

        // In trending regimes renewed acceleration overrides fatigue.
        if fatigued && profile.fatigue_accel_renewal && inputs.accel_renewed {
            fatigued = false;
        }

        GuardResult {
            name: "fatigue".to_string(),
            passed: !fatigued,
            reason: if fatigued {
                format!(
                    "gain_{:.1}pct_rsi_{:.0}_exceeds_{:.0}pct_{:.0}",
                    inputs.gain_24h_pct,
                    inputs.rsi_4h.unwrap_or(0.0),
                    gain_max,
                    rsi_max
                )
            } else if overextended && profile.fatigue_accel_renewal && inputs.accel_renewed {
                "acceleration_renewed".to_string()
            } else {
                "not_fatigued".to_string()
            },
            threshold_used: gain_max,
            regime_aware: self.regime_aware,
        }
    }

    fn late_fill(&self, profile: &GuardProfile, inputs: &GuardInputs) -> GuardResult {
        let max_secs = profile.late_fill_max_secs.min(MAX_LATE_FILL_SECS);

        let mut passed = inputs.seconds_since_trigger <= max_secs;
        let mut reason = if passed {
            "within_fill_window".to_string()
        } else {
            format!(
                "delay_{}s_exceeds_{}s",
                inputs.seconds_since_trigger, max_secs
            )
        };

        // The relaxed trending window only applies with healthy infra and
        // the entry still within ATR proximity of the trigger.
        if passed && profile.late_fill_requires_infra {
            if !inputs.infra_healthy {
                passed = false;
                reason = "infra_unhealthy".to_string();
            } else if inputs
                .atr_distance
                .map(|d| d > profile.proximity_atr_mult)
                .unwrap_or(false)
            {
                passed = false;
                reason = "price_moved_beyond_atr_proximity".to_string();
            }
        }

        GuardResult {
            name: "late_fill".to_string(),
            passed,
            reason,
            threshold_used: max_secs as f64,
            regime_aware: self.regime_aware,
        }
    }

    fn proximity(&self, profile: &GuardProfile, inputs: &GuardInputs) -> GuardResult {
        let (passed, reason) = match inputs.atr_distance {
            Some(distance) if distance > profile.proximity_atr_mult => (
                false,
                format!(
                    "distance_{:.2}_atr_exceeds_{:.2}",
                    distance, profile.proximity_atr_mult
                ),
            ),
            Some(_) => (true, "within_atr_proximity".to_string()),
            // Without ATR data the guard cannot assess distance.
            None => (true, "atr_unavailable".to_string()),
        };

        GuardResult {
            name: "proximity".to_string(),
            passed,
            reason,
            threshold_used: profile.proximity_atr_mult,
            regime_aware: self.regime_aware,
        }
    }
}

/// Parse the regime-aware toggle: only "true" and "1" (case-insensitive)
/// enable it; anything else, including unset, is the baseline.
pub fn regime_aware_from_env() -> bool {
    match std::env::var(REGIME_AWARE_ENV) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        Err(_) => false,
    }
}
