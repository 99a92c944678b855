// =============================================================================
// Policy Matrix — depeg, risk-off, and venue health into one action
// =============================================================================
//
// Three sub-checks run in sequence:
//
//   1. Depeg guard: warning band recommends monitoring (deferred at the
//      action level), the critical band halts outright.
//   2. Risk-off toggle: High => halt, Medium => reduce size (deferred at the
//      action level), Low => monitor.
//   3. Venue health & fallback: an unhealthy primary triggers a scan of the
//      configured preference list, skipping the failed primary; the first
//      healthy, fallback-eligible venue wins.
//
// A halt from an earlier check short-circuits venue selection (no venue is
// chosen for a halted evaluation). The final recommendation is the
// severity-max across sub-checks: halt > defer > proceed_with_fallback >
// proceed.
//
// The confidence score starts at 1.0 and is penalized per policy violation
// (-0.2), for using a fallback at all (-0.1), and per additional fallback
// attempt (-0.05); when risk-off is active the result is further multiplied
// by the risk-off confidence.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PolicyConfig;
use crate::policy::depeg::{DepegCheck, DepegMonitor};
use crate::policy::risk_off::{RiskOffMonitor, RiskOffState, Severity};
use crate::policy::venue_health::VenueHealthTracker;
use crate::types::{RecommendedAction, Venue};

// =============================================================================
// Types
// =============================================================================

/// Inputs for one policy evaluation.
#[derive(Debug, Clone, Default)]
pub struct PolicyInputs {
    pub symbol: String,
    /// Observed USD prices for monitored stablecoins.
    pub stable_prices: HashMap<String, f64>,
}

/// Risk-off sub-check record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOffCheckRecord {
    pub active: bool,
    pub severity: Severity,
    pub confidence: f64,
    /// Set when severity is Medium: downstream should reduce size.
    pub reduce_size_hint: bool,
    pub action: RecommendedAction,
}

/// Venue sub-check record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueCheckRecord {
    pub primary: Venue,
    pub primary_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_venue: Option<Venue>,
    pub fallback_used: bool,
    pub fallback_attempts: u32,
    pub action: RecommendedAction,
}

/// Complete policy verdict for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluationResult {
    pub symbol: String,
    pub depeg_check: DepegCheck,
    pub risk_off_check: RiskOffCheckRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue_health_check: Option<VenueCheckRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chosen_venue: Option<Venue>,
    pub fallback_attempts: u32,
    pub recommended_action: RecommendedAction,
    pub confidence_score: f64,
}

// =============================================================================
// Matrix
// =============================================================================

pub struct PolicyMatrix {
    cfg: PolicyConfig,
    depeg: DepegMonitor,
    risk_off: Arc<RiskOffMonitor>,
    venues: Arc<VenueHealthTracker>,
}

impl PolicyMatrix {
    pub fn new(
        cfg: PolicyConfig,
        risk_off: Arc<RiskOffMonitor>,
        venues: Arc<VenueHealthTracker>,
    ) -> Self {
        let depeg = DepegMonitor::new(cfg.depeg.clone());
        Self {
            cfg,
            depeg,
            risk_off,
            venues,
        }
    }

    /// Run the three sub-checks and adjudicate.
    pub fn evaluate(&self, inputs: &PolicyInputs) -> PolicyEvaluationResult {
        let mut violations = 0u32;

        // ── 1. Depeg guard ──────────────────────────────────────────────
        let depeg_check = self.depeg.check(&inputs.symbol, &inputs.stable_prices);
        let depeg_action = match &depeg_check.alert {
            Some(alert) if alert.recommended_action == "halt" => RecommendedAction::Halt,
            Some(_) => RecommendedAction::Defer,
            None => RecommendedAction::Proceed,
        };
        if depeg_check.detected {
            violations += 1;
        }

        // ── 2. Risk-off toggle ──────────────────────────────────────────
        let risk_state: Arc<RiskOffState> = self.risk_off.snapshot();
        let risk_action = if risk_state.active {
            violations += 1;
            match risk_state.severity {
                Severity::High => RecommendedAction::Halt,
                Severity::Medium => RecommendedAction::Defer,
                Severity::Low => RecommendedAction::Defer,
            }
        } else {
            RecommendedAction::Proceed
        };
        let risk_off_check = RiskOffCheckRecord {
            active: risk_state.active,
            severity: risk_state.severity,
            confidence: risk_state.confidence,
            reduce_size_hint: risk_state.active && risk_state.severity == Severity::Medium,
            action: risk_action,
        };

        // ── 3. Venue health & fallback ──────────────────────────────────
        // A halt already decided makes venue selection moot.
        let halted = depeg_action == RecommendedAction::Halt || risk_action == RecommendedAction::Halt;
        let venue_check = if halted {
            None
        } else {
            Some(self.select_venue())
        };

        let (chosen_venue, fallback_attempts, fallback_used) = match &venue_check {
            Some(check) => (check.chosen_venue, check.fallback_attempts, check.fallback_used),
            None => (None, 0, false),
        };

        // ── Final adjudication: severity-max ────────────────────────────
        let mut recommended_action = depeg_action.max(risk_action);
        if let Some(check) = &venue_check {
            recommended_action = recommended_action.max(check.action);
        }

        let mut confidence = 1.0_f64;
        confidence -= 0.2 * f64::from(violations);
        if fallback_used {
            confidence -= 0.1;
            confidence -= 0.05 * f64::from(fallback_attempts.saturating_sub(1));
        }
        if risk_state.active {
            confidence *= risk_state.confidence;
        }
        let confidence_score = confidence.clamp(0.0, 1.0);

        if recommended_action != RecommendedAction::Proceed {
            info!(
                symbol = %inputs.symbol,
                action = %recommended_action,
                confidence = format!("{confidence_score:.2}"),
                "policy downgraded action"
            );
        } else {
            debug!(symbol = %inputs.symbol, "policy clear");
        }

        PolicyEvaluationResult {
            symbol: inputs.symbol.clone(),
            depeg_check,
            risk_off_check,
            venue_health_check: venue_check,
            chosen_venue,
            fallback_attempts,
            recommended_action,
            confidence_score,
        }
    }

    /// Pick the primary venue, or walk the preference list when it is
    /// unhealthy.
    fn select_venue(&self) -> VenueCheckRecord {
        let primary = self.cfg.primary_venues[0];
        let primary_status = self.venues.status(primary);

        if primary_status.healthy {
            return VenueCheckRecord {
                primary,
                primary_healthy: true,
                chosen_venue: Some(primary),
                fallback_used: false,
                fallback_attempts: 0,
                action: RecommendedAction::Proceed,
            };
        }

        if !self.cfg.venue_fallback_enabled {
            return VenueCheckRecord {
                primary,
                primary_healthy: false,
                chosen_venue: None,
                fallback_used: false,
                fallback_attempts: 0,
                action: RecommendedAction::Defer,
            };
        }

        let mut attempts = 0u32;
        for &candidate in self.cfg.primary_venues.iter().skip(1) {
            attempts += 1;
            if self.venues.usable_as_fallback(candidate) {
                info!(%primary, fallback = %candidate, attempts, "primary unhealthy, fallback selected");
                return VenueCheckRecord {
                    primary,
                    primary_healthy: false,
                    chosen_venue: Some(candidate),
                    fallback_used: true,
                    fallback_attempts: attempts,
                    action: RecommendedAction::ProceedWithFallback,
                };
            }
        }

        // Nothing healthy left.
        VenueCheckRecord {
            primary,
            primary_healthy: false,
            chosen_venue: None,
            fallback_used: true,
            fallback_attempts: attempts,
            action: RecommendedAction::Defer,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VenueHealthConfig;
    use crate::policy::venue_health::VenueMetrics;
    use crate::regime::{Regime, RegimeSnapshot};

    fn matrix() -> (PolicyMatrix, Arc<RiskOffMonitor>, Arc<VenueHealthTracker>) {
        let risk_off = Arc::new(RiskOffMonitor::new());
        let venues = Arc::new(VenueHealthTracker::new(VenueHealthConfig::default()));
        let matrix = PolicyMatrix::new(PolicyConfig::default(), risk_off.clone(), venues.clone());
        (matrix, risk_off, venues)
    }

    fn inputs(symbol: &str) -> PolicyInputs {
        PolicyInputs {
            symbol: symbol.to_string(),
            stable_prices: HashMap::new(),
        }
    }

    fn risk_off_snapshot(confidence: f64) -> RegimeSnapshot {
        RegimeSnapshot {
            regime: Regime::RiskOff,
            confidence,
            trigger_reasons: vec!["vix_spike(40.0)".to_string()],
            determined_at: 0,
            next_update_due: 0,
        }
    }

    #[test]
    fn clean_conditions_proceed_on_primary() {
        let (matrix, _, _) = matrix();
        let result = matrix.evaluate(&inputs("BTCUSD"));

        assert_eq!(result.recommended_action, RecommendedAction::Proceed);
        assert_eq!(result.chosen_venue, Some(Venue::Kraken));
        assert_eq!(result.fallback_attempts, 0);
        assert!((result.confidence_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unhealthy_primary_falls_back() {
        let (matrix, _, venues) = matrix();
        // Kraken rejected 15% of requests with a 3s p99.
        venues.record_metrics(
            Venue::Kraken,
            VenueMetrics {
                reject_rate_pct: 15.0,
                p99_latency_ms: 3000,
                error_rate_pct: 0.0,
                uptime_pct: 100.0,
            },
        );

        let result = matrix.evaluate(&inputs("BTCUSD"));
        assert_eq!(result.recommended_action, RecommendedAction::ProceedWithFallback);

        let chosen = result.chosen_venue.unwrap();
        assert_ne!(chosen, Venue::Kraken);
        assert!(PolicyConfig::default().primary_venues.contains(&chosen));
        assert!(result.fallback_attempts >= 1);
        assert!(result.confidence_score < 1.0);
    }

    #[test]
    fn fallback_skips_ineligible_venues() {
        let (matrix, _, venues) = matrix();
        let bad = VenueMetrics {
            reject_rate_pct: 50.0,
            p99_latency_ms: 9000,
            error_rate_pct: 20.0,
            uptime_pct: 50.0,
        };
        venues.record_metrics(Venue::Kraken, bad);
        // Coinbase unusable too.
        for _ in 0..5 {
            venues.record_metrics(Venue::Coinbase, bad);
        }

        let result = matrix.evaluate(&inputs("BTCUSD"));
        assert_eq!(result.chosen_venue, Some(Venue::Binance));
        assert_eq!(result.fallback_attempts, 2);
    }

    #[test]
    fn no_healthy_venue_defers() {
        let (matrix, _, venues) = matrix();
        let bad = VenueMetrics {
            reject_rate_pct: 50.0,
            p99_latency_ms: 9000,
            error_rate_pct: 20.0,
            uptime_pct: 50.0,
        };
        for venue in [Venue::Kraken, Venue::Coinbase, Venue::Binance, Venue::Okx] {
            for _ in 0..5 {
                venues.record_metrics(venue, bad);
            }
        }

        let result = matrix.evaluate(&inputs("BTCUSD"));
        assert_eq!(result.recommended_action, RecommendedAction::Defer);
        assert!(result.chosen_venue.is_none());
    }

    #[test]
    fn warning_depeg_defers_and_reports_monitor() {
        let (matrix, _, _) = matrix();
        let mut input = inputs("BTCUSDT");
        input.stable_prices.insert("USDT".to_string(), 0.985);

        let result = matrix.evaluate(&input);
        assert!(result.depeg_check.detected);
        assert_eq!(
            result.depeg_check.alert.as_ref().unwrap().recommended_action,
            "monitor"
        );
        assert_eq!(result.recommended_action, RecommendedAction::Defer);
        // Venue selection still ran.
        assert!(result.chosen_venue.is_some());
    }

    #[test]
    fn critical_depeg_halts_and_skips_venue_selection() {
        let (matrix, _, _) = matrix();
        let mut input = inputs("BTCUSDT");
        input.stable_prices.insert("USDT".to_string(), 0.975);

        let result = matrix.evaluate(&input);
        assert_eq!(
            result.depeg_check.alert.as_ref().unwrap().recommended_action,
            "halt"
        );
        assert_eq!(result.recommended_action, RecommendedAction::Halt);
        assert!(result.chosen_venue.is_none());
        assert!(result.venue_health_check.is_none());
    }

    #[test]
    fn high_risk_off_halts() {
        let (matrix, risk_off, _) = matrix();
        risk_off.update_from_regime(&risk_off_snapshot(0.9));

        let result = matrix.evaluate(&inputs("BTCUSD"));
        assert_eq!(result.recommended_action, RecommendedAction::Halt);
        assert_eq!(result.risk_off_check.severity, Severity::High);
    }

    #[test]
    fn medium_risk_off_defers_with_reduce_size_hint() {
        let (matrix, risk_off, _) = matrix();
        risk_off.update_from_regime(&risk_off_snapshot(0.5));

        let result = matrix.evaluate(&inputs("BTCUSD"));
        assert_eq!(result.recommended_action, RecommendedAction::Defer);
        assert!(result.risk_off_check.reduce_size_hint);
        // Confidence multiplied by the risk-off confidence.
        assert!(result.confidence_score <= 0.5);
    }

    #[test]
    fn confidence_penalties_stack() {
        let (matrix, _, venues) = matrix();
        venues.record_metrics(
            Venue::Kraken,
            VenueMetrics {
                reject_rate_pct: 15.0,
                p99_latency_ms: 3000,
                error_rate_pct: 0.0,
                uptime_pct: 100.0,
            },
        );

        let mut input = inputs("BTCUSDT");
        input.stable_prices.insert("USDT".to_string(), 0.985);

        let result = matrix.evaluate(&input);
        // One violation (-0.2) plus fallback (-0.1): 0.7.
        assert!((result.confidence_score - 0.7).abs() < 1e-9);
    }
}
