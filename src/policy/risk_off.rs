// =============================================================================
// Risk-Off Toggle — severity-graded market risk state
// =============================================================================
//
// Consumes the regime detector's risk-off classification and grades it:
//
//   confidence >= 0.70 => High    => halt
//   confidence >= 0.45 => Medium  => reduce size (defer at the action level)
//   otherwise          => Low     => monitor
//
// Once active, the state holds through a cooldown after the regime clears,
// so one borderline re-classification cannot whipsaw the policy verdict.
// Readers take an Arc snapshot; updates swap the whole record.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::regime::{Regime, RegimeSnapshot};

/// Cooldown after the regime leaves risk-off.
const COOLDOWN_MS: i64 = 30 * 60 * 1000;

const HIGH_CONFIDENCE: f64 = 0.70;
const MEDIUM_CONFIDENCE: f64 = 0.45;

/// Risk-off severity grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    fn from_confidence(confidence: f64) -> Self {
        if confidence >= HIGH_CONFIDENCE {
            Self::High
        } else if confidence >= MEDIUM_CONFIDENCE {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Published risk-off state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskOffState {
    pub active: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub trigger_reasons: Vec<String>,
    pub confidence: f64,
    pub severity: Severity,
    /// When the cooldown expires (ms since epoch); only meaningful while
    /// active.
    pub cooldown_until: i64,
}

impl RiskOffState {
    fn inactive() -> Self {
        Self {
            active: false,
            trigger_reasons: Vec::new(),
            confidence: 0.0,
            severity: Severity::Low,
            cooldown_until: 0,
        }
    }
}

/// Copy-on-write risk-off publication point.
pub struct RiskOffMonitor {
    state: RwLock<Arc<RiskOffState>>,
}

impl RiskOffMonitor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Arc::new(RiskOffState::inactive())),
        }
    }

    /// Update from a fresh regime classification.
    pub fn update_from_regime(&self, snapshot: &RegimeSnapshot) {
        let now = Utc::now().timestamp_millis();

        let next = if snapshot.regime == Regime::RiskOff {
            let severity = Severity::from_confidence(snapshot.confidence);
            info!(
                confidence = format!("{:.2}", snapshot.confidence),
                ?severity,
                "risk-off active"
            );
            RiskOffState {
                active: true,
                trigger_reasons: snapshot.trigger_reasons.clone(),
                confidence: snapshot.confidence,
                severity,
                cooldown_until: now + COOLDOWN_MS,
            }
        } else {
            let current = self.snapshot();
            if current.active && now < current.cooldown_until {
                // Regime cleared but the cooldown holds; decay to Low.
                debug!("risk-off held open by cooldown");
                RiskOffState {
                    severity: Severity::Low,
                    ..(*current).clone()
                }
            } else {
                RiskOffState::inactive()
            }
        };

        *self.state.write() = Arc::new(next);
    }

    /// Snapshot pointer; stable for the duration of one evaluation.
    pub fn snapshot(&self) -> Arc<RiskOffState> {
        self.state.read().clone()
    }
}

impl Default for RiskOffMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn regime_snapshot(regime: Regime, confidence: f64) -> RegimeSnapshot {
        RegimeSnapshot {
            regime,
            confidence,
            trigger_reasons: vec!["btc_drop(-16.0%)".to_string()],
            determined_at: 0,
            next_update_due: 0,
        }
    }

    #[test]
    fn severity_grading_from_confidence() {
        assert_eq!(Severity::from_confidence(0.9), Severity::High);
        assert_eq!(Severity::from_confidence(0.7), Severity::High);
        assert_eq!(Severity::from_confidence(0.5), Severity::Medium);
        assert_eq!(Severity::from_confidence(0.3), Severity::Low);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn risk_off_regime_activates_state() {
        let monitor = RiskOffMonitor::new();
        monitor.update_from_regime(&regime_snapshot(Regime::RiskOff, 0.8));

        let state = monitor.snapshot();
        assert!(state.active);
        assert_eq!(state.severity, Severity::High);
        assert!(!state.trigger_reasons.is_empty());
    }

    #[test]
    fn clearing_regime_decays_through_cooldown() {
        let monitor = RiskOffMonitor::new();
        monitor.update_from_regime(&regime_snapshot(Regime::RiskOff, 0.8));
        monitor.update_from_regime(&regime_snapshot(Regime::Choppy, 0.5));

        // Still active inside the cooldown window, decayed to Low.
        let state = monitor.snapshot();
        assert!(state.active);
        assert_eq!(state.severity, Severity::Low);
    }

    #[test]
    fn never_active_stays_inactive() {
        let monitor = RiskOffMonitor::new();
        monitor.update_from_regime(&regime_snapshot(Regime::TrendingBull, 0.9));
        assert!(!monitor.snapshot().active);
    }

    #[test]
    fn snapshot_is_stable_across_updates() {
        let monitor = RiskOffMonitor::new();
        monitor.update_from_regime(&regime_snapshot(Regime::RiskOff, 0.8));
        let before = monitor.snapshot();

        monitor.update_from_regime(&regime_snapshot(Regime::RiskOff, 0.3));
        assert_eq!(before.severity, Severity::High);
        assert_eq!(monitor.snapshot().severity, Severity::Low);
    }
}
