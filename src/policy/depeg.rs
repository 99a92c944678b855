// =============================================================================
// Depeg Guard — stablecoin peg monitoring
// =============================================================================
//
// Watches the monitored stablecoins for deviation from the $1.00 peg:
//
//   depeg >= warn_bps (default 100)  => "monitor" alert
//   depeg >= halt_bps (default 200)  => "halt" alert
//
// After an alert fires, a cooldown (default 30 min) keeps the alert active
// even if the price snaps back, so a flapping peg cannot toggle the policy
// verdict on every scan.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DepegConfig;
use crate::providers::symbols;

/// Alert severity bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Critical,
}

/// A fired depeg alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepegAlert {
    pub stablecoin: String,
    pub price: f64,
    pub depeg_bps: f64,
    pub alert_level: AlertLevel,
    /// "monitor" for warnings, "halt" for critical depegs.
    pub recommended_action: String,
    /// When the alert fired (ms since epoch).
    pub fired_at: i64,
}

/// Depeg check outcome for one pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepegCheck {
    /// Whether the pair involves a monitored stablecoin at all.
    pub monitored: bool,
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<DepegAlert>,
    /// True when the alert is only held open by the cooldown.
    pub in_cooldown: bool,
}

impl DepegCheck {
    fn clear(monitored: bool) -> Self {
        Self {
            monitored,
            detected: false,
            alert: None,
            in_cooldown: false,
        }
    }
}

struct ActiveAlert {
    alert: DepegAlert,
    cooldown_until_ms: i64,
}

/// Stateful monitor shared across scans.
pub struct DepegMonitor {
    cfg: DepegConfig,
    active: RwLock<HashMap<String, ActiveAlert>>,
}

impl DepegMonitor {
    pub fn new(cfg: DepegConfig) -> Self {
        Self {
            cfg,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Stablecoin involved in `symbol` that this monitor watches, if any.
    fn monitored_coin(&self, symbol: &str) -> Option<String> {
        let parts = symbols::split(symbol)?;
        for coin in [&parts.base, &parts.quote] {
            if self.cfg.monitored.iter().any(|m| m == coin) {
                return Some(coin.clone());
            }
        }
        None
    }

    /// Check the pair against current stablecoin prices.
    ///
    /// `stable_prices` maps stablecoin tickers to their observed USD price;
    /// a coin missing from the map is assumed on-peg.
    pub fn check(&self, symbol: &str, stable_prices: &HashMap<String, f64>) -> DepegCheck {
        let Some(coin) = self.monitored_coin(symbol) else {
            return DepegCheck::clear(false);
        };

        let now = Utc::now().timestamp_millis();
        let price = stable_prices.get(&coin).copied().unwrap_or(1.0);
        let depeg_bps = (price - 1.0).abs() * 10_000.0;

        if depeg_bps >= self.cfg.warn_bps {
            let (level, action) = if depeg_bps >= self.cfg.halt_bps {
                (AlertLevel::Critical, "halt")
            } else {
                (AlertLevel::Warning, "monitor")
            };

            let alert = DepegAlert {
                stablecoin: coin.clone(),
                price,
                depeg_bps,
                alert_level: level,
                recommended_action: action.to_string(),
                fired_at: now,
            };
            warn!(
                stablecoin = %coin,
                price,
                depeg_bps = format!("{depeg_bps:.0}"),
                action,
                "stablecoin depeg detected"
            );

            self.active.write().insert(
                coin,
                ActiveAlert {
                    alert: alert.clone(),
                    cooldown_until_ms: now + (self.cfg.cooldown_mins * 60_000) as i64,
                },
            );

            return DepegCheck {
                monitored: true,
                detected: true,
                alert: Some(alert),
                in_cooldown: false,
            };
        }

        // On-peg right now; hold a recent alert open through its cooldown.
        let mut active = self.active.write();
        if let Some(existing) = active.get(&coin) {
            if now < existing.cooldown_until_ms {
                debug!(stablecoin = %coin, "depeg alert held open by cooldown");
                return DepegCheck {
                    monitored: true,
                    detected: true,
                    alert: Some(existing.alert.clone()),
                    in_cooldown: true,
                };
            }
            active.remove(&coin);
        }

        DepegCheck::clear(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> DepegMonitor {
        DepegMonitor::new(DepegConfig::default())
    }

    fn prices(coin: &str, price: f64) -> HashMap<String, f64> {
        HashMap::from([(coin.to_string(), price)])
    }

    #[test]
    fn non_stable_pair_is_not_monitored() {
        let check = monitor().check("BTCETH", &HashMap::new());
        assert!(!check.monitored);
        assert!(!check.detected);
    }

    #[test]
    fn on_peg_pair_is_clear() {
        let check = monitor().check("BTCUSDT", &prices("USDT", 0.9995));
        assert!(check.monitored);
        assert!(!check.detected);
    }

    #[test]
    fn warning_band_recommends_monitor() {
        // 150 bps below peg.
        let check = monitor().check("BTCUSDT", &prices("USDT", 0.985));
        assert!(check.detected);
        let alert = check.alert.unwrap();
        assert_eq!(alert.alert_level, AlertLevel::Warning);
        assert_eq!(alert.recommended_action, "monitor");
        assert!((alert.depeg_bps - 150.0).abs() < 1.0);
    }

    #[test]
    fn critical_band_recommends_halt() {
        // 250 bps below peg.
        let check = monitor().check("BTCUSDT", &prices("USDT", 0.975));
        let alert = check.alert.unwrap();
        assert_eq!(alert.alert_level, AlertLevel::Critical);
        assert_eq!(alert.recommended_action, "halt");
    }

    #[test]
    fn premium_depegs_count_too() {
        let check = monitor().check("BTCUSDT", &prices("USDT", 1.015));
        assert!(check.detected);
    }

    #[test]
    fn cooldown_holds_alert_after_recovery() {
        let m = monitor();
        assert!(m.check("BTCUSDT", &prices("USDT", 0.985)).detected);

        // Peg restored, but the 30 min cooldown keeps the alert active.
        let check = m.check("BTCUSDT", &prices("USDT", 1.0));
        assert!(check.detected);
        assert!(check.in_cooldown);
    }

    #[test]
    fn base_side_stablecoin_is_checked() {
        let check = monitor().check("USDTUSD", &prices("USDT", 0.97));
        assert!(check.monitored);
        assert!(check.detected);
    }
}
