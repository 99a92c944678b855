// =============================================================================
// Venue Health Tracker — per-venue health accounting and fallback eligibility
// =============================================================================
//
// One status record per venue, updated from operational metrics (reject
// rate, p99 latency, error rate, uptime) and from probe outcomes. Writers
// serialize per venue under the map lock; gate evaluations read a cloned
// snapshot.
//
// A venue that fails its health check 5 times in a row loses fallback
// eligibility until a successful probe restores it.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::VenueHealthConfig;
use crate::types::Venue;

/// Raw operational metrics for one venue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VenueMetrics {
    pub reject_rate_pct: f64,
    pub p99_latency_ms: u64,
    pub error_rate_pct: f64,
    pub uptime_pct: f64,
}

impl VenueMetrics {
    /// Metrics for a venue nothing has been observed about yet.
    pub fn nominal() -> Self {
        Self {
            reject_rate_pct: 0.0,
            p99_latency_ms: 0,
            error_rate_pct: 0.0,
            uptime_pct: 100.0,
        }
    }
}

/// Published status for one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueStatus {
    pub venue: Venue,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub fallback_eligible: bool,
    /// Last health evaluation (ms since epoch).
    pub last_health_check: i64,
    pub metrics: VenueMetrics,
    /// Human-readable assessment.
    pub recommendation: String,
}

impl VenueStatus {
    fn pristine(venue: Venue) -> Self {
        Self {
            venue,
            healthy: true,
            consecutive_failures: 0,
            fallback_eligible: true,
            last_health_check: 0,
            metrics: VenueMetrics::nominal(),
            recommendation: "no observations yet".to_string(),
        }
    }
}

/// Shared tracker; one writer per venue update, many readers per evaluation.
pub struct VenueHealthTracker {
    cfg: VenueHealthConfig,
    statuses: RwLock<HashMap<Venue, VenueStatus>>,
}

impl VenueHealthTracker {
    pub fn new(cfg: VenueHealthConfig) -> Self {
        Self {
            cfg,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Evaluate fresh metrics for a venue and publish the updated status.
    pub fn record_metrics(&self, venue: Venue, metrics: VenueMetrics) -> VenueStatus {
        let mut violations = Vec::new();
        if metrics.reject_rate_pct > self.cfg.max_reject_rate_pct {
            violations.push(format!("reject rate {:.1}%", metrics.reject_rate_pct));
        }
        if metrics.p99_latency_ms > self.cfg.max_p99_latency_ms {
            violations.push(format!("p99 latency {} ms", metrics.p99_latency_ms));
        }
        if metrics.error_rate_pct > self.cfg.max_error_rate_pct {
            violations.push(format!("error rate {:.1}%", metrics.error_rate_pct));
        }
        if metrics.uptime_pct < self.cfg.min_uptime_pct {
            violations.push(format!("uptime {:.1}%", metrics.uptime_pct));
        }
        let healthy = violations.is_empty();

        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(venue)
            .or_insert_with(|| VenueStatus::pristine(venue));

        if healthy {
            status.consecutive_failures = 0;
            status.fallback_eligible = true;
            status.recommendation = "healthy".to_string();
        } else {
            status.consecutive_failures += 1;
            status.recommendation = format!("unhealthy: {}", violations.join(", "));
            if status.consecutive_failures >= self.cfg.fallback_ineligible_failures {
                if status.fallback_eligible {
                    warn!(
                        %venue,
                        consecutive_failures = status.consecutive_failures,
                        "venue lost fallback eligibility"
                    );
                }
                status.fallback_eligible = false;
            }
        }

        status.healthy = healthy;
        status.metrics = metrics;
        status.last_health_check = Utc::now().timestamp_millis();
        status.clone()
    }

    /// A successful probe restores health and fallback eligibility.
    pub fn record_probe_success(&self, venue: Venue) {
        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(venue)
            .or_insert_with(|| VenueStatus::pristine(venue));

        if !status.fallback_eligible || !status.healthy {
            info!(%venue, "venue recovered via successful probe");
        }
        status.healthy = true;
        status.consecutive_failures = 0;
        status.fallback_eligible = true;
        status.recommendation = "recovered via probe".to_string();
        status.last_health_check = Utc::now().timestamp_millis();
    }

    /// A failed probe counts like a failed health check.
    pub fn record_probe_failure(&self, venue: Venue, error: &str) {
        let mut statuses = self.statuses.write();
        let status = statuses
            .entry(venue)
            .or_insert_with(|| VenueStatus::pristine(venue));

        status.healthy = false;
        status.consecutive_failures += 1;
        status.recommendation = format!("probe failed: {error}");
        if status.consecutive_failures >= self.cfg.fallback_ineligible_failures {
            status.fallback_eligible = false;
        }
        status.last_health_check = Utc::now().timestamp_millis();
    }

    /// Status for one venue; venues never observed read as pristine.
    pub fn status(&self, venue: Venue) -> VenueStatus {
        self.statuses
            .read()
            .get(&venue)
            .cloned()
            .unwrap_or_else(|| VenueStatus::pristine(venue))
    }

    /// Snapshot of every tracked venue.
    pub fn snapshot_all(&self) -> HashMap<Venue, VenueStatus> {
        self.statuses.read().clone()
    }

    /// Whether a venue is currently usable as a fallback target.
    pub fn usable_as_fallback(&self, venue: Venue) -> bool {
        let status = self.status(venue);
        status.healthy && status.fallback_eligible
    }
}
