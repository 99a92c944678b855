// =============================================================================
// Central Application State — Borealis Pre-Movement Scanner
// =============================================================================
//
// Ties the long-lived collaborators together and provides the snapshot the
// REST API serves. All collaborators are constructed at startup and passed
// in explicitly; there are no ambient globals.
//
// Thread safety:
//   - Atomic counter for version tracking.
//   - parking_lot::RwLock around the last analysis.
//   - Subsystems manage their own interior mutability behind Arc.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::engine::{AnalysisResult, PreMovementEngine};
use crate::policy::risk_off::{RiskOffMonitor, RiskOffState};
use crate::policy::venue_health::{VenueHealthTracker, VenueStatus};
use crate::providers::cache::CacheStats;
use crate::providers::registry::ProviderHealth;
use crate::providers::ProviderRegistry;
use crate::regime::{RegimeDetector, RegimeSnapshot, WeightRouter};
use crate::types::Venue;

/// Central state shared across tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: ScannerConfig,
    pub registry: Arc<ProviderRegistry>,
    pub regime_detector: Arc<RegimeDetector>,
    pub weight_router: Arc<WeightRouter>,
    pub risk_off: Arc<RiskOffMonitor>,
    pub venue_health: Arc<VenueHealthTracker>,
    pub engine: Arc<PreMovementEngine>,

    /// Most recent completed analysis, served by the candidates endpoint.
    pub last_analysis: RwLock<Option<AnalysisResult>>,

    /// Monotonically increasing version, bumped on every published analysis.
    pub state_version: AtomicU64,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: ScannerConfig,
        registry: Arc<ProviderRegistry>,
        regime_detector: Arc<RegimeDetector>,
        weight_router: Arc<WeightRouter>,
        risk_off: Arc<RiskOffMonitor>,
        venue_health: Arc<VenueHealthTracker>,
        engine: Arc<PreMovementEngine>,
    ) -> Self {
        Self {
            config,
            registry,
            regime_detector,
            weight_router,
            risk_off,
            venue_health,
            engine,
            last_analysis: RwLock::new(None),
            state_version: AtomicU64::new(1),
            start_time: std::time::Instant::now(),
        }
    }

    /// Publish a completed analysis and bump the version.
    pub fn publish_analysis(&self, analysis: AnalysisResult) {
        *self.last_analysis.write() = Some(analysis);
        self.state_version.fetch_add(1, Ordering::SeqCst);
    }

    pub fn current_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    /// Build the operational status snapshot for the health endpoint.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            status: "ok",
            state_version: self.current_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            regime: self.regime_detector.current(),
            risk_off: (*self.risk_off.snapshot()).clone(),
            cache: self.registry.cache_stats(),
            providers: self
                .registry
                .health_snapshot()
                .into_iter()
                .map(|(venue, health)| ProviderHealthRow { venue, health })
                .collect(),
            venues: self.venue_health.snapshot_all().into_values().collect(),
        }
    }
}

/// Payload of `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: &'static str,
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime: Option<RegimeSnapshot>,
    pub risk_off: RiskOffState,
    pub cache: CacheStats,
    pub providers: Vec<ProviderHealthRow>,
    pub venues: Vec<VenueStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthRow {
    pub venue: Venue,
    pub health: ProviderHealth,
}
