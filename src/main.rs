// =============================================================================
// Borealis Pre-Movement Scanner — Main Entry Point
// =============================================================================
//
// Startup order: config, provider registry, regime detector + weight router,
// policy collaborators, engine, background loops (regime cadence, venue
// probes, scan cycle), REST API. Everything is constructed here and passed
// down explicitly.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod app_state;
mod config;
mod engine;
mod factors;
mod gates;
mod guards;
mod indicators;
mod policy;
mod providers;
mod regime;
mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::ScannerConfig;
use crate::engine::{
    build_candidate_input, gather_market_indicators, CancelToken, PreMovementEngine,
};
use crate::policy::risk_off::RiskOffMonitor;
use crate::policy::venue_health::VenueHealthTracker;
use crate::providers::ProviderRegistry;
use crate::regime::{RegimeDetector, WeightRouter};

/// How often the regime cadence loop checks whether the 4h update is due.
const REGIME_CHECK_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// How often providers are probed for venue health.
const PROBE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Deadline for building one scan cycle's inputs.
const INPUT_BUILD_BUDGET: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Pre-Movement Scanner — Starting Up       ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = ScannerConfig::load("scanner_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ScannerConfig::default()
    });
    config.apply_env_overrides();
    config.validate()?;

    info!(
        symbols = ?config.symbols,
        gate_mode = ?config.gate_mode,
        budget_ms = config.engine_budget_ms,
        "configuration ready"
    );

    // ── 2. Build collaborators ───────────────────────────────────────────
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("failed to build reqwest client");

    let registry = Arc::new(ProviderRegistry::with_live_providers(
        config.providers.clone(),
        client,
    ));
    let regime_detector = Arc::new(RegimeDetector::new(config.regime.clone()));
    let weight_router = Arc::new(WeightRouter::new(&config.weights)?);
    let risk_off = Arc::new(RiskOffMonitor::new());
    let venue_health = Arc::new(VenueHealthTracker::new(config.policy.venue_health.clone()));

    let engine = Arc::new(PreMovementEngine::new(
        config.clone(),
        registry.clone(),
        regime_detector.clone(),
        weight_router.clone(),
        risk_off.clone(),
        venue_health.clone(),
    ));

    let state = Arc::new(AppState::new(
        config,
        registry,
        regime_detector,
        weight_router,
        risk_off,
        venue_health,
        engine,
    ));

    // ── 3. Regime cadence loop (4h re-evaluation) ────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                if state.regime_detector.update_due() {
                    let deadline = Instant::now() + INPUT_BUILD_BUDGET;
                    match gather_market_indicators(
                        &state.registry,
                        &state.config.symbols,
                        deadline,
                    )
                    .await
                    {
                        Ok(indicators) => {
                            let snapshot = state.regime_detector.evaluate(&indicators);
                            state.risk_off.update_from_regime(&snapshot);
                        }
                        Err(e) => error!(error = %e, "regime indicator gathering failed"),
                    }
                }
                tokio::time::sleep(REGIME_CHECK_INTERVAL).await;
            }
        });
    }

    // ── 4. Venue probe loop ──────────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            loop {
                let report = state.registry.probe_all().await;
                let mut seen = std::collections::HashSet::new();
                for entry in &report.entries {
                    if !seen.insert(entry.venue) {
                        continue;
                    }
                    if entry.currently_available {
                        state.venue_health.record_probe_success(entry.venue);
                    } else if entry.supported {
                        state.venue_health.record_probe_failure(
                            entry.venue,
                            entry.error.as_deref().unwrap_or("probe failed"),
                        );
                    }
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        });
    }

    // ── 5. Scan loop ─────────────────────────────────────────────────────
    {
        let state = state.clone();
        tokio::spawn(async move {
            // Give the regime loop a head start.
            tokio::time::sleep(Duration::from_secs(5)).await;
            loop {
                run_scan_cycle(&state).await;
                tokio::time::sleep(Duration::from_secs(state.config.scan_interval_secs)).await;
            }
        });
    }

    // ── 6. REST API ──────────────────────────────────────────────────────
    let port: u16 = std::env::var("BOREALIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "REST API listening");

    axum::serve(listener, api::rest::router(state)).await?;
    Ok(())
}

/// One scan cycle: build live inputs for every configured symbol, run the
/// engine, publish the analysis.
async fn run_scan_cycle(state: &Arc<AppState>) {
    let build_deadline = Instant::now() + INPUT_BUILD_BUDGET;

    let mut inputs = Vec::with_capacity(state.config.symbols.len());
    for symbol in &state.config.symbols {
        match build_candidate_input(&state.registry, symbol, build_deadline).await {
            Ok(input) => inputs.push(input),
            Err(e) => warn!(symbol, error = %e, "candidate input unavailable this cycle"),
        }
    }

    if inputs.is_empty() {
        warn!("scan cycle skipped — no candidate inputs available");
        return;
    }

    let cancel = CancelToken::new();
    let analysis = state
        .engine
        .list_candidates(inputs, state.config.candidate_limit, &cancel)
        .await;

    info!(
        analysis_id = %analysis.analysis_id,
        candidates = analysis.valid_candidates,
        grade = %analysis.freshness_grade,
        elapsed_ms = analysis.elapsed_ms,
        "scan cycle published"
    );
    state.publish_analysis(analysis);
}
