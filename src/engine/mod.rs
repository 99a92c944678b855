// =============================================================================
// Pre-Movement Engine — per-symbol pipeline orchestration and ranking
// =============================================================================
//
// One engine call takes a batch of candidate inputs and produces a ranked
// analysis under a hard wall-clock budget:
//
//   score (orthogonalize + composite) -> guards -> gates -> CVD residual ->
//   microstructure consultation -> policy -> status -> rank
//
// Symbols are processed concurrently with a bounded worker pool; within one
// symbol the stage order is strict. Regime, weight, and risk-off snapshots
// are captured per symbol evaluation so a 4h update cannot tear state
// mid-pipeline. Exceeding the budget produces a system warning but never
// discards candidates that already completed.

pub mod inputs;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::cvd::CvdResidualResult;
use crate::analysis::analyze_cvd;
use crate::config::{GateMode, ScannerConfig};
use crate::factors::{freshness_penalty, CompositeScorer, Orthogonalizer};
use crate::gates::confirmation::{ConfirmationInputs, ConfirmationResult};
use crate::gates::entry::{EntryGateInputs, EntryGateResult};
use crate::gates::{confirmation, entry};
use crate::guards::{GuardEngine, GuardInputs, GuardVerdict};
use crate::indicators::{calculate_atr, latest_rsi};
use crate::policy::matrix::{PolicyEvaluationResult, PolicyInputs, PolicyMatrix};
use crate::policy::risk_off::RiskOffMonitor;
use crate::policy::venue_health::VenueHealthTracker;
use crate::providers::{ProviderError, ProviderRegistry};
use crate::regime::{Regime, RegimeDetector, WeightRouter};
use crate::types::{
    CompositeScore, FreshnessGrade, FreshnessReport, OverallStatus, Provenance,
    RecommendedAction, Venue,
};

pub use inputs::{
    build_candidate_input, gather_market_indicators, CandidateInput, MarketObservations,
};

// =============================================================================
// Cancellation
// =============================================================================

/// Caller-supplied cancellation flag, checked at stage boundaries. On
/// cancellation the engine finalizes completed candidates and returns.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Result records
// =============================================================================

/// Microstructure consultation attached to the explanation; advisory for the
/// pre-movement workflow, never blocking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrostructureConsultation {
    pub venue: Venue,
    pub spread_bps: Option<f64>,
    pub depth_usd_2pct: f64,
    pub assessment: String,
}

/// Fully assembled per-candidate record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub symbol: String,
    /// 1-based rank, assigned after sorting.
    pub rank: u32,
    pub overall_status: OverallStatus,
    pub composite: CompositeScore,
    pub guard_verdict: GuardVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_gates: Option<EntryGateResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationResult>,
    /// Whether the selected gate discipline(s) confirmed the candidate.
    pub gates_confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvd: Option<CvdResidualResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microstructure: Option<MicrostructureConsultation>,
    pub policy: PolicyEvaluationResult,
    pub recommended_action: RecommendedAction,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    pub provenance: Vec<Provenance>,
    pub eval_time_ms: u64,
}

/// Top-level analysis record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_id: String,
    pub generated_at: i64,
    pub regime_label: String,
    pub total_candidates: usize,
    pub valid_candidates: usize,
    pub freshness_grade: FreshnessGrade,
    pub candidates: Vec<CandidateResult>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub system_warnings: Vec<String>,
    pub elapsed_ms: u64,
}

// =============================================================================
// Engine
// =============================================================================

pub struct PreMovementEngine {
    cfg: ScannerConfig,
    registry: Arc<ProviderRegistry>,
    regime: Arc<RegimeDetector>,
    router: Arc<WeightRouter>,
    venues: Arc<VenueHealthTracker>,
    orthogonalizer: Orthogonalizer,
    guards: GuardEngine,
    policy: PolicyMatrix,
}

impl PreMovementEngine {
    pub fn new(
        cfg: ScannerConfig,
        registry: Arc<ProviderRegistry>,
        regime: Arc<RegimeDetector>,
        router: Arc<WeightRouter>,
        risk_off: Arc<RiskOffMonitor>,
        venues: Arc<VenueHealthTracker>,
    ) -> Self {
        let orthogonalizer = Orthogonalizer::new(cfg.fuse_volume_quality);
        let guards = GuardEngine::from_env(cfg.guards.clone());
        let policy = PolicyMatrix::new(cfg.policy.clone(), risk_off, venues.clone());

        Self {
            cfg,
            registry,
            regime,
            router,
            venues,
            orthogonalizer,
            guards,
            policy,
        }
    }

    /// Evaluate a batch of candidates and return the ranked analysis.
    pub async fn list_candidates(
        self: &Arc<Self>,
        candidate_inputs: Vec<CandidateInput>,
        limit: usize,
        cancel: &CancelToken,
    ) -> AnalysisResult {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.cfg.engine_budget_ms);
        let total_candidates = candidate_inputs.len();

        let regime_label = self
            .regime
            .current()
            .map(|s| s.regime.to_string())
            .unwrap_or_else(|| Regime::Choppy.to_string());

        let mut system_warnings: Vec<String> = Vec::new();
        let semaphore = Arc::new(Semaphore::new(self.cfg.max_concurrency.max(1)));
        let mut join_set: JoinSet<Result<CandidateResult, String>> = JoinSet::new();

        for input in candidate_inputs {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| "worker pool closed".to_string())?;
                if cancel.is_cancelled() {
                    return Err(format!("{}: cancelled before evaluation", input.symbol));
                }
                engine.evaluate_candidate(input, deadline, &cancel).await
            });
        }

        let mut candidates: Vec<CandidateResult> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(candidate)) => candidates.push(candidate),
                Ok(Err(diagnostic)) => {
                    debug!(diagnostic, "candidate dropped");
                    system_warnings.push(diagnostic);
                }
                Err(e) => system_warnings.push(format!("candidate task panicked: {e}")),
            }
            if cancel.is_cancelled() {
                join_set.abort_all();
                system_warnings.push("evaluation cancelled; returning completed candidates".to_string());
                break;
            }
        }

        if Instant::now() > deadline {
            warn!(
                budget_ms = self.cfg.engine_budget_ms,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "engine budget exceeded"
            );
            system_warnings.push(format!(
                "wall-clock budget of {} ms exceeded",
                self.cfg.engine_budget_ms
            ));
        }

        let valid_candidates = candidates.len();
        let freshness_grade = aggregate_freshness_grade(&candidates);

        rank_candidates(&mut candidates);
        candidates.truncate(limit.max(1));

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            total_candidates,
            valid_candidates,
            grade = %freshness_grade,
            elapsed_ms,
            "analysis complete"
        );

        AnalysisResult {
            analysis_id: Uuid::new_v4().to_string(),
            generated_at: Utc::now().timestamp_millis(),
            regime_label,
            total_candidates,
            valid_candidates,
            freshness_grade,
            candidates,
            system_warnings,
            elapsed_ms,
        }
    }

    // -------------------------------------------------------------------------
    // Per-symbol pipeline
    // -------------------------------------------------------------------------

    async fn evaluate_candidate(
        &self,
        input: CandidateInput,
        deadline: Instant,
        cancel: &CancelToken,
    ) -> Result<CandidateResult, String> {
        let started = Instant::now();
        let symbol = input.symbol.clone();
        let mut warnings: Vec<String> = Vec::new();
        let mut provenance: Vec<Provenance> = Vec::new();

        let check_boundary = |stage: &str| -> Result<(), String> {
            if cancel.is_cancelled() {
                return Err(format!("{symbol}: cancelled at {stage}"));
            }
            if Instant::now() > deadline {
                return Err(format!("{symbol}: deadline exceeded at {stage}"));
            }
            Ok(())
        };

        // Snapshots captured once for the whole pass.
        let regime = self
            .regime
            .current()
            .map(|s| s.regime)
            .unwrap_or(Regime::Choppy);
        let weight_table = self.router.snapshot();

        // ── Freshness accounting ("worst feed wins") ────────────────────
        let freshness = build_freshness_report(&input);
        if freshness.oldest_feed_age_secs > self.cfg.hard_staleness_secs {
            return Err(format!(
                "{symbol}: oldest feed {}s exceeds hard staleness limit {}s",
                freshness.oldest_feed_age_secs, self.cfg.hard_staleness_secs
            ));
        }

        // ── 1. Score ────────────────────────────────────────────────────
        check_boundary("scoring")?;
        let orthogonal = self.orthogonalizer.orthogonalize(&input.raw_factors);
        warnings.extend(orthogonal.warnings.clone());
        if !orthogonal.momentum_core.is_finite() {
            return Err(format!("{symbol}: momentum core is not finite"));
        }

        let weights = weight_table.for_regime(regime);
        let composite = CompositeScorer::score(&orthogonal, regime, weights, freshness);

        // ── Supporting market data from the registry ────────────────────
        check_boundary("market data")?;
        let market = &input.market;

        let book = match self.registry.order_book(&symbol, 50, Some(deadline)).await {
            Ok(resp) => {
                provenance.push(resp.provenance.clone());
                Some(resp.data)
            }
            Err(ProviderError::DeadlineExceeded { .. }) => {
                return Err(format!("{symbol}: deadline exceeded fetching order book"));
            }
            Err(e) => {
                warnings.push(format!("order book unavailable: {e}"));
                None
            }
        };
        let spread_bps = market
            .spread_bps
            .or_else(|| book.as_ref().and_then(|b| b.spread_bps()));
        let depth_usd = market
            .depth_usd
            .or_else(|| book.as_ref().map(|b| b.depth_usd_within_pct(2.0)));

        let funding_z = match market.funding_z {
            Some(z) => Some(z),
            None => match self
                .registry
                .funding_history(&symbol, 90, Some(deadline))
                .await
            {
                Ok(resp) => {
                    provenance.push(resp.provenance.clone());
                    funding_z_score(&resp.data.iter().map(|s| s.rate).collect::<Vec<_>>())
                }
                Err(e) => {
                    warnings.push(format!("funding history unavailable: {e}"));
                    None
                }
            },
        };

        let rsi_4h = match market.rsi_4h {
            Some(rsi) => Some(rsi),
            None => match self.registry.klines(&symbol, "4h", 60, Some(deadline)).await {
                Ok(resp) => {
                    provenance.push(resp.provenance.clone());
                    let closes: Vec<f64> = resp.data.iter().map(|k| k.close).collect();
                    latest_rsi(&closes, 14)
                }
                Err(e) => {
                    warnings.push(format!("4h klines unavailable: {e}"));
                    None
                }
            },
        };

        let atr_distance = match (market.trigger_price, market.price) {
            (Some(trigger), price) if price > 0.0 => {
                match self.registry.klines(&symbol, "1h", 30, Some(deadline)).await {
                    Ok(resp) => {
                        provenance.push(resp.provenance.clone());
                        calculate_atr(&resp.data, 14)
                            .filter(|atr| *atr > 0.0)
                            .map(|atr| (price - trigger).abs() / atr)
                    }
                    Err(e) => {
                        warnings.push(format!("1h klines unavailable: {e}"));
                        None
                    }
                }
            }
            _ => None,
        };

        let whale_composite = match market.whale_composite {
            Some(w) => Some(w),
            None => match self
                .registry
                .whale_events(&symbol, 1_000_000.0, 50, Some(deadline))
                .await
            {
                Ok(resp) => {
                    provenance.push(resp.provenance.clone());
                    Some(whale_composite_from_events(
                        resp.data.len(),
                        resp.data.iter().map(|e| e.usd_value).sum(),
                    ))
                }
                Err(e) => {
                    warnings.push(format!("whale events unavailable: {e}"));
                    None
                }
            },
        };

        // ── 2. Guards ───────────────────────────────────────────────────
        check_boundary("guards")?;
        let primary_venue = self.cfg.policy.primary_venues[0];
        let guard_inputs = GuardInputs {
            bars_since_signal: market.bars_since_signal,
            gain_24h_pct: market.price_change_24h_pct,
            rsi_4h,
            accel_renewed: market.accel_renewed,
            seconds_since_trigger: market.seconds_since_trigger,
            infra_healthy: self.venues.status(primary_venue).healthy,
            atr_distance,
        };
        let guard_verdict = self.guards.evaluate(regime, &guard_inputs);
        for failed in guard_verdict.failed_guards() {
            warnings.push(format!("guard rejected: {failed}"));
        }

        // ── 3. Gates ────────────────────────────────────────────────────
        check_boundary("gates")?;
        let entry_result = if matches!(self.cfg.gate_mode, GateMode::Entry | GateMode::Both) {
            Some(entry::evaluate(
                &symbol,
                &EntryGateInputs {
                    composite_score: composite.final_score_with_social,
                    spread_bps,
                    depth_usd,
                    vadr: market.vadr,
                    funding_z,
                    oi_residual_usd: market.oi_residual_usd,
                    has_etf: market.has_etf,
                    etf_tint: market.etf_tint,
                },
                &self.cfg.gates,
            ))
        } else {
            None
        };

        let confirmation_result =
            if matches!(self.cfg.gate_mode, GateMode::Confirmation | GateMode::Both) {
                Some(confirmation::evaluate(
                    &symbol,
                    regime,
                    &ConfirmationInputs {
                        funding_z,
                        whale_composite,
                        volume_ratio_24h: market.volume_ratio_24h,
                        squeeze: market.squeeze.clone(),
                    },
                    &self.cfg.confirmation,
                ))
            } else {
                None
            };

        let gates_confirmed = entry_result.as_ref().map(|r| r.passed).unwrap_or(true)
            && confirmation_result.as_ref().map(|r| r.passed).unwrap_or(true);

        // ── 4. CVD residual ─────────────────────────────────────────────
        check_boundary("cvd")?;
        let cvd = match self
            .registry
            .cvd_series(&symbol, "1d", 120, Some(deadline))
            .await
        {
            Ok(resp) => {
                provenance.push(resp.provenance.clone());
                let analyzed = analyze_cvd(&resp.data);
                if let Some(result) = &analyzed {
                    warnings.extend(result.warnings.clone());
                }
                analyzed
            }
            Err(e) => {
                warnings.push(format!("cvd series unavailable: {e}"));
                None
            }
        };

        // ── 5. Microstructure consultation (advisory) ───────────────────
        let microstructure = book.as_ref().map(|b| {
            let depth = b.depth_usd_within_pct(2.0);
            let spread = b.spread_bps();
            MicrostructureConsultation {
                venue: provenance
                    .first()
                    .map(|p| p.venue)
                    .unwrap_or(primary_venue),
                spread_bps: spread,
                depth_usd_2pct: depth,
                assessment: match spread {
                    Some(s) if s <= self.cfg.gates.max_spread_bps
                        && depth >= self.cfg.gates.min_depth_usd =>
                    {
                        "liquid".to_string()
                    }
                    Some(_) => "thin".to_string(),
                    None => "one-sided book".to_string(),
                },
            }
        });

        // ── 6. Policy ───────────────────────────────────────────────────
        check_boundary("policy")?;
        let policy = self.policy.evaluate(&PolicyInputs {
            symbol: symbol.clone(),
            stable_prices: market.stable_prices.clone(),
        });

        // ── 7. Status and assembly ──────────────────────────────────────
        let cvd_significant = cvd.as_ref().map(|c| c.significant).unwrap_or(false);
        let overall_status = classify_status(
            composite.final_score_with_social,
            gates_confirmed,
            cvd_significant,
        );

        let mut reasons = vec![format!(
            "composite {:.1} under {} weights",
            composite.final_score_with_social, composite.regime_label
        )];
        if let Some(r) = &entry_result {
            reasons.push(if r.passed {
                "entry gates passed".to_string()
            } else {
                format!("entry gates blocked: {}", r.failure_reasons.join("; "))
            });
        }
        if let Some(c) = &confirmation_result {
            reasons.push(format!(
                "confirmation {} ({}, precedence {:.1})",
                if c.passed { "passed" } else { "failed" },
                c.requirement,
                c.precedence_score
            ));
        }
        if cvd_significant {
            reasons.push("CVD divergence significant".to_string());
        }
        if policy.recommended_action != RecommendedAction::Proceed {
            reasons.push(format!("policy action: {}", policy.recommended_action));
        }

        Ok(CandidateResult {
            symbol,
            rank: 0,
            overall_status,
            recommended_action: policy.recommended_action,
            composite,
            guard_verdict,
            entry_gates: entry_result,
            confirmation: confirmation_result,
            gates_confirmed,
            cvd,
            microstructure,
            policy,
            reasons,
            warnings,
            provenance,
            eval_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}

// =============================================================================
// Pure helpers
// =============================================================================

/// Status bucket per the candidate's score, gate verdict, and CVD signal.
fn classify_status(score: f64, gates_confirmed: bool, cvd_significant: bool) -> OverallStatus {
    if !gates_confirmed {
        return OverallStatus::Blocked;
    }
    if score >= 85.0 && cvd_significant {
        return OverallStatus::Strong;
    }
    if score >= 75.0 {
        return OverallStatus::Moderate;
    }
    OverallStatus::Weak
}

/// Sort by (status priority, composite desc, precedence desc, CVD
/// significance desc) and assign 1-based ranks.
fn rank_candidates(candidates: &mut [CandidateResult]) {
    let cvd_flag =
        |c: &CandidateResult| c.cvd.as_ref().map(|r| r.significant).unwrap_or(false);

    candidates.sort_by(|a, b| {
        a.overall_status
            .priority()
            .cmp(&b.overall_status.priority())
            .then_with(|| {
                b.composite
                    .final_score_with_social
                    .total_cmp(&a.composite.final_score_with_social)
            })
            .then_with(|| precedence(b).total_cmp(&precedence(a)))
            .then_with(|| cvd_flag(b).cmp(&cvd_flag(a)))
    });
    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.rank = (i + 1) as u32;
    }
}

fn precedence(candidate: &CandidateResult) -> f64 {
    candidate
        .confirmation
        .as_ref()
        .map(|c| c.precedence_score)
        .unwrap_or(0.0)
}

/// z-score of the latest funding rate against its own history.
fn funding_z_score(rates: &[f64]) -> Option<f64> {
    if rates.len() < 8 {
        return None;
    }
    let latest = *rates.last()?;
    let n = rates.len() as f64;
    let mean = rates.iter().sum::<f64>() / n;
    let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    (std > f64::EPSILON).then(|| (latest - mean) / std)
}

/// Whale composite in [0, 1] from event count and total notional.
fn whale_composite_from_events(count: usize, total_usd: f64) -> f64 {
    let count_part = (count as f64 / 10.0).min(1.0);
    let notional_part = (total_usd / 50_000_000.0).min(1.0);
    (0.5 * count_part + 0.5 * notional_part).clamp(0.0, 1.0)
}

/// "Worst feed wins" freshness report from the input's feed ages plus the
/// factor snapshot age.
fn build_freshness_report(input: &CandidateInput) -> FreshnessReport {
    let mut feed_ages: BTreeMap<String, u64> = input.market.feed_ages_secs.clone();

    let factor_age_secs = ((Utc::now().timestamp_millis() - input.raw_factors.timestamp).max(0)
        / 1000) as u64;
    feed_ages.insert("factors".to_string(), factor_age_secs);

    let (worst_feed, oldest) = feed_ages
        .iter()
        .max_by_key(|(_, age)| **age)
        .map(|(name, age)| (name.clone(), *age))
        .unwrap_or_default();

    FreshnessReport {
        oldest_feed_age_secs: oldest,
        worst_feed,
        penalty_multiplier: freshness_penalty(oldest),
        feed_ages_secs: feed_ages,
    }
}

/// Aggregate freshness grade over the included candidates.
fn aggregate_freshness_grade(candidates: &[CandidateResult]) -> FreshnessGrade {
    if candidates.is_empty() {
        return FreshnessGrade::F;
    }
    let avg = candidates
        .iter()
        .map(|c| c.composite.data_freshness.oldest_feed_age_secs as f64)
        .sum::<f64>()
        / candidates.len() as f64;
    FreshnessGrade::from_avg_age_secs(avg)
}
