// =============================================================================
// Scanner Configuration — startup settings with atomic save
// =============================================================================
//
// Central configuration hub for the Borealis scanner. Loaded once at startup;
// hot-reload is out of scope. All fields carry `#[serde(default)]` so that
// adding new fields never breaks loading an older config file, and every
// block is range-checked by `validate()` before the engine is built.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::regime::weights::WeightVector;
use crate::types::Venue;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "XRPUSDT".to_string(),
        "ADAUSDT".to_string(),
    ]
}

fn default_candidate_limit() -> usize {
    20
}

fn default_scan_interval_secs() -> u64 {
    300
}

fn default_engine_budget_ms() -> u64 {
    2000
}

fn default_max_concurrency() -> usize {
    8
}

fn default_hard_staleness_secs() -> u64 {
    30 * 60
}

fn default_gate_mode() -> GateMode {
    GateMode::Both
}

fn default_min_composite() -> f64 {
    75.0
}

fn default_max_spread_bps() -> f64 {
    50.0
}

fn default_min_depth_usd() -> f64 {
    100_000.0
}

fn default_min_vadr() -> f64 {
    1.8
}

fn default_funding_z_min() -> f64 {
    2.0
}

fn default_min_oi_residual_usd() -> f64 {
    1_000_000.0
}

fn default_min_etf_tint() -> f64 {
    0.3
}

fn default_whale_composite_min() -> f64 {
    0.7
}

fn default_squeeze_proxy_min() -> f64 {
    0.5
}

fn default_volume_boost_ratio() -> f64 {
    2.5
}

fn default_reserve_depletion_pct() -> f64 {
    5.0
}

fn default_large_withdrawal_usd() -> f64 {
    50_000_000.0
}

fn default_staking_inflow_usd() -> f64 {
    10_000_000.0
}

fn default_oi_jump_pct() -> f64 {
    5.0
}

fn default_depeg_monitored() -> Vec<String> {
    vec!["USDT".to_string(), "USDC".to_string(), "DAI".to_string()]
}

fn default_depeg_warn_bps() -> f64 {
    100.0
}

fn default_depeg_halt_bps() -> f64 {
    200.0
}

fn default_depeg_cooldown_mins() -> u64 {
    30
}

fn default_vix_spike() -> f64 {
    30.0
}

fn default_btc_drop_pct() -> f64 {
    15.0
}

fn default_stable_volume_spike_ratio() -> f64 {
    3.0
}

fn default_funding_extreme_pct() -> f64 {
    0.1
}

fn default_min_risk_off_confidence() -> f64 {
    0.3
}

fn default_high_vol_realized() -> f64 {
    0.75
}

fn default_bull_btc_change_pct() -> f64 {
    3.0
}

fn default_bull_max_dispersion() -> f64 {
    0.35
}

fn default_max_reject_rate_pct() -> f64 {
    5.0
}

fn default_max_p99_latency_ms() -> u64 {
    2000
}

fn default_max_error_rate_pct() -> f64 {
    3.0
}

fn default_min_uptime_pct() -> f64 {
    98.0
}

fn default_fallback_ineligible_failures() -> u32 {
    5
}

fn default_primary_venues() -> Vec<Venue> {
    vec![Venue::Kraken, Venue::Coinbase, Venue::Binance, Venue::Okx]
}

fn default_provider_preference() -> Vec<Venue> {
    vec![
        Venue::Kraken,
        Venue::Coinbase,
        Venue::Binance,
        Venue::Okx,
        Venue::Coingecko,
    ]
}

fn default_ttl_secs() -> u64 {
    60
}

fn default_burst() -> u32 {
    10
}

fn default_sustained_rps() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_file_cache_max_bytes() -> u64 {
    64 * 1024 * 1024
}

// =============================================================================
// Gate discipline selection
// =============================================================================

/// Which gate discipline an engine evaluation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Classic all-of entry gates only.
    Entry,
    /// Pre-movement 2-of-3 confirmation only.
    Confirmation,
    /// Run both and report both; a candidate must clear both to count as
    /// gate-confirmed.
    Both,
}

// =============================================================================
// Gate thresholds
// =============================================================================

/// Hard entry-gate thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum composite score to pass the score gate.
    #[serde(default = "default_min_composite")]
    pub min_composite: f64,

    /// Maximum allowed bid/ask spread in basis points.
    #[serde(default = "default_max_spread_bps")]
    pub max_spread_bps: f64,

    /// Minimum book depth in USD within ±2% of mid.
    #[serde(default = "default_min_depth_usd")]
    pub min_depth_usd: f64,

    /// Minimum volume-adjusted daily range multiple.
    #[serde(default = "default_min_vadr")]
    pub min_vadr: f64,

    /// Minimum cross-venue funding z-score. Missing data fails this gate.
    #[serde(default = "default_funding_z_min")]
    pub funding_z_min: f64,

    /// Enable the optional open-interest residual gate.
    #[serde(default)]
    pub oi_gate_enabled: bool,

    /// Minimum OI residual in USD when the OI gate is enabled.
    #[serde(default = "default_min_oi_residual_usd")]
    pub min_oi_residual_usd: f64,

    /// Enable the optional ETF flow tint gate.
    #[serde(default)]
    pub etf_gate_enabled: bool,

    /// Minimum ETF flow tint when the asset has ETFs. No ETF auto-passes.
    #[serde(default = "default_min_etf_tint")]
    pub min_etf_tint: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_composite: default_min_composite(),
            max_spread_bps: default_max_spread_bps(),
            min_depth_usd: default_min_depth_usd(),
            min_vadr: default_min_vadr(),
            funding_z_min: default_funding_z_min(),
            oi_gate_enabled: false,
            min_oi_residual_usd: default_min_oi_residual_usd(),
            etf_gate_enabled: false,
            min_etf_tint: default_min_etf_tint(),
        }
    }
}

/// Pre-movement confirmation thresholds (2-of-3 discipline).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Funding z-score confirmation threshold.
    #[serde(default = "default_funding_z_min")]
    pub funding_z_min: f64,

    /// Whale composite confirmation threshold [0, 1].
    #[serde(default = "default_whale_composite_min")]
    pub whale_composite_min: f64,

    /// Supply-squeeze proxy confirmation threshold [0, 1].
    #[serde(default = "default_squeeze_proxy_min")]
    pub squeeze_proxy_min: f64,

    /// 24h volume ratio that activates the volume-confirmation boost.
    #[serde(default = "default_volume_boost_ratio")]
    pub volume_boost_ratio: f64,

    // ── Supply-squeeze sub-component thresholds (2-of-4) ────────────────
    /// Exchange reserve depletion over 7d, percent.
    #[serde(default = "default_reserve_depletion_pct")]
    pub reserve_depletion_pct: f64,

    /// Large-withdrawal volume over 24h, USD.
    #[serde(default = "default_large_withdrawal_usd")]
    pub large_withdrawal_usd: f64,

    /// Net staking inflow over 24h, USD.
    #[serde(default = "default_staking_inflow_usd")]
    pub staking_inflow_usd: f64,

    /// Derivatives OI jump over 24h, percent.
    #[serde(default = "default_oi_jump_pct")]
    pub oi_jump_pct: f64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            funding_z_min: default_funding_z_min(),
            whale_composite_min: default_whale_composite_min(),
            squeeze_proxy_min: default_squeeze_proxy_min(),
            volume_boost_ratio: default_volume_boost_ratio(),
            reserve_depletion_pct: default_reserve_depletion_pct(),
            large_withdrawal_usd: default_large_withdrawal_usd(),
            staking_inflow_usd: default_staking_inflow_usd(),
            oi_jump_pct: default_oi_jump_pct(),
        }
    }
}

// =============================================================================
// Guard profiles
// =============================================================================

/// Per-regime guard thresholds. The safety clamp in `guards` caps these
/// regardless of what the config says.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GuardProfile {
    /// Maximum signal age in bars before the freshness guard rejects.
    pub freshness_bars_max: u32,

    /// 24h gain percentage above which the fatigue guard arms.
    pub fatigue_gain_pct: f64,

    /// 4h RSI above which the fatigue guard rejects (with the gain armed).
    pub fatigue_rsi_max: f64,

    /// Whether renewed acceleration overrides an armed fatigue guard.
    pub fatigue_accel_renewal: bool,

    /// Maximum seconds since trigger before the late-fill guard rejects.
    pub late_fill_max_secs: u64,

    /// Whether the late-fill guard additionally requires healthy infra and
    /// ATR proximity.
    pub late_fill_requires_infra: bool,

    /// Maximum entry distance from trigger, in ATR multiples.
    pub proximity_atr_mult: f64,
}

impl GuardProfile {
    /// Baseline profile (choppy) used when regime-aware guards are off.
    pub fn baseline() -> Self {
        Self {
            freshness_bars_max: 2,
            fatigue_gain_pct: 12.0,
            fatigue_rsi_max: 70.0,
            fatigue_accel_renewal: false,
            late_fill_max_secs: 30,
            late_fill_requires_infra: false,
            proximity_atr_mult: 1.2,
        }
    }

    /// Trending-bull profile: more room before guards fire.
    pub fn trending() -> Self {
        Self {
            freshness_bars_max: 3,
            fatigue_gain_pct: 18.0,
            fatigue_rsi_max: 70.0,
            fatigue_accel_renewal: true,
            late_fill_max_secs: 45,
            late_fill_requires_infra: true,
            proximity_atr_mult: 1.2,
        }
    }
}

/// Guard layer configuration: one profile per regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "GuardProfile::trending")]
    pub trending_bull: GuardProfile,

    #[serde(default = "GuardProfile::baseline")]
    pub choppy: GuardProfile,

    #[serde(default = "GuardProfile::baseline")]
    pub high_vol: GuardProfile,

    #[serde(default = "GuardProfile::baseline")]
    pub risk_off: GuardProfile,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            trending_bull: GuardProfile::trending(),
            choppy: GuardProfile::baseline(),
            high_vol: GuardProfile::baseline(),
            risk_off: GuardProfile::baseline(),
        }
    }
}

// =============================================================================
// Regime detection thresholds
// =============================================================================

/// Thresholds for the regime classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetectorConfig {
    /// VIX-equivalent level counted as a spike (risk-off trigger).
    #[serde(default = "default_vix_spike")]
    pub vix_spike: f64,

    /// BTC 24h drop percentage counted as a crash (risk-off trigger).
    #[serde(default = "default_btc_drop_pct")]
    pub btc_drop_pct: f64,

    /// Stablecoin volume ratio counted as a flight-to-safety spike.
    #[serde(default = "default_stable_volume_spike_ratio")]
    pub stable_volume_spike_ratio: f64,

    /// Absolute funding rate (percent per interval) counted as extreme.
    #[serde(default = "default_funding_extreme_pct")]
    pub funding_extreme_pct: f64,

    /// Minimum cumulative trigger confidence to enter risk-off.
    #[serde(default = "default_min_risk_off_confidence")]
    pub min_risk_off_confidence: f64,

    /// Annualized realized volatility above which high-vol applies.
    #[serde(default = "default_high_vol_realized")]
    pub high_vol_realized: f64,

    /// BTC 24h change required for trending-bull.
    #[serde(default = "default_bull_btc_change_pct")]
    pub bull_btc_change_pct: f64,

    /// Maximum cross-section dispersion allowed for trending-bull.
    #[serde(default = "default_bull_max_dispersion")]
    pub bull_max_dispersion: f64,
}

impl Default for RegimeDetectorConfig {
    fn default() -> Self {
        Self {
            vix_spike: default_vix_spike(),
            btc_drop_pct: default_btc_drop_pct(),
            stable_volume_spike_ratio: default_stable_volume_spike_ratio(),
            funding_extreme_pct: default_funding_extreme_pct(),
            min_risk_off_confidence: default_min_risk_off_confidence(),
            high_vol_realized: default_high_vol_realized(),
            bull_btc_change_pct: default_bull_btc_change_pct(),
            bull_max_dispersion: default_bull_max_dispersion(),
        }
    }
}

/// Per-regime composite weight vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeWeightsConfig {
    #[serde(default = "WeightVector::trending_bull")]
    pub trending_bull: WeightVector,

    #[serde(default = "WeightVector::choppy")]
    pub choppy: WeightVector,

    #[serde(default = "WeightVector::high_vol")]
    pub high_vol: WeightVector,

    #[serde(default = "WeightVector::risk_off")]
    pub risk_off: WeightVector,
}

impl Default for RegimeWeightsConfig {
    fn default() -> Self {
        Self {
            trending_bull: WeightVector::trending_bull(),
            choppy: WeightVector::choppy(),
            high_vol: WeightVector::high_vol(),
            risk_off: WeightVector::risk_off(),
        }
    }
}

// =============================================================================
// Policy matrix configuration
// =============================================================================

/// Stablecoin depeg guard settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepegConfig {
    /// Stablecoins monitored for depegs.
    #[serde(default = "default_depeg_monitored")]
    pub monitored: Vec<String>,

    /// Depeg magnitude (bps) at which the guard recommends monitoring.
    #[serde(default = "default_depeg_warn_bps")]
    pub warn_bps: f64,

    /// Depeg magnitude (bps) at which the guard recommends halting.
    #[serde(default = "default_depeg_halt_bps")]
    pub halt_bps: f64,

    /// Cooldown after an alert, minutes.
    #[serde(default = "default_depeg_cooldown_mins")]
    pub cooldown_mins: u64,
}

impl Default for DepegConfig {
    fn default() -> Self {
        Self {
            monitored: default_depeg_monitored(),
            warn_bps: default_depeg_warn_bps(),
            halt_bps: default_depeg_halt_bps(),
            cooldown_mins: default_depeg_cooldown_mins(),
        }
    }
}

/// Venue health thresholds used by the policy matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueHealthConfig {
    #[serde(default = "default_max_reject_rate_pct")]
    pub max_reject_rate_pct: f64,

    #[serde(default = "default_max_p99_latency_ms")]
    pub max_p99_latency_ms: u64,

    #[serde(default = "default_max_error_rate_pct")]
    pub max_error_rate_pct: f64,

    #[serde(default = "default_min_uptime_pct")]
    pub min_uptime_pct: f64,

    /// Consecutive failures after which a venue loses fallback eligibility
    /// until a successful probe.
    #[serde(default = "default_fallback_ineligible_failures")]
    pub fallback_ineligible_failures: u32,
}

impl Default for VenueHealthConfig {
    fn default() -> Self {
        Self {
            max_reject_rate_pct: default_max_reject_rate_pct(),
            max_p99_latency_ms: default_max_p99_latency_ms(),
            max_error_rate_pct: default_max_error_rate_pct(),
            min_uptime_pct: default_min_uptime_pct(),
            fallback_ineligible_failures: default_fallback_ineligible_failures(),
        }
    }
}

/// Policy matrix configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Venue preference order for primary selection and fallback.
    #[serde(default = "default_primary_venues")]
    pub primary_venues: Vec<Venue>,

    /// Whether fallback to a secondary venue is allowed at all.
    #[serde(default = "default_true")]
    pub venue_fallback_enabled: bool,

    #[serde(default)]
    pub depeg: DepegConfig,

    #[serde(default)]
    pub venue_health: VenueHealthConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            primary_venues: default_primary_venues(),
            venue_fallback_enabled: true,
            depeg: DepegConfig::default(),
            venue_health: VenueHealthConfig::default(),
        }
    }
}

// =============================================================================
// Provider registry configuration
// =============================================================================

/// Per-provider tuning knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProviderTuning {
    /// Cache TTL for responses from this provider, seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Token-bucket burst capacity.
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Token-bucket sustained refill rate, requests per second.
    #[serde(default = "default_sustained_rps")]
    pub sustained_rps: f64,

    /// Maximum retries after a transport failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff, milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Consecutive failures before the circuit breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for ProviderTuning {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            burst: default_burst(),
            sustained_rps: default_sustained_rps(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// Provider registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRegistryConfig {
    /// Fallback preference order across providers.
    #[serde(default = "default_provider_preference")]
    pub preference: Vec<Venue>,

    /// Per-provider overrides; providers not listed use `ProviderTuning`
    /// defaults.
    #[serde(default)]
    pub tuning: HashMap<Venue, ProviderTuning>,

    /// Optional directory for the file-backed cache tier.
    #[serde(default)]
    pub cache_dir: Option<String>,

    /// Size cap for the file-backed cache, bytes.
    #[serde(default = "default_file_cache_max_bytes")]
    pub file_cache_max_bytes: u64,
}

impl Default for ProviderRegistryConfig {
    fn default() -> Self {
        Self {
            preference: default_provider_preference(),
            tuning: HashMap::new(),
            cache_dir: None,
            file_cache_max_bytes: default_file_cache_max_bytes(),
        }
    }
}

impl ProviderRegistryConfig {
    /// Tuning for a venue, falling back to defaults when not configured.
    pub fn tuning_for(&self, venue: Venue) -> ProviderTuning {
        self.tuning.get(&venue).copied().unwrap_or_default()
    }
}

// =============================================================================
// Top-level config
// =============================================================================

/// Complete scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Symbols to scan.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Maximum candidates returned per analysis.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,

    /// Seconds between scan cycles.
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,

    /// Hard wall-clock budget per engine call, milliseconds.
    #[serde(default = "default_engine_budget_ms")]
    pub engine_budget_ms: u64,

    /// Worker pool size for the per-symbol fan-out.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Candidates whose oldest feed exceeds this are filtered out, seconds.
    #[serde(default = "default_hard_staleness_secs")]
    pub hard_staleness_secs: u64,

    /// Which gate discipline the engine runs.
    #[serde(default = "default_gate_mode")]
    pub gate_mode: GateMode,

    /// Collapse volume and quality into one fused supply/demand block
    /// during orthogonalization.
    #[serde(default = "default_true")]
    pub fuse_volume_quality: bool,

    #[serde(default)]
    pub weights: RegimeWeightsConfig,

    #[serde(default)]
    pub regime: RegimeDetectorConfig,

    #[serde(default)]
    pub gates: GateConfig,

    #[serde(default)]
    pub confirmation: ConfirmationConfig,

    #[serde(default)]
    pub guards: GuardConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub providers: ProviderRegistryConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            candidate_limit: default_candidate_limit(),
            scan_interval_secs: default_scan_interval_secs(),
            engine_budget_ms: default_engine_budget_ms(),
            max_concurrency: default_max_concurrency(),
            hard_staleness_secs: default_hard_staleness_secs(),
            gate_mode: GateMode::Both,
            fuse_volume_quality: true,
            weights: RegimeWeightsConfig::default(),
            regime: RegimeDetectorConfig::default(),
            gates: GateConfig::default(),
            confirmation: ConfirmationConfig::default(),
            guards: GuardConfig::default(),
            policy: PolicyConfig::default(),
            providers: ProviderRegistryConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load a config from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&raw).context("failed to parse config JSON")?;
        config.validate()?;
        info!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Persist the config with an atomic tmp + rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to rename {} into place", tmp.display()))?;

        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Range-check every block. Invalid configs are rejected at load time.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("config: symbols list is empty");
        }
        if self.max_concurrency == 0 {
            bail!("config: max_concurrency must be at least 1");
        }
        if self.engine_budget_ms == 0 {
            bail!("config: engine_budget_ms must be nonzero");
        }

        // ── Gates ───────────────────────────────────────────────────────
        let g = &self.gates;
        if !(0.0..=500.0).contains(&g.max_spread_bps) {
            bail!("config: max_spread_bps {} outside [0, 500]", g.max_spread_bps);
        }
        if !(0.0..=10.0).contains(&g.min_vadr) {
            bail!("config: min_vadr {} outside [0, 10]", g.min_vadr);
        }
        if g.min_depth_usd < 0.0 {
            bail!("config: min_depth_usd must be non-negative");
        }
        if !(0.0..=110.0).contains(&g.min_composite) {
            bail!("config: min_composite {} outside [0, 110]", g.min_composite);
        }

        // ── Weights ─────────────────────────────────────────────────────
        for (label, w) in [
            ("trending_bull", &self.weights.trending_bull),
            ("choppy", &self.weights.choppy),
            ("high_vol", &self.weights.high_vol),
            ("risk_off", &self.weights.risk_off),
        ] {
            w.validate()
                .with_context(|| format!("config: weight vector for {label}"))?;
        }

        // ── Guards: relaxedness ordering ────────────────────────────────
        // Trending must be at least as relaxed as choppy, which must be at
        // least as relaxed as high_vol and risk_off.
        let gu = &self.guards;
        let order = [
            ("trending_bull", &gu.trending_bull),
            ("choppy", &gu.choppy),
            ("high_vol", &gu.high_vol),
            ("risk_off", &gu.risk_off),
        ];
        for pair in order.windows(2) {
            let (more_name, more) = pair[0];
            let (less_name, less) = pair[1];
            if more.freshness_bars_max < less.freshness_bars_max
                || more.fatigue_gain_pct < less.fatigue_gain_pct
                || more.late_fill_max_secs < less.late_fill_max_secs
            {
                bail!(
                    "config: guard profile {more_name} must be at least as relaxed as {less_name}"
                );
            }
        }

        // ── Policy ──────────────────────────────────────────────────────
        let p = &self.policy;
        if p.primary_venues.is_empty() {
            bail!("config: primary_venues list is empty");
        }
        if p.primary_venues.iter().any(|v| !v.is_exchange()) {
            bail!("config: primary_venues may only contain tradable exchanges");
        }
        if p.depeg.warn_bps >= p.depeg.halt_bps {
            bail!(
                "config: depeg warn_bps {} must be below halt_bps {}",
                p.depeg.warn_bps,
                p.depeg.halt_bps
            );
        }

        // ── Providers ───────────────────────────────────────────────────
        if self.providers.preference.is_empty() {
            bail!("config: provider preference list is empty");
        }
        for (venue, t) in &self.providers.tuning {
            if t.sustained_rps <= 0.0 {
                bail!("config: provider {venue} sustained_rps must be positive");
            }
            if t.burst == 0 {
                bail!("config: provider {venue} burst must be at least 1");
            }
        }

        Ok(())
    }

    /// Apply environment overrides (symbol list).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(syms) = std::env::var("BOREALIS_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                warn!(symbols = ?parsed, "symbol list overridden from BOREALIS_SYMBOLS");
                self.symbols = parsed;
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        ScannerConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_symbols_rejected() {
        let mut cfg = ScannerConfig::default();
        cfg.symbols.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn spread_out_of_range_rejected() {
        let mut cfg = ScannerConfig::default();
        cfg.gates.max_spread_bps = 750.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn vadr_out_of_range_rejected() {
        let mut cfg = ScannerConfig::default();
        cfg.gates.min_vadr = 12.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn depeg_band_ordering_enforced() {
        let mut cfg = ScannerConfig::default();
        cfg.policy.depeg.warn_bps = 250.0;
        cfg.policy.depeg.halt_bps = 200.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn relaxedness_ordering_enforced() {
        let mut cfg = ScannerConfig::default();
        // Choppy more relaxed than trending: invalid.
        cfg.guards.choppy.fatigue_gain_pct = 30.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn aggregator_not_allowed_as_primary_venue() {
        let mut cfg = ScannerConfig::default();
        cfg.policy.primary_venues = vec![Venue::Coingecko];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn minimal_json_uses_defaults() {
        let cfg: ScannerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.candidate_limit, 20);
        assert_eq!(cfg.gate_mode, GateMode::Both);
        assert_eq!(cfg.gates.min_composite, 75.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.json");

        let mut cfg = ScannerConfig::default();
        cfg.candidate_limit = 7;
        cfg.save(&path).unwrap();

        let loaded = ScannerConfig::load(&path).unwrap();
        assert_eq!(loaded.candidate_limit, 7);
    }

    #[test]
    fn tuning_falls_back_to_defaults() {
        let cfg = ProviderRegistryConfig::default();
        let t = cfg.tuning_for(Venue::Binance);
        assert_eq!(t.ttl_secs, default_ttl_secs());
    }
}
