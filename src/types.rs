// =============================================================================
// Shared types used across the Borealis pre-movement scanner
// =============================================================================

use serde::{Deserialize, Serialize};

// =============================================================================
// Venues
// =============================================================================

/// Every venue the scanner can read market data from.
///
/// Kraken through OKX are tradable venues eligible for policy fallback;
/// CoinGecko is a data-only aggregator and is never selected as an execution
/// venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Kraken,
    Coinbase,
    Binance,
    Okx,
    Coingecko,
}

impl Venue {
    /// All venues, in the default fallback preference order.
    pub const ALL: [Venue; 5] = [
        Venue::Kraken,
        Venue::Coinbase,
        Venue::Binance,
        Venue::Okx,
        Venue::Coingecko,
    ];

    /// True for venues with a native order book and tradable markets.
    pub fn is_exchange(self) -> bool {
        !matches!(self, Venue::Coingecko)
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kraken => write!(f, "kraken"),
            Self::Coinbase => write!(f, "coinbase"),
            Self::Binance => write!(f, "binance"),
            Self::Okx => write!(f, "okx"),
            Self::Coingecko => write!(f, "coingecko"),
        }
    }
}

impl std::str::FromStr for Venue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kraken" => Ok(Self::Kraken),
            "coinbase" => Ok(Self::Coinbase),
            "binance" => Ok(Self::Binance),
            "okx" => Ok(Self::Okx),
            "coingecko" => Ok(Self::Coingecko),
            other => Err(format!("unknown venue: {other}")),
        }
    }
}

// =============================================================================
// Provenance
// =============================================================================

/// Per-response record attached to every provider result.
///
/// Travels unchanged with the data through the pipeline and into the
/// candidate explanation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// Venue the data came from.
    pub venue: Venue,

    /// Endpoint path (no host, no query secrets).
    pub endpoint: String,

    /// Data window the response covers (e.g. "limit=200", "depth=50").
    pub window: String,

    /// Round-trip latency of the fetch in milliseconds.
    pub latency_ms: u64,

    /// Wall-clock fetch time (ms since epoch).
    pub timestamp: i64,
}

// =============================================================================
// Factor pipeline
// =============================================================================

/// The untransformed per-symbol signals for one evaluation tick.
///
/// Momentum is the protected axis: the orthogonalizer passes it through
/// bit-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFactors {
    pub symbol: String,

    /// Multi-timeframe price momentum score [0, 100].
    pub momentum_core: f64,

    /// Technical / chart-structure score [0, 100].
    pub technical: f64,

    /// Volume expansion score [0, 100].
    pub volume: f64,

    /// Supply-side quality score [0, 100].
    pub quality: f64,

    /// Catalyst score [0, 100], when a catalyst feed is available.
    #[serde(default)]
    pub catalyst: Option<f64>,

    /// Social sentiment score [0, 100]. Hard-capped after residualization.
    pub social: f64,

    /// Timestamp of the snapshot (ms since epoch).
    pub timestamp: i64,
}

/// Output of the Gram-Schmidt orthogonalization pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthogonalFactors {
    pub symbol: String,

    /// Identical to the input momentum — never residualized.
    pub momentum_core: f64,

    /// Technical after projecting out momentum.
    pub technical_resid: f64,

    /// Volume after projecting out momentum and technical.
    pub volume_resid: f64,

    /// Quality after projecting out the preceding axes.
    pub quality_resid: f64,

    /// Catalyst residual, when a catalyst input was present.
    #[serde(default)]
    pub catalyst_resid: Option<f64>,

    /// Social residual before the hard cap.
    pub social_resid: f64,

    /// Social residual clipped to [-10, +10]. This is what the scorer adds.
    pub social_resid_capped: f64,

    /// Warnings raised during residualization (degenerate projections).
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

/// Per-feed freshness accounting for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessReport {
    /// Age of the oldest constituent feed in seconds ("worst feed wins").
    pub oldest_feed_age_secs: u64,

    /// Name of the feed that set the worst age.
    pub worst_feed: String,

    /// Multiplicative penalty applied to the internal score [0.8, 1.0].
    pub penalty_multiplier: f64,

    /// Ages per feed, for the explanation record.
    pub feed_ages_secs: std::collections::BTreeMap<String, u64>,
}

impl FreshnessReport {
    /// A report for a candidate whose feeds are all current.
    pub fn fresh() -> Self {
        Self {
            oldest_feed_age_secs: 0,
            worst_feed: String::new(),
            penalty_multiplier: 1.0,
            feed_ages_secs: std::collections::BTreeMap::new(),
        }
    }
}

/// Fully assembled composite score for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,

    /// The orthogonalized factor vector the score was built from.
    pub factors: OrthogonalFactors,

    /// Regime-weighted blend of the non-social factors, clipped to [0, 100],
    /// after the freshness penalty.
    pub internal_total_100: f64,

    /// `internal_total_100 + social_resid_capped`, in [-10, 110].
    pub final_score_with_social: f64,

    /// Regime label the weights were routed for.
    pub regime_label: String,

    /// Freshness accounting that produced the penalty.
    pub data_freshness: FreshnessReport,

    /// Per-component weighted contributions, for the explanation record.
    pub components: Vec<ScoreComponent>,
}

/// One weighted component of the composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub name: String,
    pub weight: f64,
    pub value: f64,
    pub contribution: f64,
}

// =============================================================================
// Actions and statuses
// =============================================================================

/// Final recommended action from the policy matrix.
///
/// Ordered by severity: `Halt` dominates everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Proceed,
    ProceedWithFallback,
    Defer,
    Halt,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proceed => write!(f, "proceed"),
            Self::ProceedWithFallback => write!(f, "proceed_with_fallback"),
            Self::Defer => write!(f, "defer"),
            Self::Halt => write!(f, "halt"),
        }
    }
}

/// Per-candidate verdict bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Strong,
    Moderate,
    Weak,
    Blocked,
}

impl OverallStatus {
    /// Sort priority: lower sorts first in the ranked list.
    pub fn priority(self) -> u8 {
        match self {
            Self::Strong => 0,
            Self::Moderate => 1,
            Self::Weak => 2,
            Self::Blocked => 3,
        }
    }
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strong => write!(f, "strong"),
            Self::Moderate => write!(f, "moderate"),
            Self::Weak => write!(f, "weak"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Aggregate data-freshness grade over all candidates in an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessGrade {
    A,
    B,
    C,
    D,
    F,
}

impl FreshnessGrade {
    /// Grade from the average feed age across candidates.
    pub fn from_avg_age_secs(avg_secs: f64) -> Self {
        let mins = avg_secs / 60.0;
        if mins < 5.0 {
            Self::A
        } else if mins < 10.0 {
            Self::B
        } else if mins < 20.0 {
            Self::C
        } else if mins < 30.0 {
            Self::D
        } else {
            Self::F
        }
    }
}

impl std::fmt::Display for FreshnessGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::C => write!(f, "C"),
            Self::D => write!(f, "D"),
            Self::F => write!(f, "F"),
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
    fn venue_roundtrip() {
        for v in Venue::ALL {
            let parsed: Venue = v.to_string().parse().unwrap();
            assert_eq!(parsed, v);
        }
        assert!("ftx".parse::<Venue>().is_err());
    }

    #[test]
    fn coingecko_is_not_an_exchange() {
        assert!(!Venue::Coingecko.is_exchange());
        assert!(Venue::Kraken.is_exchange());
    }

    #[test]
    fn action_severity_ordering() {
        assert!(RecommendedAction::Halt > RecommendedAction::Defer);
        assert!(RecommendedAction::Defer > RecommendedAction::ProceedWithFallback);
        assert!(RecommendedAction::ProceedWithFallback > RecommendedAction::Proceed);
    }

    #[test]
    fn status_priority_order() {
        assert!(OverallStatus::Strong.priority() < OverallStatus::Moderate.priority());
        assert!(OverallStatus::Weak.priority() < OverallStatus::Blocked.priority());
    }

    #[test]
    fn freshness_grade_bands() {
        assert_eq!(FreshnessGrade::from_avg_age_secs(4.0 * 60.0), FreshnessGrade::A);
        assert_eq!(FreshnessGrade::from_avg_age_secs(5.0 * 60.0), FreshnessGrade::B);
        assert_eq!(FreshnessGrade::from_avg_age_secs(19.0 * 60.0), FreshnessGrade::C);
        assert_eq!(FreshnessGrade::from_avg_age_secs(29.0 * 60.0), FreshnessGrade::D);
        assert_eq!(FreshnessGrade::from_avg_age_secs(31.0 * 60.0), FreshnessGrade::F);
    }
}
