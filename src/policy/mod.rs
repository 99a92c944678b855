// =============================================================================
// Policy Module
// =============================================================================
//
// The meta-layer that adjudicates venue and regime conditions into a single
// recommended action:
// - Depeg guard: stablecoin peg monitoring with alert bands and cooldown
// - Risk-off toggle: severity-graded market-wide risk state
// - Venue health: per-venue health accounting and fallback selection
// - Matrix: runs the three checks in sequence and takes the severity-max

pub mod depeg;
pub mod matrix;
pub mod risk_off;
pub mod venue_health;

pub use depeg::{DepegAlert, DepegMonitor};
pub use matrix::{PolicyEvaluationResult, PolicyInputs, PolicyMatrix};
pub use risk_off::{RiskOffMonitor, RiskOffState, Severity};
pub use venue_health::{VenueHealthTracker, VenueMetrics, VenueStatus};
