// =============================================================================
// Regime Module
// =============================================================================
//
// Market regime classification and the per-regime weight routing it drives:
// - Detector: classifies {trending_bull, choppy, high_vol, risk_off} from
//   market-wide indicators on a 4h cadence
// - Weights: validated per-regime weight vectors published as atomic
//   snapshots

pub mod detector;
pub mod weights;

pub use detector::{MarketIndicators, Regime, RegimeDetector, RegimeSnapshot};
pub use weights::{WeightRouter, WeightVector};
