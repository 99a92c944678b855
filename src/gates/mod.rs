// =============================================================================
// Gates Module
// =============================================================================
//
// The two gate disciplines over a scored candidate:
// - Entry: the classic all-of hard-gate chain (score, microstructure,
//   funding divergence, optional OI / ETF gates)
// - Confirmation: the pre-movement 2-of-3 discipline with the supply-squeeze
//   proxy and the regime-gated volume boost

pub mod confirmation;
pub mod entry;

pub use confirmation::{ConfirmationInputs, ConfirmationResult, SqueezeInputs};
pub use entry::{EntryGateInputs, EntryGateResult, GateCheck};
