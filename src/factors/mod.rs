// =============================================================================
// Factors Module
// =============================================================================
//
// The factor pipeline: Gram-Schmidt residualization with a protected
// momentum core, then the regime-weighted composite score with the
// hard-capped social add-on.

pub mod composite;
pub mod orthogonalizer;

pub use composite::{freshness_penalty, CompositeScorer};
pub use orthogonalizer::Orthogonalizer;
