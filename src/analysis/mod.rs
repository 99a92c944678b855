// =============================================================================
// Analysis Module
// =============================================================================
//
// Statistical analyses the engine attaches to candidates. Currently the CVD
// divergence model.

pub mod cvd;

pub use cvd::{analyze_cvd, CvdRegressionModel, CvdResidualResult};
