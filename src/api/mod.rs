// =============================================================================
// API Module
// =============================================================================
//
// Read-only REST surface over the scanner state. No authenticated or
// state-mutating endpoints.

pub mod rest;
