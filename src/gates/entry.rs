// =============================================================================
// Entry Gates — hard all-of gate chain
// =============================================================================
//
// Gates are evaluated in order but a failure never stops evaluation: the
// result always carries every gate's verdict so the caller gets a complete
// failure report.
//
//   1. composite_score >= threshold
//   2. microstructure: spread <= max bps, depth >= min USD within ±2%,
//      VADR >= floor (all hard; missing data fails)
//   3. funding_divergence: cross-venue funding z-score >= threshold
//      (hard; missing data fails)
//   4. OI residual (optional per config; missing data auto-passes)
//   5. ETF flow tint (optional per config; no ETF or missing data
//      auto-passes)

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GateConfig;

// =============================================================================
// Types
// =============================================================================

/// Observations the entry gates evaluate. `None` means the feed was missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryGateInputs {
    pub composite_score: f64,
    pub spread_bps: Option<f64>,
    pub depth_usd: Option<f64>,
    pub vadr: Option<f64>,
    pub funding_z: Option<f64>,
    pub oi_residual_usd: Option<f64>,
    /// Whether the asset has listed ETFs at all.
    pub has_etf: bool,
    pub etf_tint: Option<f64>,
}

/// One gate's verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCheck {
    pub name: String,
    pub passed: bool,
    /// Observed value, when the feed delivered one.
    pub value: Option<f64>,
    pub threshold: f64,
    pub description: String,
}

/// Complete entry-gate evaluation for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryGateResult {
    pub symbol: String,
    pub composite_score: f64,
    pub gate_results: BTreeMap<String, GateCheck>,
    pub passed: bool,
    pub failure_reasons: Vec<String>,
    pub passed_gates: Vec<String>,
    pub eval_time_ms: u64,
}

// =============================================================================
// Evaluation
// =============================================================================

/// Run the full gate chain.
pub fn evaluate(symbol: &str, inputs: &EntryGateInputs, cfg: &GateConfig) -> EntryGateResult {
    let started = Instant::now();
    let mut checks: Vec<GateCheck> = Vec::with_capacity(7);

    // 1. Composite score.
    checks.push(GateCheck {
        name: "composite_score".to_string(),
        passed: inputs.composite_score >= cfg.min_composite,
        value: Some(inputs.composite_score),
        threshold: cfg.min_composite,
        description: format!(
            "composite score {:.1} vs minimum {:.1}",
            inputs.composite_score, cfg.min_composite
        ),
    });

    // 2. Microstructure (hard: missing data fails).
    checks.push(hard_gate(
        "spread",
        inputs.spread_bps,
        cfg.max_spread_bps,
        |value, threshold| value <= threshold,
        format!("bid/ask spread vs maximum {:.0} bps", cfg.max_spread_bps),
    ));
    checks.push(hard_gate(
        "depth",
        inputs.depth_usd,
        cfg.min_depth_usd,
        |value, threshold| value >= threshold,
        format!("book depth within ±2% vs minimum ${:.0}", cfg.min_depth_usd),
    ));
    checks.push(hard_gate(
        "vadr",
        inputs.vadr,
        cfg.min_vadr,
        |value, threshold| value >= threshold,
        format!("volume-adjusted daily range vs minimum {:.1}x", cfg.min_vadr),
    ));

    // 3. Funding divergence (hard: missing data fails).
    checks.push(hard_gate(
        "funding_divergence",
        inputs.funding_z,
        cfg.funding_z_min,
        |value, threshold| value >= threshold,
        format!(
            "cross-venue funding z-score vs minimum {:.1}σ",
            cfg.funding_z_min
        ),
    ));

    // 4. OI residual (optional: missing data auto-passes).
    if cfg.oi_gate_enabled {
        checks.push(optional_gate(
            "oi_residual",
            inputs.oi_residual_usd,
            cfg.min_oi_residual_usd,
            |value, threshold| value >= threshold,
            format!(
                "open-interest residual vs minimum ${:.0}",
                cfg.min_oi_residual_usd
            ),
        ));
    }

    // 5. ETF flow tint (optional: absent ETF or missing data auto-passes).
    if cfg.etf_gate_enabled {
        if inputs.has_etf {
            checks.push(optional_gate(
                "etf_tint",
                inputs.etf_tint,
                cfg.min_etf_tint,
                |value, threshold| value >= threshold,
                format!("ETF flow tint vs minimum {:.2}", cfg.min_etf_tint),
            ));
        } else {
            checks.push(GateCheck {
                name: "etf_tint".to_string(),
                passed: true,
                value: None,
                threshold: cfg.min_etf_tint,
                description: "no listed ETF, gate auto-passes".to_string(),
            });
        }
    }

    let passed = checks.iter().all(|c| c.passed);
    let passed_gates: Vec<String> = checks
        .iter()
        .filter(|c| c.passed)
        .map(|c| c.name.clone())
        .collect();
    let failure_reasons: Vec<String> = checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| format!("{}: {}", c.name, c.description))
        .collect();

    if !passed {
        debug!(symbol, failures = ?failure_reasons, "entry gates blocked");
    }

    EntryGateResult {
        symbol: symbol.to_string(),
        composite_score: inputs.composite_score,
        gate_results: checks.into_iter().map(|c| (c.name.clone(), c)).collect(),
        passed,
        failure_reasons,
        passed_gates,
        eval_time_ms: started.elapsed().as_millis() as u64,
    }
}

/// A hard gate: missing data is a failure.
fn hard_gate(
    name: &str,
    value: Option<f64>,
    threshold: f64,
    check: impl Fn(f64, f64) -> bool,
    description: String,
) -> GateCheck {
    let (passed, description) = match value {
        Some(v) => (check(v, threshold), description),
        None => (false, format!("{description} — data missing (hard gate)")),
    };
    GateCheck {
        name: name.to_string(),
        passed,
        value,
        threshold,
        description,
    }
}

/// An optional gate: missing data auto-passes.
fn optional_gate(
    name: &str,
    value: Option<f64>,
    threshold: f64,
    check: impl Fn(f64, f64) -> bool,
    description: String,
) -> GateCheck {
    let (passed, description) = match value {
        Some(v) => (check(v, threshold), description),
        None => (true, format!("{description} — data missing, auto-pass")),
    };
    GateCheck {
        name: name.to_string(),
        passed,
        value,
        threshold,
        description,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn healthy_inputs() -> EntryGateInputs {
        EntryGateInputs {
            composite_score: 85.0,
            spread_bps: Some(25.0),
            depth_usd: Some(150_000.0),
            vadr: Some(2.1),
            funding_z: Some(2.5),
            oi_residual_usd: Some(2_000_000.0),
            has_etf: false,
            etf_tint: None,
        }
    }

    #[test]
    fn all_gates_pass_on_healthy_inputs() {
        let result = evaluate("BTCUSD", &healthy_inputs(), &GateConfig::default());
        assert!(result.passed);
        assert!(result.failure_reasons.is_empty());
        assert!(result.eval_time_ms <= 1000);
        for gate in ["composite_score", "spread", "depth", "vadr", "funding_divergence"] {
            assert!(result.gate_results[gate].passed, "{gate} should pass");
        }
    }

    #[test]
    fn low_score_fails_only_the_score_gate() {
        let mut inputs = healthy_inputs();
        inputs.composite_score = 60.0;

        let result = evaluate("X", &inputs, &GateConfig::default());
        assert!(!result.passed);
        assert!(!result.gate_results["composite_score"].passed);
        // Other gates still evaluated and reported.
        assert!(result.gate_results["spread"].passed);
        assert!(result.gate_results["funding_divergence"].passed);
    }

    #[test]
    fn weak_funding_blocks_but_reports_everything() {
        let mut inputs = healthy_inputs();
        inputs.composite_score = 80.0;
        inputs.funding_z = Some(1.0);

        let result = evaluate("LOWFUNDING", &inputs, &GateConfig::default());
        assert!(!result.passed);
        for gate in ["composite_score", "vadr", "spread", "depth"] {
            assert!(result.passed_gates.contains(&gate.to_string()));
        }
        assert!(result
            .failure_reasons
            .iter()
            .any(|reason| reason.contains("funding")));
    }

    #[test]
    fn missing_funding_fails_the_hard_gate() {
        let mut inputs = healthy_inputs();
        inputs.funding_z = None;

        let result = evaluate("X", &inputs, &GateConfig::default());
        assert!(!result.passed);
        let check = &result.gate_results["funding_divergence"];
        assert!(!check.passed);
        assert!(check.description.contains("missing"));
    }

    #[test]
    fn missing_microstructure_fails_hard() {
        let mut inputs = healthy_inputs();
        inputs.spread_bps = None;
        inputs.depth_usd = None;

        let result = evaluate("X", &inputs, &GateConfig::default());
        assert!(!result.gate_results["spread"].passed);
        assert!(!result.gate_results["depth"].passed);
    }

    #[test]
    fn optional_oi_gate_auto_passes_on_missing_data() {
        let mut cfg = GateConfig::default();
        cfg.oi_gate_enabled = true;

        let mut inputs = healthy_inputs();
        inputs.oi_residual_usd = None;
        let result = evaluate("X", &inputs, &cfg);
        assert!(result.gate_results["oi_residual"].passed);

        // Present-but-small data still fails.
        inputs.oi_residual_usd = Some(100_000.0);
        let result = evaluate("X", &inputs, &cfg);
        assert!(!result.gate_results["oi_residual"].passed);
    }

    #[test]
    fn etf_gate_auto_passes_without_a_listed_etf() {
        let mut cfg = GateConfig::default();
        cfg.etf_gate_enabled = true;

        let result = evaluate("X", &healthy_inputs(), &cfg);
        assert!(result.gate_results["etf_tint"].passed);

        let mut inputs = healthy_inputs();
        inputs.has_etf = true;
        inputs.etf_tint = Some(0.1);
        let result = evaluate("X", &inputs, &cfg);
        assert!(!result.gate_results["etf_tint"].passed);
    }

    #[test]
    fn disabled_optional_gates_are_not_reported() {
        let result = evaluate("X", &healthy_inputs(), &GateConfig::default());
        assert!(!result.gate_results.contains_key("oi_residual"));
        assert!(!result.gate_results.contains_key("etf_tint"));
    }
}
