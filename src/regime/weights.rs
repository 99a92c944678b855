// =============================================================================
// Weight Router — per-regime composite weight vectors
// =============================================================================
//
// Four built-in vectors, tunable from config. Supplied vectors are
// normalized to sum exactly 1.0 when their sum is within ±5% (source configs
// routinely say 99% or 101% from rounding); anything further off fails
// validation. The momentum weight is clamped to the 0.25 protection floor
// after normalization. The social add-on weight is not part of this sum.
//
// Published weights are swapped atomically: readers grab an Arc snapshot at
// the start of a symbol evaluation and use it throughout, so a 4h update can
// never produce a torn vector mid-pipeline.

use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RegimeWeightsConfig;
use crate::regime::detector::Regime;

/// Momentum weight may never drop below this floor.
pub const MOMENTUM_FLOOR: f64 = 0.25;

/// Allowed deviation of a supplied weight sum from 1.0 before validation
/// fails instead of normalizing.
const SUM_TOLERANCE: f64 = 0.05;

/// Tolerance on the normalized sum.
const CLOSURE_EPSILON: f64 = 1e-3;

// =============================================================================
// WeightVector
// =============================================================================

/// One regime's component weights. The social add-on sits outside this sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub momentum: f64,
    pub technical: f64,
    pub supply_demand: f64,
    pub catalyst: f64,
}

impl WeightVector {
    pub fn trending_bull() -> Self {
        Self {
            momentum: 0.50,
            technical: 0.20,
            supply_demand: 0.20,
            catalyst: 0.10,
        }
    }

    pub fn choppy() -> Self {
        Self {
            momentum: 0.40,
            technical: 0.20,
            supply_demand: 0.25,
            catalyst: 0.15,
        }
    }

    pub fn high_vol() -> Self {
        Self {
            momentum: 0.30,
            technical: 0.25,
            supply_demand: 0.30,
            catalyst: 0.15,
        }
    }

    pub fn risk_off() -> Self {
        Self {
            momentum: 0.25,
            technical: 0.20,
            supply_demand: 0.35,
            catalyst: 0.20,
        }
    }

    pub fn sum(&self) -> f64 {
        self.momentum + self.technical + self.supply_demand + self.catalyst
    }

    /// Normalize to sum exactly 1.0 and apply the momentum floor.
    ///
    /// Fails when the supplied sum deviates from 1.0 by more than ±5%, when
    /// any component is non-positive, or when a component exceeds 0.5 after
    /// normalization.
    pub fn normalized(&self) -> Result<WeightVector> {
        for (name, w) in [
            ("momentum", self.momentum),
            ("technical", self.technical),
            ("supply_demand", self.supply_demand),
            ("catalyst", self.catalyst),
        ] {
            if !w.is_finite() || w <= 0.0 {
                bail!("weight {name} must be positive and finite, got {w}");
            }
        }

        let sum = self.sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            bail!("weight sum {sum:.4} deviates more than 5% from 1.0");
        }

        let mut out = WeightVector {
            momentum: self.momentum / sum,
            technical: self.technical / sum,
            supply_demand: self.supply_demand / sum,
            catalyst: self.catalyst / sum,
        };

        // Momentum protection: raise to the floor and re-scale the rest.
        if out.momentum < MOMENTUM_FLOOR {
            let rest = out.technical + out.supply_demand + out.catalyst;
            let scale = (1.0 - MOMENTUM_FLOOR) / rest;
            out.momentum = MOMENTUM_FLOOR;
            out.technical *= scale;
            out.supply_demand *= scale;
            out.catalyst *= scale;
        }

        for (name, w) in [
            ("momentum", out.momentum),
            ("technical", out.technical),
            ("supply_demand", out.supply_demand),
            ("catalyst", out.catalyst),
        ] {
            if w > 0.5 + CLOSURE_EPSILON {
                bail!("weight {name} is {w:.4} after normalization, above the 0.5 cap");
            }
        }

        debug_assert!((out.sum() - 1.0).abs() < CLOSURE_EPSILON);
        Ok(out)
    }

    /// Validation without keeping the normalized result.
    pub fn validate(&self) -> Result<()> {
        self.normalized().map(|_| ())
    }
}

// =============================================================================
// WeightRouter
// =============================================================================

/// Immutable table of normalized vectors, one per regime.
#[derive(Debug, Clone, Serialize)]
pub struct WeightTable {
    pub trending_bull: WeightVector,
    pub choppy: WeightVector,
    pub high_vol: WeightVector,
    pub risk_off: WeightVector,
}

impl WeightTable {
    pub fn for_regime(&self, regime: Regime) -> WeightVector {
        match regime {
            Regime::TrendingBull => self.trending_bull,
            Regime::Choppy => self.choppy,
            Regime::HighVol => self.high_vol,
            Regime::RiskOff => self.risk_off,
        }
    }
}

/// Copy-on-write weight publication point.
pub struct WeightRouter {
    table: RwLock<Arc<WeightTable>>,
}

impl WeightRouter {
    /// Build from config, normalizing and validating every vector.
    pub fn new(cfg: &RegimeWeightsConfig) -> Result<Self> {
        let table = Self::build_table(cfg)?;
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
        })
    }

    fn build_table(cfg: &RegimeWeightsConfig) -> Result<WeightTable> {
        Ok(WeightTable {
            trending_bull: cfg.trending_bull.normalized()?,
            choppy: cfg.choppy.normalized()?,
            high_vol: cfg.high_vol.normalized()?,
            risk_off: cfg.risk_off.normalized()?,
        })
    }

    /// Atomically swap in a new validated table. Readers holding the old
    /// snapshot are unaffected.
    pub fn publish(&self, cfg: &RegimeWeightsConfig) -> Result<()> {
        let table = Self::build_table(cfg)?;
        *self.table.write() = Arc::new(table);
        info!("regime weight table republished");
        Ok(())
    }

    /// Snapshot pointer for one symbol evaluation. Use the same snapshot for
    /// the whole pipeline pass.
    pub fn snapshot(&self) -> Arc<WeightTable> {
        self.table.read().clone()
    }

    /// Weights for a regime from the current snapshot.
    pub fn weights_for(&self, regime: Regime) -> WeightVector {
        self.snapshot().for_regime(regime)
    }

    /// Weights for a possibly-aliased regime label; unknown labels fall back
    /// to the conservative default (choppy).
    pub fn weights_for_label(&self, label: &str) -> WeightVector {
        let regime = Regime::from_label(label);
        debug!(label, %regime, "routed weight vector");
        self.weights_for(regime)
    }
}
