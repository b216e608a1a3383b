//! Plant-level events delivered to organs outside the daily protocol.

use crate::context::ResidueSink;
use crop_core::{ArbitrationError, BiomassPool};
use serde::{Deserialize, Serialize};

/// Coarse organ lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrganStage {
    #[default]
    Uninitialised,
    Sown,
    Growing,
    Ended,
}

impl OrganStage {
    pub fn is_alive(self) -> bool {
        matches!(self, OrganStage::Sown | OrganStage::Growing)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SowingParameters {
    /// Plants per m².
    pub population: f64,
    /// Maximum green cover the canopy can reach (0, 1].
    pub max_cover: f64,
}

/// Carried by a leaf-tip appearance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppearanceParams {
    /// 1-based node position.
    pub rank: usize,
    /// Stems per m² bearing this cohort.
    pub total_stem_population: f64,
    /// Fraction of a full leaf the final cohort represents.
    #[serde(default = "one")]
    pub final_fraction: f64,
    /// Thermal time already accumulated by the cohort at appearance.
    #[serde(default)]
    pub cohort_age: f64,
}

fn one() -> f64 {
    1.0
}

/// Fractions of live and dead biomass taken off by a removal event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BiomassRemoval {
    #[serde(default)]
    pub live_to_remove: f64,
    #[serde(default)]
    pub dead_to_remove: f64,
    #[serde(default)]
    pub live_to_residue: f64,
    #[serde(default)]
    pub dead_to_residue: f64,
}

impl BiomassRemoval {
    pub fn validate(&self) -> Result<(), ArbitrationError> {
        let all = [
            self.live_to_remove,
            self.dead_to_remove,
            self.live_to_residue,
            self.dead_to_residue,
        ];
        if all.iter().any(|f| !(0.0..=1.0).contains(f)) {
            return Err(ArbitrationError::invalid(
                "biomass removal",
                "fractions must be within [0, 1]",
            ));
        }
        if self.live_to_remove + self.live_to_residue > 1.0
            || self.dead_to_remove + self.dead_to_residue > 1.0
        {
            return Err(ArbitrationError::invalid(
                "biomass removal",
                "removed plus residue fractions exceed 1",
            ));
        }
        Ok(())
    }

    /// Take biomass off `live` and `dead`. Residue goes to `sink`; the
    /// removed amount (taken off the field) is returned.
    pub fn apply(
        &self,
        live: &mut BiomassPool,
        dead: &mut BiomassPool,
        sink: &mut dyn ResidueSink,
    ) -> Result<BiomassPool, ArbitrationError> {
        self.validate()?;
        let mut removed = live.scaled(self.live_to_remove);
        removed.add(&dead.scaled(self.dead_to_remove));
        let mut residue = live.scaled(self.live_to_residue);
        residue.add(&dead.scaled(self.dead_to_residue));

        live.multiply(1.0 - self.live_to_remove - self.live_to_residue);
        dead.multiply(1.0 - self.dead_to_remove - self.dead_to_residue);
        if residue.wt() > 0.0 {
            sink.add_residue(residue.wt(), residue.n());
        }
        let mut total = removed;
        total.add(&residue);
        Ok(total)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlantEvent {
    Sowing(SowingParameters),
    /// Clone the cohort templates ready for appearance.
    InitialiseCohorts,
    /// Initialise one more cohort beyond the templates.
    AddCohort { rank: usize },
    CohortAppears(AppearanceParams),
    /// Uniform defoliation.
    Kill { fraction: f64 },
    /// Frost damage to appeared cohorts.
    Frost { fraction: f64 },
    /// Reduce cohort populations.
    Thin { proportion: f64 },
    RemoveLowestCohort,
    RemoveHighestCohort,
    StageStarted { stage: String },
    Harvest(BiomassRemoval),
    PlantEnding,
}

/// Validate a fraction parameter carried by an event.
pub(crate) fn check_fraction(name: &'static str, value: f64) -> Result<f64, ArbitrationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ArbitrationError::invalid(name, format!("{value} is outside [0, 1]")))
    }
}
