//! Daily inputs supplied by collaborators outside the organ model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Stress multipliers from the physiological sub-models, roughly in [0, 1].
/// Accelerations are ≥ 1 under drought.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StressFactors {
    /// Leaf expansion stress (water/general).
    pub expansion: f64,
    /// Stress during cell division, before a cohort appears.
    pub cell_division: f64,
    /// Thermal-time multiplier for fully expanded cohorts.
    pub lag_acceleration: f64,
    /// Thermal-time multiplier for senescing cohorts.
    pub senescence_acceleration: f64,
}

impl Default for StressFactors {
    fn default() -> Self {
        StressFactors {
            expansion: 1.0,
            cell_division: 1.0,
            lag_acceleration: 1.0,
            senescence_acceleration: 1.0,
        }
    }
}

/// Plant and stem populations from the structure model (per m²).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureState {
    pub plant_population: f64,
    pub main_stem_population: f64,
    pub total_stem_population: f64,
    /// Fraction of plants that died today.
    #[serde(default)]
    pub proportion_plant_mortality: f64,
    /// Fraction of branches that died today.
    #[serde(default)]
    pub proportion_branch_mortality: f64,
}

impl StructureState {
    /// A single-stemmed stand with no mortality.
    pub fn uniform(population: f64) -> Self {
        StructureState {
            plant_population: population,
            main_stem_population: population,
            total_stem_population: population,
            proportion_plant_mortality: 0.0,
            proportion_branch_mortality: 0.0,
        }
    }
}

/// Everything an organ may read on a given day.
#[derive(Clone, Debug, PartialEq)]
pub struct DayContext {
    pub date: NaiveDate,
    /// Thermal time accumulated today (°Cd).
    pub thermal_time: f64,
    /// DM fixed by the canopy today (g/m²), from light interception.
    pub photosynthesis: f64,
    /// Mineral N the soil can supply today (g/m²).
    pub soil_n_available: f64,
    pub stress: StressFactors,
    pub structure: StructureState,
}

impl DayContext {
    pub fn new(date: NaiveDate, thermal_time: f64) -> Self {
        DayContext {
            date,
            thermal_time,
            photosynthesis: 0.0,
            soil_n_available: 0.0,
            stress: StressFactors::default(),
            structure: StructureState::default(),
        }
    }
}

/// Receives biomass that leaves the plant (detachment, ending, harvest losses).
pub trait ResidueSink {
    /// Both amounts in g/m².
    fn add_residue(&mut self, dry_matter_wt: f64, nitrogen: f64);
}

/// Running totals of residue returned to the soil surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidueLedger {
    pub dry_matter_wt: f64,
    pub nitrogen: f64,
    pub additions: u32,
}

impl ResidueSink for ResidueLedger {
    fn add_residue(&mut self, dry_matter_wt: f64, nitrogen: f64) {
        self.dry_matter_wt += dry_matter_wt;
        self.nitrogen += nitrogen;
        self.additions += 1;
    }
}
