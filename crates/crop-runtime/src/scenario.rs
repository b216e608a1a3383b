//! YAML scenarios: organ parameters, a constant daily climate, a leaf
//! appearance rate and dated plant events.

use crate::plant::Plant;
use crate::scheduler::{DailyDrivers, Today};
use crate::RunError;
use chrono::{Days, NaiveDate};
use crop_organs::{
    constant, AppearanceParams, BoxedFunction, DayContext, GenericOrgan, GenericOrganFunctions,
    GenericOrganParameters, Leaf, LeafFunctions, LeafParameters, Nodule, PlantEvent, ReproductiveFunctions,
    ReproductiveOrgan, ReproductiveParameters, Root, StressFactors, StructureState,
};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub start_date: NaiveDate,
    pub days: u32,
    pub weather: Weather,
    #[serde(default)]
    pub structure: Option<LeafAppearance>,
    pub leaf: LeafParameters,
    #[serde(default)]
    pub stem: Option<BulkOrgan>,
    #[serde(default)]
    pub grain: Option<Grain>,
    #[serde(default)]
    pub root: Option<BulkOrgan>,
    #[serde(default)]
    pub nodule: Option<NoduleConfig>,
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Weather {
    /// °Cd per day.
    pub thermal_time: f64,
    /// Per-day thermal time; days beyond the series use `thermal_time`.
    #[serde(default)]
    pub thermal_time_series: Vec<f64>,
    /// Incident radiation (MJ/m²/day).
    pub radiation: f64,
    /// g DM per MJ intercepted.
    pub radiation_use_efficiency: f64,
    /// Mineral N the soil offers each day (g/m²).
    #[serde(default)]
    pub soil_n_available: f64,
    #[serde(default)]
    pub stress: StressFactors,
}

/// Leaf tips appear one rank at a time, every `phyllochron` °Cd after sowing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LeafAppearance {
    pub phyllochron: f64,
    pub final_leaf_number: usize,
}

/// A generic organ whose daily demands and rates are constants.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkOrgan {
    #[serde(flatten)]
    pub params: GenericOrganParameters,
    /// g/m²/day of grown tissue.
    #[serde(default)]
    pub structural_dm_demand: f64,
    #[serde(default)]
    pub metabolic_dm_demand: f64,
    #[serde(default)]
    pub storage_dm_demand: f64,
    #[serde(default)]
    pub senescence_rate: f64,
    #[serde(default)]
    pub detachment_rate: f64,
    #[serde(default)]
    pub maintenance_respiration_rate: f64,
}

impl BulkOrgan {
    fn functions(&self) -> GenericOrganFunctions {
        GenericOrganFunctions {
            structural_dm_demand: constant(self.structural_dm_demand),
            metabolic_dm_demand: constant(self.metabolic_dm_demand),
            storage_dm_demand: constant(self.storage_dm_demand),
            senescence_rate: constant(self.senescence_rate),
            detachment_rate: constant(self.detachment_rate),
            maintenance_respiration_rate: constant(self.maintenance_respiration_rate),
            photosynthesis: constant(0.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoduleConfig {
    #[serde(flatten)]
    pub organ: BulkOrgan,
    /// g N/m²/day offered.
    pub fixation_rate: f64,
    /// g DM respired per g N fixed.
    pub fixation_cost: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Grain {
    #[serde(flatten)]
    pub params: ReproductiveParameters,
    /// Day of the run on which grain filling starts.
    pub filling_starts: u32,
    /// g/m²/day of grown grain.
    pub dm_demand: f64,
    pub n_filling_rate: f64,
    /// Grains per m².
    pub number: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduledEvent {
    /// Day of the run, counted from `start_date`.
    pub day: u32,
    #[serde(flatten)]
    pub event: PlantEvent,
}

impl Scenario {
    pub fn from_yaml(text: &str) -> Result<Scenario, RunError> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Scenario, RunError> {
        let text = fs::read_to_string(path.as_ref())?;
        let scenario = Scenario::from_yaml(&text)?;
        info!(name = %scenario.name, days = scenario.days, "scenario loaded");
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<(), RunError> {
        let invalid = |reason: String| Err(RunError::InvalidScenario(reason));
        if self.days == 0 {
            return invalid("days must be > 0".into());
        }
        let w = &self.weather;
        if !(w.thermal_time >= 0.0) || w.thermal_time_series.iter().any(|tt| !(*tt >= 0.0)) {
            return invalid("thermal time must be >= 0".into());
        }
        if !(w.radiation >= 0.0 && w.radiation_use_efficiency >= 0.0 && w.soil_n_available >= 0.0) {
            return invalid("radiation, radiation use efficiency and soil N must be >= 0".into());
        }
        if let Some(s) = &self.structure {
            if !(s.phyllochron > 0.0) {
                return invalid("phyllochron must be > 0".into());
            }
        }
        if let Some(e) = self.events.iter().find(|e| e.day >= self.days) {
            return invalid(format!("event on day {} is beyond the {}-day run", e.day, self.days));
        }
        if !self.events.iter().any(|e| matches!(e.event, PlantEvent::Sowing(_))) {
            return invalid("no sowing event".into());
        }
        Ok(())
    }

    pub fn date(&self, day: u32) -> NaiveDate {
        self.start_date
            .checked_add_days(Days::new(u64::from(day)))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Build the organs in arbitration order: leaf, stem, grain, root, nodule.
    pub fn build_plant(&self) -> Result<Plant, RunError> {
        let mut plant = Plant::new().with_organ(Box::new(Leaf::new(self.leaf.clone(), LeafFunctions::default())?));
        if let Some(stem) = &self.stem {
            plant.push(Box::new(GenericOrgan::new("Stem", stem.params.clone(), stem.functions())?));
        }
        if let Some(grain) = &self.grain {
            let starts = self.date(grain.filling_starts);
            let rate = grain.dm_demand;
            let n_rate = grain.n_filling_rate;
            let filling = move |value: f64| -> BoxedFunction {
                Box::new(move |ctx: &DayContext| if ctx.date >= starts { value } else { 0.0 })
            };
            let functions = ReproductiveFunctions {
                dm_demand: filling(rate),
                n_filling_rate: filling(n_rate),
                number: constant(grain.number),
            };
            plant.push(Box::new(ReproductiveOrgan::new("Grain", grain.params.clone(), functions)?));
        }
        if let Some(root) = &self.root {
            plant.push(Box::new(Root::new(root.params.clone(), root.functions())?));
        }
        if let Some(nodule) = &self.nodule {
            plant.push(Box::new(Nodule::new(
                nodule.organ.params.clone(),
                nodule.organ.functions(),
                constant(nodule.fixation_rate),
                constant(nodule.fixation_cost),
            )?));
        }
        Ok(plant)
    }

    pub fn drivers(&self) -> ScenarioDrivers {
        ScenarioDrivers {
            scenario: self.clone(),
            population: 0.0,
            sown: false,
            thermal_time_since_sowing: 0.0,
            next_rank: 1,
        }
    }
}

/// Daily drivers replayed from a [`Scenario`], plus a minimal structure
/// model that emits leaf appearance from accumulated thermal time.
#[derive(Debug, Clone)]
pub struct ScenarioDrivers {
    scenario: Scenario,
    population: f64,
    sown: bool,
    thermal_time_since_sowing: f64,
    next_rank: usize,
}

impl ScenarioDrivers {
    fn thermal_time(&self, day: u32) -> f64 {
        let w = &self.scenario.weather;
        w.thermal_time_series
            .get(day as usize)
            .copied()
            .unwrap_or(w.thermal_time)
    }

    /// Track the population and sowing state the events imply.
    fn observe(&mut self, event: &PlantEvent, out: &mut Vec<PlantEvent>) {
        match event {
            PlantEvent::Sowing(sowing) => {
                self.population = sowing.population;
                self.sown = true;
                self.thermal_time_since_sowing = 0.0;
                self.next_rank = 1;
                if self.scenario.structure.is_some() {
                    out.push(PlantEvent::InitialiseCohorts);
                }
            }
            PlantEvent::Thin { proportion } => self.population *= 1.0 - proportion.clamp(0.0, 1.0),
            PlantEvent::PlantEnding => self.sown = false,
            _ => {}
        }
    }

    fn appearances(&mut self, out: &mut Vec<PlantEvent>) {
        let Some(structure) = self.scenario.structure else {
            return;
        };
        let templates = self.scenario.leaf.initial_cohort_areas.len();
        while self.next_rank <= structure.final_leaf_number
            && self.thermal_time_since_sowing >= (self.next_rank - 1) as f64 * structure.phyllochron
        {
            let rank = self.next_rank;
            if rank > templates {
                out.push(PlantEvent::AddCohort { rank });
            }
            out.push(PlantEvent::CohortAppears(AppearanceParams {
                rank,
                total_stem_population: self.population,
                final_fraction: 1.0,
                cohort_age: 0.0,
            }));
            debug!(rank, "leaf tip appearance scheduled");
            self.next_rank += 1;
        }
    }
}

impl DailyDrivers for ScenarioDrivers {
    fn today(&mut self, day: u32, plant: &Plant) -> Result<Today, RunError> {
        let scheduled: Vec<PlantEvent> = self
            .scenario
            .events
            .iter()
            .filter(|e| e.day == day)
            .map(|e| e.event.clone())
            .collect();
        let mut events = Vec::with_capacity(scheduled.len());
        for event in scheduled {
            let mut follow_up = Vec::new();
            self.observe(&event, &mut follow_up);
            events.push(event);
            events.extend(follow_up);
        }
        if self.sown {
            self.appearances(&mut events);
        }

        let thermal_time = self.thermal_time(day);
        let w = &self.scenario.weather;
        let mut ctx = DayContext::new(self.scenario.date(day), thermal_time);
        ctx.photosynthesis = w.radiation * w.radiation_use_efficiency * plant.canopy_cover();
        ctx.soil_n_available = w.soil_n_available;
        ctx.stress = w.stress;
        if self.sown {
            ctx.structure = StructureState::uniform(self.population);
            self.thermal_time_since_sowing += thermal_time;
        }
        Ok(Today { ctx, events })
    }
}
