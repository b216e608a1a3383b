//! The leaf organ: an [`ArbitrationCore`] over a [`LeafCohorts`] collection.

use crate::arbitration::{Arbitratable, ArbitrationCore, DailyFlows, Organ};
use crate::cohort::{CohortDrivers, LeafCohort, LeafCohortParameters};
use crate::collection::LeafCohorts;
use crate::context::{DayContext, ResidueSink};
use crate::events::{check_fraction, OrganStage, PlantEvent};
use crate::function::{constant, BoxedFunction, DailyFunction};
use crop_core::{divide, Allocation, ArbitrationError, BiomassPool, Demand, PotentialAllocation, Resource, Supply};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeafParameters {
    pub cohort: LeafCohortParameters,
    /// Fraction of assimilate that ends up as leaf DM.
    pub dm_conversion_efficiency: f64,
    pub carbon_concentration: f64,
    /// Canopy light extinction coefficient, used for green cover.
    #[serde(default = "default_extinction")]
    pub extinction_coefficient: f64,
    /// Area per leaf (mm²) of the cohorts present at emergence, by rank.
    #[serde(default)]
    pub initial_cohort_areas: Vec<f64>,
}

fn default_extinction() -> f64 {
    0.5
}

impl LeafParameters {
    pub fn validate(&self) -> Result<(), ArbitrationError> {
        self.cohort.validate()?;
        if !(0.0..=1.0).contains(&self.dm_conversion_efficiency) {
            return Err(ArbitrationError::invalid("dm_conversion_efficiency", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.carbon_concentration) {
            return Err(ArbitrationError::invalid("carbon_concentration", "must be within [0, 1]"));
        }
        if !(self.extinction_coefficient > 0.0) {
            return Err(ArbitrationError::invalid("extinction_coefficient", "must be > 0"));
        }
        if self.initial_cohort_areas.iter().any(|a| !(*a >= 0.0)) {
            return Err(ArbitrationError::invalid("initial_cohort_areas", "areas must be >= 0"));
        }
        Ok(())
    }
}

/// Daily functions the leaf reads; each is evaluated once per day.
pub struct LeafFunctions {
    pub expansion_stress: BoxedFunction,
    pub cell_division_stress: BoxedFunction,
    pub lag_acceleration: BoxedFunction,
    pub senescence_acceleration: BoxedFunction,
    pub shade_induced_senescence_rate: BoxedFunction,
    pub senescing_leaf_relative_size: BoxedFunction,
    pub maintenance_respiration_rate: BoxedFunction,
    /// DM fixed by the canopy.
    pub photosynthesis: BoxedFunction,
}

impl Default for LeafFunctions {
    fn default() -> Self {
        LeafFunctions {
            expansion_stress: Box::new(|ctx: &DayContext| ctx.stress.expansion),
            cell_division_stress: Box::new(|ctx: &DayContext| ctx.stress.cell_division),
            lag_acceleration: Box::new(|ctx: &DayContext| ctx.stress.lag_acceleration),
            senescence_acceleration: Box::new(|ctx: &DayContext| ctx.stress.senescence_acceleration),
            shade_induced_senescence_rate: constant(0.0),
            senescing_leaf_relative_size: constant(1.0),
            maintenance_respiration_rate: constant(0.0),
            photosynthesis: Box::new(|ctx: &DayContext| ctx.photosynthesis),
        }
    }
}

impl LeafFunctions {
    fn drivers(&self, ctx: &DayContext) -> CohortDrivers {
        CohortDrivers {
            thermal_time: ctx.thermal_time,
            expansion_stress: self.expansion_stress.value(ctx),
            cell_division_stress: self.cell_division_stress.value(ctx),
            lag_acceleration: self.lag_acceleration.value(ctx),
            senescence_acceleration: self.senescence_acceleration.value(ctx),
            shade_induced_senescence_rate: self.shade_induced_senescence_rate.value(ctx),
            senescing_leaf_relative_size: self.senescing_leaf_relative_size.value(ctx),
            maintenance_respiration_rate: self.maintenance_respiration_rate.value(ctx),
            structure: ctx.structure,
        }
    }
}

pub struct Leaf {
    core: ArbitrationCore,
    params: LeafParameters,
    functions: LeafFunctions,
    templates: Vec<LeafCohort>,
    cohorts: LeafCohorts,
    cohorts_initialised: bool,
    stage: OrganStage,
    max_cover: f64,
    drivers: Option<CohortDrivers>,
}

impl Leaf {
    pub fn new(params: LeafParameters, functions: LeafFunctions) -> Result<Self, ArbitrationError> {
        params.validate()?;
        let templates = params
            .initial_cohort_areas
            .iter()
            .enumerate()
            .map(|(i, area)| LeafCohort::template(i + 1, *area))
            .collect();
        Ok(Leaf {
            core: ArbitrationCore::new("Leaf"),
            params,
            functions,
            templates,
            cohorts: LeafCohorts::new(),
            cohorts_initialised: false,
            stage: OrganStage::Uninitialised,
            max_cover: 1.0,
            drivers: None,
        })
    }

    pub fn cohorts(&self) -> &LeafCohorts {
        &self.cohorts
    }

    pub fn lai(&self) -> f64 {
        self.cohorts.lai()
    }

    pub fn lai_dead(&self) -> f64 {
        self.cohorts.lai_dead()
    }

    /// Green cover from LAI, saturating at the sown maximum.
    pub fn cover_green(&self) -> f64 {
        if self.max_cover <= 0.0 {
            return 0.0;
        }
        self.max_cover * (1.0 - (-self.params.extinction_coefficient * self.lai() / self.max_cover).exp())
    }

    fn efficiency(&self) -> f64 {
        self.params.dm_conversion_efficiency
    }

    fn reset(&mut self) {
        self.cohorts.clear();
        self.cohorts_initialised = false;
        self.drivers = None;
    }
}

impl Arbitratable for Leaf {
    fn core(&self) -> &ArbitrationCore {
        &self.core
    }

    fn set_supply(&mut self, kind: Resource, ctx: &DayContext) -> Result<Supply, ArbitrationError> {
        let supply = match kind {
            Resource::DryMatter => Supply {
                fixation: if self.stage.is_alive() { self.functions.photosynthesis.value(ctx) } else { 0.0 },
                uptake: 0.0,
                reallocation: self.cohorts.dm_reallocation_supply(),
                retranslocation: self.cohorts.dm_retranslocation_supply(),
            },
            Resource::Nitrogen => Supply {
                reallocation: self.cohorts.n_reallocation_supply(),
                retranslocation: self.cohorts.n_retranslocation_supply(),
                ..Default::default()
            },
        };
        self.core.record_supply(kind, supply)
    }

    fn set_demand(&mut self, kind: Resource, _ctx: &DayContext) -> Result<Demand, ArbitrationError> {
        let demand = match kind {
            Resource::DryMatter => {
                let grown = self.cohorts.compute_dm_demand()?;
                let eff = self.efficiency();
                Demand::new(
                    divide(grown.structural, eff, 0.0),
                    divide(grown.metabolic, eff, 0.0),
                    divide(grown.storage, eff, 0.0),
                )
            }
            Resource::Nitrogen => self.cohorts.compute_n_demand(),
        };
        self.core.record_demand(kind, demand)
    }

    fn set_potential_allocation(&mut self, potential: PotentialAllocation) -> Result<(), ArbitrationError> {
        let p = self.core.record_potential(potential)?;
        let eff = self.efficiency();
        self.cohorts.set_potential_allocation(p.structural * eff, p.metabolic * eff)
    }

    fn set_allocation(&mut self, kind: Resource, allocation: &Allocation) -> Result<(), ArbitrationError> {
        let a = self.core.accept_allocation(kind, allocation)?;
        let start = self.cohorts.live();
        match kind {
            Resource::DryMatter => {
                let eff = self.efficiency();
                let grown = Allocation {
                    structural: a.structural * eff,
                    metabolic: a.metabolic * eff,
                    storage: a.storage * eff,
                    ..a
                };
                self.cohorts.allocate_dm(&grown)?;
                self.core
                    .record_growth_respiration(grown.grown(), eff, self.params.carbon_concentration);
                self.core.flows.allocated.structural_wt += grown.structural;
                self.core.flows.allocated.metabolic_wt += grown.metabolic;
                self.core.flows.allocated.storage_wt += grown.storage;
                let expected = start.wt() + grown.grown() - a.reallocation - a.retranslocation;
                self.core.check_balance(kind, expected, self.cohorts.live().wt())
            }
            Resource::Nitrogen => {
                self.cohorts.allocate_n(&a)?;
                self.core.flows.allocated.structural_n += a.structural;
                self.core.flows.allocated.metabolic_n += a.metabolic;
                self.core.flows.allocated.storage_n += a.storage;
                let expected = start.n() + a.grown() - a.reallocation - a.retranslocation;
                self.core.check_balance(kind, expected, self.cohorts.live().n())
            }
        }
    }

    fn live(&self) -> BiomassPool {
        self.cohorts.live()
    }

    fn dead(&self) -> BiomassPool {
        self.cohorts.dead()
    }
}

impl Organ for Leaf {
    fn stage(&self) -> OrganStage {
        self.stage
    }

    fn begin_day(&mut self) {
        self.core.begin_day();
    }

    fn do_potential_growth(&mut self, ctx: &DayContext) -> Result<(), ArbitrationError> {
        if !self.stage.is_alive() {
            return Ok(());
        }
        self.stage = OrganStage::Growing;
        let drivers = self.functions.drivers(ctx);
        self.cohorts.do_potential_growth(&drivers)?;
        self.drivers = Some(drivers);
        Ok(())
    }

    fn do_actual_growth(&mut self, ctx: &DayContext, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        if !self.stage.is_alive() {
            return Ok(());
        }
        let drivers = match self.drivers {
            Some(d) => d,
            None => self.functions.drivers(ctx),
        };
        let growth = self.cohorts.do_actual_growth(&drivers, residue)?;
        let flows: &mut DailyFlows = &mut self.core.flows;
        flows.senesced.add(&growth.senesced);
        flows.detached.add(&growth.detached);
        flows.maintenance_respiration += growth.maintenance_respiration;
        Ok(())
    }

    fn handle_event(&mut self, event: &PlantEvent, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        match event {
            PlantEvent::Sowing(sowing) => {
                if !(sowing.max_cover > 0.0 && sowing.max_cover <= 1.0) {
                    return Err(ArbitrationError::invalid("max_cover", "must be within (0, 1]"));
                }
                self.reset();
                self.max_cover = sowing.max_cover;
                self.stage = OrganStage::Sown;
                info!(max_cover = sowing.max_cover, "leaf sown");
            }
            PlantEvent::InitialiseCohorts => {
                self.cohorts.initialise_from(&self.templates);
                self.cohorts_initialised = true;
                debug!(cohorts = self.cohorts.len(), "leaf cohorts initialised");
            }
            PlantEvent::AddCohort { rank } => {
                if !self.cohorts_initialised {
                    return Err(ArbitrationError::CohortNotInitialised {
                        rank: *rank,
                        initialised: 0,
                    });
                }
                self.cohorts.push(LeafCohort::template(*rank, 0.0).initialised_copy());
            }
            PlantEvent::CohortAppears(appearance) => {
                self.cohorts.appear(appearance, &self.params.cohort)?;
            }
            PlantEvent::Kill { fraction } => {
                let fraction = check_fraction("kill fraction", *fraction)?;
                self.cohorts.kill(fraction);
                info!(fraction, "leaf killed");
            }
            PlantEvent::Frost { fraction } => {
                let fraction = check_fraction("frost fraction", *fraction)?;
                self.cohorts.frost(fraction);
                info!(fraction, "leaf frosted");
            }
            PlantEvent::Thin { proportion } => {
                let proportion = check_fraction("thinning proportion", *proportion)?;
                self.cohorts.thin(proportion);
            }
            PlantEvent::RemoveLowestCohort => {
                if let Some(cohort) = self.cohorts.remove_lowest() {
                    debug!(rank = cohort.rank(), "lowest cohort removed");
                }
            }
            PlantEvent::RemoveHighestCohort => {
                if let Some(cohort) = self.cohorts.remove_highest() {
                    debug!(rank = cohort.rank(), "highest cohort removed");
                }
            }
            PlantEvent::Harvest(removal) => {
                let taken = self.cohorts.remove_biomass(removal, residue)?;
                self.core.flows.removed.add(&taken);
                info!(dm = taken.wt(), "leaf biomass removed");
            }
            PlantEvent::PlantEnding => {
                let mut all = self.cohorts.live();
                all.add(&self.cohorts.dead());
                if all.wt() > 0.0 {
                    residue.add_residue(all.wt(), all.n());
                }
                info!(dm = all.wt(), n = all.n(), "leaf ended, biomass to residue");
                self.reset();
                self.stage = OrganStage::Ended;
            }
            PlantEvent::StageStarted { .. } => {}
        }
        Ok(())
    }

    fn canopy_cover(&self) -> f64 {
        self.cover_green()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::tests::params;
    use crate::context::{ResidueLedger, StructureState};
    use crate::events::{AppearanceParams, SowingParameters};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn leaf(areas: Vec<f64>) -> Leaf {
        Leaf::new(
            LeafParameters {
                cohort: params(),
                dm_conversion_efficiency: 0.8,
                carbon_concentration: 0.4,
                extinction_coefficient: 0.5,
                initial_cohort_areas: areas,
            },
            LeafFunctions::default(),
        )
        .unwrap()
    }

    fn ctx(tt: f64) -> DayContext {
        let mut ctx = DayContext::new(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), tt);
        ctx.structure = StructureState::uniform(100.0);
        ctx.photosynthesis = 5.0;
        ctx
    }

    fn sown(areas: Vec<f64>) -> (Leaf, ResidueLedger) {
        let mut leaf = leaf(areas);
        let mut sink = ResidueLedger::default();
        leaf.handle_event(&PlantEvent::Sowing(SowingParameters { population: 100.0, max_cover: 0.9 }), &mut sink)
            .unwrap();
        leaf.handle_event(&PlantEvent::InitialiseCohorts, &mut sink).unwrap();
        (leaf, sink)
    }

    fn appear(leaf: &mut Leaf, rank: usize, sink: &mut ResidueLedger) {
        leaf.handle_event(
            &PlantEvent::CohortAppears(AppearanceParams {
                rank,
                total_stem_population: 100.0,
                final_fraction: 1.0,
                cohort_age: 0.0,
            }),
            sink,
        )
        .unwrap();
    }

    /// Drive one day, granting every demand in full.
    fn full_day(leaf: &mut Leaf, ctx: &DayContext, sink: &mut ResidueLedger) {
        leaf.begin_day();
        leaf.do_potential_growth(ctx).unwrap();
        leaf.set_supply(Resource::DryMatter, ctx).unwrap();
        leaf.set_supply(Resource::Nitrogen, ctx).unwrap();
        let dm = leaf.set_demand(Resource::DryMatter, ctx).unwrap();
        leaf.set_potential_allocation(PotentialAllocation {
            structural: dm.structural,
            metabolic: dm.metabolic,
            storage: dm.storage,
        })
        .unwrap();
        let n = leaf.set_demand(Resource::Nitrogen, ctx).unwrap();
        leaf.set_allocation(
            Resource::DryMatter,
            &Allocation { structural: dm.structural, metabolic: dm.metabolic, storage: dm.storage, ..Default::default() },
        )
        .unwrap();
        leaf.set_allocation(
            Resource::Nitrogen,
            &Allocation { structural: n.structural, metabolic: n.metabolic, storage: n.storage, ..Default::default() },
        )
        .unwrap();
        leaf.do_actual_growth(ctx, sink).unwrap();
    }

    #[test]
    fn sowing_requires_positive_cover() {
        let mut leaf = leaf(vec![]);
        let mut sink = ResidueLedger::default();
        let err = leaf
            .handle_event(&PlantEvent::Sowing(SowingParameters { population: 100.0, max_cover: 0.0 }), &mut sink)
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::InvalidParameter { name: "max_cover", .. }));
    }

    #[test]
    fn add_cohort_needs_initialised_cohorts() {
        let mut leaf = leaf(vec![]);
        let mut sink = ResidueLedger::default();
        assert!(leaf.handle_event(&PlantEvent::AddCohort { rank: 1 }, &mut sink).is_err());
        leaf.handle_event(&PlantEvent::InitialiseCohorts, &mut sink).unwrap();
        leaf.handle_event(&PlantEvent::AddCohort { rank: 1 }, &mut sink).unwrap();
        assert_eq!(leaf.cohorts().initialised_count(), 1);
    }

    #[test]
    fn appearance_beyond_initialised_ranks_fails() {
        let (mut leaf, mut sink) = sown(vec![0.0, 0.0]);
        let err = leaf
            .handle_event(
                &PlantEvent::CohortAppears(AppearanceParams {
                    rank: 5,
                    total_stem_population: 100.0,
                    final_fraction: 1.0,
                    cohort_age: 0.0,
                }),
                &mut sink,
            )
            .unwrap_err();
        assert_eq!(err, ArbitrationError::CohortNotInitialised { rank: 5, initialised: 2 });
    }

    #[test]
    fn demand_is_grossed_up_by_conversion_efficiency() {
        let (mut leaf, mut sink) = sown(vec![0.0]);
        appear(&mut leaf, 1, &mut sink);
        let c = ctx(10.0);
        leaf.begin_day();
        leaf.do_potential_growth(&c).unwrap();
        leaf.set_supply(Resource::DryMatter, &c).unwrap();
        let dm = leaf.set_demand(Resource::DryMatter, &c).unwrap();
        let cohort = leaf.cohorts().by_rank(1).map(|c| c.dm_demand()).unwrap();
        assert_relative_eq!(dm.structural, cohort.structural / 0.8, epsilon = 1e-15);
        assert_eq!(leaf.supply(Resource::DryMatter).unwrap().fixation, 5.0);
    }

    #[test]
    fn daily_allocation_conserves_mass() {
        let (mut leaf, mut sink) = sown(vec![0.0, 0.0]);
        appear(&mut leaf, 1, &mut sink);
        appear(&mut leaf, 2, &mut sink);
        for _ in 0..20 {
            full_day(&mut leaf, &ctx(12.0), &mut sink);
            let flows = leaf.flows();
            assert!(flows.growth_respiration >= 0.0);
        }
        assert!(leaf.lai() > 0.0);
        assert!(leaf.cover_green() > 0.0 && leaf.cover_green() < 0.9);
    }

    #[test]
    fn over_grant_fails_the_allocation() {
        let (mut leaf, mut sink) = sown(vec![0.0]);
        appear(&mut leaf, 1, &mut sink);
        let c = ctx(10.0);
        leaf.begin_day();
        leaf.do_potential_growth(&c).unwrap();
        leaf.set_supply(Resource::DryMatter, &c).unwrap();
        let dm = leaf.set_demand(Resource::DryMatter, &c).unwrap();
        let err = leaf
            .set_allocation(
                Resource::DryMatter,
                &Allocation { structural: dm.structural * 1.5, ..Default::default() },
            )
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::MassBalance { .. }));
    }

    #[test]
    fn plant_ending_moves_everything_to_residue() {
        let (mut leaf, mut sink) = sown(vec![300.0]);
        appear(&mut leaf, 1, &mut sink);
        leaf.handle_event(&PlantEvent::Kill { fraction: 0.3 }, &mut sink).unwrap();
        let total = leaf.total();
        leaf.handle_event(&PlantEvent::PlantEnding, &mut sink).unwrap();
        assert_relative_eq!(sink.dry_matter_wt, total.wt(), epsilon = 1e-12);
        assert_relative_eq!(sink.nitrogen, total.n(), epsilon = 1e-12);
        assert_eq!(leaf.stage(), OrganStage::Ended);
        assert_eq!(leaf.live(), BiomassPool::ZERO);
    }

    #[test]
    fn kill_fraction_out_of_range_is_rejected() {
        let (mut leaf, mut sink) = sown(vec![]);
        assert!(leaf.handle_event(&PlantEvent::Kill { fraction: 1.5 }, &mut sink).is_err());
    }
}
