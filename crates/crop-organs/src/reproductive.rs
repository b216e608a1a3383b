//! Grain, pod or fruit: a structural-only sink that is filled and then
//! harvested.

use crate::arbitration::{Arbitratable, ArbitrationCore, Organ};
use crate::context::{DayContext, ResidueSink};
use crate::events::{OrganStage, PlantEvent};
use crate::function::{constant, BoxedFunction, DailyFunction};
use crop_core::{
    divide, non_negative, Allocation, ArbitrationError, BiomassPool, Demand, PotentialAllocation, Priorities,
    Resource, Supply,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReproductiveParameters {
    pub dm_conversion_efficiency: f64,
    pub carbon_concentration: f64,
    pub maximum_n_conc: f64,
    #[serde(default)]
    pub minimum_n_conc: f64,
    /// Phenological stage at which the organ is ready for harvest.
    pub ripe_stage: String,
    /// Water fraction of fresh weight, if fresh weight is reported.
    #[serde(default)]
    pub water_content: Option<f64>,
    #[serde(default)]
    pub priorities: Priorities,
}

impl ReproductiveParameters {
    pub fn validate(&self) -> Result<(), ArbitrationError> {
        if !(0.0..=1.0).contains(&self.dm_conversion_efficiency) {
            return Err(ArbitrationError::invalid("dm_conversion_efficiency", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.carbon_concentration) {
            return Err(ArbitrationError::invalid("carbon_concentration", "must be within [0, 1]"));
        }
        if !(0.0 <= self.minimum_n_conc && self.minimum_n_conc <= self.maximum_n_conc) {
            return Err(ArbitrationError::invalid("n_conc", "need 0 <= minimum <= maximum"));
        }
        if let Some(w) = self.water_content {
            if !(0.0..1.0).contains(&w) {
                return Err(ArbitrationError::invalid("water_content", "must be within [0, 1)"));
            }
        }
        Ok(())
    }
}

pub struct ReproductiveFunctions {
    /// Structural DM the organs could grow today.
    pub dm_demand: BoxedFunction,
    /// N the organs could take in today.
    pub n_filling_rate: BoxedFunction,
    /// Organs per m².
    pub number: BoxedFunction,
}

impl Default for ReproductiveFunctions {
    fn default() -> Self {
        ReproductiveFunctions {
            dm_demand: constant(0.0),
            n_filling_rate: constant(0.0),
            number: constant(0.0),
        }
    }
}

pub struct ReproductiveOrgan {
    core: ArbitrationCore,
    params: ReproductiveParameters,
    functions: ReproductiveFunctions,
    live: BiomassPool,
    dead: BiomassPool,
    stage: OrganStage,
    number: f64,
    ready_for_harvest: bool,
}

impl ReproductiveOrgan {
    pub fn new(
        name: impl Into<String>,
        params: ReproductiveParameters,
        functions: ReproductiveFunctions,
    ) -> Result<Self, ArbitrationError> {
        params.validate()?;
        Ok(ReproductiveOrgan {
            core: ArbitrationCore::new(name),
            params,
            functions,
            live: BiomassPool::ZERO,
            dead: BiomassPool::ZERO,
            stage: OrganStage::Uninitialised,
            number: 0.0,
            ready_for_harvest: false,
        })
    }

    pub fn number(&self) -> f64 {
        self.number
    }

    pub fn ready_for_harvest(&self) -> bool {
        self.ready_for_harvest
    }

    /// Live fresh weight, or dry weight when no water content is set.
    pub fn live_fresh_wt(&self) -> f64 {
        match self.params.water_content {
            Some(w) => self.live.wt() / (1.0 - w),
            None => self.live.wt(),
        }
    }

    /// Mean dry weight of one organ (g).
    pub fn size(&self) -> f64 {
        divide(self.live.wt(), self.number, 0.0)
    }

    /// Mean fresh weight of one organ (g).
    pub fn fresh_size(&self) -> f64 {
        divide(self.live_fresh_wt(), self.number, 0.0)
    }

    fn clear(&mut self) {
        self.live.clear();
        self.dead.clear();
        self.number = 0.0;
        self.ready_for_harvest = false;
    }
}

impl Arbitratable for ReproductiveOrgan {
    fn core(&self) -> &ArbitrationCore {
        &self.core
    }

    fn set_supply(&mut self, kind: Resource, _ctx: &DayContext) -> Result<Supply, ArbitrationError> {
        self.core.record_supply(kind, Supply::default())
    }

    fn set_demand(&mut self, kind: Resource, ctx: &DayContext) -> Result<Demand, ArbitrationError> {
        let mut demand = Demand::default();
        if self.stage.is_alive() {
            match kind {
                Resource::DryMatter => {
                    let eff = self.params.dm_conversion_efficiency;
                    demand.structural = divide(self.functions.dm_demand.value(ctx), eff, 0.0);
                    demand.priorities = self.params.priorities;
                }
                Resource::Nitrogen => {
                    let potential = self.core.potential().unwrap_or_default();
                    let grown = potential.structural * self.params.dm_conversion_efficiency;
                    demand.structural = self
                        .functions
                        .n_filling_rate
                        .value(ctx)
                        .min(self.params.maximum_n_conc * grown);
                }
            }
        }
        self.core.record_demand(kind, demand)
    }

    fn set_potential_allocation(&mut self, potential: PotentialAllocation) -> Result<(), ArbitrationError> {
        self.core.record_potential(potential).map(|_| ())
    }

    fn set_allocation(&mut self, kind: Resource, allocation: &Allocation) -> Result<(), ArbitrationError> {
        let a = self.core.accept_allocation(kind, allocation)?;
        if a.metabolic > 0.0 || a.storage > 0.0 || a.reallocation > 0.0 || a.retranslocation > 0.0 {
            return Err(ArbitrationError::mass_balance(
                self.core.name(),
                format!("only structural {kind} can be allocated"),
            ));
        }
        match kind {
            Resource::DryMatter => {
                let start = self.live.wt();
                let eff = self.params.dm_conversion_efficiency;
                let grown = a.structural * eff;
                self.live.structural_wt += grown;
                self.core.flows.allocated.structural_wt += grown;
                self.core
                    .record_growth_respiration(grown, eff, self.params.carbon_concentration);
                self.core.check_balance(kind, start + grown, self.live.wt())
            }
            Resource::Nitrogen => {
                let start = self.live.n();
                self.live.structural_n += a.structural;
                self.core.flows.allocated.structural_n += a.structural;
                self.core.check_balance(kind, start + a.structural, self.live.n())
            }
        }
    }

    fn live(&self) -> BiomassPool {
        self.live
    }

    fn dead(&self) -> BiomassPool {
        self.dead
    }
}

impl Organ for ReproductiveOrgan {
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
        self.number = non_negative(self.core.name(), "organ number", self.functions.number.value(ctx))?;
        Ok(())
    }

    fn do_actual_growth(&mut self, _ctx: &DayContext, _residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        Ok(())
    }

    fn handle_event(&mut self, event: &PlantEvent, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        match event {
            PlantEvent::Sowing(_) => {
                self.clear();
                self.stage = OrganStage::Sown;
            }
            PlantEvent::StageStarted { stage } if *stage == self.params.ripe_stage => {
                self.ready_for_harvest = true;
                info!(organ = self.core.name(), stage = %stage, "ready for harvest");
            }
            PlantEvent::Harvest(removal) => {
                let taken = removal.apply(&mut self.live, &mut self.dead, residue)?;
                self.core.flows.removed.add(&taken);
                info!(organ = self.core.name(), dm = taken.wt(), "harvested");
            }
            PlantEvent::PlantEnding => {
                let total = self.total();
                if total.wt() > 0.0 {
                    self.core.flows.detached.add(&total);
                    residue.add_residue(total.wt(), total.n());
                }
                self.clear();
                self.stage = OrganStage::Ended;
            }
            _ => {}
        }
        Ok(())
    }
}
