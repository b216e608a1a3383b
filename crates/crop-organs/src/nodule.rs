//! N-fixing nodules. Fixation is offered as N supply and costs DM, which the
//! arbitrator charges through [`Allocation::respired`].

use crate::arbitration::{Arbitratable, ArbitrationCore, Organ};
use crate::context::{DayContext, ResidueSink};
use crate::events::{OrganStage, PlantEvent};
use crate::function::{BoxedFunction, DailyFunction};
use crate::generic::{GenericOrgan, GenericOrganFunctions, GenericOrganParameters};
use crate::retranslocation::StorageThenMetabolic;
use crop_core::{
    balance_tolerance, non_negative, Allocation, ArbitrationError, BiomassPool, Demand, PotentialAllocation,
    Resource, Supply,
};

pub struct Nodule {
    organ: GenericOrgan,
    fixation_rate: BoxedFunction,
    /// g DM per g N fixed.
    fixation_cost: BoxedFunction,
    cost_today: f64,
    respired_wt: f64,
    n_fixed: f64,
}

impl Nodule {
    pub fn new(
        params: GenericOrganParameters,
        functions: GenericOrganFunctions,
        fixation_rate: BoxedFunction,
        fixation_cost: BoxedFunction,
    ) -> Result<Self, ArbitrationError> {
        Ok(Nodule {
            organ: GenericOrgan::with_strategy("Nodule", params, functions, Box::new(StorageThenMetabolic))?,
            fixation_rate,
            fixation_cost,
            cost_today: 0.0,
            respired_wt: 0.0,
            n_fixed: 0.0,
        })
    }

    /// DM respired today to pay for fixation.
    pub fn respired_wt(&self) -> f64 {
        self.respired_wt
    }

    pub fn n_fixed(&self) -> f64 {
        self.n_fixed
    }
}

impl Arbitratable for Nodule {
    fn core(&self) -> &ArbitrationCore {
        self.organ.core()
    }

    fn set_supply(&mut self, kind: Resource, ctx: &DayContext) -> Result<Supply, ArbitrationError> {
        let mut supply = self.organ.compute_supply(kind, ctx)?;
        match kind {
            Resource::DryMatter => supply.fixation = 0.0,
            Resource::Nitrogen if self.organ.stage().is_alive() => {
                supply.fixation = non_negative("Nodule", "N fixation supply", self.fixation_rate.value(ctx))?;
            }
            Resource::Nitrogen => {}
        }
        self.organ.core_mut().record_supply(kind, supply)
    }

    fn set_demand(&mut self, kind: Resource, ctx: &DayContext) -> Result<Demand, ArbitrationError> {
        self.organ.set_demand(kind, ctx)
    }

    fn set_potential_allocation(&mut self, potential: PotentialAllocation) -> Result<(), ArbitrationError> {
        self.organ.set_potential_allocation(potential)
    }

    fn set_allocation(&mut self, kind: Resource, allocation: &Allocation) -> Result<(), ArbitrationError> {
        match kind {
            Resource::DryMatter => {
                let respired = non_negative("Nodule", "respired DM", allocation.respired)?;
                self.organ.set_allocation(kind, allocation)?;
                self.respired_wt = respired;
            }
            Resource::Nitrogen => {
                let offered = self.organ.supply(kind)?.fixation;
                if allocation.fixation - offered > balance_tolerance(offered) {
                    return Err(ArbitrationError::mass_balance(
                        "Nodule",
                        format!("fixation of {} exceeds the {offered} offered", allocation.fixation),
                    ));
                }
                let fixed = non_negative("Nodule", "N fixed", allocation.fixation)?;
                self.organ.set_allocation(kind, allocation)?;
                self.n_fixed = fixed;
            }
        }
        Ok(())
    }

    fn live(&self) -> BiomassPool {
        self.organ.live()
    }

    fn dead(&self) -> BiomassPool {
        self.organ.dead()
    }

    fn n_fixation_cost(&self) -> f64 {
        self.cost_today
    }
}

impl Organ for Nodule {
    fn stage(&self) -> OrganStage {
        self.organ.stage()
    }

    fn begin_day(&mut self) {
        self.organ.begin_day();
        self.respired_wt = 0.0;
        self.n_fixed = 0.0;
    }

    fn do_potential_growth(&mut self, ctx: &DayContext) -> Result<(), ArbitrationError> {
        self.cost_today = non_negative("Nodule", "N fixation cost", self.fixation_cost.value(ctx))?;
        self.organ.do_potential_growth(ctx)
    }

    fn do_actual_growth(&mut self, ctx: &DayContext, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        self.organ.do_actual_growth(ctx, residue)
    }

    fn handle_event(&mut self, event: &PlantEvent, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        self.organ.handle_event(event, residue)
    }
}
