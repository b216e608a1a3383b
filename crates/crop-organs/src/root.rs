//! Below-ground organ. Offers soil N as uptake supply and reports the granted
//! uptake back to whoever owns the soil.

use crate::arbitration::{Arbitratable, ArbitrationCore, Organ};
use crate::context::{DayContext, ResidueSink};
use crate::events::{OrganStage, PlantEvent};
use crate::function::{BoxedFunction, DailyFunction};
use crate::generic::{GenericOrgan, GenericOrganFunctions, GenericOrganParameters};
use crop_core::{
    balance_tolerance, non_negative, Allocation, ArbitrationError, BiomassPool, Demand, PotentialAllocation,
    Resource, Supply,
};

pub struct Root {
    organ: GenericOrgan,
    n_uptake: BoxedFunction,
    uptake_granted: f64,
}

impl Root {
    /// A root taking up whatever the soil reports as available.
    pub fn new(params: GenericOrganParameters, functions: GenericOrganFunctions) -> Result<Self, ArbitrationError> {
        Root::with_uptake(params, functions, Box::new(|ctx: &DayContext| ctx.soil_n_available))
    }

    pub fn with_uptake(
        params: GenericOrganParameters,
        mut functions: GenericOrganFunctions,
        n_uptake: BoxedFunction,
    ) -> Result<Self, ArbitrationError> {
        functions.photosynthesis = crate::function::constant(0.0);
        Ok(Root {
            organ: GenericOrgan::new("Root", params, functions)?,
            n_uptake,
            uptake_granted: 0.0,
        })
    }

    /// N taken from the soil today (g/m²).
    pub fn uptake_granted(&self) -> f64 {
        self.uptake_granted
    }
}

impl Arbitratable for Root {
    fn core(&self) -> &ArbitrationCore {
        self.organ.core()
    }

    fn set_supply(&mut self, kind: Resource, ctx: &DayContext) -> Result<Supply, ArbitrationError> {
        let mut supply = self.organ.compute_supply(kind, ctx)?;
        if kind == Resource::Nitrogen && self.organ.stage().is_alive() {
            supply.uptake = non_negative("Root", "N uptake supply", self.n_uptake.value(ctx))?;
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
        if kind == Resource::Nitrogen {
            let offered = self.organ.supply(kind)?.uptake;
            if allocation.uptake - offered > balance_tolerance(offered) {
                return Err(ArbitrationError::mass_balance(
                    "Root",
                    format!("uptake of {} exceeds the {offered} available", allocation.uptake),
                ));
            }
            self.uptake_granted = non_negative("Root", "N uptake", allocation.uptake)?;
        }
        self.organ.set_allocation(kind, allocation)
    }

    fn live(&self) -> BiomassPool {
        self.organ.live()
    }

    fn dead(&self) -> BiomassPool {
        self.organ.dead()
    }
}

impl Organ for Root {
    fn stage(&self) -> OrganStage {
        self.organ.stage()
    }

    fn begin_day(&mut self) {
        self.organ.begin_day();
        self.uptake_granted = 0.0;
    }

    fn do_potential_growth(&mut self, ctx: &DayContext) -> Result<(), ArbitrationError> {
        self.organ.do_potential_growth(ctx)
    }

    fn do_actual_growth(&mut self, ctx: &DayContext, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        self.organ.do_actual_growth(ctx, residue)
    }

    fn handle_event(&mut self, event: &PlantEvent, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        self.organ.handle_event(event, residue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ResidueLedger;
    use crate::function::constant;
    use crate::generic::tests::{ctx, sow, stem_params};

    fn root() -> Root {
        Root::new(
            stem_params(),
            GenericOrganFunctions { structural_dm_demand: constant(1.0), ..Default::default() },
        )
        .unwrap()
    }

    #[test]
    fn uptake_supply_follows_soil_availability() {
        let mut root = root();
        let mut sink = ResidueLedger::default();
        sow(&mut root, &mut sink);
        let mut c = ctx();
        c.soil_n_available = 0.8;
        c.photosynthesis = 10.0;
        root.begin_day();
        root.do_potential_growth(&c).unwrap();
        let dm = root.set_supply(Resource::DryMatter, &c).unwrap();
        let n = root.set_supply(Resource::Nitrogen, &c).unwrap();
        assert_eq!(dm.fixation, 0.0);
        assert_eq!(n.uptake, 0.8);
    }

    #[test]
    fn granted_uptake_is_reported_and_bounded() {
        let mut root = root();
        let mut sink = ResidueLedger::default();
        sow(&mut root, &mut sink);
        let mut c = ctx();
        c.soil_n_available = 0.5;
        root.begin_day();
        root.do_potential_growth(&c).unwrap();
        root.set_supply(Resource::DryMatter, &c).unwrap();
        root.set_supply(Resource::Nitrogen, &c).unwrap();
        let dm = root.set_demand(Resource::DryMatter, &c).unwrap();
        root.set_potential_allocation(PotentialAllocation { structural: dm.structural, ..Default::default() })
            .unwrap();
        let n = root.set_demand(Resource::Nitrogen, &c).unwrap();
        let too_much = Allocation { structural: n.structural, uptake: 0.6, ..Default::default() };
        assert!(matches!(
            root.set_allocation(Resource::Nitrogen, &too_much),
            Err(ArbitrationError::MassBalance { .. })
        ));
        let grant = Allocation { structural: n.structural, uptake: n.structural, ..Default::default() };
        root.set_allocation(Resource::Nitrogen, &grant).unwrap();
        assert_eq!(root.uptake_granted(), n.structural);
    }
}
