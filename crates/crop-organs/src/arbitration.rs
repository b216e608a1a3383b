//! The organ side of the daily arbitration protocol.
//!
//! Every organ composes an [`ArbitrationCore`] that holds the day's supply,
//! demand and potential-allocation records and performs the checks shared by
//! all organ types. Organs expose the protocol through [`Arbitratable`] and
//! their growth and event handling through [`Organ`].
//!
//! A day runs in this order, across all organs before any moves on:
//! 1. [`Organ::begin_day`] and [`Organ::do_potential_growth`]
//! 2. [`Arbitratable::set_supply`] for DM and N
//! 3. [`Arbitratable::set_demand`] for DM
//! 4. [`Arbitratable::set_potential_allocation`]
//! 5. [`Arbitratable::set_demand`] for N (sized off the potential DM)
//! 6. [`Arbitratable::set_allocation`] for DM, then N
//! 7. [`Organ::do_actual_growth`]

use crate::context::{DayContext, ResidueSink};
use crate::events::{OrganStage, PlantEvent};
use crop_core::{
    balance_tolerance, Allocation, ArbitrationError, BiomassPool, Demand, Phase,
    PotentialAllocation, Resource, Supply, BIOMASS_TOLERANCE,
};
use serde::{Deserialize, Serialize};

/// CO2 released per unit of DM grown:
/// `((1/efficiency) * 12/30 - carbon_concentration) * 44/12`.
pub fn growth_respiration_factor(dm_conversion_efficiency: f64, carbon_concentration: f64) -> f64 {
    ((1.0 / dm_conversion_efficiency) * (12.0 / 30.0) - carbon_concentration) * 44.0 / 12.0
}

/// Biomass moved by an organ during one day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyFlows {
    pub allocated: BiomassPool,
    pub senesced: BiomassPool,
    pub detached: BiomassPool,
    pub removed: BiomassPool,
    /// CO2 (g/m²).
    pub growth_respiration: f64,
    /// DM (g/m²).
    pub maintenance_respiration: f64,
}

/// Shared protocol state for one organ.
#[derive(Clone, Debug)]
pub struct ArbitrationCore {
    name: String,
    dm_supply: Option<Supply>,
    n_supply: Option<Supply>,
    dm_demand: Option<Demand>,
    n_demand: Option<Demand>,
    potential: Option<PotentialAllocation>,
    pub flows: DailyFlows,
}

impl ArbitrationCore {
    pub fn new(name: impl Into<String>) -> Self {
        ArbitrationCore {
            name: name.into(),
            dm_supply: None,
            n_supply: None,
            dm_demand: None,
            n_demand: None,
            potential: None,
            flows: DailyFlows::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forget yesterday's records and flows.
    pub fn begin_day(&mut self) {
        self.dm_supply = None;
        self.n_supply = None;
        self.dm_demand = None;
        self.n_demand = None;
        self.potential = None;
        self.flows = DailyFlows::default();
    }

    fn order_error(&self, phase: Phase, missing: Phase) -> ArbitrationError {
        ArbitrationError::ProtocolOrder {
            owner: self.name.clone(),
            phase,
            missing,
        }
    }

    pub fn record_supply(&mut self, kind: Resource, supply: Supply) -> Result<Supply, ArbitrationError> {
        let supply = supply.validated(&self.name)?;
        match kind {
            Resource::DryMatter => self.dm_supply = Some(supply),
            Resource::Nitrogen => self.n_supply = Some(supply),
        }
        Ok(supply)
    }

    /// Store today's demand. Supply must already be set, and N demand also
    /// needs the potential DM allocation.
    pub fn record_demand(&mut self, kind: Resource, demand: Demand) -> Result<Demand, ArbitrationError> {
        self.supply_for(kind, Phase::Demand)?;
        if kind == Resource::Nitrogen && self.potential.is_none() {
            return Err(self.order_error(Phase::Demand, Phase::PotentialAllocation));
        }
        let demand = demand.validated(&self.name)?;
        match kind {
            Resource::DryMatter => self.dm_demand = Some(demand),
            Resource::Nitrogen => self.n_demand = Some(demand),
        }
        Ok(demand)
    }

    fn supply_for(&self, kind: Resource, reader: Phase) -> Result<Supply, ArbitrationError> {
        let supply = match kind {
            Resource::DryMatter => self.dm_supply,
            Resource::Nitrogen => self.n_supply,
        };
        supply.ok_or_else(|| self.order_error(reader, Phase::Supply))
    }

    fn demand_for(&self, kind: Resource, reader: Phase) -> Result<Demand, ArbitrationError> {
        let demand = match kind {
            Resource::DryMatter => self.dm_demand,
            Resource::Nitrogen => self.n_demand,
        };
        demand.ok_or_else(|| self.order_error(reader, Phase::Demand))
    }

    pub fn supply(&self, kind: Resource) -> Result<Supply, ArbitrationError> {
        self.supply_for(kind, Phase::PotentialAllocation)
    }

    pub fn demand(&self, kind: Resource) -> Result<Demand, ArbitrationError> {
        self.demand_for(kind, Phase::PotentialAllocation)
    }

    pub fn potential(&self) -> Option<PotentialAllocation> {
        self.potential
    }

    /// Store the tentative DM grant; each leg must fit within DM demand.
    pub fn record_potential(&mut self, potential: PotentialAllocation) -> Result<PotentialAllocation, ArbitrationError> {
        let demand = self.demand_for(Resource::DryMatter, Phase::PotentialAllocation)?;
        let potential = PotentialAllocation {
            structural: crop_core::non_negative(&self.name, "potential structural", potential.structural)?,
            metabolic: crop_core::non_negative(&self.name, "potential metabolic", potential.metabolic)?,
            storage: crop_core::non_negative(&self.name, "potential storage", potential.storage)?,
        };
        self.within_demand("potential structural", potential.structural, demand.structural)?;
        self.within_demand("potential metabolic", potential.metabolic, demand.metabolic)?;
        self.within_demand("potential storage", potential.storage, demand.storage)?;
        self.potential = Some(potential);
        Ok(potential)
    }

    fn within_demand(&self, leg: &str, granted: f64, demand: f64) -> Result<(), ArbitrationError> {
        if granted - demand > balance_tolerance(demand).max(BIOMASS_TOLERANCE) {
            return Err(ArbitrationError::mass_balance(
                &self.name,
                format!("{leg} of {granted} exceeds demand of {demand}"),
            ));
        }
        Ok(())
    }

    /// Validate a final grant against today's records and return a clean copy.
    ///
    /// Fresh legs may not exceed demand, and the amounts withdrawn by
    /// reallocation and retranslocation may not exceed what was offered.
    pub fn accept_allocation(&self, kind: Resource, allocation: &Allocation) -> Result<Allocation, ArbitrationError> {
        let demand = self.demand_for(kind, Phase::Allocation)?;
        let supply = self.supply_for(kind, Phase::Allocation)?;
        let a = allocation.validated(&self.name)?;
        self.within_demand("structural allocation", a.structural, demand.structural)?;
        self.within_demand("metabolic allocation", a.metabolic, demand.metabolic)?;
        self.within_demand("storage allocation", a.storage, demand.storage)?;
        if a.reallocation - supply.reallocation > balance_tolerance(supply.reallocation) {
            return Err(ArbitrationError::mass_balance(
                &self.name,
                format!(
                    "cannot supply {} {kind} by reallocation, offered {}",
                    a.reallocation, supply.reallocation
                ),
            ));
        }
        if a.retranslocation - supply.retranslocation > balance_tolerance(supply.retranslocation) {
            return Err(ArbitrationError::mass_balance(
                &self.name,
                format!(
                    "cannot supply {} {kind} by retranslocation, offered {}",
                    a.retranslocation, supply.retranslocation
                ),
            ));
        }
        Ok(a)
    }

    /// Add growth respiration for `grown_dm` of new tissue.
    pub fn record_growth_respiration(&mut self, grown_dm: f64, dm_conversion_efficiency: f64, carbon_concentration: f64) {
        if grown_dm > 0.0 && dm_conversion_efficiency > 0.0 {
            self.flows.growth_respiration +=
                grown_dm * growth_respiration_factor(dm_conversion_efficiency, carbon_concentration);
        }
    }

    /// Compare a pool total after allocation with its conservation equation.
    pub fn check_balance(&self, kind: Resource, expected: f64, actual: f64) -> Result<(), ArbitrationError> {
        let error = (actual - expected).abs();
        if error > balance_tolerance(expected) {
            return Err(ArbitrationError::mass_balance(
                &self.name,
                format!("{error} of {kind} allocation unaccounted for (expected {expected}, found {actual})"),
            ));
        }
        Ok(())
    }
}

/// The protocol every organ honours for the whole-plant arbitrator.
pub trait Arbitratable {
    fn core(&self) -> &ArbitrationCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    /// Phase 1: compute and expose today's supply.
    fn set_supply(&mut self, kind: Resource, ctx: &DayContext) -> Result<Supply, ArbitrationError>;

    /// Phase 2: compute and expose today's demand.
    fn set_demand(&mut self, kind: Resource, ctx: &DayContext) -> Result<Demand, ArbitrationError>;

    fn supply(&self, kind: Resource) -> Result<Supply, ArbitrationError> {
        self.core().supply(kind)
    }

    fn demand(&self, kind: Resource) -> Result<Demand, ArbitrationError> {
        self.core().demand(kind)
    }

    /// Phase 3: tentative DM grant.
    fn set_potential_allocation(&mut self, potential: PotentialAllocation) -> Result<(), ArbitrationError>;

    /// Phase 4: final grant, ending with a mass-balance check.
    fn set_allocation(&mut self, kind: Resource, allocation: &Allocation) -> Result<(), ArbitrationError>;

    /// Snapshot of the live pool.
    fn live(&self) -> BiomassPool;

    /// Snapshot of the dead pool.
    fn dead(&self) -> BiomassPool;

    fn total(&self) -> BiomassPool {
        let mut total = self.live();
        total.add(&self.dead());
        total
    }

    /// DM respired per unit of N fixed; only nodules fix.
    fn n_fixation_cost(&self) -> f64 {
        0.0
    }
}

/// Growth and lifecycle hooks driven by the scheduler.
pub trait Organ: Arbitratable {
    fn stage(&self) -> OrganStage;

    /// Clear yesterday's protocol records and flows.
    fn begin_day(&mut self);

    /// Snapshot start-of-day state and compute today's potentials.
    fn do_potential_growth(&mut self, ctx: &DayContext) -> Result<(), ArbitrationError>;

    /// Age, senesce, detach and respire after allocation.
    fn do_actual_growth(&mut self, ctx: &DayContext, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError>;

    fn handle_event(&mut self, event: &PlantEvent, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError>;

    fn flows(&self) -> DailyFlows {
        self.core().flows
    }

    /// Fraction of ground covered by green canopy; only leaves have one.
    fn canopy_cover(&self) -> f64 {
        0.0
    }
}
