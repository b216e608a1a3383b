//! The day loop.
//!
//! Each phase is applied to every organ before the next one starts:
//!
//! 1. `begin_day`, plant events, `do_potential_growth`
//! 2. DM and N supply
//! 3. DM demand
//! 4. potential DM allocation
//! 5. N demand (sized off the potential allocation)
//! 6. DM allocation, then N allocation
//! 7. `do_actual_growth`

use crate::arbitrator::{Arbitrator, ProportionalArbitrator};
use crate::plant::{OrganSnapshot, Plant};
use crate::RunError;
use chrono::NaiveDate;
use crop_core::{balance_tolerance, Allocation, ArbitrationError, BiomassPool, Resource};
use crop_organs::{Arbitratable, DayContext, Organ, PlantEvent, ResidueLedger};
use serde::Serialize;
use tracing::{debug, info_span, warn};

/// What the outside world hands the plant on a given day.
#[derive(Clone, Debug)]
pub struct Today {
    pub ctx: DayContext,
    pub events: Vec<PlantEvent>,
}

/// Source of daily drivers. It sees the plant as it stood at the end of the
/// previous day, so canopy feedbacks such as light interception can be
/// computed.
pub trait DailyDrivers {
    fn today(&mut self, day: u32, plant: &Plant) -> Result<Today, RunError>;
}

#[derive(Clone, Debug, Serialize)]
pub struct DaySummary {
    pub day: u32,
    pub date: NaiveDate,
    pub thermal_time: f64,
    /// DM fixed by the canopy and granted to organs (g/m²).
    pub dm_fixed: f64,
    pub n_uptake: f64,
    pub n_fixed: f64,
    pub canopy_cover: f64,
    pub live: BiomassPool,
    pub dead: BiomassPool,
    /// CO2 (g/m²).
    pub growth_respiration: f64,
    pub residue: ResidueLedger,
    /// Plant N unaccounted for by uptake, fixation and residue (g/m²).
    pub n_balance_error: f64,
    pub organs: Vec<OrganSnapshot>,
}

pub struct DailyScheduler<A = ProportionalArbitrator> {
    plant: Plant,
    arbitrator: A,
    residue: ResidueLedger,
    day: u32,
}

impl DailyScheduler<ProportionalArbitrator> {
    pub fn new(plant: Plant) -> Self {
        DailyScheduler::with_arbitrator(plant, ProportionalArbitrator)
    }
}

impl<A: Arbitrator> DailyScheduler<A> {
    pub fn with_arbitrator(plant: Plant, arbitrator: A) -> Self {
        DailyScheduler {
            plant,
            arbitrator,
            residue: ResidueLedger::default(),
            day: 0,
        }
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn residue(&self) -> ResidueLedger {
        self.residue
    }

    /// Days stepped so far.
    pub fn day(&self) -> u32 {
        self.day
    }

    /// Run one day. Any organ error aborts the day and is returned with its date.
    pub fn step(&mut self, ctx: &DayContext, events: &[PlantEvent]) -> Result<DaySummary, RunError> {
        let span = info_span!("day", day = self.day, date = %ctx.date);
        let _enter = span.enter();
        let summary = self.advance(ctx, events).map_err(|source| RunError::Day {
            date: ctx.date,
            source,
        })?;
        self.day += 1;
        Ok(summary)
    }

    /// Step `days` days, pulling drivers for each.
    pub fn run(&mut self, drivers: &mut impl DailyDrivers, days: u32) -> Result<Vec<DaySummary>, RunError> {
        let mut out = Vec::with_capacity(days as usize);
        for _ in 0..days {
            let today = drivers.today(self.day, &self.plant)?;
            out.push(self.step(&today.ctx, &today.events)?);
        }
        Ok(out)
    }

    fn advance(&mut self, ctx: &DayContext, events: &[PlantEvent]) -> Result<DaySummary, ArbitrationError> {
        for organ in self.plant.organs_mut() {
            organ.begin_day();
        }
        for event in events {
            debug!(?event, "plant event");
            self.plant.handle_event(event, &mut self.residue)?;
        }
        let n_start = self.plant.total().n();
        let residue_n_start = self.residue.nitrogen;

        for organ in self.plant.organs_mut() {
            organ.do_potential_growth(ctx)?;
        }
        for kind in [Resource::DryMatter, Resource::Nitrogen] {
            for organ in self.plant.organs_mut() {
                organ.set_supply(kind, ctx)?;
            }
        }
        for organ in self.plant.organs_mut() {
            organ.set_demand(Resource::DryMatter, ctx)?;
        }

        let potentials = self.arbitrator.potential_allocation(self.plant.organs())?;
        check_len(potentials.len(), self.plant.organs().len())?;
        for (organ, potential) in self.plant.organs_mut().iter_mut().zip(potentials) {
            organ.set_potential_allocation(potential)?;
        }
        for organ in self.plant.organs_mut() {
            organ.set_demand(Resource::Nitrogen, ctx)?;
        }

        let dm = self.allocate(Resource::DryMatter)?;
        let n = self.allocate(Resource::Nitrogen)?;

        for organ in self.plant.organs_mut() {
            organ.do_actual_growth(ctx, &mut self.residue)?;
        }

        let n_uptake: f64 = n.iter().map(|a| a.uptake).sum();
        let n_fixed: f64 = n.iter().map(|a| a.fixation).sum();
        let n_end = self.plant.total().n();
        let n_expected = n_start + n_uptake + n_fixed - (self.residue.nitrogen - residue_n_start);
        let n_balance_error = n_end - n_expected;
        if n_balance_error.abs() > balance_tolerance(n_expected) {
            warn!(n_balance_error, "plant N does not balance");
        }

        Ok(DaySummary {
            day: self.day,
            date: ctx.date,
            thermal_time: ctx.thermal_time,
            dm_fixed: dm.iter().map(|a| a.fixation).sum(),
            n_uptake,
            n_fixed,
            canopy_cover: self.plant.canopy_cover(),
            live: self.plant.live(),
            dead: self.plant.dead(),
            growth_respiration: self.plant.organs().iter().map(|o| o.flows().growth_respiration).sum(),
            residue: self.residue,
            n_balance_error,
            organs: self.plant.snapshot(),
        })
    }

    fn allocate(&mut self, kind: Resource) -> Result<Vec<Allocation>, ArbitrationError> {
        let grants = self.arbitrator.allocation(kind, self.plant.organs())?;
        check_len(grants.len(), self.plant.organs().len())?;
        for (organ, grant) in self.plant.organs_mut().iter_mut().zip(&grants) {
            organ.set_allocation(kind, grant)?;
        }
        Ok(grants)
    }
}

fn check_len(grants: usize, organs: usize) -> Result<(), ArbitrationError> {
    if grants != organs {
        return Err(ArbitrationError::mass_balance(
            "Arbitrator",
            format!("{grants} grants for {organs} organs"),
        ));
    }
    Ok(())
}
