//! Whole-plant arbitration: turning the organs' supplies and demands into
//! grants.
//!
//! The organ side of the protocol lives in `crop_organs::arbitration`. This
//! module supplies the other side. [`ProportionalArbitrator`] is a reference
//! implementation: it fills structural demand first, then metabolic, then
//! storage, sharing each leg across organs in proportion to demand, and draws
//! the granted amount from sources in the order reallocation, uptake,
//! fixation, retranslocation.

use crop_core::{
    divide, drain_in_order, proportional_split, Allocation, ArbitrationError, Demand, PotentialAllocation, Resource,
    Supply,
};
use crop_organs::{Arbitratable, Organ};

/// The plant side of the daily protocol.
///
/// The scheduler calls [`Arbitrator::potential_allocation`] once organs have
/// exposed supply and DM demand, then [`Arbitrator::allocation`] for DM and
/// for N once N demand is known. Returned vectors are indexed like `organs`.
pub trait Arbitrator {
    fn potential_allocation(
        &mut self,
        organs: &[Box<dyn Organ>],
    ) -> Result<Vec<PotentialAllocation>, ArbitrationError>;

    fn allocation(&mut self, kind: Resource, organs: &[Box<dyn Organ>]) -> Result<Vec<Allocation>, ArbitrationError>;
}

const OWNER: &str = "Arbitrator";

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProportionalArbitrator;

/// Fraction of each source total drawn today.
#[derive(Clone, Copy, Debug, Default)]
struct Drawn {
    reallocation: f64,
    uptake: f64,
    fixation: f64,
    retranslocation: f64,
}

impl Drawn {
    /// Take `amount` from the pooled sources in priority order.
    fn from_sources(amount: f64, totals: &Supply) -> Result<Drawn, ArbitrationError> {
        let ceilings = [
            totals.reallocation,
            totals.uptake,
            totals.fixation,
            totals.retranslocation,
        ];
        let taken = drain_in_order(OWNER, amount, &ceilings)?;
        Ok(Drawn {
            reallocation: divide(taken[0], ceilings[0], 0.0).min(1.0),
            uptake: divide(taken[1], ceilings[1], 0.0).min(1.0),
            fixation: divide(taken[2], ceilings[2], 0.0).min(1.0),
            retranslocation: divide(taken[3], ceilings[3], 0.0).min(1.0),
        })
    }

    fn grant(&self, supply: &Supply, legs: [f64; 3]) -> Allocation {
        Allocation {
            structural: legs[0],
            metabolic: legs[1],
            storage: legs[2],
            reallocation: supply.reallocation * self.reallocation,
            retranslocation: supply.retranslocation * self.retranslocation,
            uptake: supply.uptake * self.uptake,
            fixation: supply.fixation * self.fixation,
            respired: 0.0,
        }
    }
}

fn pooled(supplies: &[Supply]) -> Supply {
    supplies.iter().fold(Supply::default(), |acc, s| Supply {
        fixation: acc.fixation + s.fixation,
        uptake: acc.uptake + s.uptake,
        reallocation: acc.reallocation + s.reallocation,
        retranslocation: acc.retranslocation + s.retranslocation,
    })
}

/// Share `available` over structural, then metabolic, then storage demand.
fn fill_legs(available: f64, demands: &[Demand]) -> Result<Vec<[f64; 3]>, ArbitrationError> {
    let mut remaining = available.max(0.0);
    let mut legs = vec![[0.0; 3]; demands.len()];
    for leg in 0..3 {
        let wanted: Vec<f64> = demands
            .iter()
            .map(|d| match leg {
                0 => d.structural,
                1 => d.metabolic,
                _ => d.storage,
            })
            .collect();
        let total: f64 = wanted.iter().sum();
        let grant = remaining.min(total);
        let shares = proportional_split(OWNER, grant, &wanted)?;
        for (organ, share) in shares.into_iter().enumerate() {
            legs[organ][leg] = share;
        }
        remaining = (remaining - grant).max(0.0);
    }
    Ok(legs)
}

fn collect<T>(
    organs: &[Box<dyn Organ>],
    read: impl Fn(&dyn Organ) -> Result<T, ArbitrationError>,
) -> Result<Vec<T>, ArbitrationError> {
    organs.iter().map(|o| read(o.as_ref())).collect()
}

impl ProportionalArbitrator {
    /// N grants, with the DM each nodule must respire to pay for fixation.
    ///
    /// Fixation is scaled back when the day's DM supply cannot pay for it.
    fn nitrogen(&self, organs: &[Box<dyn Organ>]) -> Result<Vec<Allocation>, ArbitrationError> {
        let dm_budget = pooled(&collect(organs, |o| o.supply(Resource::DryMatter))?).total();
        let mut supplies = collect(organs, |o| o.supply(Resource::Nitrogen))?;
        let demands = collect(organs, |o| o.demand(Resource::Nitrogen))?;
        let costs: Vec<f64> = organs.iter().map(|o| o.n_fixation_cost().max(0.0)).collect();

        let full_cost: f64 = supplies.iter().zip(&costs).map(|(s, c)| s.fixation * c).sum();
        let affordable = if full_cost > dm_budget { divide(dm_budget, full_cost, 0.0) } else { 1.0 };
        for supply in supplies.iter_mut() {
            supply.fixation *= affordable;
        }

        let totals = pooled(&supplies);
        let legs = fill_legs(totals.total(), &demands)?;
        let granted: f64 = legs.iter().flatten().sum();
        let drawn = Drawn::from_sources(granted, &totals)?;
        Ok(supplies
            .iter()
            .zip(legs)
            .zip(&costs)
            .map(|((supply, legs), cost)| {
                let mut a = drawn.grant(supply, legs);
                a.respired = a.fixation * cost;
                a
            })
            .collect())
    }

    fn dry_matter(&self, organs: &[Box<dyn Organ>]) -> Result<Vec<Allocation>, ArbitrationError> {
        let respired: Vec<f64> = self.nitrogen(organs)?.iter().map(|a| a.respired).collect();
        let respired_total: f64 = respired.iter().sum();
        let supplies = collect(organs, |o| o.supply(Resource::DryMatter))?;
        let demands = collect(organs, |o| o.demand(Resource::DryMatter))?;
        let totals = pooled(&supplies);
        let legs = fill_legs(totals.total() - respired_total, &demands)?;
        let granted: f64 = legs.iter().flatten().sum();
        let drawn = Drawn::from_sources((granted + respired_total).min(totals.total()), &totals)?;
        Ok(supplies
            .iter()
            .zip(legs)
            .zip(respired)
            .map(|((supply, legs), respired)| Allocation {
                respired,
                ..drawn.grant(supply, legs)
            })
            .collect())
    }
}

impl Arbitrator for ProportionalArbitrator {
    fn potential_allocation(
        &mut self,
        organs: &[Box<dyn Organ>],
    ) -> Result<Vec<PotentialAllocation>, ArbitrationError> {
        let supplies = collect(organs, |o| o.supply(Resource::DryMatter))?;
        let demands = collect(organs, |o| o.demand(Resource::DryMatter))?;
        let legs = fill_legs(pooled(&supplies).total(), &demands)?;
        Ok(legs
            .into_iter()
            .map(|[structural, metabolic, storage]| PotentialAllocation {
                structural,
                metabolic,
                storage,
            })
            .collect())
    }

    fn allocation(&mut self, kind: Resource, organs: &[Box<dyn Organ>]) -> Result<Vec<Allocation>, ArbitrationError> {
        match kind {
            Resource::DryMatter => self.dry_matter(organs),
            Resource::Nitrogen => self.nitrogen(organs),
        }
    }
}
