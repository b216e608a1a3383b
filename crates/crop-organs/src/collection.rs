//! The ordered cohorts of one leaf organ.
//!
//! Aggregates (live, dead, LAI) are cached and recomputed on first read after
//! any mutation. Organ-level grants are fanned out with
//! [`proportional_split`] for fresh growth and [`drain_in_order`] for
//! withdrawals, both of which fail rather than lose mass.

use crate::cohort::{CohortDrivers, CohortGrowth, CohortPhase, LeafCohort, LeafCohortParameters};
use crate::context::ResidueSink;
use crate::events::{AppearanceParams, BiomassRemoval};
use crop_core::{divide, drain_in_order, proportional_split, Allocation, ArbitrationError, BiomassPool, Demand};
use std::cell::Cell;
use tracing::debug;

/// mm² of leaf per m² of ground.
const MM2_PER_M2: f64 = 1e6;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CohortTotals {
    pub live: BiomassPool,
    pub dead: BiomassPool,
    pub lai: f64,
    pub lai_dead: f64,
}

#[derive(Clone, Debug, Default)]
pub struct LeafCohorts {
    cohorts: Vec<LeafCohort>,
    dirty: Cell<bool>,
    totals: Cell<CohortTotals>,
}

impl LeafCohorts {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_dirty(&mut self) {
        self.dirty.set(true);
    }

    pub fn totals(&self) -> CohortTotals {
        if self.dirty.get() {
            let mut totals = CohortTotals::default();
            for cohort in &self.cohorts {
                totals.live.add(&cohort.live());
                totals.dead.add(&cohort.dead());
                totals.lai += cohort.live_area() / MM2_PER_M2;
                totals.lai_dead += cohort.dead_area() / MM2_PER_M2;
            }
            self.totals.set(totals);
            self.dirty.set(false);
        }
        self.totals.get()
    }

    pub fn live(&self) -> BiomassPool {
        self.totals().live
    }

    pub fn dead(&self) -> BiomassPool {
        self.totals().dead
    }

    pub fn lai(&self) -> f64 {
        self.totals().lai
    }

    pub fn lai_dead(&self) -> f64 {
        self.totals().lai_dead
    }

    /// Green N per unit green leaf area (g/m² leaf).
    pub fn specific_leaf_n(&self) -> f64 {
        let totals = self.totals();
        divide(totals.live.n(), totals.lai, 0.0)
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LeafCohort> {
        self.cohorts.iter()
    }

    pub fn by_rank(&self, rank: usize) -> Option<&LeafCohort> {
        self.cohorts.iter().find(|c| c.rank() == rank)
    }

    pub fn initialised_count(&self) -> usize {
        self.cohorts.iter().filter(|c| c.is_initialised()).count()
    }

    pub fn appeared_count(&self) -> usize {
        self.cohorts.iter().filter(|c| c.is_appeared()).count()
    }

    pub fn count_in(&self, phase: CohortPhase) -> usize {
        self.cohorts.iter().filter(|c| c.phase() == phase).count()
    }

    pub fn green_count(&self) -> usize {
        self.cohorts.iter().filter(|c| c.phase().is_green()).count()
    }

    pub fn clear(&mut self) {
        self.cohorts.clear();
        self.mark_dirty();
    }

    /// Replace the collection with initialised copies of `templates`.
    pub fn initialise_from(&mut self, templates: &[LeafCohort]) {
        self.cohorts = templates.iter().map(LeafCohort::initialised_copy).collect();
        self.mark_dirty();
    }

    pub fn push(&mut self, cohort: LeafCohort) {
        self.cohorts.push(cohort);
        self.mark_dirty();
    }

    pub fn appear(
        &mut self,
        appearance: &AppearanceParams,
        params: &LeafCohortParameters,
    ) -> Result<(), ArbitrationError> {
        let initialised = self.initialised_count();
        let cohort = self
            .cohorts
            .iter_mut()
            .find(|c| c.rank() == appearance.rank && c.is_initialised())
            .ok_or(ArbitrationError::CohortNotInitialised {
                rank: appearance.rank,
                initialised,
            })?;
        cohort.do_appearance(
            appearance.total_stem_population,
            appearance.final_fraction,
            appearance.cohort_age,
            params,
        )?;
        debug!(rank = appearance.rank, area = cohort.live_area(), "cohort appeared");
        self.mark_dirty();
        Ok(())
    }

    pub fn remove_lowest(&mut self) -> Option<LeafCohort> {
        if self.cohorts.is_empty() {
            return None;
        }
        self.mark_dirty();
        Some(self.cohorts.remove(0))
    }

    pub fn remove_highest(&mut self) -> Option<LeafCohort> {
        self.mark_dirty();
        self.cohorts.pop()
    }

    pub fn do_potential_growth(&mut self, drivers: &CohortDrivers) -> Result<(), ArbitrationError> {
        self.mark_dirty();
        for cohort in &mut self.cohorts {
            cohort.do_potential_growth(drivers)?;
        }
        Ok(())
    }

    pub fn dm_reallocation_supply(&self) -> f64 {
        self.cohorts.iter().map(LeafCohort::dm_reallocation_supply).sum()
    }

    pub fn dm_retranslocation_supply(&self) -> f64 {
        self.cohorts.iter().map(LeafCohort::dm_retranslocation_supply).sum()
    }

    pub fn n_reallocation_supply(&self) -> f64 {
        self.cohorts.iter().map(LeafCohort::n_reallocation_supply).sum()
    }

    pub fn n_retranslocation_supply(&self) -> f64 {
        self.cohorts.iter().map(|c| c.n_retranslocation_supply().max(0.0)).sum()
    }

    /// Sum of cohort DM demands, in the units the cohorts grow (after
    /// conversion losses).
    pub fn compute_dm_demand(&mut self) -> Result<Demand, ArbitrationError> {
        let mut total = Demand::default();
        for cohort in &mut self.cohorts {
            let d = cohort.compute_dm_demand()?;
            total.structural += d.structural;
            total.metabolic += d.metabolic;
            total.storage += d.storage;
        }
        Ok(total)
    }

    pub fn compute_n_demand(&mut self) -> Demand {
        let mut total = Demand::default();
        for cohort in &mut self.cohorts {
            let d = cohort.compute_n_demand();
            total.structural += d.structural;
            total.metabolic += d.metabolic;
            total.storage += d.storage;
        }
        total
    }

    fn legs(&self, demand: impl Fn(&LeafCohort) -> Demand) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let demands: Vec<Demand> = self.cohorts.iter().map(demand).collect();
        (
            demands.iter().map(|d| d.structural).collect(),
            demands.iter().map(|d| d.metabolic).collect(),
            demands.iter().map(|d| d.storage).collect(),
        )
    }

    /// Spread a tentative structural and metabolic DM grant across cohorts.
    pub fn set_potential_allocation(&mut self, structural: f64, metabolic: f64) -> Result<(), ArbitrationError> {
        let (s_demand, m_demand, _) = self.legs(LeafCohort::dm_demand);
        let s = proportional_split("leaf cohorts", structural, &s_demand)?;
        let m = proportional_split("leaf cohorts", metabolic, &m_demand)?;
        for ((cohort, s), m) in self.cohorts.iter_mut().zip(s).zip(m) {
            cohort.set_potential_allocation(s, m)?;
        }
        Ok(())
    }

    /// Fan a DM grant out to the cohorts. `grown` legs are already net of
    /// conversion losses.
    pub fn allocate_dm(&mut self, grown: &Allocation) -> Result<(), ArbitrationError> {
        let (s_demand, m_demand, st_demand) = self.legs(LeafCohort::dm_demand);
        let realloc: Vec<f64> = self.cohorts.iter().map(LeafCohort::dm_reallocation_supply).collect();
        let retrans: Vec<f64> = self.cohorts.iter().map(LeafCohort::dm_retranslocation_supply).collect();
        let shares = Shares::split(grown, &s_demand, &m_demand, &st_demand, &realloc, &retrans)?;
        self.mark_dirty();
        for (i, cohort) in self.cohorts.iter_mut().enumerate() {
            cohort.allocate_dm(&shares.get(i))?;
        }
        Ok(())
    }

    pub fn allocate_n(&mut self, allocation: &Allocation) -> Result<(), ArbitrationError> {
        let (s_demand, m_demand, st_demand) = self.legs(LeafCohort::n_demand);
        let realloc: Vec<f64> = self.cohorts.iter().map(LeafCohort::n_reallocation_supply).collect();
        let retrans: Vec<f64> = self
            .cohorts
            .iter()
            .map(|c| c.n_retranslocation_supply().max(0.0))
            .collect();
        let shares = Shares::split(allocation, &s_demand, &m_demand, &st_demand, &realloc, &retrans)?;
        self.mark_dirty();
        for (i, cohort) in self.cohorts.iter_mut().enumerate() {
            cohort.allocate_n(&shares.get(i))?;
        }
        Ok(())
    }

    /// Grow every cohort and drop any that fully detached; whatever they
    /// still hold goes to residue.
    pub fn do_actual_growth(
        &mut self,
        drivers: &CohortDrivers,
        residue: &mut dyn ResidueSink,
    ) -> Result<CohortGrowth, ArbitrationError> {
        self.mark_dirty();
        let mut total = CohortGrowth::default();
        for cohort in &mut self.cohorts {
            let g = cohort.do_actual_growth(drivers, residue)?;
            total.senesced.add(&g.senesced);
            total.detached.add(&g.detached);
            total.maintenance_respiration += g.maintenance_respiration;
        }
        for cohort in self.cohorts.iter().filter(|c| c.is_detached()) {
            let left = cohort.live() + cohort.dead();
            if left.wt() > 0.0 || left.n() > 0.0 {
                residue.add_residue(left.wt(), left.n());
                total.detached.add(&left);
            }
        }
        let before = self.cohorts.len();
        self.cohorts.retain(|c| !c.is_detached());
        if self.cohorts.len() < before {
            debug!(removed = before - self.cohorts.len(), "detached cohorts removed");
        }
        Ok(total)
    }

    pub fn kill(&mut self, fraction: f64) {
        self.mark_dirty();
        for cohort in &mut self.cohorts {
            cohort.do_kill(fraction);
        }
    }

    pub fn frost(&mut self, fraction: f64) {
        self.mark_dirty();
        for cohort in &mut self.cohorts {
            cohort.do_frost(fraction);
        }
    }

    pub fn thin(&mut self, proportion: f64) {
        for cohort in &mut self.cohorts {
            cohort.thin(proportion);
        }
    }

    /// Apply a removal cohort by cohort, scaling areas with the biomass.
    pub fn remove_biomass(
        &mut self,
        removal: &BiomassRemoval,
        residue: &mut dyn ResidueSink,
    ) -> Result<BiomassPool, ArbitrationError> {
        removal.validate()?;
        self.mark_dirty();
        let live_remaining = 1.0 - removal.live_to_remove - removal.live_to_residue;
        let dead_remaining = 1.0 - removal.dead_to_remove - removal.dead_to_residue;
        let mut taken = BiomassPool::ZERO;
        for cohort in &mut self.cohorts {
            let (live, dead) = cohort.pools_mut();
            taken.add(&removal.apply(live, dead, residue)?);
            cohort.scale_areas(live_remaining, dead_remaining);
        }
        Ok(taken)
    }
}

/// Per-cohort legs of one organ-level grant.
struct Shares {
    structural: Vec<f64>,
    metabolic: Vec<f64>,
    storage: Vec<f64>,
    reallocation: Vec<f64>,
    retranslocation: Vec<f64>,
}

impl Shares {
    fn split(
        grant: &Allocation,
        structural: &[f64],
        metabolic: &[f64],
        storage: &[f64],
        reallocation: &[f64],
        retranslocation: &[f64],
    ) -> Result<Self, ArbitrationError> {
        Ok(Shares {
            structural: proportional_split("leaf cohorts", grant.structural, structural)?,
            metabolic: proportional_split("leaf cohorts", grant.metabolic, metabolic)?,
            storage: proportional_split("leaf cohorts", grant.storage, storage)?,
            reallocation: drain_in_order("leaf cohorts", grant.reallocation, reallocation)?,
            retranslocation: drain_in_order("leaf cohorts", grant.retranslocation, retranslocation)?,
        })
    }

    fn get(&self, i: usize) -> Allocation {
        Allocation {
            structural: self.structural[i],
            metabolic: self.metabolic[i],
            storage: self.storage[i],
            reallocation: self.reallocation[i],
            retranslocation: self.retranslocation[i],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cohort::tests::params;
    use crate::context::ResidueLedger;
    use approx::assert_relative_eq;

    fn appearance(rank: usize, population: f64) -> AppearanceParams {
        AppearanceParams {
            rank,
            total_stem_population: population,
            final_fraction: 1.0,
            cohort_age: 0.0,
        }
    }

    fn two_growing_cohorts() -> LeafCohorts {
        let mut cohorts = LeafCohorts::new();
        cohorts.initialise_from(&[LeafCohort::template(1, 0.0), LeafCohort::template(2, 0.0)]);
        let p = params();
        cohorts.appear(&appearance(1, 10.0), &p).unwrap();
        cohorts.appear(&appearance(2, 10.0), &p).unwrap();
        cohorts
    }

    #[test]
    fn appearing_an_unknown_rank_fails() {
        let mut cohorts = LeafCohorts::new();
        cohorts.initialise_from(&[LeafCohort::template(1, 0.0)]);
        let err = cohorts.appear(&appearance(3, 10.0), &params()).unwrap_err();
        assert_eq!(err, ArbitrationError::CohortNotInitialised { rank: 3, initialised: 1 });
    }

    #[test]
    fn totals_follow_mutations() {
        let mut cohorts = LeafCohorts::new();
        cohorts.initialise_from(&[LeafCohort::template(1, 200.0)]);
        assert_eq!(cohorts.lai(), 0.0);
        cohorts.appear(&appearance(1, 50.0), &params()).unwrap();
        assert_relative_eq!(cohorts.lai(), 200.0 * 50.0 / 1e6);
        let live = cohorts.live();
        cohorts.kill(0.5);
        assert_relative_eq!(cohorts.live().wt(), live.wt() * 0.5, epsilon = 1e-12);
        assert_relative_eq!(cohorts.lai_dead(), 200.0 * 50.0 * 0.5 / 1e6);
        assert!(cohorts.specific_leaf_n() > 0.0);
    }

    #[test]
    fn starved_grant_is_split_in_proportion_to_demand() {
        let mut cohorts = two_growing_cohorts();
        cohorts.do_potential_growth(&CohortDrivers::unstressed(10.0, 10.0)).unwrap();
        let demand = cohorts.compute_dm_demand().unwrap();
        let d1 = cohorts.by_rank(1).map(|c| c.dm_demand().structural).unwrap();
        let half = demand.structural / 2.0;
        cohorts.set_potential_allocation(half, 0.0).unwrap();
        cohorts
            .allocate_dm(&Allocation {
                structural: half,
                ..Default::default()
            })
            .unwrap();
        assert_relative_eq!(cohorts.live().structural_wt, half, epsilon = 1e-12);
        let c1 = cohorts.by_rank(1).map(|c| c.live().structural_wt).unwrap();
        assert_relative_eq!(c1, d1 / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn grant_beyond_demand_is_rejected() {
        let mut cohorts = two_growing_cohorts();
        cohorts.do_potential_growth(&CohortDrivers::unstressed(10.0, 10.0)).unwrap();
        let demand = cohorts.compute_dm_demand().unwrap();
        let err = cohorts
            .allocate_dm(&Allocation {
                structural: demand.structural + 1.0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ArbitrationError::MassBalance { .. }));
    }

    #[test]
    fn removal_takes_from_every_cohort() {
        let mut cohorts = LeafCohorts::new();
        cohorts.initialise_from(&[LeafCohort::template(1, 300.0), LeafCohort::template(2, 100.0)]);
        let p = params();
        cohorts.appear(&appearance(1, 10.0), &p).unwrap();
        cohorts.appear(&appearance(2, 10.0), &p).unwrap();
        let before = cohorts.live().wt();
        let mut sink = ResidueLedger::default();
        let removal = BiomassRemoval {
            live_to_remove: 0.4,
            live_to_residue: 0.1,
            ..Default::default()
        };
        let taken = cohorts.remove_biomass(&removal, &mut sink).unwrap();
        assert_relative_eq!(taken.wt(), before * 0.5, epsilon = 1e-12);
        assert_relative_eq!(sink.dry_matter_wt, before * 0.1, epsilon = 1e-12);
        assert_relative_eq!(cohorts.lai(), 4000.0 * 0.5 / 1e6, epsilon = 1e-12);
    }

    #[test]
    fn lowest_and_highest_removal() {
        let mut cohorts = LeafCohorts::new();
        cohorts.initialise_from(&[
            LeafCohort::template(1, 0.0),
            LeafCohort::template(2, 0.0),
            LeafCohort::template(3, 0.0),
        ]);
        assert_eq!(cohorts.remove_lowest().map(|c| c.rank()), Some(1));
        assert_eq!(cohorts.remove_highest().map(|c| c.rank()), Some(3));
        assert_eq!(cohorts.len(), 1);
        assert_eq!(cohorts.count_in(CohortPhase::Initialised), 1);
    }
}
