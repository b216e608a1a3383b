//! Core value types for the crop organ arbitration model.
//!
//! This crate defines the six-component [`BiomassPool`], the daily
//! [`Supply`], [`Demand`] and [`Allocation`] records exchanged between organs
//! and a whole-plant arbitrator, the fatal [`ArbitrationError`] taxonomy, and
//! the two fan-out algorithms used to spread an organ-level grant across the
//! parts of that organ:
//! - [`proportional_split`] for fresh structural/metabolic/storage grants
//! - [`drain_in_order`] for reallocation and retranslocation withdrawals
//!
//! All quantities are `f64` in g·m⁻² (or g·m⁻²·d⁻¹ for daily records).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{AddAssign, Mul};
use thiserror::Error;

/// Absolute band below zero that is treated as floating-point noise.
pub const BIOMASS_TOLERANCE: f64 = 1e-10;

/// Relative tolerance for mass-balance checks.
pub const BALANCE_TOLERANCE: f64 = 1e-8;

/// Allowed absolute error when comparing against `reference`.
pub fn balance_tolerance(reference: f64) -> f64 {
    BALANCE_TOLERANCE * reference.abs().max(1.0)
}

/// `numerator / denominator`, or `fallback` when the denominator is zero.
pub fn divide(numerator: f64, denominator: f64, fallback: f64) -> f64 {
    if denominator == 0.0 {
        fallback
    } else {
        numerator / denominator
    }
}

/// Which resource a record or callback refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    /// Dry matter (carbon-based biomass).
    DryMatter,
    /// Nitrogen.
    Nitrogen,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::DryMatter => write!(f, "DM"),
            Resource::Nitrogen => write!(f, "N"),
        }
    }
}

/// Daily arbitration phases, in the order a scheduler must invoke them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Daily reset of protocol records.
    NewDay,
    /// Organ exposes its supply.
    Supply,
    /// Organ exposes its demand.
    Demand,
    /// Arbitrator assigns tentative DM.
    PotentialAllocation,
    /// Arbitrator applies the final grant.
    Allocation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NewDay => "new day",
            Phase::Supply => "supply",
            Phase::Demand => "demand",
            Phase::PotentialAllocation => "potential allocation",
            Phase::Allocation => "allocation",
        };
        f.write_str(name)
    }
}

/// Fatal modelling errors. None of these are recovered; a run that raises one
/// is invalid.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArbitrationError {
    /// A grant exceeded demand or a pool total disagrees with its balance equation.
    #[error("{owner}: mass balance violated: {detail}")]
    MassBalance { owner: String, detail: String },
    /// A supply, demand, allocation or pool component fell below the tolerance band.
    #[error("{owner}: negative {quantity} ({value})")]
    NegativeQuantity {
        owner: String,
        quantity: &'static str,
        value: f64,
    },
    /// A parameter is zero or outside its domain.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// A phase callback ran before its prerequisite phase.
    #[error("{owner}: {phase} requested before {missing}")]
    ProtocolOrder {
        owner: String,
        phase: Phase,
        missing: Phase,
    },
    /// A cohort event referenced a rank that was never initialised.
    #[error("cohort rank {rank} is beyond the {initialised} initialised cohorts")]
    CohortNotInitialised { rank: usize, initialised: usize },
}

impl ArbitrationError {
    pub fn mass_balance(owner: impl Into<String>, detail: impl Into<String>) -> Self {
        ArbitrationError::MassBalance {
            owner: owner.into(),
            detail: detail.into(),
        }
    }

    pub fn negative(owner: impl Into<String>, quantity: &'static str, value: f64) -> Self {
        ArbitrationError::NegativeQuantity {
            owner: owner.into(),
            quantity,
            value,
        }
    }

    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ArbitrationError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Reject `value` if it is below `-BIOMASS_TOLERANCE`, otherwise clamp noise to zero.
pub fn non_negative(owner: &str, quantity: &'static str, value: f64) -> Result<f64, ArbitrationError> {
    if value.is_nan() || value < -BIOMASS_TOLERANCE {
        return Err(ArbitrationError::negative(owner, quantity, value));
    }
    Ok(value.max(0.0))
}

/// Structural, metabolic and storage dry matter and nitrogen (g/m²).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BiomassPool {
    pub structural_wt: f64,
    pub metabolic_wt: f64,
    pub storage_wt: f64,
    pub structural_n: f64,
    pub metabolic_n: f64,
    pub storage_n: f64,
}

impl BiomassPool {
    pub const ZERO: BiomassPool = BiomassPool {
        structural_wt: 0.0,
        metabolic_wt: 0.0,
        storage_wt: 0.0,
        structural_n: 0.0,
        metabolic_n: 0.0,
        storage_n: 0.0,
    };

    /// Total dry matter.
    pub fn wt(&self) -> f64 {
        self.structural_wt + self.metabolic_wt + self.storage_wt
    }

    /// Total nitrogen.
    pub fn n(&self) -> f64 {
        self.structural_n + self.metabolic_n + self.storage_n
    }

    /// N concentration of the whole pool, zero for an empty pool.
    pub fn n_conc(&self) -> f64 {
        divide(self.n(), self.wt(), 0.0)
    }

    pub fn structural_n_conc(&self) -> f64 {
        divide(self.structural_n, self.structural_wt, 0.0)
    }

    pub fn metabolic_n_conc(&self) -> f64 {
        divide(self.metabolic_n, self.metabolic_wt, 0.0)
    }

    pub fn storage_n_conc(&self) -> f64 {
        divide(self.storage_n, self.storage_wt, 0.0)
    }

    pub fn add(&mut self, other: &BiomassPool) {
        self.structural_wt += other.structural_wt;
        self.metabolic_wt += other.metabolic_wt;
        self.storage_wt += other.storage_wt;
        self.structural_n += other.structural_n;
        self.metabolic_n += other.metabolic_n;
        self.storage_n += other.storage_n;
    }

    /// Subtract `other`, failing without mutating if any component would drop
    /// below `-BIOMASS_TOLERANCE`. Results inside the band are clamped to zero.
    pub fn subtract(&mut self, other: &BiomassPool) -> Result<(), ArbitrationError> {
        let candidate = BiomassPool {
            structural_wt: self.structural_wt - other.structural_wt,
            metabolic_wt: self.metabolic_wt - other.metabolic_wt,
            storage_wt: self.storage_wt - other.storage_wt,
            structural_n: self.structural_n - other.structural_n,
            metabolic_n: self.metabolic_n - other.metabolic_n,
            storage_n: self.storage_n - other.storage_n,
        };
        *self = candidate.clamped("biomass pool")?;
        Ok(())
    }

    pub fn multiply(&mut self, scalar: f64) {
        self.structural_wt *= scalar;
        self.metabolic_wt *= scalar;
        self.storage_wt *= scalar;
        self.structural_n *= scalar;
        self.metabolic_n *= scalar;
        self.storage_n *= scalar;
    }

    pub fn set_to(&mut self, other: &BiomassPool) {
        *self = *other;
    }

    pub fn clear(&mut self) {
        *self = BiomassPool::ZERO;
    }

    /// Copy of this pool scaled by `scalar`.
    pub fn scaled(&self, scalar: f64) -> BiomassPool {
        *self * scalar
    }

    /// Component names and values, in declaration order.
    pub fn components(&self) -> [(&'static str, f64); 6] {
        [
            ("structural wt", self.structural_wt),
            ("metabolic wt", self.metabolic_wt),
            ("storage wt", self.storage_wt),
            ("structural N", self.structural_n),
            ("metabolic N", self.metabolic_n),
            ("storage N", self.storage_n),
        ]
    }

    /// Fails on the first component below the tolerance band.
    pub fn check_non_negative(&self, owner: &str) -> Result<(), ArbitrationError> {
        for (name, value) in self.components() {
            non_negative(owner, name, value)?;
        }
        Ok(())
    }

    /// Copy with noise below zero clamped away, or an error if any component
    /// is genuinely negative.
    pub fn clamped(&self, owner: &str) -> Result<BiomassPool, ArbitrationError> {
        Ok(BiomassPool {
            structural_wt: non_negative(owner, "structural wt", self.structural_wt)?,
            metabolic_wt: non_negative(owner, "metabolic wt", self.metabolic_wt)?,
            storage_wt: non_negative(owner, "storage wt", self.storage_wt)?,
            structural_n: non_negative(owner, "structural N", self.structural_n)?,
            metabolic_n: non_negative(owner, "metabolic N", self.metabolic_n)?,
            storage_n: non_negative(owner, "storage N", self.storage_n)?,
        })
    }
}

impl AddAssign for BiomassPool {
    fn add_assign(&mut self, rhs: BiomassPool) {
        BiomassPool::add(self, &rhs);
    }
}

impl std::ops::Add for BiomassPool {
    type Output = BiomassPool;

    fn add(mut self, rhs: BiomassPool) -> BiomassPool {
        self += rhs;
        self
    }
}

/// Component-wise difference without the tolerance check of [`BiomassPool::subtract`].
impl std::ops::Sub for BiomassPool {
    type Output = BiomassPool;

    fn sub(self, rhs: BiomassPool) -> BiomassPool {
        BiomassPool {
            structural_wt: self.structural_wt - rhs.structural_wt,
            metabolic_wt: self.metabolic_wt - rhs.metabolic_wt,
            storage_wt: self.storage_wt - rhs.storage_wt,
            structural_n: self.structural_n - rhs.structural_n,
            metabolic_n: self.metabolic_n - rhs.metabolic_n,
            storage_n: self.storage_n - rhs.storage_n,
        }
    }
}

impl Mul<f64> for BiomassPool {
    type Output = BiomassPool;

    fn mul(mut self, rhs: f64) -> BiomassPool {
        self.multiply(rhs);
        self
    }
}

impl Sum for BiomassPool {
    fn sum<I: Iterator<Item = BiomassPool>>(iter: I) -> Self {
        iter.fold(BiomassPool::ZERO, |mut acc, p| {
            acc += p;
            acc
        })
    }
}

impl<'a> Sum<&'a BiomassPool> for BiomassPool {
    fn sum<I: Iterator<Item = &'a BiomassPool>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Weights the arbitrator uses to split scarce supply between organs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Priorities {
    pub structural: f64,
    pub metabolic: f64,
    pub storage: f64,
}

impl Default for Priorities {
    fn default() -> Self {
        Priorities {
            structural: 1.0,
            metabolic: 1.0,
            storage: 1.0,
        }
    }
}

/// An organ's request for one resource on one day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub structural: f64,
    pub metabolic: f64,
    pub storage: f64,
    #[serde(default)]
    pub priorities: Priorities,
}

impl Demand {
    pub fn new(structural: f64, metabolic: f64, storage: f64) -> Self {
        Demand {
            structural,
            metabolic,
            storage,
            priorities: Priorities::default(),
        }
    }

    pub fn total(&self) -> f64 {
        self.structural + self.metabolic + self.storage
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0.0
    }

    /// Clamp noise to zero; fail on a genuinely negative leg.
    pub fn validated(&self, owner: &str) -> Result<Demand, ArbitrationError> {
        Ok(Demand {
            structural: non_negative(owner, "structural demand", self.structural)?,
            metabolic: non_negative(owner, "metabolic demand", self.metabolic)?,
            storage: non_negative(owner, "storage demand", self.storage)?,
            priorities: self.priorities,
        })
    }
}

/// What an organ can offer for one resource on one day.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Supply {
    pub fixation: f64,
    pub uptake: f64,
    pub reallocation: f64,
    pub retranslocation: f64,
}

impl Supply {
    /// Build a supply record, rejecting any component below the tolerance band.
    pub fn new(
        fixation: f64,
        uptake: f64,
        reallocation: f64,
        retranslocation: f64,
    ) -> Result<Self, ArbitrationError> {
        Supply {
            fixation,
            uptake,
            reallocation,
            retranslocation,
        }
        .validated("supply")
    }

    pub fn total(&self) -> f64 {
        self.fixation + self.uptake + self.reallocation + self.retranslocation
    }

    pub fn validated(&self, owner: &str) -> Result<Supply, ArbitrationError> {
        Ok(Supply {
            fixation: non_negative(owner, "fixation supply", self.fixation)?,
            uptake: non_negative(owner, "uptake supply", self.uptake)?,
            reallocation: non_negative(owner, "reallocation supply", self.reallocation)?,
            retranslocation: non_negative(owner, "retranslocation supply", self.retranslocation)?,
        })
    }
}

/// Tentative DM assigned by the arbitrator before the final grant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PotentialAllocation {
    pub structural: f64,
    pub metabolic: f64,
    pub storage: f64,
}

impl PotentialAllocation {
    pub fn total(&self) -> f64 {
        self.structural + self.metabolic + self.storage
    }
}

/// The final grant for one resource on one day.
///
/// `structural`, `metabolic` and `storage` are fresh material for the organ.
/// `reallocation` and `retranslocation` are amounts the arbitrator takes
/// *from* the organ. `uptake` and `fixation` report how much of the granted N
/// came from those sources, and `respired` is DM consumed for N fixation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub structural: f64,
    pub metabolic: f64,
    pub storage: f64,
    pub reallocation: f64,
    pub retranslocation: f64,
    #[serde(default)]
    pub uptake: f64,
    #[serde(default)]
    pub fixation: f64,
    #[serde(default)]
    pub respired: f64,
}

impl Allocation {
    /// Fresh material granted (structural + metabolic + storage).
    pub fn grown(&self) -> f64 {
        self.structural + self.metabolic + self.storage
    }

    pub fn is_zero(&self) -> bool {
        self.grown() == 0.0
            && self.reallocation == 0.0
            && self.retranslocation == 0.0
            && self.uptake == 0.0
            && self.fixation == 0.0
            && self.respired == 0.0
    }

    pub fn validated(&self, owner: &str) -> Result<Allocation, ArbitrationError> {
        Ok(Allocation {
            structural: non_negative(owner, "structural allocation", self.structural)?,
            metabolic: non_negative(owner, "metabolic allocation", self.metabolic)?,
            storage: non_negative(owner, "storage allocation", self.storage)?,
            reallocation: non_negative(owner, "reallocation", self.reallocation)?,
            retranslocation: non_negative(owner, "retranslocation", self.retranslocation)?,
            uptake: non_negative(owner, "uptake", self.uptake)?,
            fixation: non_negative(owner, "fixation", self.fixation)?,
            respired: non_negative(owner, "respired", self.respired)?,
        })
    }
}

/// Split `total` across parts in proportion to their demands, each part
/// capped at its own demand: `share[i] = min(d[i], total * d[i] / Σd)`.
///
/// Zero total demand with a zero grant is a short-circuit, not an error. A
/// grant that the demands cannot absorb leaves a residual and is a
/// mass-balance violation.
pub fn proportional_split(owner: &str, total: f64, demands: &[f64]) -> Result<Vec<f64>, ArbitrationError> {
    let total = non_negative(owner, "grant", total)?;
    let mut clean = Vec::with_capacity(demands.len());
    for &d in demands {
        clean.push(non_negative(owner, "part demand", d)?);
    }
    let demand_total: f64 = clean.iter().sum();
    if total == 0.0 || demand_total == 0.0 {
        if total > BIOMASS_TOLERANCE {
            return Err(ArbitrationError::mass_balance(
                owner,
                format!("grant of {total} against zero demand"),
            ));
        }
        return Ok(vec![0.0; clean.len()]);
    }

    let shares: Vec<f64> = clean
        .iter()
        .map(|&d| d.min(total * d / demand_total))
        .collect();
    let allocated: f64 = shares.iter().sum();
    let tol = balance_tolerance(total);
    if allocated - total > tol {
        return Err(ArbitrationError::mass_balance(
            owner,
            format!("split of {allocated} exceeds grant of {total}"),
        ));
    }
    if total - allocated > tol {
        return Err(ArbitrationError::mass_balance(
            owner,
            format!("{} of a {total} grant left after split", total - allocated),
        ));
    }
    Ok(shares)
}

/// Withdraw `requested` from parts in order, taking at most each part's
/// ceiling. Anything left once every part is drained is a mass-balance
/// violation.
pub fn drain_in_order(owner: &str, requested: f64, ceilings: &[f64]) -> Result<Vec<f64>, ArbitrationError> {
    let requested = non_negative(owner, "withdrawal", requested)?;
    let mut remainder = requested;
    let mut taken = Vec::with_capacity(ceilings.len());
    for &ceiling in ceilings {
        let take = remainder.min(ceiling.max(0.0));
        remainder = (remainder - take).max(0.0);
        taken.push(take);
    }
    if remainder > balance_tolerance(requested) {
        return Err(ArbitrationError::mass_balance(
            owner,
            format!("{remainder} of a {requested} withdrawal left after draining"),
        ));
    }
    Ok(taken)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn pool(v: f64) -> BiomassPool {
        BiomassPool {
            structural_wt: v,
            metabolic_wt: 2.0 * v,
            storage_wt: 3.0 * v,
            structural_n: 0.1 * v,
            metabolic_n: 0.2 * v,
            storage_n: 0.3 * v,
        }
    }

    #[test]
    fn derived_totals() {
        let p = pool(1.0);
        assert_relative_eq!(p.wt(), 6.0);
        assert_relative_eq!(p.n(), 0.6);
        assert_relative_eq!(p.n_conc(), 0.1);
        assert_relative_eq!(p.metabolic_n_conc(), 0.1);
        assert_eq!(BiomassPool::ZERO.n_conc(), 0.0);
    }

    #[test]
    fn add_multiply_clear() {
        let mut p = pool(1.0);
        p.add(&pool(2.0));
        assert_relative_eq!(p.wt(), 18.0);
        p.multiply(0.5);
        assert_relative_eq!(p.storage_wt, 4.5);
        let mut q = BiomassPool::ZERO;
        q.set_to(&p);
        assert_eq!(q, p);
        q.clear();
        assert_eq!(q, BiomassPool::ZERO);
        let summed: BiomassPool = [pool(1.0), pool(1.0)].iter().sum();
        assert_relative_eq!(summed.wt(), 12.0);
    }

    #[test]
    fn operators_work_component_wise() {
        let both = pool(1.0) + pool(2.0);
        assert_relative_eq!(both.metabolic_n, 0.6, epsilon = 1e-12);
        let diff = both - pool(2.0);
        assert_relative_eq!(diff.wt(), 6.0, epsilon = 1e-12);
        assert_relative_eq!((pool(1.0) * 2.0).storage_wt, 6.0);
    }

    #[test]
    fn subtract_clamps_noise_and_rejects_real_deficits() {
        let mut p = pool(1.0);
        let mut noisy = pool(1.0);
        noisy.storage_wt += 1e-12;
        p.subtract(&noisy).unwrap();
        assert_eq!(p, BiomassPool::ZERO);

        let mut p = pool(1.0);
        let err = p.subtract(&pool(2.0)).unwrap_err();
        assert!(matches!(err, ArbitrationError::NegativeQuantity { .. }));
        // failed subtraction leaves the receiver untouched
        assert_eq!(p, pool(1.0));
    }

    #[test]
    fn negative_retranslocation_supply_is_rejected() {
        let err = Supply::new(0.0, 0.0, 0.0, -1.0).unwrap_err();
        assert_eq!(
            err,
            ArbitrationError::NegativeQuantity {
                owner: "supply".to_string(),
                quantity: "retranslocation supply",
                value: -1.0,
            }
        );
        assert!(Supply::new(1.0, 0.0, 0.0, -1e-12).is_ok());
    }

    #[test]
    fn starvation_split_is_proportional() {
        let shares = proportional_split("leaf", 50.0, &[60.0, 40.0]).unwrap();
        assert_relative_eq!(shares[0], 30.0);
        assert_relative_eq!(shares[1], 20.0);
        assert_relative_eq!(shares.iter().sum::<f64>(), 50.0);
    }

    #[test]
    fn split_caps_at_demand_and_rejects_excess() {
        let shares = proportional_split("leaf", 100.0, &[60.0, 40.0]).unwrap();
        assert_eq!(shares, vec![60.0, 40.0]);
        let err = proportional_split("leaf", 120.0, &[60.0, 40.0]).unwrap_err();
        assert!(matches!(err, ArbitrationError::MassBalance { .. }));
    }

    #[test]
    fn zero_demand_short_circuits() {
        assert_eq!(proportional_split("leaf", 0.0, &[0.0, 0.0]).unwrap(), vec![0.0, 0.0]);
        assert!(proportional_split("leaf", 1.0, &[0.0, 0.0]).is_err());
        assert!(proportional_split("leaf", 1.0, &[]).is_err());
    }

    #[test]
    fn drain_walks_parts_in_order() {
        let taken = drain_in_order("leaf", 5.0, &[3.0, 1.0, 4.0]).unwrap();
        assert_eq!(taken, vec![3.0, 1.0, 1.0]);
        let err = drain_in_order("leaf", 9.0, &[3.0, 1.0, 4.0]).unwrap_err();
        assert!(matches!(err, ArbitrationError::MassBalance { .. }));
        assert!(drain_in_order("leaf", -1.0, &[3.0]).is_err());
    }

    #[test]
    fn demand_defaults_to_unit_priorities() {
        let d: Demand = serde_json::from_str(r#"{"structural":1.0,"metabolic":0.5,"storage":0.0}"#).unwrap();
        assert_eq!(d.priorities, Priorities::default());
        assert_relative_eq!(d.total(), 1.5);
    }

    #[test]
    fn error_messages_name_the_phase() {
        let err = ArbitrationError::ProtocolOrder {
            owner: "Leaf".into(),
            phase: Phase::Allocation,
            missing: Phase::Demand,
        };
        assert_eq!(err.to_string(), "Leaf: allocation requested before demand");
    }

    #[test]
    fn pool_serde_roundtrip() {
        let p = pool(1.5);
        let s = serde_json::to_string(&p).unwrap();
        let back: BiomassPool = serde_json::from_str(&s).unwrap();
        assert_eq!(back, p);
    }

    proptest! {
        #[test]
        fn split_never_exceeds_grant_or_demand(
            demands in proptest::collection::vec(0.0f64..100.0, 1..12),
            frac in 0.0f64..1.0,
        ) {
            let total_demand: f64 = demands.iter().sum();
            let grant = total_demand * frac;
            let shares = proportional_split("organ", grant, &demands).unwrap();
            let allocated: f64 = shares.iter().sum();
            prop_assert!(allocated <= grant + balance_tolerance(grant));
            prop_assert!((grant - allocated).abs() <= balance_tolerance(grant));
            for (s, d) in shares.iter().zip(&demands) {
                prop_assert!(*s <= *d + 1e-12);
            }
        }

        #[test]
        fn drain_takes_exactly_what_was_asked(
            ceilings in proptest::collection::vec(0.0f64..10.0, 1..10),
            frac in 0.0f64..1.0,
        ) {
            let available: f64 = ceilings.iter().sum();
            let requested = available * frac;
            let taken = drain_in_order("organ", requested, &ceilings).unwrap();
            let total: f64 = taken.iter().sum();
            prop_assert!((total - requested).abs() <= balance_tolerance(requested));
            for (t, c) in taken.iter().zip(&ceilings) {
                prop_assert!(*t <= *c);
            }
        }

        #[test]
        fn scaled_pool_keeps_concentration(v in 0.01f64..1000.0, k in 0.01f64..10.0) {
            let p = pool(v);
            let q = p.scaled(k);
            prop_assert!((q.n_conc() - p.n_conc()).abs() < 1e-12);
            prop_assert!(q.check_non_negative("pool").is_ok());
        }
    }
}
