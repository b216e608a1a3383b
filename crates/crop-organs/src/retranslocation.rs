//! How an organ remobilises material from live, non-senescing tissue.

use crop_core::{ArbitrationError, BiomassPool};

/// Computes retranslocation supply and withdraws granted amounts.
///
/// N supply is computed from the start-of-day live pool over the fraction
/// that is not senescing today, so it never overlaps with reallocation. DM
/// supply is start-of-day storage net of today's DM reallocation.
pub trait RetranslocationStrategy {
    fn dm_available(&self, start: &BiomassPool, reallocation: f64, factor: f64) -> f64 {
        (start.storage_wt - reallocation).max(0.0) * factor
    }

    fn n_available(&self, start: &BiomassPool, senescence_rate: f64, factor: f64) -> f64;

    /// Withdraw retranslocated DM from `live`.
    fn withdraw_dm(&self, live: &mut BiomassPool, amount: f64) -> Result<(), ArbitrationError> {
        live.subtract(&BiomassPool {
            storage_wt: amount,
            ..Default::default()
        })
    }

    /// Withdraw retranslocated N from `live`, returning `(storage, metabolic)` taken.
    ///
    /// `start`, `senescence_rate` and `factor` are the inputs `n_available`
    /// saw, so the storage share can be held to what storage offered.
    fn withdraw_n(
        &self,
        live: &mut BiomassPool,
        start: &BiomassPool,
        senescence_rate: f64,
        factor: f64,
        amount: f64,
    ) -> Result<(f64, f64), ArbitrationError>;
}

/// Only storage material is mobile.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageOnly;

impl RetranslocationStrategy for StorageOnly {
    fn n_available(&self, start: &BiomassPool, senescence_rate: f64, factor: f64) -> f64 {
        (start.storage_n * (1.0 - senescence_rate) * factor).max(0.0)
    }

    fn withdraw_n(
        &self,
        live: &mut BiomassPool,
        _start: &BiomassPool,
        _senescence_rate: f64,
        _factor: f64,
        amount: f64,
    ) -> Result<(f64, f64), ArbitrationError> {
        live.subtract(&BiomassPool {
            storage_n: amount,
            ..Default::default()
        })?;
        Ok((amount, 0.0))
    }
}

/// Storage N is drained first, up to the storage share of the supply, then
/// metabolic N. The senescing share of storage stays behind for reallocation.
#[derive(Clone, Copy, Debug, Default)]
pub struct StorageThenMetabolic;

impl RetranslocationStrategy for StorageThenMetabolic {
    fn n_available(&self, start: &BiomassPool, senescence_rate: f64, factor: f64) -> f64 {
        ((start.storage_n + start.metabolic_n) * (1.0 - senescence_rate) * factor).max(0.0)
    }

    fn withdraw_n(
        &self,
        live: &mut BiomassPool,
        start: &BiomassPool,
        senescence_rate: f64,
        factor: f64,
        amount: f64,
    ) -> Result<(f64, f64), ArbitrationError> {
        let storage_share = (start.storage_n * (1.0 - senescence_rate) * factor).max(0.0);
        let from_storage = amount.min(storage_share).min(live.storage_n);
        let from_metabolic = amount - from_storage;
        live.subtract(&BiomassPool {
            storage_n: from_storage,
            metabolic_n: from_metabolic,
            ..Default::default()
        })?;
        Ok((from_storage, from_metabolic))
    }
}
