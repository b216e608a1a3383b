//! Plant organs and the organ side of the daily arbitration protocol.
//!
//! Each organ owns its live and dead [`BiomassPool`](crop_core::BiomassPool)s
//! and answers, in order, for supply, demand, potential allocation and
//! allocation of dry matter and nitrogen (see [`arbitration`]). The leaf is a
//! collection of [`cohort::LeafCohort`]s; other organs hold a single pool.

pub mod arbitration;
pub mod cohort;
pub mod collection;
pub mod context;
pub mod events;
pub mod function;
pub mod generic;
pub mod leaf;
pub mod nodule;
pub mod reproductive;
pub mod retranslocation;
pub mod root;

pub use arbitration::{growth_respiration_factor, Arbitratable, ArbitrationCore, DailyFlows, Organ};
pub use cohort::{CohortDrivers, CohortPhase, LeafCohort, LeafCohortParameters};
pub use collection::LeafCohorts;
pub use context::{DayContext, ResidueLedger, ResidueSink, StressFactors, StructureState};
pub use events::{AppearanceParams, BiomassRemoval, OrganStage, PlantEvent, SowingParameters};
pub use function::{constant, BoxedFunction, Constant, DailyFunction};
pub use generic::{GenericOrgan, GenericOrganFunctions, GenericOrganParameters};
pub use leaf::{Leaf, LeafFunctions, LeafParameters};
pub use nodule::Nodule;
pub use reproductive::{ReproductiveFunctions, ReproductiveOrgan, ReproductiveParameters};
pub use retranslocation::{RetranslocationStrategy, StorageOnly, StorageThenMetabolic};
pub use root::Root;
