//! Drives a plant through the season: scenario loading, the barrier-ordered
//! day loop and a reference whole-plant arbitrator.

pub mod arbitrator;
pub mod plant;
pub mod scenario;
pub mod scheduler;

pub use arbitrator::{Arbitrator, ProportionalArbitrator};
pub use plant::{OrganSnapshot, Plant};
pub use scenario::{Scenario, ScenarioDrivers};
pub use scheduler::{DailyDrivers, DailyScheduler, DaySummary, Today};

use chrono::NaiveDate;
use crop_core::ArbitrationError;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{date}: {source}")]
    Day {
        date: NaiveDate,
        #[source]
        source: ArbitrationError,
    },
    #[error(transparent)]
    Arbitration(#[from] ArbitrationError),
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("scenario yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run a scenario for `days` (or its own length) and return one summary per day.
pub fn run_scenario(scenario: &Scenario, days: Option<u32>) -> Result<Vec<DaySummary>, RunError> {
    let days = days.unwrap_or(scenario.days);
    let mut scheduler = DailyScheduler::new(scenario.build_plant()?);
    let mut drivers = scenario.drivers();
    let summaries = scheduler.run(&mut drivers, days)?;
    if let Some(last) = summaries.last() {
        info!(
            scenario = %scenario.name,
            days,
            live_wt = last.live.wt(),
            residue_wt = last.residue.dry_matter_wt,
            "scenario finished"
        );
    }
    Ok(summaries)
}

/// Serialize summaries as pretty JSON.
pub fn summaries_to_json(summaries: &[DaySummary]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(summaries)
}
