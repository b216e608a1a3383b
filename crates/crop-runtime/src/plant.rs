use crop_core::{ArbitrationError, BiomassPool};
use crop_organs::{Arbitratable, DailyFlows, Organ, OrganStage, PlantEvent, ResidueSink};
use serde::Serialize;

/// The organs of one plant (per m² of field), in arbitration order.
#[derive(Default)]
pub struct Plant {
    organs: Vec<Box<dyn Organ>>,
}

/// Per-organ state at the end of a day.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrganSnapshot {
    pub name: String,
    pub stage: OrganStage,
    pub live: BiomassPool,
    pub dead: BiomassPool,
    pub flows: DailyFlows,
}

impl Plant {
    pub fn new() -> Self {
        Plant::default()
    }

    pub fn with_organ(mut self, organ: Box<dyn Organ>) -> Self {
        self.push(organ);
        self
    }

    pub fn push(&mut self, organ: Box<dyn Organ>) {
        self.organs.push(organ);
    }

    pub fn organs(&self) -> &[Box<dyn Organ>] {
        &self.organs
    }

    pub fn organs_mut(&mut self) -> &mut [Box<dyn Organ>] {
        &mut self.organs
    }

    pub fn organ(&self, name: &str) -> Option<&dyn Organ> {
        self.organs.iter().find(|o| o.name() == name).map(|o| o.as_ref())
    }

    pub fn is_alive(&self) -> bool {
        self.organs.iter().any(|o| o.stage().is_alive())
    }

    /// Every organ sees every event; organs ignore the ones they do not model.
    pub fn handle_event(&mut self, event: &PlantEvent, residue: &mut dyn ResidueSink) -> Result<(), ArbitrationError> {
        for organ in self.organs.iter_mut() {
            organ.handle_event(event, residue)?;
        }
        Ok(())
    }

    pub fn live(&self) -> BiomassPool {
        self.organs.iter().map(|o| o.live()).sum()
    }

    pub fn dead(&self) -> BiomassPool {
        self.organs.iter().map(|o| o.dead()).sum()
    }

    pub fn total(&self) -> BiomassPool {
        self.live() + self.dead()
    }

    /// Green cover of the canopy, capped at full cover.
    pub fn canopy_cover(&self) -> f64 {
        self.organs.iter().map(|o| o.canopy_cover()).sum::<f64>().clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> Vec<OrganSnapshot> {
        self.organs
            .iter()
            .map(|o| OrganSnapshot {
                name: o.name().to_string(),
                stage: o.stage(),
                live: o.live(),
                dead: o.dead(),
                flows: o.flows(),
            })
            .collect()
    }
}
