use super::{MissionError, MissionName, MissionOptions, MissionParameters, MissionPlan};
use crate::geo::LatLng;
use crate::jobs::{JobType, Task};

#[derive(Debug, Default)]
pub struct PayloadDropPlan;

impl PayloadDropPlan {
    pub fn new() -> Self {
        Self
    }
}

impl MissionPlan for PayloadDropPlan {
    fn name(&self) -> MissionName {
        MissionName::PayloadDrop
    }

    fn generate_tasks(
        &mut self,
        parameters: &MissionParameters,
        options: &MissionOptions,
    ) -> Result<Vec<(JobType, Task)>, MissionError> {
        let missing = |section: &'static str| MissionError::MissingParameters { mission: self.name(), section };
        let mut tasks = Vec::with_capacity(3);

        if !options.no_takeoff {
            let takeoff = parameters.takeoff.ok_or_else(|| missing("takeoff"))?;
            tasks.push((JobType::PayloadDrop, Task::Takeoff(takeoff)));
        }

        let drop = parameters.payload_drop.ok_or_else(|| missing("payloadDrop"))?;
        tasks.push((JobType::PayloadDrop, Task::PayloadDrop(drop)));

        if !options.no_land {
            let land = parameters.land.ok_or_else(|| missing("land"))?;
            tasks.push((JobType::PayloadDrop, Task::Land(land)));
        }

        Ok(tasks)
    }

    // Dropping the payload is the whole job
    fn completion_parameters(&self, _collected: &[LatLng], _margin_m: f64) -> Option<MissionParameters> {
        Some(MissionParameters::default())
    }
}
