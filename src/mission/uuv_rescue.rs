use super::{MissionError, MissionName, MissionOptions, MissionParameters, MissionPlan};
use crate::geo::LatLng;
use crate::jobs::{JobType, Task};

/// Underwater vehicle retrieval. The target position is optional; without
/// one the vehicle searches on its own.
#[derive(Debug, Default)]
pub struct UuvRescuePlan;

impl UuvRescuePlan {
    pub fn new() -> Self {
        Self
    }
}

impl MissionPlan for UuvRescuePlan {
    fn name(&self) -> MissionName {
        MissionName::UuvRescue
    }

    fn generate_tasks(
        &mut self,
        parameters: &MissionParameters,
        _options: &MissionOptions,
    ) -> Result<Vec<(JobType, Task)>, MissionError> {
        let retrieve = parameters.retrieve_target.unwrap_or_default();
        Ok(vec![(JobType::UuvRescue, Task::RetrieveTarget(retrieve))])
    }

    fn completion_parameters(&self, _collected: &[LatLng], _margin_m: f64) -> Option<MissionParameters> {
        Some(MissionParameters::default())
    }
}
