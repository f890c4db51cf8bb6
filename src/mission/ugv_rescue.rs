use super::{MissionError, MissionName, MissionOptions, MissionParameters, MissionPlan};
use crate::geo::LatLng;
use crate::jobs::{JobType, Task};

/// Ground vehicle drives to the target, picks it up and drops it off.
#[derive(Debug, Default)]
pub struct UgvRescuePlan;

impl UgvRescuePlan {
    pub fn new() -> Self {
        Self
    }
}

impl MissionPlan for UgvRescuePlan {
    fn name(&self) -> MissionName {
        MissionName::UgvRescue
    }

    fn generate_tasks(
        &mut self,
        parameters: &MissionParameters,
        _options: &MissionOptions,
    ) -> Result<Vec<(JobType, Task)>, MissionError> {
        let missing = |section: &'static str| MissionError::MissingParameters { mission: self.name(), section };

        let retrieve = parameters
            .retrieve_target
            .filter(|target| target.lat.is_some() && target.lng.is_some())
            .ok_or_else(|| missing("retrieveTarget"))?;
        let deliver = parameters.deliver_target.ok_or_else(|| missing("deliverTarget"))?;

        Ok(vec![
            (JobType::UgvRescue, Task::RetrieveTarget(retrieve)),
            (JobType::UgvRescue, Task::DeliverTarget(deliver)),
        ])
    }

    fn completion_parameters(&self, _collected: &[LatLng], _margin_m: f64) -> Option<MissionParameters> {
        Some(MissionParameters::default())
    }
}
