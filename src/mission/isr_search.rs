use super::{MissionError, MissionName, MissionOptions, MissionParameters, MissionPlan};
use crate::geo::{BoundingBox, LatLng};
use crate::jobs::{JobType, QuickScanTask, Task};

/// Fixed-wing search over an area. Every point of interest reported along
/// the way ends up inside the quick-scan box handed to the next mission.
#[derive(Debug, Default)]
pub struct IsrSearchPlan;

impl IsrSearchPlan {
    pub fn new() -> Self {
        Self
    }
}

impl MissionPlan for IsrSearchPlan {
    fn name(&self) -> MissionName {
        MissionName::IsrSearch
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
            tasks.push((JobType::IsrSearch, Task::Takeoff(takeoff)));
        }

        let search = parameters.isr_search.ok_or_else(|| missing("isrSearch"))?;
        tasks.push((JobType::IsrSearch, Task::IsrSearch(search)));

        if !options.no_land {
            let land = parameters.land.ok_or_else(|| missing("land"))?;
            tasks.push((JobType::IsrSearch, Task::Land(land)));
        }

        Ok(tasks)
    }

    fn completion_parameters(&self, collected: &[LatLng], margin_m: f64) -> Option<MissionParameters> {
        let bounds = BoundingBox::around(collected, margin_m)?;
        Some(MissionParameters {
            quick_scan: Some(QuickScanTask { waypoints: bounds.corners() }),
            ..MissionParameters::default()
        })
    }
}
