use super::{
    MissionError, MissionName, MissionOptions, MissionParameters, MissionPlan, PlanAction, PointOfInterest,
    PoiValidity,
};
use crate::geo::LatLng;
use crate::jobs::{JobType, RetrieveTargetTask, Task};
use crate::protocol::VehicleId;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct DetailedSearch {
    location: LatLng,
    confirmed: bool,
}

/// Two-stage search: a quick-scan vehicle sweeps the area and every point
/// of interest it reports becomes a detailed-search task, nearest first, for
/// a second vehicle. The last point the detailed-search vehicle confirms is
/// the rescue target.
#[derive(Debug, Default)]
pub struct VtolSearchPlan {
    searches: BTreeMap<VehicleId, DetailedSearch>,
    target: Option<LatLng>,
}

impl VtolSearchPlan {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MissionPlan for VtolSearchPlan {
    fn name(&self) -> MissionName {
        MissionName::VtolSearch
    }

    fn generate_tasks(
        &mut self,
        parameters: &MissionParameters,
        _options: &MissionOptions,
    ) -> Result<Vec<(JobType, Task)>, MissionError> {
        let scan = parameters.quick_scan.ok_or(MissionError::MissingParameters {
            mission: self.name(),
            section: "quickScan",
        })?;
        Ok(vec![(JobType::QuickScan, Task::QuickScan(scan))])
    }

    fn on_task_assigned(&mut self, vehicle: VehicleId, _job: JobType, task: &Task) {
        if let Task::DetailedSearch(location) = task {
            self.searches.insert(vehicle, DetailedSearch { location: *location, confirmed: false });
        }
    }

    fn on_point_of_interest(&mut self, vehicle: VehicleId, job: JobType, location: LatLng) -> Vec<PlanAction> {
        match job {
            JobType::QuickScan => vec![
                PlanAction::AddTask { job: JobType::DetailedSearch, task: Task::DetailedSearch(location) },
                PlanAction::Announce(PointOfInterest { location, vehicle, validity: PoiValidity::Unknown }),
            ],
            JobType::DetailedSearch => {
                match self.searches.get_mut(&vehicle) {
                    Some(search) => search.confirmed = true,
                    None => debug!(vehicle, "Point of interest with no detailed search in progress"),
                }
                self.target = Some(location);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn on_task_complete(&mut self, vehicle: VehicleId, job: JobType, _task: &Task) -> Vec<PlanAction> {
        if job != JobType::DetailedSearch {
            return Vec::new();
        }
        let Some(search) = self.searches.remove(&vehicle) else {
            return Vec::new();
        };

        let validity = if search.confirmed {
            PoiValidity::Confirmed
        } else {
            PoiValidity::Unconfirmed
        };
        vec![PlanAction::Announce(PointOfInterest { location: search.location, vehicle, validity })]
    }

    fn task_rank(&self, job: JobType, task: &Task, anchor: Option<LatLng>) -> Option<f64> {
        match (job, task, anchor) {
            (JobType::DetailedSearch, Task::DetailedSearch(point), Some(anchor)) => Some(anchor.distance_to(point)),
            _ => None,
        }
    }

    fn completion_parameters(&self, _collected: &[LatLng], _margin_m: f64) -> Option<MissionParameters> {
        let target = self.target?;
        Some(MissionParameters {
            retrieve_target: Some(RetrieveTargetTask::at(target)),
            ..MissionParameters::default()
        })
    }
}
