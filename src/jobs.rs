//! Jobs vehicles advertise and the tasks each job can carry out.

use crate::geo::LatLng;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    IsrSearch,
    PayloadDrop,
    UgvRescue,
    UuvRescue,
    QuickScan,
    DetailedSearch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::IsrSearch => "isrSearch",
            JobType::PayloadDrop => "payloadDrop",
            JobType::UgvRescue => "ugvRescue",
            JobType::UuvRescue => "uuvRescue",
            JobType::QuickScan => "quickScan",
            JobType::DetailedSearch => "detailedSearch",
        }
    }

    /// Whether a vehicle holding this job can be sent `task`.
    pub fn accepts(&self, task: &Task) -> bool {
        matches!(
            (self, task),
            (JobType::IsrSearch, Task::Takeoff(_) | Task::Loiter(_) | Task::IsrSearch(_) | Task::Land(_))
                | (JobType::PayloadDrop, Task::Takeoff(_) | Task::Loiter(_) | Task::PayloadDrop(_) | Task::Land(_))
                | (JobType::UgvRescue, Task::RetrieveTarget(_) | Task::DeliverTarget(_))
                | (JobType::UuvRescue, Task::RetrieveTarget(_))
                | (JobType::QuickScan, Task::QuickScan(_))
                | (JobType::DetailedSearch, Task::DetailedSearch(_))
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoiterTask {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub radius: f64,
    /// 1 for clockwise, -1 for counter-clockwise
    pub direction: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeoffTask {
    pub lat: f64,
    pub lng: f64,
    pub alt: f64,
    pub loiter: LoiterTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsrSearchTask {
    pub alt: f64,
    pub waypoints: [LatLng; 3],
}

/// Approach and final point shared by payload drops and landings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaypointPath {
    pub waypoints: [Waypoint; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RetrieveTargetTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl RetrieveTargetTask {
    pub fn at(location: LatLng) -> Self {
        Self {
            lat: Some(location.lat),
            lng: Some(location.lng),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuickScanTask {
    /// Top-left, top-right, bottom-left, bottom-right
    pub waypoints: [LatLng; 4],
}

/// One unit of work sent to a vehicle in an `addMission` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "taskType", rename_all = "camelCase")]
pub enum Task {
    Takeoff(TakeoffTask),
    Loiter(LoiterTask),
    IsrSearch(IsrSearchTask),
    PayloadDrop(WaypointPath),
    Land(WaypointPath),
    RetrieveTarget(RetrieveTargetTask),
    DeliverTarget(LatLng),
    QuickScan(QuickScanTask),
    DetailedSearch(LatLng),
}

impl Task {
    pub fn task_type(&self) -> &'static str {
        match self {
            Task::Takeoff(_) => "takeoff",
            Task::Loiter(_) => "loiter",
            Task::IsrSearch(_) => "isrSearch",
            Task::PayloadDrop(_) => "payloadDrop",
            Task::Land(_) => "land",
            Task::RetrieveTarget(_) => "retrieveTarget",
            Task::DeliverTarget(_) => "deliverTarget",
            Task::QuickScan(_) => "quickScan",
            Task::DetailedSearch(_) => "detailedSearch",
        }
    }

    /// Single point the task is centred on, if it has one.
    pub fn location(&self) -> Option<LatLng> {
        match self {
            Task::Takeoff(t) => Some(LatLng::new(t.lat, t.lng)),
            Task::Loiter(t) => Some(LatLng::new(t.lat, t.lng)),
            Task::RetrieveTarget(t) => t.lat.zip(t.lng).map(|(lat, lng)| LatLng::new(lat, lng)),
            Task::DeliverTarget(point) | Task::DetailedSearch(point) => Some(*point),
            Task::IsrSearch(_) | Task::PayloadDrop(_) | Task::Land(_) | Task::QuickScan(_) => None,
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_type())
    }
}
