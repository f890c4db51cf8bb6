use crate::geo::LatLng;
use crate::jobs::{JobType, Task};
use crate::message_handler::Outbound;
use crate::protocol::{Payload, ProtocolError, Telemetry, VehicleId};
use crate::timer_event::{Handled, HandlerId, Timeout, TimerEventRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{debug, info, warn};

const STATUS_EVENT: &str = "status";
const ERROR_EVENT: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VehicleStatus {
    Disconnected,
    Ready,
    Running,
    Paused,
    Error,
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Disconnected => "disconnected",
            VehicleStatus::Ready => "ready",
            VehicleStatus::Running => "running",
            VehicleStatus::Paused => "paused",
            VehicleStatus::Error => "error",
        }
    }
}

/// Something a vehicle record reports back to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum VehicleEvent {
    JobAccepted { vehicle: VehicleId, job: JobType },
    JobTimedOut { vehicle: VehicleId, job: JobType },
    JobError {
        vehicle: VehicleId,
        job: JobType,
        message: Option<String>,
    },
    InvalidBattery { vehicle: VehicleId, value: f64 },
    StatusChanged {
        vehicle: VehicleId,
        from: VehicleStatus,
        to: VehicleStatus,
    },
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: VehicleStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("vehicle {0} already has a job assignment pending")]
    AssignmentPending(VehicleId),
    #[error("vehicle {0} is disconnected")]
    Disconnected(VehicleId),
    #[error("vehicle {vehicle} does not support job {job}")]
    JobNotSupported { vehicle: VehicleId, job: JobType },
    #[error("vehicle {0} has no job assigned")]
    NoJobAssigned(VehicleId),
    #[error("vehicle {vehicle} with job {job} cannot perform a {task} task")]
    TaskNotAccepted {
        vehicle: VehicleId,
        job: JobType,
        task: &'static str,
    },
    #[error("link error: {0}")]
    Link(#[from] ProtocolError),
}

/// What the presentation layer is shown about a vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSnapshot {
    pub id: VehicleId,
    pub name: String,
    pub vehicle_type: String,
    pub status: VehicleStatus,
    pub jobs: Vec<JobType>,
    pub assigned_job: Option<JobType>,
    pub lat: f64,
    pub lng: f64,
    pub alt: Option<f64>,
    pub heading: Option<f64>,
    pub battery: Option<f64>,
    pub last_contact: u64,
}

#[derive(Debug)]
pub struct Vehicle {
    id: VehicleId,
    name: String,
    vehicle_type: String,
    jobs: BTreeSet<JobType>,
    status: VehicleStatus,
    assigned_job: Option<JobType>,
    lat: f64,
    lng: f64,
    alt: Option<f64>,
    heading: Option<f64>,
    battery: Option<f64>,
    last_contact: u64,

    status_events: TimerEventRegistry<StatusReport, VehicleEvent>,
    pending_assignment: Option<HandlerId>,
    error_watch: Option<HandlerId>,
}

impl Vehicle {
    pub fn new<I>(id: VehicleId, name: &str, vehicle_type: &str, jobs: I, now: u64) -> Self
    where
        I: IntoIterator<Item = JobType>,
    {
        Self {
            id,
            name: name.to_string(),
            vehicle_type: vehicle_type.to_string(),
            jobs: jobs.into_iter().collect(),
            status: VehicleStatus::Ready,
            assigned_job: None,
            lat: 0.0,
            lng: 0.0,
            alt: None,
            heading: None,
            battery: None,
            last_contact: now,
            status_events: TimerEventRegistry::new(),
            pending_assignment: None,
            error_watch: None,
        }
    }

    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> VehicleStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status != VehicleStatus::Disconnected
    }

    pub fn jobs(&self) -> &BTreeSet<JobType> {
        &self.jobs
    }

    pub fn supports(&self, job: JobType) -> bool {
        self.jobs.contains(&job)
    }

    pub fn assigned_job(&self) -> Option<JobType> {
        self.assigned_job
    }

    pub fn has_pending_assignment(&self) -> bool {
        self.pending_assignment.is_some()
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }

    pub fn battery(&self) -> Option<f64> {
        self.battery
    }

    pub fn last_contact(&self) -> u64 {
        self.last_contact
    }

    /// Record that something was heard from the vehicle.
    pub fn touch(&mut self, now: u64) {
        self.last_contact = self.last_contact.max(now);
    }

    /// Bring a record back into service after a fresh `connect`.
    pub fn connect<I>(&mut self, jobs: I, now: u64)
    where
        I: IntoIterator<Item = JobType>,
    {
        self.cancel_job();
        self.jobs = jobs.into_iter().collect();
        self.status = VehicleStatus::Ready;
        self.touch(now);
        info!(vehicle = self.id, jobs = ?self.jobs, "Vehicle connected");
    }

    pub fn disconnect(&mut self) {
        self.cancel_job();
        self.status = VehicleStatus::Disconnected;
        info!(vehicle = self.id, "Vehicle disconnected");
    }

    /// Merge an `update` into the record.
    ///
    /// A battery reading outside `[0, 1]` is reported and skipped; the rest of
    /// the update still applies. Status reports are offered to any pending
    /// job assignment.
    pub fn apply_telemetry(&mut self, update: &Telemetry, now: u64) -> Vec<VehicleEvent> {
        let mut events = Vec::new();
        self.touch(now);

        self.lat = update.lat;
        self.lng = update.lng;
        if update.alt.is_some() {
            self.alt = update.alt;
        }
        if update.heading.is_some() {
            self.heading = update.heading;
        }

        if let Some(battery) = update.battery {
            if (0.0..=1.0).contains(&battery) {
                self.battery = Some(battery);
            } else {
                warn!(vehicle = self.id, battery, "Rejected out-of-range battery reading");
                events.push(VehicleEvent::InvalidBattery { vehicle: self.id, value: battery });
            }
        }

        if let Some(status) = update.status {
            let previous = self.status;
            self.status = status;
            if previous != status {
                debug!(vehicle = self.id, from = previous.as_str(), to = status.as_str(), "Status changed");
                events.push(VehicleEvent::StatusChanged { vehicle: self.id, from: previous, to: status });
            }

            let report = StatusReport {
                status,
                error_message: update.error_message.clone(),
            };
            let mut outputs = self.status_events.fire(STATUS_EVENT, &report);
            if status == VehicleStatus::Error && previous != VehicleStatus::Error {
                outputs.extend(self.status_events.fire(ERROR_EVENT, &report));
            }
            self.absorb(outputs, &mut events);
        }

        events
    }

    /// Surface assignment windows that have run out.
    pub fn poll(&mut self, now: u64) -> Vec<VehicleEvent> {
        let outputs = self.status_events.expire(now);
        let mut events = Vec::new();
        self.absorb(outputs, &mut events);
        events
    }

    /// Send `start` for `job` and wait up to `timeout_ms` for the vehicle to
    /// report `ready`. The outcome arrives later as a [`VehicleEvent`] from
    /// [`apply_telemetry`](Self::apply_telemetry) or [`poll`](Self::poll).
    pub fn assign_job(
        &mut self,
        job: JobType,
        link: &mut dyn Outbound,
        now: u64,
        timeout_ms: u64,
    ) -> Result<(), VehicleError> {
        if self.pending_assignment.is_some() {
            return Err(VehicleError::AssignmentPending(self.id));
        }
        if !self.is_connected() {
            return Err(VehicleError::Disconnected(self.id));
        }
        if !self.supports(job) {
            return Err(VehicleError::JobNotSupported { vehicle: self.id, job });
        }

        link.send(self.id, Payload::Start { job_type: job }, now)?;
        self.assigned_job = Some(job);

        let vehicle = self.id;
        let accept = move |report: &StatusReport| {
            if report.status == VehicleStatus::Ready {
                Handled::DoneWith(VehicleEvent::JobAccepted { vehicle, job })
            } else {
                Handled::Keep
            }
        };
        self.pending_assignment = Some(self.status_events.add_handler(
            STATUS_EVENT,
            accept,
            Some(Timeout::new(timeout_ms, VehicleEvent::JobTimedOut { vehicle, job })),
            now,
        ));

        if let Some(previous) = self.error_watch.take() {
            self.status_events.remove_handler(previous);
        }
        let on_error = move |report: &StatusReport| {
            Handled::Emit(VehicleEvent::JobError {
                vehicle,
                job,
                message: report.error_message.clone(),
            })
        };
        self.error_watch = Some(self.status_events.add_handler(ERROR_EVENT, on_error, None, now));

        info!(vehicle = self.id, job = job.as_str(), "Job assignment sent");
        Ok(())
    }

    /// Send one task for the vehicle's assigned job.
    pub fn assign_task(&mut self, task: &Task, link: &mut dyn Outbound, now: u64) -> Result<u32, VehicleError> {
        if !self.is_connected() {
            return Err(VehicleError::Disconnected(self.id));
        }
        let job = self.assigned_job.ok_or(VehicleError::NoJobAssigned(self.id))?;
        if !job.accepts(task) {
            return Err(VehicleError::TaskNotAccepted {
                vehicle: self.id,
                job,
                task: task.task_type(),
            });
        }

        let id = link.send(self.id, Payload::AddMission { mission_info: task.clone() }, now)?;
        debug!(vehicle = self.id, task = task.task_type(), "Task sent");
        Ok(id)
    }

    /// Drop the current job and tell the vehicle to stop. Nothing is sent to
    /// a disconnected vehicle.
    pub fn stop(&mut self, link: &mut dyn Outbound, now: u64) -> Result<(), VehicleError> {
        self.cancel_job();
        if self.is_connected() {
            link.send(self.id, Payload::Stop, now)?;
        }
        Ok(())
    }

    pub fn pause(&mut self, link: &mut dyn Outbound, now: u64) -> Result<(), VehicleError> {
        if !self.is_connected() {
            return Err(VehicleError::Disconnected(self.id));
        }
        link.send(self.id, Payload::Pause, now)?;
        Ok(())
    }

    pub fn resume(&mut self, link: &mut dyn Outbound, now: u64) -> Result<(), VehicleError> {
        if !self.is_connected() {
            return Err(VehicleError::Disconnected(self.id));
        }
        link.send(self.id, Payload::Resume, now)?;
        Ok(())
    }

    /// Forget the assigned job and cancel any pending assignment without
    /// reporting it.
    pub fn cancel_job(&mut self) {
        self.status_events.clear();
        self.pending_assignment = None;
        self.error_watch = None;
        self.assigned_job = None;
    }

    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            id: self.id,
            name: self.name.clone(),
            vehicle_type: self.vehicle_type.clone(),
            status: self.status,
            jobs: self.jobs.iter().copied().collect(),
            assigned_job: self.assigned_job,
            lat: self.lat,
            lng: self.lng,
            alt: self.alt,
            heading: self.heading,
            battery: self.battery,
            last_contact: self.last_contact,
        }
    }

    fn absorb(&mut self, outputs: Vec<VehicleEvent>, events: &mut Vec<VehicleEvent>) {
        for output in outputs {
            match &output {
                VehicleEvent::JobAccepted { job, .. } => {
                    self.pending_assignment = None;
                    info!(vehicle = self.id, job = job.as_str(), "Job accepted");
                }
                VehicleEvent::JobTimedOut { job, .. } => {
                    self.pending_assignment = None;
                    if let Some(watch) = self.error_watch.take() {
                        self.status_events.remove_handler(watch);
                    }
                    self.assigned_job = None;
                    warn!(vehicle = self.id, job = job.as_str(), "Job assignment timed out");
                }
                VehicleEvent::JobError { message, .. } => {
                    warn!(vehicle = self.id, error = ?message, "Vehicle reported an error");
                }
                VehicleEvent::InvalidBattery { .. } | VehicleEvent::StatusChanged { .. } => {}
            }
            events.push(output);
        }
    }
}
