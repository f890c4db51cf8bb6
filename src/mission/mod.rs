//! Mission state machine shared by every mission type.
//!
//! A [`Mission`] owns the bookkeeping: which vehicles hold which job, which
//! tasks are waiting and which are in flight. What is actually flown lives in
//! a [`MissionPlan`], one per mission type, which only generates tasks,
//! reacts to points of interest and derives the parameters handed to the
//! next mission.

pub mod isr_search;
pub mod payload_drop;
pub mod ugv_rescue;
pub mod uuv_rescue;
pub mod vtol_search;

use crate::events::Notification;
use crate::geo::LatLng;
use crate::jobs::{
    IsrSearchTask, JobType, QuickScanTask, RetrieveTargetTask, TakeoffTask, Task, WaypointPath,
};
use crate::keyed_queue::KeyedQueue;
use crate::message_handler::Outbound;
use crate::protocol::{Message, Payload, VehicleId};
use crate::vehicle::{Vehicle, VehicleError, VehicleEvent, VehicleStatus};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use isr_search::IsrSearchPlan;
pub use payload_drop::PayloadDropPlan;
pub use ugv_rescue::UgvRescuePlan;
pub use uuv_rescue::UuvRescuePlan;
pub use vtol_search::VtolSearchPlan;

/// Which vehicle does which job in a mission.
pub type VehicleMapping = BTreeMap<VehicleId, JobType>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissionName {
    IsrSearch,
    VtolSearch,
    PayloadDrop,
    UgvRescue,
    UuvRescue,
}

impl MissionName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionName::IsrSearch => "isrSearch",
            MissionName::VtolSearch => "vtolSearch",
            MissionName::PayloadDrop => "payloadDrop",
            MissionName::UgvRescue => "ugvRescue",
            MissionName::UuvRescue => "uuvRescue",
        }
    }

    /// Job types that must each be covered by a vehicle.
    pub fn job_types(&self) -> &'static [JobType] {
        match self {
            MissionName::IsrSearch => &[JobType::IsrSearch],
            MissionName::VtolSearch => &[JobType::QuickScan, JobType::DetailedSearch],
            MissionName::PayloadDrop => &[JobType::PayloadDrop],
            MissionName::UgvRescue => &[JobType::UgvRescue],
            MissionName::UuvRescue => &[JobType::UuvRescue],
        }
    }
}

impl fmt::Display for MissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissionStatus {
    Ready,
    Initializing,
    Waiting,
    Running,
    Complete,
}

/// Inputs to a mission, and the results a finished mission feeds forward.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MissionParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub takeoff: Option<TakeoffTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isr_search: Option<IsrSearchTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_drop: Option<WaypointPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub land: Option<WaypointPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quick_scan: Option<QuickScanTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieve_target: Option<RetrieveTargetTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliver_target: Option<LatLng>,
}

impl MissionParameters {
    /// Overlay every section `other` sets.
    pub fn merge(&mut self, other: MissionParameters) {
        let MissionParameters {
            takeoff,
            isr_search,
            payload_drop,
            land,
            quick_scan,
            retrieve_target,
            deliver_target,
        } = other;

        self.takeoff = takeoff.or(self.takeoff);
        self.isr_search = isr_search.or(self.isr_search);
        self.payload_drop = payload_drop.or(self.payload_drop);
        self.land = land.or(self.land);
        self.quick_scan = quick_scan.or(self.quick_scan);
        self.retrieve_target = retrieve_target.or(self.retrieve_target);
        self.deliver_target = deliver_target.or(self.deliver_target);
    }

    pub fn is_empty(&self) -> bool {
        *self == MissionParameters::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MissionOptions {
    pub no_takeoff: bool,
    pub no_land: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionDefinition {
    pub mission_name: MissionName,
    #[serde(default)]
    pub parameters: MissionParameters,
    #[serde(default)]
    pub options: MissionOptions,
}

impl MissionDefinition {
    pub fn new(mission_name: MissionName, parameters: MissionParameters) -> Self {
        Self {
            mission_name,
            parameters,
            options: MissionOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoiValidity {
    /// Reported by a search vehicle, not yet checked.
    Unknown,
    /// A closer look found the target.
    Confirmed,
    /// A closer look finished without finding it.
    Unconfirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub location: LatLng,
    pub vehicle: VehicleId,
    pub validity: PoiValidity,
}

/// Follow-up a plan asks the mission to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanAction {
    AddTask { job: JobType, task: Task },
    Announce(PointOfInterest),
}

#[derive(Debug, Error)]
pub enum MissionError {
    #[error("{0} has already been initialized")]
    AlreadyInitialized(MissionName),
    #[error("{0} is not waiting to start")]
    NotWaiting(MissionName),
    #[error("{mission} needs a vehicle for job {job}")]
    MissingJobCoverage { mission: MissionName, job: JobType },
    #[error("vehicle {0} has never connected")]
    UnknownVehicle(VehicleId),
    #[error("vehicle {vehicle} is {} rather than ready", .status.as_str())]
    VehicleNotReady { vehicle: VehicleId, status: VehicleStatus },
    #[error("vehicle {vehicle} does not support job {job}")]
    JobNotSupported { vehicle: VehicleId, job: JobType },
    #[error("{mission} is missing its {section} parameters")]
    MissingParameters { mission: MissionName, section: &'static str },
    #[error(transparent)]
    Vehicle(#[from] VehicleError),
}

/// What the orchestrator should do after handing a mission an input.
#[derive(Debug, Clone, PartialEq)]
pub enum MissionOutcome {
    Continue,
    Completed(MissionParameters),
    Stopped { reason: String },
}

/// Everything a mission may touch while handling one input.
pub struct MissionContext<'a> {
    pub vehicles: &'a mut BTreeMap<VehicleId, Vehicle>,
    pub link: &'a mut dyn Outbound,
    pub notifications: &'a mut Vec<Notification>,
    pub now: u64,
    pub job_timeout_ms: u64,
    pub search_margin_m: f64,
}

impl MissionContext<'_> {
    pub fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }

    fn vehicle_name(&self, id: VehicleId) -> String {
        self.vehicles
            .get(&id)
            .map_or_else(|| format!("vehicle {id}"), |vehicle| vehicle.name().to_string())
    }
}

/// The parts of a mission that differ by mission type.
pub trait MissionPlan: fmt::Debug + Send {
    fn name(&self) -> MissionName;

    /// Tasks to queue when the mission starts, in order, per job.
    fn generate_tasks(
        &mut self,
        parameters: &MissionParameters,
        options: &MissionOptions,
    ) -> Result<Vec<(JobType, Task)>, MissionError>;

    fn on_task_assigned(&mut self, _vehicle: VehicleId, _job: JobType, _task: &Task) {}

    fn on_point_of_interest(&mut self, _vehicle: VehicleId, _job: JobType, _location: LatLng) -> Vec<PlanAction> {
        Vec::new()
    }

    fn on_task_complete(&mut self, _vehicle: VehicleId, _job: JobType, _task: &Task) -> Vec<PlanAction> {
        Vec::new()
    }

    /// Ordering key for queued tasks of `job`, lowest first, relative to the
    /// vehicle that will take the task. `None` keeps insertion order.
    fn task_rank(&self, _job: JobType, _task: &Task, _anchor: Option<LatLng>) -> Option<f64> {
        None
    }

    /// Parameters for the next mission, or `None` when the mission ran out
    /// of work without achieving anything.
    fn completion_parameters(&self, collected: &[LatLng], margin_m: f64) -> Option<MissionParameters>;
}

pub fn plan_for(name: MissionName) -> Box<dyn MissionPlan> {
    match name {
        MissionName::IsrSearch => Box::new(IsrSearchPlan::new()),
        MissionName::VtolSearch => Box::new(VtolSearchPlan::new()),
        MissionName::PayloadDrop => Box::new(PayloadDropPlan::new()),
        MissionName::UgvRescue => Box::new(UgvRescuePlan::new()),
        MissionName::UuvRescue => Box::new(UuvRescuePlan::new()),
    }
}

#[derive(Debug)]
pub struct Mission {
    definition: MissionDefinition,
    plan: Box<dyn MissionPlan>,
    status: MissionStatus,
    mapping: VehicleMapping,
    awaiting_acceptance: BTreeSet<VehicleId>,
    waiting_tasks: KeyedQueue<JobType, Task>,
    waiting_vehicles: KeyedQueue<JobType, VehicleId>,
    active_tasks: BTreeMap<VehicleId, Task>,
    collected: Vec<LatLng>,
}

impl Mission {
    pub fn new(definition: MissionDefinition) -> Self {
        let plan = plan_for(definition.mission_name);
        Self::with_plan(definition, plan)
    }

    pub fn with_plan(definition: MissionDefinition, plan: Box<dyn MissionPlan>) -> Self {
        Self {
            definition,
            plan,
            status: MissionStatus::Ready,
            mapping: VehicleMapping::new(),
            awaiting_acceptance: BTreeSet::new(),
            waiting_tasks: KeyedQueue::new(),
            waiting_vehicles: KeyedQueue::new(),
            active_tasks: BTreeMap::new(),
            collected: Vec::new(),
        }
    }

    pub fn name(&self) -> MissionName {
        self.plan.name()
    }

    pub fn status(&self) -> MissionStatus {
        self.status
    }

    pub fn definition(&self) -> &MissionDefinition {
        &self.definition
    }

    pub fn mapping(&self) -> &VehicleMapping {
        &self.mapping
    }

    pub fn participates(&self, vehicle: VehicleId) -> bool {
        self.mapping.contains_key(&vehicle)
    }

    pub fn active_task(&self, vehicle: VehicleId) -> Option<&Task> {
        self.active_tasks.get(&vehicle)
    }

    pub fn waiting_task_count(&self) -> usize {
        self.waiting_tasks.len()
    }

    pub fn waiting_tasks(&self, job: JobType) -> impl Iterator<Item = &Task> {
        self.waiting_tasks.iter_key(&job)
    }

    pub fn is_idle(&self, vehicle: VehicleId) -> bool {
        self.waiting_vehicles.iter().any(|(_, id)| *id == vehicle)
    }

    pub fn collected_points(&self) -> &[LatLng] {
        &self.collected
    }

    /// Check the mapping and send every vehicle its job.
    ///
    /// Nothing is sent unless every job type is covered and every mapped
    /// vehicle is ready. Entries for job types this mission does not use are
    /// dropped. The mission moves on to `waiting` once every vehicle accepts.
    pub fn initialize(&mut self, mapping: &VehicleMapping, ctx: &mut MissionContext<'_>) -> Result<(), MissionError> {
        let name = self.name();
        if self.status != MissionStatus::Ready {
            return Err(MissionError::AlreadyInitialized(name));
        }

        let required = name.job_types();
        let mapping: VehicleMapping = mapping
            .iter()
            .filter(|(vehicle, job)| {
                let used = required.contains(*job);
                if !used {
                    debug!(mission = name.as_str(), vehicle = **vehicle, job = job.as_str(), "Ignoring unused job mapping");
                }
                used
            })
            .map(|(vehicle, job)| (*vehicle, *job))
            .collect();

        for job in required {
            if !mapping.values().any(|mapped| mapped == job) {
                return Err(MissionError::MissingJobCoverage { mission: name, job: *job });
            }
        }
        for (id, job) in &mapping {
            let vehicle = ctx.vehicles.get(id).ok_or(MissionError::UnknownVehicle(*id))?;
            if vehicle.status() != VehicleStatus::Ready {
                return Err(MissionError::VehicleNotReady { vehicle: *id, status: vehicle.status() });
            }
            if !vehicle.supports(*job) {
                return Err(MissionError::JobNotSupported { vehicle: *id, job: *job });
            }
        }

        self.mapping = mapping;
        self.status = MissionStatus::Initializing;
        info!(mission = name.as_str(), vehicles = self.mapping.len(), "Initializing mission");

        let assignments: Vec<(VehicleId, JobType)> = self.mapping.iter().map(|(v, j)| (*v, *j)).collect();
        for (id, job) in assignments {
            let result = match ctx.vehicles.get_mut(&id) {
                Some(vehicle) => vehicle
                    .assign_job(job, &mut *ctx.link, ctx.now, ctx.job_timeout_ms)
                    .map_err(MissionError::from),
                None => Err(MissionError::UnknownVehicle(id)),
            };
            if let Err(e) = result {
                // Only vehicles that were actually sent a job get told to stop
                self.mapping.retain(|vehicle, _| self.awaiting_acceptance.contains(vehicle));
                self.halt(format!("Failed to assign job {job} to {}: {e}", ctx.vehicle_name(id)), ctx);
                return Err(e);
            }
            self.awaiting_acceptance.insert(id);
        }

        Ok(())
    }

    /// React to a job-assignment result or error report from a vehicle.
    pub fn on_vehicle_event(&mut self, event: &VehicleEvent, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        match event {
            VehicleEvent::JobAccepted { vehicle, .. } => {
                if self.status != MissionStatus::Initializing || !self.awaiting_acceptance.remove(vehicle) {
                    return MissionOutcome::Continue;
                }
                if !self.awaiting_acceptance.is_empty() {
                    return MissionOutcome::Continue;
                }

                self.status = MissionStatus::Waiting;
                ctx.notify(Notification::info(format!("All vehicles accepted their jobs for {}", self.name())));

                let parameters = self.definition.parameters.clone();
                match self.start(&parameters, ctx) {
                    Ok(outcome) => outcome,
                    Err(e) => self.halt(e.to_string(), ctx),
                }
            }
            VehicleEvent::JobTimedOut { vehicle, job } if self.participates(*vehicle) => {
                if matches!(self.status, MissionStatus::Initializing | MissionStatus::Waiting) {
                    let reason = format!("Failed to assign job {job} to {}: timed out", ctx.vehicle_name(*vehicle));
                    self.halt(reason, ctx)
                } else {
                    MissionOutcome::Continue
                }
            }
            VehicleEvent::JobError { vehicle, message, .. } if self.participates(*vehicle) => {
                let detail = message.as_deref().unwrap_or("no details");
                let reason = format!("{} reported an error: {detail}", ctx.vehicle_name(*vehicle));
                match self.status {
                    MissionStatus::Initializing | MissionStatus::Waiting => self.halt(reason, ctx),
                    MissionStatus::Running => self.handle_unresponsive_vehicle(*vehicle, &reason, ctx),
                    MissionStatus::Ready | MissionStatus::Complete => MissionOutcome::Continue,
                }
            }
            _ => MissionOutcome::Continue,
        }
    }

    /// Generate tasks and hand out the first round.
    pub fn start(&mut self, parameters: &MissionParameters, ctx: &mut MissionContext<'_>) -> Result<MissionOutcome, MissionError> {
        if self.status != MissionStatus::Waiting {
            return Err(MissionError::NotWaiting(self.name()));
        }

        let options = self.definition.options;
        let tasks = self.plan.generate_tasks(parameters, &options)?;
        for (job, task) in tasks {
            if self.mapping.values().any(|mapped| *mapped == job) {
                self.add_task(job, task, ctx);
            } else {
                debug!(mission = self.name().as_str(), job = job.as_str(), "Dropping task with no vehicle for its job");
            }
        }

        let idle: Vec<(VehicleId, JobType)> = self.mapping.iter().map(|(v, j)| (*v, *j)).collect();
        for (vehicle, job) in idle {
            self.waiting_vehicles.push(job, vehicle);
        }

        self.status = MissionStatus::Running;
        info!(mission = self.name().as_str(), tasks = self.waiting_tasks.len(), "Mission running");
        self.assign_waiting(ctx);

        Ok(self.check_finished(ctx))
    }

    /// Hand a message from a participating vehicle to the mission.
    pub fn update(&mut self, message: &Message, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        if self.status != MissionStatus::Running {
            debug!(mission = self.name().as_str(), message_type = message.message_type(), "Mission not running, ignoring");
            return MissionOutcome::Continue;
        }
        let Some(job) = self.mapping.get(&message.sid).copied() else {
            return MissionOutcome::Continue;
        };

        match &message.payload {
            Payload::Poi(location) => {
                self.collected.push(*location);
                ctx.notify(Notification::info(format!(
                    "{} found a point of interest at ({:.6}, {:.6})",
                    ctx.vehicle_name(message.sid),
                    location.lat,
                    location.lng
                )));
                let actions = self.plan.on_point_of_interest(message.sid, job, *location);
                self.apply(actions, ctx);
                MissionOutcome::Continue
            }
            Payload::Complete => self.complete_task(message.sid, job, ctx),
            _ => MissionOutcome::Continue,
        }
    }

    /// Queue a task for `job`, ordered by the plan's rank if it has one, and
    /// hand it straight to an idle vehicle if the mission is running.
    pub fn add_task(&mut self, job: JobType, task: Task, ctx: &mut MissionContext<'_>) {
        let anchor = self.anchor_for(job, ctx);
        match self.plan.task_rank(job, &task, anchor) {
            Some(rank) => {
                let plan = &self.plan;
                let index = self
                    .waiting_tasks
                    .iter_key(&job)
                    .position(|queued| plan.task_rank(job, queued, anchor).map_or(true, |r| r > rank))
                    .unwrap_or_else(|| self.waiting_tasks.size(&job));
                self.waiting_tasks.insert(job, index, task);
            }
            None => {
                self.waiting_tasks.push(job, task);
            }
        }

        if self.status == MissionStatus::Running {
            self.assign_waiting(ctx);
        }
    }

    /// Take a vehicle out of the mission. Its task goes back to the front of
    /// the queue for another vehicle with the same job.
    pub fn handle_unresponsive_vehicle(
        &mut self,
        vehicle_id: VehicleId,
        reason: &str,
        ctx: &mut MissionContext<'_>,
    ) -> MissionOutcome {
        let Some(job) = self.mapping.remove(&vehicle_id) else {
            return MissionOutcome::Continue;
        };
        warn!(mission = self.name().as_str(), vehicle = vehicle_id, reason, "Vehicle dropped from mission");
        ctx.notify(Notification::failure(reason.to_string()));

        self.awaiting_acceptance.remove(&vehicle_id);
        self.waiting_vehicles.remove_all(&job, |id| *id == vehicle_id);
        if let Some(task) = self.active_tasks.remove(&vehicle_id) {
            self.waiting_tasks.push_front(job, task);
        }
        if let Some(vehicle) = ctx.vehicles.get_mut(&vehicle_id) {
            ctx.link.purge(vehicle_id);
            if let Err(e) = vehicle.stop(&mut *ctx.link, ctx.now) {
                warn!(vehicle = vehicle_id, error = %e, "Failed to stop vehicle");
            }
        }

        if !self.mapping.values().any(|mapped| *mapped == job) {
            return self.halt(format!("No vehicles remain for job {job} in {}", self.name()), ctx);
        }

        self.assign_waiting(ctx);
        self.check_finished(ctx)
    }

    /// A participating vehicle disconnected.
    pub fn on_vehicle_lost(&mut self, vehicle: VehicleId, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        if !self.participates(vehicle) {
            return MissionOutcome::Continue;
        }
        let name = ctx.vehicle_name(vehicle);
        match self.status {
            MissionStatus::Initializing | MissionStatus::Waiting => {
                self.halt(format!("{name} disconnected while {} was starting", self.name()), ctx)
            }
            MissionStatus::Running => {
                self.handle_unresponsive_vehicle(vehicle, &format!("{name} disconnected"), ctx)
            }
            MissionStatus::Ready | MissionStatus::Complete => MissionOutcome::Continue,
        }
    }

    pub fn pause(&mut self, ctx: &mut MissionContext<'_>) {
        for id in self.mapping.keys() {
            if let Some(vehicle) = ctx.vehicles.get_mut(id) {
                if let Err(e) = vehicle.pause(&mut *ctx.link, ctx.now) {
                    warn!(vehicle = *id, error = %e, "Failed to pause vehicle");
                }
            }
        }
    }

    pub fn resume(&mut self, ctx: &mut MissionContext<'_>) {
        for id in self.mapping.keys() {
            if let Some(vehicle) = ctx.vehicles.get_mut(id) {
                if let Err(e) = vehicle.resume(&mut *ctx.link, ctx.now) {
                    warn!(vehicle = *id, error = %e, "Failed to resume vehicle");
                }
            }
        }
    }

    /// Stop the mission and every vehicle in it.
    pub fn stop(&mut self, reason: &str, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        if matches!(self.status, MissionStatus::Ready | MissionStatus::Complete) && self.mapping.is_empty() {
            return MissionOutcome::Stopped { reason: reason.to_string() };
        }
        self.halt(reason.to_string(), ctx)
    }

    fn complete_task(&mut self, vehicle: VehicleId, job: JobType, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        let Some(task) = self.active_tasks.remove(&vehicle) else {
            debug!(mission = self.name().as_str(), vehicle, "Completion from a vehicle with no active task");
            return MissionOutcome::Continue;
        };
        debug!(mission = self.name().as_str(), vehicle, task = task.task_type(), "Task complete");

        let actions = self.plan.on_task_complete(vehicle, job, &task);
        self.apply(actions, ctx);

        if !self.give_next_task(vehicle, job, ctx) {
            self.waiting_vehicles.push(job, vehicle);
        }
        self.check_finished(ctx)
    }

    fn apply(&mut self, actions: Vec<PlanAction>, ctx: &mut MissionContext<'_>) {
        for action in actions {
            match action {
                PlanAction::AddTask { job, task } => self.add_task(job, task, ctx),
                PlanAction::Announce(poi) => ctx.notify(Notification::PointOfInterest(poi)),
            }
        }
    }

    /// Pair idle vehicles with queued tasks of the same job, FIFO on both sides.
    fn assign_waiting(&mut self, ctx: &mut MissionContext<'_>) {
        let jobs: Vec<JobType> = self.waiting_vehicles.keys().copied().collect();
        for job in jobs {
            while self.waiting_tasks.size(&job) > 0 {
                let Some(vehicle) = self.waiting_vehicles.shift(&job) else {
                    break;
                };
                if !self.give_next_task(vehicle, job, ctx) {
                    self.waiting_vehicles.push_front(job, vehicle);
                    break;
                }
            }
        }
    }

    fn give_next_task(&mut self, vehicle_id: VehicleId, job: JobType, ctx: &mut MissionContext<'_>) -> bool {
        let anchor = ctx.vehicles.get(&vehicle_id).map(Vehicle::position);
        self.rerank(job, anchor);

        let Some(task) = self.waiting_tasks.shift(&job) else {
            return false;
        };
        let Some(vehicle) = ctx.vehicles.get_mut(&vehicle_id) else {
            self.waiting_tasks.push_front(job, task);
            return false;
        };

        match vehicle.assign_task(&task, &mut *ctx.link, ctx.now) {
            Ok(_) => {
                self.plan.on_task_assigned(vehicle_id, job, &task);
                self.active_tasks.insert(vehicle_id, task);
                true
            }
            Err(e) => {
                warn!(vehicle = vehicle_id, error = %e, "Failed to send task");
                ctx.notify(Notification::failure(format!("Failed to send task to {}: {e}", ctx.vehicle_name(vehicle_id))));
                self.waiting_tasks.push_front(job, task);
                false
            }
        }
    }

    fn rerank(&mut self, job: JobType, anchor: Option<LatLng>) {
        let plan = &self.plan;
        self.waiting_tasks.sort_by(&job, |a, b| {
            let rank_a = plan.task_rank(job, a, anchor).unwrap_or(f64::INFINITY);
            let rank_b = plan.task_rank(job, b, anchor).unwrap_or(f64::INFINITY);
            rank_a.total_cmp(&rank_b)
        });
    }

    fn anchor_for(&self, job: JobType, ctx: &MissionContext<'_>) -> Option<LatLng> {
        self.mapping
            .iter()
            .find(|(_, mapped)| **mapped == job)
            .and_then(|(id, _)| ctx.vehicles.get(id))
            .map(Vehicle::position)
    }

    fn check_finished(&mut self, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        if self.status != MissionStatus::Running || !self.active_tasks.is_empty() || !self.waiting_tasks.is_empty() {
            return MissionOutcome::Continue;
        }

        match self.plan.completion_parameters(&self.collected, ctx.search_margin_m) {
            Some(parameters) => {
                self.stop_vehicles(ctx);
                self.status = MissionStatus::Complete;
                info!(mission = self.name().as_str(), "Mission complete");
                ctx.notify(Notification::success(format!("{} complete", self.name())));
                MissionOutcome::Completed(parameters)
            }
            None => self.halt(format!("No parameters were generated from {}", self.name()), ctx),
        }
    }

    /// Stop every vehicle and fall back to `ready`.
    fn halt(&mut self, reason: String, ctx: &mut MissionContext<'_>) -> MissionOutcome {
        warn!(mission = self.name().as_str(), reason = reason.as_str(), "Mission stopped");
        self.stop_vehicles(ctx);

        self.status = MissionStatus::Ready;
        self.awaiting_acceptance.clear();
        self.waiting_tasks.clear();
        self.waiting_vehicles.clear();
        self.active_tasks.clear();
        ctx.notify(Notification::failure(reason.clone()));

        MissionOutcome::Stopped { reason }
    }

    fn stop_vehicles(&mut self, ctx: &mut MissionContext<'_>) {
        for id in self.mapping.keys() {
            let Some(vehicle) = ctx.vehicles.get_mut(id) else {
                continue;
            };
            ctx.link.purge(*id);
            if let Err(e) = vehicle.stop(&mut *ctx.link, ctx.now) {
                warn!(vehicle = *id, error = %e, "Failed to stop vehicle");
            }
        }
    }
}
