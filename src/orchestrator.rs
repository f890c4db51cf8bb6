use crate::config::StationConfig;
use crate::events::{Notification, StationCommand};
use crate::jobs::JobType;
use crate::message_handler::{LinkEvent, MessageHandler, Outbound, Reception};
use crate::mission::{
    Mission, MissionContext, MissionDefinition, MissionError, MissionName, MissionOutcome, MissionParameters,
    MissionStatus, VehicleMapping,
};
use crate::protocol::{Message, Payload, VehicleId};
use crate::scheduler::{TimerId, TimerScheduler};
use crate::vehicle::{Vehicle, VehicleError, VehicleEvent, VehicleStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StationTimer {
    LivenessCheck(VehicleId),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub running: bool,
    pub current_mission: Option<usize>,
    pub require_confirmation: bool,
    pub awaiting_confirmation: bool,
    pub missions_completed: u32,
    pub frames_processed: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("a mission sequence is already running")]
    AlreadyRunning,
    #[error("no missions were given")]
    NoMissions,
    #[error("no mission sequence is running")]
    NotRunning,
    #[error("expected completion of {expected}, got {reported}")]
    UnexpectedMission { expected: MissionName, reported: MissionName },
    #[error("the current mission is still in progress")]
    MissionInProgress,
    #[error("no mission is waiting for confirmation")]
    NothingToConfirm,
    #[error("no missions remain in the sequence")]
    NoNextMission,
    #[error("vehicle {0} has never connected")]
    UnknownVehicle(VehicleId),
    #[error("vehicle {0} is part of the running mission")]
    VehicleBusy(VehicleId),
    #[error(transparent)]
    Mission(#[from] MissionError),
    #[error(transparent)]
    Vehicle(#[from] VehicleError),
}

/// Top-level coordinator for the ground station.
///
/// Owns the vehicles, the link and the mission sequence. It never blocks or
/// reads a clock: the caller feeds it frames, commands and the current time,
/// and collects frames to transmit and notifications for the operator.
#[derive(Debug)]
pub struct Orchestrator {
    config: StationConfig,
    link: MessageHandler,
    vehicles: BTreeMap<VehicleId, Vehicle>,

    mission: Option<Mission>,
    missions: Vec<MissionDefinition>,
    mapping: VehicleMapping,

    timers: TimerScheduler<StationTimer>,
    pingers: BTreeMap<VehicleId, TimerId>,

    notifications: Vec<Notification>,
    state: OrchestratorState,
}

impl Orchestrator {
    pub fn new(config: StationConfig) -> Self {
        let link = MessageHandler::new(&config);
        Self {
            config,
            link,
            vehicles: BTreeMap::new(),
            mission: None,
            missions: Vec::new(),
            mapping: VehicleMapping::new(),
            timers: TimerScheduler::new(),
            pingers: BTreeMap::new(),
            notifications: Vec::new(),
            state: OrchestratorState::default(),
        }
    }

    /// Process one frame from the radio.
    pub fn handle_frame(&mut self, frame: &str, now: u64) {
        // Deadlines that already passed are settled before the late message is seen
        self.poll(now);
        self.state.frames_processed += 1;

        match self.link.receive(frame, now) {
            Reception::Deliver { message, is_new } => self.dispatch(message, is_new, now),
            Reception::Acknowledged { vehicle, .. } => self.touch(vehicle, now),
            Reception::Rejected { sid, error } => {
                let text = match sid {
                    Some(id) if self.link.is_known(id) => format!("Rejected message from {}: {error}", self.vehicle_name(id)),
                    _ => format!("Dropped unreadable message: {error}"),
                };
                self.notifications.push(Notification::failure(text));
            }
            Reception::Ignored { sid } => debug!(sid, "Ignored message"),
        }
    }

    /// Run every timer due at `now`: retransmissions and unacknowledged
    /// messages, job-assignment windows and liveness checks.
    pub fn poll(&mut self, now: u64) {
        for event in self.link.poll(now) {
            if let LinkEvent::Expired { vehicle, message_type, .. } = event {
                self.notifications.push(Notification::failure(format!(
                    "{} did not acknowledge {message_type}",
                    self.vehicle_name(vehicle)
                )));
                self.disconnect_vehicle(vehicle, now);
            }
        }

        let ids: Vec<VehicleId> = self.vehicles.keys().copied().collect();
        for id in ids {
            let events = self.vehicles.get_mut(&id).map(|vehicle| vehicle.poll(now)).unwrap_or_default();
            self.handle_vehicle_events(events, now);
        }

        for timer in self.timers.take_due(now) {
            match timer.payload {
                StationTimer::LivenessCheck(id) => self.check_liveness(id, now),
            }
        }
    }

    /// Apply a command from the operator. Failures are also reported as a
    /// log notification.
    pub fn handle_command(&mut self, command: StationCommand, now: u64) -> Result<(), OrchestratorError> {
        self.poll(now);

        let result = match command {
            StationCommand::StartMissions { missions, active_vehicle_mapping, require_confirmation } => {
                self.start_missions(missions, active_vehicle_mapping, require_confirmation, now)
            }
            StationCommand::StartNextMission => self.start_next_mission(now),
            StationCommand::StopMissions => {
                self.stop_missions(now);
                Ok(())
            }
            StationCommand::PauseMissions => self.pause_missions(now),
            StationCommand::ResumeMissions => self.resume_missions(now),
            StationCommand::SendJob { vehicle, job_type } => self.send_job(vehicle, job_type, now),
            StationCommand::UpdateVehicleMapping { mapping } => self.update_vehicle_mapping(mapping),
        };

        if let Err(e) = &result {
            warn!(error = %e, "Command failed");
            self.state.last_error = Some(e.to_string());
            self.notifications.push(Notification::failure(e.to_string()));
        }
        result
    }

    /// Begin a sequence of missions. `mapping`, when given, replaces the
    /// stored vehicle mapping.
    pub fn start_missions(
        &mut self,
        missions: Vec<MissionDefinition>,
        mapping: Option<VehicleMapping>,
        require_confirmation: bool,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        if self.state.running {
            return Err(OrchestratorError::AlreadyRunning);
        }
        if missions.is_empty() {
            return Err(OrchestratorError::NoMissions);
        }
        if let Some(mapping) = mapping {
            self.mapping = mapping;
        }

        let names = missions.iter().map(|definition| definition.mission_name).collect();
        self.missions = missions;
        self.state.running = true;
        self.state.require_confirmation = require_confirmation;
        self.state.awaiting_confirmation = false;
        self.state.current_mission = None;

        info!(count = self.missions.len(), require_confirmation, "Starting mission sequence");
        self.notifications.push(Notification::MissionsStarted { missions: names });
        self.start_mission_at(0, now)
    }

    /// Accept the results of the current mission and move the sequence on.
    pub fn complete_mission(
        &mut self,
        name: MissionName,
        parameters: MissionParameters,
        now: u64,
    ) -> Result<(), OrchestratorError> {
        if !self.state.running {
            return Err(OrchestratorError::NotRunning);
        }
        let index = self.state.current_mission.ok_or(OrchestratorError::NotRunning)?;
        let expected = self.missions.get(index).map(|d| d.mission_name).ok_or(OrchestratorError::NotRunning)?;
        if name != expected {
            return Err(OrchestratorError::UnexpectedMission { expected, reported: name });
        }
        if self.mission.as_ref().is_some_and(|m| m.status() != MissionStatus::Complete) {
            return Err(OrchestratorError::MissionInProgress);
        }

        self.mission = None;
        self.state.missions_completed += 1;
        info!(mission = name.as_str(), "Mission completed");
        self.notifications.push(Notification::MissionCompleted { mission: name, parameters: parameters.clone() });

        let Some(next) = self.missions.get_mut(index + 1) else {
            self.notifications.push(Notification::success("All missions complete"));
            self.notifications.push(Notification::MissionsFinished { parameters });
            self.reset_sequence();
            return Ok(());
        };
        next.parameters.merge(parameters);
        let next_name = next.mission_name;

        if self.state.require_confirmation {
            self.state.awaiting_confirmation = true;
            self.notifications.push(Notification::ConfirmNextMission { next: next_name });
            Ok(())
        } else {
            self.start_mission_at(index + 1, now)
        }
    }

    /// Start the next mission after the operator confirms.
    pub fn start_next_mission(&mut self, now: u64) -> Result<(), OrchestratorError> {
        if !self.state.running {
            return Err(OrchestratorError::NotRunning);
        }
        if !self.state.awaiting_confirmation {
            return Err(OrchestratorError::NothingToConfirm);
        }
        let next = self.state.current_mission.map_or(0, |index| index + 1);
        self.start_mission_at(next, now)
    }

    /// Stop whatever is running and forget the sequence. Safe to call at
    /// any time.
    pub fn stop_missions(&mut self, now: u64) {
        let was_running = self.state.running || self.mission.is_some();

        if let Some(mission) = self.mission.as_ref() {
            let vehicles: Vec<VehicleId> = mission.mapping().keys().copied().collect();
            if mission.status() != MissionStatus::Complete {
                self.with_mission(now, |mission, ctx| mission.stop("Missions stopped", ctx));
            }
            for id in vehicles {
                if let Some(timer) = self.pingers.remove(&id) {
                    self.timers.cancel(timer);
                }
            }
        }

        self.reset_sequence();
        if was_running {
            info!("Mission sequence stopped");
            self.notifications.push(Notification::MissionsStopped);
        }
    }

    pub fn pause_missions(&mut self, now: u64) -> Result<(), OrchestratorError> {
        if !self.state.running {
            return Err(OrchestratorError::NotRunning);
        }
        self.with_mission(now, |mission, ctx| mission.pause(ctx));
        self.notifications.push(Notification::MissionsPaused);
        Ok(())
    }

    pub fn resume_missions(&mut self, now: u64) -> Result<(), OrchestratorError> {
        if !self.state.running {
            return Err(OrchestratorError::NotRunning);
        }
        self.with_mission(now, |mission, ctx| mission.resume(ctx));
        self.notifications.push(Notification::MissionsResumed);
        Ok(())
    }

    /// Give a vehicle a job outside of any mission.
    pub fn send_job(&mut self, vehicle_id: VehicleId, job: JobType, now: u64) -> Result<(), OrchestratorError> {
        if self.mission.as_ref().is_some_and(|m| m.participates(vehicle_id)) {
            return Err(OrchestratorError::VehicleBusy(vehicle_id));
        }
        let vehicle = self
            .vehicles
            .get_mut(&vehicle_id)
            .ok_or(OrchestratorError::UnknownVehicle(vehicle_id))?;

        vehicle.assign_job(job, &mut self.link, now, self.config.job_assignment_timeout_ms)?;
        self.notifications.push(Notification::info(format!("Sent job {job} to {}", self.vehicle_name(vehicle_id))));
        Ok(())
    }

    /// Replace the mapping used by the next sequence.
    pub fn update_vehicle_mapping(&mut self, mapping: VehicleMapping) -> Result<(), OrchestratorError> {
        if self.state.running {
            return Err(OrchestratorError::AlreadyRunning);
        }
        self.mapping = mapping;
        Ok(())
    }

    /// Frames to write to the radio, oldest first.
    pub fn drain_frames(&mut self) -> Vec<String> {
        self.link.drain_frames()
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(&id)
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    pub fn mission(&self) -> Option<&Mission> {
        self.mission.as_ref()
    }

    pub fn missions(&self) -> &[MissionDefinition] {
        &self.missions
    }

    pub fn mapping(&self) -> &VehicleMapping {
        &self.mapping
    }

    pub fn link(&self) -> &MessageHandler {
        &self.link
    }

    pub fn config(&self) -> &StationConfig {
        &self.config
    }

    pub fn get_state(&self) -> &OrchestratorState {
        &self.state
    }

    pub fn has_pinger(&self, vehicle: VehicleId) -> bool {
        self.pingers.contains_key(&vehicle)
    }

    fn dispatch(&mut self, message: Message, is_new: bool, now: u64) {
        match &message.payload {
            Payload::Connect { jobs_available } => {
                if is_new {
                    let jobs = jobs_available.clone();
                    self.handle_connect(message.sid, jobs, now);
                } else {
                    self.touch(message.sid, now);
                }
            }
            Payload::BadMessage { error } => {
                self.touch(message.sid, now);
                if is_new {
                    let detail = error.as_deref().unwrap_or("no details");
                    self.notifications.push(Notification::failure(format!(
                        "{} rejected a message: {detail}",
                        self.vehicle_name(message.sid)
                    )));
                }
            }
            Payload::Update(_) | Payload::Poi(_) | Payload::Complete => {
                self.handle_vehicle_message(&message, is_new, now);
            }
            _ => debug!(vehicle = message.sid, message_type = message.message_type(), "Unexpected message type"),
        }
    }

    fn handle_connect(&mut self, id: VehicleId, mut jobs: Vec<JobType>, now: u64) {
        if jobs.is_empty() {
            jobs = self.config.vehicles.get(&id).map(|info| info.jobs.clone()).unwrap_or_default();
        }

        let was_connected = match self.vehicles.get_mut(&id) {
            Some(vehicle) => {
                let was_connected = vehicle.is_connected();
                vehicle.connect(jobs, now);
                was_connected
            }
            None => {
                let (name, vehicle_type) = self
                    .config
                    .vehicles
                    .get(&id)
                    .map_or_else(|| (format!("vehicle {id}"), String::new()), |info| (info.name.clone(), info.vehicle_type.clone()));
                self.vehicles.insert(id, Vehicle::new(id, &name, &vehicle_type, jobs, now));
                false
            }
        };

        if let Err(e) = self.link.send(id, Payload::ConnectionAck, now) {
            warn!(vehicle = id, error = %e, "Failed to send connection ack");
        }

        if let Some(timer) = self.pingers.remove(&id) {
            self.timers.cancel(timer);
        }
        self.ensure_pinger(id, now);

        let name = self.vehicle_name(id);
        if was_connected {
            // A connect from a vehicle we thought was up means it restarted
            self.notifications.push(Notification::info(format!("{name} reconnected")));
            if self.mission.as_ref().is_some_and(|m| m.participates(id)) {
                let outcome = self.with_mission(now, |mission, ctx| mission.on_vehicle_lost(id, ctx));
                self.handle_outcome(outcome, now);
            }
        } else {
            self.notifications.push(Notification::success(format!("{name} connected")));
        }
        self.notifications.push(Notification::VehicleConnected { vehicle: id });
        self.push_snapshot(id);
    }

    fn handle_vehicle_message(&mut self, message: &Message, is_new: bool, now: u64) {
        let sid = message.sid;
        let Some(vehicle) = self.vehicles.get_mut(&sid) else {
            debug!(vehicle = sid, "Message from a vehicle that has not connected");
            return;
        };
        if !vehicle.is_connected() {
            debug!(vehicle = sid, "Message from a disconnected vehicle");
            return;
        }
        vehicle.touch(now);
        self.ensure_pinger(sid, now);
        if !is_new {
            return;
        }

        if let Payload::Update(telemetry) = &message.payload {
            let events = self
                .vehicles
                .get_mut(&sid)
                .map(|vehicle| vehicle.apply_telemetry(telemetry, now))
                .unwrap_or_default();
            self.push_snapshot(sid);
            self.handle_vehicle_events(events, now);
        }

        if self.mission.as_ref().is_some_and(|m| m.participates(sid)) {
            let outcome = self.with_mission(now, |mission, ctx| mission.update(message, ctx));
            self.handle_outcome(outcome, now);
            return;
        }

        match message.payload {
            Payload::Update(_) => self.stop_stray_vehicle(sid, now),
            _ => self.notifications.push(Notification::failure(format!(
                "{} sent {} outside of a mission",
                self.vehicle_name(sid),
                message.message_type()
            ))),
        }
    }

    /// A vehicle working with no job and no mission is told to stop.
    fn stop_stray_vehicle(&mut self, id: VehicleId, now: u64) {
        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };
        let busy = matches!(vehicle.status(), VehicleStatus::Running | VehicleStatus::Paused);
        if !busy || vehicle.assigned_job().is_some() {
            return;
        }
        if self.link.pending_for(id).any(|m| m.payload == Payload::Stop) {
            return;
        }

        warn!(vehicle = id, "Vehicle is running without a mission, stopping it");
        if let Err(e) = vehicle.stop(&mut self.link, now) {
            warn!(vehicle = id, error = %e, "Failed to stop vehicle");
        }
    }

    fn handle_vehicle_events(&mut self, events: Vec<VehicleEvent>, now: u64) {
        for event in events {
            match &event {
                VehicleEvent::InvalidBattery { vehicle, value } => {
                    self.notifications.push(Notification::failure(format!(
                        "{} reported an invalid battery level of {value}",
                        self.vehicle_name(*vehicle)
                    )));
                }
                VehicleEvent::StatusChanged { .. } => {}
                VehicleEvent::JobAccepted { vehicle, job }
                | VehicleEvent::JobTimedOut { vehicle, job }
                | VehicleEvent::JobError { vehicle, job, .. } => {
                    let vehicle = *vehicle;
                    if self.mission.as_ref().is_some_and(|m| m.participates(vehicle)) {
                        let outcome = self.with_mission(now, |mission, ctx| mission.on_vehicle_event(&event, ctx));
                        self.handle_outcome(outcome, now);
                        continue;
                    }

                    let name = self.vehicle_name(vehicle);
                    let notification = match &event {
                        VehicleEvent::JobAccepted { .. } => Notification::success(format!("{name} accepted job {job}")),
                        VehicleEvent::JobTimedOut { .. } => {
                            Notification::failure(format!("{name} did not accept job {job} in time"))
                        }
                        _ => Notification::failure(format!("{name} reported an error during job {job}")),
                    };
                    self.notifications.push(notification);
                }
            }
        }
    }

    fn handle_outcome(&mut self, outcome: Option<MissionOutcome>, now: u64) {
        match outcome {
            None | Some(MissionOutcome::Continue) => {}
            Some(MissionOutcome::Completed(parameters)) => {
                let Some(name) = self.mission.as_ref().map(Mission::name) else {
                    return;
                };
                if let Err(e) = self.complete_mission(name, parameters, now) {
                    warn!(error = %e, "Could not advance the mission sequence");
                    self.state.last_error = Some(e.to_string());
                    self.notifications.push(Notification::failure(e.to_string()));
                }
            }
            Some(MissionOutcome::Stopped { reason }) => {
                if let Some(mission) = self.mission.take() {
                    self.end_sequence(mission.name(), mission.definition().parameters.clone(), reason);
                }
            }
        }
    }

    fn start_mission_at(&mut self, index: usize, now: u64) -> Result<(), OrchestratorError> {
        let definition = self.missions.get(index).cloned().ok_or(OrchestratorError::NoNextMission)?;
        self.state.current_mission = Some(index);
        self.state.awaiting_confirmation = false;

        let name = definition.mission_name;
        let parameters = definition.parameters.clone();
        let mut mission = Mission::new(definition);
        let mapping = self.mapping.clone();

        let result = {
            let mut ctx = MissionContext {
                vehicles: &mut self.vehicles,
                link: &mut self.link,
                notifications: &mut self.notifications,
                now,
                job_timeout_ms: self.config.job_assignment_timeout_ms,
                search_margin_m: self.config.search_margin_meters,
            };
            mission.initialize(&mapping, &mut ctx)
        };

        match result {
            Ok(()) => {
                info!(mission = name.as_str(), index, "Mission initializing");
                self.mission = Some(mission);
                self.notifications.push(Notification::MissionStarted { mission: name, index });
                Ok(())
            }
            Err(e) => {
                self.end_sequence(name, parameters, e.to_string());
                Err(e.into())
            }
        }
    }

    /// The current mission failed; report it and give up on the sequence.
    fn end_sequence(&mut self, mission: MissionName, parameters: MissionParameters, reason: String) {
        warn!(mission = mission.as_str(), reason = reason.as_str(), "Mission sequence ended early");
        self.state.last_error = Some(reason.clone());
        self.notifications.push(Notification::MissionStopped { mission, reason, parameters });
        self.reset_sequence();
    }

    fn reset_sequence(&mut self) {
        self.mission = None;
        self.missions.clear();
        self.state.running = false;
        self.state.current_mission = None;
        self.state.awaiting_confirmation = false;
        self.state.require_confirmation = false;
    }

    fn check_liveness(&mut self, id: VehicleId, now: u64) {
        self.pingers.remove(&id);
        let Some(vehicle) = self.vehicles.get(&id) else {
            return;
        };
        if !vehicle.is_connected() {
            return;
        }

        let allowance = self.config.vehicle_disconnection_time_ms;
        let silent_for = now.saturating_sub(vehicle.last_contact());
        if silent_for >= allowance {
            warn!(vehicle = id, silent_for, "Vehicle went silent");
            self.notifications.push(Notification::failure(format!(
                "{} has not been heard from in {} ms",
                self.vehicle_name(id),
                silent_for
            )));
            self.disconnect_vehicle(id, now);
        } else {
            let timer = self.timers.schedule_in(StationTimer::LivenessCheck(id), allowance - silent_for, now);
            self.pingers.insert(id, timer);
        }
    }

    fn ensure_pinger(&mut self, id: VehicleId, now: u64) {
        if self.pingers.contains_key(&id) || !self.vehicles.get(&id).is_some_and(Vehicle::is_connected) {
            return;
        }
        let allowance = self.config.vehicle_disconnection_time_ms;
        let timer = self.timers.schedule_in(StationTimer::LivenessCheck(id), allowance, now);
        self.pingers.insert(id, timer);
    }

    fn disconnect_vehicle(&mut self, id: VehicleId, now: u64) {
        let Some(vehicle) = self.vehicles.get_mut(&id) else {
            return;
        };
        if !vehicle.is_connected() {
            return;
        }
        vehicle.disconnect();

        self.link.purge(id);
        self.link.reset_sequence(id);
        if let Some(timer) = self.pingers.remove(&id) {
            self.timers.cancel(timer);
        }

        self.notifications.push(Notification::failure(format!("{} disconnected", self.vehicle_name(id))));
        self.notifications.push(Notification::VehicleDisconnected { vehicle: id });
        self.push_snapshot(id);

        if self.mission.as_ref().is_some_and(|m| m.participates(id)) {
            let outcome = self.with_mission(now, |mission, ctx| mission.on_vehicle_lost(id, ctx));
            self.handle_outcome(outcome, now);
        }
    }

    fn touch(&mut self, id: VehicleId, now: u64) {
        if let Some(vehicle) = self.vehicles.get_mut(&id) {
            if vehicle.is_connected() {
                vehicle.touch(now);
                self.ensure_pinger(id, now);
            }
        }
    }

    fn push_snapshot(&mut self, id: VehicleId) {
        if let Some(vehicle) = self.vehicles.get(&id) {
            self.notifications.push(Notification::VehicleUpdated(vehicle.snapshot()));
        }
    }

    fn vehicle_name(&self, id: VehicleId) -> String {
        self.vehicles
            .get(&id)
            .map_or_else(|| self.config.vehicle_name(id), |vehicle| vehicle.name().to_string())
    }

    fn with_mission<R>(
        &mut self,
        now: u64,
        f: impl FnOnce(&mut Mission, &mut MissionContext<'_>) -> R,
    ) -> Option<R> {
        let mission = self.mission.as_mut()?;
        let mut ctx = MissionContext {
            vehicles: &mut self.vehicles,
            link: &mut self.link,
            notifications: &mut self.notifications,
            now,
            job_timeout_ms: self.config.job_assignment_timeout_ms,
            search_margin_m: self.config.search_margin_meters,
        };
        Some(f(mission, &mut ctx))
    }
}
