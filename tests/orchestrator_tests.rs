use fleetlink::events::Notification;
use fleetlink::geo::LatLng;
use fleetlink::jobs::{IsrSearchTask, JobType, LoiterTask, TakeoffTask, Waypoint, WaypointPath};
use fleetlink::mission::{MissionStatus, VehicleMapping};
use fleetlink::orchestrator::OrchestratorError;
use fleetlink::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Drives an orchestrator the way the radio would, keeping per-vehicle ids.
struct Sim {
    station: Orchestrator,
    ids: BTreeMap<VehicleId, u32>,
}

impl Sim {
    fn new() -> Self {
        let config = StationConfig::default()
            .with_vehicle(3, "Scout", "fixed-wing")
            .with_vehicle(4, "Diver", "uuv")
            .with_vehicle(7, "Hopper", "vtol");
        Self { station: Orchestrator::new(config), ids: BTreeMap::new() }
    }

    /// Deliver one message from `sid` and return the decoded frames sent in response.
    fn send(&mut self, sid: VehicleId, mut body: Value, now: u64) -> Vec<Value> {
        let id = self.ids.entry(sid).or_insert(0);
        *id += 1;
        body["id"] = json!(*id);
        body["sid"] = json!(sid);
        body["tid"] = json!(0);
        body["time"] = json!(now);
        self.station.handle_frame(&body.to_string(), now);
        self.frames()
    }

    fn connect(&mut self, sid: VehicleId, jobs: &[&str], now: u64) -> Vec<Value> {
        self.send(sid, json!({"type": "connect", "jobsAvailable": jobs}), now)
    }

    fn status(&mut self, sid: VehicleId, status: &str, now: u64) -> Vec<Value> {
        self.send(sid, json!({"type": "update", "lat": 34.0, "lng": -117.0, "status": status}), now)
    }

    /// Acknowledge every acknowledgeable frame in `frames`.
    fn ack_all(&mut self, sid: VehicleId, frames: &[Value], now: u64) {
        for frame in frames {
            if frame["type"] != "ack" && frame["type"] != "badMessage" && frame["tid"] == sid {
                let ackid = frame["id"].clone();
                self.send(sid, json!({"type": "ack", "ackid": ackid}), now);
            }
        }
    }

    fn frames(&mut self) -> Vec<Value> {
        self.station
            .drain_frames()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }

    fn notifications(&mut self) -> Vec<Notification> {
        self.station.drain_notifications()
    }
}

fn types(frames: &[Value]) -> Vec<String> {
    frames.iter().map(|frame| frame["type"].as_str().unwrap_or_default().to_string()).collect()
}

fn task_types(frames: &[Value]) -> Vec<String> {
    frames
        .iter()
        .filter(|frame| frame["type"] == "addMission")
        .map(|frame| frame["missionInfo"]["taskType"].as_str().unwrap_or_default().to_string())
        .collect()
}

fn waypoint(lat: f64, lng: f64) -> Waypoint {
    Waypoint { lat, lng, alt: 100.0 }
}

fn isr_definition() -> MissionDefinition {
    MissionDefinition::new(
        MissionName::IsrSearch,
        MissionParameters {
            takeoff: Some(TakeoffTask {
                lat: 34.0,
                lng: -117.0,
                alt: 100.0,
                loiter: LoiterTask { lat: 34.0, lng: -117.0, alt: 100.0, radius: 50.0, direction: 1 },
            }),
            isr_search: Some(IsrSearchTask {
                alt: 100.0,
                waypoints: [LatLng::new(34.0, -117.0), LatLng::new(34.1, -117.0), LatLng::new(34.1, -117.1)],
            }),
            land: Some(WaypointPath { waypoints: [waypoint(34.0, -117.0), waypoint(34.0, -117.01)] }),
            ..MissionParameters::default()
        },
    )
}

fn start_isr(sim: &mut Sim, require_confirmation: bool, extra: Vec<MissionDefinition>) -> Vec<Value> {
    let mut missions = vec![isr_definition()];
    missions.extend(extra);
    sim.station
        .handle_command(
            StationCommand::StartMissions {
                missions,
                active_vehicle_mapping: Some(VehicleMapping::from([(3, JobType::IsrSearch)])),
                require_confirmation,
            },
            100,
        )
        .unwrap();
    sim.frames()
}

#[test]
fn test_connect_is_acked_and_answered() {
    let mut sim = Sim::new();

    let frames = sim.connect(3, &["isrSearch"], 0);

    assert_eq!(types(&frames), vec!["ack", "connectionAck"]);
    assert_eq!(frames[0]["ackid"], 1);
    assert_eq!(frames[1]["tid"], 3);

    let vehicle = sim.station.vehicle(3).unwrap();
    assert_eq!(vehicle.status(), VehicleStatus::Ready);
    assert!(vehicle.supports(JobType::IsrSearch));
    assert!(sim.station.has_pinger(3));
    assert!(sim.notifications().contains(&Notification::VehicleConnected { vehicle: 3 }));
}

#[test]
fn test_unknown_vehicle_is_ignored() {
    let mut sim = Sim::new();

    let frames = sim.connect(42, &["isrSearch"], 0);

    assert!(frames.is_empty());
    assert!(sim.station.vehicle(42).is_none());
}

#[test]
fn test_isr_mission_runs_to_completion() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["isrSearch"], 0);
    sim.ack_all(3, &frames, 10);

    let frames = start_isr(&mut sim, false, Vec::new());
    assert_eq!(types(&frames), vec!["start"]);
    assert_eq!(frames[0]["jobType"], "isrSearch");
    sim.ack_all(3, &frames, 110);
    assert_eq!(sim.station.mission().map(Mission::status), Some(MissionStatus::Initializing));

    let frames = sim.status(3, "ready", 200);
    assert_eq!(task_types(&frames), vec!["takeoff"]);
    assert_eq!(sim.station.mission().map(Mission::status), Some(MissionStatus::Running));
    sim.ack_all(3, &frames, 210);

    let frames = sim.send(3, json!({"type": "complete"}), 300);
    assert_eq!(task_types(&frames), vec!["isrSearch"]);
    sim.ack_all(3, &frames, 310);

    // A repeated complete is acked but not acted on
    let last = sim.ids[&3];
    sim.ids.insert(3, last - 2);
    let frames = sim.send(3, json!({"type": "complete"}), 320);
    assert_eq!(types(&frames), vec!["ack"]);
    sim.ids.insert(3, last);

    sim.send(3, json!({"type": "poi", "lat": 1.0, "lng": 2.0}), 400);
    let frames = sim.send(3, json!({"type": "complete"}), 500);
    assert_eq!(task_types(&frames), vec!["land"]);
    sim.ack_all(3, &frames, 510);

    sim.notifications();
    let frames = sim.send(3, json!({"type": "complete"}), 600);
    assert!(types(&frames).contains(&"stop".to_string()));

    let notifications = sim.notifications();
    let finished = notifications.iter().find_map(|n| match n {
        Notification::MissionsFinished { parameters } => Some(parameters.clone()),
        _ => None,
    });
    let parameters = finished.expect("sequence should finish");
    assert_eq!(parameters.quick_scan.unwrap().waypoints, [LatLng::new(1.0, 2.0); 4]);

    assert!(!sim.station.get_state().running);
    assert!(sim.station.mission().is_none());
    assert_eq!(sim.station.get_state().missions_completed, 1);
}

#[test]
fn test_silent_vehicle_is_disconnected_and_purged() {
    let mut sim = Sim::new();
    sim.connect(3, &["isrSearch"], 0);
    assert_eq!(sim.station.link().outbox_len_for(3), 1);

    sim.station.poll(9_999);
    assert!(sim.station.vehicle(3).unwrap().is_connected());

    sim.station.poll(10_000);
    let vehicle = sim.station.vehicle(3).unwrap();
    assert_eq!(vehicle.status(), VehicleStatus::Disconnected);
    assert_eq!(sim.station.link().outbox_len_for(3), 0);
    assert!(!sim.station.has_pinger(3));
    assert!(sim.notifications().contains(&Notification::VehicleDisconnected { vehicle: 3 }));
}

#[test]
fn test_liveness_check_waits_for_remaining_allowance() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["isrSearch"], 0);
    sim.ack_all(3, &frames, 100);

    sim.station.poll(10_000);
    assert!(sim.station.vehicle(3).unwrap().is_connected());

    sim.station.poll(10_100);
    assert_eq!(sim.station.vehicle(3).unwrap().status(), VehicleStatus::Disconnected);
}

#[test]
fn test_reconnect_after_disconnect() {
    let mut sim = Sim::new();
    sim.connect(3, &["isrSearch"], 0);
    sim.station.poll(10_000);
    assert!(!sim.station.vehicle(3).unwrap().is_connected());

    // The vehicle rebooted and counts from 1 again
    sim.ids.insert(3, 0);
    let frames = sim.connect(3, &["isrSearch"], 11_000);

    assert_eq!(types(&frames), vec!["ack", "connectionAck"]);
    assert_eq!(sim.station.vehicle(3).unwrap().status(), VehicleStatus::Ready);
}

#[test]
fn test_stop_missions_when_idle_does_nothing() {
    let mut sim = Sim::new();
    sim.connect(3, &["isrSearch"], 0);
    sim.frames();
    sim.notifications();

    sim.station.handle_command(StationCommand::StopMissions, 100).unwrap();

    assert!(sim.frames().is_empty());
    assert!(!sim.notifications().contains(&Notification::MissionsStopped));
}

#[test]
fn test_stop_missions_stops_mapped_vehicles() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["isrSearch"], 0);
    sim.ack_all(3, &frames, 10);
    start_isr(&mut sim, false, Vec::new());
    sim.status(3, "ready", 200);
    sim.notifications();

    sim.station.handle_command(StationCommand::StopMissions, 300).unwrap();

    let frames = sim.frames();
    assert_eq!(types(&frames), vec!["stop"]);
    assert_eq!(frames[0]["tid"], 3);
    // Only the stop is still waiting for an ack
    let pending: Vec<&Payload> = sim.station.link().pending_for(3).map(|m| &m.payload).collect();
    assert_eq!(pending, vec![&Payload::Stop]);

    assert!(sim.notifications().contains(&Notification::MissionsStopped));
    assert!(!sim.station.get_state().running);
    assert!(sim.station.mission().is_none());
}

#[test]
fn test_start_with_busy_vehicle_sends_nothing() {
    let mut sim = Sim::new();
    sim.connect(7, &["isrSearch"], 0);
    sim.status(7, "running", 50);
    sim.frames();
    sim.notifications();

    let result = sim.station.handle_command(
        StationCommand::StartMissions {
            missions: vec![isr_definition()],
            active_vehicle_mapping: Some(VehicleMapping::from([(7, JobType::IsrSearch)])),
            require_confirmation: false,
        },
        100,
    );

    assert!(matches!(result, Err(OrchestratorError::Mission(_))));
    assert!(!types(&sim.frames()).contains(&"start".to_string()));
    assert!(sim
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::MissionStopped { mission: MissionName::IsrSearch, .. })));
    assert!(!sim.station.get_state().running);
}

#[test]
fn test_second_sequence_rejected_while_running() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["isrSearch"], 0);
    sim.ack_all(3, &frames, 10);
    start_isr(&mut sim, false, Vec::new());

    let result = sim.station.start_missions(vec![isr_definition()], None, false, 200);

    assert!(matches!(result, Err(OrchestratorError::AlreadyRunning)));
    let empty = Orchestrator::new(StationConfig::default()).start_missions(Vec::new(), None, false, 0);
    assert!(matches!(empty, Err(OrchestratorError::NoMissions)));
}

#[test]
fn test_confirmation_waits_and_feeds_parameters_forward() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["isrSearch"], 0);
    sim.ack_all(3, &frames, 10);

    let vtol = MissionDefinition::new(MissionName::VtolSearch, MissionParameters::default());
    start_isr(&mut sim, true, vec![vtol]);

    assert_eq!(sim.station.missions()[0].mission_name, MissionName::IsrSearch);

    sim.status(3, "ready", 200);
    sim.send(3, json!({"type": "complete"}), 300);
    sim.send(3, json!({"type": "complete"}), 400);
    sim.send(3, json!({"type": "poi", "lat": 5.0, "lng": 6.0}), 450);
    sim.notifications();
    sim.send(3, json!({"type": "complete"}), 500);

    let notifications = sim.notifications();
    assert!(notifications.contains(&Notification::ConfirmNextMission { next: MissionName::VtolSearch }));
    assert!(sim.station.get_state().awaiting_confirmation);
    assert!(sim.station.get_state().running);

    let next = &sim.station.missions()[1];
    assert_eq!(next.parameters.quick_scan.unwrap().waypoints, [LatLng::new(5.0, 6.0); 4]);

    // Nobody can do the VTOL jobs, so confirming ends the sequence
    let result = sim.station.handle_command(StationCommand::StartNextMission, 600);
    assert!(result.is_err());
    assert!(!sim.station.get_state().running);
}

#[test]
fn test_send_job_outside_mission() {
    let mut sim = Sim::new();
    let frames = sim.connect(4, &["uuvRescue"], 0);
    sim.ack_all(4, &frames, 10);
    sim.notifications();

    sim.station
        .handle_command(StationCommand::SendJob { vehicle: 4, job_type: JobType::UuvRescue }, 100)
        .unwrap();
    let frames = sim.frames();
    assert_eq!(types(&frames), vec!["start"]);
    assert_eq!(frames[0]["jobType"], "uuvRescue");

    sim.status(4, "ready", 200);
    assert_eq!(sim.station.vehicle(4).unwrap().assigned_job(), Some(JobType::UuvRescue));

    let unknown = sim.station.send_job(99, JobType::UuvRescue, 300);
    assert!(matches!(unknown, Err(OrchestratorError::UnknownVehicle(99))));
}

#[test]
fn test_running_vehicle_without_job_is_stopped_once() {
    let mut sim = Sim::new();
    let frames = sim.connect(4, &["uuvRescue"], 0);
    sim.ack_all(4, &frames, 10);

    let frames = sim.status(4, "running", 100);
    assert_eq!(types(&frames), vec!["ack", "stop"]);

    // Stop is still unacknowledged, so no second one
    let frames = sim.status(4, "running", 200);
    assert_eq!(types(&frames), vec!["ack"]);
}

#[test]
fn test_invalid_battery_is_reported() {
    let mut sim = Sim::new();
    sim.connect(4, &["uuvRescue"], 0);
    sim.notifications();

    sim.send(4, json!({"type": "update", "lat": 0.0, "lng": 0.0, "battery": 3.5}), 100);

    assert!(sim.notifications().iter().any(|n| matches!(
        n,
        Notification::Log { message, .. } if message.contains("invalid battery")
    )));
    assert_eq!(sim.station.vehicle(4).unwrap().battery(), None);
}

#[test]
fn test_replayed_connect_leaves_running_mission_alone() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["isrSearch"], 0);
    sim.ack_all(3, &frames, 10);
    let frames = start_isr(&mut sim, false, Vec::new());
    sim.ack_all(3, &frames, 110);
    let frames = sim.status(3, "ready", 200);
    sim.ack_all(3, &frames, 210);
    assert_eq!(sim.station.mission().map(Mission::status), Some(MissionStatus::Running));

    // A delayed copy of the original connect arrives over another hop
    let replay = json!({"id": 1, "sid": 3, "tid": 0, "time": 0, "type": "connect", "jobsAvailable": ["isrSearch"]});
    sim.station.handle_frame(&replay.to_string(), 250);

    let frames = sim.frames();
    assert_eq!(types(&frames), vec!["ack"]);
    assert_eq!(frames[0]["ackid"], 1);
    assert_eq!(sim.station.mission().map(Mission::status), Some(MissionStatus::Running));
    assert!(sim.station.get_state().running);
    assert_eq!(sim.station.vehicle(3).unwrap().assigned_job(), Some(JobType::IsrSearch));
}

#[test]
fn test_assignment_timeout_aborts_mission_and_stops_assigned_vehicles() {
    let mut sim = Sim::new();
    let frames = sim.connect(3, &["quickScan"], 0);
    sim.ack_all(3, &frames, 10);
    let frames = sim.connect(7, &["detailedSearch"], 0);
    sim.ack_all(7, &frames, 10);

    sim.station
        .start_missions(
            vec![MissionDefinition::new(MissionName::VtolSearch, MissionParameters::default())],
            Some(VehicleMapping::from([(3, JobType::QuickScan), (7, JobType::DetailedSearch)])),
            false,
            100,
        )
        .unwrap();
    let frames = sim.frames();
    assert_eq!(types(&frames), vec!["start", "start"]);
    sim.ack_all(3, &frames, 150);
    sim.ack_all(7, &frames, 150);

    // Only vehicle 3 takes its job
    let frames = sim.status(3, "ready", 200);
    assert!(!types(&frames).contains(&"stop".to_string()));
    sim.notifications();

    sim.station.poll(10_099);
    assert!(sim.station.mission().is_some());
    assert!(!types(&sim.frames()).contains(&"stop".to_string()));

    sim.station.poll(10_100);
    let frames = sim.frames();
    let mut stopped: Vec<Value> = frames
        .iter()
        .filter(|frame| frame["type"] == "stop")
        .map(|frame| frame["tid"].clone())
        .collect();
    stopped.sort_by_key(|tid| tid.as_u64());
    assert_eq!(stopped, vec![json!(3), json!(7)]);

    assert!(sim.station.mission().is_none());
    assert!(!sim.station.get_state().running);
    assert!(sim.notifications().iter().any(|n| matches!(
        n,
        Notification::MissionStopped { mission: MissionName::VtolSearch, reason, .. } if reason.contains("timed out")
    )));
    assert!(sim.station.vehicle(7).unwrap().is_connected());
}
