use fleetlink::jobs::{JobType, RetrieveTargetTask, Task};
use fleetlink::protocol::{ProtocolError, Telemetry};
use fleetlink::vehicle::{VehicleError, VehicleEvent};
use fleetlink::*;

/// Records what would have gone out over the radio.
#[derive(Default)]
struct RecordingLink {
    sent: Vec<(VehicleId, Payload)>,
    purged: Vec<VehicleId>,
}

impl Outbound for RecordingLink {
    fn send(&mut self, target: VehicleId, payload: Payload, _now: u64) -> Result<u32, ProtocolError> {
        self.sent.push((target, payload));
        Ok(self.sent.len() as u32)
    }

    fn purge(&mut self, target: VehicleId) -> usize {
        self.purged.push(target);
        0
    }
}

fn rover() -> Vehicle {
    Vehicle::new(5, "Rover", "ugv", [JobType::UgvRescue], 0)
}

fn status(status: VehicleStatus) -> Telemetry {
    Telemetry {
        lat: 34.0,
        lng: -117.0,
        status: Some(status),
        ..Telemetry::default()
    }
}

#[test]
fn test_assign_job_sends_start_and_accepts_on_ready() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();

    vehicle.assign_job(JobType::UgvRescue, &mut link, 0, 10_000).unwrap();
    assert_eq!(link.sent, vec![(5, Payload::Start { job_type: JobType::UgvRescue })]);
    assert!(vehicle.has_pending_assignment());

    let events = vehicle.apply_telemetry(&status(VehicleStatus::Running), 100);
    assert!(!events.iter().any(|e| matches!(e, VehicleEvent::JobAccepted { .. })));

    let events = vehicle.apply_telemetry(&status(VehicleStatus::Ready), 200);
    assert!(events.contains(&VehicleEvent::JobAccepted { vehicle: 5, job: JobType::UgvRescue }));
    assert!(!vehicle.has_pending_assignment());
    assert_eq!(vehicle.assigned_job(), Some(JobType::UgvRescue));

    // Accepted exactly once
    assert!(vehicle.poll(20_000).is_empty());
}

#[test]
fn test_assign_job_times_out() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();

    vehicle.assign_job(JobType::UgvRescue, &mut link, 0, 10_000).unwrap();

    assert!(vehicle.poll(9_999).is_empty());
    let events = vehicle.poll(10_000);
    assert_eq!(events, vec![VehicleEvent::JobTimedOut { vehicle: 5, job: JobType::UgvRescue }]);
    assert!(!vehicle.has_pending_assignment());
    assert_eq!(vehicle.assigned_job(), None);

    // A late ready no longer counts
    let events = vehicle.apply_telemetry(&status(VehicleStatus::Ready), 11_000);
    assert!(!events.iter().any(|e| matches!(e, VehicleEvent::JobAccepted { .. })));
}

#[test]
fn test_second_assignment_rejected_while_pending() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();

    vehicle.assign_job(JobType::UgvRescue, &mut link, 0, 10_000).unwrap();
    let result = vehicle.assign_job(JobType::UgvRescue, &mut link, 10, 10_000);

    assert!(matches!(result, Err(VehicleError::AssignmentPending(5))));
    assert_eq!(link.sent.len(), 1);
}

#[test]
fn test_unsupported_job_rejected() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();

    let result = vehicle.assign_job(JobType::IsrSearch, &mut link, 0, 10_000);

    assert!(matches!(result, Err(VehicleError::JobNotSupported { .. })));
    assert!(link.sent.is_empty());
}

#[test]
fn test_error_status_reported_while_job_active() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();
    vehicle.assign_job(JobType::UgvRescue, &mut link, 0, 10_000).unwrap();
    vehicle.apply_telemetry(&status(VehicleStatus::Ready), 100);

    let mut report = status(VehicleStatus::Error);
    report.error_message = Some("wheel stuck".to_string());
    let events = vehicle.apply_telemetry(&report, 200);

    assert!(events.contains(&VehicleEvent::JobError {
        vehicle: 5,
        job: JobType::UgvRescue,
        message: Some("wheel stuck".to_string()),
    }));

    // Staying in error is not a new error
    let events = vehicle.apply_telemetry(&report, 300);
    assert!(!events.iter().any(|e| matches!(e, VehicleEvent::JobError { .. })));
}

#[test]
fn test_out_of_range_battery_is_rejected() {
    let mut vehicle = rover();

    let mut report = status(VehicleStatus::Ready);
    report.battery = Some(0.8);
    vehicle.apply_telemetry(&report, 100);
    assert_eq!(vehicle.battery(), Some(0.8));

    report.battery = Some(1.7);
    let events = vehicle.apply_telemetry(&report, 200);

    assert!(events.contains(&VehicleEvent::InvalidBattery { vehicle: 5, value: 1.7 }));
    assert_eq!(vehicle.battery(), Some(0.8));
    assert_eq!(vehicle.last_contact(), 200);
}

#[test]
fn test_task_requires_matching_job() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();
    let task = Task::RetrieveTarget(RetrieveTargetTask::default());

    assert!(matches!(vehicle.assign_task(&task, &mut link, 0), Err(VehicleError::NoJobAssigned(5))));

    vehicle.assign_job(JobType::UgvRescue, &mut link, 0, 10_000).unwrap();
    vehicle.apply_telemetry(&status(VehicleStatus::Ready), 10);
    vehicle.assign_task(&task, &mut link, 20).unwrap();

    assert_eq!(link.sent.last(), Some(&(5, Payload::AddMission { mission_info: task })));
}

#[test]
fn test_stop_sends_nothing_when_disconnected() {
    let mut vehicle = rover();
    let mut link = RecordingLink::default();

    vehicle.disconnect();
    vehicle.stop(&mut link, 0).unwrap();

    assert!(link.sent.is_empty());
    assert_eq!(vehicle.status(), VehicleStatus::Disconnected);
    assert!(matches!(vehicle.pause(&mut link, 0), Err(VehicleError::Disconnected(5))));
}
