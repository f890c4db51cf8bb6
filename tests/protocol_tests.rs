use fleetlink::geo::LatLng;
use fleetlink::jobs::{JobType, RetrieveTargetTask, Task};
use fleetlink::protocol::*;
use fleetlink::VehicleStatus;
use serde_json::Value;

#[test]
fn test_decode_update() {
    let mut codec = MessageCodec::new();
    let frame = r#"{"id":12,"sid":3,"tid":0,"time":1700,"type":"update","lat":34.05,"lng":-117.82,"alt":120.5,"battery":0.76,"status":"running"}"#;

    let message = codec.decode(frame).unwrap();

    assert_eq!(message.id, 12);
    assert_eq!(message.sid, 3);
    let Payload::Update(telemetry) = message.payload else {
        panic!("expected update");
    };
    assert_eq!(telemetry.position(), LatLng::new(34.05, -117.82));
    assert_eq!(telemetry.status, Some(VehicleStatus::Running));
    assert_eq!(telemetry.battery, Some(0.76));
    assert_eq!(telemetry.heading, None);
    assert_eq!(codec.get_stats().frames_decoded, 1);
}

#[test]
fn test_decode_connect_and_ack() {
    let mut codec = MessageCodec::new();

    let connect = codec
        .decode(r#"{"id":1,"sid":5,"tid":0,"time":0,"type":"connect","jobsAvailable":["ugvRescue"]}"#)
        .unwrap();
    assert_eq!(connect.payload, Payload::Connect { jobs_available: vec![JobType::UgvRescue] });

    let ack = codec.decode(r#"{"id":2,"sid":5,"tid":0,"time":0,"type":"ack","ackid":41}"#).unwrap();
    assert_eq!(ack.payload, Payload::Ack { ackid: 41 });
}

#[test]
fn test_unparseable_frame_has_no_sender() {
    let mut codec = MessageCodec::new();

    let error = codec.decode("garbage").unwrap_err();

    assert_eq!(error, ProtocolError::InvalidJson);
    assert_eq!(error.sender(), None);
    assert_eq!(codec.get_stats().decode_failures, 1);
}

#[test]
fn test_missing_header_field_keeps_sender_when_readable() {
    let mut codec = MessageCodec::new();

    let error = codec.decode(r#"{"sid":3,"tid":0,"time":0,"type":"complete"}"#).unwrap_err();

    assert!(matches!(error, ProtocolError::InvalidHeader { sid: Some(3), .. }));
}

#[test]
fn test_unknown_type_is_invalid_message() {
    let mut codec = MessageCodec::new();

    let error = codec.decode(r#"{"id":4,"sid":3,"tid":0,"time":0,"type":"selfDestruct"}"#).unwrap_err();

    assert_eq!(error.sender(), Some(3));
    assert_eq!(error.to_string(), "Message of type selfDestruct is invalid");
    assert!(error.detail().is_some());
}

#[test]
fn test_oversized_frame_rejected() {
    let mut codec = MessageCodec::new();
    let frame = format!(r#"{{"id":1,"sid":3,"tid":0,"time":0,"type":"badMessage","error":"{}"}}"#, "x".repeat(MAX_FRAME_SIZE));

    assert!(matches!(codec.decode(&frame), Err(ProtocolError::MessageTooLarge(_))));
}

#[test]
fn test_encode_add_mission() {
    let mut codec = MessageCodec::new();
    let task = Task::RetrieveTarget(RetrieveTargetTask::at(LatLng::new(1.5, 2.5)));
    let message = Message::new(9, STATION_ID, 4, 100, Payload::AddMission { mission_info: task });

    let frame: Value = serde_json::from_str(codec.encode(&message).unwrap()).unwrap();

    assert_eq!(frame["type"], "addMission");
    assert_eq!(frame["tid"], 4);
    assert_eq!(frame["missionInfo"]["taskType"], "retrieveTarget");
    assert_eq!(frame["missionInfo"]["lat"], 1.5);
}

#[test]
fn test_station_only_types_flagged() {
    assert!(!Payload::Stop.is_vehicle_originated());
    assert!(Payload::Complete.is_vehicle_originated());
    assert!(!Payload::Ack { ackid: 1 }.is_acknowledgeable());
    assert!(Payload::Pause.is_acknowledgeable());
}
