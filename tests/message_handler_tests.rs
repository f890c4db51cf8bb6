use fleetlink::message_handler::{LinkEvent, Reception};
use fleetlink::protocol::STATION_ID;
use fleetlink::*;
use serde_json::{json, Value};

fn config() -> StationConfig {
    StationConfig::default().with_vehicle(3, "Scout", "fixed-wing")
}

fn update(id: u32, sid: u32) -> String {
    json!({"id": id, "sid": sid, "tid": 0, "time": 0, "type": "update", "lat": 34.05, "lng": -117.82, "status": "ready"})
        .to_string()
}

fn ack(id: u32, sid: u32, ackid: u32) -> String {
    json!({"id": id, "sid": sid, "tid": 0, "time": 0, "type": "ack", "ackid": ackid}).to_string()
}

fn decoded(frames: &[String]) -> Vec<Value> {
    frames.iter().map(|frame| serde_json::from_str(frame).unwrap()).collect()
}

#[test]
fn test_repeated_id_is_not_new_but_still_acked() {
    let mut handler = MessageHandler::new(&config());

    let first = handler.receive(&update(10, 3), 100);
    let second = handler.receive(&update(10, 3), 200);

    assert!(matches!(first, Reception::Deliver { is_new: true, .. }));
    assert!(matches!(second, Reception::Deliver { is_new: false, .. }));

    let frames = decoded(&handler.drain_frames());
    assert_eq!(frames.len(), 2);
    for frame in &frames {
        assert_eq!(frame["type"], "ack");
        assert_eq!(frame["ackid"], 10);
        assert_eq!(frame["tid"], 3);
    }
    assert_eq!(handler.get_stats().duplicates, 1);
}

#[test]
fn test_increasing_ids_are_new() {
    let mut handler = MessageHandler::new(&config());

    assert!(matches!(handler.receive(&update(10, 3), 0), Reception::Deliver { is_new: true, .. }));
    assert!(matches!(handler.receive(&update(11, 3), 0), Reception::Deliver { is_new: true, .. }));
    assert_eq!(handler.last_received_id(3), Some(11));
}

#[test]
fn test_lower_id_is_stale() {
    let mut handler = MessageHandler::new(&config());

    handler.receive(&update(11, 3), 0);
    let late = handler.receive(&update(10, 3), 0);

    assert!(matches!(late, Reception::Deliver { is_new: false, .. }));
    assert_eq!(handler.get_stats().stale, 1);
    assert_eq!(handler.last_received_id(3), Some(11));
}

#[test]
fn test_late_connect_is_acked_but_not_new() {
    let mut handler = MessageHandler::new(&config());
    handler.receive(&update(40, 3), 0);
    handler.drain_frames();

    let connect = json!({"id": 1, "sid": 3, "tid": 0, "time": 0, "type": "connect", "jobsAvailable": ["isrSearch"]});
    let reception = handler.receive(&connect.to_string(), 10);

    assert!(matches!(reception, Reception::Deliver { is_new: false, .. }));
    assert_eq!(handler.last_received_id(3), Some(40));
    assert_eq!(handler.get_stats().stale, 1);

    let frames = decoded(&handler.drain_frames());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "ack");
    assert_eq!(frames[0]["ackid"], 1);
}

#[test]
fn test_watermark_reset_accepts_lower_ids_again() {
    let mut handler = MessageHandler::new(&config());
    handler.receive(&update(40, 3), 0);

    handler.reset_sequence(3);
    let connect = json!({"id": 1, "sid": 3, "tid": 0, "time": 0, "type": "connect", "jobsAvailable": ["isrSearch"]});

    assert!(matches!(handler.receive(&connect.to_string(), 10), Reception::Deliver { is_new: true, .. }));
    assert_eq!(handler.last_received_id(3), Some(1));
}

#[test]
fn test_ack_clears_outbox_and_stops_retransmission() {
    let mut handler = MessageHandler::new(&config());

    let id = handler.send(3, Payload::Stop, 0).unwrap();
    assert_eq!(handler.outbox_len_for(3), 1);
    handler.drain_frames();

    let reception = handler.receive(&ack(1, 3, id), 500);
    assert_eq!(reception, Reception::Acknowledged { vehicle: 3, ackid: id, matched: true });
    assert_eq!(handler.outbox_len(), 0);

    // Acks themselves are never acked
    assert!(handler.drain_frames().is_empty());

    assert!(handler.poll(5000).is_empty());
    assert!(handler.drain_frames().is_empty());
}

#[test]
fn test_unmatched_ack_is_harmless() {
    let mut handler = MessageHandler::new(&config());

    let reception = handler.receive(&ack(1, 3, 99), 0);

    assert_eq!(reception, Reception::Acknowledged { vehicle: 3, ackid: 99, matched: false });
}

#[test]
fn test_unacked_message_is_retransmitted_each_interval() {
    let mut handler = MessageHandler::new(&config());

    handler.send(3, Payload::Pause, 0).unwrap();
    let original = handler.drain_frames();
    assert_eq!(original.len(), 1);

    handler.poll(999);
    assert!(handler.drain_frames().is_empty());

    handler.poll(1000);
    assert_eq!(handler.drain_frames(), original);

    handler.poll(2000);
    assert_eq!(handler.drain_frames(), original);
    assert_eq!(handler.get_stats().retransmitted, 2);
}

#[test]
fn test_unacked_message_expires() {
    let mut handler = MessageHandler::new(&config());

    let id = handler.send(3, Payload::ConnectionAck, 0).unwrap();

    assert!(handler
        .poll(9999)
        .iter()
        .all(|event| !matches!(event, LinkEvent::Expired { .. })));

    let events = handler.poll(10_000);
    assert_eq!(
        events,
        vec![LinkEvent::Expired { vehicle: 3, id, message_type: "connectionAck" }]
    );
    assert_eq!(handler.outbox_len(), 0);
}

#[test]
fn test_purge_drops_everything_for_vehicle() {
    let mut handler = MessageHandler::new(&config().with_vehicle(5, "Rover", "ugv"));

    handler.send(3, Payload::Pause, 0).unwrap();
    handler.send(3, Payload::Resume, 0).unwrap();
    handler.send(5, Payload::Stop, 0).unwrap();

    assert_eq!(handler.purge(3), 2);
    assert_eq!(handler.outbox_len_for(3), 0);
    assert_eq!(handler.outbox_len_for(5), 1);

    // Purged messages neither retransmit nor expire
    handler.drain_frames();
    let events = handler.poll(20_000);
    assert!(events.iter().all(|event| !matches!(event, LinkEvent::Expired { vehicle: 3, .. })));
}

#[test]
fn test_sent_ids_increase() {
    let mut handler = MessageHandler::new(&config());

    let first = handler.send(3, Payload::Pause, 0).unwrap();
    let second = handler.send(3, Payload::Resume, 0).unwrap();

    assert_eq!(second, first + 1);
    let frames = decoded(&handler.drain_frames());
    assert_eq!(frames[0]["sid"], STATION_ID);
}

#[test]
fn test_malformed_frame_is_rejected_without_reply() {
    let mut handler = MessageHandler::new(&config());

    let reception = handler.receive("{not json", 0);

    assert!(matches!(reception, Reception::Rejected { sid: None, .. }));
    assert!(handler.drain_frames().is_empty());
}

#[test]
fn test_invalid_message_from_known_vehicle_gets_bad_message_reply() {
    let mut handler = MessageHandler::new(&config());

    // Vehicles never send start
    let frame = json!({"id": 4, "sid": 3, "tid": 0, "time": 0, "type": "start", "jobType": "isrSearch"});
    let reception = handler.receive(&frame.to_string(), 0);

    assert!(matches!(reception, Reception::Rejected { sid: Some(3), .. }));
    let frames = decoded(&handler.drain_frames());
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["type"], "badMessage");
    assert_eq!(frames[0]["tid"], 3);
    // Bad-message replies are not retried
    assert_eq!(handler.outbox_len(), 0);
}

#[test]
fn test_out_of_range_position_is_rejected() {
    let mut handler = MessageHandler::new(&config());

    let frame = json!({"id": 4, "sid": 3, "tid": 0, "time": 0, "type": "update", "lat": 91.0, "lng": 0.0});
    let reception = handler.receive(&frame.to_string(), 0);

    assert!(matches!(reception, Reception::Rejected { sid: Some(3), .. }));
}

#[test]
fn test_unknown_vehicle_is_ignored() {
    let mut handler = MessageHandler::new(&config());

    let reception = handler.receive(&update(1, 42), 0);

    assert_eq!(reception, Reception::Ignored { sid: 42 });
    assert!(handler.drain_frames().is_empty());
}

#[test]
fn test_message_for_another_station_is_ignored() {
    let mut handler = MessageHandler::new(&config());

    let frame = json!({"id": 1, "sid": 3, "tid": 7, "time": 0, "type": "complete"});
    let reception = handler.receive(&frame.to_string(), 0);

    assert_eq!(reception, Reception::Ignored { sid: 3 });
}

#[test]
fn test_bad_message_from_vehicle_is_delivered_without_ack() {
    let mut handler = MessageHandler::new(&config());

    let frame = json!({"id": 2, "sid": 3, "tid": 0, "time": 0, "type": "badMessage", "error": "unknown type"});
    let reception = handler.receive(&frame.to_string(), 0);

    assert!(matches!(reception, Reception::Deliver { is_new: true, .. }));
    assert!(handler.drain_frames().is_empty());
}
