use crate::config::StationConfig;
use crate::keyed_queue::KeyedQueue;
use crate::protocol::{CodecStats, Message, MessageCodec, Payload, ProtocolError, VehicleId, STATION_ID};
use crate::scheduler::{TimerId, TimerScheduler};
use crate::timer_event::{Handled, HandlerId, Timeout, TimerEventRegistry};
use heapless::HistoryBuffer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info, warn};

pub const HISTORY_LEN: usize = 64;

/// Where vehicles and missions hand messages they want delivered.
pub trait Outbound {
    /// Queue `payload` for `target`, returning the id it was sent with.
    fn send(&mut self, target: VehicleId, payload: Payload, now: u64) -> Result<u32, ProtocolError>;

    /// Stop retrying everything still unacknowledged for `target`.
    fn purge(&mut self, target: VehicleId) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Acknowledged { vehicle: VehicleId, id: u32 },
    /// The vehicle never acknowledged message `id`; it should be treated as lost.
    Expired {
        vehicle: VehicleId,
        id: u32,
        message_type: &'static str,
    },
}

/// How an inbound frame was classified.
#[derive(Debug, Clone, PartialEq)]
pub enum Reception {
    /// A message for the orchestrator. `is_new` is false for repeats and
    /// stale ids, which are acknowledged but should not be acted on.
    Deliver { message: Message, is_new: bool },
    /// An ack from a vehicle; `matched` is false when nothing was waiting on it.
    Acknowledged { vehicle: VehicleId, ackid: u32, matched: bool },
    /// The frame could not be used. A bad-message reply was sent when the
    /// sender is a known vehicle.
    Rejected { sid: Option<VehicleId>, error: ProtocolError },
    /// A well-formed message from a vehicle the station does not know, or
    /// one addressed elsewhere.
    Ignored { sid: VehicleId },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkStats {
    pub sent: u32,
    pub retransmitted: u32,
    pub acknowledged: u32,
    pub expired: u32,
    pub purged: u32,
    pub received: u32,
    pub duplicates: u32,
    pub stale: u32,
    pub rejected: u32,
    pub ignored: u32,
}

struct OutboxEntry {
    message: Message,
    frame: String,
    attempts: u32,
    retransmit: TimerId,
    ack_handler: HandlerId,
}

/// Reliable delivery over the radio link.
///
/// Outbound messages get sequential ids and, unless they are acks or
/// bad-message reports, sit in the outbox being retransmitted every
/// `message_send_rate_ms` until the target acks them or
/// `vehicle_disconnection_time_ms` passes. Inbound frames are decoded,
/// acknowledged and checked against the sender's highest id seen so far.
pub struct MessageHandler {
    next_id: u32,
    codec: MessageCodec,
    known_vehicles: BTreeSet<VehicleId>,

    outbox: KeyedQueue<VehicleId, OutboxEntry>,
    ack_events: TimerEventRegistry<(), LinkEvent>,
    retransmits: TimerScheduler<(VehicleId, u32)>,
    last_received: BTreeMap<VehicleId, u32>,

    frames: Vec<String>,
    sent_log: HistoryBuffer<Message, HISTORY_LEN>,
    received_log: HistoryBuffer<Message, HISTORY_LEN>,

    retry_interval_ms: u64,
    expiry_ms: u64,
    stats: LinkStats,
}

fn ack_key(vehicle: VehicleId, id: u32) -> String {
    format!("{vehicle}#{id}")
}

impl MessageHandler {
    pub fn new(config: &StationConfig) -> Self {
        Self {
            next_id: 0,
            codec: MessageCodec::new(),
            known_vehicles: config.vehicles.keys().copied().collect(),
            outbox: KeyedQueue::new(),
            ack_events: TimerEventRegistry::new(),
            retransmits: TimerScheduler::new(),
            last_received: BTreeMap::new(),
            frames: Vec::new(),
            sent_log: HistoryBuffer::new(),
            received_log: HistoryBuffer::new(),
            retry_interval_ms: config.message_send_rate_ms,
            expiry_ms: config.vehicle_disconnection_time_ms,
            stats: LinkStats::default(),
        }
    }

    pub fn add_known_vehicle(&mut self, id: VehicleId) {
        self.known_vehicles.insert(id);
    }

    pub fn is_known(&self, id: VehicleId) -> bool {
        self.known_vehicles.contains(&id)
    }

    /// Classify one decoded radio frame.
    pub fn receive(&mut self, frame: &str, now: u64) -> Reception {
        let message = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(error) => return self.reject(error, now),
        };

        if !self.is_known(message.sid) || message.tid != STATION_ID {
            self.stats.ignored += 1;
            debug!(sid = message.sid, tid = message.tid, "Ignoring message not meant for this station");
            return Reception::Ignored { sid: message.sid };
        }

        self.stats.received += 1;
        self.received_log.write(message.clone());
        let is_new = self.observe_id(&message);

        match message.payload {
            Payload::Ack { ackid } => {
                let matched = self.handle_ack(message.sid, ackid);
                Reception::Acknowledged { vehicle: message.sid, ackid, matched }
            }
            Payload::BadMessage { .. } => Reception::Deliver { message, is_new },
            _ => {
                // Acked even when repeated; the sender's copy of our ack may have been lost
                if let Err(e) = self.send(message.sid, Payload::Ack { ackid: message.id }, now) {
                    warn!(vehicle = message.sid, error = %e, "Failed to acknowledge message");
                }
                Reception::Deliver { message, is_new }
            }
        }
    }

    /// Run due retransmissions and expire messages that were never acked.
    pub fn poll(&mut self, now: u64) -> Vec<LinkEvent> {
        let mut events = Vec::new();

        for event in self.ack_events.expire(now) {
            if let LinkEvent::Expired { vehicle, id, message_type } = &event {
                if let Some(entry) = self.outbox.remove_first(vehicle, |entry| entry.message.id == *id) {
                    self.retransmits.cancel(entry.retransmit);
                }
                self.stats.expired += 1;
                warn!(vehicle = *vehicle, id = *id, message_type = *message_type, "Message was never acknowledged");
            }
            events.push(event);
        }

        for timer in self.retransmits.take_due(now) {
            let (vehicle, id) = timer.payload;
            let Some(entry) = self.outbox.find_mut(&vehicle, |entry| entry.message.id == id) else {
                continue;
            };
            entry.attempts += 1;
            entry.retransmit = self.retransmits.schedule_in((vehicle, id), self.retry_interval_ms, now);
            self.frames.push(entry.frame.clone());
            self.stats.retransmitted += 1;
            debug!(vehicle, id, attempt = entry.attempts, "Retransmitting");
        }

        events
    }

    /// Forget the highest id seen from `vehicle`, so a restarted vehicle
    /// counting from 1 again is heard.
    pub fn reset_sequence(&mut self, vehicle: VehicleId) {
        self.last_received.remove(&vehicle);
    }

    /// Frames waiting to be written to the radio, oldest first.
    pub fn drain_frames(&mut self) -> Vec<String> {
        std::mem::take(&mut self.frames)
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }

    pub fn outbox_len_for(&self, vehicle: VehicleId) -> usize {
        self.outbox.size(&vehicle)
    }

    /// Unacknowledged messages for `vehicle`, oldest first.
    pub fn pending_for(&self, vehicle: VehicleId) -> impl Iterator<Item = &Message> {
        self.outbox.iter_key(&vehicle).map(|entry| &entry.message)
    }

    pub fn last_received_id(&self, vehicle: VehicleId) -> Option<u32> {
        self.last_received.get(&vehicle).copied()
    }

    pub fn sent_history(&self) -> impl Iterator<Item = &Message> {
        self.sent_log.oldest_ordered()
    }

    pub fn received_history(&self) -> impl Iterator<Item = &Message> {
        self.received_log.oldest_ordered()
    }

    pub fn get_stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn get_codec_stats(&self) -> &CodecStats {
        self.codec.get_stats()
    }

    fn reject(&mut self, error: ProtocolError, now: u64) -> Reception {
        self.stats.rejected += 1;
        let sid = error.sender();

        match sid {
            Some(vehicle) if self.is_known(vehicle) => {
                warn!(vehicle, error = %error, detail = ?error.detail(), "Rejected message");
                let reply = Payload::BadMessage { error: Some(error.to_string()) };
                if let Err(e) = self.send(vehicle, reply, now) {
                    warn!(vehicle, error = %e, "Failed to send bad message reply");
                }
            }
            _ => warn!(error = %error, "Dropped unusable frame"),
        }

        Reception::Rejected { sid, error }
    }

    /// Returns true when the message id is above the sender's watermark.
    ///
    /// Lower ids are counted as stale and not acted on, `connect` included. A
    /// vehicle that restarted its counter is heard again once its watermark is
    /// reset on disconnection.
    fn observe_id(&mut self, message: &Message) -> bool {
        let sid = message.sid;
        match self.last_received.get(&sid).copied() {
            Some(last) if message.id == last => {
                self.stats.duplicates += 1;
                debug!(vehicle = sid, id = message.id, "Duplicate message");
                false
            }
            Some(last) if message.id < last => {
                self.stats.stale += 1;
                debug!(vehicle = sid, id = message.id, last, "Out-of-order message arrived after a newer one");
                false
            }
            _ => {
                self.last_received.insert(sid, message.id);
                true
            }
        }
    }

    fn handle_ack(&mut self, vehicle: VehicleId, ackid: u32) -> bool {
        let outputs = self.ack_events.fire(&ack_key(vehicle, ackid), &());
        if outputs.is_empty() {
            debug!(vehicle, ackid, "Ack for a message no longer in the outbox");
            return false;
        }

        if let Some(entry) = self.outbox.remove_first(&vehicle, |entry| entry.message.id == ackid) {
            self.retransmits.cancel(entry.retransmit);
        }
        self.stats.acknowledged += 1;
        true
    }
}

impl Outbound for MessageHandler {
    fn send(&mut self, target: VehicleId, payload: Payload, now: u64) -> Result<u32, ProtocolError> {
        let id = self.next_id.wrapping_add(1);
        let message = Message::new(id, STATION_ID, target, now, payload);
        let frame = self.codec.encode(&message)?.to_string();
        self.next_id = id;

        self.frames.push(frame.clone());
        self.stats.sent += 1;
        debug!(vehicle = target, id, message_type = message.message_type(), "Sent message");

        if message.payload.is_acknowledgeable() {
            let message_type = message.message_type();
            let ack_handler = self.ack_events.add_handler(
                &ack_key(target, id),
                move |_: &()| Handled::DoneWith(LinkEvent::Acknowledged { vehicle: target, id }),
                Some(Timeout::new(self.expiry_ms, LinkEvent::Expired { vehicle: target, id, message_type })),
                now,
            );
            let retransmit = self.retransmits.schedule_in((target, id), self.retry_interval_ms, now);

            self.outbox.push(target, OutboxEntry {
                message: message.clone(),
                frame,
                attempts: 1,
                retransmit,
                ack_handler,
            });
        }

        self.sent_log.write(message);
        Ok(id)
    }

    fn purge(&mut self, target: VehicleId) -> usize {
        let entries = self.outbox.take(&target);
        for entry in &entries {
            self.ack_events.remove_handler(entry.ack_handler);
            self.retransmits.cancel(entry.retransmit);
        }
        if !entries.is_empty() {
            info!(vehicle = target, count = entries.len(), "Purged unacknowledged messages");
        }
        self.stats.purged += entries.len() as u32;
        entries.len()
    }
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandler")
            .field("next_id", &self.next_id)
            .field("known_vehicles", &self.known_vehicles)
            .field("outbox", &self.outbox.len())
            .field("stats", &self.stats)
            .finish()
    }
}
