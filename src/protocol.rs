use crate::geo::LatLng;
use crate::jobs::{JobType, Task};
use crate::vehicle::VehicleStatus;
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type VehicleId = u32;

/// Sender and target id of the ground station itself.
pub const STATION_ID: VehicleId = 0;

/// Largest JSON frame the radio bridge will carry in either direction.
pub const MAX_FRAME_SIZE: usize = 1024;

pub type FrameBuffer = ArrayString<MAX_FRAME_SIZE>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: u32,
    pub sid: VehicleId,
    pub tid: VehicleId,
    pub time: u64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Message {
    pub fn new(id: u32, sid: VehicleId, tid: VehicleId, time: u64, payload: Payload) -> Self {
        Self { id, sid, tid, time, payload }
    }

    pub fn message_type(&self) -> &'static str {
        self.payload.message_type()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Payload {
    Start {
        #[serde(rename = "jobType")]
        job_type: JobType,
    },
    AddMission {
        #[serde(rename = "missionInfo")]
        mission_info: Task,
    },
    Pause,
    Resume,
    Stop,
    ConnectionAck,
    Update(Telemetry),
    Poi(LatLng),
    Complete,
    Connect {
        #[serde(rename = "jobsAvailable")]
        jobs_available: Vec<JobType>,
    },
    Ack {
        ackid: u32,
    },
    BadMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Payload {
    pub fn message_type(&self) -> &'static str {
        match self {
            Payload::Start { .. } => "start",
            Payload::AddMission { .. } => "addMission",
            Payload::Pause => "pause",
            Payload::Resume => "resume",
            Payload::Stop => "stop",
            Payload::ConnectionAck => "connectionAck",
            Payload::Update(_) => "update",
            Payload::Poi(_) => "poi",
            Payload::Complete => "complete",
            Payload::Connect { .. } => "connect",
            Payload::Ack { .. } => "ack",
            Payload::BadMessage { .. } => "badMessage",
        }
    }

    /// Everything except acks and bad-message reports expects an ack back.
    pub fn is_acknowledgeable(&self) -> bool {
        !matches!(self, Payload::Ack { .. } | Payload::BadMessage { .. })
    }

    /// Types a vehicle may legitimately send to the station.
    pub fn is_vehicle_originated(&self) -> bool {
        matches!(
            self,
            Payload::Update(_)
                | Payload::Poi(_)
                | Payload::Complete
                | Payload::Connect { .. }
                | Payload::Ack { .. }
                | Payload::BadMessage { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VehicleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Telemetry {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    #[allow(dead_code)]
    id: u32,
    sid: VehicleId,
    #[allow(dead_code)]
    tid: VehicleId,
    #[allow(dead_code)]
    time: u64,
    #[serde(rename = "type")]
    message_type: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON")]
    InvalidJson,
    #[error("frame of {0} bytes exceeds the frame size limit")]
    MessageTooLarge(usize),
    #[error("message header is missing or invalid: {reason}")]
    InvalidHeader { sid: Option<VehicleId>, reason: String },
    #[error("Message of type {message_type} is invalid")]
    InvalidMessage {
        sid: VehicleId,
        message_type: String,
        reason: String,
    },
    #[error("failed to serialize message")]
    SerializationError,
}

impl ProtocolError {
    /// The sender named by the offending frame, when one could be read.
    pub fn sender(&self) -> Option<VehicleId> {
        match self {
            ProtocolError::InvalidHeader { sid, .. } => *sid,
            ProtocolError::InvalidMessage { sid, .. } => Some(*sid),
            _ => None,
        }
    }

    /// Extra detail beyond the display text, for logs.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ProtocolError::InvalidHeader { reason, .. } | ProtocolError::InvalidMessage { reason, .. } => {
                Some(reason)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodecStats {
    pub frames_encoded: u32,
    pub frames_decoded: u32,
    pub decode_failures: u32,
}

/// JSON framing for radio messages with a preallocated encode buffer.
#[derive(Debug)]
pub struct MessageCodec {
    frame_buffer: FrameBuffer,
    stats: CodecStats,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self {
            frame_buffer: ArrayString::new(),
            stats: CodecStats::default(),
        }
    }

    /// Decode one frame in three stages: JSON, header, then typed payload.
    /// Each stage failing maps to its own error so callers can decide
    /// whether the sender is identifiable.
    pub fn decode(&mut self, frame: &str) -> Result<Message, ProtocolError> {
        let result = Self::decode_frame(frame);
        match &result {
            Ok(_) => self.stats.frames_decoded += 1,
            Err(_) => self.stats.decode_failures += 1,
        }
        result
    }

    fn decode_frame(frame: &str) -> Result<Message, ProtocolError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge(frame.len()));
        }

        let value: serde_json::Value =
            serde_json::from_str(frame).map_err(|_| ProtocolError::InvalidJson)?;

        let sid = value
            .get("sid")
            .and_then(serde_json::Value::as_u64)
            .and_then(|sid| VehicleId::try_from(sid).ok());

        let header = Header::deserialize(&value).map_err(|e| ProtocolError::InvalidHeader {
            sid,
            reason: e.to_string(),
        })?;

        let message = Message::deserialize(&value).map_err(|e| ProtocolError::InvalidMessage {
            sid: header.sid,
            message_type: header.message_type.clone(),
            reason: e.to_string(),
        })?;

        Self::validate_inbound(&message)?;
        Ok(message)
    }

    /// Reject payloads a vehicle has no business sending and positions that
    /// cannot exist.
    pub fn validate_inbound(message: &Message) -> Result<(), ProtocolError> {
        let invalid = |reason: &str| ProtocolError::InvalidMessage {
            sid: message.sid,
            message_type: message.message_type().to_string(),
            reason: reason.to_string(),
        };

        if !message.payload.is_vehicle_originated() {
            return Err(invalid("only the ground station sends this type"));
        }

        match &message.payload {
            Payload::Update(telemetry) if !telemetry.position().is_valid() => {
                Err(invalid("position is out of range"))
            }
            Payload::Poi(point) if !point.is_valid() => Err(invalid("position is out of range")),
            _ => Ok(()),
        }
    }

    pub fn encode(&mut self, message: &Message) -> Result<&str, ProtocolError> {
        self.frame_buffer.clear();

        let json_str = serde_json::to_string(message)
            .map_err(|_| ProtocolError::SerializationError)?;

        if json_str.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::MessageTooLarge(json_str.len()));
        }
        self.frame_buffer.push_str(&json_str);
        self.stats.frames_encoded += 1;

        Ok(&self.frame_buffer)
    }

    pub fn get_stats(&self) -> &CodecStats {
        &self.stats
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}
