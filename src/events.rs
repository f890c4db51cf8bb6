//! Messages exchanged with the presentation layer: notifications going out,
//! commands coming in.

use crate::jobs::JobType;
use crate::mission::{MissionDefinition, MissionName, MissionParameters, PointOfInterest, VehicleMapping};
use crate::protocol::VehicleId;
use crate::vehicle::VehicleSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Info,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    Log {
        level: LogLevel,
        message: String,
    },
    VehicleUpdated(VehicleSnapshot),
    VehicleConnected {
        vehicle: VehicleId,
    },
    VehicleDisconnected {
        vehicle: VehicleId,
    },
    MissionsStarted {
        missions: Vec<MissionName>,
    },
    MissionStarted {
        mission: MissionName,
        index: usize,
    },
    MissionCompleted {
        mission: MissionName,
        parameters: MissionParameters,
    },
    /// Waiting for the operator before starting `next`.
    ConfirmNextMission {
        next: MissionName,
    },
    MissionsFinished {
        parameters: MissionParameters,
    },
    /// The mission ended without completing. `parameters` are what it was
    /// started with, so the operator can retry.
    MissionStopped {
        mission: MissionName,
        reason: String,
        parameters: MissionParameters,
    },
    MissionsPaused,
    MissionsResumed,
    MissionsStopped,
    PointOfInterest(PointOfInterest),
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Notification::Log { level: LogLevel::Info, message: message.into() }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Notification::Log { level: LogLevel::Success, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Notification::Log { level: LogLevel::Failure, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum StationCommand {
    StartMissions {
        missions: Vec<MissionDefinition>,
        /// Replaces the stored mapping when given.
        #[serde(default, rename = "activeVehicleMapping")]
        active_vehicle_mapping: Option<VehicleMapping>,
        #[serde(default, rename = "requireConfirmation")]
        require_confirmation: bool,
    },
    StartNextMission,
    StopMissions,
    PauseMissions,
    ResumeMissions,
    SendJob {
        vehicle: VehicleId,
        #[serde(rename = "jobType")]
        job_type: JobType,
    },
    UpdateVehicleMapping {
        mapping: VehicleMapping,
    },
}

/// Reply to a [`StationCommand`] on the control connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    pub fn success() -> Self {
        Self { ok: true, error: None }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self { ok: false, error: Some(error.into()) }
    }
}
