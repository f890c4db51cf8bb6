use crate::jobs::JobType;
use crate::protocol::{VehicleId, STATION_ID};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MESSAGE_SEND_RATE_MS: u64 = 1000;
pub const DEFAULT_DISCONNECTION_TIME_MS: u64 = 10_000;
pub const DEFAULT_JOB_ASSIGNMENT_TIMEOUT_MS: u64 = 10_000;

// A message must get at least one retransmission before it can expire
const_assert!(DEFAULT_MESSAGE_SEND_RATE_MS < DEFAULT_DISCONNECTION_TIME_MS);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

/// Display metadata and capabilities for a vehicle known to the station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleInfo {
    pub name: String,
    #[serde(rename = "type", default)]
    pub vehicle_type: String,
    #[serde(default)]
    pub jobs: Vec<JobType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StationConfig {
    /// Retransmission interval for unacknowledged messages.
    pub message_send_rate_ms: u64,
    /// How long a message may go unacknowledged, and how long a vehicle may
    /// stay silent, before the vehicle is considered disconnected.
    pub vehicle_disconnection_time_ms: u64,
    pub job_assignment_timeout_ms: u64,
    /// Margin added around search results before they are handed on.
    pub search_margin_meters: f64,
    pub vehicles: BTreeMap<VehicleId, VehicleInfo>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            message_send_rate_ms: DEFAULT_MESSAGE_SEND_RATE_MS,
            vehicle_disconnection_time_ms: DEFAULT_DISCONNECTION_TIME_MS,
            job_assignment_timeout_ms: DEFAULT_JOB_ASSIGNMENT_TIMEOUT_MS,
            search_margin_meters: 0.0,
            vehicles: BTreeMap::new(),
        }
    }
}

impl StationConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: StationConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_send_rate_ms == 0 {
            return Err(ConfigError::Invalid("messageSendRateMs must be greater than zero".into()));
        }
        if self.message_send_rate_ms >= self.vehicle_disconnection_time_ms {
            return Err(ConfigError::Invalid(format!(
                "messageSendRateMs ({}) must be shorter than vehicleDisconnectionTimeMs ({})",
                self.message_send_rate_ms, self.vehicle_disconnection_time_ms
            )));
        }
        if self.job_assignment_timeout_ms == 0 {
            return Err(ConfigError::Invalid("jobAssignmentTimeoutMs must be greater than zero".into()));
        }
        if self.search_margin_meters.is_nan() || self.search_margin_meters < 0.0 {
            return Err(ConfigError::Invalid("searchMarginMeters must not be negative".into()));
        }
        if self.vehicles.contains_key(&STATION_ID) {
            return Err(ConfigError::Invalid("vehicle id 0 is reserved for the ground station".into()));
        }
        Ok(())
    }

    /// Add or replace a vehicle entry, mostly for building configs in code.
    pub fn with_vehicle(mut self, id: VehicleId, name: &str, vehicle_type: &str) -> Self {
        self.vehicles.insert(id, VehicleInfo {
            name: name.to_string(),
            vehicle_type: vehicle_type.to_string(),
            jobs: Vec::new(),
        });
        self
    }

    pub fn is_known(&self, id: VehicleId) -> bool {
        self.vehicles.contains_key(&id)
    }

    pub fn vehicle_name(&self, id: VehicleId) -> String {
        self.vehicles
            .get(&id)
            .map_or_else(|| format!("vehicle {id}"), |info| info.name.clone())
    }
}
