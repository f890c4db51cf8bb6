//! # Fleetlink
//!
//! Ground-station core for a fleet of autonomous vehicles. Vehicles talk to
//! the station over a lossy radio link using small JSON messages; the station
//! keeps track of each vehicle, runs sequences of cooperative missions and
//! reports progress to an operator.
//!
//! ## Features
//!
//! - **Reliable messaging**: per-vehicle sequence numbers, acknowledgements,
//!   retransmission and duplicate suppression
//! - **Vehicle tracking**: telemetry, job assignment with timeouts, liveness
//! - **Missions**: ISR search, VTOL search, payload drop, UGV and UUV rescue,
//!   chained so one mission's results seed the next
//! - **Deterministic**: no clock reads and no threads in the core, every
//!   entry point takes the current time in milliseconds
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetlink::{Orchestrator, StationConfig};
//!
//! let config = StationConfig::default().with_vehicle(3, "Scout", "fixed-wing");
//! let mut station = Orchestrator::new(config);
//!
//! station.handle_frame(r#"{"id":0,"sid":3,"tid":0,"time":0,"type":"connect","jobsAvailable":["isrSearch"]}"#, 0);
//! for frame in station.drain_frames() {
//!     println!("to radio: {frame}");
//! }
//! station.poll(100);
//! ```
//!
//! ## Architecture
//!
//! - [`orchestrator`] - Top-level coordinator and public API
//! - [`message_handler`] - Reliable delivery over the radio link
//! - [`protocol`] - Message types and the JSON codec
//! - [`vehicle`] - Per-vehicle state and job assignment
//! - [`mission`] - Mission lifecycle and the per-type plans
//! - [`keyed_queue`], [`timer_event`], [`scheduler`] - Supporting structures

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

pub mod config;
pub mod events;
pub mod geo;
pub mod jobs;
pub mod keyed_queue;
pub mod message_handler;
pub mod mission;
pub mod orchestrator;
pub mod protocol;
pub mod scheduler;
pub mod timer_event;
pub mod vehicle;

// Re-export main public types for convenience
pub use config::StationConfig;
pub use events::{Notification, StationCommand};
pub use message_handler::{MessageHandler, Outbound};
pub use mission::{Mission, MissionDefinition, MissionName, MissionParameters};
pub use orchestrator::Orchestrator;
pub use protocol::{Message, Payload, VehicleId};
pub use vehicle::{Vehicle, VehicleStatus};
