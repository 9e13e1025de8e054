//! # CSMA/CD Bus Simulator
//!
//! A discrete-time simulation of a single shared cable with stations that
//! contend for it using carrier sense, collision detection, jam signaling and
//! truncated binary exponential backoff.
//!
//! ## Quick Start
//!
//! ```rust
//! use cdbus::{BusSimulation, SimulationConfig};
//!
//! let config = SimulationConfig::new(10)
//!     .with_station(0, 2)
//!     .with_station(1, 6)
//!     .with_message(0, 0, 12, 'a')
//!     .with_message(1, 0, 12, 'b');
//!
//! let mut sim = BusSimulation::new(config).expect("valid scenario");
//! let settled = sim.run_until_settled(10_000).expect("no invariant violation");
//! assert!(settled.is_some());
//! ```
//!
//! ## Architecture
//!
//! Every tick runs two phases. First the [`medium`] propagates every signal
//! one segment further, building the next bus state in a fresh buffer. Then
//! each [`station`] looks at its own segment and acts on it.
//!
//! - [`medium`] - Bus segments and wave propagation
//! - [`station`] - Contention state machine
//! - [`schedule`] - Traffic schedule and message ownership
//! - [`backoff`] - Seedable backoff source
//! - [`simulation`] - Owner of all state, tick driver
//! - [`snapshot`] - Per-tick read-only view
//! - [`config`] - Scenario loading and validation
//! - [`render`] / [`journal`] - Text rendering and JSON-lines journal

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]

pub mod backoff;
pub mod config;
pub mod journal;
pub mod medium;
pub mod render;
pub mod schedule;
pub mod simulation;
pub mod snapshot;
pub mod station;

// Re-export main public types for convenience
pub use config::{AbandonPolicy, ConfigError, SimulationConfig, StationOrder};
pub use medium::{Bus, Segment, Symbol};
pub use simulation::{BusSimulation, SimulationError};
pub use snapshot::{StationSnapshot, TickSnapshot};
pub use station::{StationEvent, StationState};
