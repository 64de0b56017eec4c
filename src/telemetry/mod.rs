//! # Telemetry Module
//!
//! Turns decoded frames into station state.
//!
//! This module handles:
//! - Arbitrating values reported by more than one link
//! - Bounded RSSI, position and log histories
//! - Reassembling image chunks and publishing completed images
//! - Persisting images, log lines and history updates through a sink
//! - Serializing all state mutation through the station actor

pub mod actor;
pub mod arbiter;
pub mod dispatcher;
pub mod history;
pub mod reassembly;
pub mod sink;
pub mod state;

pub use actor::StationHandle;
pub use dispatcher::Dispatcher;
pub use sink::{DirectorySink, StationSink};
pub use state::{LinkStatus, TelemetrySnapshot};
