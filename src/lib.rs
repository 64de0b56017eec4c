//! # Balloon Ground Library
//!
//! Ground-station ingest engine for a high-altitude balloon.
//!
//! This library decodes the framed telemetry protocol arriving over one or two
//! serial radio links, reassembles still images from out-of-order chunks,
//! arbitrates redundant telemetry by freshness and exposes a consistent
//! snapshot of the station state to a presentation layer.

pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod station;
pub mod telemetry;
