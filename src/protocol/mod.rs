//! # Balloon Downlink Protocol Module
//!
//! Implementation of the lightweight framed protocol sent by the balloon.
//!
//! This module handles:
//! - Tag, payload and frame definitions
//! - Line-mode / binary-mode frame reading
//! - Typed interpretation of frame payloads
//! - Encoding frames for loopback and tests

pub mod frame;
pub mod reader;
pub mod message;
pub mod encoder;
