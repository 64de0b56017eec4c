//! # Shared Telemetry State
//!
//! [`TelemetryState`] is the single mutable aggregate owned by the station.
//! [`TelemetrySnapshot`] is the owned, read-only copy handed to presentation
//! layers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::arbiter::{Arbiter, ArbitratedValue, Observation};
use super::history::{HistoryBuffer, LogEntry, PositionFix, RssiSample, SignalQuality};
use super::reassembly::{CompletedImage, ReassemblyBuffer};
use crate::config::HistoryConfig;
use crate::protocol::frame::LinkId;

/// Connection status of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Disconnected => write!(f, "Disconnected"),
            LinkStatus::Connecting => write!(f, "Connecting"),
            LinkStatus::Connected => write!(f, "Connected"),
        }
    }
}

/// Most recently published image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedImage {
    pub sequence: u64,
    pub size_bytes: usize,
    pub missing_chunks: u64,
    pub published_at: DateTime<Utc>,
    #[serde(skip)]
    pub data: Bytes,
}

impl PublishedImage {
    pub fn from_completed(image: &CompletedImage) -> Self {
        Self {
            sequence: image.sequence,
            size_bytes: image.size(),
            missing_chunks: image.missing_count,
            published_at: Utc::now(),
            data: image.data.clone(),
        }
    }

    /// Size in KiB, as shown on dashboards
    pub fn size_kib(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }
}

/// Per-link mutable state
#[derive(Debug)]
pub struct LinkState {
    pub id: LinkId,
    pub port: String,
    pub status: LinkStatus,
    pub packets_received: u64,
    pub announced_packet_size: Option<usize>,
    pub rssi_history: HistoryBuffer<RssiSample>,
}

impl LinkState {
    fn new(id: LinkId, port: String, rssi_capacity: usize) -> Self {
        Self {
            id,
            port,
            status: LinkStatus::Disconnected,
            packets_received: 0,
            announced_packet_size: None,
            rssi_history: HistoryBuffer::new(rssi_capacity),
        }
    }

    fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            id: self.id,
            port: self.port.clone(),
            status: self.status,
            packets_received: self.packets_received,
            announced_packet_size: self.announced_packet_size,
            rssi_history: self.rssi_history.to_vec(),
        }
    }
}

/// Aggregate station state
///
/// Mutated only by the dispatcher; never shared across tasks directly.
#[derive(Debug)]
pub struct TelemetryState {
    pub links: Vec<LinkState>,
    pub arbiter: Arbiter,
    pub rssi: ArbitratedValue<RssiSample>,
    pub position: ArbitratedValue<PositionFix>,
    pub apogee: ArbitratedValue<String>,
    pub apogee_detected: bool,
    pub pending_chunk: ArbitratedValue<Bytes>,
    /// Last frame counter seen; a change closes the image cycle
    pub frame_counter: u32,
    pub reassembly: ReassemblyBuffer,
    pub position_history: HistoryBuffer<PositionFix>,
    pub log: HistoryBuffer<LogEntry>,
    pub image: Option<PublishedImage>,
}

impl TelemetryState {
    /// Create state for the given link ports (one or two, in physical order)
    pub fn new<S: AsRef<str>>(ports: &[S], history: &HistoryConfig) -> Self {
        let links = LinkId::ALL
            .iter()
            .zip(ports)
            .map(|(&id, port)| LinkState::new(id, port.as_ref().to_string(), history.rssi_capacity))
            .collect();

        Self {
            links,
            arbiter: Arbiter::new(),
            rssi: ArbitratedValue::new(),
            position: ArbitratedValue::new(),
            apogee: ArbitratedValue::new(),
            apogee_detected: false,
            pending_chunk: ArbitratedValue::new(),
            frame_counter: 0,
            reassembly: ReassemblyBuffer::new(),
            position_history: HistoryBuffer::new(history.position_capacity),
            log: HistoryBuffer::new(history.log_capacity),
            image: None,
        }
    }

    /// Mutable state of a configured link
    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut LinkState> {
        self.links.get_mut(id.index())
    }

    pub fn link(&self, id: LinkId) -> Option<&LinkState> {
        self.links.get(id.index())
    }

    /// Build an owned, self-consistent copy of the state
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            taken_at: Utc::now(),
            links: self.links.iter().map(LinkState::snapshot).collect(),
            rssi: self.rssi.current_value().copied(),
            position: self.position.current_value().copied(),
            apogee: self.apogee.current().cloned(),
            apogee_detected: self.apogee_detected,
            frame_counter: self.frame_counter,
            pending_chunks: self.reassembly.len(),
            image_sequence: self.reassembly.last_sequence(),
            image: self.image.clone(),
            position_history: self.position_history.to_vec(),
            log: self.log.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Read-only view of one link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub id: LinkId,
    pub port: String,
    pub status: LinkStatus,
    pub packets_received: u64,
    pub announced_packet_size: Option<usize>,
    pub rssi_history: Vec<RssiSample>,
}

/// Read-only view of the whole station
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub links: Vec<LinkSnapshot>,
    /// Freshest RSSI sample across links
    pub rssi: Option<RssiSample>,
    /// Freshest position fix across links
    pub position: Option<PositionFix>,
    /// Freshest apogee report across links
    pub apogee: Option<Observation<String>>,
    pub apogee_detected: bool,
    pub frame_counter: u32,
    /// Chunks placed in the current image cycle
    pub pending_chunks: usize,
    /// Sequence number of the last published image (0 if none)
    pub image_sequence: u64,
    pub image: Option<PublishedImage>,
    pub position_history: Vec<PositionFix>,
    pub log: Vec<String>,
}

impl TelemetrySnapshot {
    pub fn link(&self, id: LinkId) -> Option<&LinkSnapshot> {
        self.links.iter().find(|l| l.id == id)
    }

    /// Packets received across all links
    pub fn total_packets(&self) -> u64 {
        self.links.iter().map(|l| l.packets_received).sum()
    }

    pub fn any_connected(&self) -> bool {
        self.links.iter().any(|l| l.status == LinkStatus::Connected)
    }

    pub fn signal_quality(&self) -> Option<SignalQuality> {
        self.rssi.map(|s| s.quality())
    }

    /// One-line summary: `Packets: N | Frame: S`
    pub fn status_line(&self) -> String {
        format!("Packets: {} | Frame: {}", self.total_packets(), self.image_sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(ports: &[&str]) -> TelemetryState {
        TelemetryState::new(ports, &HistoryConfig::default())
    }

    #[test]
    fn test_links_created_in_physical_order() {
        let state = state(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        assert_eq!(state.links.len(), 2);
        assert_eq!(state.links[0].id, LinkId::Primary);
        assert_eq!(state.links[1].port, "/dev/ttyUSB1");
        assert_eq!(state.links[1].rssi_history.capacity(), 100);
    }

    #[test]
    fn test_single_link_state() {
        let mut state = state(&["/dev/ttyUSB0"]);
        assert!(state.link(LinkId::Primary).is_some());
        assert!(state.link_mut(LinkId::Secondary).is_none());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = state(&["/dev/ttyUSB0"]).snapshot();
        assert_eq!(snapshot.total_packets(), 0);
        assert_eq!(snapshot.image_sequence, 0);
        assert!(snapshot.image.is_none());
        assert!(snapshot.rssi.is_none());
        assert!(!snapshot.apogee_detected);
        assert!(!snapshot.any_connected());
        assert_eq!(snapshot.link(LinkId::Primary).unwrap().status, LinkStatus::Disconnected);
        assert_eq!(snapshot.status_line(), "Packets: 0 | Frame: 0");
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let mut state = state(&["/dev/ttyUSB0"]);
        let before = state.snapshot();

        state.links[0].packets_received = 5;
        state.links[0].status = LinkStatus::Connected;

        assert_eq!(before.total_packets(), 0);
        let after = state.snapshot();
        assert_eq!(after.total_packets(), 5);
        assert!(after.any_connected());
    }

    #[test]
    fn test_snapshot_serializes_without_image_bytes() {
        let mut state = state(&["/dev/ttyUSB0"]);
        state.image = Some(PublishedImage::from_completed(&CompletedImage {
            sequence: 4,
            data: Bytes::from_static(&[0u8; 2048]),
            chunk_count: 2,
            missing_count: 0,
            missing_indices: vec![],
        }));

        let snapshot = state.snapshot();
        assert!((snapshot.image.as_ref().unwrap().size_kib() - 2.0).abs() < f64::EPSILON);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["image"]["sequence"], 4);
        assert_eq!(json["image"]["size_bytes"], 2048);
        assert!(json["image"].get("data").is_none());
        assert_eq!(json["links"][0]["status"], "disconnected");
    }

    #[test]
    fn test_link_status_display() {
        assert_eq!(LinkStatus::Connected.to_string(), "Connected");
        assert_eq!(LinkStatus::default(), LinkStatus::Disconnected);
    }
}
