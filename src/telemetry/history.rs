//! # History Buffers
//!
//! Fixed-capacity ring buffers for RSSI samples, position fixes and log lines.
//! Inserting into a full buffer evicts the oldest entry; iteration runs oldest
//! to newest.

use chrono::{DateTime, Local, Utc};
use serde::{Serialize, Serializer};
use std::collections::VecDeque;
use std::fmt;

use crate::protocol::frame::LinkId;
use crate::protocol::message::GeoPoint;

/// RSSI above this is excellent (dBm)
pub const RSSI_EXCELLENT_DBM: f32 = -70.0;

/// RSSI above this is good (dBm)
pub const RSSI_GOOD_DBM: f32 = -85.0;

/// Bounded, insertion-ordered buffer
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> HistoryBuffer<T> {
    /// Create an empty buffer
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full
    ///
    /// # Returns
    ///
    /// * `Option<T>` - The evicted entry, if any
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recent entry
    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Entries oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> HistoryBuffer<T> {
    /// Copy of the entries, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T: Serialize> Serialize for HistoryBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter())
    }
}

/// Signal strength classification used by dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    Excellent,
    Good,
    Weak,
}

impl SignalQuality {
    /// Classify a signal strength in dBm
    pub fn from_dbm(dbm: f32) -> Self {
        if dbm > RSSI_EXCELLENT_DBM {
            SignalQuality::Excellent
        } else if dbm > RSSI_GOOD_DBM {
            SignalQuality::Good
        } else {
            SignalQuality::Weak
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalQuality::Excellent => write!(f, "excellent"),
            SignalQuality::Good => write!(f, "good"),
            SignalQuality::Weak => write!(f, "weak"),
        }
    }
}

/// One signal strength sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RssiSample {
    pub dbm: f32,
    pub observed_at: DateTime<Utc>,
    pub link: LinkId,
}

impl RssiSample {
    pub fn quality(&self) -> SignalQuality {
        SignalQuality::from_dbm(self.dbm)
    }
}

/// One GPS position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub observed_at: DateTime<Utc>,
    pub link: LinkId,
}

impl PositionFix {
    pub fn new(point: GeoPoint, observed_at: DateTime<Utc>, link: LinkId) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
            altitude: point.altitude,
            observed_at,
            link,
        }
    }
}

/// One human-readable station log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    /// Renders as `[HH:MM:SS.mmm] message` in local time
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.at.with_timezone(&Local);
        write!(f, "[{}] {}", local.format("%H:%M:%S%.3f"), self.message)
    }
}

/// A change to one of the history buffers, forwarded to sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryUpdate {
    Rssi(RssiSample),
    Position(PositionFix),
}
