//! # Dual-Source Arbitration
//!
//! Holds the latest observation from each link and resolves the "current"
//! value by freshness.
//!
//! Resolution rule, in order:
//! 1. Both links observed: the later `observed_at` wins (ties go to the primary link)
//! 2. One link observed: that observation
//! 3. Neither: unavailable

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::protocol::frame::{Frame, LinkId, Payload, Tag, MAX_LINKS};

/// A value seen on one link at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation<T> {
    pub value: T,
    pub observed_at: DateTime<Utc>,
    pub link: LinkId,
}

/// Per-link observations of one quantity
#[derive(Debug, Clone)]
pub struct ArbitratedValue<T> {
    slots: [Option<Observation<T>>; MAX_LINKS],
}

impl<T> Default for ArbitratedValue<T> {
    fn default() -> Self {
        Self { slots: [None, None] }
    }
}

impl<T> ArbitratedValue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a link's latest observation, replacing its previous one
    pub fn observe(&mut self, link: LinkId, value: T, observed_at: DateTime<Utc>) {
        self.slots[link.index()] = Some(Observation {
            value,
            observed_at,
            link,
        });
    }

    /// Latest observation from one specific link
    pub fn from_link(&self, link: LinkId) -> Option<&Observation<T>> {
        self.slots[link.index()].as_ref()
    }

    /// Freshest observation across links
    ///
    /// # Examples
    ///
    /// ```
    /// use balloon_ground::protocol::frame::LinkId;
    /// use balloon_ground::telemetry::arbiter::ArbitratedValue;
    /// use chrono::{Duration, Utc};
    ///
    /// let now = Utc::now();
    /// let mut rssi = ArbitratedValue::new();
    /// rssi.observe(LinkId::Secondary, -80.0, now);
    /// rssi.observe(LinkId::Primary, -65.0, now + Duration::milliseconds(5));
    /// assert_eq!(rssi.current().map(|o| o.value), Some(-65.0));
    /// ```
    pub fn current(&self) -> Option<&Observation<T>> {
        match (&self.slots[0], &self.slots[1]) {
            (Some(primary), Some(secondary)) => {
                if secondary.observed_at > primary.observed_at {
                    Some(secondary)
                } else {
                    Some(primary)
                }
            }
            (Some(only), None) | (None, Some(only)) => Some(only),
            (None, None) => None,
        }
    }

    /// Value of the freshest observation
    pub fn current_value(&self) -> Option<&T> {
        self.current().map(|o| &o.value)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Forget every observation
    pub fn clear(&mut self) {
        self.slots = [None, None];
    }
}

/// Raw per-tag arbitration store
///
/// Every dispatched frame is recorded here so the station can always answer
/// "what do we currently believe" for any tag, including ones it does not
/// otherwise interpret.
#[derive(Debug, Default)]
pub struct Arbiter {
    values: HashMap<Tag, ArbitratedValue<Payload>>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame's payload under its tag
    pub fn record(&mut self, frame: &Frame) {
        self.record_as(frame.tag, frame);
    }

    /// Record a frame's payload under an explicit tag
    ///
    /// Used when a frame's payload fails to decode and it is re-filed as unknown.
    pub fn record_as(&mut self, tag: Tag, frame: &Frame) {
        self.values
            .entry(tag)
            .or_default()
            .observe(frame.link, frame.payload.clone(), frame.received_at);
    }

    /// Freshest observation for a tag
    pub fn current(&self, tag: Tag) -> Option<&Observation<Payload>> {
        self.values.get(&tag).and_then(ArbitratedValue::current)
    }

    /// Freshest payload for a tag
    pub fn current_value(&self, tag: Tag) -> Option<&Payload> {
        self.current(tag).map(|o| &o.value)
    }

    /// Latest payload for a tag from one link
    pub fn from_link(&self, tag: Tag, link: LinkId) -> Option<&Observation<Payload>> {
        self.values.get(&tag).and_then(|v| v.from_link(link))
    }

    /// Tags with at least one observation
    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.values.iter().filter(|(_, v)| !v.is_empty()).map(|(tag, _)| tag)
    }
}
