//! # Balloon Protocol Constants and Types
//!
//! Core definitions for the balloon downlink framing.
//!
//! ## Wire Format
//!
//! ```text
//! Line mode:    T T ' ' <ascii text> '\n'
//! Binary mode:  T T ' ' <n payload bytes> '\r' '\n'     (n announced by a preceding PS frame)
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Length of the tag at the start of every frame
pub const TAG_LEN: usize = 2;

/// Separator byte count between tag and payload
pub const SEPARATOR_LEN: usize = 1;

/// Separator byte written by the airborne side
pub const SEPARATOR: u8 = b' ';

/// Line-mode frame terminator
pub const LINE_TERMINATOR: u8 = b'\n';

/// Trailer following a binary payload
pub const BINARY_TRAILER: &[u8] = b"\r\n";

/// Fixed framing overhead of a binary frame: tag(2) + separator(1) + trailer(2)
pub const BINARY_FRAMING_OVERHEAD: usize = TAG_LEN + SEPARATOR_LEN + BINARY_TRAILER.len();

/// Longest line accepted before it is force-split into an unknown frame
pub const MAX_LINE_LENGTH: usize = 4096;

/// Largest binary payload a `PS` frame may announce
pub const MAX_BINARY_PAYLOAD: usize = 65_536;

/// Code rendered for frames whose tag could not be decoded
pub const UNKNOWN_TAG_CODE: &str = "XX";

/// Maximum number of links a station can arbitrate between
pub const MAX_LINKS: usize = 2;

/// Physical link a frame arrived on
///
/// `Primary` is the first physical link and wins arbitration ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkId {
    Primary,
    Secondary,
}

impl LinkId {
    /// All links in physical order
    pub const ALL: [LinkId; MAX_LINKS] = [LinkId::Primary, LinkId::Secondary];

    /// Slot index of this link (0 or 1)
    pub fn index(self) -> usize {
        match self {
            LinkId::Primary => 0,
            LinkId::Secondary => 1,
        }
    }

    /// Link for a slot index, if in range
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkId::Primary => write!(f, "link 1"),
            LinkId::Secondary => write!(f, "link 2"),
        }
    }
}

/// Two-character frame tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `FC` - camera frame counter
    FrameCounter,
    /// `PS` - size of the next binary frame
    PacketSize,
    /// `IX` - binary image chunk
    ImageChunk,
    /// `AP` - apogee detected
    Apogee,
    /// `PL` - placement index for the pending chunk
    Placement,
    /// `RS` - received signal strength in dBm
    Rssi,
    /// `GS` - GPS position `lat,lon,alt`
    Position,
    /// Any other printable two-character code
    Other([u8; TAG_LEN]),
    /// Sentinel for undecodable tags or payloads
    Unknown,
}

impl Tag {
    /// Decode a tag from the leading bytes of a frame
    ///
    /// Returns [`Tag::Unknown`] when fewer than two bytes are present or the
    /// bytes are not printable ASCII.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let code = match bytes.get(..TAG_LEN) {
            Some(&[a, b]) => [a, b],
            _ => return Tag::Unknown,
        };

        if !code.iter().all(|b| b.is_ascii_graphic()) {
            return Tag::Unknown;
        }

        match &code {
            b"FC" => Tag::FrameCounter,
            b"PS" => Tag::PacketSize,
            b"IX" => Tag::ImageChunk,
            b"AP" => Tag::Apogee,
            b"PL" => Tag::Placement,
            b"RS" => Tag::Rssi,
            b"GS" => Tag::Position,
            b"XX" => Tag::Unknown,
            _ => Tag::Other(code),
        }
    }

    /// Wire code of this tag
    pub fn code(&self) -> [u8; TAG_LEN] {
        match self {
            Tag::FrameCounter => *b"FC",
            Tag::PacketSize => *b"PS",
            Tag::ImageChunk => *b"IX",
            Tag::Apogee => *b"AP",
            Tag::Placement => *b"PL",
            Tag::Rssi => *b"RS",
            Tag::Position => *b"GS",
            Tag::Other(code) => *code,
            Tag::Unknown => *b"XX",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        // Codes are printable ASCII by construction
        write!(f, "{}{}", code[0] as char, code[1] as char)
    }
}

/// Frame payload: decoded text or raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    /// Text content, if this payload decoded as text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            Payload::Binary(_) => None,
        }
    }

    /// Raw bytes of the payload regardless of variant
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    /// Payload as an owned byte buffer
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Payload::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Payload::Binary(bytes) => bytes.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Text(text) => write!(f, "{}", text),
            Payload::Binary(bytes) => write!(f, "Binary packet ({} bytes)", bytes.len()),
        }
    }
}

/// One decoded protocol unit
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Frame tag
    pub tag: Tag,

    /// Frame payload
    pub payload: Payload,

    /// Link the frame arrived on
    pub link: LinkId,

    /// Time the reader completed the frame
    pub received_at: DateTime<Utc>,
}

impl Frame {
    /// Create a frame stamped with the current time
    pub fn new(tag: Tag, payload: Payload, link: LinkId) -> Self {
        Self::with_timestamp(tag, payload, link, Utc::now())
    }

    /// Create a frame with an explicit receive time
    pub fn with_timestamp(tag: Tag, payload: Payload, link: LinkId, received_at: DateTime<Utc>) -> Self {
        Self {
            tag,
            payload,
            link,
            received_at,
        }
    }

    /// Human-readable one-line description, as written to the station log
    pub fn describe(&self) -> String {
        format!("{}: {}", self.tag, self.payload)
    }
}

/// Parse a `PS` payload into an armed binary length
///
/// Returns `None` unless the payload is a positive integer no larger than
/// [`MAX_BINARY_PAYLOAD`].
pub fn parse_packet_size(payload: &Payload) -> Option<usize> {
    let size = payload.as_text()?.trim().parse::<usize>().ok()?;
    (size > 0 && size <= MAX_BINARY_PAYLOAD).then_some(size)
}
