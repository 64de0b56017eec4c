//! # Typed Messages
//!
//! Interprets a frame's payload according to its tag.

use bytes::Bytes;

use super::frame::*;
use crate::error::{GroundStationError, Result};

/// GPS position as reported by a `GS` frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Altitude in meters
    pub altitude: f64,
}

/// Frame payload decoded according to its tag
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    FrameCounter(u32),
    PacketSize(usize),
    ImageChunk(Bytes),
    Apogee(String),
    Placement(u32),
    Rssi(f32),
    Position(GeoPoint),
    /// Well-formed frame with a tag this station does not interpret
    Other(Tag, Payload),
    /// Frame the reader could not decode
    Unknown(Payload),
}

impl Message {
    /// Decode a frame into a typed message
    ///
    /// # Arguments
    ///
    /// * `frame` - Frame produced by the reader
    ///
    /// # Returns
    ///
    /// * `Result<Message>` - Decoded message
    ///
    /// # Errors
    ///
    /// Returns `GroundStationError::Decode` if a numeric or position payload is
    /// malformed. Callers treat such frames as unknown.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload;
        let message = match frame.tag {
            Tag::FrameCounter => Message::FrameCounter(parse_number(frame.tag, payload)?),
            Tag::PacketSize => Message::PacketSize(parse_packet_size(payload).ok_or_else(|| {
                GroundStationError::Decode(format!("PS: invalid packet size '{}'", payload))
            })?),
            Tag::ImageChunk => Message::ImageChunk(payload.to_bytes()),
            Tag::Apogee => Message::Apogee(text(frame.tag, payload)?.trim().to_string()),
            Tag::Placement => Message::Placement(parse_number(frame.tag, payload)?),
            Tag::Rssi => {
                let dbm: f32 = parse_number(frame.tag, payload)?;
                if !dbm.is_finite() {
                    return Err(GroundStationError::Decode(format!("RS: non-finite value '{}'", payload)));
                }
                Message::Rssi(dbm)
            }
            Tag::Position => Message::Position(parse_position(text(frame.tag, payload)?)?),
            Tag::Other(_) => Message::Other(frame.tag, payload.clone()),
            Tag::Unknown => Message::Unknown(payload.clone()),
        };
        Ok(message)
    }
}

fn text(tag: Tag, payload: &Payload) -> Result<&str> {
    payload
        .as_text()
        .ok_or_else(|| GroundStationError::Decode(format!("{}: expected text payload, got {}", tag, payload)))
}

fn parse_number<T: std::str::FromStr>(tag: Tag, payload: &Payload) -> Result<T> {
    let raw = text(tag, payload)?.trim();
    raw.parse::<T>()
        .map_err(|_| GroundStationError::Decode(format!("{}: invalid number '{}'", tag, raw)))
}

/// Parse `lat,lon,alt` into a [`GeoPoint`]
///
/// # Errors
///
/// Returns `GroundStationError::Decode` unless exactly three finite numbers
/// are present and the coordinates are within range.
pub fn parse_position(text: &str) -> Result<GeoPoint> {
    let fields: Vec<&str> = text.trim().split(',').map(str::trim).collect();
    if fields.len() != 3 {
        return Err(GroundStationError::Decode(format!(
            "GS: expected lat,lon,alt but got {} field(s) in '{}'",
            fields.len(),
            text
        )));
    }

    let mut values = [0f64; 3];
    for (value, field) in values.iter_mut().zip(&fields) {
        *value = field
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| GroundStationError::Decode(format!("GS: invalid coordinate '{}'", field)))?;
    }

    let [latitude, longitude, altitude] = values;
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(GroundStationError::Decode(format!(
            "GS: coordinates out of range ({}, {})",
            latitude, longitude
        )));
    }

    Ok(GeoPoint {
        latitude,
        longitude,
        altitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: Tag, text: &str) -> Frame {
        Frame::new(tag, Payload::Text(text.to_string()), LinkId::Primary)
    }

    #[test]
    fn test_decode_numeric_messages() {
        assert_eq!(Message::decode(&frame(Tag::FrameCounter, "42")).unwrap(), Message::FrameCounter(42));
        assert_eq!(Message::decode(&frame(Tag::Placement, " 7 ")).unwrap(), Message::Placement(7));
        assert_eq!(Message::decode(&frame(Tag::PacketSize, "200")).unwrap(), Message::PacketSize(200));
        assert_eq!(Message::decode(&frame(Tag::Rssi, "-71.5")).unwrap(), Message::Rssi(-71.5));
    }

    #[test]
    fn test_decode_malformed_numbers() {
        assert!(Message::decode(&frame(Tag::FrameCounter, "x1")).is_err());
        assert!(Message::decode(&frame(Tag::Placement, "-1")).is_err());
        assert!(Message::decode(&frame(Tag::PacketSize, "0")).is_err());
        assert!(Message::decode(&frame(Tag::Rssi, "")).is_err());
        assert!(Message::decode(&frame(Tag::Rssi, "NaN")).is_err());
    }

    #[test]
    fn test_decode_image_chunk_accepts_text_payload() {
        let message = Message::decode(&frame(Tag::ImageChunk, "abc")).unwrap();
        assert_eq!(message, Message::ImageChunk(Bytes::from_static(b"abc")));
    }

    #[test]
    fn test_decode_apogee() {
        let message = Message::decode(&frame(Tag::Apogee, "1")).unwrap();
        assert_eq!(message, Message::Apogee("1".to_string()));
    }

    #[test]
    fn test_decode_position() {
        let message = Message::decode(&frame(Tag::Position, "48.8566, 2.3522, 31000.5")).unwrap();
        match message {
            Message::Position(point) => {
                assert!((point.latitude - 48.8566).abs() < 1e-9);
                assert!((point.longitude - 2.3522).abs() < 1e-9);
                assert!((point.altitude - 31000.5).abs() < 1e-9);
            }
            other => panic!("Expected Position, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_position_errors() {
        assert!(parse_position("48.8,2.3").is_err());
        assert!(parse_position("48.8,2.3,100,5").is_err());
        assert!(parse_position("north,2.3,100").is_err());
        assert!(parse_position("91.0,2.3,100").is_err());
        assert!(parse_position("45.0,181.0,100").is_err());
    }

    #[test]
    fn test_decode_binary_where_text_expected() {
        let frame = Frame::new(Tag::Rssi, Payload::Binary(Bytes::from_static(b"-70")), LinkId::Primary);
        assert!(Message::decode(&frame).is_err());
    }

    #[test]
    fn test_decode_other_and_unknown() {
        let other = frame(Tag::Other(*b"ZZ"), "hi");
        assert_eq!(
            Message::decode(&other).unwrap(),
            Message::Other(Tag::Other(*b"ZZ"), Payload::Text("hi".into()))
        );

        let unknown = frame(Tag::Unknown, "??");
        assert_eq!(Message::decode(&unknown).unwrap(), Message::Unknown(Payload::Text("??".into())));
    }
}
