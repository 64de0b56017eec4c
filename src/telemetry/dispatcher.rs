//! # Frame Dispatcher
//!
//! Applies decoded frames to the station state.
//!
//! For every frame the dispatcher:
//! 1. Records the raw payload in the arbitration store
//! 2. Runs exactly one handler chosen by tag
//! 3. Increments the link's packet counter
//!
//! | Tag | Handler |
//! |-----|---------|
//! | `FC` | Flush the image when the counter changes, then record it |
//! | `PS` | Record the announced binary size (the reader arms binary mode) |
//! | `IX` | Store the chunk as the link's pending chunk |
//! | `AP` | Set the apogee flag and flush the image |
//! | `PL` | Place the freshest pending chunk at the given index |
//! | `RS` | Append to the link's RSSI history |
//! | `GS` | Append to the position history |
//! | other | Diagnostics only |

use tracing::{debug, error, info, warn};

use super::arbiter::Observation;
use super::history::{HistoryUpdate, LogEntry, PositionFix, RssiSample};
use super::reassembly::CompletedImage;
use super::sink::StationSink;
use super::state::{LinkStatus, PublishedImage, TelemetrySnapshot, TelemetryState};
use crate::config::Config;
use crate::protocol::frame::{Frame, LinkId, Payload, Tag};
use crate::protocol::message::Message;

/// Applies frames to [`TelemetryState`] and drives the sinks
pub struct Dispatcher {
    state: TelemetryState,
    sink: Box<dyn StationSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(state: TelemetryState, sink: Box<dyn StationSink>) -> Self {
        Self { state, sink }
    }

    /// Create a dispatcher for the links and history sizes in `config`
    pub fn from_config(config: &Config, sink: Box<dyn StationSink>) -> Self {
        let ports: Vec<&str> = config.links.iter().map(|l| l.port.as_str()).collect();
        Self::new(TelemetryState::new(&ports, &config.history), sink)
    }

    pub fn state(&self) -> &TelemetryState {
        &self.state
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.state.snapshot()
    }

    /// Freshest raw payload observed for a tag on any link
    pub fn current_value(&self, tag: Tag) -> Option<&Payload> {
        self.state.arbiter.current_value(tag)
    }

    /// Freshest raw observation for a tag on any link
    pub fn current(&self, tag: Tag) -> Option<&Observation<Payload>> {
        self.state.arbiter.current(tag)
    }

    /// Apply one frame
    ///
    /// Frames from a link that is not configured are dropped with a warning.
    /// Decode failures never abort dispatch: the frame is filed as unknown and
    /// a diagnostic line is logged.
    pub fn dispatch(&mut self, frame: Frame) {
        if self.state.link(frame.link).is_none() {
            warn!("Dropping frame from unconfigured {}: {}", frame.link, frame.describe());
            return;
        }

        debug!("{} <- {}", frame.link, frame.describe());
        self.log(frame.describe());

        let message = match Message::decode(&frame) {
            Ok(message) => {
                self.state.arbiter.record(&frame);
                message
            }
            Err(e) => {
                self.state.arbiter.record_as(Tag::Unknown, &frame);
                self.log(format!("Error: {} ({})", e, frame.link));
                Message::Unknown(frame.payload.clone())
            }
        };

        self.handle(message, &frame);

        if let Some(link) = self.state.link_mut(frame.link) {
            link.packets_received += 1;
        }
    }

    fn handle(&mut self, message: Message, frame: &Frame) {
        let link = frame.link;
        let at = frame.received_at;

        match message {
            Message::FrameCounter(counter) => {
                if self.state.frame_counter != counter {
                    self.flush_image();
                    self.state.frame_counter = counter;
                }
            }
            Message::PacketSize(size) => {
                if let Some(state) = self.state.link_mut(link) {
                    state.announced_packet_size = Some(size);
                }
            }
            Message::ImageChunk(chunk) => {
                self.state.pending_chunk.observe(link, chunk, at);
            }
            Message::Apogee(flag) => {
                self.state.apogee.observe(link, flag, at);
                self.state.apogee_detected = true;
                warn!("Apogee reported on {}", link);
                self.flush_image();
                self.log("⚠ APOGEE DETECTED!");
            }
            Message::Placement(index) => {
                let chunk = self.state.pending_chunk.current().map(|o| (o.value.clone(), o.link));
                match chunk {
                    Some((chunk, source)) => {
                        debug!("Placing {} byte chunk from {} at index {}", chunk.len(), source, index);
                        if self.state.reassembly.place(index, chunk).is_some() {
                            debug!("Chunk {} replaced", index);
                        }
                    }
                    None => self.log(format!("PL {}: no pending chunk to place ({})", index, link)),
                }
            }
            Message::Rssi(dbm) => {
                let sample = RssiSample {
                    dbm,
                    observed_at: at,
                    link,
                };
                if let Some(state) = self.state.link_mut(link) {
                    state.rssi_history.push(sample);
                }
                self.state.rssi.observe(link, sample, at);
                self.update_history(HistoryUpdate::Rssi(sample));
            }
            Message::Position(point) => {
                let fix = PositionFix::new(point, at, link);
                self.state.position_history.push(fix);
                self.state.position.observe(link, fix, at);
                self.update_history(HistoryUpdate::Position(fix));
            }
            Message::Other(tag, payload) => {
                debug!("raw {}: {} ({})", tag, payload, link);
            }
            Message::Unknown(payload) => {
                debug!("unknown frame ({} bytes) on {}", payload.len(), link);
            }
        }
    }

    /// Finalize the current image cycle
    ///
    /// Persists and publishes the image when at least one chunk was placed.
    ///
    /// # Returns
    ///
    /// * `Option<u64>` - Sequence number of the published image, `None` if the
    ///   buffer was empty
    pub fn flush_image(&mut self) -> Option<u64> {
        let image = self.state.reassembly.flush()?;

        if !image.is_complete() {
            let gaps = describe_gaps(&image);
            warn!("Image {} is missing {} chunk(s): {}", image.sequence, image.missing_count, gaps);
            self.log(format!(
                "Image {} missing {} chunk(s): {}",
                image.sequence, image.missing_count, gaps
            ));
        }

        match self.sink.persist_image(&image) {
            Ok(()) => {
                info!("Saved image {} ({} bytes)", image.sequence, image.size());
                self.log(format!(
                    "✓ Saved: frame_{} ({:.1} KB)",
                    image.sequence,
                    image.size() as f64 / 1024.0
                ));
            }
            Err(e) => {
                error!("Failed to persist image {}: {}", image.sequence, e);
                self.log(format!("Error processing image: {}", e));
            }
        }

        self.state.image = Some(PublishedImage::from_completed(&image));
        Some(image.sequence)
    }

    /// Update a link's connection status
    pub fn set_link_status(&mut self, link: LinkId, status: LinkStatus) {
        match self.state.link_mut(link) {
            Some(state) => {
                debug!("{} status: {} -> {}", link, state.status, status);
                state.status = status;
            }
            None => warn!("Status update for unconfigured {}", link),
        }
    }

    /// Append a human-readable line to the station log and the log sink
    pub fn log(&mut self, message: impl Into<String>) {
        let entry = LogEntry::new(message);
        if let Err(e) = self.sink.append_log(&entry) {
            warn!("Failed to append log entry: {}", e);
        }
        self.state.log.push(entry);
    }

    fn update_history(&mut self, update: HistoryUpdate) {
        if let Err(e) = self.sink.update_history(&update) {
            warn!("Failed to record history update: {}", e);
        }
    }
}

/// Bounded list of an image's missing indices, e.g. `[1, 4, 5] ...`
fn describe_gaps(image: &CompletedImage) -> String {
    let truncated = image.missing_count > image.missing_indices.len() as u64;
    format!(
        "{:?}{}",
        image.missing_indices,
        if truncated { " ..." } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::error::GroundStationError;
    use crate::protocol::encoder::{encode_image_chunk, encode_line_frame};
    use crate::protocol::reader::FrameReader;
    use crate::telemetry::sink::MockStationSink;
    use bytes::Bytes;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::{Arc, Mutex};

    type Persisted = Arc<Mutex<Vec<CompletedImage>>>;

    /// Sink mock that accepts everything and records persisted images
    fn recording_sink() -> (MockStationSink, Persisted) {
        let persisted: Persisted = Arc::new(Mutex::new(Vec::new()));
        let captured = persisted.clone();

        let mut sink = MockStationSink::new();
        sink.expect_persist_image().returning(move |image| {
            captured.lock().unwrap().push(image.clone());
            Ok(())
        });
        sink.expect_append_log().returning(|_| Ok(()));
        sink.expect_update_history().returning(|_| Ok(()));
        (sink, persisted)
    }

    fn dispatcher(links: &[&str]) -> (Dispatcher, Persisted) {
        let (sink, persisted) = recording_sink();
        let state = TelemetryState::new(links, &HistoryConfig::default());
        (Dispatcher::new(state, Box::new(sink)), persisted)
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::milliseconds(ms)
    }

    fn text(tag: Tag, value: &str, link: LinkId, ms: i64) -> Frame {
        Frame::with_timestamp(tag, Payload::Text(value.to_string()), link, at(ms))
    }

    fn chunk(data: &'static [u8], link: LinkId, ms: i64) -> Frame {
        Frame::with_timestamp(Tag::ImageChunk, Payload::Binary(Bytes::from_static(data)), link, at(ms))
    }

    /// Decode wire bytes on one link and dispatch every frame, stamped at `ms`
    fn feed(dispatcher: &mut Dispatcher, reader: &mut FrameReader, wire: &[u8], ms: i64) {
        for mut frame in reader.feed(wire) {
            frame.received_at = at(ms);
            dispatcher.dispatch(frame);
        }
    }

    #[test]
    fn test_packet_size_chunk_placement_and_frame_counter_flush() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);
        let mut reader = FrameReader::new(LinkId::Primary);

        feed(&mut dispatcher, &mut reader, b"FC 1\n", 0);
        feed(&mut dispatcher, &mut reader, b"PS 10\n", 1);
        assert_eq!(dispatcher.state().links[0].announced_packet_size, Some(10));

        feed(&mut dispatcher, &mut reader, b"IX 0123456789\r\n", 2);
        assert_eq!(
            dispatcher.state().pending_chunk.current_value(),
            Some(&Bytes::from_static(b"0123456789"))
        );

        feed(&mut dispatcher, &mut reader, b"PL 0\n", 3);
        assert_eq!(dispatcher.state().reassembly.indices().collect::<Vec<_>>(), vec![0]);
        assert!(persisted.lock().unwrap().is_empty());

        feed(&mut dispatcher, &mut reader, b"FC 2\n", 4);

        let images = persisted.lock().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(&images[0].data[..], b"0123456789");
        assert_eq!(images[0].sequence, 1);
        assert!(dispatcher.state().reassembly.is_empty());
        assert_eq!(dispatcher.state().frame_counter, 2);

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.image_sequence, 1);
        assert_eq!(snapshot.image.as_ref().unwrap().size_bytes, 10);
        assert_eq!(&snapshot.image.as_ref().unwrap().data[..], b"0123456789");
        assert_eq!(snapshot.link(LinkId::Primary).unwrap().packets_received, 5);
    }

    #[test]
    fn test_repeated_frame_counter_does_not_flush() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(text(Tag::FrameCounter, "5", LinkId::Primary, 0));
        dispatcher.dispatch(chunk(b"abc", LinkId::Primary, 1));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 2));
        dispatcher.dispatch(text(Tag::FrameCounter, "5", LinkId::Primary, 3));

        assert!(persisted.lock().unwrap().is_empty());
        assert_eq!(dispatcher.state().reassembly.len(), 1);
    }

    #[test]
    fn test_opening_frame_counter_zero_does_not_flush() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(chunk(b"early", LinkId::Primary, 0));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 1));
        dispatcher.dispatch(text(Tag::FrameCounter, "0", LinkId::Primary, 2));
        assert!(persisted.lock().unwrap().is_empty());

        dispatcher.dispatch(text(Tag::FrameCounter, "1", LinkId::Primary, 3));
        assert_eq!(&persisted.lock().unwrap()[0].data[..], b"early");
    }

    #[test]
    fn test_apogee_before_any_placement() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(text(Tag::Apogee, "1", LinkId::Primary, 0));

        assert!(persisted.lock().unwrap().is_empty());
        let snapshot = dispatcher.snapshot();
        assert!(snapshot.apogee_detected);
        assert_eq!(snapshot.image_sequence, 0);
        assert!(snapshot.image.is_none());
        assert_eq!(snapshot.apogee.unwrap().value, "1");
        assert!(snapshot.log.iter().any(|line| line.ends_with("⚠ APOGEE DETECTED!")));
    }

    #[test]
    fn test_apogee_forces_flush() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(chunk(b"top", LinkId::Primary, 0));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 1));
        dispatcher.dispatch(text(Tag::Apogee, "1", LinkId::Primary, 2));

        assert_eq!(persisted.lock().unwrap().len(), 1);
        assert_eq!(dispatcher.snapshot().image_sequence, 1);
    }

    #[test]
    fn test_interleaved_placements_across_links() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        let mut primary = FrameReader::new(LinkId::Primary);
        let mut secondary = FrameReader::new(LinkId::Secondary);

        // Each link delivers complete IX+PL pairs; order of indices is scrambled
        feed(&mut dispatcher, &mut secondary, &encode_image_chunk(2, b"CC"), 10);
        feed(&mut dispatcher, &mut primary, &encode_image_chunk(0, b"AA"), 20);
        feed(&mut dispatcher, &mut secondary, &encode_image_chunk(3, b"DD"), 30);
        feed(&mut dispatcher, &mut primary, &encode_image_chunk(1, b"BB"), 40);
        feed(&mut dispatcher, &mut primary, &encode_line_frame(Tag::FrameCounter, "9"), 50);

        let images = persisted.lock().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(&images[0].data[..], b"AABBCCDD");
        assert!(images[0].is_complete());
    }

    #[test]
    fn test_placement_uses_freshest_pending_chunk() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);

        dispatcher.dispatch(chunk(b"older", LinkId::Primary, 10));
        dispatcher.dispatch(chunk(b"newer", LinkId::Secondary, 20));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 30));

        let image = dispatcher.flush_image();
        assert_eq!(image, Some(1));
        assert_eq!(&dispatcher.snapshot().image.unwrap().data[..], b"newer");
    }

    #[test]
    fn test_placement_without_pending_chunk() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 0));

        assert!(dispatcher.state().reassembly.is_empty());
        assert!(dispatcher.snapshot().log.iter().any(|l| l.contains("no pending chunk")));
    }

    #[test]
    fn test_rssi_arbitrated_by_freshness() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);

        // Secondary reports first, but the primary sample is newer
        dispatcher.dispatch(text(Tag::Rssi, "-91", LinkId::Secondary, 100));
        dispatcher.dispatch(text(Tag::Rssi, "-64", LinkId::Primary, 120));

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.rssi.unwrap().dbm, -64.0);
        assert_eq!(snapshot.rssi.unwrap().link, LinkId::Primary);
        assert_eq!(dispatcher.current_value(Tag::Rssi), Some(&Payload::Text("-64".into())));

        // Each link keeps its own history
        assert_eq!(snapshot.link(LinkId::Primary).unwrap().rssi_history.len(), 1);
        assert_eq!(snapshot.link(LinkId::Secondary).unwrap().rssi_history[0].dbm, -91.0);
    }

    #[test]
    fn test_position_history_and_arbitration() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);

        dispatcher.dispatch(text(Tag::Position, "45.0,7.0,1000", LinkId::Primary, 10));
        dispatcher.dispatch(text(Tag::Position, "45.1,7.1,1500", LinkId::Secondary, 20));

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.position_history.len(), 2);
        assert_eq!(snapshot.position.unwrap().altitude, 1500.0);
        assert_eq!(snapshot.position.unwrap().link, LinkId::Secondary);
    }

    #[test]
    fn test_history_updates_reach_sink() {
        let mut sink = MockStationSink::new();
        sink.expect_append_log().returning(|_| Ok(()));
        sink.expect_update_history()
            .withf(|update| matches!(update, HistoryUpdate::Rssi(s) if s.dbm == -70.0))
            .times(1)
            .returning(|_| Ok(()));

        let state = TelemetryState::new(&["/dev/ttyUSB0"], &HistoryConfig::default());
        let mut dispatcher = Dispatcher::new(state, Box::new(sink));
        dispatcher.dispatch(text(Tag::Rssi, "-70", LinkId::Primary, 0));
    }

    #[test]
    fn test_decode_failure_is_recorded_as_unknown() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0"]);
        let mut reader = FrameReader::new(LinkId::Primary);

        feed(&mut dispatcher, &mut reader, b"RS loud\nFC \xFF\xFE\nRS -75\n", 0);

        assert_eq!(dispatcher.current_value(Tag::Unknown).map(Payload::len), Some(2));
        assert_eq!(dispatcher.snapshot().rssi.unwrap().dbm, -75.0);
        assert_eq!(dispatcher.snapshot().link(LinkId::Primary).unwrap().packets_received, 3);
        assert_eq!(dispatcher.state().frame_counter, 0);
        assert!(dispatcher.snapshot().log.iter().any(|l| l.contains("invalid number 'loud'")));
    }

    #[test]
    fn test_other_tags_change_nothing_but_counters() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(text(Tag::Other(*b"TM"), "21.5C", LinkId::Primary, 0));

        assert!(persisted.lock().unwrap().is_empty());
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.total_packets(), 1);
        assert!(snapshot.rssi.is_none());
        assert_eq!(dispatcher.current_value(Tag::Other(*b"TM")), Some(&Payload::Text("21.5C".into())));
    }

    #[test]
    fn test_frames_from_unconfigured_link_are_dropped() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0"]);
        dispatcher.dispatch(text(Tag::Rssi, "-70", LinkId::Secondary, 0));
        assert_eq!(dispatcher.snapshot().total_packets(), 0);
        assert!(dispatcher.current(Tag::Rssi).is_none());
    }

    #[test]
    fn test_gaps_logged_but_image_published() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(chunk(b"A", LinkId::Primary, 0));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 1));
        dispatcher.dispatch(chunk(b"C", LinkId::Primary, 2));
        dispatcher.dispatch(text(Tag::Placement, "2", LinkId::Primary, 3));
        dispatcher.dispatch(text(Tag::FrameCounter, "1", LinkId::Primary, 4));

        assert_eq!(&persisted.lock().unwrap()[0].data[..], b"AC");
        assert!(dispatcher.snapshot().log.iter().any(|l| l.contains("missing 1 chunk(s): [1]")));
    }

    #[test]
    fn test_huge_placement_index_keeps_flush_bounded() {
        let (mut dispatcher, persisted) = dispatcher(&["/dev/ttyUSB0"]);

        dispatcher.dispatch(chunk(b"A", LinkId::Primary, 0));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 1));
        dispatcher.dispatch(chunk(b"Z", LinkId::Primary, 2));
        dispatcher.dispatch(text(Tag::Placement, &u32::MAX.to_string(), LinkId::Primary, 3));

        assert_eq!(dispatcher.flush_image(), Some(1));
        assert_eq!(&persisted.lock().unwrap()[0].data[..], b"AZ");

        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.image.as_ref().unwrap().missing_chunks, u64::from(u32::MAX) - 1);
        let longest = snapshot.log.iter().map(String::len).max().unwrap();
        assert!(longest < 1_000, "log line of {} bytes", longest);

        let gaps = snapshot.log.iter().find(|l| l.contains("chunk(s):")).unwrap();
        assert!(gaps.contains("missing 4294967294 chunk(s): [1, 2, 3"));
        assert!(gaps.ends_with("16] ..."));
    }

    #[test]
    fn test_persist_failure_still_publishes() {
        let mut sink = MockStationSink::new();
        sink.expect_persist_image()
            .times(1)
            .returning(|_| Err(GroundStationError::Sink("disk full".to_string())));
        sink.expect_append_log().returning(|_| Ok(()));

        let state = TelemetryState::new(&["/dev/ttyUSB0"], &HistoryConfig::default());
        let mut dispatcher = Dispatcher::new(state, Box::new(sink));
        dispatcher.dispatch(chunk(b"xyz", LinkId::Primary, 0));
        dispatcher.dispatch(text(Tag::Placement, "0", LinkId::Primary, 1));

        assert_eq!(dispatcher.flush_image(), Some(1));
        let snapshot = dispatcher.snapshot();
        assert_eq!(snapshot.image.unwrap().size_bytes, 3);
        assert!(snapshot.log.iter().any(|l| l.contains("Error processing image: Sink error: disk full")));
        assert!(dispatcher.state().reassembly.is_empty());
    }

    #[test]
    fn test_link_status_updates() {
        let (mut dispatcher, _) = dispatcher(&["/dev/ttyUSB0"]);
        dispatcher.set_link_status(LinkId::Primary, LinkStatus::Connecting);
        assert_eq!(dispatcher.snapshot().links[0].status, LinkStatus::Connecting);
        dispatcher.set_link_status(LinkId::Primary, LinkStatus::Connected);
        assert!(dispatcher.snapshot().any_connected());
    }
}
