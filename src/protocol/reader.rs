//! # Frame Reader
//!
//! Turns the raw byte stream of one link into decoded [`Frame`]s.
//!
//! The reader is an explicit two-state machine:
//!
//! | Mode | Consumes | Next mode |
//! |------|----------|-----------|
//! | `Line` | bytes up to and including `\n` | `AwaitingBinary(n)` after a valid `PS n`, else `Line` |
//! | `AwaitingBinary(n)` | exactly `n + 5` bytes | always `Line` |
//!
//! Bytes are pushed in with [`FrameReader::feed`]; partial lines and partial
//! binary blocks stay buffered until the rest arrives.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, warn};

use super::frame::*;

/// Framing state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderMode {
    /// Reading newline-terminated text frames
    Line,
    /// Next read is one binary frame carrying this many payload bytes
    AwaitingBinary(usize),
}

impl ReaderMode {
    /// Total bytes the next binary frame occupies on the wire, if armed
    pub fn binary_frame_len(&self) -> Option<usize> {
        match self {
            ReaderMode::Line => None,
            ReaderMode::AwaitingBinary(n) => Some(n + BINARY_FRAMING_OVERHEAD),
        }
    }
}

/// Per-link frame reader
#[derive(Debug)]
pub struct FrameReader {
    link: LinkId,
    mode: ReaderMode,
    buffer: BytesMut,
}

impl FrameReader {
    /// Create a reader for one link, starting in line mode
    pub fn new(link: LinkId) -> Self {
        Self {
            link,
            mode: ReaderMode::Line,
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
        }
    }

    /// Link this reader decodes for
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Current framing mode
    pub fn mode(&self) -> ReaderMode {
        self.mode
    }

    /// Number of bytes buffered but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Push bytes read from the link and return every frame they complete
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes as delivered by the port, any length
    ///
    /// # Returns
    ///
    /// * `Vec<Frame>` - Completed frames in arrival order (possibly empty)
    ///
    /// # Examples
    ///
    /// ```
    /// use balloon_ground::protocol::frame::{LinkId, Tag};
    /// use balloon_ground::protocol::reader::FrameReader;
    ///
    /// let mut reader = FrameReader::new(LinkId::Primary);
    /// let frames = reader.feed(b"RS -71\nFC ");
    /// assert_eq!(frames.len(), 1);
    /// assert_eq!(frames[0].tag, Tag::Rssi);
    /// assert_eq!(reader.buffered(), 3);
    /// ```
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame() {
            frames.push(frame);
        }
        frames
    }

    /// Drop any partially received frame and return to line mode
    ///
    /// # Returns
    ///
    /// * `usize` - Number of buffered bytes that were discarded
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.mode = ReaderMode::Line;
        discarded
    }

    fn next_frame(&mut self) -> Option<Frame> {
        match self.mode {
            ReaderMode::Line => {
                let line = match self.buffer.iter().position(|&b| b == LINE_TERMINATOR) {
                    Some(pos) => self.buffer.split_to(pos + 1).freeze(),
                    None if self.buffer.len() > MAX_LINE_LENGTH => {
                        warn!(
                            "{}: no line terminator within {} bytes, forcing split",
                            self.link, MAX_LINE_LENGTH
                        );
                        let raw = self.buffer.split_to(MAX_LINE_LENGTH).freeze();
                        return Some(Frame::new(Tag::Unknown, Payload::Binary(raw), self.link));
                    }
                    None => return None,
                };

                let frame = self.decode_line(line);
                if frame.tag == Tag::PacketSize {
                    if let Some(size) = parse_packet_size(&frame.payload) {
                        debug!("{}: armed binary read of {} bytes", self.link, size);
                        self.mode = ReaderMode::AwaitingBinary(size);
                    }
                }
                Some(frame)
            }
            ReaderMode::AwaitingBinary(size) => {
                let frame_len = size + BINARY_FRAMING_OVERHEAD;
                if self.buffer.len() < frame_len {
                    return None;
                }

                let block = self.buffer.split_to(frame_len).freeze();
                self.mode = ReaderMode::Line;
                Some(self.decode_binary(block, size))
            }
        }
    }

    /// Decode one line including its terminator
    fn decode_line(&self, mut line: Bytes) -> Frame {
        // Trim "\n" and an optional preceding "\r"
        if line.ends_with(&[LINE_TERMINATOR]) {
            line.truncate(line.len() - 1);
        }
        if line.ends_with(b"\r") {
            line.truncate(line.len() - 1);
        }

        let tag = Tag::from_bytes(&line);
        let header_len = (TAG_LEN + SEPARATOR_LEN).min(line.len());
        line.advance(header_len);

        if line.is_ascii() {
            // ASCII is valid UTF-8
            let text = String::from_utf8_lossy(&line).into_owned();
            Frame::new(tag, Payload::Text(text), self.link)
        } else {
            debug!("{}: {} payload is not ASCII, marking unknown", self.link, tag);
            Frame::new(Tag::Unknown, Payload::Binary(line), self.link)
        }
    }

    /// Decode one binary block of exactly `size + BINARY_FRAMING_OVERHEAD` bytes
    fn decode_binary(&self, block: Bytes, size: usize) -> Frame {
        let tag = Tag::from_bytes(&block);
        let start = TAG_LEN + SEPARATOR_LEN;
        let payload = block.slice(start..start + size);
        Frame::new(tag, Payload::Binary(payload), self.link)
    }
}
