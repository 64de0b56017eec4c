//! # Image Reassembly
//!
//! Accumulates image chunks keyed by sequence index for the current image
//! cycle. A flush concatenates whatever chunks are present in ascending index
//! order. Completeness is not enforced: missing indices yield a shorter image,
//! and are only reported.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeMap;

/// First sequence number assigned to a flushed image
pub const FIRST_IMAGE_SEQUENCE: u64 = 1;

/// Most missing indices listed individually in a gap report
pub const MAX_REPORTED_GAPS: usize = 16;

/// Image produced by a non-empty flush
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedImage {
    /// Image sequence number (starts at 1, increments per non-empty flush)
    pub sequence: u64,

    /// Concatenated chunk bytes
    pub data: Bytes,

    /// Number of chunks that made up the image
    pub chunk_count: usize,

    /// Number of indices between 0 and the highest placed index that never arrived
    pub missing_count: u64,

    /// The lowest missing indices, at most [`MAX_REPORTED_GAPS`] of them
    pub missing_indices: Vec<u32>,
}

impl CompletedImage {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_count == 0
    }
}

/// Chunks of the current image cycle
#[derive(Debug)]
pub struct ReassemblyBuffer {
    chunks: BTreeMap<u32, Bytes>,
    next_sequence: u64,
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self {
            chunks: BTreeMap::new(),
            next_sequence: FIRST_IMAGE_SEQUENCE,
        }
    }
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a chunk at an index
    ///
    /// # Returns
    ///
    /// * `Option<Bytes>` - The chunk previously stored at that index, if any
    pub fn place(&mut self, index: u32, chunk: Bytes) -> Option<Bytes> {
        self.chunks.insert(index, chunk)
    }

    /// Number of chunks held
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Indices held, ascending
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.chunks.keys().copied()
    }

    /// Number of indices missing between 0 and the highest placed index
    pub fn missing_count(&self) -> u64 {
        match self.chunks.keys().next_back() {
            Some(&highest) => u64::from(highest) + 1 - self.chunks.len() as u64,
            None => 0,
        }
    }

    /// The lowest missing indices, ascending, at most `limit` of them
    ///
    /// Walks the gaps between placed indices, so the cost is bounded by the
    /// number of chunks plus `limit` regardless of how large an index is.
    pub fn missing_indices(&self, limit: usize) -> Vec<u32> {
        let mut missing = Vec::new();
        let mut expected: u64 = 0;

        for &index in self.chunks.keys() {
            let index = u64::from(index);
            while expected < index && missing.len() < limit {
                missing.push(expected as u32);
                expected += 1;
            }
            if missing.len() >= limit {
                break;
            }
            expected = index + 1;
        }
        missing
    }

    /// Sequence number of the most recent flushed image (0 if none yet)
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - FIRST_IMAGE_SEQUENCE
    }

    /// Finalize the current image cycle
    ///
    /// # Returns
    ///
    /// * `Option<CompletedImage>` - `None` if no chunk was placed, otherwise the
    ///   concatenated image; the buffer is cleared and the sequence advanced
    ///
    /// # Examples
    ///
    /// ```
    /// use balloon_ground::telemetry::reassembly::ReassemblyBuffer;
    /// use bytes::Bytes;
    ///
    /// let mut buffer = ReassemblyBuffer::new();
    /// buffer.place(1, Bytes::from_static(b"world"));
    /// buffer.place(0, Bytes::from_static(b"hello "));
    ///
    /// let image = buffer.flush().unwrap();
    /// assert_eq!(&image.data[..], b"hello world");
    /// assert_eq!(image.sequence, 1);
    /// assert!(buffer.is_empty());
    /// ```
    pub fn flush(&mut self) -> Option<CompletedImage> {
        if self.chunks.is_empty() {
            return None;
        }

        let missing_count = self.missing_count();
        let missing_indices = self.missing_indices(MAX_REPORTED_GAPS);
        let chunks = std::mem::take(&mut self.chunks);
        let chunk_count = chunks.len();

        let total: usize = chunks.values().map(Bytes::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for chunk in chunks.into_values() {
            data.extend_from_slice(&chunk);
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Some(CompletedImage {
            sequence,
            data: data.freeze(),
            chunk_count,
            missing_count,
            missing_indices,
        })
    }
}
