//! # Balloon Frame Encoder
//!
//! Encodes frames into the downlink wire format. This is the airborne side of
//! [`FrameReader`](super::reader::FrameReader), used by loopback tooling and
//! to drive readers and link workers in tests.

use super::frame::*;

/// Encode a line-mode text frame
///
/// # Arguments
///
/// * `tag` - Frame tag
/// * `text` - ASCII payload (must not contain `\n`)
///
/// # Returns
///
/// * `Vec<u8>` - `TT <text>\n`
///
/// # Examples
///
/// ```
/// use balloon_ground::protocol::encoder::encode_line_frame;
/// use balloon_ground::protocol::frame::Tag;
///
/// assert_eq!(encode_line_frame(Tag::Rssi, "-70"), b"RS -70\n");
/// ```
pub fn encode_line_frame(tag: Tag, text: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(TAG_LEN + SEPARATOR_LEN + text.len() + 1);
    frame.extend_from_slice(&tag.code());
    frame.push(SEPARATOR);
    frame.extend_from_slice(text.as_bytes());
    frame.push(LINE_TERMINATOR);
    frame
}

/// Encode a binary frame preceded by its `PS` announcement
///
/// # Arguments
///
/// * `tag` - Tag of the binary frame (normally [`Tag::ImageChunk`])
/// * `payload` - Raw payload bytes (must not be empty)
///
/// # Returns
///
/// * `Vec<u8>` - `PS <n>\n` followed by `TT <payload>\r\n`
pub fn encode_binary_frame(tag: Tag, payload: &[u8]) -> Vec<u8> {
    let mut frame = encode_line_frame(Tag::PacketSize, &payload.len().to_string());
    frame.reserve(payload.len() + BINARY_FRAMING_OVERHEAD);
    frame.extend_from_slice(&tag.code());
    frame.push(SEPARATOR);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(BINARY_TRAILER);
    frame
}

/// Encode one image chunk transfer: announced `IX` block followed by `PL <index>`
///
/// # Arguments
///
/// * `index` - Chunk sequence index within the image
/// * `chunk` - Chunk bytes
pub fn encode_image_chunk(index: u32, chunk: &[u8]) -> Vec<u8> {
    let mut frame = encode_binary_frame(Tag::ImageChunk, chunk);
    frame.extend_from_slice(&encode_line_frame(Tag::Placement, &index.to_string()));
    frame
}

/// Encode a complete image cycle split into chunks of `chunk_size` bytes
///
/// Emits every chunk with its placement followed by `FC <next_counter>`, which
/// closes the cycle on the ground.
pub fn encode_image(image: &[u8], chunk_size: usize, next_counter: u32) -> Vec<u8> {
    let mut wire = Vec::new();
    for (index, chunk) in image.chunks(chunk_size.max(1)).enumerate() {
        wire.extend_from_slice(&encode_image_chunk(index as u32, chunk));
    }
    wire.extend_from_slice(&encode_line_frame(Tag::FrameCounter, &next_counter.to_string()));
    wire
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reader::FrameReader;

    #[test]
    fn test_encode_line_frame() {
        assert_eq!(encode_line_frame(Tag::FrameCounter, "12"), b"FC 12\n");
        assert_eq!(encode_line_frame(Tag::Other(*b"ZZ"), ""), b"ZZ \n");
    }

    #[test]
    fn test_encode_binary_frame_layout() {
        let frame = encode_binary_frame(Tag::ImageChunk, b"0123456789");
        assert_eq!(frame, b"PS 10\nIX 0123456789\r\n");

        // Binary block is exactly n + 5 bytes
        let block_len = frame.len() - b"PS 10\n".len();
        assert_eq!(block_len, 10 + BINARY_FRAMING_OVERHEAD);
    }

    #[test]
    fn test_encoded_image_is_decoded_in_order() {
        let image: Vec<u8> = (0u8..=255).collect();
        let wire = encode_image(&image, 100, 2);

        let mut reader = FrameReader::new(LinkId::Secondary);
        let frames = reader.feed(&wire);
        let tags: Vec<Tag> = frames.iter().map(|f| f.tag).collect();

        // 3 chunks x (PS, IX, PL) + FC
        assert_eq!(tags.len(), 10);
        assert_eq!(&tags[..3], &[Tag::PacketSize, Tag::ImageChunk, Tag::Placement]);
        assert_eq!(tags[9], Tag::FrameCounter);
        assert_eq!(frames[7].payload.len(), 56);
        assert_eq!(frames[8].payload, Payload::Text("2".into()));
        assert_eq!(reader.buffered(), 0);
    }
}
