//! Segmented message codec.
//!
//! Message format: `[count-1:4][word length per segment:4 x count][pad to 8][segment bodies]`
//!
//! - **count-1**: number of segments minus one (little-endian u32)
//! - **lengths**: per-segment length in 8-byte words (little-endian u32 each)
//! - **pad**: zero bytes aligning the table to an 8-byte boundary
//! - **bodies**: segment contents, each a whole number of words
//!
//! A message always carries at least one segment and every segment length
//! is a multiple of [`WORD_SIZE`]. The single-segment *payload envelope*
//! ([`MessageBuilder::from_payload`] / [`MessageReader::payload`]) prefixes
//! raw bytes with one length word so byte-exact payloads survive the word
//! padding; the handshake records and RPC frames travel in that envelope.

/// Size of the codec word in bytes. Segment lengths and buffers are always
/// multiples of this.
pub const WORD_SIZE: usize = 8;

/// Upper bound on the segment count accepted by the reader.
///
/// Messages claiming more segments than this are rejected to prevent a
/// corrupt table from driving a huge allocation.
pub const MAX_SEGMENTS: usize = 512;

/// Round `len` up to the next word boundary.
pub const fn word_align(len: usize) -> usize {
    (len + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// Segmented codec error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Not enough data to parse the message.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Segment table claims more segments than the reader accepts.
    #[error("too many segments: {count} (max {MAX_SEGMENTS})")]
    TooManySegments {
        /// Segment count from the table.
        count: usize,
    },

    /// Payload envelope length word is inconsistent with the segment size.
    #[error("invalid payload length: {length} bytes in a {capacity}-byte segment")]
    InvalidPayloadLength {
        /// Payload byte length from the envelope word.
        length: usize,
        /// Bytes actually available after the length word.
        capacity: usize,
    },
}

/// Builder for an outbound segmented message.
///
/// Collects segments and serializes them with the table layout described in
/// the module docs. Segments are padded to a word boundary as they are
/// added, so `serialized_size` is exact from the moment the last segment
/// goes in.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    segments: Vec<Vec<u8>>,
}

impl MessageBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a single-segment payload envelope: one length word followed by
    /// `payload`, zero-padded to a word boundary.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut segment = Vec::with_capacity(WORD_SIZE + word_align(payload.len()));
        segment.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        segment.extend_from_slice(payload);
        segment.resize(WORD_SIZE + word_align(payload.len()), 0);

        Self {
            segments: vec![segment],
        }
    }

    /// Append a segment, zero-padding it to a word boundary.
    pub fn add_segment(&mut self, bytes: &[u8]) {
        let mut segment = bytes.to_vec();
        segment.resize(word_align(bytes.len()), 0);
        self.segments.push(segment);
    }

    /// Number of segments added so far.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// True when no segment has been added.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment contents by index (already word-padded).
    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        self.segments.get(index).map(Vec::as_slice)
    }

    /// Exact number of bytes [`Self::write_to`] will produce.
    pub fn serialized_size(&self) -> usize {
        table_size(self.segments.len()) + self.segments.iter().map(Vec::len).sum::<usize>()
    }

    /// Serialize into `out`, which must be exactly
    /// [`Self::serialized_size`] bytes.
    ///
    /// # Panics
    ///
    /// Panics if `out` has the wrong length or the builder is empty; callers
    /// check both before reaching for a buffer.
    pub fn write_to(&self, out: &mut [u8]) {
        assert!(!self.segments.is_empty(), "empty message");
        assert_eq!(out.len(), self.serialized_size(), "output buffer size");

        let count = self.segments.len();
        out[0..4].copy_from_slice(&((count - 1) as u32).to_le_bytes());
        let mut offset = 4;
        for segment in &self.segments {
            let words = (segment.len() / WORD_SIZE) as u32;
            out[offset..offset + 4].copy_from_slice(&words.to_le_bytes());
            offset += 4;
        }
        // Table padding.
        let body_start = table_size(count);
        out[offset..body_start].fill(0);
        offset = body_start;

        for segment in &self.segments {
            out[offset..offset + segment.len()].copy_from_slice(segment);
            offset += segment.len();
        }
    }

    /// Serialize into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.serialized_size()];
        self.write_to(&mut out);
        out
    }
}

/// Serialized size of the segment table for `count` segments, padding
/// included.
fn table_size(count: usize) -> usize {
    word_align(4 * (1 + count))
}

enum Backing<'a> {
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl Backing<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Backing::Borrowed(bytes) => bytes,
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// Reader over one serialized segmented message.
///
/// Works over borrowed bytes (a caller-provided scratch buffer) or an owned
/// buffer (a reassembled message); the parse is identical either way.
pub struct MessageReader<'a> {
    data: Backing<'a>,
    /// Byte ranges of each segment body within `data`.
    segments: Vec<(usize, usize)>,
}

impl<'a> MessageReader<'a> {
    /// Parse a message from borrowed bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self, MessageError> {
        let segments = parse_table(data)?;
        Ok(Self {
            data: Backing::Borrowed(data),
            segments,
        })
    }

    /// Parse a message that owns its backing buffer.
    pub fn parse_owned(data: Vec<u8>) -> Result<MessageReader<'static>, MessageError> {
        let segments = parse_table(&data)?;
        Ok(MessageReader {
            data: Backing::Owned(data),
            segments,
        })
    }

    /// Number of segments in the message.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segment body by index.
    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        let (start, len) = *self.segments.get(index)?;
        Some(&self.data.as_slice()[start..start + len])
    }

    /// Decode the single-segment payload envelope written by
    /// [`MessageBuilder::from_payload`].
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidPayloadLength`] when the length word
    /// does not fit the segment.
    pub fn payload(&self) -> Result<&[u8], MessageError> {
        let segment = self.segment(0).unwrap_or(&[]);
        if segment.len() < WORD_SIZE {
            return Err(MessageError::InsufficientData {
                needed: WORD_SIZE,
                have: segment.len(),
            });
        }
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&segment[..WORD_SIZE]);
        let length = u64::from_le_bytes(word) as usize;
        let capacity = segment.len() - WORD_SIZE;
        if length > capacity {
            return Err(MessageError::InvalidPayloadLength { length, capacity });
        }
        Ok(&segment[WORD_SIZE..WORD_SIZE + length])
    }

    /// Total serialized length of the message in bytes.
    pub fn serialized_len(&self) -> usize {
        match self.segments.last() {
            Some((start, len)) => start + len,
            None => 0,
        }
    }
}

/// Parse the segment table, returning the byte range of each segment body.
fn parse_table(data: &[u8]) -> Result<Vec<(usize, usize)>, MessageError> {
    if data.len() < 4 {
        return Err(MessageError::InsufficientData {
            needed: 4,
            have: data.len(),
        });
    }
    let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize + 1;
    if count > MAX_SEGMENTS {
        return Err(MessageError::TooManySegments { count });
    }

    let header = table_size(count);
    if data.len() < header {
        return Err(MessageError::InsufficientData {
            needed: header,
            have: data.len(),
        });
    }

    let mut segments = Vec::with_capacity(count);
    let mut body = header;
    for index in 0..count {
        let at = 4 + 4 * index;
        let words = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let len = words as usize * WORD_SIZE;
        segments.push((body, len));
        body += len;
    }

    if data.len() < body {
        return Err(MessageError::InsufficientData {
            needed: body,
            have: data.len(),
        });
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_segment_roundtrip() {
        let mut builder = MessageBuilder::new();
        builder.add_segment(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let bytes = builder.to_bytes();
        // 8-byte table (count word + one length word) + one word of body.
        assert_eq!(bytes.len(), 16);

        let reader = MessageReader::parse(&bytes).expect("parse");
        assert_eq!(reader.segment_count(), 1);
        assert_eq!(reader.segment(0), Some([1, 2, 3, 4, 5, 6, 7, 8].as_slice()));
        assert_eq!(reader.serialized_len(), 16);
    }

    #[test]
    fn test_multi_segment_roundtrip() {
        let mut builder = MessageBuilder::new();
        builder.add_segment(&[0xAA; 16]);
        builder.add_segment(&[0xBB; 8]);
        builder.add_segment(&[0xCC; 24]);

        let bytes = builder.to_bytes();
        let reader = MessageReader::parse(&bytes).expect("parse");

        assert_eq!(reader.segment_count(), 3);
        assert_eq!(reader.segment(0), Some([0xAA; 16].as_slice()));
        assert_eq!(reader.segment(1), Some([0xBB; 8].as_slice()));
        assert_eq!(reader.segment(2), Some([0xCC; 24].as_slice()));
        assert_eq!(reader.segment(3), None);
    }

    #[test]
    fn test_segments_are_word_padded() {
        let mut builder = MessageBuilder::new();
        builder.add_segment(&[1, 2, 3]);

        assert_eq!(builder.segment(0), Some([1, 2, 3, 0, 0, 0, 0, 0].as_slice()));
        assert_eq!(builder.serialized_size() % WORD_SIZE, 0);
    }

    #[test]
    fn test_table_padding_even_segment_count() {
        // Two segments: table is 4 + 8 = 12 bytes, padded to 16.
        let mut builder = MessageBuilder::new();
        builder.add_segment(&[1; 8]);
        builder.add_segment(&[2; 8]);

        let bytes = builder.to_bytes();
        assert_eq!(bytes.len(), 16 + 16);

        let reader = MessageReader::parse(&bytes).expect("parse");
        assert_eq!(reader.segment(0), Some([1; 8].as_slice()));
        assert_eq!(reader.segment(1), Some([2; 8].as_slice()));
    }

    #[test]
    fn test_payload_envelope_roundtrip() {
        let payload = b"hello envelope";
        let builder = MessageBuilder::from_payload(payload);
        let bytes = builder.to_bytes();

        let reader = MessageReader::parse(&bytes).expect("parse");
        assert_eq!(reader.payload().expect("payload"), payload);
    }

    #[test]
    fn test_payload_envelope_exact_word_multiple() {
        let payload = [7u8; 16];
        let bytes = MessageBuilder::from_payload(&payload).to_bytes();
        let reader = MessageReader::parse(&bytes).expect("parse");
        assert_eq!(reader.payload().expect("payload"), payload.as_slice());
    }

    #[test]
    fn test_payload_envelope_empty() {
        let bytes = MessageBuilder::from_payload(&[]).to_bytes();
        let reader = MessageReader::parse(&bytes).expect("parse");
        assert_eq!(reader.payload().expect("payload"), &[] as &[u8]);
    }

    #[test]
    fn test_owned_reader() {
        let bytes = MessageBuilder::from_payload(b"owned").to_bytes();
        let reader = MessageReader::parse_owned(bytes).expect("parse");
        assert_eq!(reader.payload().expect("payload"), b"owned");
    }

    #[test]
    fn test_truncated_table_rejected() {
        let result = MessageReader::parse(&[0, 0]);
        assert!(matches!(
            result,
            Err(MessageError::InsufficientData { needed: 4, have: 2 })
        ));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let mut builder = MessageBuilder::new();
        builder.add_segment(&[9; 32]);
        let bytes = builder.to_bytes();

        let result = MessageReader::parse(&bytes[..bytes.len() - 8]);
        assert!(matches!(result, Err(MessageError::InsufficientData { .. })));
    }

    #[test]
    fn test_too_many_segments_rejected() {
        let mut bytes = vec![0u8; 8];
        bytes[0..4].copy_from_slice(&(MAX_SEGMENTS as u32).to_le_bytes());

        let result = MessageReader::parse(&bytes);
        assert!(matches!(
            result,
            Err(MessageError::TooManySegments { count }) if count == MAX_SEGMENTS + 1
        ));
    }

    #[test]
    fn test_corrupt_payload_length_rejected() {
        let mut bytes = MessageBuilder::from_payload(b"x").to_bytes();
        // Overwrite the envelope length word with an impossible length.
        let body = bytes.len() - 8;
        bytes[body - 8..body].copy_from_slice(&u64::MAX.to_le_bytes());

        let reader = MessageReader::parse(&bytes).expect("parse");
        assert!(matches!(
            reader.payload(),
            Err(MessageError::InvalidPayloadLength { .. })
        ));
    }

    #[test]
    fn test_write_to_matches_to_bytes() {
        let mut builder = MessageBuilder::new();
        builder.add_segment(&[3; 8]);
        builder.add_segment(&[4; 40]);

        let mut buf = vec![0u8; builder.serialized_size()];
        builder.write_to(&mut buf);
        assert_eq!(buf, builder.to_bytes());
    }

    #[test]
    fn test_word_align() {
        assert_eq!(word_align(0), 0);
        assert_eq!(word_align(1), 8);
        assert_eq!(word_align(8), 8);
        assert_eq!(word_align(9), 16);
    }
}
