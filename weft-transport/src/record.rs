//! Typed records in the single-segment payload envelope.
//!
//! Handshake records and RPC frames are payload-codec encoded and carried
//! as one envelope segment; these helpers do the two conversions every
//! call site needs.

use serde::Serialize;
use serde::de::DeserializeOwned;

use weft_core::{MessageBuilder, MessageCodec, MessageReader};

use crate::error::TransportResult;

/// Encode `record` into an envelope message ready for writing.
pub(crate) fn build_record<C: MessageCodec, T: Serialize>(
    codec: &C,
    record: &T,
) -> TransportResult<MessageBuilder> {
    let payload = codec.encode(record)?;
    Ok(MessageBuilder::from_payload(&payload))
}

/// Decode a typed record out of a received envelope message.
pub(crate) fn read_record<C: MessageCodec, T: DeserializeOwned>(
    codec: &C,
    reader: &MessageReader<'_>,
) -> TransportResult<T> {
    let payload = reader.payload()?;
    Ok(codec.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use weft_core::JsonCodec;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        value: u32,
    }

    #[test]
    fn test_record_roundtrip() {
        let codec = JsonCodec;
        let message = build_record(&codec, &Probe { value: 11 }).expect("build");
        let bytes = message.to_bytes();

        let reader = MessageReader::parse(&bytes).expect("parse");
        let probe: Probe = read_record(&codec, &reader).expect("read");
        assert_eq!(probe, Probe { value: 11 });
    }
}
