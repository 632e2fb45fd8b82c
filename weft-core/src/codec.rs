//! Pluggable payload serialization.
//!
//! The typed records that cross a connection — the handshake hello/reply
//! pair, RPC call frames — are serde values, and a [`MessageCodec`] turns
//! them into the bytes carried inside a segmented message's payload
//! envelope. Both peers must agree on the format, but the transport does
//! not care which one: [`JsonCodec`] is the readable default, and any
//! implementation of the trait (bincode, messagepack, …) slots into the
//! connector, listener and endpoint glue unchanged.
//!
//! # Example
//!
//! ```rust
//! use weft_core::{MessageCodec, JsonCodec};
//! use serde::{Serialize, Deserialize};
//!
//! // The shape of a handshake hello: the caller's inbound coordinates.
//! #[derive(Serialize, Deserialize, Debug, PartialEq)]
//! struct Hello {
//!     channel: String,
//!     stream_id: i32,
//! }
//!
//! let codec = JsonCodec;
//! let hello = Hello { channel: "mem:client".to_string(), stream_id: 2 };
//!
//! let bytes = codec.encode(&hello)?;
//! let decoded: Hello = codec.decode(&bytes)?;
//! assert_eq!(hello, decoded);
//! # Ok::<(), weft_core::CodecError>(())
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Payload codec error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// A record could not be serialized.
    #[error("encode failed: {message}")]
    Encode {
        /// What the serializer rejected.
        message: String,
    },

    /// Received bytes did not decode as the expected record type.
    #[error("decode failed: {message}")]
    Decode {
        /// What the deserializer rejected.
        message: String,
    },
}

/// Pluggable record serialization format.
///
/// `Clone + 'static` so a codec instance can live inside every component
/// that speaks typed records: one copy in the connector, one per endpoint.
pub trait MessageCodec: Clone + 'static {
    /// Serialize a record to payload bytes.
    ///
    /// # Errors
    ///
    /// [`CodecError::Encode`] when the record cannot be represented in
    /// this format.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize payload bytes back into a record.
    ///
    /// # Errors
    ///
    /// [`CodecError::Decode`] when the bytes are not a `T` in this format.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by serde_json.
///
/// The default choice: a handshake or call frame on the wire stays
/// readable while debugging, at the cost of a few bytes over a binary
/// format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|error| CodecError::Encode {
            message: error.to_string(),
        })
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|error| CodecError::Decode {
            message: error.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Reply {
        session_id: i32,
    }

    #[test]
    fn test_record_roundtrip() {
        let codec = JsonCodec;
        let reply = Reply { session_id: 42 };

        let bytes = codec.encode(&reply).expect("encode");
        let decoded: Reply = codec.decode(&bytes).expect("decode");
        assert_eq!(reply, decoded);
    }

    #[test]
    fn test_decode_failure_names_the_cause() {
        let codec = JsonCodec;
        let result: Result<Reply, _> = codec.decode(b"not json");
        match result {
            Err(CodecError::Decode { message }) => assert!(!message.is_empty()),
            other => panic!("expected decode failure, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_shape_is_a_decode_error() {
        let codec = JsonCodec;
        let bytes = codec.encode(&vec![1u8, 2, 3]).expect("encode");
        let result: Result<Reply, _> = codec.decode(&bytes);
        assert!(matches!(result, Err(CodecError::Decode { .. })));
    }
}
