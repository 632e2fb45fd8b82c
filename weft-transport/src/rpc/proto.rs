//! Wire protocol for the two-party RPC runtime.

use serde::{Deserialize, Serialize};

/// Error returned by a capability call.
///
/// Travels on the wire inside `Return` frames, except for
/// [`CallError::Disconnected`], which is produced locally when the
/// connection goes away before an answer arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum CallError {
    /// The capability does not implement the requested method.
    #[error("no such method: {method}")]
    NoSuchMethod {
        /// The method name that was called.
        method: String,
    },

    /// The capability failed while handling the call.
    #[error("call failed: {message}")]
    Failed {
        /// Failure description from the capability or codec.
        message: String,
    },

    /// The connection went away before the call returned.
    #[error("disconnected before the call returned")]
    Disconnected,
}

impl CallError {
    /// Wrap an arbitrary failure description.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// One frame of the two-party RPC protocol, payload-codec encoded inside
/// the segmented envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RpcFrame {
    /// Invoke a method on the peer's bootstrap capability.
    Call {
        /// Caller-chosen correlation id, unique per outstanding call.
        question_id: u64,
        /// Method name.
        method: String,
        /// Payload-codec encoded parameters.
        params: Vec<u8>,
    },

    /// Answer to an earlier `Call` with the same question id.
    Return {
        /// Correlation id of the call being answered.
        question_id: u64,
        /// The call's outcome.
        result: Result<Vec<u8>, CallError>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{JsonCodec, MessageCodec};

    #[test]
    fn test_frame_roundtrip() {
        let codec = JsonCodec;
        let frame = RpcFrame::Call {
            question_id: 3,
            method: "echo".to_string(),
            params: vec![1, 2, 3],
        };

        let bytes = codec.encode(&frame).expect("encode");
        let decoded: RpcFrame = codec.decode(&bytes).expect("decode");
        match decoded {
            RpcFrame::Call {
                question_id,
                method,
                params,
            } => {
                assert_eq!(question_id, 3);
                assert_eq!(method, "echo");
                assert_eq!(params, vec![1, 2, 3]);
            }
            RpcFrame::Return { .. } => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn test_error_return_roundtrip() {
        let codec = JsonCodec;
        let frame = RpcFrame::Return {
            question_id: 9,
            result: Err(CallError::NoSuchMethod {
                method: "missing".to_string(),
            }),
        };

        let bytes = codec.encode(&frame).expect("encode");
        let decoded: RpcFrame = codec.decode(&bytes).expect("decode");
        match decoded {
            RpcFrame::Return {
                question_id,
                result,
            } => {
                assert_eq!(question_id, 9);
                assert_eq!(
                    result,
                    Err(CallError::NoSuchMethod {
                        method: "missing".to_string()
                    })
                );
            }
            RpcFrame::Call { .. } => panic!("wrong frame kind"),
        }
    }
}
