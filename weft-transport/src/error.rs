//! Error types for the transport layer.

use weft_core::{CodecError, MessageError, OfferOutcome};

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by streams, handshakes and endpoint glue.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer is gone or the local endpoint was closed.
    #[error("disconnected: {reason}")]
    Disconnected {
        /// What signalled the disconnect.
        reason: String,
    },

    /// An idler's retry budget was exhausted.
    #[error("idle budget exhausted")]
    Overloaded,

    /// A message with no segments was submitted for writing.
    #[error("empty message")]
    EmptyMessage,

    /// A message larger than the fabric accepts was submitted.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge {
        /// Serialized message size in bytes.
        size: usize,
        /// The publication's maximum message length.
        max: usize,
    },

    /// A received message failed segmented-codec parsing.
    #[error("malformed message: {0}")]
    Malformed(#[from] MessageError),

    /// A typed record failed payload-codec conversion.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// The fabric reported an error code this layer does not classify.
    #[error("unknown fabric error: code {code}")]
    Fabric {
        /// Raw fabric error code.
        code: i64,
    },

    /// The peer violated the framing protocol.
    #[error("protocol violation: {message}")]
    Protocol {
        /// What the peer did wrong.
        message: String,
    },
}

impl TransportError {
    /// Build a [`TransportError::Disconnected`] with the given reason.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// True for errors that mean "the peer is gone" rather than a local
    /// failure.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Classify a fatal offer/claim outcome.
    ///
    /// Success and the retryable codes never reach this: the write paths
    /// handle them before classifying.
    pub fn from_offer(outcome: &OfferOutcome) -> Self {
        match outcome {
            OfferOutcome::NotConnected => Self::disconnected("not connected"),
            OfferOutcome::Closed => Self::disconnected("publication closed"),
            OfferOutcome::MaxPositionExceeded => Self::disconnected("max position exceeded"),
            OfferOutcome::Error { code } => Self::Fabric { code: *code },
            // The retry loops consume these before classification.
            OfferOutcome::Accepted { .. } | OfferOutcome::BackPressured | OfferOutcome::AdminAction => {
                Self::Fabric { code: 0 }
            }
        }
    }
}
