//! Trait contract for the messaging fabric.
//!
//! The fabric is the external substrate that carries one-way, in-order,
//! fragmented streams identified by `(channel, stream id)`. This module
//! abstracts the surface the transport consumes behind provider-style
//! traits, so the same transport code runs against a real media driver or
//! the in-process fabric used for testing.
//!
//! Every operation here is non-blocking: publications report transient
//! failure through [`OfferOutcome`] instead of waiting, images hand out
//! fragments only when polled, and registration of a new publication is
//! observed by polling [`Fabric::find_exclusive_publication`]. All waiting
//! policy lives above this contract.

/// Identifier returned by the fabric for an in-flight registration.
pub type RegistrationId = i64;

/// Identifier the fabric assigns to one publication instance.
///
/// The same value is observed on both ends of the stream, which is what
/// makes it usable as the handshake correlation token.
pub type SessionId = i32;

/// Application-chosen stream identifier within a channel.
pub type StreamId = i32;

/// Frame flag bits carried in each polled fragment's header.
pub mod frame {
    /// First fragment of a fragmented message.
    pub const BEGIN_FRAG: u8 = 0x80;

    /// Last fragment of a fragmented message.
    pub const END_FRAG: u8 = 0x40;

    /// Whole message in a single fragment (both fragment bits set).
    pub const UNFRAGMENTED: u8 = BEGIN_FRAG | END_FRAG;
}

/// Per-fragment metadata passed to the poll handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame flag bits, see [`frame`].
    pub flags: u8,
}

impl FrameHeader {
    /// True when every bit of `bits` is set in this header's flags.
    pub const fn is_set(&self, bits: u8) -> bool {
        self.flags & bits == bits
    }
}

/// Handler verdict for one polled fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Keep delivering fragments from this batch.
    Continue,
    /// Stop the batch after the current (consumed) fragment.
    Break,
}

/// Outcome of [`Publication::offer`] or [`Publication::try_claim`].
///
/// Mirrors the fabric's signed return codes: a position on success,
/// distinguished negative codes otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// The payload was accepted; the stream position after the write.
    Accepted {
        /// New stream position in bytes.
        position: i64,
    },

    /// Transient flow-control stall; retry after a short wait.
    BackPressured,

    /// The fabric is performing administrative work; retry after a short
    /// wait.
    AdminAction,

    /// No subscriber is connected to the stream.
    NotConnected,

    /// The publication has been closed.
    Closed,

    /// The stream reached the maximum position it can ever carry.
    MaxPositionExceeded,

    /// Any other error code reported by the fabric.
    Error {
        /// Raw fabric error code.
        code: i64,
    },
}

impl OfferOutcome {
    /// True for the two transient codes that clear after a brief wait.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackPressured | Self::AdminAction)
    }

    /// True when the payload was accepted.
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Handle to one outbound one-way stream.
///
/// Exclusive: a single writer owns the stream position. Handles are
/// reference-counted clones of the same underlying stream; the handshake
/// briefly holds a clone while the eventual owner is being constructed.
pub trait Publication: Clone + 'static {
    /// Session id the fabric assigned to this publication instance.
    fn session_id(&self) -> SessionId;

    /// Largest payload that fits a single unfragmented frame.
    fn max_payload_length(&self) -> usize;

    /// Largest message the fabric will accept for fragmented delivery.
    fn max_message_length(&self) -> usize;

    /// Size of the underlying term buffer.
    fn term_buffer_length(&self) -> usize;

    /// Offer a complete payload for delivery, fragmenting as needed.
    fn offer(&self, payload: &[u8]) -> OfferOutcome;

    /// Reserve `length` bytes inside the term buffer and let `fill` write
    /// straight into the claimed region; the claim is committed when `fill`
    /// returns.
    ///
    /// Only valid for `length <= max_payload_length()`; the claimed region
    /// is always delivered as a single unfragmented frame.
    fn try_claim(&self, length: usize, fill: &mut dyn FnMut(&mut [u8])) -> OfferOutcome;

    /// Close the publication, signalling end-of-stream to the subscriber.
    fn close(&self);
}

/// Handle to one inbound one-way stream as seen at a subscriber.
///
/// Images are moved, never copied: whichever component last received the
/// image owns it. They are `Send` because the fabric delivers them on its
/// own polling thread.
pub trait Image: Send + 'static {
    /// Session id of the publication feeding this image.
    fn session_id(&self) -> SessionId;

    /// Fabric-specific description of the publisher's address.
    fn source_identity(&self) -> String;

    /// True once the publisher closed the stream and every fragment has
    /// been consumed.
    fn is_end_of_stream(&self) -> bool;

    /// Deliver up to `fragment_limit` pending fragments to `handler`,
    /// stopping early when the handler answers [`PollAction::Break`].
    ///
    /// Returns the number of fragments consumed. Fragment payloads are only
    /// valid for the duration of the handler call.
    fn controlled_poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8], &FrameHeader) -> PollAction,
        fragment_limit: usize,
    ) -> usize;

    /// Release the image.
    fn close(&mut self);
}

/// Callback invoked by the fabric when a new image becomes available on a
/// subscription. Runs on the fabric's polling thread.
pub type ImageAvailableFn<I> = Box<dyn FnMut(I) + Send>;

/// Callback invoked by the fabric when an image goes away. Runs on the
/// fabric's polling thread.
pub type ImageUnavailableFn = Box<dyn FnMut(SessionId) + Send>;

/// Connection to the messaging fabric.
///
/// Cloning yields another handle to the same fabric instance, the way the
/// other environment providers in this crate are shared.
pub trait Fabric: Clone + 'static {
    /// Outbound stream handle type.
    type Publication: Publication;

    /// Inbound stream handle type.
    type Image: Image;

    /// Subscribe to `(channel, stream_id)`.
    ///
    /// `on_available` receives each new image for the subscription and may
    /// be invoked from the fabric's own polling thread; anything it touches
    /// must be guarded accordingly.
    fn add_subscription(
        &self,
        channel: &str,
        stream_id: StreamId,
        on_available: ImageAvailableFn<Self::Image>,
        on_unavailable: ImageUnavailableFn,
    ) -> RegistrationId;

    /// Begin registering an exclusive publication to `(channel,
    /// stream_id)`. Registration completes asynchronously; poll
    /// [`Self::find_exclusive_publication`] with the returned id.
    fn add_exclusive_publication(&self, channel: &str, stream_id: StreamId) -> RegistrationId;

    /// Look up a publication by registration id; `None` until the fabric
    /// has finished registering it.
    fn find_exclusive_publication(&self, registration: RegistrationId)
        -> Option<Self::Publication>;

    /// Tear down a subscription created by [`Self::add_subscription`].
    fn close_subscription(&self, registration: RegistrationId);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_flags() {
        let header = FrameHeader {
            flags: frame::UNFRAGMENTED,
        };
        assert!(header.is_set(frame::BEGIN_FRAG));
        assert!(header.is_set(frame::END_FRAG));
        assert!(header.is_set(frame::UNFRAGMENTED));

        let begin_only = FrameHeader {
            flags: frame::BEGIN_FRAG,
        };
        assert!(begin_only.is_set(frame::BEGIN_FRAG));
        assert!(!begin_only.is_set(frame::END_FRAG));
        assert!(!begin_only.is_set(frame::UNFRAGMENTED));
    }

    #[test]
    fn test_offer_outcome_classification() {
        assert!(OfferOutcome::BackPressured.is_retryable());
        assert!(OfferOutcome::AdminAction.is_retryable());
        assert!(!OfferOutcome::NotConnected.is_retryable());
        assert!(!OfferOutcome::Accepted { position: 64 }.is_retryable());

        assert!(OfferOutcome::Accepted { position: 64 }.is_accepted());
        assert!(!OfferOutcome::Closed.is_accepted());
    }
}
