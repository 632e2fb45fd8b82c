//! Server side of the handshake.

use weft_core::{Image, MessageCodec, Providers, StreamId};

use crate::error::TransportResult;
use crate::idle::{Backoff, Periodic};
use crate::receiver::ImageReceiver;
use crate::record::{build_record, read_record};
use crate::stream::{FramedStream, offer_with_retry, read_message_from};

use super::{Ack, Syn, add_publication};

/// Server side of the handshake.
///
/// Waits for SYN-bearing images on the listening subscription and answers
/// each with its own publication and an ACK. One connection per
/// [`Listener::accept`] call; concurrent accepts on a single listener are
/// not supported, which the `&mut self` receiver enforces.
pub struct Listener<P: Providers, C: MessageCodec> {
    providers: P,
    codec: C,
    receiver: ImageReceiver<P::Fabric>,
}

impl<P: Providers, C: MessageCodec> Listener<P, C> {
    /// Create a listener on `(channel, stream_id)`.
    pub fn new(providers: &P, codec: C, channel: &str, stream_id: StreamId) -> Self {
        let receiver = ImageReceiver::new(providers.fabric(), channel, stream_id);
        Self {
            providers: providers.clone(),
            codec,
            receiver,
        }
    }

    /// Accept the next connection.
    ///
    /// Reads the SYN off the next inbound image, opens the return
    /// publication to the advertised coordinates, sends the ACK carrying
    /// the image's session id, and wraps both ends into a stream.
    pub async fn accept(&mut self) -> TransportResult<FramedStream<P::Fabric>> {
        let time = self.providers.time();

        let mut receive_idler = Periodic::new(time.clone());
        let mut image = self.receiver.receive(&mut receive_idler).await?;

        let mut read_idler = Backoff::new(time.clone());
        let reader = read_message_from(&mut image, &mut read_idler).await?;
        let syn: Syn = read_record(&self.codec, &reader)?;
        tracing::info!(channel = %syn.channel, stream_id = syn.stream_id, "received SYN");

        let mut registration_idler = Backoff::new(time.clone());
        let publication = add_publication(
            self.providers.fabric(),
            &syn.channel,
            syn.stream_id,
            &mut registration_idler,
        )
        .await?;

        let session_id = image.session_id();
        tracing::info!(session_id, "sending ACK");
        let message = build_record(&self.codec, &Ack { session_id })?;
        let mut offer_idler = Backoff::new(time.clone());
        offer_with_retry(&publication, &message.to_bytes(), &mut offer_idler).await?;

        Ok(FramedStream::with_time(publication, image, time))
    }
}
