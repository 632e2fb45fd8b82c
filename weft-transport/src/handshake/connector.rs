//! Client side of the handshake.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::oneshot;

use weft_core::{
    Fabric, Image, MessageCodec, Providers, Publication, SessionId, StreamId, TaskProvider,
    TimeProvider,
};

use crate::config::ConnectorConfig;
use crate::error::{TransportError, TransportResult};
use crate::idle::{Backoff, Periodic};
use crate::receiver::ImageReceiver;
use crate::record::{build_record, read_record};
use crate::stream::{FramedStream, offer_with_retry, read_message_from};

use super::{Ack, Syn, add_publication};

type ImageOf<P> = <<P as Providers>::Fabric as Fabric>::Image;

/// Fulfillers for connects awaiting their ACK, keyed by the session id of
/// the publication that carried the SYN.
type PendingMap<P> = Rc<RefCell<HashMap<SessionId, oneshot::Sender<ImageOf<P>>>>>;

/// Client side of the handshake.
///
/// One connector serves any number of concurrent [`Connector::connect`]
/// calls over a single response subscription: correlation is purely by
/// publication session id, which the fabric guarantees unique per
/// publication instance.
///
/// Dropping the connector cancels its response loop and rejects every
/// connect still in flight.
pub struct Connector<P: Providers, C: MessageCodec> {
    providers: P,
    codec: C,
    channel: String,
    stream_id: StreamId,
    pending: PendingMap<P>,
    // Keeps the response subscription alive for the connector's lifetime.
    _receiver: Rc<ImageReceiver<P::Fabric>>,
    response_task: tokio::task::JoinHandle<()>,
}

impl<P: Providers, C: MessageCodec> Connector<P, C> {
    /// Create a connector listening for ACKs at `(channel, stream_id)`.
    ///
    /// Spawns the response loop on the providers' task spawner, so this
    /// must run within a `LocalSet`.
    pub fn new(providers: &P, codec: C, channel: &str, stream_id: StreamId) -> Self {
        Self::with_config(providers, codec, channel, stream_id, ConnectorConfig::default())
    }

    /// Create a connector with explicit pacing configuration.
    pub fn with_config(
        providers: &P,
        codec: C,
        channel: &str,
        stream_id: StreamId,
        config: ConnectorConfig,
    ) -> Self {
        let receiver = Rc::new(ImageReceiver::new(providers.fabric(), channel, stream_id));
        let pending: PendingMap<P> = Rc::new(RefCell::new(HashMap::new()));

        let response_task = providers.task().spawn_task(
            "connector-responses",
            response_loop::<P, C>(
                receiver.clone(),
                pending.clone(),
                providers.time().clone(),
                codec.clone(),
                config,
            ),
        );

        Self {
            providers: providers.clone(),
            codec,
            channel: channel.to_string(),
            stream_id,
            pending,
            _receiver: receiver,
            response_task,
        }
    }

    /// Connect to a listener at `(channel, stream_id)`.
    ///
    /// Opens the outbound publication, sends the SYN advertising this
    /// connector's inbound coordinates, and waits for the response loop to
    /// deliver the image matched by the ACK.
    ///
    /// The returned future does not borrow the connector, so any number of
    /// connects can run concurrently; a connect still in flight when the
    /// connector drops resolves to a disconnected error.
    pub fn connect(
        &self,
        channel: &str,
        stream_id: StreamId,
    ) -> impl std::future::Future<Output = TransportResult<FramedStream<P::Fabric>>> + 'static {
        let providers = self.providers.clone();
        let codec = self.codec.clone();
        let own_channel = self.channel.clone();
        let own_stream_id = self.stream_id;
        let pending = self.pending.clone();
        let channel = channel.to_string();

        async move {
            let time = providers.time();

            let mut registration_idler = Backoff::new(time.clone());
            let publication =
                add_publication(providers.fabric(), &channel, stream_id, &mut registration_idler)
                    .await?;
            let session_id = publication.session_id();

            let (fulfiller, fulfilled) = oneshot::channel();
            pending.borrow_mut().insert(session_id, fulfiller);

            let syn = Syn {
                channel: own_channel.clone(),
                stream_id: own_stream_id,
            };
            tracing::info!(
                channel = %own_channel,
                stream_id = own_stream_id,
                session_id,
                "sending SYN"
            );
            let message = match build_record(&codec, &syn) {
                Ok(message) => message,
                Err(error) => {
                    pending.borrow_mut().remove(&session_id);
                    return Err(error);
                }
            };
            let mut offer_idler = Backoff::new(time.clone());
            if let Err(error) =
                offer_with_retry(&publication, &message.to_bytes(), &mut offer_idler).await
            {
                pending.borrow_mut().remove(&session_id);
                return Err(error);
            }

            let image = fulfilled
                .await
                .map_err(|_| TransportError::disconnected("connector destroyed"))?;
            tracing::info!(session_id, "connection established");
            Ok(FramedStream::with_time(publication, image, time))
        }
    }
}

impl<P: Providers, C: MessageCodec> Drop for Connector<P, C> {
    fn drop(&mut self) {
        self.response_task.abort();
        // Dropping the fulfillers rejects every connect still in flight.
        self.pending.borrow_mut().clear();
    }
}

/// Long-running loop matching inbound ACKs to pending connects.
///
/// Waiting for the next image is the receive idler's job inside each
/// iteration; the loop itself only pauses after a failed iteration before
/// trying again.
async fn response_loop<P: Providers, C: MessageCodec>(
    receiver: Rc<ImageReceiver<P::Fabric>>,
    pending: PendingMap<P>,
    time: P::Time,
    codec: C,
    config: ConnectorConfig,
) {
    loop {
        if let Err(error) = response_iteration::<P, C>(&receiver, &pending, &time, &codec, &config).await
        {
            tracing::error!(%error, "failed to accept handshake response");
            time.sleep(config.response_pause).await;
        }
    }
}

async fn response_iteration<P: Providers, C: MessageCodec>(
    receiver: &ImageReceiver<P::Fabric>,
    pending: &PendingMap<P>,
    time: &P::Time,
    codec: &C,
    config: &ConnectorConfig,
) -> TransportResult<()> {
    let mut receive_idler = Periodic::with(time.clone(), config.receive_period, u64::MAX);
    let mut image = receiver.receive(&mut receive_idler).await?;
    tracing::info!(source = %image.source_identity(), "incoming handshake response");

    let mut read_idler = Backoff::new(time.clone());
    let reader = read_message_from(&mut image, &mut read_idler).await?;
    let ack: Ack = read_record(codec, &reader)?;
    tracing::info!(session_id = ack.session_id, "received ACK");

    match pending.borrow_mut().remove(&ack.session_id) {
        Some(fulfiller) => {
            if fulfiller.send(image).is_err() {
                tracing::warn!(
                    session_id = ack.session_id,
                    "connect cancelled before its ACK arrived"
                );
            }
        }
        None => {
            // Late ACKs are possible after cancellation; drop them.
            tracing::error!(session_id = ack.session_id, "received unknown ACK");
        }
    }
    Ok(())
}
