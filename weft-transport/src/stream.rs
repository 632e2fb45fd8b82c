//! Bidirectional framed message stream over one publication and one image.
//!
//! The fabric delivers fixed-size fragments; this module turns them back
//! into a lossless sequence of variable-length segmented messages. Writes
//! pick between a zero-copy claim (message fits one frame) and a serialize-
//! then-offer path (message must fragment), both retrying transient stalls
//! through the write idler. Reads run controlled polls, reassemble
//! fragments, and surface one [`MessageReader`] per message.

use weft_core::{
    Fabric, Image, MessageBuilder, MessageReader, OfferOutcome, PollAction, Publication, SessionId,
    TimeProvider, frame,
};

use crate::config::BackoffConfig;
use crate::error::{TransportError, TransportResult};
use crate::idle::{Idler, IdlerFactory, backoff_factory};

/// Number of fragments drained per controlled poll pass.
pub const POLL_BATCH: usize = 16;

/// One message completed by a poll pass.
pub(crate) enum Assembled {
    /// The message was copied into the caller's scratch buffer.
    Scratch {
        /// Serialized message length inside the scratch buffer.
        len: usize,
    },
    /// The message lives in its own buffer.
    Heap(Vec<u8>),
}

/// Fragment reassembly state machine.
///
/// Persists across poll batches: a message whose fragments span several
/// controlled polls keeps accumulating until its END frame arrives.
#[derive(Default)]
pub(crate) struct FragmentAssembler {
    reassembly: Option<Vec<u8>>,
}

impl FragmentAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run one controlled poll batch against `image`.
    ///
    /// Returns the number of fragments consumed and, if a message
    /// completed, where its bytes ended up. Unfragmented messages land in
    /// `scratch` when they fit, otherwise in a fresh buffer; reassembled
    /// messages always own their buffer.
    pub(crate) fn poll<I: Image>(
        &mut self,
        image: &mut I,
        mut scratch: Option<&mut [u8]>,
    ) -> TransportResult<(usize, Option<Assembled>)> {
        let reassembly = &mut self.reassembly;
        let mut completed: Option<Assembled> = None;
        let mut violation: Option<&'static str> = None;

        let consumed = image.controlled_poll(
            &mut |bytes, header| {
                if header.is_set(frame::UNFRAGMENTED) {
                    if reassembly.is_some() {
                        violation = Some("unfragmented frame during reassembly");
                        return PollAction::Break;
                    }
                    completed = Some(match scratch.as_deref_mut() {
                        Some(buffer) if bytes.len() <= buffer.len() => {
                            buffer[..bytes.len()].copy_from_slice(bytes);
                            Assembled::Scratch { len: bytes.len() }
                        }
                        _ => Assembled::Heap(bytes.to_vec()),
                    });
                    return PollAction::Break;
                }

                if header.is_set(frame::BEGIN_FRAG) {
                    *reassembly = Some(Vec::new());
                }
                match reassembly.as_mut() {
                    Some(buffer) => buffer.extend_from_slice(bytes),
                    None => {
                        violation = Some("continuation frame without begin");
                        return PollAction::Break;
                    }
                }

                if header.is_set(frame::END_FRAG) {
                    completed = reassembly.take().map(Assembled::Heap);
                    return PollAction::Break;
                }
                PollAction::Continue
            },
            POLL_BATCH,
        );

        if let Some(message) = violation {
            return Err(TransportError::Protocol {
                message: message.to_string(),
            });
        }
        Ok((consumed, completed))
    }
}

/// Outcome of one non-waiting poll pass, for callers that interleave reads
/// with other work.
pub enum Polled {
    /// A complete message was read.
    Message(MessageReader<'static>),
    /// Fragments were consumed but no message completed yet.
    Progress(usize),
    /// Nothing arrived.
    Empty,
    /// The peer closed the stream and everything has been drained.
    EndOfStream,
}

/// Bidirectional framed message stream.
///
/// Owns one publication (outbound) and one image (inbound) plus the idler
/// factories governing how its loops wait. Both endpoints are closed when
/// the stream drops; [`FramedStream::end`] closes just the publication,
/// signalling end-of-stream to the peer while reads keep draining.
pub struct FramedStream<F: Fabric> {
    publication: F::Publication,
    image: F::Image,
    read_idlers: IdlerFactory,
    write_idlers: IdlerFactory,
    assembler: FragmentAssembler,
}

impl<F: Fabric> FramedStream<F> {
    /// Build a stream from connected endpoints and explicit idler
    /// factories.
    pub fn new(
        publication: F::Publication,
        image: F::Image,
        read_idlers: IdlerFactory,
        write_idlers: IdlerFactory,
    ) -> Self {
        Self {
            publication,
            image,
            read_idlers,
            write_idlers,
            assembler: FragmentAssembler::new(),
        }
    }

    /// Build a stream idling with the default back-off ladder on both
    /// paths.
    pub fn with_time<T: TimeProvider + 'static>(
        publication: F::Publication,
        image: F::Image,
        time: &T,
    ) -> Self {
        Self::new(
            publication,
            image,
            backoff_factory(time.clone(), BackoffConfig::default()),
            backoff_factory(time.clone(), BackoffConfig::default()),
        )
    }

    /// Session id of the outbound publication.
    pub fn local_session_id(&self) -> SessionId {
        self.publication.session_id()
    }

    /// Session id of the inbound image.
    pub fn remote_session_id(&self) -> SessionId {
        self.image.session_id()
    }

    /// Write one segmented message, preserving submission order with any
    /// previous write on this stream.
    ///
    /// Messages at most `max_payload_length` long go through the zero-copy
    /// claim path; larger ones serialize to a heap buffer and are offered
    /// for fragmented delivery.
    ///
    /// # Errors
    ///
    /// [`TransportError::EmptyMessage`] and
    /// [`TransportError::MessageTooLarge`] are rejected before the fabric
    /// is touched; fatal fabric codes surface as
    /// [`TransportError::Disconnected`] or [`TransportError::Fabric`].
    pub async fn write_message(&mut self, message: &MessageBuilder) -> TransportResult<()> {
        if message.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        let size = message.serialized_size();
        let max = self.publication.max_message_length();
        if size > max {
            return Err(TransportError::MessageTooLarge { size, max });
        }

        let mut idler = (self.write_idlers)();
        if size <= self.publication.max_payload_length() {
            write_claimed(&self.publication, message, size, idler.as_mut()).await
        } else {
            let bytes = message.to_bytes();
            offer_with_retry(&self.publication, &bytes, idler.as_mut()).await
        }
    }

    /// Write a batch of messages in order.
    pub async fn write_messages(&mut self, messages: &[MessageBuilder]) -> TransportResult<()> {
        for message in messages {
            self.write_message(message).await?;
        }
        Ok(())
    }

    /// Read the next message, or `None` once the peer closed the stream.
    ///
    /// A message that fits `scratch` is parsed in place there; anything
    /// else gets its own buffer. Waiting between empty polls goes through
    /// a fresh read idler, which is restarted whenever a poll consumes
    /// fragments.
    pub async fn try_read_message<'a>(
        &mut self,
        mut scratch: Option<&'a mut [u8]>,
    ) -> TransportResult<Option<MessageReader<'a>>> {
        let mut idler = (self.read_idlers)();
        loop {
            let (consumed, completed) = self
                .assembler
                .poll(&mut self.image, scratch.as_deref_mut())?;

            if let Some(assembled) = completed {
                let reader = match assembled {
                    Assembled::Heap(bytes) => MessageReader::parse_owned(bytes)?,
                    Assembled::Scratch { len } => match scratch.take() {
                        Some(buffer) => {
                            let view: &'a [u8] = &buffer[..len];
                            MessageReader::parse(view)?
                        }
                        // Scratch results only occur when scratch was given.
                        None => {
                            return Err(TransportError::Protocol {
                                message: "scratch result without scratch buffer".to_string(),
                            });
                        }
                    },
                };
                return Ok(Some(reader));
            }

            if self.image.is_end_of_stream() {
                return Ok(None);
            }

            if consumed > 0 {
                idler.reset();
                tokio::task::yield_now().await;
            } else {
                idler.idle().await?;
            }
        }
    }

    /// Total variant of [`Self::try_read_message`]: end-of-stream becomes
    /// [`TransportError::Disconnected`].
    pub async fn read_message<'a>(
        &mut self,
        scratch: Option<&'a mut [u8]>,
    ) -> TransportResult<MessageReader<'a>> {
        match self.try_read_message(scratch).await? {
            Some(reader) => Ok(reader),
            None => Err(TransportError::disconnected("end of stream")),
        }
    }

    /// One poll batch with no waiting, for drivers that interleave reads
    /// with writes. Reassembly state carries over between passes.
    pub fn poll_pass(&mut self) -> TransportResult<Polled> {
        let (consumed, completed) = self.assembler.poll(&mut self.image, None)?;
        match completed {
            Some(Assembled::Heap(bytes)) => {
                return Ok(Polled::Message(MessageReader::parse_owned(bytes)?));
            }
            // Scratch results only occur when a scratch buffer was given.
            Some(Assembled::Scratch { .. }) | None => {}
        }
        if self.image.is_end_of_stream() {
            return Ok(Polled::EndOfStream);
        }
        if consumed > 0 {
            Ok(Polled::Progress(consumed))
        } else {
            Ok(Polled::Empty)
        }
    }

    /// Close the outbound half, signalling end-of-stream to the peer.
    pub fn end(&mut self) {
        self.publication.close();
    }

    /// Size of the outbound term buffer.
    pub fn send_buffer_size(&self) -> usize {
        self.publication.term_buffer_length()
    }
}

impl<F: Fabric> Drop for FramedStream<F> {
    fn drop(&mut self) {
        self.publication.close();
        self.image.close();
    }
}

/// Claim-path write: serialize straight into the claimed term-buffer
/// region, retrying transient stalls.
async fn write_claimed<P: Publication>(
    publication: &P,
    message: &MessageBuilder,
    size: usize,
    idler: &mut dyn Idler,
) -> TransportResult<()> {
    loop {
        let outcome = publication.try_claim(size, &mut |buffer| message.write_to(buffer));
        match outcome {
            OfferOutcome::Accepted { .. } => return Ok(()),
            outcome if outcome.is_retryable() => idler.idle().await?,
            outcome => return Err(TransportError::from_offer(&outcome)),
        }
    }
}

/// Offer a serialized payload, retrying transient stalls.
///
/// Shared with the handshake, which offers records on a bare publication
/// before any stream exists.
pub(crate) async fn offer_with_retry<P: Publication>(
    publication: &P,
    payload: &[u8],
    idler: &mut dyn Idler,
) -> TransportResult<()> {
    loop {
        let outcome = publication.offer(payload);
        match outcome {
            OfferOutcome::Accepted { .. } => return Ok(()),
            outcome if outcome.is_retryable() => idler.idle().await?,
            outcome => return Err(TransportError::from_offer(&outcome)),
        }
    }
}

/// Read one complete message from a raw image, idling between polls.
///
/// Used by the handshake before a [`FramedStream`] exists; end-of-stream is
/// a [`TransportError::Disconnected`].
pub async fn read_message_from<I: Image>(
    image: &mut I,
    idler: &mut dyn Idler,
) -> TransportResult<MessageReader<'static>> {
    let mut assembler = FragmentAssembler::new();
    loop {
        let (consumed, completed) = assembler.poll(image, None)?;
        if let Some(Assembled::Heap(bytes)) = completed {
            return Ok(MessageReader::parse_owned(bytes)?);
        }
        if image.is_end_of_stream() {
            return Err(TransportError::disconnected("end of stream"));
        }
        if consumed > 0 {
            idler.reset();
            tokio::task::yield_now().await;
        } else {
            idler.idle().await?;
        }
    }
}
