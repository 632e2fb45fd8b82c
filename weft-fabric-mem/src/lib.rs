//! # weft-fabric-mem
//!
//! In-process loopback implementation of the weft fabric contract.
//!
//! One [`MemFabric`] instance plays the role of a shared media driver: every
//! handle cloned from it sees the same channel namespace, so a connector and
//! a listener built over clones of the same fabric can complete a handshake
//! without any real driver. Delivery is per-subscriber frame queues;
//! publications fragment offered payloads exactly like the real substrate
//! (frames of at most `max_payload_length` bytes carrying BEGIN/END flags).
//!
//! Two knobs exist purely so tests can exercise the waiting paths of the
//! transport:
//!
//! - [`MemFabricConfig::registration_delay`] makes
//!   `find_exclusive_publication` report "not registered yet" a fixed number
//!   of times before handing out the publication.
//! - [`MemPublication::inject`] queues offer/claim outcomes (for example two
//!   `BackPressured` results) that are consumed one per attempt before
//!   normal delivery resumes.
//!
//! Availability callbacks fire synchronously on whichever thread registers
//! the matching publication or subscription; callbacks must not call back
//! into the fabric. A subscriber observes only frames offered after its
//! image exists — there is no replay of earlier traffic.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use weft_core::{
    Fabric, FrameHeader, Image, ImageAvailableFn, ImageUnavailableFn, OfferOutcome, PollAction,
    Publication, RegistrationId, SessionId, StreamId, frame,
};

/// Tuning knobs for an in-process fabric instance.
#[derive(Debug, Clone)]
pub struct MemFabricConfig {
    /// Largest payload delivered as a single unfragmented frame.
    pub max_payload_length: usize,

    /// Largest message accepted for fragmented delivery.
    pub max_message_length: usize,

    /// Reported term buffer size.
    pub term_buffer_length: usize,

    /// Number of `find_exclusive_publication` calls that report "not yet
    /// registered" before a new publication becomes visible.
    pub registration_delay: usize,
}

impl Default for MemFabricConfig {
    fn default() -> Self {
        Self {
            max_payload_length: 4096,
            max_message_length: 16 * 4096,
            term_buffer_length: 64 * 1024,
            registration_delay: 0,
        }
    }
}

/// One frame as stored in a subscriber's queue.
struct MemFrame {
    flags: u8,
    bytes: Vec<u8>,
}

/// Per-subscriber delivery queue shared between one publication and one
/// image.
struct Pipe {
    frames: Mutex<VecDeque<MemFrame>>,
    /// Set when the publisher closes; end-of-stream once drained.
    closed: AtomicBool,
}

impl Pipe {
    fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, flags: u8, bytes: Vec<u8>) {
        lock_clean(&self.frames).push_back(MemFrame { flags, bytes });
    }
}

/// Recover from mutex poisoning: the protected state is only queues and
/// counters, which stay coherent even if a holder panicked.
fn lock_clean<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SubscriptionEntry {
    registration: RegistrationId,
    channel: String,
    stream_id: StreamId,
    on_available: ImageAvailableFn<MemImage>,
    #[allow(dead_code)]
    on_unavailable: ImageUnavailableFn,
    closed: bool,
}

struct PublicationRecord {
    channel: String,
    stream_id: StreamId,
    publication: MemPublication,
    /// Remaining `find_exclusive_publication` calls that still report
    /// "not yet registered".
    remaining_delay: usize,
}

struct FabricState {
    next_registration: RegistrationId,
    next_session: SessionId,
    subscriptions: Vec<SubscriptionEntry>,
    publications: HashMap<RegistrationId, PublicationRecord>,
}

/// Handle to an in-process fabric instance.
///
/// Clones share the same channel namespace.
#[derive(Clone)]
pub struct MemFabric {
    config: MemFabricConfig,
    state: Arc<Mutex<FabricState>>,
}

impl MemFabric {
    /// Create a fabric with default configuration.
    pub fn new() -> Self {
        Self::with_config(MemFabricConfig::default())
    }

    /// Create a fabric with the given configuration.
    pub fn with_config(config: MemFabricConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(FabricState {
                next_registration: 1,
                next_session: 1,
                subscriptions: Vec::new(),
                publications: HashMap::new(),
            })),
        }
    }

    /// The configuration this fabric was created with.
    pub fn config(&self) -> &MemFabricConfig {
        &self.config
    }

    /// Test convenience: a publication and a matching image on
    /// `(channel, stream_id)`, already connected to each other.
    ///
    /// Production code goes through the contract; this shortcut exists for
    /// unit tests that want a framed stream without running a handshake.
    pub fn connected_pair(&self, channel: &str, stream_id: StreamId) -> (MemPublication, MemImage) {
        let slot: Arc<Mutex<Option<MemImage>>> = Arc::new(Mutex::new(None));
        let sink = slot.clone();
        self.add_subscription(
            channel,
            stream_id,
            Box::new(move |image| {
                *lock_clean(&sink) = Some(image);
            }),
            Box::new(|_| {}),
        );
        let registration = self.add_exclusive_publication(channel, stream_id);
        let publication = loop {
            if let Some(publication) = self.find_exclusive_publication(registration) {
                break publication;
            }
        };
        let image = lock_clean(&slot)
            .take()
            .expect("subscription saw the publication");
        (publication, image)
    }
}

impl Default for MemFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric for MemFabric {
    type Publication = MemPublication;
    type Image = MemImage;

    fn add_subscription(
        &self,
        channel: &str,
        stream_id: StreamId,
        mut on_available: ImageAvailableFn<Self::Image>,
        on_unavailable: ImageUnavailableFn,
    ) -> RegistrationId {
        let mut state = lock_clean(&self.state);
        let registration = state.next_registration;
        state.next_registration += 1;

        // Join any publication already on this channel/stream.
        for record in state.publications.values() {
            if record.channel == channel
                && record.stream_id == stream_id
                && !record.publication.is_closed()
            {
                let image = record.publication.attach_subscriber(channel, stream_id);
                on_available(image);
            }
        }

        state.subscriptions.push(SubscriptionEntry {
            registration,
            channel: channel.to_string(),
            stream_id,
            on_available,
            on_unavailable,
            closed: false,
        });
        tracing::debug!(channel, stream_id, registration, "subscription added");
        registration
    }

    fn add_exclusive_publication(&self, channel: &str, stream_id: StreamId) -> RegistrationId {
        let mut state = lock_clean(&self.state);
        let registration = state.next_registration;
        state.next_registration += 1;
        let session_id = state.next_session;
        state.next_session += 1;

        let publication = MemPublication {
            inner: Arc::new(PublicationInner {
                session_id,
                config: self.config.clone(),
                pipes: Mutex::new(Vec::new()),
                position: Mutex::new(0),
                injected: Mutex::new(VecDeque::new()),
                closed: AtomicBool::new(false),
            }),
        };

        // Deliver an image to every live matching subscription.
        for entry in state.subscriptions.iter_mut() {
            if !entry.closed && entry.channel == channel && entry.stream_id == stream_id {
                let image = publication.attach_subscriber(channel, stream_id);
                (entry.on_available)(image);
            }
        }

        tracing::debug!(channel, stream_id, registration, session_id, "publication added");
        state.publications.insert(
            registration,
            PublicationRecord {
                channel: channel.to_string(),
                stream_id,
                publication,
                remaining_delay: self.config.registration_delay,
            },
        );
        registration
    }

    fn find_exclusive_publication(
        &self,
        registration: RegistrationId,
    ) -> Option<Self::Publication> {
        let mut state = lock_clean(&self.state);
        let record = state.publications.get_mut(&registration)?;
        if record.remaining_delay > 0 {
            record.remaining_delay -= 1;
            return None;
        }
        Some(record.publication.clone())
    }

    fn close_subscription(&self, registration: RegistrationId) {
        let mut state = lock_clean(&self.state);
        if let Some(entry) = state
            .subscriptions
            .iter_mut()
            .find(|entry| entry.registration == registration)
        {
            entry.closed = true;
        }
    }
}

struct PublicationInner {
    session_id: SessionId,
    config: MemFabricConfig,
    pipes: Mutex<Vec<Arc<Pipe>>>,
    /// Cumulative bytes accepted, reported as the stream position.
    position: Mutex<i64>,
    /// Outcomes consumed one per offer/claim attempt before normal delivery.
    injected: Mutex<VecDeque<OfferOutcome>>,
    closed: AtomicBool,
}

/// Outbound stream handle of the in-process fabric.
#[derive(Clone)]
pub struct MemPublication {
    inner: Arc<PublicationInner>,
}

impl MemPublication {
    /// Queue an outcome to be returned by the next offer or claim attempt.
    ///
    /// Injected outcomes are consumed in order, one per attempt; delivery
    /// resumes once the queue is empty.
    pub fn inject(&self, outcome: OfferOutcome) {
        lock_clean(&self.inner.injected).push_back(outcome);
    }

    /// True once [`Publication::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn attach_subscriber(&self, channel: &str, stream_id: StreamId) -> MemImage {
        let pipe = Arc::new(Pipe::new());
        lock_clean(&self.inner.pipes).push(pipe.clone());
        MemImage {
            session_id: self.inner.session_id,
            source_identity: format!("mem://{}:{}#{}", channel, stream_id, self.inner.session_id),
            pipe,
            closed: false,
        }
    }

    /// Take a pending injected outcome, if any.
    fn take_injected(&self) -> Option<OfferOutcome> {
        lock_clean(&self.inner.injected).pop_front()
    }

    /// Deliver one fragment run to every attached subscriber and advance
    /// the position.
    fn deliver(&self, fragments: &[(u8, &[u8])]) -> OfferOutcome {
        let pipes = lock_clean(&self.inner.pipes);
        if pipes.is_empty() {
            return OfferOutcome::NotConnected;
        }
        let mut accepted = 0usize;
        for pipe in pipes.iter() {
            for (flags, bytes) in fragments {
                pipe.push(*flags, bytes.to_vec());
            }
        }
        for (_, bytes) in fragments {
            accepted += bytes.len();
        }
        let mut position = lock_clean(&self.inner.position);
        *position += accepted as i64;
        OfferOutcome::Accepted {
            position: *position,
        }
    }
}

impl Publication for MemPublication {
    fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    fn max_payload_length(&self) -> usize {
        self.inner.config.max_payload_length
    }

    fn max_message_length(&self) -> usize {
        self.inner.config.max_message_length
    }

    fn term_buffer_length(&self) -> usize {
        self.inner.config.term_buffer_length
    }

    fn offer(&self, payload: &[u8]) -> OfferOutcome {
        if let Some(outcome) = self.take_injected() {
            return outcome;
        }
        if self.is_closed() {
            return OfferOutcome::Closed;
        }
        debug_assert!(payload.len() <= self.max_message_length());

        let chunks: Vec<&[u8]> = if payload.is_empty() {
            vec![&[][..]]
        } else {
            payload.chunks(self.max_payload_length()).collect()
        };
        let last = chunks.len() - 1;
        let fragments: Vec<(u8, &[u8])> = chunks
            .iter()
            .enumerate()
            .map(|(index, bytes)| {
                let mut flags = 0u8;
                if index == 0 {
                    flags |= frame::BEGIN_FRAG;
                }
                if index == last {
                    flags |= frame::END_FRAG;
                }
                (flags, *bytes)
            })
            .collect();
        self.deliver(&fragments)
    }

    fn try_claim(&self, length: usize, fill: &mut dyn FnMut(&mut [u8])) -> OfferOutcome {
        if let Some(outcome) = self.take_injected() {
            return outcome;
        }
        if self.is_closed() {
            return OfferOutcome::Closed;
        }
        debug_assert!(length <= self.max_payload_length());

        let mut buffer = vec![0u8; length];
        fill(&mut buffer);
        self.deliver(&[(frame::UNFRAGMENTED, &buffer)])
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        for pipe in lock_clean(&self.inner.pipes).iter() {
            pipe.closed.store(true, Ordering::Release);
        }
    }
}

/// Inbound stream handle of the in-process fabric.
pub struct MemImage {
    session_id: SessionId,
    source_identity: String,
    pipe: Arc<Pipe>,
    closed: bool,
}

impl Image for MemImage {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn source_identity(&self) -> String {
        self.source_identity.clone()
    }

    fn is_end_of_stream(&self) -> bool {
        self.closed
            || (self.pipe.closed.load(Ordering::Acquire) && lock_clean(&self.pipe.frames).is_empty())
    }

    fn controlled_poll(
        &mut self,
        handler: &mut dyn FnMut(&[u8], &FrameHeader) -> PollAction,
        fragment_limit: usize,
    ) -> usize {
        if self.closed {
            return 0;
        }
        let mut consumed = 0;
        while consumed < fragment_limit {
            // Pop before invoking the handler so it never runs under the
            // queue lock.
            let Some(next) = lock_clean(&self.pipe.frames).pop_front() else {
                break;
            };
            consumed += 1;
            let header = FrameHeader { flags: next.flags };
            if handler(&next.bytes, &header) == PollAction::Break {
                break;
            }
        }
        consumed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
