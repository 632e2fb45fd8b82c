//! # weft-transport
//!
//! Two-party RPC transport over a weft messaging fabric.
//!
//! The fabric supplies reliable, in-order, fragmented, flow-controlled
//! one-way streams identified by `(channel, stream id)`. This crate wraps a
//! pair of them into a bidirectional, message-oriented connection suitable
//! for a capability RPC endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │           TwoPartyServer / TwoPartyClient        │
//! │     • bootstrap capability per connection        │
//! │     • question-id correlated calls               │
//! ├─────────────────────────────────────────────────┤
//! │           Connector / Listener (SYN/ACK)         │
//! │     • matches streams by publication session id  │
//! ├─────────────────────────────────────────────────┤
//! │                 FramedStream                     │
//! │     • zero-copy claim / offer write paths        │
//! │     • fragment reassembly on read                │
//! ├─────────────────────────────────────────────────┤
//! │        Fabric contract (weft-core traits)        │
//! │     • publications, images, frame flags          │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`Idler`] | Waiting policy for the non-blocking polling loops |
//! | [`ImageReceiver`] | Mutex-guarded queue of inbound stream images |
//! | [`FramedStream`] | Bidirectional framed message stream |
//! | [`Connector`] / [`Listener`] | SYN/ACK connection establishment |
//! | [`TwoPartyServer`] / [`TwoPartyClient`] | RPC endpoint glue |
//!
//! ## Concurrency model
//!
//! One event loop per peer: every async step runs on a single thread
//! inside a `tokio::task::LocalSet`, and shared state is `Rc<RefCell<…>>`.
//! The one cross-thread point is the fabric's availability callback, which
//! [`ImageReceiver`] absorbs behind a mutex-guarded FIFO. No step ever
//! blocks the thread; every wait is an [`Idler`] step, a timer, or a
//! cooperative yield.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod error;
pub mod handshake;
pub mod idle;
pub mod receiver;
pub mod rpc;
pub mod stream;

mod record;

// Configuration exports
pub use config::{BackoffConfig, ConnectorConfig};

// Error exports
pub use error::{TransportError, TransportResult};

// Idle strategy exports
pub use idle::{Backoff, BoxIdler, Idler, IdlerFactory, Periodic, Yield, backoff_factory, periodic_factory};

// Receiver exports
pub use receiver::ImageReceiver;

// Stream exports
pub use stream::{FramedStream, POLL_BATCH, Polled, read_message_from};

// Handshake exports
pub use handshake::{Ack, Connector, Listener, Syn};

// RPC endpoint exports
pub use rpc::{BootstrapClient, CallError, Capability, TwoPartyClient, TwoPartyServer};
