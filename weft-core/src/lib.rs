//! # weft-core
//!
//! Contract and provider traits for the weft two-party transport.
//!
//! Transport code depends on the abstractions in this crate rather than on
//! a concrete messaging substrate, allowing the same handshake and framing
//! logic to run against a real media driver or an in-process fabric during
//! testing.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Transport code                        │
//! │      Uses: Fabric, TimeProvider, TaskProvider         │
//! └───────────────────────┬──────────────────────────────┘
//!                         │ depends on traits
//!          ┌──────────────┴──────────────┐
//!          ▼                             ▼
//!   ┌─────────────────┐         ┌─────────────────┐
//!   │   In-process    │         │   Media driver   │
//!   │   MemFabric     │         │   integration    │
//!   │ (weft-fabric-mem)│        │  (out of tree)   │
//!   └─────────────────┘         └─────────────────┘
//! ```
//!
//! ## Contents
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`fabric`] | Fabric contract: publications, images, frame flags, offer outcomes |
//! | [`message`] | Segmented message codec (builder, reader, payload envelope) |
//! | `codec` | Pluggable serde payload codec with a JSON default |
//! | `time` / `task` | Time and task provider seams with Tokio implementations |
//! | `providers` | Bundle trait collapsing the three seams into one parameter |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
pub mod fabric;
pub mod message;
mod providers;
mod task;
mod time;

// Codec exports
pub use codec::{CodecError, JsonCodec, MessageCodec};

// Fabric contract exports
pub use fabric::{
    Fabric, FrameHeader, Image, ImageAvailableFn, ImageUnavailableFn, OfferOutcome, PollAction,
    Publication, RegistrationId, SessionId, StreamId, frame,
};

// Segmented codec exports
pub use message::{MAX_SEGMENTS, MessageBuilder, MessageError, MessageReader, WORD_SIZE, word_align};

// Provider exports
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
