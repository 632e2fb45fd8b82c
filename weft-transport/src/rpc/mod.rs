//! Two-party RPC endpoints over framed streams.
//!
//! The handshake produces exactly what an RPC runtime expects — a
//! bidirectional, message-oriented connection — and this module is the glue
//! on either side of it: a server that exports one bootstrap capability per
//! accepted connection and a client that retrieves it and calls through it.
//!
//! The runtime is deliberately two-party and bootstrap-only. There is one
//! capability per connection, calls are dispatched in arrival order, and
//! correlation is a question-id map of one-shot fulfillers — the same
//! pattern the handshake uses for session ids. Capability tables, promise
//! pipelining and multi-vat routing are out of scope; the "vat id" of a
//! two-party connection collapses to "the other side" and never appears on
//! the wire.

mod client;
mod proto;
mod server;

pub use client::{BootstrapClient, TwoPartyClient};
pub use proto::CallError;
pub use server::{Capability, TwoPartyServer};
