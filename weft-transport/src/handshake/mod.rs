//! SYN/ACK handshake turning unidirectional stream pairs into framed
//! connections.
//!
//! Each side of the fabric only speaks one-way streams, so a connection is
//! assembled out of two of them. The client opens a publication towards the
//! listener and sends a [`Syn`] advertising its own inbound coordinates;
//! the listener opens the return publication to those coordinates and
//! answers with an [`Ack`] carrying the session id it observed on the
//! SYN-bearing image. That session id is the correlation token: the
//! client's [`Connector`] matches it against the publication it created and
//! pairs the arriving image with it.
//!
//! ```text
//!  Connector                               Listener
//!     │ add_exclusive_publication(P_c)        │
//!     │──────────── Syn{chan,stream} ────────▶│ (on listening image)
//!     │                                       │ add_exclusive_publication(P_s)
//!     │◀─────────── Ack{session(P_c)} ────────│ (on P_s)
//!     │ match Ack.session_id → pending entry  │
//!  FramedStream(P_c, image of P_s)        FramedStream(P_s, image of P_c)
//! ```

mod connector;
mod listener;

pub use connector::Connector;
pub use listener::Listener;

use serde::{Deserialize, Serialize};

use weft_core::{Fabric, StreamId};

use crate::error::TransportResult;
use crate::idle::Idler;

/// Client hello: advertises the connector's inbound coordinates so the
/// listener can open the return stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Syn {
    /// Channel of the connector's response subscription.
    pub channel: String,
    /// Stream id of the connector's response subscription.
    pub stream_id: StreamId,
}

/// Server reply: echoes the session id the listener observed on the
/// SYN-bearing image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// The client publication's session id, as seen on the server side.
    pub session_id: weft_core::SessionId,
}

/// Register an exclusive publication and poll until the fabric reports it.
pub(crate) async fn add_publication<F: Fabric>(
    fabric: &F,
    channel: &str,
    stream_id: StreamId,
    idler: &mut dyn Idler,
) -> TransportResult<F::Publication> {
    let registration = fabric.add_exclusive_publication(channel, stream_id);
    loop {
        if let Some(publication) = fabric.find_exclusive_publication(registration) {
            return Ok(publication);
        }
        idler.idle().await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::Yield;
    use weft_core::Publication;
    use weft_fabric_mem::{MemFabric, MemFabricConfig};

    #[tokio::test]
    async fn test_add_publication_polls_until_registered() {
        let config = MemFabricConfig {
            registration_delay: 3,
            ..MemFabricConfig::default()
        };
        let fabric = MemFabric::with_config(config);

        let mut idler = Yield::bounded(8);
        let publication = add_publication(&fabric, "mem:reg", 1, &mut idler)
            .await
            .expect("registered");
        assert!(publication.session_id() > 0);
    }

    #[tokio::test]
    async fn test_add_publication_budget_exhaustion() {
        let config = MemFabricConfig {
            registration_delay: 10,
            ..MemFabricConfig::default()
        };
        let fabric = MemFabric::with_config(config);

        let mut idler = Yield::bounded(2);
        let result = add_publication(&fabric, "mem:reg", 1, &mut idler).await;
        assert!(matches!(result, Err(crate::TransportError::Overloaded)));
    }
}
