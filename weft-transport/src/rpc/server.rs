//! Server endpoint: export a bootstrap capability on every accepted
//! connection.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;

use weft_core::{Fabric, MessageCodec, Providers, TaskProvider, TimeProvider};

use crate::error::TransportResult;
use crate::handshake::Listener;
use crate::idle::{Backoff, BoxIdler};
use crate::record::{build_record, read_record};
use crate::stream::{FramedStream, Polled};

use super::proto::{CallError, RpcFrame};

/// The bootstrap interface a server exports on each connection.
#[async_trait(?Send)]
pub trait Capability {
    /// Handle one call.
    ///
    /// `params` and the success payload are opaque to the transport; the
    /// payload codec on both sides gives them meaning.
    async fn call(&self, method: &str, params: &[u8]) -> Result<Vec<u8>, CallError>;
}

/// Server-side endpoint glue.
///
/// Each accepted [`FramedStream`] gets a connection task that reads calls,
/// dispatches them to the bootstrap capability in arrival order, and
/// writes the returns, keeping the stream alive until the peer disconnects.
pub struct TwoPartyServer<P: Providers, C: MessageCodec> {
    providers: P,
    codec: C,
    bootstrap: Rc<dyn Capability>,
    connections: Rc<RefCell<Vec<tokio::task::JoinHandle<()>>>>,
}

impl<P: Providers, C: MessageCodec> TwoPartyServer<P, C> {
    /// Create a server exporting `bootstrap` on every connection.
    pub fn new(providers: &P, codec: C, bootstrap: Rc<dyn Capability>) -> Self {
        Self {
            providers: providers.clone(),
            codec,
            bootstrap,
            connections: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Take ownership of a connected stream and serve it until disconnect.
    pub fn accept(&self, stream: FramedStream<P::Fabric>) {
        let handle = self.providers.task().spawn_task(
            "rpc-server-connection",
            serve_connection(
                stream,
                self.bootstrap.clone(),
                self.codec.clone(),
                self.providers.time().clone(),
            ),
        );
        self.connections.borrow_mut().push(handle);
    }

    /// Accept connections from `listener` forever.
    ///
    /// Returns only when an accept fails; callers usually spawn this on the
    /// task provider.
    pub async fn listen(&self, listener: &mut Listener<P, C>) -> TransportResult<()> {
        loop {
            let stream = listener.accept().await?;
            self.accept(stream);
        }
    }

    /// Wait until every accepted connection has disconnected.
    pub async fn drain(&self) {
        loop {
            let next = self.connections.borrow_mut().pop();
            match next {
                Some(handle) => {
                    let _ = handle.await;
                }
                None => return,
            }
        }
    }
}

impl<P: Providers, C: MessageCodec> Drop for TwoPartyServer<P, C> {
    fn drop(&mut self) {
        for handle in self.connections.borrow_mut().drain(..) {
            handle.abort();
        }
    }
}

/// Connection task body: log terminal failures, treat disconnects as a
/// normal end.
async fn serve_connection<F: Fabric, C: MessageCodec, T: TimeProvider + 'static>(
    stream: FramedStream<F>,
    bootstrap: Rc<dyn Capability>,
    codec: C,
    time: T,
) {
    match serve_loop(stream, bootstrap, codec, time).await {
        Ok(()) => tracing::info!("server connection closed"),
        Err(error) if error.is_disconnected() => {
            tracing::info!(%error, "server connection closed")
        }
        Err(error) => tracing::error!(%error, "server connection failed"),
    }
}

async fn serve_loop<F: Fabric, C: MessageCodec, T: TimeProvider + 'static>(
    mut stream: FramedStream<F>,
    bootstrap: Rc<dyn Capability>,
    codec: C,
    time: T,
) -> TransportResult<()> {
    let mut idler: BoxIdler = Box::new(Backoff::new(time));
    loop {
        match stream.poll_pass()? {
            Polled::Message(reader) => {
                idler.reset();
                let frame: RpcFrame = read_record(&codec, &reader)?;
                match frame {
                    RpcFrame::Call {
                        question_id,
                        method,
                        params,
                    } => {
                        tracing::debug!(question_id, method = %method, "dispatching call");
                        let result = bootstrap.call(&method, &params).await;
                        let reply = RpcFrame::Return {
                            question_id,
                            result,
                        };
                        let message = build_record(&codec, &reply)?;
                        stream.write_message(&message).await?;
                    }
                    RpcFrame::Return { question_id, .. } => {
                        tracing::warn!(question_id, "unexpected Return on server connection");
                    }
                }
            }
            Polled::Progress(_) => {
                idler.reset();
                tokio::task::yield_now().await;
            }
            Polled::Empty => idler.idle().await?,
            Polled::EndOfStream => return Ok(()),
        }
    }
}
