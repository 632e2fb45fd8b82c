//! Client endpoint: retrieve and call the peer's bootstrap capability.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use weft_core::{Fabric, MessageBuilder, MessageCodec, Providers, TaskProvider, TimeProvider};

use crate::error::TransportResult;
use crate::idle::{Backoff, BoxIdler};
use crate::record::{build_record, read_record};
use crate::stream::{FramedStream, Polled};

use super::proto::{CallError, RpcFrame};

/// Outstanding calls awaiting their `Return`, keyed by question id.
type QuestionMap = Rc<RefCell<HashMap<u64, oneshot::Sender<Result<Vec<u8>, CallError>>>>>;

/// Client-side endpoint glue.
///
/// Takes ownership of one connected [`FramedStream`] and drives it from a
/// background task; [`TwoPartyClient::bootstrap`] hands out capability
/// handles that submit calls to that task and await the correlated return.
/// Disconnection rejects every outstanding call with
/// [`CallError::Disconnected`].
pub struct TwoPartyClient<C: MessageCodec> {
    codec: C,
    outgoing: mpsc::UnboundedSender<MessageBuilder>,
    questions: QuestionMap,
    next_question: Rc<Cell<u64>>,
    // Driver runs until the stream or this client goes away.
    _driver: tokio::task::JoinHandle<()>,
}

impl<C: MessageCodec> TwoPartyClient<C> {
    /// Wrap a connected stream and start driving it.
    ///
    /// Spawns the connection driver on the providers' task spawner, so this
    /// must run within a `LocalSet`.
    pub fn new<P: Providers>(providers: &P, stream: FramedStream<P::Fabric>, codec: C) -> Self {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let questions: QuestionMap = Rc::new(RefCell::new(HashMap::new()));

        let driver = providers.task().spawn_task(
            "rpc-client-connection",
            drive_connection(
                stream,
                outgoing_rx,
                questions.clone(),
                codec.clone(),
                providers.time().clone(),
            ),
        );

        Self {
            codec,
            outgoing,
            questions,
            next_question: Rc::new(Cell::new(0)),
            _driver: driver,
        }
    }

    /// Handle to the capability the server bound on its side.
    pub fn bootstrap(&self) -> BootstrapClient<C> {
        BootstrapClient {
            codec: self.codec.clone(),
            outgoing: self.outgoing.clone(),
            questions: self.questions.clone(),
            next_question: self.next_question.clone(),
        }
    }
}

/// Callable handle to the server's bootstrap capability.
///
/// Cheap to clone; every clone calls through the same connection.
#[derive(Clone)]
pub struct BootstrapClient<C: MessageCodec> {
    codec: C,
    outgoing: mpsc::UnboundedSender<MessageBuilder>,
    questions: QuestionMap,
    next_question: Rc<Cell<u64>>,
}

impl<C: MessageCodec> BootstrapClient<C> {
    /// Call `method` with raw parameter bytes.
    pub async fn call(&self, method: &str, params: &[u8]) -> Result<Vec<u8>, CallError> {
        let question_id = self.next_question.get();
        self.next_question.set(question_id + 1);

        let (fulfiller, fulfilled) = oneshot::channel();
        self.questions.borrow_mut().insert(question_id, fulfiller);

        let frame = RpcFrame::Call {
            question_id,
            method: method.to_string(),
            params: params.to_vec(),
        };
        let message = match build_record(&self.codec, &frame) {
            Ok(message) => message,
            Err(error) => {
                self.questions.borrow_mut().remove(&question_id);
                return Err(CallError::failed(error.to_string()));
            }
        };
        if self.outgoing.send(message).is_err() {
            self.questions.borrow_mut().remove(&question_id);
            return Err(CallError::Disconnected);
        }

        match fulfilled.await {
            Ok(result) => result,
            Err(_) => Err(CallError::Disconnected),
        }
    }

    /// Typed call: encode the request and decode the response through the
    /// payload codec.
    pub async fn call_as<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, CallError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let params = self
            .codec
            .encode(request)
            .map_err(|error| CallError::failed(error.to_string()))?;
        let response = self.call(method, &params).await?;
        self.codec
            .decode(&response)
            .map_err(|error| CallError::failed(error.to_string()))
    }
}

/// What the driver's wait resolved to.
enum Wait {
    Outgoing(Option<MessageBuilder>),
    Idled(TransportResult<()>),
}

/// Driver task body: reject outstanding calls once the loop ends, however
/// it ends.
async fn drive_connection<F: Fabric, C: MessageCodec, T: TimeProvider + 'static>(
    stream: FramedStream<F>,
    outgoing: mpsc::UnboundedReceiver<MessageBuilder>,
    questions: QuestionMap,
    codec: C,
    time: T,
) {
    match client_loop(stream, outgoing, &questions, codec, time).await {
        Ok(()) => tracing::info!("client connection closed"),
        Err(error) if error.is_disconnected() => {
            tracing::info!(%error, "client connection closed")
        }
        Err(error) => tracing::error!(%error, "client connection failed"),
    }

    for (_, fulfiller) in questions.borrow_mut().drain() {
        let _ = fulfiller.send(Err(CallError::Disconnected));
    }
}

async fn client_loop<F: Fabric, C: MessageCodec, T: TimeProvider + 'static>(
    mut stream: FramedStream<F>,
    mut outgoing: mpsc::UnboundedReceiver<MessageBuilder>,
    questions: &QuestionMap,
    codec: C,
    time: T,
) -> TransportResult<()> {
    let mut idler: BoxIdler = Box::new(Backoff::new(time));
    loop {
        // Queued calls first: writes never wait behind an idle read.
        while let Ok(message) = outgoing.try_recv() {
            stream.write_message(&message).await?;
        }

        match stream.poll_pass()? {
            Polled::Message(reader) => {
                idler.reset();
                let frame: RpcFrame = read_record(&codec, &reader)?;
                match frame {
                    RpcFrame::Return {
                        question_id,
                        result,
                    } => match questions.borrow_mut().remove(&question_id) {
                        Some(fulfiller) => {
                            let _ = fulfiller.send(result);
                        }
                        None => {
                            tracing::warn!(question_id, "Return for an unknown question");
                        }
                    },
                    RpcFrame::Call { question_id, .. } => {
                        tracing::warn!(question_id, "unexpected Call on client connection");
                    }
                }
            }
            Polled::Progress(_) => {
                idler.reset();
                tokio::task::yield_now().await;
            }
            Polled::Empty => {
                let wait = tokio::select! {
                    maybe = outgoing.recv() => Wait::Outgoing(maybe),
                    result = idler.idle() => Wait::Idled(result),
                };
                match wait {
                    Wait::Outgoing(Some(message)) => {
                        idler.reset();
                        stream.write_message(&message).await?;
                    }
                    // Every handle dropped: no further calls can arrive.
                    Wait::Outgoing(None) => {
                        stream.end();
                        return Ok(());
                    }
                    Wait::Idled(result) => result?,
                }
            }
            Polled::EndOfStream => return Ok(()),
        }
    }
}
