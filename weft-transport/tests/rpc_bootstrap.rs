//! Integration tests for the two-party RPC endpoints.

use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use weft_core::{JsonCodec, MessageCodec, TokioProviders};
use weft_fabric_mem::{MemFabric, MemFabricConfig};
use weft_transport::{
    CallError, Capability, Connector, FramedStream, Listener, TwoPartyClient, TwoPartyServer,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

type Providers = TokioProviders<MemFabric>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EchoRequest {
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EchoResponse {
    text: String,
    length: usize,
}

/// Bootstrap capability used by these tests.
struct EchoCapability {
    codec: JsonCodec,
}

#[async_trait(?Send)]
impl Capability for EchoCapability {
    async fn call(&self, method: &str, params: &[u8]) -> Result<Vec<u8>, CallError> {
        match method {
            "greet" => self
                .codec
                .encode(&"hello from the server".to_string())
                .map_err(|error| CallError::failed(error.to_string())),
            "echo" => {
                let request: EchoRequest = self
                    .codec
                    .decode(params)
                    .map_err(|error| CallError::failed(error.to_string()))?;
                let response = EchoResponse {
                    length: request.text.len(),
                    text: request.text,
                };
                self.codec
                    .encode(&response)
                    .map_err(|error| CallError::failed(error.to_string()))
            }
            other => Err(CallError::NoSuchMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Handshake a connected client/server stream pair over a fresh fabric.
async fn connected_streams(
    providers: &Providers,
) -> (FramedStream<MemFabric>, FramedStream<MemFabric>) {
    let mut listener = Listener::new(providers, JsonCodec, "mem:server", 1);
    let connector = Connector::new(providers, JsonCodec, "mem:client", 2);
    let (client, server) = tokio::join!(connector.connect("mem:server", 1), listener.accept());
    (client.expect("connect"), server.expect("accept"))
}

fn echo_server(providers: &Providers) -> TwoPartyServer<Providers, JsonCodec> {
    TwoPartyServer::new(
        providers,
        JsonCodec,
        Rc::new(EchoCapability { codec: JsonCodec }),
    )
}

#[tokio::test]
async fn test_bootstrap_call_resolves() {
    init_tracing();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TokioProviders::new(MemFabric::new());
            let (client_stream, server_stream) = connected_streams(&providers).await;

            let server = echo_server(&providers);
            server.accept(server_stream);

            let client = TwoPartyClient::new(&providers, client_stream, JsonCodec);
            let bootstrap = client.bootstrap();

            // A single method call with no parameters resolves to the
            // server-provided response.
            let greeting: String = bootstrap.call_as("greet", &()).await.expect("call");
            assert_eq!(greeting, "hello from the server");
        })
        .await;
}

#[tokio::test]
async fn test_typed_calls_roundtrip_in_order() {
    init_tracing();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TokioProviders::new(MemFabric::new());
            let (client_stream, server_stream) = connected_streams(&providers).await;

            let server = echo_server(&providers);
            server.accept(server_stream);

            let client = TwoPartyClient::new(&providers, client_stream, JsonCodec);
            let bootstrap = client.bootstrap();

            for index in 0..5 {
                let request = EchoRequest {
                    text: format!("message {index}"),
                };
                let response: EchoResponse =
                    bootstrap.call_as("echo", &request).await.expect("call");
                assert_eq!(response.text, format!("message {index}"));
                assert_eq!(response.length, response.text.len());
            }
        })
        .await;
}

#[tokio::test]
async fn test_unknown_method_returns_error() {
    init_tracing();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TokioProviders::new(MemFabric::new());
            let (client_stream, server_stream) = connected_streams(&providers).await;

            let server = echo_server(&providers);
            server.accept(server_stream);

            let client = TwoPartyClient::new(&providers, client_stream, JsonCodec);
            let bootstrap = client.bootstrap();

            let result = bootstrap.call("into-the-void", b"null").await;
            assert_eq!(
                result,
                Err(CallError::NoSuchMethod {
                    method: "into-the-void".to_string()
                })
            );

            // The connection survives a failed call.
            let greeting: String = bootstrap.call_as("greet", &()).await.expect("call");
            assert_eq!(greeting, "hello from the server");
        })
        .await;
}

#[tokio::test]
async fn test_large_call_fragments_and_reassembles() {
    init_tracing();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let config = MemFabricConfig {
                max_payload_length: 256,
                ..MemFabricConfig::default()
            };
            let providers = TokioProviders::new(MemFabric::with_config(config));
            let (client_stream, server_stream) = connected_streams(&providers).await;

            let server = echo_server(&providers);
            server.accept(server_stream);

            let client = TwoPartyClient::new(&providers, client_stream, JsonCodec);
            let bootstrap = client.bootstrap();

            // Far larger than one fragment in both directions.
            let request = EchoRequest {
                text: "x".repeat(2000),
            };
            let response: EchoResponse = bootstrap.call_as("echo", &request).await.expect("call");
            assert_eq!(response.length, 2000);
            assert_eq!(response.text, request.text);
        })
        .await;
}

#[tokio::test]
async fn test_drain_resolves_after_clients_disconnect() {
    init_tracing();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TokioProviders::new(MemFabric::new());
            let (client_stream, server_stream) = connected_streams(&providers).await;

            let server = echo_server(&providers);
            server.accept(server_stream);

            let client = TwoPartyClient::new(&providers, client_stream, JsonCodec);
            let bootstrap = client.bootstrap();
            let greeting: String = bootstrap.call_as("greet", &()).await.expect("call");
            assert_eq!(greeting, "hello from the server");

            // Dropping every handle ends the client connection, which the
            // server observes as end-of-stream.
            drop(bootstrap);
            drop(client);

            tokio::time::timeout(Duration::from_secs(5), server.drain())
                .await
                .expect("drain finished");
        })
        .await;
}

#[tokio::test]
async fn test_listen_serves_multiple_connections() {
    init_tracing();
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TokioProviders::new(MemFabric::new());
            let mut listener = Listener::new(&providers, JsonCodec, "mem:server", 1);
            let connector = Connector::new(&providers, JsonCodec, "mem:client", 2);

            let server = Rc::new(echo_server(&providers));
            let listen_server = server.clone();
            let listen_task = tokio::task::spawn_local(async move {
                // Runs until the listener is torn down with the test.
                let mut listener = listener;
                let _ = listen_server.listen(&mut listener).await;
            });

            for _ in 0..2 {
                let stream = connector
                    .connect("mem:server", 1)
                    .await
                    .expect("connect");
                let client = TwoPartyClient::new(&providers, stream, JsonCodec);
                let bootstrap = client.bootstrap();
                let greeting: String = bootstrap.call_as("greet", &()).await.expect("call");
                assert_eq!(greeting, "hello from the server");
            }

            listen_task.abort();
        })
        .await;
}
