//! Two-Party Example: handshake and bootstrap RPC over the in-process
//! fabric.
//!
//! Both peers run on one event loop sharing a [`MemFabric`] instance, the
//! way a connector and listener would share one media driver:
//!
//! ```bash
//! cargo run --example two_party
//! ```
//!
//! The example shows:
//! - `Listener` / `Connector` completing the SYN/ACK handshake
//! - `TwoPartyServer` exporting a bootstrap capability per connection
//! - `TwoPartyClient` retrieving the capability and calling through it

use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use weft_core::{JsonCodec, MessageCodec, TokioProviders};
use weft_fabric_mem::MemFabric;
use weft_transport::{
    CallError, Capability, Connector, Listener, TwoPartyClient, TwoPartyServer,
};

/// Request message for the echo capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoRequest {
    /// Payload message.
    message: String,
}

/// Response message for the echo capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EchoResponse {
    /// Echoed message with "pong:" prefix.
    echo: String,
}

/// The capability the server exports to every connection.
struct EchoCapability;

#[async_trait(?Send)]
impl Capability for EchoCapability {
    async fn call(&self, method: &str, params: &[u8]) -> Result<Vec<u8>, CallError> {
        let codec = JsonCodec;
        match method {
            "echo" => {
                let request: EchoRequest = codec
                    .decode(params)
                    .map_err(|error| CallError::failed(error.to_string()))?;
                let response = EchoResponse {
                    echo: format!("pong: {}", request.message),
                };
                codec
                    .encode(&response)
                    .map_err(|error| CallError::failed(error.to_string()))
            }
            other => Err(CallError::NoSuchMethod {
                method: other.to_string(),
            }),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt().init();

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let providers = TokioProviders::new(MemFabric::new());

            // Server side: listen and export the echo capability.
            let mut listener = Listener::new(&providers, JsonCodec, "mem:server", 1);
            let server = TwoPartyServer::new(&providers, JsonCodec, Rc::new(EchoCapability));

            // Client side: connect, bootstrap, call.
            let connector = Connector::new(&providers, JsonCodec, "mem:client", 2);
            let (connected, accepted) =
                tokio::join!(connector.connect("mem:server", 1), listener.accept());

            server.accept(accepted.expect("accept"));
            let client = TwoPartyClient::new(&providers, connected.expect("connect"), JsonCodec);
            let bootstrap = client.bootstrap();

            for seq in 0..3 {
                let request = EchoRequest {
                    message: format!("ping {seq}"),
                };
                let response: EchoResponse = bootstrap
                    .call_as("echo", &request)
                    .await
                    .expect("echo call");
                println!("{}", response.echo);
            }

            drop(bootstrap);
            drop(client);
            server.drain().await;
        })
        .await;
}
