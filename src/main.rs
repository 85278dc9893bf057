// src/main.rs
//! Loopback demo binary.
//!
//! Runs two in-process clients against the in-memory relay and mock
//! connection engines, then walks through the whole flow: tunnel key
//! exchange, an encrypted friend request, direct connection setup, a chat
//! message, and a chunked file transfer.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use peerlink::crypto::KeyPair;
use peerlink::relay::MemoryRelayHub;
use peerlink::storage::MemoryKeyStore;
use peerlink::transport::mock::{MockEngineFactory, MockHub};
use peerlink::types::Args;
use peerlink::utils::logging;
use peerlink::{ClientEvent, LinkClient};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = match &args.log_file {
        Some(path) => Some(logging::init_file_logging(&args.log_level, path)?),
        None => {
            logging::init_logging(&args.log_level)?;
            None
        }
    };

    info!(
        "Starting loopback demo: {} <-> {}",
        args.peer_a, args.peer_b
    );

    let relay_hub = MemoryRelayHub::new();
    let mock_hub = MockHub::new();

    let (alice, alice_events) = make_client(&args.peer_a, &relay_hub, &mock_hub).await?;
    let (bob, bob_events) = make_client(&args.peer_b, &relay_hub, &mock_hub).await?;

    let printer_a = tokio::spawn(print_events(args.peer_a.clone(), alice_events));
    let printer_b = tokio::spawn(print_events(args.peer_b.clone(), bob_events));

    alice.establish_tunnel().await?;
    bob.establish_tunnel().await?;
    alice
        .send_secure_request(&args.peer_b, "hello, want to connect?")
        .await?;

    alice.connect_to_peer(&args.peer_b).await?;
    // Give the connection monitors a moment to announce readiness
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    alice
        .send_message(&args.peer_b, "first direct message")
        .await?;

    let blob: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
    alice.send_file(&args.peer_b, "demo.bin", &blob).await?;

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    alice.shutdown().await;
    bob.shutdown().await;
    printer_a.abort();
    printer_b.abort();

    info!("Demo finished");
    Ok(())
}

async fn make_client(
    name: &str,
    relay_hub: &Arc<MemoryRelayHub>,
    mock_hub: &Arc<MockHub>,
) -> Result<(Arc<LinkClient>, mpsc::Receiver<ClientEvent>)> {
    let store = MemoryKeyStore::new();
    store.set_identity(KeyPair::generate()?).await;

    let relay = Arc::new(relay_hub.attach(name).await);
    let factory = Arc::new(MockEngineFactory::new(mock_hub.clone()));
    Ok(LinkClient::new(name, relay, factory, store))
}

async fn print_events(name: String, mut events: mpsc::Receiver<ClientEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ClientEvent::FileProgress {
                peer,
                file_name,
                percent,
            } => {
                if percent % 25 == 0 {
                    info!("[{}] '{}' from {}: {}%", name, file_name, peer, percent);
                }
            }
            other => info!("[{}] {:?}", name, other),
        }
    }
}
