//! ESP Tunnel Loopback Example
//!
//! This example runs both ends of an ESP-over-UDP tunnel inside one
//! process: a client driven through the high-level [`EspClient`] API
//! and an echo peer driven directly through [`EspSession`]. Packets are
//! encrypted, sent over real loopback sockets, decrypted, echoed back
//! and decrypted again.
//!
//! In a real deployment the SPIs and keys come from the VPN control
//! channel; here both ends are handed the same freshly made-up values.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example esp_loopback
//! ```
//!
//! Environment variables:
//!
//! - `RUST_LOG=debug` show probe and drop decisions
//! - `RUST_LOG=trace` show per-packet events and key material

use esptun_proto::esp::{
    EspClient, EspConfig, EspContext, EspSession, NoopHooks, PacketBuf, TransportState,
};
use std::time::Duration;
use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("ESP Tunnel Loopback Example");
    println!("===========================");
    println!();

    // Step 1: Make up the security associations both ends share
    println!("[1/4] Creating security contexts...");
    let enc_a = [0x11u8; 16];
    let mac_a = [0x22u8; 20];
    let enc_b = [0x33u8; 16];
    let mac_b = [0x44u8; 20];

    // 0x02 = AES-128-CBC, 0x02 = HMAC-SHA-1-96
    let client_in = EspContext::from_ids(0x1001, 0x02, 0x02, &enc_a, &mac_a)?;
    let client_out = EspContext::from_ids(0x2001, 0x02, 0x02, &enc_b, &mac_b)?;
    let peer_in = EspContext::from_ids(0x2001, 0x02, 0x02, &enc_b, &mac_b)?;
    let peer_out = EspContext::from_ids(0x1001, 0x02, 0x02, &enc_a, &mac_a)?;
    println!("✓ Client receives on SPI 0x1001, sends on SPI 0x2001");
    println!();

    // Step 2: Connect two UDP sockets over loopback
    println!("[2/4] Opening the UDP path...");
    let client_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_socket = UdpSocket::bind("127.0.0.1:0").await?;
    client_socket.connect(peer_socket.local_addr()?).await?;
    peer_socket.connect(client_socket.local_addr()?).await?;
    println!("✓ client {} <-> peer {}",
        client_socket.local_addr()?,
        peer_socket.local_addr()?);
    println!();

    let mut client = EspClient::new(
        EspSession::new(EspConfig::default(), client_socket, client_in, client_out),
        NoopHooks,
    );
    let mut peer = EspSession::new(EspConfig::default(), peer_socket, peer_in, peer_out);
    let mut peer_hooks = NoopHooks;

    client.setup()?;
    // The control channel would confirm the probe exchange; this
    // example skips straight to the established state on both ends
    client.session_mut().set_state(TransportState::Connected);
    peer.set_state(TransportState::Connected);

    // Step 3: Send packets through the tunnel and echo them back
    println!("[3/4] Exchanging packets...");
    let messages: [&[u8]; 3] = [
        b"\x45hello through the tunnel",
        b"\x45a second datagram",
        b"\x45and one more for the road",
    ];

    for message in &messages {
        client.send_packet(message)?;
    }
    client.poll_once().await;
    println!("✓ {} packets encrypted and sent", messages.len());

    // Drive the echo peer: decrypt everything, queue it straight back
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut timeout_hint = Duration::from_secs(60);
    peer.run_iteration(&mut peer_hooks, &mut timeout_hint);
    while let Some(pkt) = peer.pop_inbound() {
        println!("  peer decrypted {} bytes: {:?}",
            pkt.len(),
            String::from_utf8_lossy(&pkt.payload()[1..]));
        peer.queue_outbound(PacketBuf::from_payload(pkt.payload())?);
    }
    peer.wait_send_ready().await;
    let mut timeout_hint = Duration::from_secs(60);
    peer.run_iteration(&mut peer_hooks, &mut timeout_hint);
    println!("✓ peer echoed everything back");

    // Collect the echoes on the client side
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mut echoed = 0;
    client.poll_once().await;
    while let Some(packet) = client.recv_packet() {
        println!("  client got echo of {} bytes", packet.len());
        echoed += 1;
    }
    println!("✓ {} echoes received", echoed);
    println!();

    // Step 4: Report and tear down
    println!("[4/4] Shutting down...");
    let client_stats = client.session().metrics().snapshot();
    let peer_stats = peer.metrics().snapshot();
    client.shutdown();
    peer.shutdown(&mut peer_hooks);
    println!("✓ Key material wiped on both ends");
    println!();

    println!("Summary:");
    println!("  client: {} packets out ({} bytes), {} packets in, {} drops",
        client_stats.packets_sent,
        client_stats.bytes_sent,
        client_stats.packets_received,
        client_stats.drops_total());
    println!("  peer:   {} packets out ({} bytes), {} packets in, {} drops",
        peer_stats.packets_sent,
        peer_stats.bytes_sent,
        peer_stats.packets_received,
        peer_stats.drops_total());

    Ok(())
}
