//! ESP-over-UDP tunnel transport
//!
//! This module implements the encrypted data plane of a VPN tunnel:
//! IP packets encapsulated in ESP (Encapsulating Security Payload)
//! datagrams carried over UDP, used as a fast path beside a TLS-based
//! fallback channel.
//!
//! - **Encapsulation**: AES-CBC encryption with truncated-HMAC
//!   integrity - RFC 4303 framing, RFC 3602 / RFC 2403 / RFC 2404
//!   transforms
//! - **Key lifecycle**: two inbound key generations bridge every rekey
//! - **Replay protection**: 64-packet sequence admission window
//! - **Dead peer detection**: probe scheduling and dead-path recovery
//!
//! # Architecture
//!
//! ```text
//! Tunnel device (IP packets)
//!   ├── outbound queue ─→ encrypt ─→ UDP socket
//!   └── inbound queue ←─ validate ←─ decrypt ←─ SPI router ←─ socket
//!        ↑
//! EspSession loop (non-blocking, deadline-driven)
//!   ├── probe scheduling while Sleeping
//!   ├── keepalive / DPD state machine while Connected
//!   └── EspClient async driver
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use esptun_proto::esp::{
//!     EspClient, EspConfig, EspContext, EspSession, NoopHooks, TransportState,
//! };
//! use tokio::net::UdpSocket;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Keys and SPIs come from the outer protocol's negotiation
//!     let inbound = EspContext::from_ids(0x1001, 0x02, 0x02, &[0u8; 16], &[0u8; 20])?;
//!     let outbound = EspContext::from_ids(0x2002, 0x02, 0x02, &[1u8; 16], &[1u8; 20])?;
//!
//!     let socket = UdpSocket::bind("0.0.0.0:0").await?;
//!     socket.connect("vpn.example.com:4500").await?;
//!
//!     let session = EspSession::new(EspConfig::default(), socket, inbound, outbound);
//!     let mut client = EspClient::new(session, NoopHooks);
//!     client.setup()?;
//!
//!     // The outer protocol confirms the probe exchange
//!     client.session_mut().set_state(TransportState::Connected);
//!
//!     client.send_packet(b"\x45\x00\x00\x14...ip packet...")?;
//!     loop {
//!         client.poll_once().await;
//!         if let Some(packet) = client.recv_packet() {
//!             println!("received {} bytes", packet.len());
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Two-generation rekey bridging**: late packets under the
//!   superseded SPI stay admissible within a bounded grace window
//! - **Strict trailer validation**: Next-Header allow-list and exact
//!   `1, 2, .., N` padding enforcement on decrypted payloads
//! - **Compressed payloads**: pluggable decoder for the vendor
//!   compressed encapsulation
//! - **Backpressure aware**: would-block on send arms writability
//!   interest instead of blocking the loop
//! - **Observability**: structured tracing and shareable atomic
//!   metrics
//!
//! # References
//!
//! - [RFC 4303](https://datatracker.ietf.org/doc/html/rfc4303) - ESP Protocol
//! - [RFC 3602](https://datatracker.ietf.org/doc/html/rfc3602) - AES-CBC Cipher Algorithm
//! - [RFC 2403](https://datatracker.ietf.org/doc/html/rfc2403) - HMAC-MD5-96
//! - [RFC 2404](https://datatracker.ietf.org/doc/html/rfc2404) - HMAC-SHA-1-96
//!
//! # Security
//!
//! - No unsafe code
//! - Key material is zeroized on drop and absent from debug output
//! - Constant-time ICV comparison
//! - Every wire-format length is validated before use

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod context;
pub mod crypto;
pub mod dpd;
pub mod error;
pub mod hooks;
pub mod logging;
pub mod metrics;
pub mod packet;
pub mod replay;
pub mod session;

// Re-export commonly used types
pub use client::EspClient;
pub use config::{EspConfig, EspConfigBuilder};
pub use context::EspContext;
pub use crypto::{EspAuth, EspCipher};
pub use error::{Error, Result};
pub use hooks::{Decompress, NoopHooks, TransportHooks};
pub use metrics::{EspMetrics, EspMetricsSnapshot};
pub use packet::PacketBuf;
pub use session::{EspSession, TransportState};
