//! ESP-over-UDP data-plane transport for VPN tunnels.
//!
//! This crate implements the encrypted fast path of a VPN client: IP
//! packets wrapped in ESP (Encapsulating Security Payload) datagrams
//! over UDP, with key-generation bookkeeping across rekeys, replay
//! protection, strict wire-format validation, and a dead-peer-detection
//! state machine. Key negotiation belongs to the outer protocol; this
//! crate takes negotiated SPIs and keys and moves packets.
//!
//! # Example
//!
//! ```rust
//! use esptun_proto::esp::{EspContext, PacketBuf, crypto};
//!
//! // Contexts come from the outer protocol's negotiation
//! let mut sender = EspContext::from_ids(0x1001, 0x02, 0x02, &[7u8; 16], &[9u8; 20]).unwrap();
//! let mut receiver = EspContext::from_ids(0x1001, 0x02, 0x02, &[7u8; 16], &[9u8; 20]).unwrap();
//!
//! // Encrypt an IP packet in place and decrypt it on the peer side
//! let mut pkt = PacketBuf::from_payload(b"\x45\x00\x00\x14payload").unwrap();
//! let wire_len = crypto::encrypt_packet(&mut sender, &mut pkt).unwrap();
//! assert!(wire_len > pkt.len());
//! crypto::decrypt_packet(&mut receiver, &mut pkt, true).unwrap();
//! ```
//!
//! The full session loop, probe scheduling and async driver live in
//! [`esp`].
//!
//! # Security
//!
//! - All cryptographic operations use vetted RustCrypto libraries
//! - Constant-time ICV verification
//! - Secure memory handling with `zeroize`
//! - Every attacker-controlled length is validated before use
//!
//! # References
//!
//! - [RFC 4303](https://datatracker.ietf.org/doc/html/rfc4303) - IP Encapsulating Security Payload
//! - [RFC 3602](https://datatracker.ietf.org/doc/html/rfc3602) - The AES-CBC Cipher Algorithm
//! - [RFC 2403](https://datatracker.ietf.org/doc/html/rfc2403) - HMAC-MD5-96 within ESP and AH
//! - [RFC 2404](https://datatracker.ietf.org/doc/html/rfc2404) - HMAC-SHA-1-96 within ESP and AH

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod esp;
