//! Packet buffers for ESP datagrams
//!
//! A [`PacketBuf`] holds one datagram in the exact wire layout, so that
//! receive, decrypt and transmit all work in place:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               Security Parameters Index (SPI)                 |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Sequence Number                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                Initialization Vector (16 bytes)               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               Payload (ciphertext on the wire)                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Integrity Check Value (12 bytes, truncated)        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! `len` counts only the payload region. Decrypted payloads end with
//! `[pad 1,2,..,N][N][next header]`; the session strips that framing by
//! shrinking `len`.

use super::{Error, Result};

/// SPI plus sequence number
pub const ESP_HEADER_LEN: usize = 8;

/// IV length shared by both supported CBC ciphers
pub const ESP_IV_LEN: usize = 16;

/// ICV length shared by both supported MACs (96-bit truncation)
pub const ESP_ICV_LEN: usize = 12;

/// Offset of the payload region behind SPI, sequence and IV
pub const PAYLOAD_OFFSET: usize = ESP_HEADER_LEN + ESP_IV_LEN;

/// Largest possible CBC pad run (block size minus one)
pub const MAX_PAD: usize = 15;

/// Worst-case bytes appended behind a payload: padding, the padding
/// length byte, the Next-Header byte and the ICV
pub const MAX_TRAILER: usize = MAX_PAD + 2 + ESP_ICV_LEN;

/// One ESP datagram, allocated once and reused in place
#[derive(Clone, Debug)]
pub struct PacketBuf {
    buf: Vec<u8>,
    len: usize,
}

impl PacketBuf {
    /// Allocate a buffer able to hold `payload_capacity` payload bytes
    /// plus the fixed header regions
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] when the allocator refuses
    /// the request; the caller treats that as a transient resource
    /// error, not a session failure.
    pub fn try_with_capacity(payload_capacity: usize) -> Result<Self> {
        let total = PAYLOAD_OFFSET + payload_capacity;
        let mut buf = Vec::new();
        buf.try_reserve_exact(total)
            .map_err(|_| Error::AllocationFailed)?;
        buf.resize(total, 0);
        Ok(Self { buf, len: 0 })
    }

    /// Build an outbound buffer around a plaintext payload, reserving
    /// room for padding, trailer bytes and the ICV
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] when the allocator refuses
    /// the request.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let mut pkt = Self::try_with_capacity(payload.len() + MAX_TRAILER)?;
        pkt.buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
        pkt.len = payload.len();
        Ok(pkt)
    }

    /// Build an inbound buffer from a received ESP datagram
    ///
    /// The payload length is set to the ciphertext region between the
    /// IV and the trailing ICV, ready for
    /// [`decrypt_packet`](super::crypto::decrypt_packet).
    ///
    /// # Errors
    ///
    /// Returns [`Error::PacketTooShort`] when the datagram cannot hold
    /// header, IV, ICV and at least one payload byte, or
    /// [`Error::AllocationFailed`] when the allocator refuses the
    /// request.
    pub fn from_datagram(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= PAYLOAD_OFFSET + ESP_ICV_LEN {
            return Err(Error::PacketTooShort(bytes.len()));
        }
        let mut pkt = Self::try_with_capacity(bytes.len() - PAYLOAD_OFFSET)?;
        pkt.buf[..bytes.len()].copy_from_slice(bytes);
        pkt.len = bytes.len() - PAYLOAD_OFFSET - ESP_ICV_LEN;
        Ok(pkt)
    }

    /// SPI carried by the header, parsed from network byte order
    pub fn spi(&self) -> u32 {
        u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
    }

    /// Write the SPI header field in network byte order
    pub fn set_spi(&mut self, spi: u32) {
        self.buf[0..4].copy_from_slice(&spi.to_be_bytes());
    }

    /// Sequence number carried by the header, parsed from network byte order
    pub fn seq(&self) -> u32 {
        u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
    }

    /// Write the sequence number header field in network byte order
    pub fn set_seq(&mut self, seq: u32) {
        self.buf[4..8].copy_from_slice(&seq.to_be_bytes());
    }

    /// Initialization vector region
    pub fn iv(&self) -> &[u8] {
        &self.buf[ESP_HEADER_LEN..PAYLOAD_OFFSET]
    }

    /// Mutable initialization vector region
    pub(crate) fn iv_mut(&mut self) -> &mut [u8] {
        &mut self.buf[ESP_HEADER_LEN..PAYLOAD_OFFSET]
    }

    /// Payload bytes currently in use
    pub fn payload(&self) -> &[u8] {
        &self.buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + self.len]
    }

    /// Wire image of an encrypted datagram: header, IV, ciphertext and
    /// ICV
    ///
    /// Meaningful after
    /// [`encrypt_packet`](super::crypto::encrypt_packet), which leaves
    /// the payload length at the padded ciphertext size.
    ///
    /// # Panics
    ///
    /// Panics when the buffer has no room for an ICV behind the
    /// payload, which cannot happen for buffers that went through
    /// encryption.
    pub fn datagram(&self) -> &[u8] {
        &self.buf[..PAYLOAD_OFFSET + self.len + ESP_ICV_LEN]
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload region is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Payload bytes the buffer can hold
    pub fn payload_capacity(&self) -> usize {
        self.buf.len() - PAYLOAD_OFFSET
    }

    /// Set the payload length
    ///
    /// The caller guarantees `len` fits the payload capacity.
    pub(crate) fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.payload_capacity());
        self.len = len;
    }

    /// Entire payload region regardless of the current length, for
    /// decoders that write into the buffer
    pub(crate) fn payload_all_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PAYLOAD_OFFSET..]
    }

    /// Raw backing bytes
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable raw backing bytes
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Total capacity of the backing buffer
    pub(crate) fn capacity_total(&self) -> usize {
        self.buf.len()
    }
}
