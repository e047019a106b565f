//! Structured logging for ESP transport operations
//!
//! Provides structured, contextual logging using the `tracing` framework.
//! Every log site of the session loop lives here so that message texts and
//! levels stay consistent between the loop, the crypto path and the tests.
//!
//! # Log Levels
//!
//! - **TRACE**: per-packet events, sequence admission, key diagnostics
//! - **DEBUG**: probe transmission, dropped datagrams with unknown SPI
//! - **INFO**: session establishment
//! - **ERROR**: validation failures, dead peer, send failures
//!
//! # Example
//!
//! ```no_run
//! use esptun_proto::esp::logging;
//!
//! // Initialize tracing subscriber (in tests or applications)
//! tracing_subscriber::fmt()
//!     .with_env_filter("esptun_proto::esp=debug")
//!     .init();
//!
//! logging::log_packet_received(1404);
//! ```

use tracing::{debug, error, info, trace};

/// Log the negotiated parameters of one ESP context
///
/// Key material appears here and nowhere else, at trace level only.
///
/// # Arguments
///
/// * `direction` - "incoming" or "outgoing"
/// * `spi` - Security Parameter Index
/// * `enc_name` - encryption algorithm label
/// * `enc_key` - encryption key bytes
/// * `mac_name` - authentication algorithm label
/// * `mac_key` - authentication key bytes
pub fn log_esp_params(
    direction: &str,
    spi: u32,
    enc_name: &str,
    enc_key: &[u8],
    mac_name: &str,
    mac_key: &[u8],
) {
    let spi_hex = format!("0x{:08x}", spi);
    trace!(
        direction = direction,
        spi = %spi_hex,
        "Parameters for ESP"
    );
    trace!(
        enc_type = enc_name,
        key = %hex::encode(enc_key),
        "ESP encryption type"
    );
    trace!(
        mac_type = mac_name,
        key = %hex::encode(mac_key),
        "ESP authentication type"
    );
}

/// Log probe transmission from the sleeping or setup path
pub fn log_send_probes() {
    debug!("Send ESP probes");
}

/// Log probe transmission triggered by the DPD state machine
pub fn log_send_probes_dpd() {
    debug!("Send ESP probes for DPD");
}

/// Log a probe-send hook failure
///
/// # Arguments
///
/// * `error` - Error message from the hook
pub fn log_probe_send_failed(error: &str) {
    debug!(error = error, "ESP probe transmission failed");
}

/// Log receipt of one datagram
///
/// # Arguments
///
/// * `len` - Datagram length in bytes
pub fn log_packet_received(len: usize) {
    trace!(len = len, "Received ESP packet");
}

/// Log acceptance of a packet keyed under the superseded inbound context
///
/// # Arguments
///
/// * `spi` - SPI of the old context
/// * `seq` - Sequence number carried by the packet
pub fn log_old_spi_packet(spi: u32, seq: u32) {
    let spi_hex = format!("0x{:x}", spi);
    trace!(
        old_spi = %spi_hex,
        seq_num = seq,
        "Received ESP packet from old SPI"
    );
}

/// Log a datagram whose SPI matches neither inbound context
///
/// # Arguments
///
/// * `spi` - SPI carried by the datagram
pub fn log_invalid_spi(spi: u32) {
    let spi_hex = format!("0x{:08x}", spi);
    debug!(spi = %spi_hex, "Received ESP packet with invalid SPI");
}

/// Log an ICV verification failure
pub fn log_integrity_failed() {
    debug!("Received ESP packet with invalid HMAC");
}

/// Log a decryption failure
///
/// # Arguments
///
/// * `error` - Error message from the cipher
pub fn log_decrypt_failed(error: &str) {
    error!(error = error, "Failed to decrypt ESP packet");
}

/// Log sequence-number admission
///
/// # Arguments
///
/// * `seq` - Sequence number carried by the packet
/// * `expected` - Next expected sequence number
/// * `kind` - "expected", "out-of-order" or "later-than-expected"
pub fn log_seq_accepted(seq: u32, expected: u64, kind: &str) {
    trace!(
        seq_num = seq,
        expected = expected,
        kind = kind,
        "Accepting ESP packet"
    );
}

/// Log sequence-number rejection
///
/// # Arguments
///
/// * `seq` - Sequence number carried by the packet
/// * `expected` - Next expected sequence number
/// * `reason` - "ancient" or "replayed"
pub fn log_seq_discarded(seq: u32, expected: u64, reason: &str) {
    debug!(
        seq_num = seq,
        expected = expected,
        reason = reason,
        "Discarding ESP packet"
    );
}

/// Log a decrypted payload with an unrecognised Next-Header value
///
/// # Arguments
///
/// * `payload_type` - The rejected Next-Header byte
pub fn log_unrecognised_payload(payload_type: u8) {
    let nh_hex = format!("{:02x}", payload_type);
    error!(
        payload_type = %nh_hex,
        "Received ESP packet with unrecognised payload type"
    );
}

/// Log an inconsistent padding length byte
///
/// # Arguments
///
/// * `pad_len` - The rejected padding length byte
pub fn log_invalid_pad_length(pad_len: u8) {
    let pad_hex = format!("{:02x}", pad_len);
    error!(pad_len = %pad_hex, "Invalid padding length in ESP");
}

/// Log padding bytes that break the 1,2,...,N pattern
pub fn log_invalid_padding() {
    error!("Invalid padding bytes in ESP");
}

/// Log session establishment after a probe reply while sleeping
pub fn log_session_established() {
    info!("ESP session established with server");
}

/// Log a successful payload decompression
///
/// # Arguments
///
/// * `compressed_len` - Input length in bytes
/// * `decompressed_len` - Output length in bytes
pub fn log_decompressed(compressed_len: usize, decompressed_len: usize) {
    trace!(
        compressed_len = compressed_len,
        decompressed_len = decompressed_len,
        "Decompressed ESP packet"
    );
}

/// Log a failed payload decompression
///
/// # Arguments
///
/// * `error` - Error message from the adapter
pub fn log_decompression_failed(error: &str) {
    error!(error = error, "Decompression of ESP packet failed");
}

/// Log a refused packet buffer allocation
pub fn log_allocation_failed() {
    error!("Allocation failed");
}

/// Log the unimplemented rekey action
pub fn log_rekey_unimplemented() {
    error!("Rekey not implemented for ESP");
}

/// Log the unimplemented keepalive action
pub fn log_keepalive_unimplemented() {
    error!("Keepalive not implemented for ESP");
}

/// Log a dead-peer declaration by the DPD state machine
pub fn log_dead_peer() {
    error!("ESP detected dead peer");
}

/// Log a hard send failure
///
/// # Arguments
///
/// * `error` - Error message from the socket
pub fn log_send_failed(error: &str) {
    error!(error = error, "Failed to send ESP packet");
}

/// Log a successfully transmitted datagram
///
/// # Arguments
///
/// * `len` - Datagram length in bytes
pub fn log_packet_sent(len: usize) {
    trace!(len = len, "Sent ESP packet");
}
