//! Metrics for the ESP transport
//!
//! Provides counters for monitoring tunnel throughput and drop causes.
//! All metrics use atomic operations, and clones share the same
//! underlying counters, so a copy can be handed to a monitoring task
//! while the session keeps recording.
//!
//! # Example
//!
//! ```
//! use esptun_proto::esp::metrics::EspMetrics;
//!
//! let metrics = EspMetrics::new();
//!
//! metrics.record_sent(1500);
//! metrics.record_received(1436);
//!
//! let snapshot = metrics.snapshot();
//! println!("Sent: {} packets", snapshot.packets_sent);
//! println!("Average size: {:.0} bytes", snapshot.avg_sent_packet_size());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// ESP transport metrics
///
/// Thread-safe counters covering both pipelines and every drop cause
/// the receive path distinguishes.
#[derive(Debug, Clone, Default)]
pub struct EspMetrics {
    /// Datagrams read off the socket, before any validation
    pub datagrams_received: Arc<AtomicU64>,

    /// Packets decrypted, validated and handed to the tunnel
    pub packets_received: Arc<AtomicU64>,

    /// Payload bytes handed to the tunnel
    pub bytes_received: Arc<AtomicU64>,

    /// Packets encrypted and sent
    pub packets_sent: Arc<AtomicU64>,

    /// Wire bytes sent
    pub bytes_sent: Arc<AtomicU64>,

    /// Datagrams below the minimum ESP length
    pub drops_short: Arc<AtomicU64>,

    /// Datagrams matching no inbound SPI
    pub drops_invalid_spi: Arc<AtomicU64>,

    /// Integrity or cipher failures
    pub drops_decrypt: Arc<AtomicU64>,

    /// Sequence numbers rejected by the admission window
    pub drops_replay: Arc<AtomicU64>,

    /// Next-Header or padding violations
    pub drops_format: Arc<AtomicU64>,

    /// Compressed payloads that failed to decode
    pub drops_decompression: Arc<AtomicU64>,

    /// Packets lost to send errors or backpressure
    pub drops_send: Arc<AtomicU64>,

    /// Probe rounds sent
    pub probes_sent: Arc<AtomicU64>,

    /// Probe replies intercepted
    pub probes_caught: Arc<AtomicU64>,

    /// Dead-peer declarations
    pub dead_peer_events: Arc<AtomicU64>,
}

impl EspMetrics {
    /// Create a new metrics instance with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw datagram read
    pub fn record_datagram(&self) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet delivered to the tunnel
    ///
    /// # Arguments
    ///
    /// * `bytes` - Plaintext payload length
    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a packet sent on the wire
    ///
    /// # Arguments
    ///
    /// * `bytes` - Encrypted datagram length
    pub fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a datagram dropped for being too short
    pub fn record_drop_short(&self) {
        self.drops_short.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram dropped for an unknown SPI
    pub fn record_drop_invalid_spi(&self) {
        self.drops_invalid_spi.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a decrypt or integrity failure
    pub fn record_drop_decrypt(&self) {
        self.drops_decrypt.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a replay rejection
    pub fn record_drop_replay(&self) {
        self.drops_replay.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a trailer format violation
    pub fn record_drop_format(&self) {
        self.drops_format.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed decompression
    pub fn record_drop_decompression(&self) {
        self.drops_decompression.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound packet lost to a send error
    pub fn record_drop_send(&self) {
        self.drops_send.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a probe round sent
    pub fn record_probes_sent(&self) {
        self.probes_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an intercepted probe reply
    pub fn record_probe_caught(&self) {
        self.probes_caught.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dead-peer declaration
    pub fn record_dead_peer(&self) {
        self.dead_peer_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    ///
    /// Returns a point-in-time view of all counters. Values may be
    /// slightly inconsistent across counters due to concurrent updates.
    pub fn snapshot(&self) -> EspMetricsSnapshot {
        EspMetricsSnapshot {
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            drops_short: self.drops_short.load(Ordering::Relaxed),
            drops_invalid_spi: self.drops_invalid_spi.load(Ordering::Relaxed),
            drops_decrypt: self.drops_decrypt.load(Ordering::Relaxed),
            drops_replay: self.drops_replay.load(Ordering::Relaxed),
            drops_format: self.drops_format.load(Ordering::Relaxed),
            drops_decompression: self.drops_decompression.load(Ordering::Relaxed),
            drops_send: self.drops_send.load(Ordering::Relaxed),
            probes_sent: self.probes_sent.load(Ordering::Relaxed),
            probes_caught: self.probes_caught.load(Ordering::Relaxed),
            dead_peer_events: self.dead_peer_events.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.datagrams_received.store(0, Ordering::Relaxed);
        self.packets_received.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.packets_sent.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.drops_short.store(0, Ordering::Relaxed);
        self.drops_invalid_spi.store(0, Ordering::Relaxed);
        self.drops_decrypt.store(0, Ordering::Relaxed);
        self.drops_replay.store(0, Ordering::Relaxed);
        self.drops_format.store(0, Ordering::Relaxed);
        self.drops_decompression.store(0, Ordering::Relaxed);
        self.drops_send.store(0, Ordering::Relaxed);
        self.probes_sent.store(0, Ordering::Relaxed);
        self.probes_caught.store(0, Ordering::Relaxed);
        self.dead_peer_events.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of all ESP transport metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EspMetricsSnapshot {
    /// Datagrams read off the socket
    pub datagrams_received: u64,

    /// Packets delivered to the tunnel
    pub packets_received: u64,

    /// Payload bytes delivered to the tunnel
    pub bytes_received: u64,

    /// Packets sent on the wire
    pub packets_sent: u64,

    /// Wire bytes sent
    pub bytes_sent: u64,

    /// Datagrams below the minimum ESP length
    pub drops_short: u64,

    /// Datagrams matching no inbound SPI
    pub drops_invalid_spi: u64,

    /// Integrity or cipher failures
    pub drops_decrypt: u64,

    /// Replay rejections
    pub drops_replay: u64,

    /// Next-Header or padding violations
    pub drops_format: u64,

    /// Failed decompressions
    pub drops_decompression: u64,

    /// Packets lost to send errors or backpressure
    pub drops_send: u64,

    /// Probe rounds sent
    pub probes_sent: u64,

    /// Probe replies intercepted
    pub probes_caught: u64,

    /// Dead-peer declarations
    pub dead_peer_events: u64,
}

impl EspMetricsSnapshot {
    /// Total inbound drops across all causes
    pub fn drops_total(&self) -> u64 {
        self.drops_short
            + self.drops_invalid_spi
            + self.drops_decrypt
            + self.drops_replay
            + self.drops_format
            + self.drops_decompression
    }

    /// Average delivered payload size in bytes
    pub fn avg_received_packet_size(&self) -> f64 {
        if self.packets_received == 0 {
            return 0.0;
        }
        self.bytes_received as f64 / self.packets_received as f64
    }

    /// Average sent datagram size in bytes
    pub fn avg_sent_packet_size(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 / self.packets_sent as f64
    }

    /// Fraction of received datagrams that were delivered (0.0 to 1.0)
    pub fn delivery_rate(&self) -> f64 {
        if self.datagrams_received == 0 {
            return 1.0;
        }
        self.packets_received as f64 / self.datagrams_received as f64
    }
}
