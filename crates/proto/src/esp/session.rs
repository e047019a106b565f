//! ESP session core
//!
//! Owns the UDP data path of the tunnel: key generations across
//! rekeys, the receive pipeline (SPI demultiplex, decrypt, trailer
//! validation, optional decompression, enqueue to the tunnel), the
//! transmit pipeline (dequeue, encrypt, send), and the probe/keepalive
//! state machine deciding when to re-probe or declare the peer dead.
//!
//! # The session loop
//!
//! [`EspSession::run_iteration`] never blocks. Each invocation runs
//! four phases in order:
//!
//! 1. Probe when Sleeping and the attempt period has elapsed
//! 2. Drain every datagram the socket has ready
//! 3. Evaluate the keepalive state machine (Connected only)
//! 4. Drain the outbound queue until empty or the socket pushes back
//!
//! It reports whether any work was done and lowers the caller's
//! timeout hint to the nearest pending deadline, so an outer poller
//! knows when to call again. [`EspClient`](super::client::EspClient)
//! wraps this in an async driver.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;

use super::config::EspConfig;
use super::context::EspContext;
use super::crypto::{self, NEXT_HEADER_COMPRESSED, NEXT_HEADER_IPIP, NEXT_HEADER_IPV6};
use super::dpd::{KeepaliveAction, KeepaliveTimes};
use super::hooks::{Decompress, TransportHooks};
use super::logging;
use super::metrics::EspMetrics;
use super::packet::{PacketBuf, ESP_ICV_LEN, PAYLOAD_OFFSET};
use super::{Error, Result};

/// Grace window added to the inbound sequence position when a rekey
/// supersedes a context; packets under the old SPI are admitted only
/// while `peer_seq + current_next_expected` stays below it
pub const OLD_SPI_GRACE: u64 = 32;

/// Smallest datagram that can carry header, IV and authentication
/// trailer; anything at or below this is dropped unread
pub const MIN_ESP_DATAGRAM: usize = PAYLOAD_OFFSET + ESP_ICV_LEN;

/// Floor for the receive buffer payload region
const MIN_RECEIVE_BUFFER: usize = 2048;

/// Slack added over the negotiated MTU when sizing receive buffers
const MTU_HEADROOM: usize = 256;

/// UDP transport state, shared with the outer protocol
///
/// `Disabled` and `NoSecret` make the transport inoperable. `Sleeping`
/// means the session will probe for a path; `Connecting` means probes
/// are out and a reply is awaited; `Connected` means the data path is
/// established. The outer protocol moves `Connecting` to `Connected`
/// once its probe exchange completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportState {
    /// Transport turned off; nothing will revive it
    Disabled,
    /// No negotiated key material
    NoSecret,
    /// Inactive, probing for a path
    Sleeping,
    /// Probe sent, awaiting confirmation
    Connecting,
    /// Data path established
    Connected,
}

/// ESP-over-UDP session
///
/// Construct with negotiated contexts, call
/// [`setup`](EspSession::setup) once, then drive
/// [`run_iteration`](EspSession::run_iteration) from a poll loop.
/// Outbound IP packets enter through
/// [`queue_outbound`](EspSession::queue_outbound); decrypted inbound
/// packets come back from [`pop_inbound`](EspSession::pop_inbound).
pub struct EspSession {
    /// Negotiated transport configuration
    config: EspConfig,

    /// Connected UDP socket; `None` after `close` until re-opened
    socket: Option<UdpSocket>,

    /// Current transport state
    state: TransportState,

    /// Two inbound key generations; `current_in` indexes the active one
    inbound: [EspContext; 2],

    /// Index of the active inbound context, toggled on rekey
    current_in: usize,

    /// Outbound context
    outbound: EspContext,

    /// Admission ceiling for the superseded inbound context
    old_seq_ceiling: u64,

    /// Reusable receive buffer, detached when a packet is handed on
    recv_slot: Option<PacketBuf>,

    /// Decrypted packets awaiting the tunnel
    inbound_queue: VecDeque<PacketBuf>,

    /// Plaintext packets awaiting encryption and send
    outbound_queue: VecDeque<PacketBuf>,

    /// Activity clocks for the keepalive state machine
    times: KeepaliveTimes,

    /// When the last probe round went out
    probe_started_at: Instant,

    /// Forces a probe on the next iteration while Sleeping
    needs_reconnect: bool,

    /// Whether the caller should watch the socket for writability
    write_interest: bool,

    /// Transport counters
    metrics: EspMetrics,

    /// Decoder for payloads with the compressed Next-Header marker
    decompressor: Option<Box<dyn Decompress + Send>>,
}

impl EspSession {
    /// Create a session over a connected socket with freshly negotiated
    /// contexts
    ///
    /// The session starts Sleeping; call [`setup`](EspSession::setup)
    /// to emit the key diagnostics and send the first probe round.
    pub fn new(
        config: EspConfig,
        socket: UdpSocket,
        inbound: EspContext,
        outbound: EspContext,
    ) -> Self {
        let now = Instant::now();
        EspSession {
            config,
            socket: Some(socket),
            state: TransportState::Sleeping,
            inbound: [inbound, EspContext::default()],
            current_in: 0,
            outbound,
            old_seq_ceiling: 0,
            recv_slot: None,
            inbound_queue: VecDeque::new(),
            outbound_queue: VecDeque::new(),
            times: KeepaliveTimes::new(now),
            probe_started_at: now,
            needs_reconnect: false,
            write_interest: false,
            metrics: EspMetrics::new(),
            decompressor: None,
        }
    }

    /// Start the transport: dump key diagnostics and probe the peer
    ///
    /// Does not change the transport state; the probe reply drives
    /// that.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when the transport is Disabled
    /// or has no negotiated secret.
    pub fn setup(&mut self, hooks: &mut dyn TransportHooks) -> Result<()> {
        if self.state == TransportState::Disabled || self.state == TransportState::NoSecret {
            return Err(Error::InvalidState(format!(
                "ESP transport cannot start from the {:?} state",
                self.state
            )));
        }
        self.inbound[self.current_in].log_params("incoming");
        self.outbound.log_params("outgoing");
        logging::log_send_probes();
        self.send_probes(hooks, Instant::now());
        Ok(())
    }

    /// Run one non-blocking iteration of the session loop
    ///
    /// Lowers `timeout` to the nearest pending deadline so the caller
    /// knows how long it may sleep. Callers that may transmit should
    /// await [`wait_send_ready`](EspSession::wait_send_ready) first;
    /// [`EspClient`](super::client::EspClient) does this on every poll.
    ///
    /// # Returns
    ///
    /// `true` when any datagram was read, packet sent, or maintenance
    /// action taken.
    pub fn run_iteration(&mut self, hooks: &mut dyn TransportHooks, timeout: &mut Duration) -> bool {
        let mut work_done = false;

        if self.state == TransportState::Sleeping {
            self.drive_probes(hooks, Instant::now(), timeout);
        }

        work_done |= self.drain_receive(hooks);

        if self.state != TransportState::Connected {
            return false;
        }

        match self.times.next_action(&self.config, Instant::now(), timeout) {
            KeepaliveAction::Rekey => {
                logging::log_rekey_unimplemented();
            }
            KeepaliveAction::DpdDead => {
                logging::log_dead_peer();
                self.metrics.record_dead_peer();
                self.close();
                hooks.close(self);
                self.send_probes(hooks, Instant::now());
                return true;
            }
            KeepaliveAction::Dpd => {
                logging::log_send_probes_dpd();
                self.send_probes(hooks, Instant::now());
                work_done = true;
            }
            KeepaliveAction::Keepalive => {
                logging::log_keepalive_unimplemented();
            }
            KeepaliveAction::None => {}
        }

        self.write_interest = false;
        loop {
            if self.socket.is_none() {
                break;
            }
            let mut pkt = match self.outbound_queue.pop_front() {
                Some(pkt) => pkt,
                None => break,
            };
            let total = match crypto::encrypt_packet(&mut self.outbound, &mut pkt) {
                Ok(total) => total,
                Err(_) => {
                    self.metrics.record_drop_send();
                    work_done = true;
                    continue;
                }
            };
            let sent = match &self.socket {
                Some(socket) => socket.try_send(pkt.datagram()),
                None => break,
            };
            match sent {
                Ok(_) => {
                    self.times.last_tx = Instant::now();
                    logging::log_packet_sent(total);
                    self.metrics.record_sent(total);
                    work_done = true;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // The dequeued packet is dropped, not requeued;
                    // the rest of the queue waits for writability
                    self.write_interest = true;
                    self.metrics.record_drop_send();
                    return work_done;
                }
                Err(err) => {
                    logging::log_send_failed(&err.to_string());
                    self.metrics.record_drop_send();
                    work_done = true;
                }
            }
        }

        work_done
    }

    /// Install a fresh generation of contexts after a rekey
    ///
    /// The current inbound context becomes the previous one and keeps
    /// accepting late packets while the admission ceiling allows; the
    /// generation it displaces is wiped.
    pub fn rotate_keys(&mut self, inbound: EspContext, outbound: EspContext) {
        self.old_seq_ceiling =
            self.inbound[self.current_in].replay.next_expected() + OLD_SPI_GRACE;
        self.current_in ^= 1;
        self.inbound[self.current_in] = inbound;
        self.outbound = outbound;
        self.inbound[self.current_in].log_params("incoming");
        self.outbound.log_params("outgoing");
        self.times.last_rekey = Instant::now();
    }

    /// Close the UDP path, keeping key material
    ///
    /// Used for roaming: the socket can be re-opened with
    /// [`set_socket`](EspSession::set_socket) without renegotiation.
    /// Moves an operable state back to Sleeping.
    pub fn close(&mut self) {
        self.socket = None;
        self.write_interest = false;
        if self.state > TransportState::Disabled {
            self.state = TransportState::Sleeping;
        }
    }

    /// Tear the session down: wipe all three contexts and notify the
    /// outer protocol
    pub fn shutdown(&mut self, hooks: &mut dyn TransportHooks) {
        self.inbound[0].destroy();
        self.inbound[1].destroy();
        self.outbound.destroy();
        self.close();
        hooks.close(self);
        if self.state != TransportState::Disabled {
            self.state = TransportState::NoSecret;
        }
    }

    /// Current transport state
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Move the transport state; the outer protocol calls this when
    /// its probe exchange settles
    pub fn set_state(&mut self, state: TransportState) {
        self.state = state;
    }

    /// Force a probe round on the next iteration while Sleeping
    pub fn request_reconnect(&mut self) {
        self.needs_reconnect = true;
    }

    /// Whether the caller should watch the socket for writability
    /// before the next iteration
    pub fn wants_write(&self) -> bool {
        self.write_interest
    }

    /// The UDP socket, when the path is open
    pub fn socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    /// Re-open the UDP path after roaming
    pub fn set_socket(&mut self, socket: UdpSocket) {
        self.socket = Some(socket);
    }

    /// Handle to the transport counters; clones share storage
    pub fn metrics(&self) -> EspMetrics {
        self.metrics.clone()
    }

    /// Queue one plaintext IP packet for encryption and send
    pub fn queue_outbound(&mut self, pkt: PacketBuf) {
        self.outbound_queue.push_back(pkt);
    }

    /// Take the next decrypted packet destined for the tunnel
    pub fn pop_inbound(&mut self) -> Option<PacketBuf> {
        self.inbound_queue.pop_front()
    }

    /// Packets waiting for the tunnel
    pub fn pending_inbound(&self) -> usize {
        self.inbound_queue.len()
    }

    /// Packets waiting to be sent
    pub fn pending_outbound(&self) -> usize {
        self.outbound_queue.len()
    }

    /// Install the decoder for compressed payloads
    ///
    /// Without one, packets carrying the compressed Next-Header marker
    /// are dropped as failed decodes.
    pub fn set_decompressor(&mut self, decompressor: Box<dyn Decompress + Send>) {
        self.decompressor = Some(decompressor);
    }

    /// Send a probe round while Sleeping, on the attempt-period clock
    /// or on an explicit reconnect request
    fn drive_probes(&mut self, hooks: &mut dyn TransportHooks, now: Instant, timeout: &mut Duration) {
        let due = self.probe_started_at + self.config.attempt_period;
        if now >= due || self.needs_reconnect {
            logging::log_send_probes();
            self.send_probes(hooks, now);
            self.needs_reconnect = false;
            if *timeout > self.config.attempt_period {
                *timeout = self.config.attempt_period;
            }
        } else {
            let remaining = due - now;
            if *timeout > remaining {
                *timeout = remaining;
            }
        }
    }

    fn send_probes(&mut self, hooks: &mut dyn TransportHooks, now: Instant) {
        if let Err(err) = hooks.send_probes(self) {
            logging::log_probe_send_failed(&err.to_string());
        }
        self.probe_started_at = now;
        self.metrics.record_probes_sent();
    }

    /// Encrypt `payload` under the outbound context and transmit it at
    /// once, bypassing the outbound queue
    ///
    /// Probe-send hooks use this: the transmit drain only runs while
    /// Connected, but probes go out while the session is Sleeping.
    ///
    /// # Returns
    ///
    /// Total datagram length sent on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] when no UDP path is open, the
    /// crypto failure modes of
    /// [`encrypt_packet_with_next_header`](crypto::encrypt_packet_with_next_header),
    /// or [`Error::Io`] when the socket refuses the datagram.
    pub fn send_probe_packet(&mut self, payload: &[u8], next_hdr: u8) -> Result<usize> {
        if self.socket.is_none() {
            return Err(Error::InvalidState(
                "ESP probe with no open UDP path".into(),
            ));
        }
        let mut pkt = PacketBuf::from_payload(payload)?;
        let total = crypto::encrypt_packet_with_next_header(&mut self.outbound, &mut pkt, next_hdr)?;
        if let Some(socket) = &self.socket {
            socket.try_send(pkt.datagram())?;
        }
        self.times.last_tx = Instant::now();
        logging::log_packet_sent(total);
        self.metrics.record_sent(total);
        Ok(total)
    }

    /// Wait for one writability event on the socket
    ///
    /// `try_send` answers from the readiness the reactor has already
    /// observed, which is empty on a freshly opened or re-opened
    /// socket. Drivers await this before an iteration that may
    /// transmit, so a would-block result inside the drain means
    /// genuine backpressure rather than an unobserved socket. Returns
    /// immediately when no socket is open.
    pub async fn wait_send_ready(&self) {
        if let Some(socket) = &self.socket {
            let _ = socket.writable().await;
        }
    }

    /// Read every datagram the socket has ready
    fn drain_receive(&mut self, hooks: &mut dyn TransportHooks) -> bool {
        let mut work_done = false;
        loop {
            if self.socket.is_none() {
                break;
            }
            if self.recv_slot.is_none() {
                match PacketBuf::try_with_capacity(self.receive_capacity()) {
                    Ok(pkt) => self.recv_slot = Some(pkt),
                    Err(_) => {
                        logging::log_allocation_failed();
                        break;
                    }
                }
            }
            let len = match (&self.socket, self.recv_slot.as_mut()) {
                (Some(socket), Some(pkt)) => match socket.try_recv(pkt.bytes_mut()) {
                    Ok(len) => len,
                    Err(_) => break,
                },
                _ => break,
            };
            if len == 0 {
                break;
            }
            logging::log_packet_received(len);
            self.metrics.record_datagram();
            work_done = true;
            if len <= MIN_ESP_DATAGRAM {
                self.metrics.record_drop_short();
                continue;
            }
            let mut pkt = match self.recv_slot.take() {
                Some(pkt) => pkt,
                None => break,
            };
            pkt.set_len(len - MIN_ESP_DATAGRAM);
            if let Some(pkt) = self.process_datagram(hooks, pkt) {
                self.recv_slot = Some(pkt);
            }
        }
        work_done
    }

    /// Decrypt, validate and dispatch one datagram
    ///
    /// Returns the buffer when it should go back into the receive
    /// slot; `None` when it was handed to the tunnel queue.
    fn process_datagram(
        &mut self,
        hooks: &mut dyn TransportHooks,
        mut pkt: PacketBuf,
    ) -> Option<PacketBuf> {
        let spi = pkt.spi();
        let seq = pkt.seq();
        let idx = self.current_in;

        let decrypted = if spi == self.inbound[idx].spi() {
            crypto::decrypt_packet(&mut self.inbound[idx], &mut pkt, self.config.replay_protection)
        } else if spi == self.inbound[idx ^ 1].spi()
            && u64::from(seq) + self.inbound[idx].replay.next_expected() < self.old_seq_ceiling
        {
            logging::log_old_spi_packet(spi, seq);
            crypto::decrypt_packet(
                &mut self.inbound[idx ^ 1],
                &mut pkt,
                self.config.replay_protection,
            )
        } else {
            Err(Error::UnknownSpi(spi))
        };

        if let Err(err) = decrypted {
            match err {
                Error::UnknownSpi(spi) => {
                    logging::log_invalid_spi(spi);
                    self.metrics.record_drop_invalid_spi();
                }
                Error::ReplayDetected(_) => self.metrics.record_drop_replay(),
                _ => self.metrics.record_drop_decrypt(),
            }
            return Some(pkt);
        }

        let (stripped_len, next_hdr) = match validate_trailer(pkt.payload()) {
            Ok(parts) => parts,
            Err(err) => {
                match err {
                    Error::UnsupportedPayloadType(t) => logging::log_unrecognised_payload(t),
                    Error::InvalidPadLength(p) => logging::log_invalid_pad_length(p),
                    Error::InvalidPadding => logging::log_invalid_padding(),
                    _ => {}
                }
                self.metrics.record_drop_format();
                return Some(pkt);
            }
        };
        pkt.set_len(stripped_len);
        self.times.last_rx = Instant::now();

        if hooks.catch_probe(self, &pkt) {
            self.metrics.record_probe_caught();
            if self.state == TransportState::Sleeping {
                logging::log_session_established();
                self.state = TransportState::Connecting;
            }
            return Some(pkt);
        }

        if next_hdr == NEXT_HEADER_COMPRESSED {
            let mut out = match PacketBuf::try_with_capacity(self.config.mtu) {
                Ok(out) => out,
                Err(_) => {
                    logging::log_allocation_failed();
                    return Some(pkt);
                }
            };
            let decoded = match self.decompressor.as_mut() {
                Some(decomp) => decomp.decode(out.payload_all_mut(), pkt.payload()),
                None => Err(Error::DecompressionFailed(
                    "no decompressor configured".into(),
                )),
            };
            match decoded {
                Ok((produced, consumed))
                    if consumed == pkt.len() && produced <= out.payload_capacity() =>
                {
                    out.set_len(produced);
                    logging::log_decompressed(pkt.len(), produced);
                    self.metrics.record_received(produced);
                    self.inbound_queue.push_back(out);
                }
                Ok(_) => {
                    logging::log_decompression_failed("residual compressed input");
                    self.metrics.record_drop_decompression();
                }
                Err(err) => {
                    logging::log_decompression_failed(&err.to_string());
                    self.metrics.record_drop_decompression();
                }
            }
            Some(pkt)
        } else {
            self.metrics.record_received(pkt.len());
            self.inbound_queue.push_back(pkt);
            None
        }
    }

    fn receive_capacity(&self) -> usize {
        let receive_mtu = MIN_RECEIVE_BUFFER.max(self.config.mtu + MTU_HEADROOM);
        receive_mtu + self.config.trailer_margin
    }
}

/// Enforce the decrypted trailer format
///
/// The last byte is Next-Header and must be one of the three accepted
/// markers; the byte before it is the padding length `N`, which must
/// leave at least one payload byte; the `N` pad bytes before that must
/// be exactly `1, 2, .., N`.
///
/// # Returns
///
/// `(stripped_len, next_header)` where `stripped_len` is the payload
/// length with padding and trailer removed.
pub(crate) fn validate_trailer(payload: &[u8]) -> Result<(usize, u8)> {
    let len = payload.len();
    if len < 2 {
        return Err(Error::PacketTooShort(len));
    }
    let next_hdr = payload[len - 1];
    if next_hdr != NEXT_HEADER_IPIP
        && next_hdr != NEXT_HEADER_COMPRESSED
        && next_hdr != NEXT_HEADER_IPV6
    {
        return Err(Error::UnsupportedPayloadType(next_hdr));
    }
    let pad_len = payload[len - 2] as usize;
    if len <= 2 + pad_len {
        return Err(Error::InvalidPadLength(payload[len - 2]));
    }
    let pad_start = len - 2 - pad_len;
    for (i, &b) in payload[pad_start..len - 2].iter().enumerate() {
        if b != (i + 1) as u8 {
            return Err(Error::InvalidPadding);
        }
    }
    Ok((pad_start, next_hdr))
}
