//! Async driver for an ESP session
//!
//! [`EspSession`] is a non-blocking state machine; something has to
//! wake it when the socket turns readable, when writability returns
//! after backpressure, or when its next deadline falls due.
//! [`EspClient`] is that driver: it runs iterations until the session
//! goes quiescent, then awaits exactly the readiness the session asked
//! for.
//!
//! # Example
//!
//! ```rust,ignore
//! use esptun_proto::esp::{EspClient, EspSession, NoopHooks, TransportState};
//!
//! # async fn demo(session: EspSession) -> esptun_proto::esp::Result<()> {
//! let mut client = EspClient::new(session, NoopHooks);
//! client.setup()?;
//!
//! client.send_packet(b"\x45\x00\x00\x14plaintext ip packet")?;
//! loop {
//!     client.poll_once().await;
//!     if let Some(packet) = client.recv_packet() {
//!         println!("tunnel delivered {} bytes", packet.len());
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::time;

use super::hooks::TransportHooks;
use super::packet::PacketBuf;
use super::session::{EspSession, TransportState};
use super::Result;

/// Upper bound on how long one poll waits when the session reports no
/// nearer deadline
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Owns an [`EspSession`] together with its outer-protocol hooks and
/// drives them from an async task
pub struct EspClient<H: TransportHooks> {
    /// The session state machine
    session: EspSession,

    /// Outer-protocol integration
    hooks: H,
}

impl<H: TransportHooks> EspClient<H> {
    /// Pair a session with its hooks
    pub fn new(session: EspSession, hooks: H) -> Self {
        EspClient { session, hooks }
    }

    /// Start the transport; see [`EspSession::setup`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`](super::Error::InvalidState) when
    /// the transport is Disabled or has no negotiated secret.
    pub fn setup(&mut self) -> Result<()> {
        self.session.setup(&mut self.hooks)
    }

    /// Run the session until quiescent, then await the next wake-up
    ///
    /// # Returns
    ///
    /// `true` when any iteration reported work; the caller should poll
    /// again promptly in that case.
    pub async fn poll_once(&mut self) -> bool {
        // A fresh or re-opened socket has no observed readiness yet;
        // the iteration's try_send would report would-block for it
        self.session.wait_send_ready().await;
        let mut timeout = DEFAULT_POLL_INTERVAL;
        let mut work = false;
        while self.session.run_iteration(&mut self.hooks, &mut timeout) {
            work = true;
        }
        if !work {
            self.wait_ready(timeout).await;
        }
        work
    }

    /// Drive the session until the transport becomes inoperable
    pub async fn run(&mut self) {
        loop {
            match self.session.state() {
                TransportState::Disabled | TransportState::NoSecret => break,
                _ => {}
            }
            self.poll_once().await;
        }
    }

    /// Queue one plaintext IP packet for the tunnel
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`](super::Error::AllocationFailed)
    /// when no buffer can be allocated for the payload.
    pub fn send_packet(&mut self, payload: &[u8]) -> Result<()> {
        let pkt = PacketBuf::from_payload(payload)?;
        self.session.queue_outbound(pkt);
        Ok(())
    }

    /// Take the next decrypted packet the tunnel received
    pub fn recv_packet(&mut self) -> Option<Vec<u8>> {
        self.session.pop_inbound().map(|pkt| pkt.payload().to_vec())
    }

    /// Tear the session down and wipe key material
    pub fn shutdown(&mut self) {
        self.session.shutdown(&mut self.hooks);
    }

    /// The wrapped session
    pub fn session(&self) -> &EspSession {
        &self.session
    }

    /// Mutable access to the wrapped session
    pub fn session_mut(&mut self) -> &mut EspSession {
        &mut self.session
    }

    /// Mutable access to the outer-protocol hooks
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// Await socket readiness the session cares about, or its next
    /// deadline
    async fn wait_ready(&self, timeout: Duration) {
        match self.session.socket() {
            Some(socket) if self.session.wants_write() => {
                tokio::select! {
                    _ = socket.readable() => {}
                    _ = socket.writable() => {}
                    _ = time::sleep(timeout) => {}
                }
            }
            Some(socket) => {
                tokio::select! {
                    _ = socket.readable() => {}
                    _ = time::sleep(timeout) => {}
                }
            }
            None => time::sleep(timeout).await,
        }
    }
}
