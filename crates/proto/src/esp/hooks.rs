//! Outer-protocol integration points
//!
//! The ESP data plane stays decoupled from whichever VPN control
//! protocol negotiated it. Probe traffic, teardown notification and
//! payload decompression differ per protocol, so the session loop
//! reaches them through these traits. Every method has a no-op
//! default; a protocol implements only what it supports.
//!
//! Each hook receives the session it is acting for, so a probe
//! implementation can reach the tunnel socket and outbound context
//! through [`EspSession::send_probe_packet`].

use super::packet::PacketBuf;
use super::session::EspSession;
use super::Result;

/// Actions the session loop delegates to the outer protocol
///
/// All methods default to doing nothing, mirroring the optional nature
/// of each action. A minimal integration can rely on [`NoopHooks`].
pub trait TransportHooks {
    /// Send protocol-specific probe datagrams to elicit a reply
    ///
    /// Called when the session wants to establish or re-establish the
    /// UDP path. [`EspSession::send_probe_packet`] transmits a probe
    /// under the outbound context. Errors are logged by the session
    /// and otherwise ignored.
    fn send_probes(&mut self, session: &mut EspSession) -> Result<()> {
        let _ = session;
        Ok(())
    }

    /// Inspect a decrypted packet and report whether it was a probe
    /// reply
    ///
    /// A `true` return consumes the packet; it is never forwarded to
    /// the tunnel.
    fn catch_probe(&mut self, session: &EspSession, packet: &PacketBuf) -> bool {
        let _ = (session, packet);
        false
    }

    /// The session is tearing down its UDP path
    fn close(&mut self, session: &mut EspSession) {
        let _ = session;
    }
}

/// Hook set that leaves every action at its default
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl TransportHooks for NoopHooks {}

/// Decompressor for payloads carried with the compressed Next-Header
/// marker
pub trait Decompress {
    /// Decode `input` into `output`
    ///
    /// # Returns
    ///
    /// `(produced, consumed)` byte counts. The session treats anything
    /// short of consuming the whole input as a failed decode.
    ///
    /// # Errors
    ///
    /// Any error drops the packet; the session keeps running.
    fn decode(&mut self, output: &mut [u8], input: &[u8]) -> Result<(usize, usize)>;
}
