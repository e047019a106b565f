//! ESP Session Integration Tests
//!
//! End-to-end tests for the ESP-over-UDP data path: a real
//! [`EspSession`] driven over loopback sockets against a hand-rolled
//! peer that encrypts and decrypts with mirror contexts.
//!
//! The peer side never uses `EspSession`; it builds raw datagrams with
//! the crypto layer so that malformed, replayed and stale-generation
//! traffic can be put on the wire exactly as a hostile or lagging
//! network would deliver it.

use esptun_proto::esp::{
    crypto, Decompress, EspAuth, EspCipher, EspClient, EspConfig, EspContext, EspSession,
    PacketBuf, Result, TransportHooks, TransportState,
};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

/// Helper to build a keyed AES-128-CBC / HMAC-SHA1 context
fn make_context(spi: u32, enc_seed: u8, mac_seed: u8) -> EspContext {
    let enc_key: Vec<u8> = (0..16).map(|i| i ^ enc_seed).collect();
    let mac_key: Vec<u8> = (0..20).map(|i| i ^ mac_seed).collect();
    EspContext::new(spi, EspCipher::Aes128Cbc, EspAuth::HmacSha1, &enc_key, &mac_key)
        .expect("Failed to build context")
}

/// Helper to create two UDP sockets connected to each other
async fn socket_pair() -> (UdpSocket, UdpSocket) {
    let a = UdpSocket::bind("127.0.0.1:0").await.expect("Failed to bind");
    let b = UdpSocket::bind("127.0.0.1:0").await.expect("Failed to bind");
    a.connect(b.local_addr().unwrap()).await.expect("Failed to connect");
    b.connect(a.local_addr().unwrap()).await.expect("Failed to connect");
    (a, b)
}

/// Helper to encrypt a payload into a ready-to-send wire datagram
fn encrypt_datagram(ctx: &mut EspContext, payload: &[u8]) -> Vec<u8> {
    let mut pkt = PacketBuf::from_payload(payload).expect("Failed to allocate");
    crypto::encrypt_packet(ctx, &mut pkt).expect("Failed to encrypt");
    pkt.datagram().to_vec()
}

/// Helper to decrypt a received wire datagram and strip the trailer
fn decrypt_datagram(ctx: &mut EspContext, wire: &[u8]) -> Vec<u8> {
    let mut pkt = PacketBuf::from_datagram(wire).expect("Malformed datagram");
    crypto::decrypt_packet(ctx, &mut pkt, true).expect("Failed to decrypt");
    let payload = pkt.payload();
    let pad_len = payload[payload.len() - 2] as usize;
    payload[..payload.len() - 2 - pad_len].to_vec()
}

/// Let queued loopback datagrams land, then run one session iteration
async fn drive(session: &mut EspSession, hooks: &mut RecordingHooks) -> bool {
    tokio::time::sleep(Duration::from_millis(20)).await;
    session.wait_send_ready().await;
    let mut timeout_hint = Duration::from_secs(60);
    session.run_iteration(hooks, &mut timeout_hint)
}

/// Hooks that record every callback and recognise one probe payload
#[derive(Default)]
struct RecordingHooks {
    probe_payload: Option<Vec<u8>>,
    probes_sent: usize,
    probes_caught: usize,
    closes: usize,
}

impl TransportHooks for RecordingHooks {
    fn send_probes(&mut self, _session: &mut EspSession) -> Result<()> {
        self.probes_sent += 1;
        Ok(())
    }

    fn catch_probe(&mut self, _session: &EspSession, packet: &PacketBuf) -> bool {
        if self.probe_payload.as_deref() == Some(packet.payload()) {
            self.probes_caught += 1;
            return true;
        }
        false
    }

    fn close(&mut self, _session: &mut EspSession) {
        self.closes += 1;
    }
}

/// Hooks that put a real ESP-encapsulated probe on the tunnel socket
struct WireProbeHooks;

impl TransportHooks for WireProbeHooks {
    fn send_probes(&mut self, session: &mut EspSession) -> Result<()> {
        session.send_probe_packet(b"\x45probe-ping", crypto::NEXT_HEADER_IPIP)?;
        Ok(())
    }
}

/// Decoder that writes every input byte twice
struct DoublingCodec;

impl Decompress for DoublingCodec {
    fn decode(&mut self, output: &mut [u8], input: &[u8]) -> Result<(usize, usize)> {
        for (i, &b) in input.iter().enumerate() {
            output[2 * i] = b;
            output[2 * i + 1] = b;
        }
        Ok((input.len() * 2, input.len()))
    }
}

/// Decoder that always leaves one input byte unconsumed
struct StallingCodec;

impl Decompress for StallingCodec {
    fn decode(&mut self, output: &mut [u8], input: &[u8]) -> Result<(usize, usize)> {
        let take = input.len() - 1;
        output[..take].copy_from_slice(&input[..take]);
        Ok((take, take))
    }
}

//
// Test Cases - Establishment
//

/// Test the probe exchange that brings the session up
///
/// Verifies that:
/// - A Sleeping session decrypts traffic and offers it to the hooks
/// - A caught probe moves the state to Connecting
/// - Caught probes never reach the inbound queue
#[tokio::test]
async fn test_probe_reply_moves_sleeping_to_connecting() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    let mut hooks = RecordingHooks {
        probe_payload: Some(b"\x45probe-magic".to_vec()),
        ..Default::default()
    };
    session.setup(&mut hooks).expect("Failed to set up session");
    assert_eq!(hooks.probes_sent, 1);
    assert_eq!(session.state(), TransportState::Sleeping);

    // The peer answers the probe under the session's inbound SPI
    let mut peer_tx = make_context(0x100, 1, 2);
    let wire = encrypt_datagram(&mut peer_tx, b"\x45probe-magic");
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.state(), TransportState::Connecting);
    assert_eq!(hooks.probes_caught, 1);
    assert_eq!(session.pending_inbound(), 0);
    assert_eq!(session.metrics().snapshot().probes_caught, 1);
}

/// Test that a probe-send hook can transmit on the tunnel socket
///
/// Verifies that:
/// - The hook reaches the socket and outbound context through the
///   session it receives
/// - The probe arrives at the peer as a decryptable ESP datagram under
///   the outbound SPI
#[tokio::test]
async fn test_probe_hook_sends_on_tunnel_socket() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.wait_send_ready().await;
    let mut hooks = WireProbeHooks;
    session.setup(&mut hooks).expect("Failed to set up session");

    let mut peer_rx = make_context(0x200, 3, 4);
    let mut buf = [0u8; 2048];
    let n = timeout(Duration::from_millis(500), remote.recv(&mut buf))
        .await
        .expect("Timed out waiting for probe")
        .expect("Failed to receive");
    let pkt = PacketBuf::from_datagram(&buf[..n]).unwrap();
    assert_eq!(pkt.spi(), 0x200);
    assert_eq!(decrypt_datagram(&mut peer_rx, &buf[..n]), b"\x45probe-ping");

    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.probes_sent, 1);
    assert_eq!(snapshot.packets_sent, 1);
}

//
// Test Cases - Data Path
//

/// Test bidirectional packet flow over loopback
///
/// Verifies that:
/// - Inbound datagrams are decrypted and delivered in arrival order
/// - Outbound packets are encrypted, sent and decryptable by the peer
/// - Outbound sequence numbers start at zero and stay consecutive
#[tokio::test]
async fn test_bidirectional_packet_flow() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    // Peer to session
    let mut peer_tx = make_context(0x100, 1, 2);
    for payload in [&b"\x45first"[..], b"\x45second", b"\x45third"] {
        let wire = encrypt_datagram(&mut peer_tx, payload);
        remote.send(&wire).await.expect("Failed to send");
    }

    assert!(drive(&mut session, &mut hooks).await);
    assert_eq!(session.pending_inbound(), 3);
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45first");
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45second");
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45third");

    // Session to peer
    for payload in [&b"\x45out-a"[..], b"\x45out-b", b"\x45out-c"] {
        session.queue_outbound(PacketBuf::from_payload(payload).unwrap());
    }
    assert!(drive(&mut session, &mut hooks).await);
    assert_eq!(session.pending_outbound(), 0);

    let mut peer_rx = make_context(0x200, 3, 4);
    let mut buf = [0u8; 2048];
    for (i, expected) in [&b"\x45out-a"[..], b"\x45out-b", b"\x45out-c"]
        .iter()
        .enumerate()
    {
        let n = timeout(Duration::from_millis(500), remote.recv(&mut buf))
            .await
            .expect("Timed out waiting for datagram")
            .expect("Failed to receive");
        let pkt = PacketBuf::from_datagram(&buf[..n]).unwrap();
        assert_eq!(pkt.spi(), 0x200);
        assert_eq!(pkt.seq(), i as u32);
        assert_eq!(decrypt_datagram(&mut peer_rx, &buf[..n]), *expected);
    }

    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.packets_received, 3);
    assert_eq!(snapshot.packets_sent, 3);
    assert_eq!(snapshot.drops_total(), 0);
}

/// Test that the first queued packet on a fresh socket is delivered
///
/// Verifies that:
/// - Waiting for send readiness before the first iteration lets the
///   transmit drain send instead of hitting a spurious would-block
/// - Nothing is counted as a send drop
#[tokio::test]
async fn test_first_outbound_packet_on_fresh_socket_is_delivered() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    session.queue_outbound(PacketBuf::from_payload(b"\x45first ever").unwrap());
    assert!(drive(&mut session, &mut hooks).await);
    assert_eq!(session.pending_outbound(), 0);

    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.packets_sent, 1);
    assert_eq!(snapshot.drops_send, 0);

    let mut peer_rx = make_context(0x200, 3, 4);
    let mut buf = [0u8; 2048];
    let n = timeout(Duration::from_millis(500), remote.recv(&mut buf))
        .await
        .expect("Timed out waiting for datagram")
        .expect("Failed to receive");
    assert_eq!(decrypt_datagram(&mut peer_rx, &buf[..n]), b"\x45first ever");
}

/// Test rejection of datagrams that cannot be ESP
///
/// Verifies that:
/// - Datagrams at or below the header + IV + ICV bound are dropped
///   before any cryptographic work
/// - Well-sized datagrams under an unknown SPI are dropped
/// - A valid datagram after the garbage still gets through
#[tokio::test]
async fn test_short_and_unknown_spi_datagrams_are_dropped() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    remote.send(&[0xab; 12]).await.expect("Failed to send");
    remote.send(&[0xcd; 36]).await.expect("Failed to send");
    // Long enough, but SPI 0xcececece matches nothing
    remote.send(&[0xce; 64]).await.expect("Failed to send");

    let mut peer_tx = make_context(0x100, 1, 2);
    let wire = encrypt_datagram(&mut peer_tx, b"\x45survivor");
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 1);
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45survivor");

    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.datagrams_received, 4);
    assert_eq!(snapshot.drops_short, 2);
    assert_eq!(snapshot.drops_invalid_spi, 1);
    assert_eq!(snapshot.packets_received, 1);
}

/// Test integrity protection against on-path tampering
///
/// Verifies that:
/// - A flipped ciphertext byte fails ICV verification
/// - The tampered datagram is counted and not delivered
#[tokio::test]
async fn test_tampered_datagram_fails_integrity() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    let mut peer_tx = make_context(0x100, 1, 2);
    let mut wire = encrypt_datagram(&mut peer_tx, b"\x45tamper-target");
    let mid = wire.len() / 2;
    wire[mid] ^= 0x01;
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 0);
    assert_eq!(session.metrics().snapshot().drops_decrypt, 1);
}

/// Test replay rejection of a duplicated datagram
///
/// Verifies that:
/// - The first copy is delivered
/// - The byte-identical second copy is dropped and counted
#[tokio::test]
async fn test_replayed_datagram_is_dropped() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    let mut peer_tx = make_context(0x100, 1, 2);
    let wire = encrypt_datagram(&mut peer_tx, b"\x45once-only");
    remote.send(&wire).await.expect("Failed to send");
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 1);
    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.drops_replay, 1);
    assert_eq!(snapshot.packets_received, 1);
}

/// Test that disabling replay protection admits duplicates
///
/// Verifies that:
/// - With enforcement off, the duplicated datagram is delivered twice
/// - No replay drop is counted
#[tokio::test]
async fn test_replay_protection_disabled_accepts_duplicates() {
    let (local, remote) = socket_pair().await;
    let config = EspConfig::builder()
        .with_replay_protection(false)
        .build()
        .expect("Failed to build config");
    let mut session = EspSession::new(
        config,
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    let mut peer_tx = make_context(0x100, 1, 2);
    let wire = encrypt_datagram(&mut peer_tx, b"\x45echoed");
    remote.send(&wire).await.expect("Failed to send");
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 2);
    assert_eq!(session.metrics().snapshot().drops_replay, 0);
}

//
// Test Cases - Rekeying
//

/// Test straggler admission across a rekey
///
/// After `rotate_keys` the superseded inbound context stays usable for
/// packets whose sequence number keeps `seq + next_expected` under the
/// admission ceiling.
///
/// Verifies that:
/// - A late packet under the old SPI inside the grace window is
///   decrypted with the old keys
/// - The first sequence number past the ceiling is treated as an
///   unknown SPI
/// - Traffic under the new SPI flows normally
#[tokio::test]
async fn test_rekey_admits_stragglers_within_grace() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    // The peer has 33 packets in flight when the rekey lands
    let mut old_peer_tx = make_context(0x100, 1, 2);
    let stragglers: Vec<Vec<u8>> = (0..33)
        .map(|i| encrypt_datagram(&mut old_peer_tx, format!("\x45old-{i}").as_bytes()))
        .collect();

    session.rotate_keys(make_context(0x101, 5, 6), make_context(0x201, 7, 8));

    // Ceiling is next_expected (0) + grace (32): sequence 31 is the
    // last admissible one, sequence 32 the first rejected
    remote.send(&stragglers[31]).await.expect("Failed to send");
    remote.send(&stragglers[32]).await.expect("Failed to send");

    let mut new_peer_tx = make_context(0x101, 5, 6);
    let wire = encrypt_datagram(&mut new_peer_tx, b"\x45fresh-generation");
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 2);
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45old-31");
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45fresh-generation");

    let snapshot = session.metrics().snapshot();
    assert_eq!(snapshot.drops_invalid_spi, 1);
    assert_eq!(snapshot.packets_received, 2);
}

//
// Test Cases - Trailer Formats
//

/// Test the Next-Header allow-list on otherwise valid datagrams
///
/// Verifies that:
/// - A properly encrypted datagram with an unrecognised Next-Header
///   byte is dropped after decryption
#[tokio::test]
async fn test_unknown_next_header_is_dropped() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    let mut peer_tx = make_context(0x100, 1, 2);
    let mut pkt = PacketBuf::from_payload(b"\x45mislabelled").unwrap();
    // 0x3b is IPv6 no-next-header, not a tunnel payload marker
    crypto::encrypt_packet_with_next_header(&mut peer_tx, &mut pkt, 0x3b)
        .expect("Failed to encrypt");
    remote.send(pkt.datagram()).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 0);
    assert_eq!(session.metrics().snapshot().drops_format, 1);
}

//
// Test Cases - Compressed Payloads
//

/// Test that compressed payloads need an installed decoder
///
/// Verifies that:
/// - Without a decoder, the compressed marker drops the packet
/// - A decoder that leaves residual input drops the packet
#[tokio::test]
async fn test_compressed_payload_without_working_decoder_is_dropped() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();
    let mut peer_tx = make_context(0x100, 1, 2);

    // No decoder installed
    let mut pkt = PacketBuf::from_payload(b"\x45squeezed").unwrap();
    crypto::encrypt_packet_with_next_header(
        &mut peer_tx,
        &mut pkt,
        crypto::NEXT_HEADER_COMPRESSED,
    )
    .expect("Failed to encrypt");
    remote.send(pkt.datagram()).await.expect("Failed to send");
    drive(&mut session, &mut hooks).await;
    assert_eq!(session.metrics().snapshot().drops_decompression, 1);

    // A decoder that cannot finish the input
    session.set_decompressor(Box::new(StallingCodec));
    let mut pkt = PacketBuf::from_payload(b"\x45squeezed").unwrap();
    crypto::encrypt_packet_with_next_header(
        &mut peer_tx,
        &mut pkt,
        crypto::NEXT_HEADER_COMPRESSED,
    )
    .expect("Failed to encrypt");
    remote.send(pkt.datagram()).await.expect("Failed to send");
    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 0);
    assert_eq!(session.metrics().snapshot().drops_decompression, 2);
}

/// Test decode and delivery of a compressed payload
///
/// Verifies that:
/// - The decoder output is what reaches the inbound queue
/// - Plain packets keep flowing beside compressed ones
#[tokio::test]
async fn test_compressed_payload_is_decoded() {
    let (local, remote) = socket_pair().await;
    let mut session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    session.set_decompressor(Box::new(DoublingCodec));
    let mut hooks = RecordingHooks::default();
    let mut peer_tx = make_context(0x100, 1, 2);

    let mut pkt = PacketBuf::from_payload(b"\x45zip").unwrap();
    crypto::encrypt_packet_with_next_header(
        &mut peer_tx,
        &mut pkt,
        crypto::NEXT_HEADER_COMPRESSED,
    )
    .expect("Failed to encrypt");
    remote.send(pkt.datagram()).await.expect("Failed to send");

    let wire = encrypt_datagram(&mut peer_tx, b"\x45plain");
    remote.send(&wire).await.expect("Failed to send");

    drive(&mut session, &mut hooks).await;

    assert_eq!(session.pending_inbound(), 2);
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45\x45zziipp");
    assert_eq!(session.pop_inbound().unwrap().payload(), b"\x45plain");
    assert_eq!(session.metrics().snapshot().drops_decompression, 0);
}

//
// Test Cases - Dead Peer Detection
//

/// Test the dead-peer teardown and re-probe path
///
/// Verifies that:
/// - A quiet Connected session is fine before the dead threshold
/// - Past twice the DPD interval the session closes the socket,
///   notifies the hooks and starts probing again
/// - The path can be re-opened without renegotiation
#[tokio::test]
async fn test_dead_peer_closes_path_and_reprobes() {
    let (local, remote) = socket_pair().await;
    let config = EspConfig::builder()
        .with_attempt_period(Duration::from_millis(40))
        .build()
        .expect("Failed to build config");
    let mut session = EspSession::new(
        config,
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    session.set_state(TransportState::Connected);
    let mut hooks = RecordingHooks::default();

    // Immediately after construction nothing is due
    let mut timeout_hint = Duration::from_secs(60);
    assert!(!session.run_iteration(&mut hooks, &mut timeout_hint));
    assert_eq!(hooks.closes, 0);
    assert_eq!(session.state(), TransportState::Connected);

    // Silence past last_rx + 2 * dpd declares the peer dead
    tokio::time::sleep(Duration::from_millis(120)).await;
    let mut timeout_hint = Duration::from_secs(60);
    assert!(session.run_iteration(&mut hooks, &mut timeout_hint));

    assert_eq!(session.state(), TransportState::Sleeping);
    assert!(session.socket().is_none());
    assert_eq!(hooks.closes, 1);
    assert_eq!(hooks.probes_sent, 1);
    assert_eq!(session.metrics().snapshot().dead_peer_events, 1);

    // Roaming recovery: a new socket revives the path with the same keys
    drop(remote);
    let (local, _remote) = socket_pair().await;
    session.set_socket(local);
    assert!(session.socket().is_some());
    assert_eq!(session.state(), TransportState::Sleeping);
}

//
// Test Cases - High-Level Client
//

/// Test a full request/response round trip through EspClient
///
/// Verifies that:
/// - send_packet reaches the peer as a decryptable ESP datagram
/// - The peer's reply comes back out of recv_packet
/// - poll_once wakes on socket readability without busy-waiting
#[tokio::test]
async fn test_client_round_trip() {
    let (local, remote) = socket_pair().await;
    let session = EspSession::new(
        EspConfig::default(),
        local,
        make_context(0x100, 1, 2),
        make_context(0x200, 3, 4),
    );
    let mut client = EspClient::new(session, RecordingHooks::default());
    client.setup().expect("Failed to set up client");
    client.session_mut().set_state(TransportState::Connected);

    client.send_packet(b"\x45ping").expect("Failed to queue packet");
    client.poll_once().await;

    // Peer task: decrypt the request, send a reply
    let peer = tokio::spawn(async move {
        let mut peer_rx = make_context(0x200, 3, 4);
        let mut peer_tx = make_context(0x100, 1, 2);
        let mut buf = [0u8; 2048];
        let n = timeout(Duration::from_millis(500), remote.recv(&mut buf))
            .await
            .expect("Timed out waiting for request")
            .expect("Failed to receive");
        assert_eq!(decrypt_datagram(&mut peer_rx, &buf[..n]), b"\x45ping");

        let wire = encrypt_datagram(&mut peer_tx, b"\x45pong");
        remote.send(&wire).await.expect("Failed to send reply");
    });

    let reply = timeout(Duration::from_millis(1000), async {
        loop {
            client.poll_once().await;
            if let Some(packet) = client.recv_packet() {
                return packet;
            }
        }
    })
    .await
    .expect("Timed out waiting for reply");

    assert_eq!(reply, b"\x45pong");
    peer.await.expect("Peer task failed");

    let snapshot = client.session().metrics().snapshot();
    assert_eq!(snapshot.packets_sent, 1);
    assert_eq!(snapshot.packets_received, 1);
}
