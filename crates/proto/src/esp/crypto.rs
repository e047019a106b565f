//! ESP packet transforms: AES-CBC encryption with truncated-HMAC integrity
//!
//! Implements the two negotiated transform families this transport
//! supports:
//!
//! - Encryption: AES-128-CBC and AES-256-CBC (RFC 3602)
//! - Authentication: HMAC-MD5-96 and HMAC-SHA-1-96 (RFC 2403 / RFC 2404)
//!
//! The ICV covers SPI, sequence number, IV and ciphertext, truncated to
//! 96 bits. Encryption and decryption work in place on a [`PacketBuf`];
//! callers frame the payload with the `1,2,..,N` pad run, the padding
//! length byte and the Next-Header byte before encryption, and this
//! module produces that framing itself on the transmit side.

use aes::{Aes128, Aes256};
use cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use md5::Md5;
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;

use super::context::EspContext;
use super::logging;
use super::packet::{PacketBuf, ESP_ICV_LEN, ESP_IV_LEN, PAYLOAD_OFFSET};
use super::replay::SeqVerdict;
use super::{Error, Result};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

type HmacMd5 = Hmac<Md5>;
type HmacSha1 = Hmac<Sha1>;

/// CBC block length shared by both supported ciphers
pub const CBC_BLOCK_LEN: usize = 16;

/// IPv4-in-IP payload
pub const NEXT_HEADER_IPIP: u8 = 0x04;

/// Vendor compressed payload
pub const NEXT_HEADER_COMPRESSED: u8 = 0x05;

/// IPv6 encapsulation
pub const NEXT_HEADER_IPV6: u8 = 0x29;

/// Negotiated ESP encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EspCipher {
    /// AES-128-CBC (RFC3602)
    Aes128Cbc,
    /// AES-256-CBC (RFC3602)
    Aes256Cbc,
}

impl EspCipher {
    /// Parse the negotiated wire identifier
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCipher`] for any identifier other
    /// than the two supported ones.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x02 => Ok(EspCipher::Aes128Cbc),
            0x05 => Ok(EspCipher::Aes256Cbc),
            other => Err(Error::UnsupportedCipher(other)),
        }
    }

    /// The negotiated wire identifier
    pub fn id(&self) -> u8 {
        match self {
            EspCipher::Aes128Cbc => 0x02,
            EspCipher::Aes256Cbc => 0x05,
        }
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            EspCipher::Aes128Cbc => 16,
            EspCipher::Aes256Cbc => 32,
        }
    }

    /// IV length in bytes
    pub fn iv_len(&self) -> usize {
        ESP_IV_LEN
    }

    /// Diagnostic label
    pub fn label(&self) -> &'static str {
        match self {
            EspCipher::Aes128Cbc => "AES-128-CBC (RFC3602)",
            EspCipher::Aes256Cbc => "AES-256-CBC (RFC3602)",
        }
    }
}

/// Negotiated ESP authentication algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EspAuth {
    /// HMAC-MD5-96 (RFC2403)
    HmacMd5,
    /// HMAC-SHA-1-96 (RFC2404)
    HmacSha1,
}

impl EspAuth {
    /// Parse the negotiated wire identifier
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedMac`] for any identifier other than
    /// the two supported ones.
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0x01 => Ok(EspAuth::HmacMd5),
            0x02 => Ok(EspAuth::HmacSha1),
            other => Err(Error::UnsupportedMac(other)),
        }
    }

    /// The negotiated wire identifier
    pub fn id(&self) -> u8 {
        match self {
            EspAuth::HmacMd5 => 0x01,
            EspAuth::HmacSha1 => 0x02,
        }
    }

    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            EspAuth::HmacMd5 => 16,
            EspAuth::HmacSha1 => 20,
        }
    }

    /// Truncated ICV length in bytes; both algorithms use 96 bits
    pub fn icv_len(&self) -> usize {
        ESP_ICV_LEN
    }

    /// Diagnostic label
    pub fn label(&self) -> &'static str {
        match self {
            EspAuth::HmacMd5 => "HMAC-MD5-96 (RFC2403)",
            EspAuth::HmacSha1 => "HMAC-SHA-1-96 (RFC2404)",
        }
    }
}

/// Pad bytes needed so payload, padding and the two trailer bytes fill
/// whole CBC blocks
pub(crate) fn calculate_padding(payload_len: usize) -> usize {
    (CBC_BLOCK_LEN - ((payload_len + 2) % CBC_BLOCK_LEN)) % CBC_BLOCK_LEN
}

/// Encrypt one outbound IP packet in place
///
/// Chooses the Next-Header byte from the payload's IP version nibble.
/// See [`encrypt_packet_with_next_header`] for the framing details.
///
/// # Errors
///
/// Returns [`Error::BufferTooShort`] when the buffer cannot hold the
/// padded payload plus ICV, or [`Error::CryptoError`] /
/// [`Error::InvalidKeyLength`] when the context's key material does not
/// match its algorithms.
pub fn encrypt_packet(ctx: &mut EspContext, pkt: &mut PacketBuf) -> Result<usize> {
    let next_hdr = match pkt.payload().first() {
        Some(b) if b >> 4 == 6 => NEXT_HEADER_IPV6,
        _ => NEXT_HEADER_IPIP,
    };
    encrypt_packet_with_next_header(ctx, pkt, next_hdr)
}

/// Encrypt one outbound packet in place with an explicit Next-Header
/// byte
///
/// Probe builders and compressed-payload senders pick their own
/// marker. Frames the payload with the `1, 2, .., N` pad run, the
/// padding length and `next_hdr`, writes SPI, the next sequence number
/// and a fresh random IV, encrypts, and appends the truncated ICV.
/// Advances the context's sequence counter.
///
/// # Returns
///
/// Total datagram length in bytes, ready to send from the front of the
/// buffer.
///
/// # Errors
///
/// Same failure modes as [`encrypt_packet`].
pub fn encrypt_packet_with_next_header(
    ctx: &mut EspContext,
    pkt: &mut PacketBuf,
    next_hdr: u8,
) -> Result<usize> {
    let payload_len = pkt.len();
    let pad_len = calculate_padding(payload_len);
    let padded_len = payload_len + pad_len + 2;
    let total = PAYLOAD_OFFSET + padded_len + ESP_ICV_LEN;
    if total > pkt.capacity_total() {
        return Err(Error::BufferTooShort {
            required: total,
            available: pkt.capacity_total(),
        });
    }

    pkt.set_spi(ctx.spi);
    pkt.set_seq(ctx.seq as u32);
    ctx.seq += 1;
    OsRng.fill_bytes(pkt.iv_mut());

    let iv = {
        let mut iv = [0u8; ESP_IV_LEN];
        iv.copy_from_slice(pkt.iv());
        iv
    };

    let buf = pkt.bytes_mut();
    for i in 0..pad_len {
        buf[PAYLOAD_OFFSET + payload_len + i] = (i + 1) as u8;
    }
    buf[PAYLOAD_OFFSET + payload_len + pad_len] = pad_len as u8;
    buf[PAYLOAD_OFFSET + payload_len + pad_len + 1] = next_hdr;

    cbc_encrypt(
        ctx.cipher(),
        ctx.enc_key(),
        &iv,
        &mut buf[PAYLOAD_OFFSET..PAYLOAD_OFFSET + padded_len],
    )?;

    let icv = compute_icv(ctx.auth(), ctx.mac_key(), &pkt.bytes()[..PAYLOAD_OFFSET + padded_len])?;
    pkt.bytes_mut()[PAYLOAD_OFFSET + padded_len..total].copy_from_slice(&icv);
    pkt.set_len(padded_len);

    Ok(total)
}

/// Decrypt one inbound packet in place
///
/// Verifies the truncated ICV over SPI, sequence, IV and ciphertext,
/// applies sequence-number admission, then decrypts. The payload region
/// holds the plaintext (still carrying its padding framing) on success.
/// Admission tracking advances even with `check_replay` disabled; only
/// rejection is skipped then.
///
/// # Errors
///
/// Returns [`Error::IntegrityCheckFailed`], [`Error::ReplayDetected`]
/// or [`Error::CryptoError`]; the session drops the packet and keeps
/// draining on any of them.
pub fn decrypt_packet(ctx: &mut EspContext, pkt: &mut PacketBuf, check_replay: bool) -> Result<()> {
    let ct_len = pkt.len();
    let auth_end = PAYLOAD_OFFSET + ct_len;
    let total = auth_end + ESP_ICV_LEN;
    if total > pkt.capacity_total() {
        return Err(Error::BufferTooShort {
            required: total,
            available: pkt.capacity_total(),
        });
    }

    {
        let bytes = pkt.bytes();
        if let Err(err) = verify_icv(ctx.auth(), ctx.mac_key(), &bytes[..auth_end], &bytes[auth_end..total]) {
            if err == Error::IntegrityCheckFailed {
                logging::log_integrity_failed();
            }
            return Err(err);
        }
    }

    let seq = pkt.seq();
    let verdict = ctx.replay.check_and_update(seq);
    let expected = ctx.replay.next_expected();
    match verdict {
        SeqVerdict::Expected => logging::log_seq_accepted(seq, expected, "expected"),
        SeqVerdict::OutOfOrder => logging::log_seq_accepted(seq, expected, "out-of-order"),
        SeqVerdict::Future => logging::log_seq_accepted(seq, expected, "later-than-expected"),
        SeqVerdict::Ancient | SeqVerdict::Replayed if check_replay => {
            let reason = if verdict == SeqVerdict::Ancient {
                "ancient"
            } else {
                "replayed"
            };
            logging::log_seq_discarded(seq, expected, reason);
            return Err(Error::ReplayDetected(seq));
        }
        SeqVerdict::Ancient | SeqVerdict::Replayed => {}
    }

    if ct_len == 0 || ct_len % CBC_BLOCK_LEN != 0 {
        let err = Error::CryptoError(format!(
            "ciphertext length {} is not a positive multiple of {}",
            ct_len, CBC_BLOCK_LEN
        ));
        logging::log_decrypt_failed(&err.to_string());
        return Err(err);
    }

    let iv = {
        let mut iv = [0u8; ESP_IV_LEN];
        iv.copy_from_slice(pkt.iv());
        iv
    };
    let result = cbc_decrypt(
        ctx.cipher(),
        ctx.enc_key(),
        &iv,
        &mut pkt.bytes_mut()[PAYLOAD_OFFSET..auth_end],
    );
    if let Err(err) = &result {
        logging::log_decrypt_failed(&err.to_string());
    }
    result
}

fn cbc_encrypt(cipher: EspCipher, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    let msg_len = buf.len();
    match cipher {
        EspCipher::Aes128Cbc => {
            Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|_| Error::InvalidKeyLength {
                    expected: cipher.key_len(),
                    actual: key.len(),
                })?
                .encrypt_padded_mut::<NoPadding>(buf, msg_len)
                .map_err(|e| Error::CryptoError(e.to_string()))?;
        }
        EspCipher::Aes256Cbc => {
            Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| Error::InvalidKeyLength {
                    expected: cipher.key_len(),
                    actual: key.len(),
                })?
                .encrypt_padded_mut::<NoPadding>(buf, msg_len)
                .map_err(|e| Error::CryptoError(e.to_string()))?;
        }
    }
    Ok(())
}

fn cbc_decrypt(cipher: EspCipher, key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<()> {
    match cipher {
        EspCipher::Aes128Cbc => {
            Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|_| Error::InvalidKeyLength {
                    expected: cipher.key_len(),
                    actual: key.len(),
                })?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(|e| Error::CryptoError(e.to_string()))?;
        }
        EspCipher::Aes256Cbc => {
            Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| Error::InvalidKeyLength {
                    expected: cipher.key_len(),
                    actual: key.len(),
                })?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map_err(|e| Error::CryptoError(e.to_string()))?;
        }
    }
    Ok(())
}

fn compute_icv(auth: EspAuth, key: &[u8], data: &[u8]) -> Result<[u8; ESP_ICV_LEN]> {
    let mut icv = [0u8; ESP_ICV_LEN];
    match auth {
        EspAuth::HmacMd5 => {
            let mut mac = HmacMd5::new_from_slice(key).map_err(|_| Error::InvalidKeyLength {
                expected: auth.key_len(),
                actual: key.len(),
            })?;
            mac.update(data);
            let tag = mac.finalize().into_bytes();
            icv.copy_from_slice(&tag[..ESP_ICV_LEN]);
        }
        EspAuth::HmacSha1 => {
            let mut mac = HmacSha1::new_from_slice(key).map_err(|_| Error::InvalidKeyLength {
                expected: auth.key_len(),
                actual: key.len(),
            })?;
            mac.update(data);
            let tag = mac.finalize().into_bytes();
            icv.copy_from_slice(&tag[..ESP_ICV_LEN]);
        }
    }
    Ok(icv)
}

fn verify_icv(auth: EspAuth, key: &[u8], data: &[u8], icv: &[u8]) -> Result<()> {
    match auth {
        EspAuth::HmacMd5 => {
            let mut mac = HmacMd5::new_from_slice(key).map_err(|_| Error::InvalidKeyLength {
                expected: auth.key_len(),
                actual: key.len(),
            })?;
            mac.update(data);
            mac.verify_truncated_left(icv)
                .map_err(|_| Error::IntegrityCheckFailed)
        }
        EspAuth::HmacSha1 => {
            let mut mac = HmacSha1::new_from_slice(key).map_err(|_| Error::InvalidKeyLength {
                expected: auth.key_len(),
                actual: key.len(),
            })?;
            mac.update(data);
            mac.verify_truncated_left(icv)
                .map_err(|_| Error::IntegrityCheckFailed)
        }
    }
}
