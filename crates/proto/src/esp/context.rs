//! Per-SPI security context
//!
//! An [`EspContext`] binds one SPI to its negotiated algorithms, key
//! material and sequence state. A session holds three of them: the
//! current inbound context, the previous inbound context kept alive
//! across a rekey, and the outbound context. Key material is wiped when
//! a context is destroyed or dropped.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::crypto::{EspAuth, EspCipher};
use super::logging;
use super::replay::ReplayWindow;
use super::{Error, Result};

/// Keys and sequence state for one ESP security association
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EspContext {
    /// Security Parameters Index, in host order
    pub(crate) spi: u32,
    /// Next outbound sequence number; the first packet sent carries 0
    pub(crate) seq: u64,
    /// Inbound admission window
    #[zeroize(skip)]
    pub(crate) replay: ReplayWindow,
    #[zeroize(skip)]
    cipher: EspCipher,
    #[zeroize(skip)]
    auth: EspAuth,
    enc_key: Vec<u8>,
    mac_key: Vec<u8>,
}

impl EspContext {
    /// Create a context from already-parsed algorithms
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyLength`] when either key does not
    /// match its algorithm's required length.
    pub fn new(
        spi: u32,
        cipher: EspCipher,
        auth: EspAuth,
        enc_key: &[u8],
        mac_key: &[u8],
    ) -> Result<Self> {
        if enc_key.len() != cipher.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: cipher.key_len(),
                actual: enc_key.len(),
            });
        }
        if mac_key.len() != auth.key_len() {
            return Err(Error::InvalidKeyLength {
                expected: auth.key_len(),
                actual: mac_key.len(),
            });
        }
        Ok(EspContext {
            spi,
            seq: 0,
            replay: ReplayWindow::new(),
            cipher,
            auth,
            enc_key: enc_key.to_vec(),
            mac_key: mac_key.to_vec(),
        })
    }

    /// Create a context from the negotiated wire identifiers
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCipher`] or [`Error::UnsupportedMac`]
    /// for unknown identifiers, and [`Error::InvalidKeyLength`] when a
    /// key does not match the algorithm it parses to.
    pub fn from_ids(
        spi: u32,
        cipher_id: u8,
        auth_id: u8,
        enc_key: &[u8],
        mac_key: &[u8],
    ) -> Result<Self> {
        let cipher = EspCipher::from_id(cipher_id)?;
        let auth = EspAuth::from_id(auth_id)?;
        EspContext::new(spi, cipher, auth, enc_key, mac_key)
    }

    /// SPI in host order
    pub fn spi(&self) -> u32 {
        self.spi
    }

    /// Negotiated encryption algorithm
    pub fn cipher(&self) -> EspCipher {
        self.cipher
    }

    /// Negotiated authentication algorithm
    pub fn auth(&self) -> EspAuth {
        self.auth
    }

    /// Next inbound sequence number the admission window expects
    pub fn next_expected(&self) -> u64 {
        self.replay.next_expected()
    }

    /// Whether this context carries key material
    pub fn is_keyed(&self) -> bool {
        !self.enc_key.is_empty()
    }

    /// Wipe and drop the key material; safe to call more than once
    pub fn destroy(&mut self) {
        self.enc_key.zeroize();
        self.enc_key.clear();
        self.mac_key.zeroize();
        self.mac_key.clear();
    }

    /// Trace the negotiated parameters and keys for one direction
    ///
    /// This is the only path that reads key material for output, and it
    /// emits at trace level only.
    pub fn log_params(&self, direction: &str) {
        logging::log_esp_params(
            direction,
            self.spi,
            self.cipher.label(),
            &self.enc_key,
            self.auth.label(),
            &self.mac_key,
        );
    }

    pub(crate) fn enc_key(&self) -> &[u8] {
        &self.enc_key
    }

    pub(crate) fn mac_key(&self) -> &[u8] {
        &self.mac_key
    }
}

impl Default for EspContext {
    /// An unkeyed placeholder; [`is_keyed`](EspContext::is_keyed)
    /// reports `false` and every transform on it fails
    fn default() -> Self {
        EspContext {
            spi: 0,
            seq: 0,
            replay: ReplayWindow::new(),
            cipher: EspCipher::Aes128Cbc,
            auth: EspAuth::HmacSha1,
            enc_key: Vec::new(),
            mac_key: Vec::new(),
        }
    }
}

impl fmt::Debug for EspContext {
    /// Key material is deliberately absent from the debug output
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EspContext")
            .field("spi", &format_args!("0x{:08x}", self.spi))
            .field("seq", &self.seq)
            .field("next_expected", &self.replay.next_expected())
            .field("cipher", &self.cipher)
            .field("auth", &self.auth)
            .field("keyed", &self.is_keyed())
            .finish()
    }
}
