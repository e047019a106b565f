//! Error types for ESP transport operations
//!
//! This module defines a unified error type for the ESP data plane:
//! configuration failures surface to the caller, while per-packet
//! failures are consumed by the session loop, which logs and drops
//! the offending packet.

use std::fmt;

/// Result type for ESP operations
pub type Result<T> = std::result::Result<T, Error>;

/// ESP transport errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unsupported encryption algorithm identifier
    UnsupportedCipher(u8),

    /// Unsupported authentication algorithm identifier
    UnsupportedMac(u8),

    /// Key buffer length does not match the negotiated algorithm
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid configuration parameter
    InvalidParameter(String),

    /// Operation not valid in the current transport state
    InvalidState(String),

    /// Datagram too short to hold the ESP header and trailer
    PacketTooShort(usize),

    /// SPI matches neither inbound context
    UnknownSpi(u32),

    /// ICV verification failed
    IntegrityCheckFailed,

    /// Sequence number rejected by the replay window
    ReplayDetected(u32),

    /// Cryptographic operation failed
    CryptoError(String),

    /// Decrypted payload carries an unrecognised Next-Header value
    UnsupportedPayloadType(u8),

    /// Padding length byte inconsistent with the payload length
    InvalidPadLength(u8),

    /// Padding bytes do not follow the 1,2,...,N pattern
    InvalidPadding,

    /// Payload decompression failed or left residual input
    DecompressionFailed(String),

    /// Packet buffer allocation was refused
    AllocationFailed,

    /// Buffer too short for operation
    BufferTooShort {
        /// Required length
        required: usize,
        /// Available length
        available: usize,
    },

    /// I/O error
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedCipher(id) => {
                write!(f, "Unsupported ESP encryption type 0x{:02x}", id)
            }
            Error::UnsupportedMac(id) => {
                write!(f, "Unsupported ESP authentication type 0x{:02x}", id)
            }
            Error::InvalidKeyLength { expected, actual } => {
                write!(
                    f,
                    "Invalid key length: expected {}, got {}",
                    expected, actual
                )
            }
            Error::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::PacketTooShort(len) => {
                write!(f, "ESP packet too short: {} bytes", len)
            }
            Error::UnknownSpi(spi) => {
                write!(f, "ESP packet with invalid SPI 0x{:08x}", spi)
            }
            Error::IntegrityCheckFailed => {
                write!(f, "ESP authentication check failed")
            }
            Error::ReplayDetected(seq) => {
                write!(f, "Replayed or ancient ESP packet (sequence: {})", seq)
            }
            Error::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),
            Error::UnsupportedPayloadType(nh) => {
                write!(f, "Unrecognised ESP payload type 0x{:02x}", nh)
            }
            Error::InvalidPadLength(padlen) => {
                write!(f, "Invalid padding length 0x{:02x} in ESP", padlen)
            }
            Error::InvalidPadding => write!(f, "Invalid padding bytes in ESP"),
            Error::DecompressionFailed(msg) => {
                write!(f, "Decompression of ESP packet failed: {}", msg)
            }
            Error::AllocationFailed => write!(f, "Packet buffer allocation failed"),
            Error::BufferTooShort {
                required,
                available,
            } => {
                write!(
                    f,
                    "Buffer too short: need {} bytes, have {}",
                    required, available
                )
            }
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

// Convert from std::io::Error
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::UnsupportedCipher(0x07);
        assert_eq!(err.to_string(), "Unsupported ESP encryption type 0x07");

        let err = Error::UnknownSpi(0xdeadbeef);
        assert_eq!(err.to_string(), "ESP packet with invalid SPI 0xdeadbeef");

        let err = Error::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "Invalid key length: expected 32, got 16");
    }

    #[test]
    fn test_error_clone() {
        let err1 = Error::IntegrityCheckFailed;
        let err2 = err1.clone();
        assert_eq!(err1, err2);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "socket closed");
        let err: Error = io_err.into();
        match err {
            Error::Io(msg) => assert!(msg.contains("socket closed")),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_padding_errors_display() {
        let err = Error::InvalidPadLength(0xff);
        assert_eq!(err.to_string(), "Invalid padding length 0xff in ESP");
        assert_eq!(Error::InvalidPadding.to_string(), "Invalid padding bytes in ESP");
    }
}
