//! Protocol definitions and constants
//!
//! Every push and pull exchange starts with an auth frame carrying the
//! channel index and the current rolling IV. The frame is opaque to the
//! tunnel layer: it only asks an [`AuthEncoder`] for bytes.

use crate::crypto::{Cipher, CryptoError, KEY_LEN, NONCE_LEN, TAG_LEN};
use base64::Engine;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid auth frame length: {0}")]
    InvalidFrameLength(usize),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Path of the upload (push) endpoint relative to the channel address
pub const PUSH_PATH: &str = "/http/push";

/// Path of the poll (pull) endpoint relative to the channel address
pub const PULL_PATH: &str = "/http/pull";

/// Header carrying how long the server may hold a pull open, in seconds
///
/// Sent as `X-PullPeriod`; kept lowercase so it can build a `HeaderName`
/// at compile time.
pub const PULL_PERIOD_HEADER: &str = "x-pullperiod";

/// Content type sent on every exchange so bodies look like image uploads
pub const SPOOFED_CONTENT_TYPE: &str = "image/jpeg";

/// Plaintext size of an auth record (index + IV, both 8 bytes)
pub const AUTH_RECORD_LEN: usize = 16;

/// Size of an auth frame produced by [`SealedAuthEncoder`]
pub const SEALED_FRAME_LEN: usize = NONCE_LEN + AUTH_RECORD_LEN + TAG_LEN;

const AUTH_AAD: &[u8] = b"http-tunnel-auth";

/// Per-exchange authentication and ordering header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthFrame {
    /// Channel index within the session (negative for control channels)
    pub index: i64,
    /// Rolling IV in effect when the exchange was opened
    pub rolling_iv: u64,
}

impl AuthFrame {
    pub fn new(index: i64, rolling_iv: u64) -> Self {
        Self { index, rolling_iv }
    }

    fn to_record(self) -> [u8; AUTH_RECORD_LEN] {
        let mut buf = BytesMut::with_capacity(AUTH_RECORD_LEN);
        buf.put_i64(self.index);
        buf.put_u64(self.rolling_iv);
        let mut record = [0u8; AUTH_RECORD_LEN];
        record.copy_from_slice(&buf);
        record
    }

    fn from_record(mut record: &[u8]) -> Result<Self, ProtocolError> {
        if record.len() != AUTH_RECORD_LEN {
            return Err(ProtocolError::InvalidFrameLength(record.len()));
        }
        let index = record.get_i64();
        let rolling_iv = record.get_u64();
        Ok(Self { index, rolling_iv })
    }
}

/// Renders auth frames to bytes
pub trait AuthEncoder: Send + Sync {
    /// Encode a frame; the result is written before any payload bytes
    fn encode(&self, frame: &AuthFrame) -> Result<Bytes, ProtocolError>;
}

/// Auth encoder sealing `{index, iv}` with ChaCha20-Poly1305
///
/// Output layout: `nonce (12) || ciphertext (16) || tag (16)`.
pub struct SealedAuthEncoder {
    cipher: Cipher,
}

impl SealedAuthEncoder {
    /// Create from raw key bytes
    pub fn new(key: &[u8; KEY_LEN]) -> Result<Self, ProtocolError> {
        Ok(Self {
            cipher: Cipher::new(key)?,
        })
    }

    /// Create from a base64 encoded 32-byte key
    pub fn from_base64(encoded: &str) -> Result<Self, ProtocolError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(CryptoError::from)?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        Self::new(&key)
    }

    /// Recover the frame from the first [`SEALED_FRAME_LEN`] bytes of a body
    pub fn open(&self, sealed: &[u8]) -> Result<AuthFrame, ProtocolError> {
        if sealed.len() < SEALED_FRAME_LEN {
            return Err(ProtocolError::InvalidFrameLength(sealed.len()));
        }
        let record = self.cipher.open(AUTH_AAD, &sealed[..SEALED_FRAME_LEN])?;
        AuthFrame::from_record(&record)
    }
}

impl AuthEncoder for SealedAuthEncoder {
    fn encode(&self, frame: &AuthFrame) -> Result<Bytes, ProtocolError> {
        let sealed = self.cipher.seal(AUTH_AAD, &frame.to_record())?;
        Ok(Bytes::from(sealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sealed_frame_layout() {
        let encoder = SealedAuthEncoder::new(&[7u8; KEY_LEN]).unwrap();
        let frame = AuthFrame::new(3, 99);

        let encoded = encoder.encode(&frame).unwrap();
        assert_eq!(encoded.len(), SEALED_FRAME_LEN);
        assert_eq!(encoder.open(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_open_ignores_trailing_payload() {
        let encoder = SealedAuthEncoder::new(&[7u8; KEY_LEN]).unwrap();
        let frame = AuthFrame::new(-1, u64::MAX);

        let mut body = encoder.encode(&frame).unwrap().to_vec();
        body.extend_from_slice(b"payload");
        assert_eq!(encoder.open(&body).unwrap(), frame);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let sealer = SealedAuthEncoder::new(&[7u8; KEY_LEN]).unwrap();
        let other = SealedAuthEncoder::new(&[8u8; KEY_LEN]).unwrap();

        let encoded = sealer.encode(&AuthFrame::new(1, 1)).unwrap();
        assert!(other.open(&encoded).is_err());
    }

    #[test]
    fn test_from_base64() {
        let key = base64::engine::general_purpose::STANDARD.encode([1u8; KEY_LEN]);
        assert!(SealedAuthEncoder::from_base64(&key).is_ok());
        assert!(SealedAuthEncoder::from_base64("c2hvcnQ=").is_err());
    }
}
