//! Text encodings for opaque byte buffers.

use base64::Engine as _;
use thiserror::Error;

/// A codec failed to decode its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{codec} decode failed: {reason}")]
pub struct DecodeError {
    /// Name of the codec that rejected the input.
    pub codec: &'static str,
    /// Description of the failure. Never contains the input itself.
    pub reason: String,
}

/// Encodes byte buffers as text for transport and decodes them back.
///
/// `encode` must be a pure function of its input and must never emit `-` or `_`, which
/// make up the envelope separator. `decode` must reject anything it cannot parse instead
/// of returning partial output.
pub trait Codec: Send + Sync {
    /// Encodes `bytes` as text.
    fn encode(&self, bytes: &[u8]) -> String;

    /// Decodes text produced by [`Codec::encode`].
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if `text` is not valid for this codec.
    fn decode(&self, text: &str) -> Result<Vec<u8>, DecodeError>;
}

/// RFC 4648 base64 (standard alphabet, padded). Whitespace is ignored on decode.
#[derive(Debug, Default, Clone, Copy)]
pub struct Base64Codec;

impl Codec for Base64Codec {
    fn encode(&self, bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, DecodeError> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact.as_bytes())
            .map_err(|err| DecodeError {
                codec: "base64",
                reason: err.to_string(),
            })
    }
}

/// Lowercase hexadecimal.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexCodec;

impl Codec for HexCodec {
    fn encode(&self, bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    fn decode(&self, text: &str) -> Result<Vec<u8>, DecodeError> {
        hex::decode(text.trim()).map_err(|err| DecodeError {
            codec: "hex",
            reason: err.to_string(),
        })
    }
}
