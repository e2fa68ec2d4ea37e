//! Text envelope carrying a sealed payload and the IV it was sealed with.
//!
//! The wire format is `<codec(ciphertext)>-_-<codec(iv)>`. The IV half is empty for
//! RSA envelopes, which carry no IV.

use std::fmt;

use thiserror::Error;

use crate::codec::{Base64Codec, Codec, DecodeError};

/// Separator between the ciphertext and IV halves of an envelope.
pub const SEPARATOR: &str = "-_-";

/// Why an envelope string was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidEnvelopeReason {
    /// The input was empty.
    Empty,
    /// The input does not contain the separator.
    MissingSeparator,
    /// The input contains the separator more than once.
    MultipleSeparators,
    /// The ciphertext half decoded to nothing.
    EmptyCiphertext,
    /// The IV half decoded to nothing where an IV is required.
    EmptyIv,
    /// One of the halves could not be decoded.
    Undecodable(DecodeError),
}

impl fmt::Display for InvalidEnvelopeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("input is empty"),
            Self::MissingSeparator => f.write_str("separator missing"),
            Self::MultipleSeparators => f.write_str("separator occurs more than once"),
            Self::EmptyCiphertext => f.write_str("ciphertext is empty"),
            Self::EmptyIv => f.write_str("iv is empty"),
            Self::Undecodable(err) => write!(f, "{err}"),
        }
    }
}

/// Envelope text that could not be parsed.
///
/// Carries only shape information about the input so the message never leaks data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "invalid input given for unsealing, provide a string previously produced by seal \
     (empty: {was_empty}, contains separator: {contains_separator}): {reason}"
)]
pub struct InvalidEnvelope {
    /// The input was the empty string.
    pub was_empty: bool,
    /// The input contained at least one separator.
    pub contains_separator: bool,
    /// Detailed rejection reason.
    pub reason: InvalidEnvelopeReason,
}

impl InvalidEnvelope {
    fn new(input: &str, reason: InvalidEnvelopeReason) -> Self {
        Self {
            was_empty: input.is_empty(),
            contains_separator: input.contains(SEPARATOR),
            reason,
        }
    }
}

/// Immutable `{ciphertext, iv}` pair produced by sealing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    ciphertext: Vec<u8>,
    iv: Vec<u8>,
}

impl Envelope {
    /// Builds an envelope from the raw output of a cipher.
    #[must_use]
    pub const fn from_parts(ciphertext: Vec<u8>, iv: Vec<u8>) -> Self {
        Self { ciphertext, iv }
    }

    /// Parses envelope text where both halves must be present.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEnvelope`] if the text is empty, does not contain exactly one
    /// separator, either half fails to decode, or either half decodes to nothing.
    pub fn from_string(codec: &dyn Codec, text: &str) -> Result<Self, InvalidEnvelope> {
        Self::parse(codec, text, true)
    }

    /// Parses envelope text whose IV half may be empty, as produced for RSA.
    ///
    /// # Errors
    ///
    /// Same as [`Envelope::from_string`] except that an empty IV is accepted.
    pub fn from_string_allowing_empty_iv(
        codec: &dyn Codec,
        text: &str,
    ) -> Result<Self, InvalidEnvelope> {
        Self::parse(codec, text, false)
    }

    fn parse(codec: &dyn Codec, text: &str, iv_required: bool) -> Result<Self, InvalidEnvelope> {
        if text.is_empty() {
            return Err(InvalidEnvelope::new(text, InvalidEnvelopeReason::Empty));
        }
        let Some((ciphertext_text, iv_text)) = text.split_once(SEPARATOR) else {
            return Err(InvalidEnvelope::new(
                text,
                InvalidEnvelopeReason::MissingSeparator,
            ));
        };
        if separator_count(text) != 1 {
            return Err(InvalidEnvelope::new(
                text,
                InvalidEnvelopeReason::MultipleSeparators,
            ));
        }

        let decode = |half: &str| {
            codec
                .decode(half)
                .map_err(|err| InvalidEnvelope::new(text, InvalidEnvelopeReason::Undecodable(err)))
        };
        let ciphertext = decode(ciphertext_text)?;
        let iv = decode(iv_text)?;

        if ciphertext.is_empty() {
            return Err(InvalidEnvelope::new(
                text,
                InvalidEnvelopeReason::EmptyCiphertext,
            ));
        }
        if iv_required && iv.is_empty() {
            return Err(InvalidEnvelope::new(text, InvalidEnvelopeReason::EmptyIv));
        }
        Ok(Self { ciphertext, iv })
    }

    /// Serializes the envelope with `codec`.
    #[must_use]
    pub fn to_string_with(&self, codec: &dyn Codec) -> String {
        let mut out = codec.encode(&self.ciphertext);
        out.push_str(SEPARATOR);
        out.push_str(&codec.encode(&self.iv));
        out
    }

    /// Sealed bytes.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// IV the payload was sealed with. Empty for RSA envelopes.
    #[must_use]
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

/// Counts separator occurrences, overlapping ones included.
fn separator_count(text: &str) -> usize {
    text.as_bytes()
        .windows(SEPARATOR.len())
        .filter(|window| *window == SEPARATOR.as_bytes())
        .count()
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with(&Base64Codec))
    }
}
