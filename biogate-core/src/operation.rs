//! What a session does around the authentication attempt it drives.
//!
//! An [`Operation`] builds the cipher a session binds to the sensor and turns a successful
//! authentication into the payload the session emits.

use std::fmt;
use std::str::Utf8Error;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretSlice};
use zeroize::Zeroizing;

use crate::cipher::{Cipher, CipherFactory};
use crate::codec::Codec;
use crate::config::Algorithm;
use crate::envelope::Envelope;
use crate::error::{BiometricError, BiometricResult};
use crate::platform::AuthResult;

/// Unsealed bytes. Zeroed when dropped.
pub struct Plaintext(SecretSlice<u8>);

impl Plaintext {
    fn new(bytes: Vec<u8>) -> Self {
        Self(SecretSlice::from(bytes))
    }

    /// The plaintext bytes.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    /// The plaintext as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid UTF-8.
    pub fn to_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.expose())
    }

    /// Number of plaintext bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.expose().len()
    }

    /// Whether the plaintext is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Plaintext([REDACTED; {}])", self.len())
    }
}

/// Data carried by [`Outcome::Authenticated`].
#[derive(Debug)]
pub enum Payload {
    /// Plain authentication carries nothing.
    None,
    /// Envelope text produced by sealing.
    Envelope(String),
    /// Bytes recovered by unsealing.
    Plaintext(Plaintext),
}

impl Payload {
    /// The envelope text, if this payload came from sealing.
    #[must_use]
    pub fn as_envelope(&self) -> Option<&str> {
        match self {
            Self::Envelope(text) => Some(text),
            _ => None,
        }
    }

    /// The plaintext, if this payload came from unsealing.
    #[must_use]
    pub const fn as_plaintext(&self) -> Option<&Plaintext> {
        match self {
            Self::Plaintext(plaintext) => Some(plaintext),
            _ => None,
        }
    }

    /// Takes the plaintext, if this payload came from unsealing.
    #[must_use]
    pub fn into_plaintext(self) -> Option<Plaintext> {
        match self {
            Self::Plaintext(plaintext) => Some(plaintext),
            _ => None,
        }
    }
}

/// Non-fatal items of a session stream, and its successful end.
///
/// Fatal errors are delivered as `Err(BiometricError)` items.
#[derive(Debug)]
pub enum Outcome {
    /// The user was authenticated and the operation finished. Always the last item.
    Authenticated {
        /// Operation result.
        payload: Payload,
    },
    /// Transient advice from the sensor. The attempt continues.
    Help {
        /// Platform help code.
        code: i32,
        /// User presentable advice.
        message: String,
    },
    /// A presentation was not recognized. The attempt continues.
    Failed,
}

impl Outcome {
    /// Whether this item ends the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

/// The work a session performs around one authentication attempt.
pub trait Operation: Send {
    /// Whether the sensor has to authenticate the user before [`Operation::on_success`].
    fn requires_sensor(&self) -> bool {
        true
    }

    /// Builds the cipher to bind to the attempt, or `None` for plain authentication.
    ///
    /// Called once, before the sensor is armed.
    ///
    /// # Errors
    ///
    /// Any error ends the session before the sensor is armed.
    fn init_cipher(&mut self) -> BiometricResult<Option<Cipher>>;

    /// Finishes the operation after the user was authenticated.
    ///
    /// # Errors
    ///
    /// Any error ends the session as a fatal error.
    fn on_success(&mut self, result: &AuthResult, cipher: Option<Cipher>)
        -> BiometricResult<Payload>;
}

/// Plain user authentication.
#[derive(Debug, Default)]
pub struct AuthenticateOperation;

impl Operation for AuthenticateOperation {
    fn init_cipher(&mut self) -> BiometricResult<Option<Cipher>> {
        Ok(None)
    }

    fn on_success(
        &mut self,
        _result: &AuthResult,
        _cipher: Option<Cipher>,
    ) -> BiometricResult<Payload> {
        Ok(Payload::None)
    }
}

/// Seals a payload under a named key.
///
/// Symmetric sealing is gated by the sensor; asymmetric sealing only uses the public key.
pub struct SealOperation {
    factory: CipherFactory,
    key_name: String,
    plaintext: Arc<Zeroizing<Vec<u8>>>,
    codec: Arc<dyn Codec>,
}

impl SealOperation {
    /// Creates the operation.
    #[must_use]
    pub fn new(
        factory: CipherFactory,
        key_name: String,
        plaintext: Arc<Zeroizing<Vec<u8>>>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            factory,
            key_name,
            plaintext,
            codec,
        }
    }
}

impl Operation for SealOperation {
    fn requires_sensor(&self) -> bool {
        self.factory.algorithm() == Algorithm::Symmetric
    }

    fn init_cipher(&mut self) -> BiometricResult<Option<Cipher>> {
        self.factory.cipher_for_seal(&self.key_name).map(Some)
    }

    fn on_success(
        &mut self,
        _result: &AuthResult,
        cipher: Option<Cipher>,
    ) -> BiometricResult<Payload> {
        let cipher = cipher
            .ok_or_else(|| BiometricError::CryptoState("no cipher to seal with".to_string()))?;
        let ciphertext = cipher
            .do_final(&self.plaintext)
            .map_err(|err| self.factory.map_final_error(&self.key_name, err))?;
        let iv = cipher.iv().unwrap_or_default();
        if self.factory.algorithm() == Algorithm::Symmetric && iv.is_empty() {
            return Err(BiometricError::CryptoState(
                "cipher did not provide an IV".to_string(),
            ));
        }
        let envelope = Envelope::from_parts(ciphertext, iv);
        Ok(Payload::Envelope(envelope.to_string_with(self.codec.as_ref())))
    }
}

impl fmt::Debug for SealOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealOperation")
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

/// Unseals envelope text under a named key. Always gated by the sensor.
pub struct UnsealOperation {
    factory: CipherFactory,
    key_name: String,
    envelope: String,
    codec: Arc<dyn Codec>,
    ciphertext: Vec<u8>,
}

impl UnsealOperation {
    /// Creates the operation. The envelope is parsed when the cipher is built.
    #[must_use]
    pub fn new(
        factory: CipherFactory,
        key_name: String,
        envelope: String,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            factory,
            key_name,
            envelope,
            codec,
            ciphertext: Vec::new(),
        }
    }
}

impl Operation for UnsealOperation {
    fn init_cipher(&mut self) -> BiometricResult<Option<Cipher>> {
        let codec = self.codec.as_ref();
        let (envelope, iv) = match self.factory.algorithm() {
            Algorithm::Symmetric => {
                let envelope = Envelope::from_string(codec, &self.envelope)?;
                let iv = envelope.iv().to_vec();
                (envelope, Some(iv))
            }
            Algorithm::Asymmetric => (
                Envelope::from_string_allowing_empty_iv(codec, &self.envelope)?,
                None,
            ),
        };
        let cipher = self
            .factory
            .cipher_for_unseal(&self.key_name, iv.as_deref())?;
        self.ciphertext = envelope.ciphertext().to_vec();
        Ok(Some(cipher))
    }

    fn on_success(
        &mut self,
        _result: &AuthResult,
        cipher: Option<Cipher>,
    ) -> BiometricResult<Payload> {
        let cipher = cipher
            .ok_or_else(|| BiometricError::CryptoState("no cipher to unseal with".to_string()))?;
        let bytes = cipher
            .do_final(&self.ciphertext)
            .map_err(|err| self.factory.map_final_error(&self.key_name, err))?;
        Ok(Payload::Plaintext(Plaintext::new(bytes)))
    }
}

impl fmt::Debug for UnsealOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsealOperation")
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

/// Fails every session with a configuration error detected before the session started.
#[derive(Debug)]
pub(crate) struct RejectedOperation {
    message: String,
}

impl RejectedOperation {
    pub(crate) const fn new(message: String) -> Self {
        Self { message }
    }
}

impl Operation for RejectedOperation {
    fn init_cipher(&mut self) -> BiometricResult<Option<Cipher>> {
        Err(BiometricError::Config(self.message.clone()))
    }

    fn on_success(
        &mut self,
        _result: &AuthResult,
        _cipher: Option<Cipher>,
    ) -> BiometricResult<Payload> {
        Err(BiometricError::Config(self.message.clone()))
    }
}
