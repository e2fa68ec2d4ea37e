//! Hardware-backed keystore trait.
//!
//! The keystore owns key material that never leaves the device. The engine only ever
//! refers to keys by alias and asks the keystore for initialized ciphers.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for keystore operations.
pub type KeystoreResult<T> = Result<T, KeystoreError>;

/// Errors raised by a [`KeystoreProvider`] or a [`PlatformCipher`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeystoreError {
    /// The key can no longer be used, e.g. after a biometric enrollment change or the
    /// removal of the device lock screen.
    #[error("key permanently invalidated")]
    KeyPermanentlyInvalidated,

    /// No entry with the alias exists.
    #[error("no keystore entry for alias `{0}`")]
    KeyNotFound(String),

    /// Input length is not valid for the cipher.
    #[error("illegal block size: {0}")]
    IllegalBlockSize(String),

    /// Padding check failed while decrypting.
    #[error("bad padding: {0}")]
    BadPadding(String),

    /// The key does not fit the requested transformation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid algorithm parameters (e.g. a malformed IV).
    #[error("invalid algorithm parameter: {0}")]
    InvalidParameter(String),

    /// Any other platform failure.
    #[error("keystore failure: {0}")]
    Platform(String),
}

impl KeystoreError {
    /// Returns `true` for [`KeystoreError::KeyPermanentlyInvalidated`].
    #[must_use]
    pub const fn is_permanently_invalidated(&self) -> bool {
        matches!(self, Self::KeyPermanentlyInvalidated)
    }
}

/// Algorithm of a stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    /// Symmetric AES key.
    Aes,
    /// Asymmetric RSA key pair.
    Rsa,
}

/// Operations a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    /// Encryption.
    Encrypt,
    /// Decryption.
    Decrypt,
}

/// Block mode a key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockMode {
    /// Cipher block chaining.
    Cbc,
    /// Electronic codebook (the only mode RSA exposes).
    Ecb,
}

/// Encryption padding a key is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionPadding {
    /// PKCS#7 padding for block ciphers.
    Pkcs7,
    /// PKCS#1 v1.5 encryption padding for RSA.
    RsaPkcs1,
}

/// Direction a cipher is initialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    /// Encrypt mode.
    Encrypt,
    /// Decrypt mode.
    Decrypt,
}

/// The full cipher transformation requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transformation {
    /// `AES/CBC/PKCS7Padding`
    AesCbcPkcs7,
    /// `RSA/ECB/PKCS1Padding`
    RsaEcbPkcs1,
}

impl Transformation {
    /// Platform transformation string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AesCbcPkcs7 => "AES/CBC/PKCS7Padding",
            Self::RsaEcbPkcs1 => "RSA/ECB/PKCS1Padding",
        }
    }

    /// Algorithm of the key this transformation needs.
    #[must_use]
    pub const fn key_algorithm(self) -> KeyAlgorithm {
        match self {
            Self::AesCbcPkcs7 => KeyAlgorithm::Aes,
            Self::RsaEcbPkcs1 => KeyAlgorithm::Rsa,
        }
    }
}

impl fmt::Display for Transformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const AES_KEY_SIZE: u32 = 256;
const KEY_PURPOSES: [KeyPurpose; 2] = [KeyPurpose::Encrypt, KeyPurpose::Decrypt];

/// Parameters for generating a key.
///
/// Specs can only be built inside this crate, and every one of them requires user
/// authentication before the key can be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    alias: String,
    algorithm: KeyAlgorithm,
    key_size: Option<u32>,
    block_mode: BlockMode,
    padding: EncryptionPadding,
    user_authentication_required: bool,
    invalidated_by_biometric_enrollment: bool,
}

impl KeySpec {
    pub(crate) fn aes(alias: &str, invalidated_by_biometric_enrollment: bool) -> Self {
        Self {
            alias: alias.to_string(),
            algorithm: KeyAlgorithm::Aes,
            key_size: Some(AES_KEY_SIZE),
            block_mode: BlockMode::Cbc,
            padding: EncryptionPadding::Pkcs7,
            user_authentication_required: true,
            invalidated_by_biometric_enrollment,
        }
    }

    pub(crate) fn rsa(alias: &str, invalidated_by_biometric_enrollment: bool) -> Self {
        Self {
            alias: alias.to_string(),
            algorithm: KeyAlgorithm::Rsa,
            key_size: None,
            block_mode: BlockMode::Ecb,
            padding: EncryptionPadding::RsaPkcs1,
            user_authentication_required: true,
            invalidated_by_biometric_enrollment,
        }
    }

    /// Alias the key is stored under.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Key algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Key size in bits; `None` selects the platform default.
    #[must_use]
    pub const fn key_size(&self) -> Option<u32> {
        self.key_size
    }

    /// Operations the key may be used for.
    #[must_use]
    pub const fn purposes(&self) -> &'static [KeyPurpose] {
        &KEY_PURPOSES
    }

    /// The only block mode the key may be used with.
    #[must_use]
    pub const fn block_mode(&self) -> BlockMode {
        self.block_mode
    }

    /// The only padding the key may be used with.
    #[must_use]
    pub const fn padding(&self) -> EncryptionPadding {
        self.padding
    }

    /// Whether every use of the key requires user authentication. Always `true`.
    #[must_use]
    pub const fn user_authentication_required(&self) -> bool {
        self.user_authentication_required
    }

    /// Whether enrolling or removing biometrics invalidates the key, where supported.
    #[must_use]
    pub const fn invalidated_by_biometric_enrollment(&self) -> bool {
        self.invalidated_by_biometric_enrollment
    }

    /// Transformation the key is meant for.
    #[must_use]
    pub const fn transformation(&self) -> Transformation {
        match self.algorithm {
            KeyAlgorithm::Aes => Transformation::AesCbcPkcs7,
            KeyAlgorithm::Rsa => Transformation::RsaEcbPkcs1,
        }
    }
}

/// Arguments for [`KeystoreProvider::init_cipher`].
#[derive(Debug, Clone, Copy)]
pub struct CipherRequest<'a> {
    /// Alias of the key to bind.
    pub alias: &'a str,
    /// Transformation to initialize.
    pub transformation: Transformation,
    /// Encrypt or decrypt.
    pub mode: CipherMode,
    /// IV for decryption. Must be `None` when encrypting with AES, the platform
    /// chooses a fresh IV.
    pub iv: Option<&'a [u8]>,
}

/// A cipher initialized by the keystore.
///
/// On platforms that gate keys behind user authentication, `do_final` only succeeds
/// after the sensor authenticated the user against this cipher's [`CryptoObject`].
///
/// [`CryptoObject`]: super::CryptoObject
pub trait PlatformCipher: Send + Sync {
    /// Transformation the cipher was initialized with.
    fn transformation(&self) -> Transformation;

    /// Direction the cipher was initialized for.
    fn mode(&self) -> CipherMode;

    /// IV in use, if the transformation has one. Chosen by the platform when encrypting.
    fn iv(&self) -> Option<Vec<u8>>;

    /// Runs the single-part operation over `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is malformed, padding is invalid, or the key has been
    /// invalidated since initialization.
    fn do_final(&self, input: &[u8]) -> KeystoreResult<Vec<u8>>;
}

/// Hardware-backed key storage.
///
/// Implementations should use non-exportable keys:
/// - Android: `AndroidKeyStore`
/// - iOS: Secure Enclave / Keychain
///
/// Only public keys of key pairs may leave the keystore.
pub trait KeystoreProvider: Send + Sync {
    /// Whether an entry with `alias` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore cannot be queried.
    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool>;

    /// Algorithm of the entry stored under `alias`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the keystore cannot be queried.
    fn entry_algorithm(&self, alias: &str) -> KeystoreResult<Option<KeyAlgorithm>>;

    /// Generates a key (or key pair) as described by `spec`, replacing any entry with the
    /// same alias.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    fn generate_key(&self, spec: &KeySpec) -> KeystoreResult<()>;

    /// DER encoded `SubjectPublicKeyInfo` of the RSA key pair stored under `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::KeyNotFound`] if there is no such key pair, or
    /// [`KeystoreError::KeyPermanentlyInvalidated`] if the pair was invalidated.
    fn public_key_der(&self, alias: &str) -> KeystoreResult<Vec<u8>>;

    /// Deletes the entry stored under `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be deleted.
    fn delete_entry(&self, alias: &str) -> KeystoreResult<()>;

    /// Initializes a cipher bound to the key stored under `request.alias`.
    ///
    /// # Errors
    ///
    /// Returns [`KeystoreError::KeyPermanentlyInvalidated`] if the key was invalidated,
    /// and other variants for missing keys or bad parameters.
    fn init_cipher(&self, request: &CipherRequest<'_>) -> KeystoreResult<Arc<dyn PlatformCipher>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_specs_require_user_authentication() {
        let aes = KeySpec::aes("k1", true);
        assert!(aes.user_authentication_required());
        assert_eq!(aes.key_size(), Some(256));
        assert_eq!(aes.block_mode(), BlockMode::Cbc);
        assert_eq!(aes.padding(), EncryptionPadding::Pkcs7);
        assert_eq!(aes.transformation(), Transformation::AesCbcPkcs7);

        let rsa = KeySpec::rsa("k2", false);
        assert!(rsa.user_authentication_required());
        assert_eq!(rsa.key_size(), None);
        assert_eq!(rsa.block_mode(), BlockMode::Ecb);
        assert!(!rsa.invalidated_by_biometric_enrollment());
        assert_eq!(rsa.purposes(), &[KeyPurpose::Encrypt, KeyPurpose::Decrypt]);
    }

    #[test]
    fn test_transformation_strings() {
        assert_eq!(Transformation::AesCbcPkcs7.to_string(), "AES/CBC/PKCS7Padding");
        assert_eq!(Transformation::RsaEcbPkcs1.as_str(), "RSA/ECB/PKCS1Padding");
        assert_eq!(Transformation::RsaEcbPkcs1.key_algorithm(), KeyAlgorithm::Rsa);
    }
}
