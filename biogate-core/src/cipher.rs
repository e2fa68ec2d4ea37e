//! Cipher construction with the key invalidation recovery rules.

use std::fmt;
use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

use crate::config::{Algorithm, Policy};
use crate::error::{BiometricError, BiometricResult};
use crate::logger::Logger;
use crate::platform::{
    CipherMode, CipherRequest, CryptoObject, KeystoreError, KeystoreResult, PlatformCipher,
    Transformation,
};
use crate::vault::{KeyPolicy, KeyVault};

enum CipherInner {
    Platform(Arc<dyn PlatformCipher>),
    RsaPublic(RsaPublicKey),
}

/// An initialized cipher, ready for its single final operation.
pub struct Cipher {
    inner: CipherInner,
}

impl Cipher {
    fn platform(cipher: Arc<dyn PlatformCipher>) -> Self {
        Self {
            inner: CipherInner::Platform(cipher),
        }
    }

    fn rsa_public(key: RsaPublicKey) -> Self {
        Self {
            inner: CipherInner::RsaPublic(key),
        }
    }

    /// Transformation the cipher runs.
    #[must_use]
    pub fn transformation(&self) -> Transformation {
        match &self.inner {
            CipherInner::Platform(cipher) => cipher.transformation(),
            CipherInner::RsaPublic(_) => Transformation::RsaEcbPkcs1,
        }
    }

    /// Direction the cipher was initialized for.
    #[must_use]
    pub fn mode(&self) -> CipherMode {
        match &self.inner {
            CipherInner::Platform(cipher) => cipher.mode(),
            CipherInner::RsaPublic(_) => CipherMode::Encrypt,
        }
    }

    /// IV in use. `None` for RSA.
    #[must_use]
    pub fn iv(&self) -> Option<Vec<u8>> {
        match &self.inner {
            CipherInner::Platform(cipher) => cipher.iv(),
            CipherInner::RsaPublic(_) => None,
        }
    }

    /// Handle the sensor authorizes. `None` for public key encryption, which is not gated.
    #[must_use]
    pub fn crypto_object(&self) -> Option<CryptoObject> {
        match &self.inner {
            CipherInner::Platform(cipher) => Some(CryptoObject::new(Arc::clone(cipher))),
            CipherInner::RsaPublic(_) => None,
        }
    }

    /// Runs the final operation over `input`.
    ///
    /// # Errors
    ///
    /// Returns the platform error unchanged. Public key encryption of an input too long
    /// for the modulus fails with [`KeystoreError::InvalidParameter`].
    pub fn do_final(&self, input: &[u8]) -> KeystoreResult<Vec<u8>> {
        match &self.inner {
            CipherInner::Platform(cipher) => cipher.do_final(input),
            CipherInner::RsaPublic(key) => key
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, input)
                .map_err(|err| match err {
                    rsa::Error::MessageTooLong => KeystoreError::InvalidParameter(
                        "payload too long for the RSA key".to_string(),
                    ),
                    other => KeystoreError::Platform(other.to_string()),
                }),
        }
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("transformation", &self.transformation())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Builds ciphers for sealing and unsealing under named keys.
#[derive(Clone)]
pub struct CipherFactory {
    vault: KeyVault,
    algorithm: Algorithm,
    key_policy: KeyPolicy,
    logger: Arc<dyn Logger>,
}

impl CipherFactory {
    /// Creates a factory following `policy`.
    #[must_use]
    pub fn new(vault: KeyVault, policy: &Policy) -> Self {
        Self {
            vault,
            algorithm: policy.algorithm(),
            key_policy: KeyPolicy::from(policy),
            logger: Arc::clone(policy.logger()),
        }
    }

    /// Algorithm the factory builds ciphers for.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The vault keys are looked up in.
    #[must_use]
    pub const fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Initializes an encrypting cipher under `key_name`, creating the key if needed.
    ///
    /// AES ciphers get a fresh IV chosen by the platform. RSA ciphers use the exported
    /// public key. A key the platform reports as permanently invalidated is deleted and
    /// the initialization retried once.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::KeyInvalidated`] if the retry meets an invalidated key
    /// again, and the underlying error for any other failure.
    pub fn cipher_for_seal(&self, key_name: &str) -> BiometricResult<Cipher> {
        match self.init_for_seal(key_name) {
            Err(err) if is_permanently_invalidated(&err) => {
                self.logger.warn("Renewing invalidated key.");
                self.vault.delete(key_name)?;
                self.init_for_seal(key_name)
                    .map_err(|err| invalidated_as_key_error(key_name, err))
            }
            result => result,
        }
    }

    /// Initializes a decrypting cipher under the existing key `key_name`.
    ///
    /// `iv` is required for AES and ignored for RSA. Keys are never created or deleted here.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::KeyNotFound`] if the key does not exist,
    /// [`BiometricError::KeyInvalidated`] if it was invalidated, and
    /// [`BiometricError::CryptoState`] if an AES IV is missing.
    pub fn cipher_for_unseal(&self, key_name: &str, iv: Option<&[u8]>) -> BiometricResult<Cipher> {
        self.init_for_unseal(key_name, iv)
            .map_err(|err| invalidated_as_key_error(key_name, err))
    }

    /// Maps an error raised by a final cipher operation under `key_name`.
    ///
    /// Some platform builds report a key invalidated after initialization as an illegal
    /// block size. With invalidation on enrollment active, that error is checked against
    /// the keystore: if the key no longer initializes it is deleted and the error becomes
    /// [`BiometricError::KeyInvalidated`]. Otherwise the input was malformed and the key
    /// is left alone.
    pub fn map_final_error(&self, key_name: &str, err: KeystoreError) -> BiometricError {
        match err {
            KeystoreError::IllegalBlockSize(_)
                if self.key_policy.invalidated_by_biometric_enrollment
                    && self.is_invalidated(key_name) =>
            {
                self.logger.warn("Removing invalidated key.");
                if let Err(delete_err) = self.vault.delete(key_name) {
                    self.logger
                        .error("Could not delete invalidated key.", Some(&delete_err));
                }
                BiometricError::KeyInvalidated {
                    key_name: key_name.to_string(),
                }
            }
            KeystoreError::KeyPermanentlyInvalidated => BiometricError::KeyInvalidated {
                key_name: key_name.to_string(),
            },
            other => BiometricError::Crypto(other),
        }
    }

    /// Whether the keystore refuses to initialize `key_name` because it was invalidated.
    fn is_invalidated(&self, key_name: &str) -> bool {
        let (transformation, mode) = match self.algorithm {
            Algorithm::Symmetric => (Transformation::AesCbcPkcs7, CipherMode::Encrypt),
            Algorithm::Asymmetric => (Transformation::RsaEcbPkcs1, CipherMode::Decrypt),
        };
        let probe = self.vault.init_cipher(&CipherRequest {
            alias: key_name,
            transformation,
            mode,
            iv: None,
        });
        matches!(probe, Err(ref err) if is_permanently_invalidated(err))
    }

    fn init_for_seal(&self, key_name: &str) -> BiometricResult<Cipher> {
        match self.algorithm {
            Algorithm::Symmetric => {
                let key = self
                    .vault
                    .find_or_create_symmetric(key_name, &self.key_policy)?;
                let cipher = self.vault.init_cipher(&CipherRequest {
                    alias: key.alias(),
                    transformation: Transformation::AesCbcPkcs7,
                    mode: CipherMode::Encrypt,
                    iv: None,
                })?;
                Ok(Cipher::platform(cipher))
            }
            Algorithm::Asymmetric => {
                let pair = self
                    .vault
                    .find_or_create_asymmetric(key_name, &self.key_policy)?;
                Ok(Cipher::rsa_public(pair.public))
            }
        }
    }

    fn init_for_unseal(&self, key_name: &str, iv: Option<&[u8]>) -> BiometricResult<Cipher> {
        let cipher = match self.algorithm {
            Algorithm::Symmetric => {
                let key = self.vault.get_symmetric(key_name)?;
                let iv = iv.filter(|iv| !iv.is_empty()).ok_or_else(|| {
                    BiometricError::CryptoState("an IV is required to unseal".to_string())
                })?;
                self.vault.init_cipher(&CipherRequest {
                    alias: key.alias(),
                    transformation: Transformation::AesCbcPkcs7,
                    mode: CipherMode::Decrypt,
                    iv: Some(iv),
                })?
            }
            Algorithm::Asymmetric => {
                let pair = self.vault.get_asymmetric(key_name)?;
                self.vault.init_cipher(&CipherRequest {
                    alias: pair.private.alias(),
                    transformation: Transformation::RsaEcbPkcs1,
                    mode: CipherMode::Decrypt,
                    iv: None,
                })?
            }
        };
        Ok(Cipher::platform(cipher))
    }
}

impl fmt::Debug for CipherFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherFactory")
            .field("algorithm", &self.algorithm)
            .field("key_policy", &self.key_policy)
            .finish_non_exhaustive()
    }
}

const fn is_permanently_invalidated(err: &BiometricError) -> bool {
    matches!(err, BiometricError::Crypto(inner) if inner.is_permanently_invalidated())
}

fn invalidated_as_key_error(key_name: &str, err: BiometricError) -> BiometricError {
    if is_permanently_invalidated(&err) {
        BiometricError::KeyInvalidated {
            key_name: key_name.to_string(),
        }
    } else {
        err
    }
}
