//! Named keys in the platform keystore.
//!
//! The vault is the only place key specs are built, so every key it creates requires user
//! authentication before use.

use std::fmt;
use std::sync::Arc;

use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;

use crate::config::Policy;
use crate::error::{BiometricError, BiometricResult};
use crate::platform::{
    CipherRequest, KeyAlgorithm, KeySpec, KeystoreError, KeystoreProvider, PlatformCipher,
};

/// Key creation options taken from the [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Whether biometric enrollment changes invalidate the key, where supported.
    pub invalidated_by_biometric_enrollment: bool,
}

impl From<&Policy> for KeyPolicy {
    fn from(policy: &Policy) -> Self {
        Self {
            invalidated_by_biometric_enrollment: policy.invalidate_on_enrollment(),
        }
    }
}

/// Reference to an AES key held by the keystore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyHandle {
    alias: String,
}

impl SecretKeyHandle {
    /// Alias of the key.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Reference to the private half of an RSA key pair held by the keystore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyHandle {
    alias: String,
}

impl PrivateKeyHandle {
    /// Alias of the key pair.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// An RSA key pair: the exported public key and a handle to the private key.
#[derive(Debug, Clone)]
pub struct KeyPairHandle {
    /// Public key, usable without authentication.
    pub public: RsaPublicKey,
    /// Private key; every use requires authentication.
    pub private: PrivateKeyHandle,
}

/// Access to named keys in a [`KeystoreProvider`].
#[derive(Clone)]
pub struct KeyVault {
    keystore: Arc<dyn KeystoreProvider>,
}

impl KeyVault {
    /// Wraps a platform keystore.
    #[must_use]
    pub fn new(keystore: Arc<dyn KeystoreProvider>) -> Self {
        Self { keystore }
    }

    /// Whether a key named `name` exists.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Crypto`] if the keystore cannot be queried.
    pub fn exists(&self, name: &str) -> BiometricResult<bool> {
        self.keystore
            .contains_alias(name)
            .map_err(BiometricError::Crypto)
    }

    /// Looks up the AES key `name`.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::KeyNotFound`] if there is no such key and
    /// [`BiometricError::Crypto`] if `name` holds a key pair.
    pub fn get_symmetric(&self, name: &str) -> BiometricResult<SecretKeyHandle> {
        self.expect_algorithm(name, KeyAlgorithm::Aes)?;
        Ok(SecretKeyHandle {
            alias: name.to_string(),
        })
    }

    /// Looks up the RSA key pair `name` and exports its public key.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::KeyNotFound`] if there is no such pair, and
    /// [`BiometricError::Crypto`] if `name` holds a secret key or the pair was invalidated.
    pub fn get_asymmetric(&self, name: &str) -> BiometricResult<KeyPairHandle> {
        self.expect_algorithm(name, KeyAlgorithm::Rsa)?;
        let der = self
            .keystore
            .public_key_der(name)
            .map_err(BiometricError::Crypto)?;
        let public = RsaPublicKey::from_public_key_der(&der).map_err(|err| {
            BiometricError::Crypto(KeystoreError::InvalidKey(format!(
                "malformed public key for `{name}`: {err}"
            )))
        })?;
        Ok(KeyPairHandle {
            public,
            private: PrivateKeyHandle {
                alias: name.to_string(),
            },
        })
    }

    /// Creates an AES-256 key restricted to CBC with PKCS#7 padding.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Crypto`] if key generation fails.
    pub fn create_symmetric(
        &self,
        name: &str,
        policy: &KeyPolicy,
    ) -> BiometricResult<SecretKeyHandle> {
        self.generate(&KeySpec::aes(name, policy.invalidated_by_biometric_enrollment))?;
        Ok(SecretKeyHandle {
            alias: name.to_string(),
        })
    }

    /// Creates an RSA key pair restricted to ECB with PKCS#1 padding.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Crypto`] if key generation or the public key export fails.
    pub fn create_asymmetric(
        &self,
        name: &str,
        policy: &KeyPolicy,
    ) -> BiometricResult<KeyPairHandle> {
        self.generate(&KeySpec::rsa(name, policy.invalidated_by_biometric_enrollment))?;
        self.get_asymmetric(name)
    }

    /// Returns the AES key `name`, creating it if there is none.
    ///
    /// # Errors
    ///
    /// See [`KeyVault::get_symmetric`] and [`KeyVault::create_symmetric`].
    pub fn find_or_create_symmetric(
        &self,
        name: &str,
        policy: &KeyPolicy,
    ) -> BiometricResult<SecretKeyHandle> {
        match self.get_symmetric(name) {
            Err(BiometricError::KeyNotFound(_)) => self.create_symmetric(name, policy),
            found => found,
        }
    }

    /// Returns the RSA key pair `name`, creating it if there is none.
    ///
    /// # Errors
    ///
    /// See [`KeyVault::get_asymmetric`] and [`KeyVault::create_asymmetric`].
    pub fn find_or_create_asymmetric(
        &self,
        name: &str,
        policy: &KeyPolicy,
    ) -> BiometricResult<KeyPairHandle> {
        match self.get_asymmetric(name) {
            Err(BiometricError::KeyNotFound(_)) => self.create_asymmetric(name, policy),
            found => found,
        }
    }

    /// Deletes the key `name`. Deleting a missing key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Crypto`] if the key exists but cannot be deleted.
    pub fn delete(&self, name: &str) -> BiometricResult<()> {
        if !self.exists(name)? {
            return Ok(());
        }
        tracing::debug!(key = name, "deleting key");
        self.keystore
            .delete_entry(name)
            .map_err(BiometricError::Crypto)
    }

    pub(crate) fn init_cipher(
        &self,
        request: &CipherRequest<'_>,
    ) -> BiometricResult<Arc<dyn PlatformCipher>> {
        self.keystore
            .init_cipher(request)
            .map_err(BiometricError::Crypto)
    }

    fn expect_algorithm(&self, name: &str, expected: KeyAlgorithm) -> BiometricResult<()> {
        match self
            .keystore
            .entry_algorithm(name)
            .map_err(BiometricError::Crypto)?
        {
            None => Err(BiometricError::KeyNotFound(name.to_string())),
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(BiometricError::Crypto(KeystoreError::InvalidKey(format!(
                "`{name}` holds a {found:?} key, expected {expected:?}"
            )))),
        }
    }

    fn generate(&self, spec: &KeySpec) -> BiometricResult<()> {
        tracing::debug!(key = spec.alias(), algorithm = ?spec.algorithm(), "generating key");
        self.keystore
            .generate_key(spec)
            .map_err(BiometricError::Crypto)
    }
}

impl fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVault").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryKeystore;

    const POLICY: KeyPolicy = KeyPolicy {
        invalidated_by_biometric_enrollment: true,
    };

    fn vault() -> (Arc<MemoryKeystore>, KeyVault) {
        let keystore = Arc::new(MemoryKeystore::with_rsa_bits(1024));
        let vault = KeyVault::new(keystore.clone());
        (keystore, vault)
    }

    #[test]
    fn test_missing_keys_are_not_found() {
        let (_, vault) = vault();
        assert!(!vault.exists("k1").expect("query"));
        assert!(matches!(
            vault.get_symmetric("k1"),
            Err(BiometricError::KeyNotFound(name)) if name == "k1"
        ));
        assert!(matches!(
            vault.get_asymmetric("k1"),
            Err(BiometricError::KeyNotFound(_))
        ));
    }

    #[test]
    fn test_find_or_create_reuses_existing_key() {
        let (keystore, vault) = vault();
        let first = vault.find_or_create_symmetric("k1", &POLICY).expect("create");
        let second = vault.find_or_create_symmetric("k1", &POLICY).expect("reuse");
        assert_eq!(first, second);
        assert_eq!(keystore.generated_specs().len(), 1);
    }

    #[test]
    fn test_created_keys_require_user_authentication() {
        let (keystore, vault) = vault();
        vault.create_symmetric("aes", &POLICY).expect("aes");
        vault
            .create_asymmetric(
                "rsa",
                &KeyPolicy {
                    invalidated_by_biometric_enrollment: false,
                },
            )
            .expect("rsa");

        let specs = keystore.generated_specs();
        assert_eq!(specs.len(), 2);
        assert!(specs.iter().all(KeySpec::user_authentication_required));
        assert!(specs[0].invalidated_by_biometric_enrollment());
        assert!(!specs[1].invalidated_by_biometric_enrollment());
    }

    #[test]
    fn test_wrong_algorithm_is_a_crypto_error() {
        let (_, vault) = vault();
        vault.create_symmetric("k1", &POLICY).expect("create");
        assert!(matches!(
            vault.find_or_create_asymmetric("k1", &POLICY),
            Err(BiometricError::Crypto(KeystoreError::InvalidKey(_)))
        ));
    }

    #[test]
    fn test_invalidated_pair_surfaces_platform_signal() {
        let (keystore, vault) = vault();
        vault.create_asymmetric("k1", &POLICY).expect("create");
        keystore.invalidate("k1");
        assert!(matches!(
            vault.get_asymmetric("k1"),
            Err(BiometricError::Crypto(KeystoreError::KeyPermanentlyInvalidated))
        ));
    }

    #[test]
    fn test_delete_is_a_no_op_when_absent() {
        let (keystore, vault) = vault();
        vault.delete("missing").expect("no-op");
        vault.create_symmetric("k1", &POLICY).expect("create");
        vault.delete("k1").expect("delete");
        assert!(keystore.is_empty());
    }
}
