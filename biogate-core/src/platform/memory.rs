//! In-memory implementations of platform traits for testing.
//!
//! These implementations are NOT secure for production use. Key material lives in process
//! memory and the sensor is driven by hand. They exist to exercise the sealing engine
//! end to end without a device, and to simulate platform failure modes such as key
//! invalidation after a biometric enrollment change.

// Allow certain clippy lints for test-only code
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs8::EncodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use zeroize::Zeroizing;

use super::keystore::{
    CipherMode, CipherRequest, KeyAlgorithm, KeySpec, KeystoreError, KeystoreProvider,
    KeystoreResult, PlatformCipher, Transformation,
};
use super::sensor::{AuthCallbacks, AuthResult, BiometricSensor, CancelToken, CryptoObject, PromptInfo};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const AES_BLOCK_SIZE: usize = 16;
const DEFAULT_RSA_BITS: usize = 2048;

// =============================================================================
// Memory Keystore
// =============================================================================

enum Material {
    Aes(Zeroizing<[u8; 32]>),
    Rsa(Box<RsaPrivateKey>),
}

struct Entry {
    spec: KeySpec,
    material: Arc<Material>,
    /// Shared with every cipher initialized from this entry.
    invalidated: Arc<AtomicBool>,
}

/// In-memory keystore backed by software AES-256-CBC and RSA PKCS#1 v1.5.
///
/// **FOR TESTING ONLY**
///
/// Invalidation is simulated: an invalidated entry refuses to initialize new ciphers with
/// [`KeystoreError::KeyPermanentlyInvalidated`], and ciphers initialized before the
/// invalidation fail `do_final` with [`KeystoreError::IllegalBlockSize`], mirroring how some
/// platform builds report it.
pub struct MemoryKeystore {
    entries: RwLock<HashMap<String, Entry>>,
    generated: Mutex<Vec<KeySpec>>,
    rsa_bits: usize,
}

impl MemoryKeystore {
    /// Creates an empty keystore generating 2048-bit RSA keys by default.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rsa_bits(DEFAULT_RSA_BITS)
    }

    /// Creates an empty keystore with a custom default RSA modulus size.
    #[must_use]
    pub fn with_rsa_bits(rsa_bits: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generated: Mutex::new(Vec::new()),
            rsa_bits,
        }
    }

    /// Every spec passed to [`KeystoreProvider::generate_key`], in order.
    #[must_use]
    pub fn generated_specs(&self) -> Vec<KeySpec> {
        self.generated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Aliases currently stored.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        self.read_entries().keys().cloned().collect()
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Permanently invalidates the entry stored under `alias`.
    ///
    /// Returns `false` if there is no such entry.
    pub fn invalidate(&self, alias: &str) -> bool {
        self.read_entries().get(alias).is_some_and(|entry| {
            entry.invalidated.store(true, Ordering::SeqCst);
            true
        })
    }

    /// Simulates the user adding or removing a biometric credential.
    ///
    /// Every entry created with `invalidated_by_biometric_enrollment` is invalidated.
    /// Returns how many entries were affected.
    pub fn simulate_enrollment_change(&self) -> usize {
        self.read_entries()
            .values()
            .filter(|entry| entry.spec.invalidated_by_biometric_enrollment())
            .map(|entry| entry.invalidated.store(true, Ordering::SeqCst))
            .count()
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn generate_material(&self, spec: &KeySpec) -> KeystoreResult<Material> {
        match spec.algorithm() {
            KeyAlgorithm::Aes => {
                if spec.key_size() != Some(256) {
                    return Err(KeystoreError::InvalidParameter(format!(
                        "unsupported AES key size {:?}",
                        spec.key_size()
                    )));
                }
                let mut key = Zeroizing::new([0u8; 32]);
                OsRng.fill_bytes(&mut *key);
                Ok(Material::Aes(key))
            }
            KeyAlgorithm::Rsa => {
                let bits = spec
                    .key_size()
                    .map_or(self.rsa_bits, |size| size as usize);
                let private = RsaPrivateKey::new(&mut OsRng, bits)
                    .map_err(|err| KeystoreError::Platform(err.to_string()))?;
                Ok(Material::Rsa(Box::new(private)))
            }
        }
    }
}

impl Default for MemoryKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeystoreProvider for MemoryKeystore {
    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool> {
        Ok(self.read_entries().contains_key(alias))
    }

    fn entry_algorithm(&self, alias: &str) -> KeystoreResult<Option<KeyAlgorithm>> {
        Ok(self
            .read_entries()
            .get(alias)
            .map(|entry| entry.spec.algorithm()))
    }

    fn generate_key(&self, spec: &KeySpec) -> KeystoreResult<()> {
        let material = self.generate_material(spec)?;
        self.generated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                spec.alias().to_string(),
                Entry {
                    spec: spec.clone(),
                    material: Arc::new(material),
                    invalidated: Arc::new(AtomicBool::new(false)),
                },
            );
        Ok(())
    }

    fn public_key_der(&self, alias: &str) -> KeystoreResult<Vec<u8>> {
        let entries = self.read_entries();
        let entry = entries
            .get(alias)
            .ok_or_else(|| KeystoreError::KeyNotFound(alias.to_string()))?;
        if entry.invalidated.load(Ordering::SeqCst) {
            return Err(KeystoreError::KeyPermanentlyInvalidated);
        }
        match entry.material.as_ref() {
            Material::Rsa(private) => private
                .to_public_key()
                .to_public_key_der()
                .map(|document| document.as_bytes().to_vec())
                .map_err(|err| KeystoreError::Platform(err.to_string())),
            Material::Aes(_) => Err(KeystoreError::InvalidKey(format!(
                "`{alias}` is a secret key and has no public half"
            ))),
        }
    }

    fn delete_entry(&self, alias: &str) -> KeystoreResult<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(alias);
        Ok(())
    }

    fn init_cipher(&self, request: &CipherRequest<'_>) -> KeystoreResult<Arc<dyn PlatformCipher>> {
        let entries = self.read_entries();
        let entry = entries
            .get(request.alias)
            .ok_or_else(|| KeystoreError::KeyNotFound(request.alias.to_string()))?;
        if entry.invalidated.load(Ordering::SeqCst) {
            return Err(KeystoreError::KeyPermanentlyInvalidated);
        }
        if request.transformation.key_algorithm() != entry.spec.algorithm() {
            return Err(KeystoreError::InvalidKey(format!(
                "`{}` cannot be used with {}",
                request.alias, request.transformation
            )));
        }

        let iv = match (request.transformation, request.mode) {
            (Transformation::AesCbcPkcs7, CipherMode::Encrypt) => {
                if request.iv.is_some() {
                    return Err(KeystoreError::InvalidParameter(
                        "caller-provided IV not permitted when encrypting".to_string(),
                    ));
                }
                let mut iv = [0u8; AES_BLOCK_SIZE];
                OsRng.fill_bytes(&mut iv);
                Some(iv)
            }
            (Transformation::AesCbcPkcs7, CipherMode::Decrypt) => {
                let iv = request.iv.ok_or_else(|| {
                    KeystoreError::InvalidParameter("IV required when decrypting".to_string())
                })?;
                let iv: [u8; AES_BLOCK_SIZE] = iv.try_into().map_err(|_| {
                    KeystoreError::InvalidParameter(format!(
                        "IV must be {AES_BLOCK_SIZE} bytes, got {}",
                        iv.len()
                    ))
                })?;
                Some(iv)
            }
            (Transformation::RsaEcbPkcs1, _) => None,
        };

        Ok(Arc::new(MemoryCipher {
            transformation: request.transformation,
            mode: request.mode,
            material: Arc::clone(&entry.material),
            iv,
            invalidated: Arc::clone(&entry.invalidated),
        }))
    }
}

struct MemoryCipher {
    transformation: Transformation,
    mode: CipherMode,
    material: Arc<Material>,
    iv: Option<[u8; AES_BLOCK_SIZE]>,
    invalidated: Arc<AtomicBool>,
}

impl MemoryCipher {
    fn aes(&self, key: &[u8; 32], input: &[u8]) -> KeystoreResult<Vec<u8>> {
        let iv = self
            .iv
            .ok_or_else(|| KeystoreError::InvalidParameter("cipher has no IV".to_string()))?;
        match self.mode {
            CipherMode::Encrypt => Ok(Aes256CbcEnc::new_from_slices(key, &iv)
                .map_err(|err| KeystoreError::InvalidKey(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(input)),
            CipherMode::Decrypt => {
                if input.is_empty() || input.len() % AES_BLOCK_SIZE != 0 {
                    return Err(KeystoreError::IllegalBlockSize(format!(
                        "input length {} is not a positive multiple of {AES_BLOCK_SIZE}",
                        input.len()
                    )));
                }
                Aes256CbcDec::new_from_slices(key, &iv)
                    .map_err(|err| KeystoreError::InvalidKey(err.to_string()))?
                    .decrypt_padded_vec_mut::<Pkcs7>(input)
                    .map_err(|_| KeystoreError::BadPadding("pad block corrupted".to_string()))
            }
        }
    }

    fn rsa(&self, private: &RsaPrivateKey, input: &[u8]) -> KeystoreResult<Vec<u8>> {
        match self.mode {
            CipherMode::Encrypt => private
                .to_public_key()
                .encrypt(&mut OsRng, Pkcs1v15Encrypt, input)
                .map_err(|err| match err {
                    rsa::Error::MessageTooLong => {
                        KeystoreError::IllegalBlockSize("message too long for RSA".to_string())
                    }
                    other => KeystoreError::Platform(other.to_string()),
                }),
            CipherMode::Decrypt => {
                if input.len() > private.size() {
                    return Err(KeystoreError::IllegalBlockSize(
                        "input longer than the RSA modulus".to_string(),
                    ));
                }
                private
                    .decrypt(Pkcs1v15Encrypt, input)
                    .map_err(|err| KeystoreError::BadPadding(err.to_string()))
            }
        }
    }
}

impl PlatformCipher for MemoryCipher {
    fn transformation(&self) -> Transformation {
        self.transformation
    }

    fn mode(&self) -> CipherMode {
        self.mode
    }

    fn iv(&self) -> Option<Vec<u8>> {
        self.iv.map(|iv| iv.to_vec())
    }

    fn do_final(&self, input: &[u8]) -> KeystoreResult<Vec<u8>> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(KeystoreError::IllegalBlockSize(
                "key invalidated after cipher initialization".to_string(),
            ));
        }
        match self.material.as_ref() {
            Material::Aes(key) => self.aes(key, input),
            Material::Rsa(private) => self.rsa(private, input),
        }
    }
}

// =============================================================================
// Memory Sensor
// =============================================================================

/// One call to [`BiometricSensor::authenticate`] recorded by [`MemorySensor`].
#[derive(Debug, Clone)]
pub struct PendingAuthentication {
    /// Crypto handle the attempt was armed with.
    pub crypto: Option<CryptoObject>,
    /// Cancel token of the attempt.
    pub cancel: CancelToken,
    /// Callbacks of the attempt.
    pub callbacks: AuthCallbacks,
    /// Dialog texts, if any.
    pub prompt: Option<PromptInfo>,
}

/// Sensor driven by hand.
///
/// **FOR TESTING ONLY**. Every `authenticate` call is recorded; the `succeed`, `fail`,
/// `help` and `error` methods report to the most recent attempt that was not canceled.
pub struct MemorySensor {
    hardware_detected: AtomicBool,
    enrolled: AtomicBool,
    permission_granted: AtomicBool,
    requests: Mutex<Vec<PendingAuthentication>>,
}

impl MemorySensor {
    /// Creates an available sensor.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hardware_detected: AtomicBool::new(true),
            enrolled: AtomicBool::new(true),
            permission_granted: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Creates a sensor without hardware.
    #[must_use]
    pub fn without_hardware() -> Self {
        let sensor = Self::new();
        sensor.set_hardware_detected(false);
        sensor
    }

    /// Sets whether hardware is reported present.
    pub fn set_hardware_detected(&self, value: bool) {
        self.hardware_detected.store(value, Ordering::SeqCst);
    }

    /// Sets whether credentials are reported enrolled.
    pub fn set_enrolled(&self, value: bool) {
        self.enrolled.store(value, Ordering::SeqCst);
    }

    /// Sets whether the permission is reported granted.
    pub fn set_permission_granted(&self, value: bool) {
        self.permission_granted.store(value, Ordering::SeqCst);
    }

    /// Number of `authenticate` calls so far.
    #[must_use]
    pub fn arm_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// The most recent `authenticate` call.
    #[must_use]
    pub fn last_request(&self) -> Option<PendingAuthentication> {
        self.lock_requests().last().cloned()
    }

    /// Reports success. Returns `false` if no attempt is active.
    pub fn succeed(&self) -> bool {
        self.deliver(|callbacks| callbacks.succeeded(AuthResult::default()))
    }

    /// Reports an unrecognized presentation. Returns `false` if no attempt is active.
    pub fn fail(&self) -> bool {
        self.deliver(AuthCallbacks::failed)
    }

    /// Reports help text. Returns `false` if no attempt is active.
    pub fn help(&self, code: i32, message: &str) -> bool {
        self.deliver(|callbacks| callbacks.help(code, message))
    }

    /// Reports a fatal error. Returns `false` if no attempt is active.
    pub fn error(&self, code: i32, message: &str) -> bool {
        self.deliver(|callbacks| callbacks.error(code, message))
    }

    fn deliver(&self, report: impl FnOnce(&AuthCallbacks)) -> bool {
        let requests = self.lock_requests();
        let Some(active) = requests
            .iter()
            .rev()
            .find(|request| !request.cancel.is_cancelled())
        else {
            return false;
        };
        report(&active.callbacks);
        true
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<PendingAuthentication>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySensor {
    fn default() -> Self {
        Self::new()
    }
}

impl BiometricSensor for MemorySensor {
    fn is_hardware_detected(&self) -> bool {
        self.hardware_detected.load(Ordering::SeqCst)
    }

    fn has_enrolled_credentials(&self) -> bool {
        self.enrolled.load(Ordering::SeqCst)
    }

    fn is_permission_granted(&self) -> bool {
        self.permission_granted.load(Ordering::SeqCst)
    }

    fn authenticate(
        &self,
        crypto: Option<CryptoObject>,
        cancel: CancelToken,
        callbacks: AuthCallbacks,
        prompt: Option<&PromptInfo>,
    ) {
        self.lock_requests().push(PendingAuthentication {
            crypto,
            cancel,
            callbacks,
            prompt: prompt.cloned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_RSA_BITS: usize = 1024;

    fn decrypt_request<'a>(alias: &'a str, iv: Option<&'a [u8]>) -> CipherRequest<'a> {
        CipherRequest {
            alias,
            transformation: Transformation::AesCbcPkcs7,
            mode: CipherMode::Decrypt,
            iv,
        }
    }

    #[test]
    fn test_aes_round_trip() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("k1", true)).expect("generate");

        let encrypt = keystore
            .init_cipher(&CipherRequest {
                alias: "k1",
                transformation: Transformation::AesCbcPkcs7,
                mode: CipherMode::Encrypt,
                iv: None,
            })
            .expect("init encrypt");
        let iv = encrypt.iv().expect("iv");
        assert_eq!(iv.len(), AES_BLOCK_SIZE);
        let ciphertext = encrypt.do_final(b"hello").expect("encrypt");
        assert_eq!(ciphertext.len(), AES_BLOCK_SIZE);

        let decrypt = keystore
            .init_cipher(&decrypt_request("k1", Some(&iv)))
            .expect("init decrypt");
        assert_eq!(decrypt.do_final(&ciphertext).expect("decrypt"), b"hello");
    }

    #[test]
    fn test_aes_decrypt_requires_iv() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("k1", true)).expect("generate");
        match keystore.init_cipher(&decrypt_request("k1", None)) {
            Err(KeystoreError::InvalidParameter(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
        match keystore.init_cipher(&decrypt_request("k1", Some(&[0u8; 3]))) {
            Err(KeystoreError::InvalidParameter(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_aes_decrypt_rejects_partial_block() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("k1", true)).expect("generate");
        let cipher = keystore
            .init_cipher(&decrypt_request("k1", Some(&[0u8; AES_BLOCK_SIZE])))
            .expect("init");
        assert!(matches!(
            cipher.do_final(&[1, 2, 3]),
            Err(KeystoreError::IllegalBlockSize(_))
        ));
    }

    #[test]
    fn test_invalidation_before_and_after_init() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("k1", true)).expect("generate");
        let cipher = keystore
            .init_cipher(&CipherRequest {
                alias: "k1",
                transformation: Transformation::AesCbcPkcs7,
                mode: CipherMode::Encrypt,
                iv: None,
            })
            .expect("init");

        assert!(keystore.invalidate("k1"));
        assert!(!keystore.invalidate("missing"));
        assert!(matches!(
            cipher.do_final(b"data"),
            Err(KeystoreError::IllegalBlockSize(_))
        ));
        match keystore.init_cipher(&decrypt_request("k1", Some(&[0u8; AES_BLOCK_SIZE]))) {
            Err(KeystoreError::KeyPermanentlyInvalidated) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_enrollment_change_respects_spec_flag() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("bound", true)).expect("generate");
        keystore.generate_key(&KeySpec::aes("free", false)).expect("generate");

        assert_eq!(keystore.simulate_enrollment_change(), 1);
        assert!(keystore
            .init_cipher(&decrypt_request("free", Some(&[0u8; AES_BLOCK_SIZE])))
            .is_ok());
    }

    #[test]
    fn test_rsa_public_key_and_decrypt() {
        use rsa::pkcs8::DecodePublicKey;

        let keystore = MemoryKeystore::with_rsa_bits(TEST_RSA_BITS);
        keystore.generate_key(&KeySpec::rsa("pair", true)).expect("generate");
        assert_eq!(keystore.entry_algorithm("pair").expect("query"), Some(KeyAlgorithm::Rsa));

        let der = keystore.public_key_der("pair").expect("public key");
        let public = rsa::RsaPublicKey::from_public_key_der(&der).expect("parse");
        let ciphertext = public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, b"secret")
            .expect("encrypt");

        let cipher = keystore
            .init_cipher(&CipherRequest {
                alias: "pair",
                transformation: Transformation::RsaEcbPkcs1,
                mode: CipherMode::Decrypt,
                iv: None,
            })
            .expect("init");
        assert!(cipher.iv().is_none());
        assert_eq!(cipher.do_final(&ciphertext).expect("decrypt"), b"secret");
    }

    #[test]
    fn test_transformation_must_match_key() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("k1", true)).expect("generate");
        match keystore.init_cipher(&CipherRequest {
            alias: "k1",
            transformation: Transformation::RsaEcbPkcs1,
            mode: CipherMode::Decrypt,
            iv: None,
        }) {
            Err(KeystoreError::InvalidKey(_)) => {}
            Err(err) => panic!("unexpected error: {err}"),
            Ok(_) => panic!("expected error"),
        }
        assert!(matches!(
            keystore.public_key_der("k1"),
            Err(KeystoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_delete_entry() {
        let keystore = MemoryKeystore::new();
        keystore.generate_key(&KeySpec::aes("k1", true)).expect("generate");
        assert_eq!(keystore.len(), 1);
        keystore.delete_entry("k1").expect("delete");
        keystore.delete_entry("k1").expect("delete twice");
        assert!(keystore.is_empty());
        assert!(!keystore.contains_alias("k1").expect("query"));
    }

    #[test]
    fn test_sensor_delivers_to_latest_active_attempt() {
        let sensor = MemorySensor::new();
        assert!(!sensor.succeed());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callbacks = AuthCallbacks::new(uuid::Uuid::new_v4(), tx);
        let cancel = CancelToken::new();
        sensor.authenticate(None, cancel.clone(), callbacks, None);
        assert_eq!(sensor.arm_count(), 1);

        assert!(sensor.help(1, "Move finger"));
        assert!(matches!(
            rx.try_recv(),
            Ok(super::super::SensorEvent::Help { code: 1, .. })
        ));

        cancel.cancel();
        assert!(!sensor.fail());
        assert!(sensor.last_request().expect("request").cancel.is_cancelled());
    }
}
