#![allow(dead_code, missing_docs)]

//! Common test utilities shared across integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use biogate_core::platform::{
    CipherRequest, KeyAlgorithm, KeySpec, KeystoreError, KeystoreProvider, KeystoreResult,
    MemoryKeystore, MemorySensor, PlatformCipher,
};
use biogate_core::{
    Algorithm, Biogate, BiometricResult, Logger, Outcome, PolicyBuilder, Subscription,
};
use futures::{FutureExt, StreamExt};

pub const HOST: &str = "com.example.app";
pub const TEST_RSA_BITS: usize = 1024;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Keystore recording every deletion, optionally refusing them.
pub struct SpyKeystore {
    inner: MemoryKeystore,
    deleted: Mutex<Vec<String>>,
    refuse_deletes: AtomicBool,
}

impl SpyKeystore {
    pub fn new() -> Self {
        Self {
            inner: MemoryKeystore::with_rsa_bits(TEST_RSA_BITS),
            deleted: Mutex::new(Vec::new()),
            refuse_deletes: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryKeystore {
        &self.inner
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn refuse_deletes(&self) {
        self.refuse_deletes.store(true, Ordering::SeqCst);
    }
}

impl Default for SpyKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeystoreProvider for SpyKeystore {
    fn contains_alias(&self, alias: &str) -> KeystoreResult<bool> {
        self.inner.contains_alias(alias)
    }

    fn entry_algorithm(&self, alias: &str) -> KeystoreResult<Option<KeyAlgorithm>> {
        self.inner.entry_algorithm(alias)
    }

    fn generate_key(&self, spec: &KeySpec) -> KeystoreResult<()> {
        self.inner.generate_key(spec)
    }

    fn public_key_der(&self, alias: &str) -> KeystoreResult<Vec<u8>> {
        self.inner.public_key_der(alias)
    }

    fn delete_entry(&self, alias: &str) -> KeystoreResult<()> {
        self.deleted.lock().unwrap().push(alias.to_string());
        if self.refuse_deletes.load(Ordering::SeqCst) {
            return Err(KeystoreError::Platform("delete refused".to_string()));
        }
        self.inner.delete_entry(alias)
    }

    fn init_cipher(&self, request: &CipherRequest<'_>) -> KeystoreResult<Arc<dyn PlatformCipher>> {
        self.inner.init_cipher(request)
    }
}

#[derive(Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<String>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl Logger for RecordingLogger {
    fn warn(&self, message: &str) {
        self.lines.lock().unwrap().push(format!("warn: {message}"));
    }

    fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        let line = match cause {
            Some(cause) => format!("error: {message} ({cause})"),
            None => format!("error: {message}"),
        };
        self.lines.lock().unwrap().push(line);
    }
}

pub struct Harness {
    pub keystore: Arc<SpyKeystore>,
    pub sensor: Arc<MemorySensor>,
    pub logger: Arc<RecordingLogger>,
    pub biogate: Biogate,
}

pub fn policy(algorithm: Algorithm) -> PolicyBuilder {
    PolicyBuilder::new(HOST)
        .algorithm(algorithm)
        .dialog_title("Unlock")
        .dialog_negative_button("Cancel")
}

pub fn harness(algorithm: Algorithm) -> Harness {
    harness_with(policy(algorithm))
}

pub fn harness_with(builder: PolicyBuilder) -> Harness {
    init_tracing();
    let keystore = Arc::new(SpyKeystore::new());
    let sensor = Arc::new(MemorySensor::new());
    let logger = Arc::new(RecordingLogger::default());
    let policy = builder.logger(logger.clone()).build().expect("valid policy");
    let biogate = Biogate::new(policy, keystore.clone(), sensor.clone());
    Harness {
        keystore,
        sensor,
        logger,
        biogate,
    }
}

/// Takes every item that is ready without waiting for the sensor.
pub fn drain(subscription: &mut Subscription) -> Vec<BiometricResult<Outcome>> {
    let mut items = Vec::new();
    while let Some(Some(item)) = subscription.next().now_or_never() {
        items.push(item);
    }
    items
}

impl Harness {
    /// Seals `plaintext` under `key_name`, authenticating when the sensor is armed.
    pub fn seal(&self, key_name: &str, plaintext: &[u8]) -> String {
        let mut subscription = self
            .biogate
            .seal_with_key(Some(key_name), plaintext)
            .subscribe();
        if self.biogate.policy().algorithm() == Algorithm::Symmetric {
            assert!(self.sensor.succeed());
        }
        match drain(&mut subscription).pop() {
            Some(Ok(Outcome::Authenticated { payload })) => payload
                .as_envelope()
                .expect("seal yields an envelope")
                .to_string(),
            other => panic!("seal did not authenticate: {other:?}"),
        }
    }

    /// Unseals `envelope` under `key_name` after a successful presentation.
    pub fn unseal(&self, key_name: &str, envelope: &str) -> BiometricResult<Vec<u8>> {
        let mut subscription = self
            .biogate
            .unseal_with_key(Some(key_name), envelope)
            .subscribe();
        self.sensor.succeed();
        match drain(&mut subscription).pop().expect("terminal item")? {
            Outcome::Authenticated { payload } => Ok(payload
                .into_plaintext()
                .expect("unseal yields plaintext")
                .expose()
                .to_vec()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
