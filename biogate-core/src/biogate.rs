//! The entry point hosts construct once and call for every flow.

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::cipher::CipherFactory;
use crate::codec::{Base64Codec, Codec};
use crate::config::Policy;
use crate::error::{BiometricError, BiometricResult};
use crate::gateway::SensorGateway;
use crate::operation::{
    AuthenticateOperation, Operation, RejectedOperation, SealOperation, UnsealOperation,
};
use crate::platform::{BiometricSensor, KeystoreProvider};
use crate::session::Flow;
use crate::vault::KeyVault;

/// Entry point for biometric authentication and sealing.
///
/// Every operation returns a cold [`Flow`]; nothing touches the keystore or the sensor
/// until the flow is subscribed. Keys are resolved from the [`Policy`] when a call does
/// not name one, so sealing and unsealing without a name always agree.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use biogate_core::platform::{MemoryKeystore, MemorySensor};
/// use biogate_core::{Algorithm, Biogate, Outcome, PolicyBuilder};
/// use futures::StreamExt;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let policy = PolicyBuilder::new("com.example.app")
///     .algorithm(Algorithm::Symmetric)
///     .dialog_title("Unlock")
///     .dialog_negative_button("Cancel")
///     .build()?;
/// let biogate = Biogate::new(
///     policy,
///     Arc::new(MemoryKeystore::new()),
///     Arc::new(MemorySensor::new()),
/// );
///
/// let mut stream = biogate.seal_str("secret").subscribe();
/// while let Some(item) = stream.next().await {
///     match item? {
///         Outcome::Authenticated { payload } => println!("{:?}", payload.as_envelope()),
///         Outcome::Help { message, .. } => println!("{message}"),
///         Outcome::Failed => println!("not recognized, try again"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Biogate {
    policy: Arc<Policy>,
    factory: CipherFactory,
    gateway: SensorGateway,
    codec: Arc<dyn Codec>,
}

impl Biogate {
    /// Creates an instance over the given platform keystore and sensor.
    #[must_use]
    pub fn new(
        policy: Policy,
        keystore: Arc<dyn KeystoreProvider>,
        sensor: Arc<dyn BiometricSensor>,
    ) -> Self {
        let factory = CipherFactory::new(KeyVault::new(keystore), &policy);
        Self {
            policy: Arc::new(policy),
            factory,
            gateway: SensorGateway::new(sensor),
            codec: Arc::new(Base64Codec),
        }
    }

    /// Replaces the codec envelopes are written and read with.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// The policy this instance follows.
    #[must_use]
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Authenticates the user. Succeeds with [`Payload::None`](crate::Payload::None).
    pub fn authenticate(&self) -> Flow {
        self.flow(|| Box::new(AuthenticateOperation))
    }

    /// Seals `plaintext` under the default key.
    ///
    /// Succeeds with [`Payload::Envelope`](crate::Payload::Envelope).
    pub fn seal(&self, plaintext: &[u8]) -> Flow {
        self.seal_with_key(None, plaintext)
    }

    /// Seals the UTF-8 bytes of `plaintext` under the default key.
    pub fn seal_str(&self, plaintext: &str) -> Flow {
        self.seal_with_key(None, plaintext.as_bytes())
    }

    /// Seals `plaintext` under `key_name`, or the default key if `None`.
    ///
    /// The key is created on first use. With [`Algorithm::Asymmetric`] the public key
    /// seals without the sensor; availability is still checked.
    ///
    /// [`Algorithm::Asymmetric`]: crate::Algorithm::Asymmetric
    pub fn seal_with_key(&self, key_name: Option<&str>, plaintext: &[u8]) -> Flow {
        let key_name = match self.policy.resolve_key_name(key_name) {
            Ok(name) => name,
            Err(err) => return self.rejected(&err),
        };
        let plaintext = Arc::new(Zeroizing::new(plaintext.to_vec()));
        let factory = self.factory.clone();
        let codec = Arc::clone(&self.codec);
        self.flow(move || {
            Box::new(SealOperation::new(
                factory.clone(),
                key_name.clone(),
                Arc::clone(&plaintext),
                Arc::clone(&codec),
            ))
        })
    }

    /// Unseals `envelope` with the default key.
    ///
    /// Succeeds with [`Payload::Plaintext`](crate::Payload::Plaintext).
    pub fn unseal(&self, envelope: &str) -> Flow {
        self.unseal_with_key(None, envelope)
    }

    /// Unseals `envelope` with `key_name`, or the default key if `None`.
    ///
    /// Malformed envelopes and missing keys fail before the sensor is armed.
    pub fn unseal_with_key(&self, key_name: Option<&str>, envelope: &str) -> Flow {
        let key_name = match self.policy.resolve_key_name(key_name) {
            Ok(name) => name,
            Err(err) => return self.rejected(&err),
        };
        let envelope = envelope.to_string();
        let factory = self.factory.clone();
        let codec = Arc::clone(&self.codec);
        self.flow(move || {
            Box::new(UnsealOperation::new(
                factory.clone(),
                key_name.clone(),
                envelope.clone(),
                Arc::clone(&codec),
            ))
        })
    }

    /// Whether biometric authentication can be used right now.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.gateway.is_available()
    }

    /// Negation of [`Biogate::is_available`].
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.gateway.is_unavailable()
    }

    /// Whether sensor hardware is present.
    #[must_use]
    pub fn is_hardware_detected(&self) -> bool {
        self.gateway.is_hardware_detected()
    }

    /// Whether at least one biometric credential is enrolled.
    #[must_use]
    pub fn has_enrolled_credentials(&self) -> bool {
        self.gateway.has_enrolled_credentials()
    }

    /// Whether a key named `key_name` (or the default key) exists.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Config`](crate::BiometricError::Config) for a blank name
    /// and [`BiometricError::Crypto`](crate::BiometricError::Crypto) if the keystore
    /// cannot be queried.
    pub fn key_exists(&self, key_name: Option<&str>) -> BiometricResult<bool> {
        let key_name = self.policy.resolve_key_name(key_name)?;
        self.factory.vault().exists(&key_name)
    }

    /// Deletes the key `key_name` (or the default key). Sealed data under it is lost.
    ///
    /// # Errors
    ///
    /// Same as [`Biogate::key_exists`].
    pub fn delete_key(&self, key_name: Option<&str>) -> BiometricResult<()> {
        let key_name = self.policy.resolve_key_name(key_name)?;
        self.factory.vault().delete(&key_name)
    }

    fn flow(&self, operation: impl Fn() -> Box<dyn Operation> + Send + Sync + 'static) -> Flow {
        Flow::new(self.gateway.clone(), self.policy.prompt().cloned(), operation)
    }

    fn rejected(&self, err: &BiometricError) -> Flow {
        let message = match err {
            BiometricError::Config(message) => message.clone(),
            other => other.to_string(),
        };
        self.flow(move || Box::new(RejectedOperation::new(message.clone())))
    }
}

impl fmt::Debug for Biogate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Biogate")
            .field("policy", &self.policy)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}
