//! Biometric-gated sealing of byte payloads under hardware-backed keys.
//!
//! [`Biogate`] authenticates the device user and seals or unseals payloads so that
//! unsealing requires a successful biometric presentation. Every call returns a cold
//! [`Flow`]; subscribing to it starts an independent session streaming
//! `BiometricResult<Outcome>` items until it authenticates, fails, or is dropped.
//!
//! Sealed payloads travel as envelope text, `base64(ciphertext)-_-base64(iv)`.
//!
//! The host provides the keystore and the sensor through the traits in [`platform`].
//! In-memory implementations are available for development and tests.
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod biogate;
pub use biogate::Biogate;

pub mod codec;
pub use codec::{Base64Codec, Codec, DecodeError, HexCodec};

mod config;
pub use config::{Algorithm, Policy, PolicyBuilder, DEFAULT_KEY_SUFFIX};

pub mod envelope;
pub use envelope::{Envelope, InvalidEnvelope, InvalidEnvelopeReason, SEPARATOR};

mod error;
pub use error::*;

pub mod logger;
pub use logger::{DefaultLogger, Logger, NoopLogger};

mod operation;
pub use operation::{
    AuthenticateOperation, Operation, Outcome, Payload, Plaintext, SealOperation,
    UnsealOperation,
};

pub mod platform;

mod session;
pub use session::{AuthSession, Flow, SessionState, Subscription};

// engine internals, public for hosts composing their own flows
mod cipher;
pub use cipher::{Cipher, CipherFactory};

mod gateway;
pub use gateway::SensorGateway;

mod vault;
pub use vault::{KeyPairHandle, KeyPolicy, KeyVault, PrivateKeyHandle, SecretKeyHandle};
