//! Platform abstraction traits for the keystore and the biometric sensor.
//!
//! This module defines the platform-provided capabilities the sealing engine depends on.
//! Each host (Android, iOS, desktop) must provide implementations of these traits.
//!
//! # Overview
//!
//! - [`KeystoreProvider`]: Hardware-backed key storage and cipher initialization
//! - [`PlatformCipher`]: A cipher initialized by the keystore, bound to one key
//! - [`BiometricSensor`]: Capability probing and a single `authenticate` primitive
//!
//! # Platform Implementations
//!
//! ## Android (Kotlin)
//! - `KeystoreProvider`: `AndroidKeyStore` with `KeyGenParameterSpec`
//! - `BiometricSensor`: `BiometricPrompt` with a `CryptoObject`
//!
//! ## iOS (Swift)
//! - `KeystoreProvider`: Secure Enclave keys guarded by `SecAccessControl`
//! - `BiometricSensor`: `LAContext`
//!
//! ## Tests and development
//! - [`memory::MemoryKeystore`] and [`memory::MemorySensor`]

mod keystore;
pub mod memory;
mod sensor;

pub use keystore::{
    BlockMode, CipherMode, CipherRequest, EncryptionPadding, KeyAlgorithm, KeyPurpose,
    KeySpec, KeystoreError, KeystoreProvider, KeystoreResult, PlatformCipher,
    Transformation,
};
pub use sensor::{
    AuthCallbacks, AuthResult, Authenticator, BiometricSensor, CancelToken, CryptoObject,
    PromptInfo,
};
pub(crate) use sensor::SensorEvent;

// Re-export memory implementations for testing
pub use memory::{MemoryKeystore, MemorySensor};
