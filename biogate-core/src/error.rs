//! Error types surfaced by biometric sessions and the keystore layer.

use thiserror::Error;

use crate::envelope::InvalidEnvelope;
use crate::platform::KeystoreError;

/// Result type for biometric operations.
pub type BiometricResult<T> = Result<T, BiometricError>;

/// Coarse classification of a [`BiometricError`].
///
/// Callers should branch on the kind rather than on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The capability probe failed; not retryable for the current host state.
    Unavailable,
    /// Caller-supplied envelope text could not be parsed.
    InvalidEnvelope,
    /// The key bound to the operation was invalidated by the platform.
    KeyInvalidated,
    /// The sensor reported a fatal error (user canceled, lockout, hardware fault).
    AuthException,
    /// The cipher operation failed for reasons other than invalidation.
    CryptoFailure,
    /// The policy builder was misused.
    ConfigError,
}

/// Fatal errors terminating a biometric session.
#[derive(Debug, Error)]
pub enum BiometricError {
    /// Biometric authentication is not available on this host.
    #[error("biometric authentication is unavailable: {0}")]
    Unavailable(String),

    /// The envelope passed for unsealing is malformed.
    #[error(transparent)]
    InvalidEnvelope(#[from] InvalidEnvelope),

    /// The key was permanently invalidated; data sealed under it is lost.
    #[error("key `{key_name}` was permanently invalidated")]
    KeyInvalidated {
        /// Name of the invalidated key.
        key_name: String,
    },

    /// The sensor reported an unrecoverable error.
    #[error("authentication error {code}: {message}")]
    Authentication {
        /// Platform error code.
        code: i32,
        /// Platform supplied, user presentable message.
        message: String,
    },

    /// The sensor released the session without delivering a terminal event.
    #[error("sensor disconnected before the authentication finished")]
    SensorDisconnected,

    /// The session attempted to arm the sensor while an attempt was already in flight.
    #[error("sensor already armed for session {0}")]
    SensorBusy(uuid::Uuid),

    /// No key with the given name exists in the keystore.
    #[error("key `{0}` not found")]
    KeyNotFound(String),

    /// Errors coming from the platform keystore or cipher.
    #[error("crypto failure: {0}")]
    Crypto(#[source] KeystoreError),

    /// The unsealed payload could not be produced (for example a missing IV).
    #[error("crypto failure: {0}")]
    CryptoState(String),

    /// The policy builder rejected its input.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BiometricError {
    /// Returns the kind discriminator for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::InvalidEnvelope(_) => ErrorKind::InvalidEnvelope,
            Self::KeyInvalidated { .. } => ErrorKind::KeyInvalidated,
            Self::Authentication { .. } | Self::SensorDisconnected | Self::SensorBusy(_) => {
                ErrorKind::AuthException
            }
            Self::KeyNotFound(_) | Self::Crypto(_) | Self::CryptoState(_) => {
                ErrorKind::CryptoFailure
            }
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Returns `true` when the key backing the operation was invalidated.
    #[must_use]
    pub const fn is_key_invalidated(&self) -> bool {
        matches!(self, Self::KeyInvalidated { .. })
    }
}

/// Returns `true` if `error` reports a permanently invalidated key.
///
/// This is the supported way to detect that previously sealed data can no longer be
/// recovered and has to be produced again.
#[must_use]
pub const fn is_key_invalidated(error: &BiometricError) -> bool {
    error.is_key_invalidated()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(BiometricError::Unavailable("no sensor".into()), ErrorKind::Unavailable)]
    #[test_case(BiometricError::KeyInvalidated { key_name: "k".into() }, ErrorKind::KeyInvalidated)]
    #[test_case(BiometricError::Authentication { code: 7, message: "Lockout".into() }, ErrorKind::AuthException)]
    #[test_case(BiometricError::SensorDisconnected, ErrorKind::AuthException)]
    #[test_case(BiometricError::KeyNotFound("k".into()), ErrorKind::CryptoFailure)]
    #[test_case(BiometricError::Crypto(KeystoreError::BadPadding("tag".into())), ErrorKind::CryptoFailure)]
    #[test_case(BiometricError::Config("title".into()), ErrorKind::ConfigError)]
    fn test_error_kind(error: BiometricError, kind: ErrorKind) {
        assert_eq!(error.kind(), kind);
    }

    #[test]
    fn test_is_key_invalidated_predicate() {
        let invalidated = BiometricError::KeyInvalidated {
            key_name: "k1".to_string(),
        };
        assert!(is_key_invalidated(&invalidated));
        assert!(!is_key_invalidated(&BiometricError::SensorDisconnected));
        assert!(!is_key_invalidated(&BiometricError::Crypto(
            KeystoreError::KeyPermanentlyInvalidated
        )));
    }

    #[test]
    fn test_authentication_message_is_readable() {
        let error = BiometricError::Authentication {
            code: 7,
            message: "Lockout".to_string(),
        };
        assert_eq!(error.to_string(), "authentication error 7: Lockout");
        assert_eq!(ErrorKind::AuthException.to_string(), "auth_exception");
    }
}
