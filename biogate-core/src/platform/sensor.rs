//! Biometric sensor trait and the callback plumbing it reports through.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use super::keystore::{PlatformCipher, Transformation};

/// Texts of the system authentication dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInfo {
    /// Dialog title. Never empty.
    pub title: String,
    /// Optional subtitle.
    pub subtitle: Option<String>,
    /// Optional description.
    pub description: Option<String>,
    /// Label of the negative (cancel) button. Never empty.
    pub negative_button: String,
}

/// Handle binding an authentication attempt to an initialized cipher.
#[derive(Clone)]
pub struct CryptoObject {
    cipher: Arc<dyn PlatformCipher>,
}

impl CryptoObject {
    pub(crate) fn new(cipher: Arc<dyn PlatformCipher>) -> Self {
        Self { cipher }
    }

    /// The cipher the platform has to authorize.
    #[must_use]
    pub fn cipher(&self) -> &Arc<dyn PlatformCipher> {
        &self.cipher
    }

    /// Transformation of the bound cipher.
    #[must_use]
    pub fn transformation(&self) -> Transformation {
        self.cipher.transformation()
    }
}

impl fmt::Debug for CryptoObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoObject")
            .field("transformation", &self.transformation())
            .field("mode", &self.cipher.mode())
            .finish()
    }
}

/// How the user proved their presence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Authenticator {
    /// A biometric presentation.
    #[default]
    Biometric,
    /// A device credential (PIN, pattern, password).
    DeviceCredential,
    /// The platform did not say.
    Unknown,
}

/// Result delivered with a successful authentication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthResult {
    /// Kind of authenticator used.
    pub authenticator: Authenticator,
}

/// Raw sensor callbacks, queued onto the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SensorEvent {
    Succeeded(AuthResult),
    Failed,
    Help { code: i32, message: String },
    Error { code: i32, message: String },
}

/// Callbacks a [`BiometricSensor`] reports an authentication attempt through.
///
/// Callbacks may be invoked from any thread. Events are queued and applied by the session
/// on the task that owns its stream. Events for a session that already finished, or whose
/// stream was dropped, are discarded.
#[derive(Clone)]
pub struct AuthCallbacks {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<SensorEvent>,
}

impl AuthCallbacks {
    pub(crate) const fn new(session_id: Uuid, tx: mpsc::UnboundedSender<SensorEvent>) -> Self {
        Self { session_id, tx }
    }

    /// Id of the session these callbacks feed.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The user was authenticated. Terminal.
    pub fn succeeded(&self, result: AuthResult) {
        self.send(SensorEvent::Succeeded(result));
    }

    /// A presentation was not recognized. The user may retry.
    pub fn failed(&self) {
        self.send(SensorEvent::Failed);
    }

    /// Transient sensor advice such as "Move finger". The user may retry.
    pub fn help(&self, code: i32, message: impl Into<String>) {
        self.send(SensorEvent::Help {
            code,
            message: message.into(),
        });
    }

    /// Unrecoverable error (canceled, lockout, hardware fault). Terminal.
    pub fn error(&self, code: i32, message: impl Into<String>) {
        self.send(SensorEvent::Error {
            code,
            message: message.into(),
        });
    }

    /// Whether the session still listens.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: SensorEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(session = %self.session_id, "dropping sensor event for closed session");
        }
    }
}

impl fmt::Debug for AuthCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCallbacks")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

type CancelHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
    hooks: Mutex<Vec<CancelHook>>,
}

/// One-shot signal asking the sensor to abort an in-flight authentication.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the token. Returns `false` if it was already triggered.
    pub fn cancel(&self) -> bool {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.notify.notify_waiters();
        let hooks = std::mem::take(
            &mut *self
                .inner
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for hook in hooks {
            hook();
        }
        true
    }

    /// Whether the token was triggered.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Runs `hook` once the token is triggered, or right away if it already was.
    ///
    /// Platform adapters use this to forward cancellation to the native signal.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }

    /// Completes once the token is triggered.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The platform biometric subsystem.
///
/// Implementations must not retry internally; retrying is up to the user, who
/// subscribes again.
pub trait BiometricSensor: Send + Sync {
    /// Whether sensor hardware is present.
    fn is_hardware_detected(&self) -> bool;

    /// Whether the user enrolled at least one biometric credential.
    fn has_enrolled_credentials(&self) -> bool;

    /// Whether the host granted the permission to use the sensor.
    fn is_permission_granted(&self) -> bool;

    /// Starts one authentication attempt.
    ///
    /// `crypto` is `None` for plain authentication. The attempt must stop once `cancel`
    /// is triggered. Exactly one of `succeeded` or `error` should end the attempt;
    /// `failed` and `help` may be reported any number of times before that.
    fn authenticate(
        &self,
        crypto: Option<CryptoObject>,
        cancel: CancelToken,
        callbacks: AuthCallbacks,
        prompt: Option<&PromptInfo>,
    );
}
