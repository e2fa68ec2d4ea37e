//! Authentication sessions as cancellable event streams.
//!
//! A [`Flow`] is a cold description of an operation. Every [`Flow::subscribe`] starts an
//! independent [`AuthSession`]: it probes the sensor, builds the operation's cipher, arms
//! the sensor and returns a [`Subscription`] streaming the session's items.
//!
//! A stream yields zero or more [`Outcome::Help`] / [`Outcome::Failed`] items followed by
//! exactly one terminal item, `Ok(Outcome::Authenticated { .. })` or `Err(_)`, and then
//! ends. Dropping or disposing the subscription before that cancels the attempt and
//! nothing more is yielded.
//!
//! Sensor callbacks may arrive on any thread. They are queued and applied to the session
//! only while the subscription is polled, on the task that owns it.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cipher::Cipher;
use crate::error::{BiometricError, BiometricResult};
use crate::gateway::SensorGateway;
use crate::operation::{Operation, Outcome, Payload};
use crate::platform::{AuthCallbacks, AuthResult, CancelToken, PromptInfo, SensorEvent};

/// Lifecycle of an [`AuthSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    /// Created, sensor not armed yet.
    Idle,
    /// Waiting for the sensor.
    Armed,
    /// Finished successfully.
    Authenticated,
    /// Disposed before finishing.
    Canceled,
    /// Finished with a fatal error.
    Errored,
}

impl SessionState {
    /// Whether no further item can be produced.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Authenticated | Self::Canceled | Self::Errored)
    }
}

/// The state machine coupling one sensor attempt to one operation.
pub struct AuthSession {
    id: Uuid,
    state: SessionState,
    gateway: SensorGateway,
    prompt: Option<PromptInfo>,
    operation: Box<dyn Operation>,
    cipher: Option<Cipher>,
    cancel: CancelToken,
}

impl AuthSession {
    /// Creates an idle session.
    #[must_use]
    pub fn new(
        gateway: SensorGateway,
        prompt: Option<PromptInfo>,
        operation: Box<dyn Operation>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Idle,
            gateway,
            prompt,
            operation,
            cipher: None,
            cancel: CancelToken::new(),
        }
    }

    /// Session id, also reported through [`AuthCallbacks::session_id`].
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// The token that cancels the sensor attempt.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs the session up to the point where it waits for the sensor.
    ///
    /// Returns the terminal item if the session already finished: the sensor is
    /// unavailable, the cipher could not be built, or the operation needs no sensor.
    fn start(
        &mut self,
        events: mpsc::UnboundedSender<SensorEvent>,
    ) -> Option<BiometricResult<Outcome>> {
        if let Some(reason) = self.gateway.unavailability_reason() {
            return Some(self.fail(BiometricError::Unavailable(reason.to_string())));
        }

        let cipher = match self.operation.init_cipher() {
            Ok(cipher) => cipher,
            Err(err) => return Some(self.fail(err)),
        };

        if !self.operation.requires_sensor() {
            let outcome = self.operation.on_success(&AuthResult::default(), cipher);
            return Some(self.finish(outcome));
        }

        self.cipher = cipher;
        if let Err(err) = self.arm(events) {
            return Some(self.fail(err));
        }
        None
    }

    /// Arms the sensor. Only legal once, from [`SessionState::Idle`].
    fn arm(&mut self, events: mpsc::UnboundedSender<SensorEvent>) -> BiometricResult<()> {
        if self.state != SessionState::Idle {
            return Err(BiometricError::SensorBusy(self.id));
        }
        let crypto = self.cipher.as_ref().and_then(Cipher::crypto_object);
        let callbacks = AuthCallbacks::new(self.id, events);
        self.state = SessionState::Armed;
        tracing::debug!(session = %self.id, gated = crypto.is_some(), "sensor armed");
        self.gateway
            .authenticate(crypto, self.cancel.clone(), callbacks, self.prompt.as_ref());
        Ok(())
    }

    /// Applies one sensor event. Returns the item to emit, if any.
    fn on_event(&mut self, event: SensorEvent) -> Option<BiometricResult<Outcome>> {
        if self.state != SessionState::Armed {
            tracing::trace!(session = %self.id, state = %self.state, "ignoring sensor event");
            return None;
        }
        match event {
            SensorEvent::Succeeded(result) => {
                let cipher = self.cipher.take();
                let outcome = self.operation.on_success(&result, cipher);
                Some(self.finish(outcome))
            }
            SensorEvent::Failed => {
                tracing::debug!(session = %self.id, "presentation not recognized");
                Some(Ok(Outcome::Failed))
            }
            SensorEvent::Help { code, message } => {
                tracing::debug!(session = %self.id, code, "sensor help");
                Some(Ok(Outcome::Help { code, message }))
            }
            SensorEvent::Error { code, message } => {
                Some(self.fail(BiometricError::Authentication { code, message }))
            }
        }
    }

    /// The sensor released the session without reporting a terminal event.
    fn on_disconnected(&mut self) -> Option<BiometricResult<Outcome>> {
        (self.state == SessionState::Armed).then(|| self.fail(BiometricError::SensorDisconnected))
    }

    /// Cancels the session. Idempotent, and a no-op once the session finished.
    fn dispose(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let was_armed = self.state == SessionState::Armed;
        self.state = SessionState::Canceled;
        self.cipher = None;
        self.cancel.cancel();
        tracing::debug!(session = %self.id, was_armed, "session canceled");
    }

    fn finish(&mut self, outcome: BiometricResult<Payload>) -> BiometricResult<Outcome> {
        match outcome {
            Ok(payload) => {
                self.state = SessionState::Authenticated;
                self.cipher = None;
                tracing::debug!(session = %self.id, "session authenticated");
                Ok(Outcome::Authenticated { payload })
            }
            Err(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: BiometricError) -> BiometricResult<Outcome> {
        self.state = SessionState::Errored;
        self.cipher = None;
        tracing::debug!(session = %self.id, kind = %err.kind(), "session errored");
        Err(err)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

type OperationFactory = dyn Fn() -> Box<dyn Operation> + Send + Sync;

/// Cold description of a session. Nothing happens until [`Flow::subscribe`].
#[derive(Clone)]
pub struct Flow {
    gateway: SensorGateway,
    prompt: Option<PromptInfo>,
    operation: Arc<OperationFactory>,
}

impl Flow {
    /// Creates a flow running a fresh operation from `operation` on every subscription.
    pub fn new(
        gateway: SensorGateway,
        prompt: Option<PromptInfo>,
        operation: impl Fn() -> Box<dyn Operation> + Send + Sync + 'static,
    ) -> Self {
        Self {
            gateway,
            prompt,
            operation: Arc::new(operation),
        }
    }

    /// Starts an independent session.
    ///
    /// Probes the sensor, builds the cipher and arms the sensor before returning; the
    /// keystore may block briefly.
    #[must_use = "dropping the subscription cancels the session"]
    pub fn subscribe(&self) -> Subscription {
        let mut session = AuthSession::new(
            self.gateway.clone(),
            self.prompt.clone(),
            (self.operation)(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(session = %session.id(), "session subscribed");
        let mut queued = VecDeque::new();
        queued.extend(session.start(tx));
        let mut subscription = Subscription {
            session,
            events: rx,
            queued,
        };
        if subscription.session.state().is_terminal() {
            subscription.events.close();
        }
        subscription
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("gateway", &self.gateway)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

/// A live session, consumed as a [`Stream`] of `BiometricResult<Outcome>`.
///
/// Dropping the subscription disposes the session.
#[must_use = "streams do nothing unless polled, and dropping one cancels the session"]
pub struct Subscription {
    session: AuthSession,
    events: mpsc::UnboundedReceiver<SensorEvent>,
    queued: VecDeque<BiometricResult<Outcome>>,
}

impl Subscription {
    /// Id of the underlying session.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.session.id()
    }

    /// State of the underlying session.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The token the sensor attempt was armed with.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        self.session.cancel_token()
    }

    /// Whether the session was disposed before finishing.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.session.state() == SessionState::Canceled
    }

    /// Cancels the session: triggers the cancel token and releases the cipher.
    ///
    /// Nothing more is yielded afterwards, not even items already queued. Idempotent; the
    /// session state is left alone once it finished.
    pub fn dispose(&mut self) {
        self.session.dispose();
        self.queued.clear();
        self.events.close();
    }
}

impl Stream for Subscription {
    type Item = BiometricResult<Outcome>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(item) = this.queued.pop_front() {
            return Poll::Ready(Some(item));
        }
        loop {
            if this.session.state().is_terminal() {
                this.events.close();
                return Poll::Ready(None);
            }
            match this.events.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(event)) => {
                    if let Some(item) = this.session.on_event(event) {
                        return Poll::Ready(Some(item));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(this.session.on_disconnected()),
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("session", &self.session)
            .field("queued", &self.queued.len())
            .finish()
    }
}
