//! Capability checks in front of the host's biometric sensor.

use std::fmt;
use std::sync::Arc;

use crate::platform::{AuthCallbacks, BiometricSensor, CancelToken, CryptoObject, PromptInfo};

/// Capability probing and arming on top of a [`BiometricSensor`].
#[derive(Clone)]
pub struct SensorGateway {
    sensor: Arc<dyn BiometricSensor>,
}

impl SensorGateway {
    /// Wraps a platform sensor.
    #[must_use]
    pub fn new(sensor: Arc<dyn BiometricSensor>) -> Self {
        Self { sensor }
    }

    /// Whether sensor hardware is present.
    #[must_use]
    pub fn is_hardware_detected(&self) -> bool {
        self.sensor.is_hardware_detected()
    }

    /// Whether at least one biometric credential is enrolled.
    #[must_use]
    pub fn has_enrolled_credentials(&self) -> bool {
        self.sensor.has_enrolled_credentials()
    }

    /// Whether the host may use the sensor.
    #[must_use]
    pub fn is_permission_granted(&self) -> bool {
        self.sensor.is_permission_granted()
    }

    /// Hardware present, credentials enrolled and permission granted.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.is_hardware_detected() && self.has_enrolled_credentials() && self.is_permission_granted()
    }

    /// Negation of [`SensorGateway::is_available`].
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        !self.is_available()
    }

    /// Describes why the sensor is unavailable, or `None` if it is available.
    #[must_use]
    pub fn unavailability_reason(&self) -> Option<&'static str> {
        if !self.is_hardware_detected() {
            Some("no biometric hardware detected")
        } else if !self.has_enrolled_credentials() {
            Some("no biometric credentials enrolled")
        } else if !self.is_permission_granted() {
            Some("permission to use biometrics not granted")
        } else {
            None
        }
    }

    /// Arms the sensor for one attempt. Never retries.
    pub fn authenticate(
        &self,
        crypto: Option<CryptoObject>,
        cancel: CancelToken,
        callbacks: AuthCallbacks,
        prompt: Option<&PromptInfo>,
    ) {
        self.sensor.authenticate(crypto, cancel, callbacks, prompt);
    }
}

impl fmt::Debug for SensorGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorGateway")
            .field("available", &self.is_available())
            .finish()
    }
}
