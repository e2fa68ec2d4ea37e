//! Immutable configuration shared by every flow of a [`Biogate`](crate::Biogate).

use std::fmt;
use std::sync::Arc;

use crate::error::{BiometricError, BiometricResult};
use crate::logger::{DefaultLogger, Logger, NoopLogger};
use crate::platform::{KeyAlgorithm, PromptInfo, Transformation};

/// Suffix appended to the host identity to form the default key name.
pub const DEFAULT_KEY_SUFFIX: &str = "rxfingerprint_default";

/// Algorithm used for sealing and unsealing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Algorithm {
    /// AES-256 in CBC mode with PKCS#7 padding. Both directions need the sensor.
    Symmetric,
    /// RSA with PKCS#1 v1.5 padding. Sealing uses the public key and needs no sensor.
    #[default]
    Asymmetric,
}

impl Algorithm {
    /// Cipher transformation used by this algorithm.
    #[must_use]
    pub const fn transformation(self) -> Transformation {
        match self {
            Self::Symmetric => Transformation::AesCbcPkcs7,
            Self::Asymmetric => Transformation::RsaEcbPkcs1,
        }
    }

    /// Algorithm of the keys this choice works with.
    #[must_use]
    pub const fn key_algorithm(self) -> KeyAlgorithm {
        self.transformation().key_algorithm()
    }
}

/// Validated configuration. Build one with [`PolicyBuilder`].
#[derive(Clone)]
pub struct Policy {
    host_identity: String,
    key_name: Option<String>,
    algorithm: Algorithm,
    invalidate_on_enrollment: bool,
    prompt: Option<PromptInfo>,
    logger: Arc<dyn Logger>,
}

impl Policy {
    /// Starts a builder for `host_identity`, the reverse-DNS identifier of the host app.
    pub fn builder(host_identity: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder::new(host_identity)
    }

    /// Stable identifier of the host the default key name derives from.
    #[must_use]
    pub fn host_identity(&self) -> &str {
        &self.host_identity
    }

    /// Key name used when a call does not name one.
    #[must_use]
    pub fn default_key_name(&self) -> String {
        self.key_name
            .clone()
            .unwrap_or_else(|| format!("{}.{DEFAULT_KEY_SUFFIX}", self.host_identity))
    }

    /// Resolves the key a call operates on. `None` selects [`Policy::default_key_name`].
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Config`] if an explicit name is blank.
    pub fn resolve_key_name(&self, key_name: Option<&str>) -> BiometricResult<String> {
        match key_name {
            None => Ok(self.default_key_name()),
            Some(name) if name.trim().is_empty() => {
                Err(BiometricError::Config("key name must not be empty".to_string()))
            }
            Some(name) => Ok(name.to_string()),
        }
    }

    /// Sealing algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Whether keys are created so that biometric enrollment changes invalidate them.
    #[must_use]
    pub const fn invalidate_on_enrollment(&self) -> bool {
        self.invalidate_on_enrollment
    }

    /// Dialog texts, or `None` for headless hosts.
    #[must_use]
    pub const fn prompt(&self) -> Option<&PromptInfo> {
        self.prompt.as_ref()
    }

    /// Warning and error sink.
    #[must_use]
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("host_identity", &self.host_identity)
            .field("key_name", &self.key_name)
            .field("algorithm", &self.algorithm)
            .field("invalidate_on_enrollment", &self.invalidate_on_enrollment)
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Policy`].
///
/// Validation happens in [`PolicyBuilder::build`], which fails on the first missing or
/// empty required field. Unless [`PolicyBuilder::headless`] is set, the dialog title and
/// negative button text are required.
#[must_use]
pub struct PolicyBuilder {
    host_identity: String,
    key_name: Option<String>,
    algorithm: Algorithm,
    invalidate_on_enrollment: bool,
    title: Option<String>,
    subtitle: Option<String>,
    description: Option<String>,
    negative_button: Option<String>,
    headless: bool,
    logger: Arc<dyn Logger>,
}

impl PolicyBuilder {
    /// Creates a builder with defaults: asymmetric sealing, keys invalidated by enrollment
    /// changes, and the [`DefaultLogger`].
    pub fn new(host_identity: impl Into<String>) -> Self {
        Self {
            host_identity: host_identity.into(),
            key_name: None,
            algorithm: Algorithm::default(),
            invalidate_on_enrollment: true,
            title: None,
            subtitle: None,
            description: None,
            negative_button: None,
            headless: false,
            logger: Arc::new(DefaultLogger),
        }
    }

    /// Creates a builder whose host identity is the file stem of the running executable.
    ///
    /// For hosts without an application identifier.
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Config`] if the executable path cannot be determined.
    pub fn from_current_exe() -> BiometricResult<Self> {
        let exe = std::env::current_exe().map_err(|err| {
            BiometricError::Config(format!("cannot determine current executable: {err}"))
        })?;
        let stem = exe
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| {
                BiometricError::Config("executable name is not valid UTF-8".to_string())
            })?;
        Ok(Self::new(stem))
    }

    /// Overrides the default key name.
    pub fn key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = Some(key_name.into());
        self
    }

    /// Selects the sealing algorithm.
    pub const fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Whether new keys are invalidated by biometric enrollment changes.
    pub const fn invalidate_on_enrollment(mut self, invalidate: bool) -> Self {
        self.invalidate_on_enrollment = invalidate;
        self
    }

    /// Dialog title.
    pub fn dialog_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Dialog subtitle.
    pub fn dialog_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    /// Dialog description.
    pub fn dialog_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Label of the dialog's negative button.
    pub fn dialog_negative_button(mut self, text: impl Into<String>) -> Self {
        self.negative_button = Some(text.into());
        self
    }

    /// The host shows no dialog; dialog texts become optional and are ignored.
    pub const fn headless(mut self) -> Self {
        self.headless = true;
        self
    }

    /// Sink for warnings and errors.
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Silences all warnings and errors.
    pub fn disable_logging(self) -> Self {
        self.logger(Arc::new(NoopLogger))
    }

    /// Validates the options and builds the [`Policy`].
    ///
    /// # Errors
    ///
    /// Returns [`BiometricError::Config`] if the host identity or an explicit key name is
    /// empty, or if the dialog title or negative button is missing for a dialog-driven host.
    pub fn build(self) -> BiometricResult<Policy> {
        if self.host_identity.trim().is_empty() {
            return Err(BiometricError::Config(
                "host identity must not be empty".to_string(),
            ));
        }
        if self
            .key_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(BiometricError::Config("key name must not be empty".to_string()));
        }

        let prompt = if self.headless {
            None
        } else {
            Some(PromptInfo {
                title: required(self.title, "dialog title")?,
                subtitle: self.subtitle,
                description: self.description,
                negative_button: required(self.negative_button, "dialog negative button")?,
            })
        };

        Ok(Policy {
            host_identity: self.host_identity,
            key_name: self.key_name,
            algorithm: self.algorithm,
            invalidate_on_enrollment: self.invalidate_on_enrollment,
            prompt,
            logger: self.logger,
        })
    }
}

fn required(value: Option<String>, field: &str) -> BiometricResult<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(BiometricError::Config(format!("{field} must not be empty"))),
        None => Err(BiometricError::Config(format!("{field} is required"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use test_case::test_case;

    fn dialog(builder: PolicyBuilder) -> PolicyBuilder {
        builder.dialog_title("Unlock").dialog_negative_button("Cancel")
    }

    #[test]
    fn test_defaults() {
        let policy = dialog(PolicyBuilder::new("com.example.app"))
            .build()
            .expect("valid policy");
        assert_eq!(policy.algorithm(), Algorithm::Asymmetric);
        assert!(policy.invalidate_on_enrollment());
        assert_eq!(
            policy.default_key_name(),
            "com.example.app.rxfingerprint_default"
        );
        let prompt = policy.prompt().expect("dialog driven");
        assert_eq!(prompt.title, "Unlock");
        assert_eq!(prompt.subtitle, None);
    }

    #[test]
    fn test_resolve_key_name() {
        let policy = PolicyBuilder::new("com.example.app")
            .headless()
            .build()
            .expect("valid policy");
        assert_eq!(
            policy.resolve_key_name(None).expect("default"),
            "com.example.app.rxfingerprint_default"
        );
        assert_eq!(policy.resolve_key_name(Some("k1")).expect("explicit"), "k1");
        assert!(matches!(
            policy.resolve_key_name(Some(" ")),
            Err(BiometricError::Config(_))
        ));

        let named = PolicyBuilder::new("com.example.app")
            .headless()
            .key_name("custom")
            .build()
            .expect("valid policy");
        assert_eq!(named.resolve_key_name(None).expect("default"), "custom");
    }

    #[test_case(PolicyBuilder::new("").headless() ; "empty host identity")]
    #[test_case(PolicyBuilder::new("app").headless().key_name("") ; "empty key name")]
    #[test_case(PolicyBuilder::new("app") ; "missing dialog texts")]
    #[test_case(PolicyBuilder::new("app").dialog_title("Unlock") ; "missing negative button")]
    #[test_case(PolicyBuilder::new("app").dialog_title(" ").dialog_negative_button("Cancel") ; "blank title")]
    fn test_build_rejects(builder: PolicyBuilder) {
        assert!(matches!(builder.build(), Err(BiometricError::Config(_))));
    }

    #[test]
    fn test_headless_ignores_dialog_texts() {
        let policy = PolicyBuilder::new("app")
            .dialog_title("ignored")
            .headless()
            .build()
            .expect("valid policy");
        assert!(policy.prompt().is_none());
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(Algorithm::from_str("symmetric"), Ok(Algorithm::Symmetric));
        assert_eq!(Algorithm::from_str("ASYMMETRIC"), Ok(Algorithm::Asymmetric));
        assert!(Algorithm::from_str("rsa").is_err());
        assert_eq!(Algorithm::Symmetric.to_string(), "symmetric");
        assert_eq!(Algorithm::Asymmetric.key_algorithm(), KeyAlgorithm::Rsa);
    }

    #[test]
    fn test_from_current_exe_uses_binary_name() {
        let builder = PolicyBuilder::from_current_exe().expect("test binary has a name");
        let policy = builder.headless().build().expect("valid policy");
        assert!(policy
            .default_key_name()
            .ends_with(".rxfingerprint_default"));
    }
}
