//! Warning and error reporting into a host-provided sink.

use std::error::Error;

/// Sink for the warnings and errors the sealing engine reports.
///
/// A logger is carried on every [`Policy`](crate::Policy); there is no process-wide logger.
/// The engine only logs the silent recoveries it performs on invalidated keys and the
/// failures it meets while doing so.
///
/// # Examples
///
/// Implementing the `Logger` trait:
///
/// ```rust
/// use biogate_core::logger::Logger;
///
/// struct MyLogger;
///
/// impl Logger for MyLogger {
///     fn warn(&self, message: &str) {
///         println!("[WARN] {message}");
///     }
///
///     fn error(&self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
///         println!("[ERROR] {message} ({cause:?})");
///     }
/// }
/// ```
pub trait Logger: Sync + Send {
    /// Logs a warning.
    ///
    /// # Arguments
    ///
    /// * `message` - The log message to be recorded.
    fn warn(&self, message: &str);

    /// Logs an error together with its cause, if any.
    ///
    /// # Arguments
    ///
    /// * `message` - The log message to be recorded.
    /// * `cause` - The error that triggered the message.
    fn error(&self, message: &str, cause: Option<&(dyn Error + 'static)>);
}

/// Target used for records emitted by [`DefaultLogger`].
pub const LOG_TARGET: &str = "biogate";

/// Forwards messages to the [`log`] facade under the `biogate` target.
///
/// Whatever `log` backend the host installed decides where the records end up.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn warn(&self, message: &str) {
        log::warn!(target: LOG_TARGET, "{message}");
    }

    fn error(&self, message: &str, cause: Option<&(dyn Error + 'static)>) {
        match cause {
            Some(cause) => log::error!(target: LOG_TARGET, "{message}: {cause}"),
            None => log::error!(target: LOG_TARGET, "{message}"),
        }
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn warn(&self, _message: &str) {}

    fn error(&self, _message: &str, _cause: Option<&(dyn Error + 'static)>) {}
}
