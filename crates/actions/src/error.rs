//! Leaf-level error type.

use thiserror::Error;

use crate::locator::LocatorError;

/// Errors returned by a leaf handler's `execute` method.
///
/// The engine uses the variant to decide what happens next:
/// - `Transient` — retried according to the leaf's retry policy.
/// - `Fatal`     — the action fails immediately, no retry.
/// - `Interrupted` — cancellation was observed; the flow pauses rather than
///   fails. This is the one signal allowed to travel through the executor
///   undisguised.
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// Recoverable failure (element not found, backend hiccup).
    #[error("transient action error: {0}")]
    Transient(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal action error: {0}")]
    Fatal(String),

    /// The cancellation token fired while the action was in progress.
    #[error("action interrupted by cancellation")]
    Interrupted,
}

impl From<LocatorError> for ActionError {
    fn from(err: LocatorError) -> Self {
        match err {
            LocatorError::Backend(msg) => ActionError::Transient(msg),
            LocatorError::Stale => ActionError::Transient(LocatorError::Stale.to_string()),
            LocatorError::Unattached => ActionError::Fatal(LocatorError::Unattached.to_string()),
        }
    }
}
