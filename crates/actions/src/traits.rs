//! The `LeafHandler` trait — the contract every leaf action kind must fulfil.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::env::Environment;
use crate::error::ActionError;
use crate::locator::ElementLocator;

/// Context passed to every leaf handler during execution.
///
/// Defined here (in the actions crate) so both the engine and individual
/// handler implementations can import it without a circular dependency.
/// The environment travels as an explicit `&mut` borrow: execution is
/// strictly sequential, so there is never more than one in-flight
/// reader/writer and no lock is needed.
pub struct ActionContext<'a> {
    /// The flow's variable store.
    pub env: &'a mut Environment,
    /// Boundary to the UI automation backend.
    pub locator: &'a dyn ElementLocator,
    /// Cancellation token threaded down from the top-level execute call.
    /// Handlers with internal suspension points must honour it.
    pub cancel: &'a CancellationToken,
}

/// The core leaf contract.
///
/// All built-in leaf kinds and host extensions implement this. The engine
/// dispatches execution through this trait object, keyed by the leaf's
/// `kind` string.
#[async_trait]
pub trait LeafHandler: Send + Sync {
    /// Perform the leaf's operation with the action's decoded parameters.
    ///
    /// Faults must be reported through [`ActionError`] — they never escape
    /// the engine as raw errors.
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError>;
}
