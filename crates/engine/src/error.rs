//! Engine-level error types.
//!
//! Execution itself never returns these — run results are expressed as
//! [`crate::executor::Outcome`] values. `EngineError` covers the edges
//! around execution: loading a serialized tree and configuring the
//! registry.

use thiserror::Error;

/// Errors produced outside the run loop.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The serialized action tree could not be decoded.
    #[error("invalid flow definition: {0}")]
    InvalidDefinition(#[from] serde_json::Error),

    /// Two handlers were registered under the same leaf kind.
    #[error("duplicate handler registration for action kind '{0}'")]
    DuplicateKind(String),
}
