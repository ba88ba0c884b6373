//! The boundary to the OS-level UI automation backend.
//!
//! Leaf handlers depend on this query contract only; nothing in the engine
//! knows which automation API sits behind it. Handles are scoped to a single
//! attempt: handlers re-run the query on every retry rather than caching a
//! handle across attempts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// How an on-screen element is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    /// Structural path from the window root.
    Path,
    /// Stable backend-assigned identifier.
    AutomationId,
    /// Display name / label.
    Name,
    /// Control type name (button, edit, ...).
    ControlType,
}

/// A single element query: identifier kind plus its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSelector {
    pub by: SelectorKind,
    pub value: String,
}

impl ElementSelector {
    pub fn new(by: SelectorKind, value: impl Into<String>) -> Self {
        Self {
            by,
            value: value.into(),
        }
    }
}

impl fmt::Display for ElementSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.by {
            SelectorKind::Path => "path",
            SelectorKind::AutomationId => "automation_id",
            SelectorKind::Name => "name",
            SelectorKind::ControlType => "control_type",
        };
        write!(f, "{kind}={}", self.value)
    }
}

/// Opaque handle to a located element, valid for the current attempt only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by an automation backend.
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// The backend reported a (possibly transient) failure.
    #[error("automation backend error: {0}")]
    Backend(String),

    /// The handle refers to an element that is no longer available.
    #[error("element handle is no longer valid")]
    Stale,

    /// No automation backend is attached to this host.
    #[error("no automation backend is attached")]
    Unattached,
}

// ---------------------------------------------------------------------------
// The locator contract
// ---------------------------------------------------------------------------

/// Query-and-manipulate contract consumed by the element leaf handlers.
///
/// `find` returns zero-or-one matching element; ambiguity resolution is the
/// backend's concern.
#[async_trait]
pub trait ElementLocator: Send + Sync {
    async fn find(
        &self,
        selector: &ElementSelector,
    ) -> Result<Option<ElementHandle>, LocatorError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), LocatorError>;

    async fn set_text(&self, element: &ElementHandle, text: &str) -> Result<(), LocatorError>;

    async fn text_of(&self, element: &ElementHandle) -> Result<String, LocatorError>;

    /// Full text content of the active window.
    async fn window_text(&self) -> Result<String, LocatorError>;
}

/// Locator for hosts without an automation backend (CI, dry runs).
///
/// Every query finds nothing and every manipulation fails, so logic-only
/// flows run normally while element actions fail fast.
pub struct NullLocator;

#[async_trait]
impl ElementLocator for NullLocator {
    async fn find(
        &self,
        _selector: &ElementSelector,
    ) -> Result<Option<ElementHandle>, LocatorError> {
        Ok(None)
    }

    async fn click(&self, _element: &ElementHandle) -> Result<(), LocatorError> {
        Err(LocatorError::Unattached)
    }

    async fn set_text(&self, _element: &ElementHandle, _text: &str) -> Result<(), LocatorError> {
        Err(LocatorError::Unattached)
    }

    async fn text_of(&self, _element: &ElementHandle) -> Result<String, LocatorError> {
        Err(LocatorError::Unattached)
    }

    async fn window_text(&self) -> Result<String, LocatorError> {
        Err(LocatorError::Unattached)
    }
}
