//! Test doubles for the leaf contract and the locator boundary.
//!
//! Useful in unit and integration tests where a real automation backend is
//! either unavailable or irrelevant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::ActionError;
use crate::locator::{ElementHandle, ElementLocator, ElementSelector, LocatorError};
use crate::traits::{ActionContext, LeafHandler};

// ---------------------------------------------------------------------------
// MockHandler
// ---------------------------------------------------------------------------

/// Behaviour injected into [`MockHandler`] at construction time.
pub enum MockBehaviour {
    /// Always succeed.
    Succeed,
    /// Always fail with a transient error.
    FailTransient(String),
    /// Always fail with a fatal error.
    FailFatal(String),
    /// Fail transiently this many times, then succeed.
    SucceedAfter(u32),
    /// Report an observed cancellation on the first call, succeed afterwards.
    InterruptOnce,
}

/// A mock leaf handler that records every call it receives and follows a
/// programmer-specified behaviour.
pub struct MockHandler {
    /// Label pushed to the shared order log, if one is attached.
    pub name: String,
    behaviour: MockBehaviour,
    calls: AtomicU32,
    order: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockHandler {
    pub fn new(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: AtomicU32::new(0),
            order: None,
        }
    }

    pub fn succeeding(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::Succeed)
    }

    pub fn failing_transient(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailTransient(msg.into()))
    }

    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Fails transiently `failures` times before the first success.
    pub fn succeeding_after(name: impl Into<String>, failures: u32) -> Self {
        Self::new(name, MockBehaviour::SucceedAfter(failures))
    }

    pub fn interrupting_once(name: impl Into<String>) -> Self {
        Self::new(name, MockBehaviour::InterruptOnce)
    }

    /// Share a run-order log across several handlers to assert execution
    /// order.
    pub fn with_order_log(mut self, order: Arc<Mutex<Vec<String>>>) -> Self {
        self.order = Some(order);
        self
    }

    /// Number of times this handler has been executed.
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeafHandler for MockHandler {
    async fn execute(
        &self,
        _params: &serde_json::Value,
        _ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(order) = &self.order {
            order.lock().unwrap().push(self.name.clone());
        }

        match &self.behaviour {
            MockBehaviour::Succeed => Ok(()),
            MockBehaviour::FailTransient(msg) => Err(ActionError::Transient(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ActionError::Fatal(msg.clone())),
            MockBehaviour::SucceedAfter(failures) => {
                if previous < *failures {
                    Err(ActionError::Transient("not ready yet".into()))
                } else {
                    Ok(())
                }
            }
            MockBehaviour::InterruptOnce => {
                if previous == 0 {
                    Err(ActionError::Interrupted)
                } else {
                    Ok(())
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockLocator
// ---------------------------------------------------------------------------

/// Scripted locator: tests add and remove elements, set window text, and
/// inspect the interactions handlers performed.
#[derive(Default)]
pub struct MockLocator {
    elements: Mutex<HashMap<String, ElementHandle>>,
    window_text: Mutex<String>,
    clicked: Mutex<Vec<ElementHandle>>,
    text_entries: Mutex<Vec<(ElementHandle, String)>>,
    next_id: AtomicU64,
}

impl MockLocator {
    /// Make the selector match from now on; returns the handle `find` will
    /// produce.
    pub fn add_element(&self, selector: ElementSelector) -> ElementHandle {
        let handle = ElementHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        self.elements
            .lock()
            .unwrap()
            .insert(selector.to_string(), handle.clone());
        handle
    }

    pub fn remove_element(&self, selector: &ElementSelector) {
        self.elements.lock().unwrap().remove(&selector.to_string());
    }

    pub fn set_window_text(&self, text: impl Into<String>) {
        *self.window_text.lock().unwrap() = text.into();
    }

    /// Handles clicked so far, in call order.
    pub fn clicked(&self) -> Vec<ElementHandle> {
        self.clicked.lock().unwrap().clone()
    }

    /// `(handle, text)` pairs from `set_text` calls, in call order.
    pub fn text_entries(&self) -> Vec<(ElementHandle, String)> {
        self.text_entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ElementLocator for MockLocator {
    async fn find(
        &self,
        selector: &ElementSelector,
    ) -> Result<Option<ElementHandle>, LocatorError> {
        Ok(self
            .elements
            .lock()
            .unwrap()
            .get(&selector.to_string())
            .cloned())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), LocatorError> {
        self.clicked.lock().unwrap().push(element.clone());
        Ok(())
    }

    async fn set_text(&self, element: &ElementHandle, text: &str) -> Result<(), LocatorError> {
        self.text_entries
            .lock()
            .unwrap()
            .push((element.clone(), text.to_owned()));
        Ok(())
    }

    async fn text_of(&self, element: &ElementHandle) -> Result<String, LocatorError> {
        let entries = self.text_entries.lock().unwrap();
        Ok(entries
            .iter()
            .rev()
            .find(|(h, _)| h == element)
            .map(|(_, t)| t.clone())
            .unwrap_or_default())
    }

    async fn window_text(&self) -> Result<String, LocatorError> {
        Ok(self.window_text.lock().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Environment;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn succeed_after_counts_failures() {
        let handler = MockHandler::succeeding_after("flaky", 2);
        let mut env = Environment::new();
        let locator = MockLocator::default();
        let cancel = CancellationToken::new();
        let mut ctx = ActionContext {
            env: &mut env,
            locator: &locator,
            cancel: &cancel,
        };

        let params = serde_json::Value::Null;
        assert!(handler.execute(&params, &mut ctx).await.is_err());
        assert!(handler.execute(&params, &mut ctx).await.is_err());
        assert!(handler.execute(&params, &mut ctx).await.is_ok());
        assert_eq!(handler.call_count(), 3);
    }
}
