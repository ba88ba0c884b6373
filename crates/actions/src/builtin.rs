//! Built-in leaf handlers.
//!
//! Each handler decodes its own parameter struct from the action's raw
//! `params` JSON and performs one operation against the locator or the
//! environment. Element handles are acquired fresh on every attempt and
//! dropped before the attempt ends, so a retry never reuses a stale handle.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::ActionError;
use crate::expr::{ExprError, Expression};
use crate::locator::{ElementHandle, ElementSelector};
use crate::poll::{poll_until, PollPolicy};
use crate::traits::{ActionContext, LeafHandler};

fn decode<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, ActionError> {
    serde_json::from_value(params.clone())
        .map_err(|e| ActionError::Fatal(format!("invalid parameters: {e}")))
}

async fn find_required(
    ctx: &ActionContext<'_>,
    selector: &ElementSelector,
) -> Result<ElementHandle, ActionError> {
    ctx.locator
        .find(selector)
        .await?
        .ok_or_else(|| ActionError::Transient(format!("element not found: {selector}")))
}

// ---------------------------------------------------------------------------
// click
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ClickParams {
    selector: ElementSelector,
}

/// Locate an element and click it. A missing element is transient so the
/// leaf's retry policy can re-attempt the lookup.
pub struct ClickHandler;

#[async_trait]
impl LeafHandler for ClickHandler {
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let p: ClickParams = decode(params)?;
        let element = find_required(ctx, &p.selector).await?;
        ctx.locator.click(&element).await?;
        debug!(selector = %p.selector, "clicked element");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// set_text
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SetTextParams {
    selector: ElementSelector,
    text: String,
}

/// Locate an element and replace its text content.
pub struct SetTextHandler;

#[async_trait]
impl LeafHandler for SetTextHandler {
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let p: SetTextParams = decode(params)?;
        let element = find_required(ctx, &p.selector).await?;
        ctx.locator.set_text(&element, &p.text).await?;
        debug!(selector = %p.selector, "set element text");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// wait_for_element
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WaitForElementParams {
    selector: ElementSelector,
    #[serde(default)]
    poll: PollPolicy,
}

/// Poll until the selector matches an element, or the poll deadline passes.
pub struct WaitForElementHandler;

#[async_trait]
impl LeafHandler for WaitForElementHandler {
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let p: WaitForElementParams = decode(params)?;
        let what = format!("wait for element {}", p.selector);
        let locator = ctx.locator;
        let selector = &p.selector;
        poll_until(&p.poll, ctx.cancel, &what, move || async move {
            let found = locator.find(selector).await?;
            Ok(found.is_some())
        })
        .await?;
        debug!(selector = %p.selector, "element appeared");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// window_text_search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WindowTextSearchParams {
    text: String,
    #[serde(default)]
    poll: PollPolicy,
}

/// Poll the active window's text until it contains the given fragment.
pub struct WindowTextSearchHandler;

#[async_trait]
impl LeafHandler for WindowTextSearchHandler {
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let p: WindowTextSearchParams = decode(params)?;
        let what = format!("window text containing '{}'", p.text);
        let locator = ctx.locator;
        let needle = &p.text;
        poll_until(&p.poll, ctx.cancel, &what, move || async move {
            let content = locator.window_text().await?;
            Ok(content.contains(needle.as_str()))
        })
        .await?;
        debug!(text = %p.text, "window text found");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// set_variable
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SetVariableParams {
    name: String,
    value: Expression,
}

/// Evaluate an expression and store the result in the environment.
pub struct SetVariableHandler;

#[async_trait]
impl LeafHandler for SetVariableHandler {
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let p: SetVariableParams = decode(params)?;
        let value = p
            .value
            .evaluate(ctx.env, ctx.locator)
            .await
            .map_err(expr_error)?;
        ctx.env.set(p.name, value);
        Ok(())
    }
}

/// Locator faults inside an expression keep their transient/fatal nature;
/// everything else (bad types, undefined variables) is a fatal parameter
/// problem.
fn expr_error(err: ExprError) -> ActionError {
    match err {
        ExprError::Locator(e) => ActionError::from(e),
        other => ActionError::Fatal(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// delay
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DelayParams {
    ms: u64,
}

/// Interruptible fixed sleep.
pub struct DelayHandler;

#[async_trait]
impl LeafHandler for DelayHandler {
    async fn execute(
        &self,
        params: &serde_json::Value,
        ctx: &mut ActionContext<'_>,
    ) -> Result<(), ActionError> {
        let p: DelayParams = decode(params)?;
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ActionError::Interrupted),
            _ = tokio::time::sleep(Duration::from_millis(p.ms)) => Ok(()),
        }
    }
}
