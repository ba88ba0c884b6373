//! Flow execution engine.
//!
//! `FlowExecutor` is the single sequential interpreter:
//! 1. Runs a flow's top-level sequence in declaration order, recording the
//!    current position for pause/resume.
//! 2. Applies the same sequence algorithm, recursively, to every composite
//!    action's child collections — there is exactly one execution algorithm
//!    in the system.
//! 3. Wraps leaf execution in the leaf's retry policy.
//! 4. Translates leaf faults into `Outcome::Failure` and observed
//!    cancellation into `Outcome::Paused`; no raw error crosses this
//!    boundary.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use actions::{ActionContext, ElementLocator, Environment, LeafHandler};

use crate::error::EngineError;
use crate::model::{
    Action, ActionState, Flow, ForLoopAction, IfAction, LeafAction, Sequence, WhileLoopAction,
};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of executing a flow, a sequence, or a single action.
///
/// Exactly three outcomes exist: success, genuine failure, and a resumable
/// pause. Control flow is visible in this type rather than hidden in
/// exception handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A genuine fault — element not found after retries, poll timeout, a
    /// handler error. The reason is host-facing text.
    Failure(String),
    /// Cooperative cancellation, not an error. Re-invoking `execute` resumes
    /// from the recorded position.
    Paused,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a paused flow re-enters nested composites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumeMode {
    /// Only the top-level position is honoured; composites re-run their
    /// children from the start when re-entered. This matches the historical
    /// shallow `CurrentAction` bookkeeping and may re-run completed inner
    /// siblings.
    #[default]
    Shallow,
    /// Every sequence keeps its own cursor, so a pause deep inside a
    /// composite resumes exactly where it stopped.
    FullPath,
}

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    pub resume_mode: ResumeMode,
}

/// Host hook for observing state transitions as they happen.
pub trait StateObserver: Send + Sync {
    /// `path` identifies the node (`actions[2].body[0]` style, `actions`
    /// for the flow itself).
    fn on_transition(&self, path: &str, state: ActionState);
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps leaf `kind` strings to handler implementations — the allow-list of
/// executable leaf kinds.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn LeafHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in leaf vocabulary.
    pub fn with_builtins() -> Self {
        use actions::builtin::*;

        let mut registry = Self::new();
        registry.insert("click", Arc::new(ClickHandler));
        registry.insert("set_text", Arc::new(SetTextHandler));
        registry.insert("wait_for_element", Arc::new(WaitForElementHandler));
        registry.insert("window_text_search", Arc::new(WindowTextSearchHandler));
        registry.insert("set_variable", Arc::new(SetVariableHandler));
        registry.insert("delay", Arc::new(DelayHandler));
        registry
    }

    /// Register a handler for a leaf kind.
    ///
    /// # Errors
    /// [`EngineError::DuplicateKind`] if the kind is already taken.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        handler: Arc<dyn LeafHandler>,
    ) -> Result<(), EngineError> {
        let kind = kind.into();
        if self.handlers.contains_key(&kind) {
            return Err(EngineError::DuplicateKind(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    fn insert(&mut self, kind: &str, handler: Arc<dyn LeafHandler>) {
        self.handlers.insert(kind.to_owned(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<&Arc<dyn LeafHandler>> {
        self.handlers.get(kind)
    }

    /// Registered kinds, sorted for stable reporting.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

// ---------------------------------------------------------------------------
// FlowExecutor
// ---------------------------------------------------------------------------

/// Strictly sequential interpreter for one flow at a time.
///
/// Construct one executor per host (or per run) and call
/// [`FlowExecutor::execute`]. Re-invoking `execute` on a paused or failed
/// flow resumes at the recorded top-level position, re-executing the
/// recorded action; everything before it is treated as already complete.
pub struct FlowExecutor {
    registry: ActionRegistry,
    locator: Arc<dyn ElementLocator>,
    config: ExecutorConfig,
    observer: Option<Arc<dyn StateObserver>>,
}

type BoxOutcome<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

impl FlowExecutor {
    pub fn new(registry: ActionRegistry, locator: Arc<dyn ElementLocator>) -> Self {
        Self {
            registry,
            locator,
            config: ExecutorConfig::default(),
            observer: None,
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run the flow to completion, failure, or pause.
    ///
    /// The cancellation token is threaded down through every nested sequence
    /// run and every leaf handler; observing it at any depth unwinds to a
    /// `Paused` flow that this method can later resume.
    #[instrument(skip(self, flow, cancel), fields(flow = %flow.name))]
    pub async fn execute(&self, flow: &mut Flow, cancel: CancellationToken) -> Outcome {
        let Flow {
            sequence,
            environment,
            ..
        } = flow;

        info!(actions = sequence.len(), "executing flow");
        let outcome = self
            .run_sequence("actions", sequence, environment, &cancel)
            .await;

        match &outcome {
            Outcome::Success => info!("flow completed"),
            Outcome::Paused => info!(at = ?sequence.cursor, "flow paused"),
            Outcome::Failure(reason) => error!(%reason, "flow failed"),
        }
        outcome
    }

    // -----------------------------------------------------------------------
    // The one sequence algorithm
    // -----------------------------------------------------------------------

    /// Run a sequence in declaration order, honouring a recorded resume
    /// position. Used for the top-level flow sequence and, recursively, for
    /// every composite child collection.
    async fn run_sequence(
        &self,
        path: &str,
        seq: &mut Sequence,
        env: &mut Environment,
        cancel: &CancellationToken,
    ) -> Outcome {
        let start = match seq.state {
            // Resumption re-executes the recorded action; the prefix before
            // it is treated as already complete.
            ActionState::Paused | ActionState::Failed => {
                let at = seq.cursor.unwrap_or(0);
                info!(path, resume_at = at, "resuming sequence");
                at
            }
            _ => 0,
        };

        self.transition(path, &mut seq.state, ActionState::Running);

        for index in start..seq.actions.len() {
            seq.cursor = Some(index);
            let action_path = format!("{path}[{index}]");

            match self
                .execute_action(&action_path, &mut seq.actions[index], env, cancel)
                .await
            {
                Outcome::Success => {}
                Outcome::Paused => {
                    self.transition(path, &mut seq.state, ActionState::Paused);
                    return Outcome::Paused;
                }
                Outcome::Failure(reason) => {
                    self.transition(path, &mut seq.state, ActionState::Failed);
                    return Outcome::Failure(reason);
                }
            }
        }

        seq.cursor = None;
        self.transition(path, &mut seq.state, ActionState::Completed);
        Outcome::Success
    }

    /// Dispatch one action. Boxed because composites recurse back into
    /// sequence runs (and a for-loop's init/increment recurse directly).
    fn execute_action<'a>(
        &'a self,
        path: &'a str,
        action: &'a mut Action,
        env: &'a mut Environment,
        cancel: &'a CancellationToken,
    ) -> BoxOutcome<'a> {
        Box::pin(async move {
            if !action.enabled() {
                debug!(path, name = action.display_name(), "action disabled, skipping");
                return Outcome::Success;
            }

            // Pause before starting the step so a resume re-executes it.
            if cancel.is_cancelled() {
                return Outcome::Paused;
            }

            trace!(path, name = action.display_name(), "executing action");
            match action {
                Action::Leaf(leaf) => self.execute_leaf(path, leaf, env, cancel).await,
                Action::If(cond) => self.execute_if(path, cond, env, cancel).await,
                Action::While(looped) => self.execute_while(path, looped, env, cancel).await,
                Action::For(looped) => self.execute_for(path, looped, env, cancel).await,
            }
        })
    }

    // -----------------------------------------------------------------------
    // Leaf execution with the retry wrapper
    // -----------------------------------------------------------------------

    async fn execute_leaf(
        &self,
        path: &str,
        leaf: &mut LeafAction,
        env: &mut Environment,
        cancel: &CancellationToken,
    ) -> Outcome {
        let Some(handler) = self.registry.get(&leaf.kind) else {
            let reason = format!("no handler registered for action kind '{}'", leaf.kind);
            error!(path, %reason, "cannot execute leaf");
            self.transition(path, &mut leaf.state, ActionState::Failed);
            return Outcome::Failure(reason);
        };
        let handler = Arc::clone(handler);

        let retry = leaf.retry.unwrap_or_default();
        let total_attempts = retry.retry_times + 1;

        self.transition(path, &mut leaf.state, ActionState::Running);

        let mut attempt = 1u32;
        loop {
            if cancel.is_cancelled() {
                self.transition(path, &mut leaf.state, ActionState::Paused);
                return Outcome::Paused;
            }

            let mut ctx = ActionContext {
                env: &mut *env,
                locator: self.locator.as_ref(),
                cancel,
            };

            match handler.execute(&leaf.params, &mut ctx).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(path, attempt, "leaf succeeded after retry");
                    }
                    self.transition(path, &mut leaf.state, ActionState::Completed);
                    return Outcome::Success;
                }

                Err(actions::ActionError::Interrupted) => {
                    info!(path, "leaf interrupted, pausing");
                    self.transition(path, &mut leaf.state, ActionState::Paused);
                    return Outcome::Paused;
                }

                Err(actions::ActionError::Fatal(reason)) => {
                    error!(path, %reason, "leaf failed fatally");
                    self.transition(path, &mut leaf.state, ActionState::Failed);
                    return Outcome::Failure(reason);
                }

                Err(actions::ActionError::Transient(reason)) => {
                    if attempt < total_attempts {
                        warn!(
                            path,
                            attempt,
                            total_attempts,
                            delay_ms = retry.retry_delay_ms,
                            %reason,
                            "transient failure, retrying"
                        );
                        // Interruptible delay between attempt pairs only.
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                self.transition(path, &mut leaf.state, ActionState::Paused);
                                return Outcome::Paused;
                            }
                            _ = tokio::time::sleep(Duration::from_millis(retry.retry_delay_ms)) => {}
                        }
                        attempt += 1;
                    } else {
                        error!(path, attempts = total_attempts, %reason, "retries exhausted");
                        self.transition(path, &mut leaf.state, ActionState::Failed);
                        return Outcome::Failure(reason);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Composite actions
    // -----------------------------------------------------------------------

    async fn execute_if(
        &self,
        path: &str,
        action: &mut IfAction,
        env: &mut Environment,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.transition(path, &mut action.state, ActionState::Running);

        // Full-path resume: an interrupted branch takes priority over
        // re-evaluating the condition, which might have flipped meanwhile.
        if self.config.resume_mode == ResumeMode::FullPath {
            if needs_resume(&action.then_branch) {
                let outcome = self
                    .run_sequence(&format!("{path}.then"), &mut action.then_branch, env, cancel)
                    .await;
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }
            if needs_resume(&action.else_branch) {
                let outcome = self
                    .run_sequence(&format!("{path}.else"), &mut action.else_branch, env, cancel)
                    .await;
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }
        } else {
            action.then_branch.reset();
            action.else_branch.reset();
        }

        let Some(condition) = &action.condition else {
            let reason = format!("if action '{}' has no condition", display_of(&action.name, "if"));
            self.transition(path, &mut action.state, ActionState::Failed);
            return Outcome::Failure(reason);
        };

        let verdict = match condition.evaluate(env, self.locator.as_ref()).await {
            Ok(v) => v,
            Err(e) => {
                let reason = format!("condition evaluation failed: {e}");
                error!(path, %reason, "if condition error");
                self.transition(path, &mut action.state, ActionState::Failed);
                return Outcome::Failure(reason);
            }
        };
        debug!(path, verdict, "if condition evaluated");

        let outcome = if verdict {
            self.run_sequence(&format!("{path}.then"), &mut action.then_branch, env, cancel)
                .await
        } else {
            self.run_sequence(&format!("{path}.else"), &mut action.else_branch, env, cancel)
                .await
        };
        self.mirror(path, &mut action.state, &outcome);
        outcome
    }

    async fn execute_while(
        &self,
        path: &str,
        action: &mut WhileLoopAction,
        env: &mut Environment,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.transition(path, &mut action.state, ActionState::Running);
        let body_path = format!("{path}.body");

        // Full-path resume: finish the interrupted body iteration before the
        // condition is consulted again.
        if self.config.resume_mode == ResumeMode::FullPath && needs_resume(&action.body) {
            let outcome = self.run_sequence(&body_path, &mut action.body, env, cancel).await;
            if !outcome.is_success() {
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }
        } else if self.config.resume_mode == ResumeMode::Shallow {
            action.body.reset();
        }

        let Some(condition) = &action.condition else {
            let reason = format!(
                "while loop '{}' has no condition",
                display_of(&action.name, "while")
            );
            self.transition(path, &mut action.state, ActionState::Failed);
            return Outcome::Failure(reason);
        };

        let mut iterations = 0u64;
        loop {
            if cancel.is_cancelled() {
                self.transition(path, &mut action.state, ActionState::Paused);
                return Outcome::Paused;
            }

            let keep_going = match condition.evaluate(env, self.locator.as_ref()).await {
                Ok(v) => v,
                Err(e) => {
                    let reason = format!("condition evaluation failed: {e}");
                    error!(path, %reason, "while condition error");
                    self.transition(path, &mut action.state, ActionState::Failed);
                    return Outcome::Failure(reason);
                }
            };
            if !keep_going {
                debug!(path, iterations, "while condition false, loop complete");
                self.transition(path, &mut action.state, ActionState::Completed);
                return Outcome::Success;
            }

            iterations += 1;
            trace!(path, iteration = iterations, "while body iteration");
            let outcome = self.run_sequence(&body_path, &mut action.body, env, cancel).await;
            if !outcome.is_success() {
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }
        }
    }

    async fn execute_for(
        &self,
        path: &str,
        action: &mut ForLoopAction,
        env: &mut Environment,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.transition(path, &mut action.state, ActionState::Running);
        let body_path = format!("{path}.body");

        let full_path = self.config.resume_mode == ResumeMode::FullPath;
        let resuming_body = full_path && needs_resume(&action.body);
        let resuming_increment = full_path
            && action
                .increment
                .as_deref()
                .map(|a| matches!(a.state(), ActionState::Paused | ActionState::Failed))
                .unwrap_or(false);
        if self.config.resume_mode == ResumeMode::Shallow {
            action.body.reset();
        }

        if resuming_increment {
            // The pause hit the increment after a completed body iteration;
            // finish it and fall into the normal cycle.
            if let Some(increment) = &mut action.increment {
                let outcome = self
                    .execute_action(&format!("{path}.increment"), increment, env, cancel)
                    .await;
                if !outcome.is_success() {
                    self.mirror(path, &mut action.state, &outcome);
                    return outcome;
                }
            }
        } else if resuming_body {
            // Finish the interrupted iteration: body, then increment, then
            // fall into the normal check-run-increment cycle.
            let outcome = self.run_sequence(&body_path, &mut action.body, env, cancel).await;
            if !outcome.is_success() {
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }
            if let Some(increment) = &mut action.increment {
                let outcome = self
                    .execute_action(&format!("{path}.increment"), increment, env, cancel)
                    .await;
                if !outcome.is_success() {
                    self.mirror(path, &mut action.state, &outcome);
                    return outcome;
                }
            }
        } else if let Some(init) = &mut action.init {
            // Init runs exactly once, before the first condition check.
            let outcome = self
                .execute_action(&format!("{path}.init"), init, env, cancel)
                .await;
            if !outcome.is_success() {
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }
        }

        let Some(condition) = &action.condition else {
            let reason = format!(
                "for loop '{}' has no condition",
                display_of(&action.name, "for")
            );
            self.transition(path, &mut action.state, ActionState::Failed);
            return Outcome::Failure(reason);
        };

        loop {
            if cancel.is_cancelled() {
                self.transition(path, &mut action.state, ActionState::Paused);
                return Outcome::Paused;
            }

            let keep_going = match condition.evaluate(env, self.locator.as_ref()).await {
                Ok(v) => v,
                Err(e) => {
                    let reason = format!("condition evaluation failed: {e}");
                    error!(path, %reason, "for condition error");
                    self.transition(path, &mut action.state, ActionState::Failed);
                    return Outcome::Failure(reason);
                }
            };
            if !keep_going {
                self.transition(path, &mut action.state, ActionState::Completed);
                return Outcome::Success;
            }

            let outcome = self.run_sequence(&body_path, &mut action.body, env, cancel).await;
            if !outcome.is_success() {
                // Increment never runs after a failing or pausing body.
                self.mirror(path, &mut action.state, &outcome);
                return outcome;
            }

            if let Some(increment) = &mut action.increment {
                let outcome = self
                    .execute_action(&format!("{path}.increment"), increment, env, cancel)
                    .await;
                if !outcome.is_success() {
                    self.mirror(path, &mut action.state, &outcome);
                    return outcome;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // State bookkeeping
    // -----------------------------------------------------------------------

    fn transition(&self, path: &str, slot: &mut ActionState, next: ActionState) {
        if *slot == next {
            return;
        }
        *slot = next;
        trace!(path, state = ?next, "state transition");
        if let Some(observer) = &self.observer {
            observer.on_transition(path, next);
        }
    }

    fn mirror(&self, path: &str, slot: &mut ActionState, outcome: &Outcome) {
        let state = match outcome {
            Outcome::Success => ActionState::Completed,
            Outcome::Paused => ActionState::Paused,
            Outcome::Failure(_) => ActionState::Failed,
        };
        self.transition(path, slot, state);
    }
}

/// A sequence interrupted mid-run that full-path resume should re-enter.
fn needs_resume(seq: &Sequence) -> bool {
    matches!(seq.state, ActionState::Paused | ActionState::Failed)
}

fn display_of<'a>(name: &'a str, fallback: &'a str) -> &'a str {
    if name.is_empty() {
        fallback
    } else {
        name
    }
}
