//! Core domain model for the action tree.
//!
//! These types are the source of truth for what a flow looks like in
//! memory. They serialize to/from the JSON tree the editor persists: every
//! node carries a `type` discriminator, child collections nest under
//! well-known property names (`then`, `else`, `body`, `init`, `increment`),
//! and runtime bookkeeping never hits the wire.

use actions::{Condition, Environment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ActionState
// ---------------------------------------------------------------------------

/// Lifecycle state shared by flows, sequences, and individual actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded re-attempts for a leaf action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-attempts after the first try; total attempts = `retry_times + 1`.
    #[serde(default)]
    pub retry_times: u32,
    /// Delay between consecutive attempts, in milliseconds. The delay runs
    /// between attempt pairs only, never after the last one.
    #[serde(default)]
    pub retry_delay_ms: u64,
}

// ---------------------------------------------------------------------------
// Sequence
// ---------------------------------------------------------------------------

/// An ordered run of actions plus its runtime bookkeeping.
///
/// Serialized transparently as a bare JSON array; `state` and `cursor` are
/// in-memory only. The cursor is the resume position: while the sequence is
/// `Paused` or `Failed` it indexes the action to re-execute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence {
    pub actions: Vec<Action>,
    #[serde(skip)]
    pub state: ActionState,
    #[serde(skip)]
    pub cursor: Option<usize>,
}

impl Sequence {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            state: ActionState::Ready,
            cursor: None,
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Forget any recorded position so the next run starts from scratch.
    pub fn reset(&mut self) {
        self.state = ActionState::Ready;
        self.cursor = None;
    }
}

impl From<Vec<Action>> for Sequence {
    fn from(actions: Vec<Action>) -> Self {
        Self::new(actions)
    }
}

// ---------------------------------------------------------------------------
// Action variants
// ---------------------------------------------------------------------------

fn default_enabled() -> bool {
    true
}

/// An atomic step dispatched through the handler registry by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Registry key selecting the handler implementation.
    pub kind: String,
    /// Raw parameters, decoded by the matching handler.
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(skip)]
    pub state: ActionState,
}

impl LeafAction {
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            enabled: true,
            kind: kind.into(),
            params,
            retry: None,
            state: ActionState::Ready,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Conditional branch: runs `then` when the condition holds, `else`
/// otherwise. An empty `else` trivially succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, rename = "then")]
    pub then_branch: Sequence,
    #[serde(default, rename = "else")]
    pub else_branch: Sequence,
    /// Whether the editor shows the else branch.
    #[serde(default)]
    pub show_else: bool,
    #[serde(skip)]
    pub state: ActionState,
}

impl IfAction {
    pub fn new(condition: Condition) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            enabled: true,
            condition: Some(condition),
            then_branch: Sequence::default(),
            else_branch: Sequence::default(),
            show_else: false,
            state: ActionState::Ready,
        }
    }
}

/// Pre-condition loop: re-evaluates the condition before every body run and
/// completes successfully once it turns false. No built-in iteration cap —
/// cancellation is the only way out of an always-true loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhileLoopAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub body: Sequence,
    #[serde(skip)]
    pub state: ActionState,
}

impl WhileLoopAction {
    pub fn new(condition: Condition, body: Vec<Action>) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            enabled: true,
            condition: Some(condition),
            body: Sequence::new(body),
            state: ActionState::Ready,
        }
    }
}

/// Counted loop: `init` runs exactly once, then condition-check → body →
/// `increment` repeats until the condition turns false. Init and increment
/// are full actions so they fail and retry like any other step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForLoopAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<Box<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub increment: Option<Box<Action>>,
    #[serde(default)]
    pub body: Sequence,
    #[serde(skip)]
    pub state: ActionState,
}

impl ForLoopAction {
    pub fn new(condition: Condition, body: Vec<Action>) -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            enabled: true,
            init: None,
            condition: Some(condition),
            increment: None,
            body: Sequence::new(body),
            state: ActionState::Ready,
        }
    }

    pub fn with_init(mut self, init: Action) -> Self {
        self.init = Some(Box::new(init));
        self
    }

    pub fn with_increment(mut self, increment: Action) -> Self {
        self.increment = Some(Box::new(increment));
        self
    }

    /// Named single nested actions (init/increment), in declaration order.
    pub fn nested_actions(&self) -> Vec<(&'static str, &Action)> {
        let mut nested = Vec::new();
        if let Some(init) = &self.init {
            nested.push(("init", init.as_ref()));
        }
        if let Some(increment) = &self.increment {
            nested.push(("increment", increment.as_ref()));
        }
        nested
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One executable step in the tree — a leaf or a composite.
///
/// The composite set is closed and explicit; the open end of the system is
/// the leaf `kind` registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Leaf(LeafAction),
    If(IfAction),
    While(WhileLoopAction),
    For(ForLoopAction),
}

impl Action {
    /// The raw editor-assigned name (may be empty).
    pub fn name(&self) -> &str {
        match self {
            Action::Leaf(a) => &a.name,
            Action::If(a) => &a.name,
            Action::While(a) => &a.name,
            Action::For(a) => &a.name,
        }
    }

    /// Display string: the explicit name when set, otherwise derived from
    /// the action kind.
    pub fn display_name(&self) -> &str {
        let name = self.name();
        if !name.is_empty() {
            return name;
        }
        match self {
            Action::Leaf(a) => &a.kind,
            Action::If(_) => "if",
            Action::While(_) => "while",
            Action::For(_) => "for",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Action::Leaf(a) => &a.description,
            Action::If(a) => &a.description,
            Action::While(a) => &a.description,
            Action::For(a) => &a.description,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Action::Leaf(a) => a.enabled,
            Action::If(a) => a.enabled,
            Action::While(a) => a.enabled,
            Action::For(a) => a.enabled,
        }
    }

    pub fn state(&self) -> ActionState {
        match self {
            Action::Leaf(a) => a.state,
            Action::If(a) => a.state,
            Action::While(a) => a.state,
            Action::For(a) => a.state,
        }
    }

    /// Named ordered child sequences, in declaration order. This is the
    /// capability the validator recurses through instead of reflecting over
    /// properties; new composite kinds extend it explicitly.
    pub fn child_sequences(&self) -> Vec<(&'static str, &Sequence)> {
        match self {
            Action::Leaf(_) => Vec::new(),
            Action::If(a) => vec![("then", &a.then_branch), ("else", &a.else_branch)],
            Action::While(a) => vec![("body", &a.body)],
            Action::For(a) => vec![("body", &a.body)],
        }
    }

    /// Named single nested actions (a for-loop's init/increment).
    pub fn nested_actions(&self) -> Vec<(&'static str, &Action)> {
        match self {
            Action::For(a) => {
                let mut nested = Vec::new();
                if let Some(init) = &a.init {
                    nested.push(("init", init.as_ref()));
                }
                if let Some(increment) = &a.increment {
                    nested.push(("increment", increment.as_ref()));
                }
                nested
            }
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// The root container of a runnable action tree: an ordered top-level
/// sequence plus the environment its actions share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default, rename = "actions")]
    pub sequence: Sequence,
    pub created_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            environment: Environment::new(),
            sequence: Sequence::default(),
            created_at: Utc::now(),
        }
    }

    /// Convenience constructor for tests and hosts.
    pub fn with_actions(name: impl Into<String>, actions: Vec<Action>) -> Self {
        let mut flow = Self::new(name);
        flow.sequence = Sequence::new(actions);
        flow
    }

    /// The flow's state is its top-level sequence's state.
    pub fn state(&self) -> ActionState {
        self.sequence.state
    }

    /// Index of the current top-level action while the flow is running,
    /// paused, or failed.
    pub fn current_index(&self) -> Option<usize> {
        self.sequence.cursor
    }

    /// The current top-level action, used purely for resume bookkeeping.
    /// Always a member of the top-level sequence, never a nested child.
    pub fn current_action(&self) -> Option<&Action> {
        self.sequence
            .cursor
            .and_then(|i| self.sequence.actions.get(i))
    }

    pub fn from_json(content: &str) -> Result<Self, crate::EngineError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String, crate::EngineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actions::Expression;
    use serde_json::json;

    #[test]
    fn if_action_deserializes_from_editor_json() {
        let json = r#"{
            "type": "if",
            "name": "maybe close",
            "condition": false,
            "then": [{ "type": "leaf", "kind": "click", "params": {} }],
            "else": []
        }"#;

        let action: Action = serde_json::from_str(json).unwrap();
        let Action::If(a) = action else {
            panic!("expected an if action");
        };
        assert_eq!(a.name, "maybe close");
        assert_eq!(a.condition, Some(Condition::Literal(false)));
        assert_eq!(a.then_branch.len(), 1);
        assert!(a.else_branch.is_empty());
        assert_eq!(a.state, ActionState::Ready);
    }

    #[test]
    fn while_loop_deserializes_with_expression_condition() {
        let json = r#"{
            "type": "while",
            "condition": {
                "op": "lt",
                "left": { "op": "variable", "name": "i" },
                "right": { "op": "literal", "value": 3 }
            },
            "body": [{ "type": "leaf", "kind": "delay", "params": { "ms": 10 } }]
        }"#;

        let action: Action = serde_json::from_str(json).unwrap();
        let Action::While(a) = action else {
            panic!("expected a while action");
        };
        assert!(matches!(
            a.condition,
            Some(Condition::Expression(Expression::Lt { .. }))
        ));
        assert_eq!(a.body.len(), 1);
    }

    #[test]
    fn for_loop_keeps_init_and_increment_as_actions() {
        let json = r#"{
            "type": "for",
            "init": {
                "type": "leaf", "kind": "set_variable",
                "params": { "name": "i", "value": { "op": "literal", "value": 0 } }
            },
            "condition": true,
            "increment": {
                "type": "leaf", "kind": "set_variable",
                "params": {
                    "name": "i",
                    "value": {
                        "op": "add",
                        "left": { "op": "variable", "name": "i" },
                        "right": { "op": "literal", "value": 1 }
                    }
                }
            },
            "body": []
        }"#;

        let action: Action = serde_json::from_str(json).unwrap();
        let Action::For(a) = action else {
            panic!("expected a for action");
        };
        assert!(matches!(a.init.as_deref(), Some(Action::Leaf(_))));
        assert!(matches!(a.increment.as_deref(), Some(Action::Leaf(_))));
        assert_eq!(a.nested_actions().len(), 2);
    }

    #[test]
    fn flow_roundtrips_through_json() {
        let mut flow = Flow::with_actions(
            "login",
            vec![
                Action::Leaf(
                    LeafAction::new("click", json!({"selector": {"by": "name", "value": "Go"}}))
                        .with_retry(RetryPolicy {
                            retry_times: 2,
                            retry_delay_ms: 100,
                        }),
                ),
                Action::While(WhileLoopAction::new(Condition::Literal(false), Vec::new())),
            ],
        );
        flow.environment.set("attempts", actions::Value::Int(0));

        let json = flow.to_json().unwrap();
        let restored = Flow::from_json(&json).unwrap();

        assert_eq!(restored.id, flow.id);
        assert_eq!(restored.name, "login");
        assert_eq!(restored.sequence.len(), 2);
        assert_eq!(
            restored.environment.get("attempts"),
            Some(&actions::Value::Int(0))
        );
        // Runtime bookkeeping never hits the wire.
        assert_eq!(restored.state(), ActionState::Ready);
        assert_eq!(restored.current_index(), None);
    }

    #[test]
    fn display_name_derives_from_kind_when_unset() {
        let leaf = Action::Leaf(LeafAction::new("click", json!({})));
        assert_eq!(leaf.display_name(), "click");

        let named = Action::Leaf(LeafAction::new("click", json!({})).with_name("press go"));
        assert_eq!(named.display_name(), "press go");

        let composite = Action::While(WhileLoopAction::new(Condition::Literal(true), vec![]));
        assert_eq!(composite.display_name(), "while");
    }
}
