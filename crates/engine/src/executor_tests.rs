//! Integration tests for the flow execution engine.
//!
//! These tests use `MockHandler` and `MockLocator` so no real automation
//! backend is required. Timing-sensitive tests (retry delays, polling) run
//! under tokio's paused virtual clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use actions::mock::{MockHandler, MockLocator};
use actions::{Condition, Expression};

use crate::executor::{ActionRegistry, ExecutorConfig, FlowExecutor, Outcome, ResumeMode};
use crate::model::{
    Action, ActionState, Flow, ForLoopAction, IfAction, LeafAction, RetryPolicy, WhileLoopAction,
};

type OrderLog = Arc<Mutex<Vec<String>>>;

fn order_log() -> OrderLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn leaf(kind: &str) -> Action {
    Action::Leaf(LeafAction::new(kind, json!({})))
}

fn retried_leaf(kind: &str, retry_times: u32, retry_delay_ms: u64) -> Action {
    Action::Leaf(LeafAction::new(kind, json!({})).with_retry(RetryPolicy {
        retry_times,
        retry_delay_ms,
    }))
}

/// Registry of mock handlers plus handles for call-count assertions.
fn registry_of(handlers: Vec<(&str, Arc<MockHandler>)>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    for (kind, handler) in handlers {
        registry.register(kind, handler).expect("unique kind");
    }
    registry
}

fn executor(registry: ActionRegistry) -> FlowExecutor {
    FlowExecutor::new(registry, Arc::new(MockLocator::default()))
}

/// `i < limit` over the flow environment.
fn count_below(limit: i64) -> Condition {
    Condition::Expression(Expression::lt(
        Expression::variable("i"),
        Expression::literal(limit),
    ))
}

/// A real `set_variable` leaf computing `i = i + 1`.
fn bump_count() -> Action {
    Action::Leaf(LeafAction::new(
        "set_variable",
        json!({
            "name": "i",
            "value": {
                "op": "add",
                "left": { "op": "variable", "name": "i" },
                "right": { "op": "literal", "value": 1 }
            }
        }),
    ))
}

// ============================================================
// Run order and the scenario example
// ============================================================

#[tokio::test]
async fn if_else_scenario_runs_a_then_c_then_d() {
    let order = order_log();
    let a = Arc::new(MockHandler::succeeding("a").with_order_log(order.clone()));
    let b = Arc::new(MockHandler::succeeding("b").with_order_log(order.clone()));
    let c = Arc::new(MockHandler::succeeding("c").with_order_log(order.clone()));
    let d = Arc::new(MockHandler::succeeding("d").with_order_log(order.clone()));

    let mut branch = IfAction::new(Condition::Literal(false));
    branch.then_branch = vec![leaf("b")].into();
    branch.else_branch = vec![leaf("c")].into();

    let mut flow = Flow::with_actions(
        "scenario",
        vec![leaf("a"), Action::If(branch), leaf("d")],
    );

    let exec = executor(registry_of(vec![
        ("a", a.clone()),
        ("b", b.clone()),
        ("c", c.clone()),
        ("d", d.clone()),
    ]));
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;

    assert_eq!(outcome, Outcome::Success);
    assert_eq!(flow.state(), ActionState::Completed);
    assert_eq!(*order.lock().unwrap(), vec!["a", "c", "d"]);
    assert_eq!(b.call_count(), 0);
}

#[tokio::test]
async fn empty_else_branch_trivially_succeeds() {
    let a = Arc::new(MockHandler::succeeding("a"));

    let mut branch = IfAction::new(Condition::Literal(false));
    branch.then_branch = vec![leaf("a")].into();

    let mut flow = Flow::with_actions("no-else", vec![Action::If(branch)]);
    let exec = executor(registry_of(vec![("a", a.clone())]));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(a.call_count(), 0);
}

// ============================================================
// Pause and resume
// ============================================================

#[tokio::test]
async fn resume_reexecutes_the_interrupted_action_only() {
    let a = Arc::new(MockHandler::succeeding("a"));
    let b = Arc::new(MockHandler::interrupting_once("b"));
    let c = Arc::new(MockHandler::succeeding("c"));

    let mut flow = Flow::with_actions("resumable", vec![leaf("a"), leaf("b"), leaf("c")]);
    let exec = executor(registry_of(vec![
        ("a", a.clone()),
        ("b", b.clone()),
        ("c", c.clone()),
    ]));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Paused);
    assert_eq!(flow.state(), ActionState::Paused);
    assert_eq!(flow.current_index(), Some(1));
    assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 1, 0));

    // Resume: action b re-executes, a does not.
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(flow.state(), ActionState::Completed);
    assert_eq!((a.call_count(), b.call_count(), c.call_count()), (1, 2, 1));
}

#[tokio::test]
async fn precancelled_token_pauses_before_the_first_action() {
    let a = Arc::new(MockHandler::succeeding("a"));
    let mut flow = Flow::with_actions("cancelled", vec![leaf("a")]);
    let exec = executor(registry_of(vec![("a", a.clone())]));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = exec.execute(&mut flow, cancel).await;

    assert_eq!(outcome, Outcome::Paused);
    assert_eq!(flow.current_index(), Some(0));
    assert_eq!(a.call_count(), 0);

    // A fresh token resumes from the recorded position.
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(a.call_count(), 1);
}

// ============================================================
// Fail-fast
// ============================================================

#[tokio::test]
async fn fatal_action_stops_the_sequence() {
    let ok = Arc::new(MockHandler::succeeding("ok"));
    let boom = Arc::new(MockHandler::failing_fatal("boom", "something broke irreparably"));
    let never = Arc::new(MockHandler::succeeding("never"));

    let mut flow = Flow::with_actions("failing", vec![leaf("ok"), leaf("boom"), leaf("never")]);
    let exec = executor(registry_of(vec![
        ("ok", ok.clone()),
        ("boom", boom.clone()),
        ("never", never.clone()),
    ]));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    match outcome {
        Outcome::Failure(reason) => assert!(reason.contains("irreparably")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(flow.state(), ActionState::Failed);
    assert_eq!(never.call_count(), 0);
}

#[tokio::test]
async fn unknown_leaf_kind_fails() {
    let mut flow = Flow::with_actions("unknown", vec![leaf("nope")]);
    let exec = executor(ActionRegistry::new());

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    match outcome {
        Outcome::Failure(reason) => assert!(reason.contains("no handler registered")),
        other => panic!("expected failure, got {other:?}"),
    }
}

// ============================================================
// Retry attempt count and delay placement
// ============================================================

#[tokio::test(start_paused = true)]
async fn always_failing_leaf_attempts_retry_times_plus_one() {
    let flaky = Arc::new(MockHandler::failing_transient("flaky", "element not found"));

    let mut flow = Flow::with_actions("retrying", vec![retried_leaf("flaky", 2, 250)]);
    let exec = executor(registry_of(vec![("flaky", flaky.clone())]));

    let started = tokio::time::Instant::now();
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Failure(_)));
    assert_eq!(flaky.call_count(), 3);
    // Two delays between three attempts; none after the last.
    assert_eq!(started.elapsed(), Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_recover_within_the_retry_budget() {
    let flaky = Arc::new(MockHandler::succeeding_after("flaky", 2));

    let mut flow = Flow::with_actions("recovering", vec![retried_leaf("flaky", 3, 100)]);
    let exec = executor(registry_of(vec![("flaky", flaky.clone())]));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(flaky.call_count(), 3);
    assert_eq!(flow.state(), ActionState::Completed);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_the_retry_delay_pauses() {
    let flaky = Arc::new(MockHandler::failing_transient("flaky", "not yet"));

    let mut flow = Flow::with_actions("cancel-mid-retry", vec![retried_leaf("flaky", 5, 60_000)]);
    let exec = executor(registry_of(vec![("flaky", flaky.clone())]));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let outcome = exec.execute(&mut flow, cancel).await;
    assert_eq!(outcome, Outcome::Paused);
    // The first attempt ran; no further attempt was consumed by the cancel.
    assert_eq!(flaky.call_count(), 1);
}

// ============================================================
// While-loop termination
// ============================================================

#[tokio::test]
async fn while_loop_runs_body_until_condition_turns_false() {
    let tick = Arc::new(MockHandler::succeeding("tick"));

    let looped = WhileLoopAction::new(count_below(3), vec![leaf("tick"), bump_count()]);
    let mut flow = Flow::with_actions("counting", vec![Action::While(looped)]);
    flow.environment.set("i", actions::Value::Int(0));

    let mut registry = ActionRegistry::with_builtins();
    registry.register("tick", tick.clone()).unwrap();
    let exec = FlowExecutor::new(registry, Arc::new(MockLocator::default()));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(tick.call_count(), 3);
    assert_eq!(flow.environment.get("i"), Some(&actions::Value::Int(3)));
    assert_eq!(flow.state(), ActionState::Completed);
}

#[tokio::test]
async fn while_body_failure_propagates_without_rechecking_the_condition() {
    let boom = Arc::new(MockHandler::failing_fatal("boom", "backend gone"));

    let looped = WhileLoopAction::new(Condition::Literal(true), vec![leaf("boom")]);
    let mut flow = Flow::with_actions("diverging", vec![Action::While(looped)]);

    let exec = executor(registry_of(vec![("boom", boom.clone())]));
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Failure(_)));
    assert_eq!(boom.call_count(), 1);
    assert_eq!(flow.state(), ActionState::Failed);
}

// ============================================================
// For-loop ordering
// ============================================================

#[tokio::test]
async fn for_loop_runs_init_once_and_alternates_body_and_increment() {
    let body = Arc::new(MockHandler::succeeding("body"));

    let looped = ForLoopAction::new(count_below(2), vec![leaf("body")])
        .with_init(Action::Leaf(LeafAction::new(
            "set_variable",
            json!({ "name": "i", "value": { "op": "literal", "value": 0 } }),
        )))
        .with_increment(bump_count());
    let mut flow = Flow::with_actions("counted", vec![Action::For(looped)]);

    let mut registry = ActionRegistry::with_builtins();
    registry.register("body", body.clone()).unwrap();
    let exec = FlowExecutor::new(registry, Arc::new(MockLocator::default()));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(body.call_count(), 2);
    assert_eq!(flow.environment.get("i"), Some(&actions::Value::Int(2)));
}

#[tokio::test]
async fn increment_never_runs_after_a_failing_body() {
    let boom = Arc::new(MockHandler::failing_fatal("boom", "dead"));
    let inc = Arc::new(MockHandler::succeeding("inc"));

    let looped = ForLoopAction::new(Condition::Literal(true), vec![leaf("boom")])
        .with_increment(leaf("inc"));
    let mut flow = Flow::with_actions("no-increment", vec![Action::For(looped)]);

    let exec = executor(registry_of(vec![("boom", boom.clone()), ("inc", inc.clone())]));
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Failure(_)));
    assert_eq!(boom.call_count(), 1);
    assert_eq!(inc.call_count(), 0);
}

// ============================================================
// Resume granularity: shallow vs full-path
// ============================================================

/// Body: [prefix, pause-once, finish(i = 1)] under condition `i < 1`.
/// Shallow resume re-runs the completed prefix; full-path resume does not.
fn pausing_loop_flow() -> (Flow, Arc<MockHandler>, Arc<MockHandler>, ActionRegistry) {
    let prefix = Arc::new(MockHandler::succeeding("prefix"));
    let pauser = Arc::new(MockHandler::interrupting_once("pauser"));

    let looped = WhileLoopAction::new(
        count_below(1),
        vec![
            leaf("prefix"),
            leaf("pauser"),
            Action::Leaf(LeafAction::new(
                "set_variable",
                json!({ "name": "i", "value": { "op": "literal", "value": 1 } }),
            )),
        ],
    );
    let mut flow = Flow::with_actions("pausing", vec![Action::While(looped)]);
    flow.environment.set("i", actions::Value::Int(0));

    let mut registry = ActionRegistry::with_builtins();
    registry.register("prefix", prefix.clone()).unwrap();
    registry.register("pauser", pauser.clone()).unwrap();

    (flow, prefix, pauser, registry)
}

#[tokio::test]
async fn shallow_resume_reruns_completed_inner_siblings() {
    let (mut flow, prefix, pauser, registry) = pausing_loop_flow();
    let exec = FlowExecutor::new(registry, Arc::new(MockLocator::default()));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Paused);
    // Only the top-level position is recorded.
    assert_eq!(flow.current_index(), Some(0));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    // The prefix ran again when the loop body restarted from scratch.
    assert_eq!(prefix.call_count(), 2);
    assert_eq!(pauser.call_count(), 2);
}

#[tokio::test]
async fn full_path_resume_continues_inside_the_composite() {
    let (mut flow, prefix, pauser, registry) = pausing_loop_flow();
    let exec = FlowExecutor::new(registry, Arc::new(MockLocator::default())).with_config(
        ExecutorConfig {
            resume_mode: ResumeMode::FullPath,
        },
    );

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Paused);

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    // The completed prefix was not re-executed.
    assert_eq!(prefix.call_count(), 1);
    assert_eq!(pauser.call_count(), 2);
}

// ============================================================
// Conditions and enablement
// ============================================================

#[tokio::test]
async fn non_boolean_if_condition_fails_fast() {
    let then = Arc::new(MockHandler::succeeding("then"));

    let mut branch = IfAction::new(Condition::Expression(Expression::add(
        Expression::literal(1i64),
        Expression::literal(2i64),
    )));
    branch.then_branch = vec![leaf("then")].into();

    let mut flow = Flow::with_actions("coercion-free", vec![Action::If(branch)]);
    let exec = executor(registry_of(vec![("then", then.clone())]));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    match outcome {
        Outcome::Failure(reason) => assert!(reason.contains("boolean")),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(then.call_count(), 0);
}

#[tokio::test]
async fn missing_while_condition_fails_at_runtime() {
    let mut looped = WhileLoopAction::new(Condition::Literal(true), vec![]);
    looped.condition = None;
    let mut flow = Flow::with_actions("conditionless", vec![Action::While(looped)]);

    let exec = executor(ActionRegistry::new());
    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;

    match outcome {
        Outcome::Failure(reason) => assert!(reason.contains("no condition")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_actions_are_skipped() {
    let boom = Arc::new(MockHandler::failing_fatal("boom", "should never run"));

    let mut disabled = LeafAction::new("boom", json!({}));
    disabled.enabled = false;

    let mut flow = Flow::with_actions("skipping", vec![Action::Leaf(disabled)]);
    let exec = executor(registry_of(vec![("boom", boom.clone())]));

    let outcome = exec.execute(&mut flow, CancellationToken::new()).await;
    assert_eq!(outcome, Outcome::Success);
    assert_eq!(boom.call_count(), 0);
}

// ============================================================
// State observation
// ============================================================

#[tokio::test]
async fn observer_sees_flow_level_transitions() {
    struct Recorder(Mutex<Vec<(String, ActionState)>>);
    impl crate::executor::StateObserver for Recorder {
        fn on_transition(&self, path: &str, state: ActionState) {
            self.0.lock().unwrap().push((path.to_owned(), state));
        }
    }

    let a = Arc::new(MockHandler::succeeding("a"));
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));

    let mut flow = Flow::with_actions("observed", vec![leaf("a")]);
    let exec = executor(registry_of(vec![("a", a)])).with_observer(recorder.clone());

    exec.execute(&mut flow, CancellationToken::new()).await;

    let seen = recorder.0.lock().unwrap();
    assert!(seen.contains(&("actions".into(), ActionState::Running)));
    assert!(seen.contains(&("actions[0]".into(), ActionState::Completed)));
    assert!(seen.contains(&("actions".into(), ActionState::Completed)));
}
