//! `engine` crate — core domain model, static validation, and the flow
//! execution engine.

pub mod error;
pub mod executor;
pub mod model;
pub mod validator;

pub use error::EngineError;
pub use executor::{
    ActionRegistry, ExecutorConfig, FlowExecutor, Outcome, ResumeMode, StateObserver,
};
pub use model::{
    Action, ActionState, Flow, ForLoopAction, IfAction, LeafAction, RetryPolicy, Sequence,
    WhileLoopAction,
};
pub use validator::{
    validate_flow, FlowValidationSummary, Severity, SyntaxError, ValidateOptions,
};

#[cfg(test)]
mod executor_tests;
