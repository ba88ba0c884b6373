//! `actions` crate — the leaf-action contract, the element-locator boundary,
//! expression evaluation, and the built-in leaf vocabulary.
//!
//! Every leaf kind — built-in and host extension alike — implements
//! [`LeafHandler`]. The engine crate dispatches execution through this trait
//! object, keyed by the leaf's `kind` string.

pub mod builtin;
pub mod env;
pub mod error;
pub mod expr;
pub mod locator;
pub mod mock;
pub mod poll;
pub mod traits;

pub use env::{Environment, Value, ValueType};
pub use error::ActionError;
pub use expr::{Condition, ExprError, Expression};
pub use locator::{
    ElementHandle, ElementLocator, ElementSelector, LocatorError, NullLocator, SelectorKind,
};
pub use poll::PollPolicy;
pub use traits::{ActionContext, LeafHandler};
