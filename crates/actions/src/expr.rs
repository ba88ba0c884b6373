//! Condition expressions.
//!
//! A small typed tree evaluated against an [`Environment`]: literals,
//! variable reads, an element-existence predicate, boolean connectives,
//! comparisons, and arithmetic. Expressions are immutable once constructed
//! and re-evaluated on every loop iteration.
//!
//! Evaluation is async (the existence predicate queries the locator) and
//! recursive through a boxed future.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::{Environment, Value, ValueType};
use crate::locator::{ElementLocator, ElementSelector, LocatorError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while evaluating an expression.
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    /// A condition produced something other than a boolean. Conditions are
    /// never coerced; this is a fail-fast error.
    #[error("condition did not evaluate to a boolean (got {0})")]
    NotBoolean(ValueType),

    #[error(transparent)]
    Locator(#[from] LocatorError),
}

// ---------------------------------------------------------------------------
// Expression tree
// ---------------------------------------------------------------------------

/// One node of a condition expression, tagged by `op` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Expression {
    Literal { value: Value },
    Variable { name: String },
    /// True when the selector matches an on-screen element right now.
    ElementExists { selector: ElementSelector },

    Not { expr: Box<Expression> },
    And { left: Box<Expression>, right: Box<Expression> },
    Or { left: Box<Expression>, right: Box<Expression> },

    Eq { left: Box<Expression>, right: Box<Expression> },
    Ne { left: Box<Expression>, right: Box<Expression> },
    Gt { left: Box<Expression>, right: Box<Expression> },
    Ge { left: Box<Expression>, right: Box<Expression> },
    Lt { left: Box<Expression>, right: Box<Expression> },
    Le { left: Box<Expression>, right: Box<Expression> },

    Add { left: Box<Expression>, right: Box<Expression> },
    Sub { left: Box<Expression>, right: Box<Expression> },
    Mul { left: Box<Expression>, right: Box<Expression> },
    Div { left: Box<Expression>, right: Box<Expression> },
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal {
            value: value.into(),
        }
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Expression::Variable { name: name.into() }
    }

    pub fn element_exists(selector: ElementSelector) -> Self {
        Expression::ElementExists { selector }
    }

    pub fn lt(left: Expression, right: Expression) -> Self {
        Expression::Lt {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Expression::Eq {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expression, right: Expression) -> Self {
        Expression::Add {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Static result type, used by the validator for boolean-ness checks.
    ///
    /// `None` means the expression references a variable the environment
    /// does not define, so its type cannot be known.
    pub fn result_type(&self, env: &Environment) -> Option<ValueType> {
        match self {
            Expression::Literal { value } => Some(value.type_of()),
            Expression::Variable { name } => env.type_of(name),
            Expression::ElementExists { .. }
            | Expression::Not { .. }
            | Expression::And { .. }
            | Expression::Or { .. }
            | Expression::Eq { .. }
            | Expression::Ne { .. }
            | Expression::Gt { .. }
            | Expression::Ge { .. }
            | Expression::Lt { .. }
            | Expression::Le { .. } => Some(ValueType::Bool),
            Expression::Add { left, right }
            | Expression::Sub { left, right }
            | Expression::Mul { left, right }
            | Expression::Div { left, right } => {
                match (left.result_type(env)?, right.result_type(env)?) {
                    (ValueType::Int, ValueType::Int) => Some(ValueType::Int),
                    _ => Some(ValueType::Float),
                }
            }
        }
    }

    /// Recursive async tree-walk. Returns a boxed future to support
    /// recursion.
    pub fn evaluate<'a>(
        &'a self,
        env: &'a Environment,
        locator: &'a dyn ElementLocator,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ExprError>> + Send + 'a>> {
        Box::pin(async move {
            match self {
                Expression::Literal { value } => Ok(value.clone()),

                Expression::Variable { name } => env
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ExprError::UndefinedVariable(name.clone())),

                Expression::ElementExists { selector } => {
                    let found = locator.find(selector).await?;
                    Ok(Value::Bool(found.is_some()))
                }

                Expression::Not { expr } => {
                    let v = as_bool(expr.evaluate(env, locator).await?)?;
                    Ok(Value::Bool(!v))
                }

                // Short-circuit: the right side is not evaluated when the
                // left side already decides the outcome.
                Expression::And { left, right } => {
                    if !as_bool(left.evaluate(env, locator).await?)? {
                        return Ok(Value::Bool(false));
                    }
                    let r = as_bool(right.evaluate(env, locator).await?)?;
                    Ok(Value::Bool(r))
                }
                Expression::Or { left, right } => {
                    if as_bool(left.evaluate(env, locator).await?)? {
                        return Ok(Value::Bool(true));
                    }
                    let r = as_bool(right.evaluate(env, locator).await?)?;
                    Ok(Value::Bool(r))
                }

                Expression::Eq { left, right } => {
                    let l = left.evaluate(env, locator).await?;
                    let r = right.evaluate(env, locator).await?;
                    Ok(Value::Bool(values_equal(&l, &r)?))
                }
                Expression::Ne { left, right } => {
                    let l = left.evaluate(env, locator).await?;
                    let r = right.evaluate(env, locator).await?;
                    Ok(Value::Bool(!values_equal(&l, &r)?))
                }

                Expression::Gt { left, right } => compare(env, locator, left, right, |o| {
                    o == std::cmp::Ordering::Greater
                })
                .await,
                Expression::Ge { left, right } => compare(env, locator, left, right, |o| {
                    o != std::cmp::Ordering::Less
                })
                .await,
                Expression::Lt { left, right } => compare(env, locator, left, right, |o| {
                    o == std::cmp::Ordering::Less
                })
                .await,
                Expression::Le { left, right } => compare(env, locator, left, right, |o| {
                    o != std::cmp::Ordering::Greater
                })
                .await,

                Expression::Add { left, right } => arith(env, locator, left, right, "add").await,
                Expression::Sub { left, right } => arith(env, locator, left, right, "sub").await,
                Expression::Mul { left, right } => arith(env, locator, left, right, "mul").await,
                Expression::Div { left, right } => arith(env, locator, left, right, "div").await,
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Evaluation helpers
// ---------------------------------------------------------------------------

fn as_bool(value: Value) -> Result<bool, ExprError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(ExprError::NotBoolean(other.type_of())),
    }
}

/// Equality across matching types; `Int` and `Float` compare numerically.
fn values_equal(l: &Value, r: &Value) -> Result<bool, ExprError> {
    match (l, r) {
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Text(a), Value::Text(b)) => Ok(a == b),
        (Value::Json(a), Value::Json(b)) => Ok(a == b),
        _ => {
            let (a, b) = numeric_pair(l, r, "eq")?;
            Ok(a == b)
        }
    }
}

fn numeric_pair(l: &Value, r: &Value, op: &'static str) -> Result<(f64, f64), ExprError> {
    let coerce = |v: &Value| match v {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(x) => Ok(*x),
        other => Err(ExprError::TypeMismatch(format!(
            "'{op}' expects numeric operands, got {}",
            other.type_of()
        ))),
    };
    Ok((coerce(l)?, coerce(r)?))
}

async fn compare(
    env: &Environment,
    locator: &dyn ElementLocator,
    left: &Expression,
    right: &Expression,
    accept: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Value, ExprError> {
    let l = left.evaluate(env, locator).await?;
    let r = right.evaluate(env, locator).await?;

    let ordering = match (&l, &r) {
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        _ => {
            let (a, b) = numeric_pair(&l, &r, "compare")?;
            a.partial_cmp(&b).ok_or_else(|| {
                ExprError::TypeMismatch("comparison with NaN is undefined".into())
            })?
        }
    };
    Ok(Value::Bool(accept(ordering)))
}

async fn arith(
    env: &Environment,
    locator: &dyn ElementLocator,
    left: &Expression,
    right: &Expression,
    op: &'static str,
) -> Result<Value, ExprError> {
    let l = left.evaluate(env, locator).await?;
    let r = right.evaluate(env, locator).await?;

    if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
        let (a, b) = (*a, *b);
        return match op {
            "add" => a.checked_add(b).map(Value::Int).ok_or(ExprError::Overflow(op)),
            "sub" => a.checked_sub(b).map(Value::Int).ok_or(ExprError::Overflow(op)),
            "mul" => a.checked_mul(b).map(Value::Int).ok_or(ExprError::Overflow(op)),
            "div" => {
                if b == 0 {
                    Err(ExprError::DivisionByZero)
                } else {
                    Ok(Value::Int(a / b))
                }
            }
            _ => unreachable!("unknown arithmetic op"),
        };
    }

    let (a, b) = numeric_pair(&l, &r, op)?;
    match op {
        "add" => Ok(Value::Float(a + b)),
        "sub" => Ok(Value::Float(a - b)),
        "mul" => Ok(Value::Float(a * b)),
        "div" => {
            if b == 0.0 {
                Err(ExprError::DivisionByZero)
            } else {
                Ok(Value::Float(a / b))
            }
        }
        _ => unreachable!("unknown arithmetic op"),
    }
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

/// A branch/loop condition: either a literal boolean or an expression that
/// must evaluate to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    Expression(Expression),
}

impl Condition {
    /// Evaluate to a strict boolean; anything else is an error, never a
    /// silent default.
    pub async fn evaluate(
        &self,
        env: &Environment,
        locator: &dyn ElementLocator,
    ) -> Result<bool, ExprError> {
        match self {
            Condition::Literal(b) => Ok(*b),
            Condition::Expression(expr) => as_bool(expr.evaluate(env, locator).await?),
        }
    }

    pub fn result_type(&self, env: &Environment) -> Option<ValueType> {
        match self {
            Condition::Literal(_) => Some(ValueType::Bool),
            Condition::Expression(expr) => expr.result_type(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::{NullLocator, SelectorKind};

    fn env_with(pairs: &[(&str, Value)]) -> Environment {
        let mut env = Environment::new();
        for (name, value) in pairs {
            env.set(*name, value.clone());
        }
        env
    }

    #[tokio::test]
    async fn arithmetic_stays_integer_until_a_float_appears() {
        let env = env_with(&[("i", Value::Int(4))]);

        let expr = Expression::add(Expression::variable("i"), Expression::literal(2i64));
        let v = expr.evaluate(&env, &NullLocator).await.unwrap();
        assert_eq!(v, Value::Int(6));

        let expr = Expression::add(Expression::variable("i"), Expression::literal(0.5));
        let v = expr.evaluate(&env, &NullLocator).await.unwrap();
        assert_eq!(v, Value::Float(4.5));
    }

    #[tokio::test]
    async fn undefined_variable_is_an_error() {
        let env = Environment::new();
        let expr = Expression::variable("ghost");
        let err = expr.evaluate(&env, &NullLocator).await.unwrap_err();
        assert!(matches!(err, ExprError::UndefinedVariable(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn integer_division_by_zero_is_an_error() {
        let env = Environment::new();
        let expr = Expression::Div {
            left: Box::new(Expression::literal(1i64)),
            right: Box::new(Expression::literal(0i64)),
        };
        let err = expr.evaluate(&env, &NullLocator).await.unwrap_err();
        assert!(matches!(err, ExprError::DivisionByZero));
    }

    #[tokio::test]
    async fn comparison_mixes_int_and_float() {
        let env = env_with(&[("i", Value::Int(2))]);
        let expr = Expression::lt(Expression::variable("i"), Expression::literal(2.5));
        let v = expr.evaluate(&env, &NullLocator).await.unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[tokio::test]
    async fn non_boolean_condition_fails_fast() {
        let env = Environment::new();
        let cond = Condition::Expression(Expression::literal(7i64));
        let err = cond.evaluate(&env, &NullLocator).await.unwrap_err();
        assert!(matches!(err, ExprError::NotBoolean(ValueType::Int)));
    }

    #[tokio::test]
    async fn element_exists_is_false_without_a_backend() {
        let env = Environment::new();
        let cond = Condition::Expression(Expression::element_exists(ElementSelector::new(
            SelectorKind::AutomationId,
            "login",
        )));
        assert!(!cond.evaluate(&env, &NullLocator).await.unwrap());
    }

    #[test]
    fn condition_parses_literal_or_expression() {
        let cond: Condition = serde_json::from_str("false").unwrap();
        assert_eq!(cond, Condition::Literal(false));

        let cond: Condition = serde_json::from_str(
            r#"{"op": "lt", "left": {"op": "variable", "name": "i"}, "right": {"op": "literal", "value": 3}}"#,
        )
        .unwrap();
        assert!(matches!(cond, Condition::Expression(Expression::Lt { .. })));
    }

    #[test]
    fn result_type_flags_non_boolean_conditions() {
        let env = env_with(&[("i", Value::Int(0))]);

        let boolean = Condition::Expression(Expression::lt(
            Expression::variable("i"),
            Expression::literal(3i64),
        ));
        assert_eq!(boolean.result_type(&env), Some(ValueType::Bool));

        let numeric = Condition::Expression(Expression::add(
            Expression::variable("i"),
            Expression::literal(1i64),
        ));
        assert_eq!(numeric.result_type(&env), Some(ValueType::Int));

        let unknown = Condition::Expression(Expression::variable("ghost"));
        assert_eq!(unknown.result_type(&env), None);
    }
}
