use thiserror::Error;

use super::ValueType;

/// Coarse classification shared by every failure the engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseDependency,
    UnresolvedReference,
    MemberNotFound,
    TypeMismatch,
    Arithmetic,
    InvocationError,
    CycleLimitExceeded,
    Decode,
    NotFound,
}

/// Failure while building a knowledge base from rule definitions.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("duplicate rule name '{name}'")]
    DuplicateRule { name: String },

    #[error("rule '{rule}' has no when condition")]
    MissingCondition { rule: String },

    #[error("rule name must not be empty")]
    EmptyName,

    #[error("malformed rule '{rule}': {reason}")]
    ParseDependency { rule: String, reason: String },
}

impl BuildError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ParseDependency
    }
}

/// Failure while evaluating a single node. `expr` fields hold the rule
/// text of the node that failed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("unresolved reference '{name}' in `{expr}`")]
    UnresolvedReference { name: String, expr: String },

    #[error("'{type_name}' has no member '{member}' in `{expr}`")]
    MemberNotFound {
        member: String,
        type_name: String,
        expr: String,
    },

    #[error("type mismatch: cannot apply '{op}' to {left} and {right} in `{expr}`")]
    TypeMismatch {
        op: String,
        left: ValueType,
        right: ValueType,
        expr: String,
    },

    #[error("type mismatch: cannot apply '{op}' to {operand} in `{expr}`")]
    UnaryTypeMismatch {
        op: String,
        operand: ValueType,
        expr: String,
    },

    #[error("fact '{name}' cannot be used as a value in `{expr}`")]
    NotAValue { name: String, expr: String },

    #[error("{}", invocation_message(target, *argument, message, expr))]
    InvocationError {
        target: String,
        argument: Option<usize>,
        message: String,
        expr: String,
    },

    #[error("condition of rule '{rule}' produced {found}, expected Boolean")]
    NonBooleanCondition { rule: String, found: ValueType },

    #[error("division by zero in `{expr}`")]
    DivisionByZero { expr: String },

    #[error("integer overflow applying '{op}' in `{expr}`")]
    Overflow { op: String, expr: String },

    #[error("`{expr}` is not an assignable location")]
    NotAssignable { expr: String },

    #[error("cannot assign to '{target}': {message} in `{expr}`")]
    AssignmentFailed {
        target: String,
        message: String,
        expr: String,
    },

    #[error("index {index} out of bounds for length {len} in `{expr}`")]
    IndexOutOfBounds {
        index: i64,
        len: usize,
        expr: String,
    },
}

fn invocation_message(
    target: &str,
    argument: Option<usize>,
    message: &str,
    expr: &str,
) -> String {
    match argument {
        Some(i) => format!("call to '{target}' failed at argument {i}: {message} in `{expr}`"),
        None => format!("call to '{target}' failed: {message} in `{expr}`"),
    }
}

impl EvalError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::UnresolvedReference { .. } => ErrorKind::UnresolvedReference,
            EvalError::MemberNotFound { .. } | EvalError::IndexOutOfBounds { .. } => {
                ErrorKind::MemberNotFound
            }
            EvalError::TypeMismatch { .. }
            | EvalError::UnaryTypeMismatch { .. }
            | EvalError::NotAValue { .. }
            | EvalError::NonBooleanCondition { .. }
            | EvalError::NotAssignable { .. } => ErrorKind::TypeMismatch,
            EvalError::DivisionByZero { .. } | EvalError::Overflow { .. } => ErrorKind::Arithmetic,
            EvalError::InvocationError { .. } | EvalError::AssignmentFailed { .. } => {
                ErrorKind::InvocationError
            }
        }
    }
}
