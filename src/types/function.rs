use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use super::{Value, ValueType};

/// Failure reported by a registered function or value method.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CallError {
    #[error("expected {expected} argument(s), got {found}")]
    Arity { expected: String, found: usize },

    #[error("expected {expected}, got {found}")]
    Argument {
        index: usize,
        expected: &'static str,
        found: ValueType,
    },

    #[error("{0}")]
    Failed(String),
}

impl CallError {
    pub(crate) fn argument_index(&self) -> Option<usize> {
        match self {
            CallError::Argument { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// A host function callable from rules.
pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, CallError> + Send + Sync>;

/// Named functions available to `Name(args)` calls.
///
/// `Retract`, `Complete` and `Changed` are handled by the engine itself and
/// cannot be overridden here.
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, NativeFn>,
}

impl FunctionRegistry {
    /// Registry without any functions.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in functions.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        reg.register("Log", log);
        reg.register("IsNil", |args| {
            expect_arity(args, 1)?;
            Ok(Value::Bool(args[0].is_nil()))
        });
        reg.register("IsZero", |args| {
            expect_arity(args, 1)?;
            Ok(Value::Bool(args[0].is_zero()))
        });
        reg.register("Len", |args| {
            expect_arity(args, 1)?;
            length(&args[0], 0)
        });
        reg.register("Abs", |args| {
            expect_arity(args, 1)?;
            match &args[0] {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| CallError::Failed("integer overflow".into())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(not_numeric(0, other)),
            }
        });
        reg.register("Max", |args| extremum(args, |a, b| a > b));
        reg.register("Min", |args| extremum(args, |a, b| a < b));
        reg.register("Floor", |args| rounding(args, f64::floor));
        reg.register("Ceil", |args| rounding(args, f64::ceil));
        reg.register("Round", |args| rounding(args, f64::round));
        reg.register("Now", |args| {
            expect_arity(args, 0)?;
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_err(|e| CallError::Failed(e.to_string()))?
                .as_millis();
            i64::try_from(millis)
                .map(Value::Int)
                .map_err(|e| CallError::Failed(e.to_string()))
        });
        reg
    }

    /// Register or replace a function.
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_owned(), Arc::new(f));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// `None` when no function is registered under `name`.
    pub(crate) fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, CallError>> {
        self.functions.get(name).map(|f| f(args))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Methods on plain values (`"abc".ToUpper()`, `Fact.Tags.Len()`). `None`
/// when the receiver's type has no such method.
pub(crate) fn call_value_method(
    receiver: &Value,
    name: &str,
    args: &[Value],
) -> Option<Result<Value, CallError>> {
    let result = match (receiver, name) {
        (Value::String(_) | Value::Array(_), "Len") => {
            expect_arity(args, 0).and_then(|()| length(receiver, 0))
        }
        (Value::String(s), "ToUpper") => expect_arity(args, 0).map(|()| Value::String(s.to_uppercase())),
        (Value::String(s), "ToLower") => expect_arity(args, 0).map(|()| Value::String(s.to_lowercase())),
        (Value::String(s), "Trim") => expect_arity(args, 0).map(|()| Value::String(s.trim().to_owned())),
        (Value::String(s), "Contains") => {
            string_arg(args).map(|needle| Value::Bool(s.contains(needle)))
        }
        (Value::String(s), "HasPrefix") => {
            string_arg(args).map(|prefix| Value::Bool(s.starts_with(prefix)))
        }
        (Value::String(s), "HasSuffix") => {
            string_arg(args).map(|suffix| Value::Bool(s.ends_with(suffix)))
        }
        (Value::Array(items), "Contains") => expect_arity(args, 1)
            .map(|()| Value::Bool(items.iter().any(|v| v.loosely_equals(&args[0])))),
        (Value::Array(items), "Append") => {
            let mut out = items.clone();
            out.extend_from_slice(args);
            Ok(Value::Array(out))
        }
        _ => return None,
    };
    Some(result)
}

fn log(args: &[Value]) -> Result<Value, CallError> {
    let message = args
        .iter()
        .map(Value::to_text)
        .collect::<Vec<_>>()
        .join(" ");
    tracing::info!(target: "rulekeeper::grl", %message, "rule log");
    Ok(Value::Nil)
}

fn expect_arity(args: &[Value], expected: usize) -> Result<(), CallError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(CallError::Arity {
            expected: expected.to_string(),
            found: args.len(),
        })
    }
}

fn not_numeric(index: usize, found: &Value) -> CallError {
    CallError::Argument {
        index,
        expected: "a number",
        found: found.value_type(),
    }
}

fn length(v: &Value, index: usize) -> Result<Value, CallError> {
    let len = match v {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        other => {
            return Err(CallError::Argument {
                index,
                expected: "a String or Array",
                found: other.value_type(),
            })
        }
    };
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|e| CallError::Failed(e.to_string()))
}

fn string_arg(args: &[Value]) -> Result<&str, CallError> {
    expect_arity(args, 1)?;
    args[0].as_str().ok_or(CallError::Argument {
        index: 0,
        expected: "a String",
        found: args[0].value_type(),
    })
}

fn extremum(args: &[Value], better: fn(f64, f64) -> bool) -> Result<Value, CallError> {
    let Some(first) = args.first() else {
        return Err(CallError::Arity {
            expected: "at least 1".into(),
            found: 0,
        });
    };
    let mut best = first;
    let mut best_f = first.as_float().ok_or_else(|| not_numeric(0, first))?;
    for (i, arg) in args.iter().enumerate().skip(1) {
        let f = arg.as_float().ok_or_else(|| not_numeric(i, arg))?;
        if better(f, best_f) {
            best = arg;
            best_f = f;
        }
    }
    Ok(best.clone())
}

fn rounding(args: &[Value], f: fn(f64) -> f64) -> Result<Value, CallError> {
    expect_arity(args, 1)?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(x) => Ok(Value::Float(f(*x))),
        other => Err(not_numeric(0, other)),
    }
}
