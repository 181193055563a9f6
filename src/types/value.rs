use std::cmp::Ordering;
use std::fmt;

use super::expr::{BinaryOp, UnaryOp};

/// The tag of a [`Value`], used in diagnostics and in the catalog encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Array,
}

impl ValueType {
    pub(crate) fn tag(self) -> u8 {
        match self {
            ValueType::Nil => 0,
            ValueType::Boolean => 1,
            ValueType::Integer => 2,
            ValueType::Float => 3,
            ValueType::String => 4,
            ValueType::Array => 5,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ValueType::Nil,
            1 => ValueType::Boolean,
            2 => ValueType::Integer,
            3 => ValueType::Float,
            4 => ValueType::String,
            5 => ValueType::Array,
            _ => return None,
        })
    }

    fn is_numeric(self) -> bool {
        matches!(self, ValueType::Integer | ValueType::Float)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Nil => "Nil",
            ValueType::Boolean => "Boolean",
            ValueType::Integer => "Integer",
            ValueType::Float => "Float",
            ValueType::String => "String",
            ValueType::Array => "Array",
        };
        f.write_str(name)
    }
}

/// Dynamically typed value produced by evaluating a node or read from a fact.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Nil,
    /// A boolean value.
    Bool(bool),
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered list of values.
    Array(Vec<Value>),
}

/// Failure of a single operator application. The evaluator attaches the
/// operator's source text before surfacing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpError {
    Mismatch { left: ValueType, right: ValueType },
    Unary { operand: ValueType },
    DivisionByZero,
    Overflow,
}

impl Value {
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Bool(_) => ValueType::Boolean,
            Value::Int(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::Array(_) => ValueType::Array,
        }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view with integer-to-float promotion.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Whether this is the zero value of its type (`0`, `0.0`, `""`, `false`,
    /// an empty array, or nil).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0,
            Value::String(s) => s.is_empty(),
            Value::Array(items) => items.is_empty(),
        }
    }

    /// Unquoted rendering used by `Log` and string building.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Equality across all tag pairs. Integers and floats compare by value;
    /// any other tag difference is simply unequal.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loosely_equals(y))
            }
            _ => false,
        }
    }

    /// Ordering for values of the same category. `Err` when the categories
    /// differ; `Ok(None)` when they match but are unordered (NaN).
    #[allow(clippy::cast_precision_loss)]
    fn ordering(&self, other: &Value) -> Result<Option<Ordering>, OpError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
            (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(b)),
            (Value::Int(a), Value::Float(b)) => Ok((*a as f64).partial_cmp(b)),
            (Value::Float(a), Value::Int(b)) => Ok(a.partial_cmp(&(*b as f64))),
            (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
            (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
            _ => Err(self.mismatch(other)),
        }
    }

    fn mismatch(&self, other: &Value) -> OpError {
        OpError::Mismatch {
            left: self.value_type(),
            right: other.value_type(),
        }
    }

    /// Apply a binary operator. `&&` and `||` are evaluated eagerly here;
    /// short-circuiting is the evaluator's job.
    pub(crate) fn binary(&self, op: BinaryOp, other: &Value) -> Result<Value, OpError> {
        match op {
            BinaryOp::Add => self.add(other),
            BinaryOp::Sub => self.arith(other, i64::checked_sub, |a, b| a - b),
            BinaryOp::Mul => self.arith(other, i64::checked_mul, |a, b| a * b),
            BinaryOp::Div => self.div(other),
            BinaryOp::Mod => match (self, other) {
                (Value::Int(_), Value::Int(0)) => Err(OpError::DivisionByZero),
                (Value::Int(a), Value::Int(b)) => a
                    .checked_rem(*b)
                    .map(Value::Int)
                    .ok_or(OpError::Overflow),
                _ => Err(self.mismatch(other)),
            },
            BinaryOp::BitAnd => match (self, other) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a & b)),
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a & *b)),
                _ => Err(self.mismatch(other)),
            },
            BinaryOp::BitOr => match (self, other) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a | b)),
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a | *b)),
                _ => Err(self.mismatch(other)),
            },
            BinaryOp::And => match (self, other) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
                _ => Err(self.mismatch(other)),
            },
            BinaryOp::Or => match (self, other) {
                (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
                _ => Err(self.mismatch(other)),
            },
            BinaryOp::Eq => Ok(Value::Bool(self.loosely_equals(other))),
            BinaryOp::Neq => Ok(Value::Bool(!self.loosely_equals(other))),
            BinaryOp::Gt => self.compare_with(other, Ordering::is_gt),
            BinaryOp::Gte => self.compare_with(other, Ordering::is_ge),
            BinaryOp::Lt => self.compare_with(other, Ordering::is_lt),
            BinaryOp::Lte => self.compare_with(other, Ordering::is_le),
        }
    }

    pub(crate) fn unary(&self, op: UnaryOp) -> Result<Value, OpError> {
        match (op, self) {
            (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, Value::Int(i)) => i.checked_neg().map(Value::Int).ok_or(OpError::Overflow),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            _ => Err(OpError::Unary {
                operand: self.value_type(),
            }),
        }
    }

    fn compare_with(&self, other: &Value, test: fn(Ordering) -> bool) -> Result<Value, OpError> {
        let ord = self.ordering(other)?;
        Ok(Value::Bool(ord.is_some_and(test)))
    }

    fn add(&self, other: &Value) -> Result<Value, OpError> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => {
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Ok(Value::String(joined))
            }
            _ => self.arith(other, i64::checked_add, |a, b| a + b),
        }
    }

    fn arith(
        &self,
        other: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<Value, OpError> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => int_op(*a, *b).map(Value::Int).ok_or(OpError::Overflow),
            _ if self.value_type().is_numeric() && other.value_type().is_numeric() => {
                let (a, b) = self.promote(other);
                Ok(Value::Float(float_op(a, b)))
            }
            _ => Err(self.mismatch(other)),
        }
    }

    fn div(&self, other: &Value) -> Result<Value, OpError> {
        if !(self.value_type().is_numeric() && other.value_type().is_numeric()) {
            return Err(self.mismatch(other));
        }
        let (a, b) = self.promote(other);
        if b == 0.0 {
            return Err(OpError::DivisionByZero);
        }
        Ok(Value::Float(a / b))
    }

    fn promote(&self, other: &Value) -> (f64, f64) {
        (
            self.as_float().unwrap_or_default(),
            other.as_float().unwrap_or_default(),
        )
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}
