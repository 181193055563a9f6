use std::fmt;

use thiserror::Error;

use super::Value;

/// Resolved member of a fact, valid for the fact that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    Field(usize),
    /// A nested fact, reached with [`FactAccessor::fact`].
    Fact(usize),
    Method(usize),
}

/// Why a fact refused a write or a method call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FactError {
    #[error("field '{field}' is read-only")]
    ReadOnly { field: String },

    #[error("expected {expected} argument(s), got {found}")]
    ArgumentCount { expected: usize, found: usize },

    #[error("argument {index}: {reason}")]
    Argument { index: usize, reason: String },

    #[error("{0}")]
    Failed(String),
}

/// Capability a caller-owned object exposes to rules: named field reads and
/// writes plus method invocation.
///
/// Names are resolved once to a [`Member`] handle, then the handle is used
/// for the actual access.
pub trait FactAccessor {
    /// Name used in diagnostics.
    fn type_name(&self) -> &str;

    fn resolve(&self, name: &str) -> Option<Member>;

    fn read(&self, field: usize) -> Value;

    fn write(&mut self, field: usize, value: Value) -> Result<(), FactError>;

    /// Nested fact behind a [`Member::Fact`] handle, so rules can walk
    /// chains like `Order.Customer.Tier`.
    fn fact(&self, handle: usize) -> Option<&dyn FactAccessor> {
        let _ = handle;
        None
    }

    fn fact_mut(&mut self, handle: usize) -> Option<&mut dyn FactAccessor> {
        let _ = handle;
        None
    }

    fn invoke(&mut self, method: usize, args: &[Value]) -> Result<Value, FactError> {
        let _ = (method, args);
        Err(FactError::Failed(format!(
            "'{}' has no callable methods",
            self.type_name()
        )))
    }
}

/// Named fields handed to [`MapFact`] methods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields(Vec<(String, Value)>);

impl Fields {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Insert or replace.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name.to_owned(), value)),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(n, _)| n == name)
    }
}

type MethodFn = Box<dyn FnMut(&mut Fields, &[Value]) -> Result<Value, FactError> + Send>;

/// Ready-made record fact: named [`Value`] fields, nested facts and
/// optional closure methods.
///
/// ```
/// use rulekeeper::{MapFact, Value};
///
/// let mut fact = MapFact::new("CashFlow")
///     .with("Payment", 500_i64)
///     .with("Cashback", 0_i64);
/// fact.set("Cashback", 10_i64);
/// assert_eq!(fact.get("Cashback"), Some(&Value::Int(10)));
/// ```
pub struct MapFact {
    type_name: String,
    fields: Fields,
    facts: Vec<(String, MapFact)>,
    methods: Vec<(String, MethodFn)>,
}

impl MapFact {
    #[must_use]
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_owned(),
            fields: Fields::default(),
            facts: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.set(name, value);
        self
    }

    /// Attach a nested fact under `name`. Replaces an earlier one.
    #[must_use]
    pub fn with_fact(mut self, name: &str, fact: MapFact) -> Self {
        match self.facts.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = fact,
            None => self.facts.push((name.to_owned(), fact)),
        }
        self
    }

    #[must_use]
    pub fn with_method<F>(mut self, name: &str, f: F) -> Self
    where
        F: FnMut(&mut Fields, &[Value]) -> Result<Value, FactError> + Send + 'static,
    {
        self.methods.push((name.to_owned(), Box::new(f)));
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.set(name, value);
    }

    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    #[must_use]
    pub fn nested(&self, name: &str) -> Option<&MapFact> {
        self.facts.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn nested_mut(&mut self, name: &str) -> Option<&mut MapFact> {
        self.facts.iter_mut().find(|(n, _)| n == name).map(|(_, f)| f)
    }
}

impl fmt::Debug for MapFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapFact")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .field("facts", &self.facts)
            .field(
                "methods",
                &self.methods.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl FactAccessor for MapFact {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn resolve(&self, name: &str) -> Option<Member> {
        if let Some(i) = self.fields.position(name) {
            return Some(Member::Field(i));
        }
        if let Some(i) = self.facts.iter().position(|(n, _)| n == name) {
            return Some(Member::Fact(i));
        }
        self.methods
            .iter()
            .position(|(n, _)| n == name)
            .map(Member::Method)
    }

    fn read(&self, field: usize) -> Value {
        self.fields
            .0
            .get(field)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn write(&mut self, field: usize, value: Value) -> Result<(), FactError> {
        match self.fields.0.get_mut(field) {
            Some((_, slot)) => {
                *slot = value;
                Ok(())
            }
            None => Err(FactError::Failed(format!("no field at slot {field}"))),
        }
    }

    fn fact(&self, handle: usize) -> Option<&dyn FactAccessor> {
        self.facts.get(handle).map(|(_, f)| f as &dyn FactAccessor)
    }

    fn fact_mut(&mut self, handle: usize) -> Option<&mut dyn FactAccessor> {
        self.facts
            .get_mut(handle)
            .map(|(_, f)| f as &mut dyn FactAccessor)
    }

    fn invoke(&mut self, method: usize, args: &[Value]) -> Result<Value, FactError> {
        let Self {
            fields, methods, ..
        } = self;
        match methods.get_mut(method) {
            Some((_, f)) => f(fields, args),
            None => Err(FactError::Failed(format!("no method at slot {method}"))),
        }
    }
}
