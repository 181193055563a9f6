use std::collections::HashMap;
use std::fmt;

use super::{FactAccessor, Value};

pub(crate) enum Binding<'a> {
    Fact(&'a mut dyn FactAccessor),
    Value(Value),
}

/// Root identifiers visible to rules during one run.
///
/// A root is either a caller-owned fact, borrowed mutably for the run so
/// actions can write through it, or a plain [`Value`] owned by the context.
#[derive(Default)]
pub struct DataContext<'a> {
    bindings: HashMap<String, Binding<'a>>,
}

impl<'a> DataContext<'a> {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fact under `name`.
    #[must_use]
    pub fn with_fact(mut self, name: &str, fact: &'a mut dyn FactAccessor) -> Self {
        self.add_fact(name, fact);
        self
    }

    /// Bind a plain value under `name`.
    #[must_use]
    pub fn with_value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.add_value(name, value);
        self
    }

    /// Bind a fact (mutable reference version). Replaces any earlier binding.
    pub fn add_fact(&mut self, name: &str, fact: &'a mut dyn FactAccessor) {
        self.bindings.insert(name.to_owned(), Binding::Fact(fact));
    }

    pub fn add_value(&mut self, name: &str, value: impl Into<Value>) {
        self.bindings
            .insert(name.to_owned(), Binding::Value(value.into()));
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Current value of a value binding. `None` for facts and unknown names.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.bindings.get(name)? {
            Binding::Value(v) => Some(v),
            Binding::Fact(_) => None,
        }
    }

    /// Read a named field of a bound fact.
    #[must_use]
    pub fn field(&self, root: &str, name: &str) -> Option<Value> {
        match self.bindings.get(root)? {
            Binding::Fact(fact) => match fact.resolve(name)? {
                super::Member::Field(i) => Some(fact.read(i)),
                super::Member::Fact(_) | super::Member::Method(_) => None,
            },
            Binding::Value(_) => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.bindings.remove(name).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub(crate) fn binding(&self, name: &str) -> Option<&Binding<'a>> {
        self.bindings.get(name)
    }

    pub(crate) fn binding_mut(&mut self, name: &str) -> Option<&mut Binding<'a>> {
        self.bindings.get_mut(name)
    }
}

impl fmt::Debug for DataContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, binding) in &self.bindings {
            match binding {
                Binding::Fact(fact) => map.entry(name, &format_args!("<{}>", fact.type_name())),
                Binding::Value(v) => map.entry(name, v),
            };
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapFact;

    #[test]
    fn bind_and_read_fact_fields() {
        let mut fact = MapFact::new("CashFlow").with("Payment", 500_i64);
        let ctx = DataContext::new().with_fact("Fact", &mut fact);
        assert!(ctx.contains("Fact"));
        assert_eq!(ctx.field("Fact", "Payment"), Some(Value::Int(500)));
        assert_eq!(ctx.field("Fact", "Missing"), None);
        assert_eq!(ctx.value("Fact"), None);
    }

    #[test]
    fn bind_plain_values() {
        let ctx = DataContext::new().with_value("Limit", 100_i64);
        assert_eq!(ctx.value("Limit"), Some(&Value::Int(100)));
        assert_eq!(ctx.field("Limit", "X"), None);
    }

    #[test]
    fn rebinding_replaces() {
        let mut ctx = DataContext::new().with_value("A", 1_i64);
        ctx.add_value("A", 2_i64);
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.value("A"), Some(&Value::Int(2)));
        assert!(ctx.remove("A"));
        assert!(ctx.is_empty());
    }

    #[test]
    fn debug_shows_fact_type_names() {
        let mut fact = MapFact::new("Order");
        let ctx = DataContext::new().with_fact("O", &mut fact);
        assert!(format!("{ctx:?}").contains("<Order>"));
    }
}
