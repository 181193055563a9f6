use super::ast::NodeRef;
use super::expr::{Expr, Statement};

/// A named rule as handed in by the caller or the parser, before lowering.
///
/// Rules are created via [`KnowledgeBaseBuilder`](super::KnowledgeBaseBuilder)
/// or by parsing rule text with [`parse`](crate::parse::parse). The condition
/// is `None` until set with [`RuleBuilder::when()`](super::knowledge::RuleBuilder::when).
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub description: String,
    pub salience: i32,
    pub condition: Option<Expr>,
    pub actions: Vec<Statement>,
    /// Text the condition was parsed from, kept for diagnostics.
    pub condition_text: Option<String>,
    /// Text of each action, parallel to `actions`. Empty for rules built
    /// in code.
    pub action_texts: Vec<String>,
}

impl Rule {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: String::new(),
            salience: 0,
            condition: None,
            actions: Vec::new(),
            condition_text: None,
            action_texts: Vec::new(),
        }
    }
}

/// A lowered rule: When and Then point into the knowledge base's graph.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEntry {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) salience: i32,
    pub(crate) when: NodeRef,
    pub(crate) then: Vec<NodeRef>,
}

impl RuleEntry {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn salience(&self) -> i32 {
        self.salience
    }

    #[must_use]
    pub fn when(&self) -> NodeRef {
        self.when
    }

    #[must_use]
    pub fn then(&self) -> &[NodeRef] {
        &self.then
    }
}
