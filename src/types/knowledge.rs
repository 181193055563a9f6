use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::ast::{AstGraph, AstNode};
use super::error::{BuildError, ErrorKind};
use super::expr::{Expr, Statement};
use super::memory::WorkingMemory;
use super::rule::{Rule, RuleEntry};

/// Builder for constructing a [`KnowledgeBase`].
///
/// # Example
///
/// ```
/// use rulekeeper::{KnowledgeBaseBuilder, var};
///
/// let kb = KnowledgeBaseBuilder::new("Tutorial", "0.1.0")
///     .rule("Cashback", |r| {
///         r.salience(10)
///             .when(var("Fact").field("Payment").gt(100_i64))
///             .then(var("Fact").field("Cashback").assign(10_i64))
///     })
///     .build()
///     .unwrap();
/// assert_eq!(kb.len(), 1);
/// ```
#[derive(Debug)]
pub struct KnowledgeBaseBuilder {
    name: String,
    version: String,
    rules: Vec<Rule>,
}

/// Intermediate builder passed to the rule definition closure.
#[derive(Debug)]
pub struct RuleBuilder {
    rule: Rule,
}

impl KnowledgeBaseBuilder {
    #[must_use]
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_owned(),
            version: version.to_owned(),
            rules: Vec::new(),
        }
    }

    /// Define a rule. The closure must call `.when(expr)`; building fails
    /// with [`BuildError::MissingCondition`] otherwise.
    #[must_use]
    pub fn rule(mut self, name: &str, f: impl FnOnce(RuleBuilder) -> RuleBuilder) -> Self {
        let builder = f(RuleBuilder {
            rule: Rule::new(name),
        });
        self.rules.push(builder.rule);
        self
    }

    /// Append already-assembled rules, e.g. from [`parse`](crate::parse::parse).
    #[must_use]
    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Parse rule text and append its rules.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`](crate::parse::ParseError) if the text is malformed.
    pub fn grl(self, input: &str) -> Result<Self, crate::parse::ParseError> {
        let parsed = crate::parse::parse(input)?;
        Ok(self.rules(parsed.rules))
    }

    /// Lower every rule into a fresh node graph.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] on duplicate or empty names, missing conditions,
    /// or statements that are neither assignments nor calls.
    pub fn build(self) -> Result<KnowledgeBase, BuildError> {
        crate::compile::compile(&self.name, &self.version, &self.rules)
    }
}

impl RuleBuilder {
    /// Set the condition expression for this rule.
    #[must_use]
    pub fn when(mut self, condition: Expr) -> Self {
        self.rule.condition = Some(condition);
        self
    }

    /// Append an action to the Then block.
    #[must_use]
    pub fn then(mut self, statement: Statement) -> Self {
        self.rule.actions.push(statement);
        self
    }

    /// Higher salience wins conflict resolution. Defaults to 0.
    #[must_use]
    pub fn salience(mut self, salience: i32) -> Self {
        self.rule.salience = salience;
        self
    }

    #[must_use]
    pub fn description(mut self, description: &str) -> Self {
        self.rule.description = description.to_owned();
        self
    }
}

/// A named, versioned set of rule entries with its node graph and working
/// memory. One instance per concurrent run; obtain more with
/// [`new_instance`](Self::new_instance) or a [`KnowledgeLibrary`].
#[derive(Debug)]
pub struct KnowledgeBase {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) graph: AstGraph,
    pub(crate) rules: Vec<RuleEntry>,
    pub(crate) by_name: HashMap<String, usize>,
    /// Indices into `rules`, salience descending then insertion order.
    pub(crate) agenda: Vec<usize>,
    pub(crate) memory: WorkingMemory,
}

impl KnowledgeBase {
    pub(crate) fn from_parts(
        name: String,
        version: String,
        graph: AstGraph,
        rules: Vec<RuleEntry>,
    ) -> Self {
        let by_name = rules
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        let mut agenda: Vec<usize> = (0..rules.len()).collect();
        // stable, so equal salience keeps insertion order
        agenda.sort_by_key(|&i| std::cmp::Reverse(rules[i].salience));
        Self {
            name,
            version,
            graph,
            rules,
            by_name,
            agenda,
            memory: WorkingMemory::new(),
        }
    }

    /// Parse rule text and build a knowledge base from it.
    ///
    /// # Errors
    ///
    /// Returns [`RulekeeperError`](crate::RulekeeperError) on parse or build failure.
    pub fn from_grl(name: &str, version: &str, input: &str) -> Result<Self, crate::RulekeeperError> {
        let kb = KnowledgeBaseBuilder::new(name, version).grl(input)?.build()?;
        Ok(kb)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule entries in insertion order.
    #[must_use]
    pub fn rules(&self) -> &[RuleEntry] {
        &self.rules
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RuleEntry> {
        self.by_name.get(name).map(|&i| &self.rules[i])
    }

    /// Rule names in the order the engine considers them.
    #[must_use]
    pub fn evaluation_order(&self) -> Vec<&str> {
        self.agenda
            .iter()
            .map(|&i| self.rules[i].name.as_str())
            .collect()
    }

    #[must_use]
    pub fn graph(&self) -> &AstGraph {
        &self.graph
    }

    /// The node a rule's When points at.
    #[must_use]
    pub fn condition_of(&self, rule: &RuleEntry) -> Option<&AstNode> {
        self.graph.get(rule.when)
    }

    #[must_use]
    pub fn working_memory(&self) -> &WorkingMemory {
        &self.memory
    }

    /// An independent copy: same rules, fresh node identities, empty memory.
    #[must_use]
    pub fn new_instance(&self) -> KnowledgeBase {
        let (graph, _) = self.graph.clone_fresh();
        Self {
            name: self.name.clone(),
            version: self.version.clone(),
            graph,
            rules: self.rules.clone(),
            by_name: self.by_name.clone(),
            agenda: self.agenda.clone(),
            memory: WorkingMemory::new(),
        }
    }
}

impl fmt::Display for KnowledgeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "knowledge base '{}' v{} ({} rules, {} nodes)",
            self.name,
            self.version,
            self.rules.len(),
            self.graph.len()
        )
    }
}

/// Unknown name/version pair.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("knowledge base '{name}' version '{version}' not found")]
pub struct NotFoundError {
    pub name: String,
    pub version: String,
}

impl NotFoundError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

/// Registry of template knowledge bases by name and version. Thread-safe;
/// hands out independent instances.
#[derive(Debug, Default)]
pub struct KnowledgeLibrary {
    templates: RwLock<HashMap<(String, String), Arc<KnowledgeBase>>>,
}

impl KnowledgeLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `kb` as the template for its name and version. Returns the
    /// template it replaced, if any.
    pub fn add(&self, kb: KnowledgeBase) -> Option<Arc<KnowledgeBase>> {
        let key = (kb.name.clone(), kb.version.clone());
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(kb))
    }

    /// Parse and build rule text, then store it under `name`/`version`.
    ///
    /// # Errors
    ///
    /// Returns [`RulekeeperError`](crate::RulekeeperError) on parse or build failure.
    pub fn load_grl(&self, name: &str, version: &str, input: &str) -> Result<(), crate::RulekeeperError> {
        let kb = KnowledgeBase::from_grl(name, version, input)?;
        self.add(kb);
        Ok(())
    }

    /// A fresh instance of the stored template.
    ///
    /// # Errors
    ///
    /// Returns [`NotFoundError`] if nothing is stored under `name`/`version`.
    pub fn new_instance(&self, name: &str, version: &str) -> Result<KnowledgeBase, NotFoundError> {
        let templates = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        templates
            .get(&(name.to_owned(), version.to_owned()))
            .map(|kb| kb.new_instance())
            .ok_or_else(|| NotFoundError {
                name: name.to_owned(),
                version: version.to_owned(),
            })
    }

    #[must_use]
    pub fn contains(&self, name: &str, version: &str) -> bool {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(name.to_owned(), version.to_owned()))
    }

    /// Stored versions of `name`, sorted.
    #[must_use]
    pub fn versions_of(&self, name: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect();
        versions.sort();
        versions
    }

    pub fn remove(&self, name: &str, version: &str) -> Option<Arc<KnowledgeBase>> {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(name.to_owned(), version.to_owned()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
