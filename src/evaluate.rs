use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::types::context::Binding;
use crate::types::function::call_value_method;
use crate::types::value::OpError;
use crate::types::{
    AssignOp, AstGraph, AstNode, BinaryOp, DataContext, EvalError, FactAccessor, FactError,
    FunctionRegistry, Member, NodeKind, NodeRef, RuleEntry, Value, WorkingMemory,
};

/// Where memoized node values live for one evaluation.
pub(crate) enum Memo<'m> {
    /// The instance's working memory, across cycles of a run.
    Tracking(&'m mut WorkingMemory),
    /// A throwaway map for a single read-only query.
    Scratch(HashMap<Arc<str>, Value>),
    /// Every node is computed afresh.
    Disabled,
}

impl Memo<'_> {
    fn lookup(&mut self, node: &AstNode) -> Option<Value> {
        match self {
            Memo::Tracking(wm) => {
                let hit = wm.lookup(node.snapshot());
                if hit.is_some() {
                    trace!(signature = node.snapshot(), "working memory hit");
                }
                hit
            }
            Memo::Scratch(map) => map.get(node.snapshot()).cloned(),
            Memo::Disabled => None,
        }
    }

    fn record(&mut self, node: &AstNode, value: &Value) {
        match self {
            Memo::Tracking(wm) => wm.record(node.snapshot_key(), node.roots(), value.clone()),
            Memo::Scratch(map) => {
                map.insert(Arc::clone(node.snapshot_key()), value.clone());
            }
            Memo::Disabled => {}
        }
    }

    fn invalidate(&mut self, root: &str) {
        match self {
            Memo::Tracking(wm) => {
                wm.invalidate_root(root);
            }
            Memo::Scratch(map) => map.clear(),
            Memo::Disabled => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Condition,
    Action,
}

/// What a Then block did besides returning.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub(crate) retracted: Vec<String>,
    pub(crate) complete: bool,
    pub(crate) changed: bool,
}

pub(crate) struct Evaluator<'a, 'f> {
    graph: &'a AstGraph,
    functions: &'a FunctionRegistry,
    ctx: &'a mut DataContext<'f>,
    memo: Memo<'a>,
    phase: Phase,
    effects: Effects,
}

impl<'a, 'f> Evaluator<'a, 'f> {
    pub(crate) fn new(
        graph: &'a AstGraph,
        functions: &'a FunctionRegistry,
        ctx: &'a mut DataContext<'f>,
        memo: Memo<'a>,
        phase: Phase,
    ) -> Self {
        Self {
            graph,
            functions,
            ctx,
            memo,
            phase,
            effects: Effects::default(),
        }
    }

    /// Evaluate a rule's When. Anything but a Boolean is an error.
    pub(crate) fn condition(&mut self, rule: &RuleEntry) -> Result<bool, EvalError> {
        match self.eval(rule.when)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::NonBooleanCondition {
                rule: rule.name.clone(),
                found: other.value_type(),
            }),
        }
    }

    /// Run a Then block in order. Statements already executed stay applied
    /// when a later one fails.
    pub(crate) fn actions(&mut self, rule: &RuleEntry) -> Result<(), EvalError> {
        for &statement in &rule.then {
            self.eval(statement)?;
        }
        Ok(())
    }

    pub(crate) fn into_effects(self) -> Effects {
        self.effects
    }

    pub(crate) fn eval(&mut self, r: NodeRef) -> Result<Value, EvalError> {
        let graph = self.graph;
        let node = graph.node(r);
        let memoize = node.is_memoizable() && !matches!(node.kind(), NodeKind::Constant(_));
        if memoize {
            if let Some(v) = self.memo.lookup(node) {
                return Ok(v);
            }
        }
        let value = self.compute(node)?;
        if memoize {
            self.memo.record(node, &value);
        }
        Ok(value)
    }

    fn compute(&mut self, node: &'a AstNode) -> Result<Value, EvalError> {
        match node.kind() {
            NodeKind::Constant(v) => Ok(v.clone()),
            NodeKind::Variable(name) => self.root_value(name, node),
            NodeKind::Field { object, name } => self.read_field(*object, name, node),
            NodeKind::Index { object, selector } => {
                let target = self.eval(*object)?;
                let selector = self.eval(*selector)?;
                index_into(&target, &selector, node)
            }
            NodeKind::Unary { op, operand } => {
                let v = self.eval(*operand)?;
                v.unary(*op).map_err(|e| op_error(e, op.symbol(), node))
            }
            NodeKind::Binary { op, left, right } => {
                let l = self.eval(*left)?;
                match (op, &l) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let r = self.eval(*right)?;
                l.binary(*op, &r).map_err(|e| op_error(e, op.symbol(), node))
            }
            NodeKind::FunctionCall { name, args } => self.call_function(name, args, node),
            NodeKind::MethodCall {
                receiver,
                name,
                args,
            } => self.call_method(*receiver, name, args, node),
            NodeKind::Assignment { target, op, value } => self.assign(*target, *op, *value, node),
        }
    }

    fn root_value(&self, name: &str, node: &AstNode) -> Result<Value, EvalError> {
        match self.ctx.binding(name) {
            Some(Binding::Value(v)) => Ok(v.clone()),
            Some(Binding::Fact(_)) => Err(EvalError::NotAValue {
                name: name.to_owned(),
                expr: node.source().to_owned(),
            }),
            None => Err(unresolved(name, node)),
        }
    }

    fn read_field(&mut self, object: NodeRef, name: &str, node: &AstNode) -> Result<Value, EvalError> {
        let graph = self.graph;
        if let Some((root, path)) = fact_path(graph, object) {
            match self.ctx.binding(root) {
                Some(Binding::Fact(fact)) => {
                    if let Some(fact) = descend(&**fact, &path) {
                        return match fact.resolve(name) {
                            Some(Member::Field(i)) => Ok(fact.read(i)),
                            Some(Member::Fact(_)) => Err(EvalError::NotAValue {
                                name: name.to_owned(),
                                expr: node.source().to_owned(),
                            }),
                            _ => Err(member_not_found(name, fact.type_name(), node)),
                        };
                    }
                }
                Some(Binding::Value(_)) => {}
                None => return Err(unresolved(root, node)),
            }
        }
        // some link of the chain is a plain value, which has no members
        let value = self.eval(object)?;
        Err(member_not_found(name, &value.value_type().to_string(), node))
    }

    fn eval_args(&mut self, args: &[NodeRef]) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|&arg| self.eval(arg)).collect()
    }

    fn require_action(&self, name: &str, node: &AstNode) -> Result<(), EvalError> {
        if self.phase == Phase::Action {
            Ok(())
        } else {
            Err(invocation(name, None, "only allowed in a then block".into(), node))
        }
    }

    fn single_string(&mut self, name: &str, args: &[NodeRef], node: &AstNode) -> Result<String, EvalError> {
        let mut values = self.eval_args(args)?;
        match values.pop() {
            Some(Value::String(s)) if values.is_empty() => Ok(s),
            Some(other) if values.is_empty() => Err(invocation(
                name,
                Some(0),
                format!("expected a String, got {}", other.value_type()),
                node,
            )),
            _ => Err(invocation(
                name,
                None,
                format!("expected 1 argument(s), got {}", args.len()),
                node,
            )),
        }
    }

    fn call_function(&mut self, name: &str, args: &[NodeRef], node: &AstNode) -> Result<Value, EvalError> {
        match name {
            "Retract" => {
                self.require_action(name, node)?;
                let rule = self.single_string(name, args, node)?;
                self.effects.retracted.push(rule);
                Ok(Value::Nil)
            }
            "Complete" => {
                self.require_action(name, node)?;
                if !args.is_empty() {
                    return Err(invocation(
                        name,
                        None,
                        format!("expected 0 argument(s), got {}", args.len()),
                        node,
                    ));
                }
                self.effects.complete = true;
                Ok(Value::Nil)
            }
            "Changed" => {
                self.require_action(name, node)?;
                let path = self.single_string(name, args, node)?;
                let root = path.split('.').next().unwrap_or_default();
                self.memo.invalidate(root);
                self.effects.changed = true;
                Ok(Value::Nil)
            }
            _ => {
                let values = self.eval_args(args)?;
                match self.functions.call(name, &values) {
                    Some(Ok(v)) => Ok(v),
                    Some(Err(e)) => Err(invocation(name, e.argument_index(), e.to_string(), node)),
                    None => Err(invocation(name, None, "no such function".into(), node)),
                }
            }
        }
    }

    fn call_method(
        &mut self,
        receiver: NodeRef,
        name: &str,
        args: &[NodeRef],
        node: &AstNode,
    ) -> Result<Value, EvalError> {
        let values = self.eval_args(args)?;
        let graph = self.graph;
        if let Some((root, path)) = fact_path(graph, receiver) {
            if let Some(Binding::Fact(fact)) = self.ctx.binding_mut(root) {
                if let Some(fact) = descend_mut(&mut **fact, &path) {
                    let Some(Member::Method(method)) = fact.resolve(name) else {
                        return Err(member_not_found(name, fact.type_name(), node));
                    };
                    let receiver = graph.node(receiver).source();
                    let result = fact.invoke(method, &values).map_err(|e| {
                        invocation(&format!("{receiver}.{name}"), fact_argument(&e), e.to_string(), node)
                    });
                    // the method may have written its own fields
                    self.memo.invalidate(root);
                    if self.phase == Phase::Action {
                        self.effects.changed = true;
                    }
                    return result;
                }
            }
        }
        let target = self.eval(receiver)?;
        match call_value_method(&target, name, &values) {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(invocation(name, e.argument_index(), e.to_string(), node)),
            None => Err(member_not_found(name, &target.value_type().to_string(), node)),
        }
    }

    fn assign(&mut self, target: NodeRef, op: AssignOp, value: NodeRef, node: &AstNode) -> Result<Value, EvalError> {
        let rhs = self.eval(value)?;
        let new_value = match op.binary() {
            None => rhs,
            Some(bin) => {
                let current = self.eval(target)?;
                current
                    .binary(bin, &rhs)
                    .map_err(|e| op_error(e, op.symbol(), node))?
            }
        };
        let root = self.write_location(target, new_value.clone(), node)?;
        self.memo.invalidate(&root);
        self.effects.changed = true;
        trace!(location = self.graph.node(target).source(), root = %root, "assigned");
        Ok(new_value)
    }

    /// Store `value` at a location node and return the root that changed.
    fn write_location(&mut self, target: NodeRef, value: Value, node: &AstNode) -> Result<String, EvalError> {
        let graph = self.graph;
        let location = graph.node(target);
        match location.kind() {
            NodeKind::Variable(name) => match self.ctx.binding_mut(name) {
                Some(Binding::Value(slot)) => {
                    *slot = value;
                    Ok(name.clone())
                }
                Some(Binding::Fact(_)) => Err(not_assignable(location)),
                None => Err(unresolved(name, node)),
            },
            NodeKind::Field { object, name } => {
                let Some((root, path)) = fact_path(graph, *object) else {
                    return Err(not_assignable(location));
                };
                match self.ctx.binding_mut(root) {
                    Some(Binding::Fact(fact)) => {
                        if let Some(fact) = descend_mut(&mut **fact, &path) {
                            let field = match fact.resolve(name) {
                                Some(Member::Field(field)) => field,
                                Some(Member::Fact(_)) => return Err(not_assignable(location)),
                                _ => return Err(member_not_found(name, fact.type_name(), node)),
                            };
                            fact.write(field, value)
                                .map_err(|e| EvalError::AssignmentFailed {
                                    target: location.source().to_owned(),
                                    message: e.to_string(),
                                    expr: node.source().to_owned(),
                                })?;
                            return Ok(root.to_owned());
                        }
                    }
                    Some(Binding::Value(v)) if path.is_empty() => {
                        return Err(member_not_found(name, &v.value_type().to_string(), node));
                    }
                    Some(Binding::Value(_)) => {}
                    None => return Err(unresolved(root, node)),
                }
                let current = self.eval(*object)?;
                Err(member_not_found(name, &current.value_type().to_string(), node))
            }
            NodeKind::Index { object, selector } => {
                let selector = self.eval(*selector)?;
                let current = self.eval(*object)?;
                let current_type = current.value_type();
                let (Value::Array(mut items), Value::Int(index)) = (current, &selector) else {
                    return Err(EvalError::TypeMismatch {
                        op: "[]".into(),
                        left: current_type,
                        right: selector.value_type(),
                        expr: node.source().to_owned(),
                    });
                };
                let len = items.len();
                let slot = usize::try_from(*index)
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| EvalError::IndexOutOfBounds {
                        index: *index,
                        len,
                        expr: node.source().to_owned(),
                    })?;
                *slot = value;
                self.write_location(*object, Value::Array(items), node)
            }
            _ => Err(not_assignable(location)),
        }
    }
}

/// Root and field names of a chain like `Order.Customer.Address`. `None`
/// when the chain passes through anything but field access.
fn fact_path(graph: &AstGraph, mut r: NodeRef) -> Option<(&str, Vec<&str>)> {
    let mut names = Vec::new();
    loop {
        match graph.node(r).kind() {
            NodeKind::Variable(root) => {
                names.reverse();
                return Some((root.as_str(), names));
            }
            NodeKind::Field { object, name } => {
                names.push(name.as_str());
                r = *object;
            }
            _ => return None,
        }
    }
}

/// Follow nested facts along `path`. `None` if a link is not a fact.
fn descend<'x>(mut fact: &'x dyn FactAccessor, path: &[&str]) -> Option<&'x dyn FactAccessor> {
    for name in path {
        let Some(Member::Fact(handle)) = fact.resolve(name) else {
            return None;
        };
        fact = fact.fact(handle)?;
    }
    Some(fact)
}

fn descend_mut<'x>(
    mut fact: &'x mut dyn FactAccessor,
    path: &[&str],
) -> Option<&'x mut dyn FactAccessor> {
    for name in path {
        let Some(Member::Fact(handle)) = fact.resolve(name) else {
            return None;
        };
        fact = fact.fact_mut(handle)?;
    }
    Some(fact)
}

fn index_into(target: &Value, selector: &Value, node: &AstNode) -> Result<Value, EvalError> {
    match (target, selector) {
        (Value::Array(items), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|idx| items.get(idx))
            .cloned()
            .ok_or_else(|| EvalError::IndexOutOfBounds {
                index: *i,
                len: items.len(),
                expr: node.source().to_owned(),
            }),
        _ => Err(EvalError::TypeMismatch {
            op: "[]".into(),
            left: target.value_type(),
            right: selector.value_type(),
            expr: node.source().to_owned(),
        }),
    }
}

fn op_error(e: OpError, op: &str, node: &AstNode) -> EvalError {
    let expr = node.source().to_owned();
    match e {
        OpError::Mismatch { left, right } => EvalError::TypeMismatch {
            op: op.to_owned(),
            left,
            right,
            expr,
        },
        OpError::Unary { operand } => EvalError::UnaryTypeMismatch {
            op: op.to_owned(),
            operand,
            expr,
        },
        OpError::DivisionByZero => EvalError::DivisionByZero { expr },
        OpError::Overflow => EvalError::Overflow {
            op: op.to_owned(),
            expr,
        },
    }
}

fn unresolved(name: &str, node: &AstNode) -> EvalError {
    EvalError::UnresolvedReference {
        name: name.to_owned(),
        expr: node.source().to_owned(),
    }
}

fn member_not_found(member: &str, type_name: &str, node: &AstNode) -> EvalError {
    EvalError::MemberNotFound {
        member: member.to_owned(),
        type_name: type_name.to_owned(),
        expr: node.source().to_owned(),
    }
}

fn not_assignable(location: &AstNode) -> EvalError {
    EvalError::NotAssignable {
        expr: location.source().to_owned(),
    }
}

fn invocation(target: &str, argument: Option<usize>, message: String, node: &AstNode) -> EvalError {
    EvalError::InvocationError {
        target: target.to_owned(),
        argument,
        message,
        expr: node.source().to_owned(),
    }
}

fn fact_argument(e: &FactError) -> Option<usize> {
    match e {
        FactError::Argument { index, .. } => Some(*index),
        _ => None,
    }
}
