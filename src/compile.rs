use std::collections::HashSet;

use tracing::debug;

use crate::types::{AstGraph, BuildError, Expr, KnowledgeBase, NodeKind, NodeRef, Rule, RuleEntry, Statement};

pub(crate) fn compile(name: &str, version: &str, rules: &[Rule]) -> Result<KnowledgeBase, BuildError> {
    check_names(rules)?;

    let mut graph = AstGraph::new();
    let mut entries = Vec::with_capacity(rules.len());
    for rule in rules {
        let condition = rule
            .condition
            .as_ref()
            .ok_or_else(|| BuildError::MissingCondition {
                rule: rule.name.clone(),
            })?;
        let when = lower_expr_as(&mut graph, condition, rule.condition_text.as_deref());
        let then = rule
            .actions
            .iter()
            .enumerate()
            .map(|(i, statement)| {
                let text = rule.action_texts.get(i).map(String::as_str);
                lower_statement(&mut graph, &rule.name, statement, text)
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(RuleEntry {
            name: rule.name.clone(),
            description: rule.description.clone(),
            salience: rule.salience,
            when,
            then,
        });
    }

    debug!(
        knowledge_base = name,
        version,
        rules = entries.len(),
        nodes = graph.len(),
        "knowledge base built"
    );
    Ok(KnowledgeBase::from_parts(
        name.to_owned(),
        version.to_owned(),
        graph,
        entries,
    ))
}

fn check_names(rules: &[Rule]) -> Result<(), BuildError> {
    let mut seen = HashSet::new();
    for rule in rules {
        if rule.name.trim().is_empty() {
            return Err(BuildError::EmptyName);
        }
        if !seen.insert(rule.name.as_str()) {
            return Err(BuildError::DuplicateRule {
                name: rule.name.clone(),
            });
        }
    }
    Ok(())
}

fn lower_expr(graph: &mut AstGraph, expr: &Expr) -> NodeRef {
    lower_expr_as(graph, expr, None)
}

/// Children first, so every child sits in a lower slot than its parent.
/// `source` overrides the rendered text of the top node.
fn lower_expr_as(graph: &mut AstGraph, expr: &Expr, source: Option<&str>) -> NodeRef {
    let kind = match expr {
        Expr::Constant(v) => NodeKind::Constant(v.clone()),
        Expr::Variable(name) => NodeKind::Variable(name.clone()),
        Expr::Field(object, name) => NodeKind::Field {
            object: lower_expr(graph, object),
            name: name.clone(),
        },
        Expr::Index(object, selector) => NodeKind::Index {
            object: lower_expr(graph, object),
            selector: lower_expr(graph, selector),
        },
        Expr::Unary(op, operand) => NodeKind::Unary {
            op: *op,
            operand: lower_expr(graph, operand),
        },
        Expr::Binary(op, left, right) => NodeKind::Binary {
            op: *op,
            left: lower_expr(graph, left),
            right: lower_expr(graph, right),
        },
        Expr::Call(name, args) => NodeKind::FunctionCall {
            name: name.clone(),
            args: lower_args(graph, args),
        },
        Expr::MethodCall(receiver, name, args) => {
            let receiver = lower_expr(graph, receiver);
            NodeKind::MethodCall {
                receiver,
                name: name.clone(),
                args: lower_args(graph, args),
            }
        }
    };
    let source = source.map_or_else(|| expr.to_string(), str::to_owned);
    graph.intern(kind, source)
}

fn lower_args(graph: &mut AstGraph, args: &[Expr]) -> Vec<NodeRef> {
    args.iter().map(|arg| lower_expr(graph, arg)).collect()
}

fn lower_statement(
    graph: &mut AstGraph,
    rule: &str,
    statement: &Statement,
    source: Option<&str>,
) -> Result<NodeRef, BuildError> {
    match statement {
        Statement::Assign { target, op, value } => {
            if !is_location(target) {
                return Err(BuildError::ParseDependency {
                    rule: rule.to_owned(),
                    reason: format!("cannot assign to `{target}`"),
                });
            }
            let target_ref = lower_expr(graph, target);
            let value_ref = lower_expr(graph, value);
            Ok(graph.push(
                NodeKind::Assignment {
                    target: target_ref,
                    op: *op,
                    value: value_ref,
                },
                source.map_or_else(|| statement.to_string(), str::to_owned),
            ))
        }
        Statement::Call(expr @ (Expr::Call(..) | Expr::MethodCall(..))) => {
            Ok(lower_expr_as(graph, expr, source))
        }
        Statement::Call(other) => Err(BuildError::ParseDependency {
            rule: rule.to_owned(),
            reason: format!("`{other}` is not a statement"),
        }),
    }
}

/// A root, a field reached through a chain of fields, or an element of a
/// location.
fn is_location(expr: &Expr) -> bool {
    match expr {
        Expr::Variable(_) => true,
        Expr::Field(object, _) => is_field_chain(object),
        Expr::Index(object, _) => is_location(object),
        _ => false,
    }
}

fn is_field_chain(expr: &Expr) -> bool {
    match expr {
        Expr::Variable(_) => true,
        Expr::Field(object, _) => is_field_chain(object),
        _ => false,
    }
}
