use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::expr::{AssignOp, BinaryOp, UnaryOp};
use super::Value;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique node identity. Two knowledge base instances never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub(crate) fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Slot of a node inside its [`AstGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub(crate) u32);

impl NodeRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Node kind tags, shared with the catalog encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Constant,
    Variable,
    Field,
    ArrayMapSelector,
    Unary,
    Binary,
    FunctionCall,
    MethodCall,
    Assignment,
}

impl NodeType {
    pub(crate) fn tag(self) -> u8 {
        match self {
            NodeType::Constant => 1,
            NodeType::Variable => 2,
            NodeType::Field => 3,
            NodeType::ArrayMapSelector => 4,
            NodeType::Unary => 5,
            NodeType::Binary => 6,
            NodeType::FunctionCall => 7,
            NodeType::MethodCall => 8,
            NodeType::Assignment => 9,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => NodeType::Constant,
            2 => NodeType::Variable,
            3 => NodeType::Field,
            4 => NodeType::ArrayMapSelector,
            5 => NodeType::Unary,
            6 => NodeType::Binary,
            7 => NodeType::FunctionCall,
            8 => NodeType::MethodCall,
            9 => NodeType::Assignment,
            _ => return None,
        })
    }
}

/// What a node computes. Children are slots in the same graph.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Constant(Value),
    Variable(String),
    Field { object: NodeRef, name: String },
    Index { object: NodeRef, selector: NodeRef },
    Unary { op: UnaryOp, operand: NodeRef },
    Binary { op: BinaryOp, left: NodeRef, right: NodeRef },
    FunctionCall { name: String, args: Vec<NodeRef> },
    MethodCall { receiver: NodeRef, name: String, args: Vec<NodeRef> },
    Assignment { target: NodeRef, op: AssignOp, value: NodeRef },
}

impl NodeKind {
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Constant(_) => NodeType::Constant,
            NodeKind::Variable(_) => NodeType::Variable,
            NodeKind::Field { .. } => NodeType::Field,
            NodeKind::Index { .. } => NodeType::ArrayMapSelector,
            NodeKind::Unary { .. } => NodeType::Unary,
            NodeKind::Binary { .. } => NodeType::Binary,
            NodeKind::FunctionCall { .. } => NodeType::FunctionCall,
            NodeKind::MethodCall { .. } => NodeType::MethodCall,
            NodeKind::Assignment { .. } => NodeType::Assignment,
        }
    }

    /// Child slots in evaluation order.
    #[must_use]
    pub fn children(&self) -> Vec<NodeRef> {
        match self {
            NodeKind::Constant(_) | NodeKind::Variable(_) => Vec::new(),
            NodeKind::Field { object, .. } => vec![*object],
            NodeKind::Index { object, selector } => vec![*object, *selector],
            NodeKind::Unary { operand, .. } => vec![*operand],
            NodeKind::Binary { left, right, .. } => vec![*left, *right],
            NodeKind::FunctionCall { args, .. } => args.clone(),
            NodeKind::MethodCall { receiver, args, .. } => {
                let mut out = Vec::with_capacity(args.len() + 1);
                out.push(*receiver);
                out.extend_from_slice(args);
                out
            }
            NodeKind::Assignment { target, value, .. } => vec![*target, *value],
        }
    }

    /// Whether the subtree rooted here may have effects or read outside state.
    fn is_call_like(&self) -> bool {
        matches!(
            self,
            NodeKind::FunctionCall { .. } | NodeKind::MethodCall { .. } | NodeKind::Assignment { .. }
        )
    }
}

/// One vertex of the graph.
#[derive(Debug, Clone)]
pub struct AstNode {
    id: NodeId,
    kind: NodeKind,
    source: String,
    snapshot: Arc<str>,
    roots: Vec<String>,
    memoizable: bool,
}

impl AstNode {
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// The rule-language text this node was built from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Structural signature. Equal signatures denote equal computations.
    #[must_use]
    pub fn snapshot(&self) -> &str {
        &self.snapshot
    }

    pub(crate) fn snapshot_key(&self) -> &Arc<str> {
        &self.snapshot
    }

    /// Root identifiers read anywhere in this subtree, sorted.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// True when no call or assignment appears in the subtree.
    #[must_use]
    pub fn is_memoizable(&self) -> bool {
        self.memoizable
    }
}

/// Arena of nodes for one knowledge base instance. Children always occupy
/// lower slots than their parents.
#[derive(Debug, Clone, Default)]
pub struct AstGraph {
    nodes: Vec<AstNode>,
    interned: HashMap<Arc<str>, NodeRef>,
    by_id: HashMap<NodeId, NodeRef>,
}

impl AstGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, r: NodeRef) -> Option<&AstNode> {
        self.nodes.get(r.index())
    }

    /// Slots handed out by this graph are always valid.
    pub(crate) fn node(&self, r: NodeRef) -> &AstNode {
        &self.nodes[r.index()]
    }

    #[must_use]
    pub fn find(&self, id: NodeId) -> Option<NodeRef> {
        self.by_id.get(&id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeRef, &AstNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeRef(i as u32), n))
    }

    /// Append a node with a fresh identity.
    pub(crate) fn push(&mut self, kind: NodeKind, source: String) -> NodeRef {
        let id = NodeId::fresh();
        let snapshot: Arc<str> = Arc::from(self.signature(&kind));
        let mut roots: Vec<String> = Vec::new();
        let mut memoizable = !kind.is_call_like();
        match &kind {
            NodeKind::Variable(name) => roots.push(name.clone()),
            other => {
                for child in other.children() {
                    let child = self.node(child);
                    roots.extend(child.roots.iter().cloned());
                    memoizable &= child.memoizable;
                }
                roots.sort();
                roots.dedup();
            }
        }
        let r = NodeRef(self.nodes.len() as u32);
        self.nodes.push(AstNode {
            id,
            kind,
            source,
            snapshot: Arc::clone(&snapshot),
            roots,
            memoizable,
        });
        self.by_id.insert(id, r);
        self.interned.entry(snapshot).or_insert(r);
        r
    }

    /// Reuse an existing node with the same signature when the kind is free
    /// of effects, otherwise append.
    pub(crate) fn intern(&mut self, kind: NodeKind, source: String) -> NodeRef {
        if !kind.is_call_like() {
            let sig = self.signature(&kind);
            if let Some(&existing) = self.interned.get(sig.as_str()) {
                if self.node(existing).memoizable {
                    return existing;
                }
            }
        }
        self.push(kind, source)
    }

    /// Structural signature of `kind`, built from its children's signatures.
    pub(crate) fn signature(&self, kind: &NodeKind) -> String {
        let mut out = String::new();
        match kind {
            NodeKind::Constant(v) => write_constant(&mut out, v),
            NodeKind::Variable(name) => {
                let _ = write!(out, "Variable({name})");
            }
            NodeKind::Field { object, name } => {
                let _ = write!(out, "Field({}.{name})", self.node(*object).snapshot);
            }
            NodeKind::Index { object, selector } => {
                let _ = write!(
                    out,
                    "Index({}[{}])",
                    self.node(*object).snapshot,
                    self.node(*selector).snapshot
                );
            }
            NodeKind::Unary { op, operand } => {
                let _ = write!(out, "Unary({op}{})", self.node(*operand).snapshot);
            }
            NodeKind::Binary { op, left, right } => {
                let _ = write!(
                    out,
                    "Binary({} {op} {})",
                    self.node(*left).snapshot,
                    self.node(*right).snapshot
                );
            }
            NodeKind::FunctionCall { name, args } => {
                let _ = write!(out, "Call({name}(");
                self.write_arg_signatures(&mut out, args);
                out.push_str("))");
            }
            NodeKind::MethodCall {
                receiver,
                name,
                args,
            } => {
                let _ = write!(out, "Method({}.{name}(", self.node(*receiver).snapshot);
                self.write_arg_signatures(&mut out, args);
                out.push_str("))");
            }
            NodeKind::Assignment { target, op, value } => {
                let _ = write!(
                    out,
                    "Assign({} {op} {})",
                    self.node(*target).snapshot,
                    self.node(*value).snapshot
                );
            }
        }
        out
    }

    fn write_arg_signatures(&self, out: &mut String, args: &[NodeRef]) {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.node(*arg).snapshot);
        }
    }

    /// Copy every slot under freshly minted identities. Returns the copy and
    /// the old-to-new identity table.
    #[must_use]
    pub fn clone_fresh(&self) -> (AstGraph, HashMap<NodeId, NodeId>) {
        let mut remap = HashMap::with_capacity(self.nodes.len());
        let mut by_id = HashMap::with_capacity(self.nodes.len());
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let id = NodeId::fresh();
                remap.insert(node.id, id);
                by_id.insert(id, NodeRef(i as u32));
                AstNode {
                    id,
                    ..node.clone()
                }
            })
            .collect();
        let graph = AstGraph {
            nodes,
            interned: self.interned.clone(),
            by_id,
        };
        (graph, remap)
    }
}

fn write_constant(out: &mut String, v: &Value) {
    let _ = match v {
        Value::Nil => write!(out, "Constant(Nil)"),
        other => write!(out, "Constant({}->{other})", other.value_type()),
    };
}
