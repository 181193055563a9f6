//! Binary catalog of a compiled knowledge base.
//!
//! A catalog stores the node graph and rule entries of a [`KnowledgeBase`]
//! so it can be restored without the rule text. Every node is written once
//! per identity, children before parents, so shared sub-expressions stay
//! shared after a round trip.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"RKCT"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Payload
//! ```
//!
//! The payload opens with `meta_len: u32` and a bincode-encoded metadata
//! block (name, version, record count, rule entries), followed by node
//! records:
//!
//! ```text
//! id: u64 | type_tag: u8 | source_len: u32 | source | snapshot_len: u32 | snapshot | body
//! ```
//!
//! Constant and Variable bodies are a tagged value (`value_tag: u8`, then a
//! fixed-width little-endian encoding; strings carry an 8-byte length).
//! Compound bodies are `label_len: u32, label, count: u32, count x id: u64`.
//!
//! Identities in a catalog are only used to link records. Import mints fresh
//! ones, so two imports of the same blob never share a node.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{
    AssignOp, AstGraph, BinaryOp, ErrorKind, KnowledgeBase, NodeId, NodeKind, NodeRef, NodeType,
    RuleEntry, UnaryOp, Value, ValueType,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"RKCT";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;
const MAX_VALUE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when exporting a knowledge base.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to encode catalog metadata: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("catalog section of {0} bytes exceeds the format limit")]
    TooLarge(usize),

    #[error("I/O error during export: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when importing a catalog. Import is all or
/// nothing: no partially rebuilt knowledge base is ever returned.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a rule catalog: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("truncated record at payload offset {offset}")]
    Truncated { offset: usize },

    #[error("node #{id} is recorded more than once")]
    DuplicateIdentity { id: u64 },

    #[error("reference to unknown node #{id}")]
    DanglingReference { id: u64 },

    #[error("unknown node type tag {tag}")]
    UnknownTypeTag { tag: u8 },

    #[error("unknown value tag {tag}")]
    UnknownValueTag { tag: u8 },

    #[error("node #{id} signature mismatch: stored '{stored}', rebuilt '{rebuilt}'")]
    SignatureMismatch {
        id: u64,
        stored: String,
        rebuilt: String,
    },

    #[error("failed to decode catalog metadata: {0}")]
    Metadata(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("I/O error during import: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Decode
    }
}

// ---------------------------------------------------------------------------
// Catalog records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CatalogMeta {
    name: String,
    version: String,
    record_count: u32,
    rules: Vec<SerializedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedEntry {
    name: String,
    description: String,
    salience: i32,
    when: u64,
    then: Vec<u64>,
}

/// One node as stored in a catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub id: u64,
    pub node_type: NodeType,
    pub source: String,
    pub snapshot: String,
    pub body: NodeBody,
}

/// Leaf value or linked children of a [`NodeMeta`].
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    /// A Constant's value, or a Variable's identifier as a string.
    Leaf(Value),
    /// Operator symbol, member or function name, then child identities.
    Compound { label: String, children: Vec<u64> },
}

// ---------------------------------------------------------------------------
// Graph -> records
// ---------------------------------------------------------------------------

fn collect_records(kb: &KnowledgeBase) -> Vec<NodeMeta> {
    let mut written = HashSet::new();
    let mut out = Vec::with_capacity(kb.graph.len());
    for entry in &kb.rules {
        visit(&kb.graph, entry.when, &mut written, &mut out);
        for &statement in &entry.then {
            visit(&kb.graph, statement, &mut written, &mut out);
        }
    }
    out
}

fn visit(graph: &AstGraph, r: NodeRef, written: &mut HashSet<NodeId>, out: &mut Vec<NodeMeta>) {
    let node = graph.node(r);
    if written.contains(&node.id()) {
        return;
    }
    for child in node.kind().children() {
        visit(graph, child, written, out);
    }
    written.insert(node.id());

    let body = match node.kind() {
        NodeKind::Constant(v) => NodeBody::Leaf(v.clone()),
        NodeKind::Variable(name) => NodeBody::Leaf(Value::String(name.clone())),
        other => NodeBody::Compound {
            label: label_of(other).to_owned(),
            children: other
                .children()
                .into_iter()
                .map(|c| graph.node(c).id().get())
                .collect(),
        },
    };
    out.push(NodeMeta {
        id: node.id().get(),
        node_type: node.kind().node_type(),
        source: node.source().to_owned(),
        snapshot: node.snapshot().to_owned(),
        body,
    });
}

fn label_of(kind: &NodeKind) -> &str {
    match kind {
        NodeKind::Constant(_) | NodeKind::Variable(_) | NodeKind::Index { .. } => "",
        NodeKind::Field { name, .. }
        | NodeKind::FunctionCall { name, .. }
        | NodeKind::MethodCall { name, .. } => name,
        NodeKind::Unary { op, .. } => op.symbol(),
        NodeKind::Binary { op, .. } => op.symbol(),
        NodeKind::Assignment { op, .. } => op.symbol(),
    }
}

// ---------------------------------------------------------------------------
// Records -> graph
// ---------------------------------------------------------------------------

fn rebuild(meta: CatalogMeta, records: Vec<NodeMeta>) -> Result<KnowledgeBase, DecodeError> {
    if meta.record_count as usize != records.len() {
        return Err(DecodeError::Validation(format!(
            "metadata says {} records but payload has {}",
            meta.record_count,
            records.len()
        )));
    }

    let mut graph = AstGraph::new();
    let mut slots: HashMap<u64, NodeRef> = HashMap::with_capacity(records.len());
    for record in records {
        if slots.contains_key(&record.id) {
            return Err(DecodeError::DuplicateIdentity { id: record.id });
        }
        let kind = link(&record, &slots)?;
        let rebuilt = graph.signature(&kind);
        if rebuilt != record.snapshot {
            return Err(DecodeError::SignatureMismatch {
                id: record.id,
                stored: record.snapshot,
                rebuilt,
            });
        }
        slots.insert(record.id, graph.push(kind, record.source));
    }

    let resolve = |id: u64| slots.get(&id).copied().ok_or(DecodeError::DanglingReference { id });
    let mut names = HashSet::with_capacity(meta.rules.len());
    let mut entries = Vec::with_capacity(meta.rules.len());
    for rule in meta.rules {
        if !names.insert(rule.name.clone()) {
            return Err(DecodeError::Validation(format!(
                "duplicate rule name '{}'",
                rule.name
            )));
        }
        let when = resolve(rule.when)?;
        if graph.node(when).kind().node_type() == NodeType::Assignment {
            return Err(DecodeError::Validation(format!(
                "rule '{}' has an assignment as its condition",
                rule.name
            )));
        }
        let then = rule
            .then
            .iter()
            .map(|&id| {
                let r = resolve(id)?;
                match graph.node(r).kind().node_type() {
                    NodeType::Assignment | NodeType::FunctionCall | NodeType::MethodCall => Ok(r),
                    other => Err(DecodeError::Validation(format!(
                        "rule '{}' has a {other:?} node as a statement",
                        rule.name
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.push(RuleEntry {
            name: rule.name,
            description: rule.description,
            salience: rule.salience,
            when,
            then,
        });
    }

    Ok(KnowledgeBase::from_parts(
        meta.name,
        meta.version,
        graph,
        entries,
    ))
}

fn link(record: &NodeMeta, slots: &HashMap<u64, NodeRef>) -> Result<NodeKind, DecodeError> {
    let id = record.id;
    let (label, children) = match (&record.body, record.node_type) {
        (NodeBody::Leaf(v), NodeType::Constant) => return Ok(NodeKind::Constant(v.clone())),
        (NodeBody::Leaf(Value::String(name)), NodeType::Variable) => {
            return Ok(NodeKind::Variable(name.clone()))
        }
        (NodeBody::Compound { label, children }, t)
            if !matches!(t, NodeType::Constant | NodeType::Variable) =>
        {
            let refs = children
                .iter()
                .map(|&c| slots.get(&c).copied().ok_or(DecodeError::DanglingReference { id: c }))
                .collect::<Result<Vec<_>, _>>()?;
            (label.as_str(), refs)
        }
        (_, t) => {
            return Err(DecodeError::Validation(format!(
                "node #{id}: body does not fit a {t:?} node"
            )))
        }
    };

    let arity = |n: usize| {
        if children.len() == n {
            Ok(())
        } else {
            Err(DecodeError::Validation(format!(
                "node #{id}: {:?} expects {n} children, found {}",
                record.node_type,
                children.len()
            )))
        }
    };
    let bad_label = || DecodeError::Validation(format!("node #{id}: unknown operator '{label}'"));

    Ok(match record.node_type {
        NodeType::Field => {
            arity(1)?;
            NodeKind::Field {
                object: children[0],
                name: label.to_owned(),
            }
        }
        NodeType::ArrayMapSelector => {
            arity(2)?;
            NodeKind::Index {
                object: children[0],
                selector: children[1],
            }
        }
        NodeType::Unary => {
            arity(1)?;
            NodeKind::Unary {
                op: UnaryOp::from_symbol(label).ok_or_else(bad_label)?,
                operand: children[0],
            }
        }
        NodeType::Binary => {
            arity(2)?;
            NodeKind::Binary {
                op: BinaryOp::from_symbol(label).ok_or_else(bad_label)?,
                left: children[0],
                right: children[1],
            }
        }
        NodeType::FunctionCall => NodeKind::FunctionCall {
            name: label.to_owned(),
            args: children,
        },
        NodeType::MethodCall => {
            let Some((&receiver, args)) = children.split_first() else {
                return Err(DecodeError::Validation(format!(
                    "node #{id}: method call without a receiver"
                )));
            };
            NodeKind::MethodCall {
                receiver,
                name: label.to_owned(),
                args: args.to_vec(),
            }
        }
        NodeType::Assignment => {
            arity(2)?;
            NodeKind::Assignment {
                target: children[0],
                op: AssignOp::from_symbol(label).ok_or_else(bad_label)?,
                value: children[1],
            }
        }
        NodeType::Constant | NodeType::Variable => {
            return Err(DecodeError::Validation(format!(
                "node #{id}: leaf node with a compound body"
            )))
        }
    })
}

// ---------------------------------------------------------------------------
// Record encoding
// ---------------------------------------------------------------------------

fn len_u32(len: usize) -> Result<u32, ExportError> {
    u32::try_from(len).map_err(|_| ExportError::TooLarge(len))
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ExportError> {
    buf.extend_from_slice(&len_u32(bytes.len())?.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn write_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), ExportError> {
    buf.push(value.value_type().tag());
    match value {
        Value::Nil => {}
        Value::Bool(b) => buf.push(u8::from(*b)),
        Value::Int(i) => buf.extend_from_slice(&i.to_le_bytes()),
        Value::Float(f) => buf.extend_from_slice(&f.to_le_bytes()),
        Value::String(s) => {
            buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            buf.extend_from_slice(&len_u32(items.len())?.to_le_bytes());
            for item in items {
                write_value(buf, item)?;
            }
        }
    }
    Ok(())
}

fn write_record(buf: &mut Vec<u8>, record: &NodeMeta) -> Result<(), ExportError> {
    buf.extend_from_slice(&record.id.to_le_bytes());
    buf.push(record.node_type.tag());
    write_bytes(buf, record.source.as_bytes())?;
    write_bytes(buf, record.snapshot.as_bytes())?;
    match &record.body {
        NodeBody::Leaf(v) => write_value(buf, v)?,
        NodeBody::Compound { label, children } => {
            write_bytes(buf, label.as_bytes())?;
            buf.extend_from_slice(&len_u32(children.len())?.to_le_bytes());
            for child in children {
                buf.extend_from_slice(&child.to_le_bytes());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Record decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.array().map(u64::from_le_bytes)
    }

    fn text(&mut self, len: usize) -> Result<String, DecodeError> {
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::Validation(format!("invalid utf-8 at payload offset {offset}")))
    }

    fn short_text(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        self.text(len)
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(DecodeError::Validation(format!(
                "value nesting deeper than {MAX_VALUE_DEPTH}"
            )));
        }
        let tag = self.u8()?;
        let ty = ValueType::from_tag(tag).ok_or(DecodeError::UnknownValueTag { tag })?;
        Ok(match ty {
            ValueType::Nil => Value::Nil,
            ValueType::Boolean => match self.u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(DecodeError::Validation(format!(
                        "boolean byte must be 0 or 1, found {other}"
                    )))
                }
            },
            ValueType::Integer => Value::Int(i64::from_le_bytes(self.array()?)),
            ValueType::Float => Value::Float(f64::from_le_bytes(self.array()?)),
            ValueType::String => {
                let offset = self.pos;
                let len = usize::try_from(self.u64()?)
                    .map_err(|_| DecodeError::Truncated { offset })?;
                Value::String(self.text(len)?)
            }
            ValueType::Array => {
                let count = self.u32()?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(self.value(depth + 1)?);
                }
                Value::Array(items)
            }
        })
    }

    fn record(&mut self) -> Result<NodeMeta, DecodeError> {
        let id = self.u64()?;
        let tag = self.u8()?;
        let node_type = NodeType::from_tag(tag).ok_or(DecodeError::UnknownTypeTag { tag })?;
        let source = self.short_text()?;
        let snapshot = self.short_text()?;
        let body = match node_type {
            NodeType::Constant | NodeType::Variable => NodeBody::Leaf(self.value(0)?),
            _ => {
                let label = self.short_text()?;
                let count = self.u32()?;
                let mut children = Vec::new();
                for _ in 0..count {
                    children.push(self.u64()?);
                }
                NodeBody::Compound { label, children }
            }
        };
        Ok(NodeMeta {
            id,
            node_type,
            source,
            snapshot,
            body,
        })
    }
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), ExportError> {
    let hash = blake3::hash(payload);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    buf.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
    buf.extend_from_slice(&hash.as_bytes()[..16]);
    Ok(())
}

/// Check the header and checksum and return the payload.
fn open(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::LengthMismatch {
            expected: HEADER_SIZE as u32,
            actual: bytes.len(),
        });
    }
    if &bytes[0..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if format_version != FORMAT_VERSION {
        return Err(DecodeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }
    // bytes[6..8] engine version and bytes[8..12] flags are informational
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_len as usize {
        return Err(DecodeError::LengthMismatch {
            expected: payload_len,
            actual: payload.len(),
        });
    }
    if blake3::hash(payload).as_bytes()[..16] != bytes[16..32] {
        return Err(DecodeError::ChecksumMismatch);
    }
    Ok(payload)
}

fn read_payload(payload: &[u8]) -> Result<(CatalogMeta, Vec<NodeMeta>), DecodeError> {
    let mut reader = Reader::new(payload);
    let meta_len = reader.u32()? as usize;
    let meta_bytes = reader.take(meta_len)?;
    let (meta, used): (CatalogMeta, usize) =
        bincode::serde::decode_from_slice(meta_bytes, bincode::config::standard())?;
    if used != meta_len {
        return Err(DecodeError::Validation(format!(
            "metadata block has {} trailing bytes",
            meta_len - used
        )));
    }

    let mut records = Vec::new();
    while !reader.is_empty() {
        records.push(reader.record()?);
    }
    Ok((meta, records))
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Serialize a knowledge base instance to a catalog blob.
///
/// # Errors
///
/// Returns [`ExportError`] if the metadata cannot be encoded or a section
/// exceeds the 4 GiB format limit.
pub fn export(kb: &KnowledgeBase) -> Result<Vec<u8>, ExportError> {
    let records = collect_records(kb);
    let meta = CatalogMeta {
        name: kb.name.clone(),
        version: kb.version.clone(),
        record_count: len_u32(records.len())?,
        rules: kb
            .rules
            .iter()
            .map(|entry| SerializedEntry {
                name: entry.name.clone(),
                description: entry.description.clone(),
                salience: entry.salience,
                when: kb.graph.node(entry.when).id().get(),
                then: entry
                    .then
                    .iter()
                    .map(|&r| kb.graph.node(r).id().get())
                    .collect(),
            })
            .collect(),
    };

    let meta_bytes = bincode::serde::encode_to_vec(&meta, bincode::config::standard())?;
    let mut payload = Vec::new();
    write_bytes(&mut payload, &meta_bytes)?;
    for record in &records {
        write_record(&mut payload, record)?;
    }

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload)?;
    buf.extend_from_slice(&payload);
    debug!(
        knowledge_base = %kb.name,
        version = %kb.version,
        records = records.len(),
        bytes = buf.len(),
        "catalog exported"
    );
    Ok(buf)
}

/// Rebuild a knowledge base from a catalog blob. The result has fresh node
/// identities and an empty working memory.
///
/// # Errors
///
/// Returns [`DecodeError`] on any format, integrity, or linking failure.
pub fn import(bytes: &[u8]) -> Result<KnowledgeBase, DecodeError> {
    let (meta, records) = read_payload(open(bytes)?)?;
    let kb = rebuild(meta, records)?;
    debug!(
        knowledge_base = %kb.name,
        version = %kb.version,
        nodes = kb.graph.len(),
        "catalog imported"
    );
    Ok(kb)
}

/// The node records of a catalog blob, in stored order, without linking
/// them into a graph.
///
/// # Errors
///
/// Returns [`DecodeError`] if the header, checksum, or a record is malformed.
pub fn inspect(bytes: &[u8]) -> Result<Vec<NodeMeta>, DecodeError> {
    let (_, records) = read_payload(open(bytes)?)?;
    Ok(records)
}

impl KnowledgeBase {
    /// Shorthand for [`export`].
    ///
    /// # Errors
    ///
    /// See [`export`].
    pub fn to_catalog(&self) -> Result<Vec<u8>, ExportError> {
        export(self)
    }

    /// Shorthand for [`import`].
    ///
    /// # Errors
    ///
    /// See [`import`].
    pub fn from_catalog(bytes: &[u8]) -> Result<Self, DecodeError> {
        import(bytes)
    }

    /// Export and write the catalog to a file.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] on encoding or I/O failure.
    pub fn save_catalog(&self, path: impl AsRef<std::path::Path>) -> Result<(), ExportError> {
        std::fs::write(path, export(self)?)?;
        Ok(())
    }

    /// Read a file and import the catalog it contains.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] on I/O, format, integrity, or linking failure.
    pub fn load_catalog(path: impl AsRef<std::path::Path>) -> Result<Self, DecodeError> {
        let bytes = std::fs::read(path)?;
        import(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{call, lit, var, KnowledgeBaseBuilder};

    fn constant_kb(value: Value) -> KnowledgeBase {
        KnowledgeBaseBuilder::new("consts", "1")
            .rule("r", |r| {
                r.when(var("F").field("X").equals(lit(value)))
                    .then(var("F").field("Y").assign(1_i64))
            })
            .build()
            .unwrap()
    }

    fn constant_of(kb: &KnowledgeBase) -> Value {
        kb.graph()
            .iter()
            .find_map(|(_, n)| match n.kind() {
                NodeKind::Constant(v) if n.source() != "1" => Some(v.clone()),
                _ => None,
            })
            .unwrap()
    }

    // -- Constant round-trip --

    #[test]
    fn constants_round_trip_with_type_tags() {
        let values = [
            Value::String("héllo \"world\"".into()),
            Value::Int(-42),
            Value::Float(2.5),
            Value::Bool(true),
            Value::Nil,
            Value::Array(vec![Value::Int(1), Value::String("x".into())]),
        ];
        for value in values {
            let kb = constant_kb(value.clone());
            let restored = import(&export(&kb).unwrap()).unwrap();
            let got = constant_of(&restored);
            assert_eq!(got, value);
            assert_eq!(got.value_type(), value.value_type());
        }
    }

    #[test]
    fn integer_and_float_stay_distinct() {
        let kb = constant_kb(Value::Float(10.0));
        let restored = import(&export(&kb).unwrap()).unwrap();
        assert_eq!(constant_of(&restored).value_type(), ValueType::Float);
    }

    #[test]
    fn value_encoding_layout() {
        let mut buf = Vec::new();
        write_value(&mut buf, &Value::String("ab".into())).unwrap();
        assert_eq!(buf, [4, 2, 0, 0, 0, 0, 0, 0, 0, b'a', b'b']);

        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Int(1)).unwrap();
        assert_eq!(buf, [2, 1, 0, 0, 0, 0, 0, 0, 0]);

        let mut buf = Vec::new();
        write_value(&mut buf, &Value::Bool(true)).unwrap();
        assert_eq!(buf, [1, 1]);
    }

    // -- Structure --

    #[test]
    fn shared_nodes_are_written_once() {
        let kb = KnowledgeBaseBuilder::new("shared", "1")
            .rule("a", |r| {
                r.when(var("F").field("X").gt(1_i64))
                    .then(var("F").field("Y").assign(1_i64))
            })
            .rule("b", |r| {
                r.when(var("F").field("X").gt(1_i64))
                    .then(var("F").field("Z").assign(1_i64))
            })
            .build()
            .unwrap();
        let records = inspect(&export(&kb).unwrap()).unwrap();
        let ids: HashSet<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), records.len());
        assert_eq!(records.len(), kb.graph().len());
        let cond = records
            .iter()
            .filter(|r| r.source == "F.X > 1")
            .count();
        assert_eq!(cond, 1);
    }

    #[test]
    fn children_precede_parents() {
        let kb = constant_kb(Value::Int(3));
        let records = inspect(&export(&kb).unwrap()).unwrap();
        let mut seen = HashSet::new();
        for record in &records {
            if let NodeBody::Compound { children, .. } = &record.body {
                assert!(children.iter().all(|c| seen.contains(c)));
            }
            seen.insert(record.id);
        }
    }

    #[test]
    fn import_mints_fresh_identities() {
        let kb = constant_kb(Value::Int(3));
        let blob = export(&kb).unwrap();
        let a = import(&blob).unwrap();
        let b = import(&blob).unwrap();
        for (((_, orig), (_, x)), (_, y)) in kb.graph().iter().zip(a.graph().iter()).zip(b.graph().iter()) {
            assert_eq!(orig.snapshot(), x.snapshot());
            assert_ne!(orig.id(), x.id());
            assert_ne!(x.id(), y.id());
        }
    }

    #[test]
    fn rule_entries_survive() {
        let kb = KnowledgeBaseBuilder::new("Tutorial", "0.1.0")
            .rule("Log", |r| {
                r.salience(-3)
                    .description("logs")
                    .when(lit(true))
                    .then(call("Log", vec![lit("hi")]).invoke())
            })
            .build()
            .unwrap();
        let restored = import(&export(&kb).unwrap()).unwrap();
        assert_eq!(restored.name(), "Tutorial");
        assert_eq!(restored.version(), "0.1.0");
        let entry = restored.rule("Log").unwrap();
        assert_eq!(entry.salience(), -3);
        assert_eq!(entry.description(), "logs");
        assert_eq!(restored.graph().get(entry.then()[0]).unwrap().source(), "Log(\"hi\")");
    }

    // -- Corruption --

    #[test]
    fn bad_magic() {
        let mut blob = export(&constant_kb(Value::Int(1))).unwrap();
        blob[0] = b'X';
        assert!(matches!(import(&blob), Err(DecodeError::BadMagic)));
    }

    #[test]
    fn wrong_version() {
        let mut blob = export(&constant_kb(Value::Int(1))).unwrap();
        blob[4] = 9;
        assert!(matches!(
            import(&blob),
            Err(DecodeError::IncompatibleVersion { blob: 9, supported: 1 })
        ));
    }

    #[test]
    fn flipped_payload_byte() {
        let mut blob = export(&constant_kb(Value::Int(1))).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(matches!(import(&blob), Err(DecodeError::ChecksumMismatch)));
    }

    #[test]
    fn truncated_blob() {
        let blob = export(&constant_kb(Value::Int(1))).unwrap();
        assert!(matches!(
            import(&blob[..blob.len() - 3]),
            Err(DecodeError::LengthMismatch { .. })
        ));
        assert!(matches!(
            import(&blob[..10]),
            Err(DecodeError::LengthMismatch { expected: 32, actual: 10 })
        ));
    }

    /// Re-seal a tampered payload so only record validation can catch it.
    fn seal(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_header(&mut buf, payload).unwrap();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn duplicate_identity_rejected() {
        let blob = export(&constant_kb(Value::Int(1))).unwrap();
        let payload = &blob[HEADER_SIZE..];
        let mut reader = Reader::new(payload);
        let meta_len = reader.u32().unwrap() as usize;
        let records_start = 4 + meta_len;
        let first = {
            let mut r = Reader::new(&payload[records_start..]);
            r.record().unwrap();
            r.pos
        };
        let mut tampered = payload.to_vec();
        tampered.extend_from_slice(&payload[records_start..records_start + first]);
        assert!(matches!(
            import(&seal(&tampered)),
            Err(DecodeError::DuplicateIdentity { .. } | DecodeError::Validation(_))
        ));
    }

    #[test]
    fn unknown_type_tag_rejected() {
        let blob = export(&constant_kb(Value::Int(1))).unwrap();
        let payload = &blob[HEADER_SIZE..];
        let meta_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        let mut tampered = payload.to_vec();
        // first record: 4 + meta_len, then an 8-byte id
        tampered[4 + meta_len + 8] = 42;
        assert!(matches!(
            import(&seal(&tampered)),
            Err(DecodeError::UnknownTypeTag { tag: 42 })
        ));
    }

    #[test]
    fn tampered_snapshot_rejected() {
        let kb = constant_kb(Value::Int(7));
        let (meta, mut records) = read_payload(open(&export(&kb).unwrap()).unwrap()).unwrap();
        let constant = records
            .iter_mut()
            .find(|r| r.node_type == NodeType::Constant)
            .unwrap();
        constant.body = NodeBody::Leaf(Value::Int(8));
        assert!(matches!(
            rebuild(meta, records),
            Err(DecodeError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn dangling_child_rejected() {
        let kb = constant_kb(Value::Int(7));
        let (meta, mut records) = read_payload(open(&export(&kb).unwrap()).unwrap()).unwrap();
        let field = records
            .iter_mut()
            .find(|r| r.node_type == NodeType::Field)
            .unwrap();
        field.body = NodeBody::Compound {
            label: "X".into(),
            children: vec![u64::MAX],
        };
        assert!(matches!(
            rebuild(meta, records),
            Err(DecodeError::DanglingReference { id: u64::MAX })
        ));
    }

    #[test]
    fn decode_error_kind() {
        assert_eq!(DecodeError::BadMagic.kind(), ErrorKind::Decode);
    }
}
