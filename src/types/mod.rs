mod ast;
pub(crate) mod context;
mod error;
mod expr;
mod fact;
pub(crate) mod function;
mod knowledge;
mod memory;
mod report;
mod rule;
pub(crate) mod value;

pub use ast::{AstGraph, AstNode, NodeId, NodeKind, NodeRef, NodeType};
pub use context::DataContext;
pub use error::{BuildError, ErrorKind, EvalError};
pub use expr::{call, complete, lit, retract, var, AssignOp, BinaryOp, Expr, Statement, UnaryOp};
pub use fact::{FactAccessor, FactError, Fields, MapFact, Member};
pub use function::{CallError, FunctionRegistry, NativeFn};
pub use knowledge::{
    KnowledgeBase, KnowledgeBaseBuilder, KnowledgeLibrary, NotFoundError, RuleBuilder,
};
pub use memory::{MemoryStats, WorkingMemory};
pub use report::{ExecutionReport, HaltReason};
pub use rule::{Rule, RuleEntry};
pub use value::{Value, ValueType};
