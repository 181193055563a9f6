//! A forward-chaining rule engine.
//!
//! Rules are written in a small rule language or built in code, lowered
//! into a shared node graph, and fired cycle by cycle against caller facts.
//! Node values are memoized in a per-instance working memory and only the
//! expressions that read a changed fact are evaluated again.
//!
//! ```
//! use rulekeeper::{DataContext, Engine, KnowledgeBase, MapFact, Value};
//!
//! let mut kb = KnowledgeBase::from_grl(
//!     "Tutorial",
//!     "0.1.0",
//!     r#"
//!     rule CashbackRule "Give cashback on big payments" salience 10 {
//!         when
//!             Fact.Payment > 100 && Fact.Cashback == 0
//!         then
//!             Fact.Cashback = 10;
//!     }
//!     "#,
//! )?;
//!
//! let mut fact = MapFact::new("Payment")
//!     .with("Payment", 120_i64)
//!     .with("Cashback", 0_i64);
//! let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
//! let report = Engine::new().execute(&mut kb, &mut ctx)?;
//!
//! assert_eq!(report.fired(), ["CashbackRule"]);
//! drop(ctx);
//! assert_eq!(fact.get("Cashback"), Some(&Value::Int(10)));
//! # Ok::<(), rulekeeper::RulekeeperError>(())
//! ```

#[cfg(feature = "catalog")]
pub mod catalog;
mod compile;
mod engine;
mod error;
mod evaluate;
pub mod parse;
mod types;

pub use engine::{Engine, EngineConfig, EngineError, EngineListener, DEFAULT_MAX_CYCLE};
pub use error::RulekeeperError;
pub use types::{
    call, complete, lit, retract, var, AssignOp, AstGraph, AstNode, BinaryOp, BuildError,
    CallError, DataContext, ErrorKind, EvalError, ExecutionReport, Expr, FactAccessor, FactError,
    Fields, FunctionRegistry, HaltReason, KnowledgeBase, KnowledgeBaseBuilder, KnowledgeLibrary,
    Member, MapFact, MemoryStats, NativeFn, NodeId, NodeKind, NodeRef, NodeType, NotFoundError,
    Rule, RuleBuilder, RuleEntry, Statement, UnaryOp, Value, ValueType, WorkingMemory,
};
