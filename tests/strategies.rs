#![allow(dead_code)]

use std::fmt::Write as _;

use proptest::prelude::*;
use rulekeeper::{
    lit, var, DataContext, Engine, EngineConfig, Expr, KnowledgeBase, KnowledgeBaseBuilder,
    MapFact, Statement, Value,
};

// --- Fixed fact schema, bound as `User` ---
// User.Age     : i64 (0..=120)
// User.Status  : string, one of {"active", "inactive", "suspended"}
// User.Banned  : bool
// User.Score   : i64 (-50..=50)
// User.Visits  : i64, starts at 0

const STATUSES: &[&str] = &["active", "inactive", "suspended"];
const FIELDS_WRITTEN: &[&str] = &["Score", "Visits", "Status", "Banned"];

/// Cycle budget for generated knowledge bases. Small so runaway rule sets
/// fail fast.
pub const MAX_CYCLE: u64 = 40;

/// Values for one `User` fact.
#[derive(Debug, Clone)]
pub struct GenFact {
    pub age: i64,
    pub status: &'static str,
    pub banned: bool,
    pub score: i64,
}

impl GenFact {
    pub fn to_fact(&self) -> MapFact {
        MapFact::new("User")
            .with("Age", self.age)
            .with("Status", self.status)
            .with("Banned", self.banned)
            .with("Score", self.score)
            .with("Visits", 0_i64)
    }
}

pub fn arb_fact() -> impl Strategy<Value = GenFact> {
    (
        0_i64..=120,
        prop::sample::select(STATUSES),
        any::<bool>(),
        -50_i64..=50,
    )
        .prop_map(|(age, status, banned, score)| GenFact {
            age,
            status,
            banned,
            score,
        })
}

fn user(field: &str) -> Expr {
    var("User").field(field)
}

/// A leaf comparison on a random field from the schema.
fn arb_leaf_expr() -> impl Strategy<Value = Expr> {
    prop_oneof![
        (0_i64..=120, 0u8..6).prop_map(|(val, op)| {
            let f = user("Age");
            match op {
                0 => f.equals(val),
                1 => f.not_equals(val),
                2 => f.gt(val),
                3 => f.gte(val),
                4 => f.lt(val),
                _ => f.lte(val),
            }
        }),
        (-60_i64..=60, any::<bool>()).prop_map(|(val, gt)| {
            if gt {
                user("Score").gt(val)
            } else {
                user("Score").lte(val)
            }
        }),
        (prop::sample::select(STATUSES), any::<bool>()).prop_map(|(val, is_eq)| {
            if is_eq {
                user("Status").equals(val)
            } else {
                user("Status").not_equals(val)
            }
        }),
        any::<bool>().prop_map(|val| user("Banned").equals(val)),
        (0_i64..4).prop_map(|val| user("Visits").lt(val)),
    ]
}

/// A condition tree of leaves joined by `&&`, `||` and `!`, bounded depth.
pub fn arb_condition(max_depth: u32) -> impl Strategy<Value = Expr> {
    arb_leaf_expr().prop_recursive(max_depth, 16, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.and(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.or(b)),
            inner.prop_map(|e| !e),
        ]
    })
}

fn arb_statement() -> impl Strategy<Value = Statement> {
    prop_oneof![
        (-3_i64..=3).prop_map(|d| user("Score").add_assign(d)),
        Just(user("Visits").add_assign(1_i64)),
        prop::sample::select(STATUSES).prop_map(|s| user("Status").assign(s)),
        any::<bool>().prop_map(|b| user("Banned").assign(b)),
        Just(user("Score").assign(user("Score").times(2_i64).modulo(97_i64))),
        Just(Statement::Call(rulekeeper::call("Log", vec![lit("fired"), user("Score")]))),
    ]
}

/// A generated rule.
#[derive(Debug, Clone)]
pub struct GenRule {
    pub name: String,
    pub salience: i32,
    pub condition: Expr,
    pub actions: Vec<Statement>,
}

/// A generated knowledge base: rules named `r0`, `r1`, ...
#[derive(Debug, Clone)]
pub struct GenKnowledgeBase {
    pub rules: Vec<GenRule>,
}

impl GenKnowledgeBase {
    pub fn build(&self) -> KnowledgeBase {
        let mut builder = KnowledgeBaseBuilder::new("Generated", "1");
        for rule in &self.rules {
            let rule = rule.clone();
            builder = builder.rule(&rule.name, move |mut r| {
                r = r.salience(rule.salience).when(rule.condition);
                for action in rule.actions {
                    r = r.then(action);
                }
                r
            });
        }
        builder.build().unwrap()
    }

    /// The same rules as rule-language text.
    pub fn to_grl(&self) -> String {
        let mut out = String::new();
        for rule in &self.rules {
            let _ = writeln!(out, "rule {} salience {} {{", rule.name, rule.salience);
            let _ = writeln!(out, "    when {}", rule.condition);
            let _ = writeln!(out, "    then");
            for action in &rule.actions {
                let _ = writeln!(out, "        {action};");
            }
            let _ = writeln!(out, "}}");
        }
        out
    }
}

pub fn arb_knowledge_base() -> impl Strategy<Value = GenKnowledgeBase> {
    prop::collection::vec(
        (
            -5_i32..=5,
            arb_condition(3),
            prop::collection::vec(arb_statement(), 0..3),
        ),
        1..=6,
    )
    .prop_map(|rules| GenKnowledgeBase {
        rules: rules
            .into_iter()
            .enumerate()
            .map(|(i, (salience, condition, actions))| GenRule {
                name: format!("r{i}"),
                salience,
                condition,
                actions,
            })
            .collect(),
    })
}

/// Everything observable about one run: the fired rules (or the error text)
/// and the written fields afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub result: Result<Vec<String>, String>,
    pub fields: Vec<Option<Value>>,
}

pub fn engine() -> Engine {
    Engine::with_config(EngineConfig::new().with_max_cycle(MAX_CYCLE))
}

/// Same budget, but every node is evaluated afresh.
pub fn memo_free_engine() -> Engine {
    Engine::with_config(
        EngineConfig::new()
            .with_max_cycle(MAX_CYCLE)
            .with_memoization(false),
    )
}

pub fn run(kb: &mut KnowledgeBase, fact: &GenFact) -> Outcome {
    run_with(&engine(), kb, fact)
}

pub fn run_with(engine: &Engine, kb: &mut KnowledgeBase, fact: &GenFact) -> Outcome {
    let mut user = fact.to_fact();
    let result = {
        let mut ctx = DataContext::new().with_fact("User", &mut user);
        engine
            .execute(kb, &mut ctx)
            .map(|report| report.fired().to_vec())
            .map_err(|e| e.to_string())
    };
    Outcome {
        result,
        fields: FIELDS_WRITTEN
            .iter()
            .map(|f| user.get(f).cloned())
            .collect(),
    }
}
