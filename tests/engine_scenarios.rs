use std::sync::{Arc, Mutex};

use rulekeeper::{
    call, lit, retract, var, DataContext, Engine, EngineConfig, EngineError, EngineListener,
    ErrorKind, HaltReason, KnowledgeBase, KnowledgeBaseBuilder, MapFact, RuleEntry, Value,
};

fn trace_of(fact: &MapFact) -> String {
    match fact.get("Trace") {
        Some(Value::String(s)) => s.clone(),
        other => panic!("expected string trace, got {other:?}"),
    }
}

fn append(letter: &str) -> rulekeeper::Statement {
    var("Fact")
        .field("Trace")
        .assign(var("Fact").field("Trace").plus(lit(letter)))
}

// ---------------------------------------------------------------------------
// Cashback
// ---------------------------------------------------------------------------

const CASHBACK: &str = r#"
rule CashbackRule "Give cashback on big payments" salience 10 {
    when
        Fact.Payment > 100 && Fact.Cashback == 0
    then
        Fact.Cashback = 10;
}

rule LogCashback "Report the cashback" {
    when
        Fact.Cashback > 5
    then
        Log("cashback granted", Fact.Cashback);
}
"#;

#[test]
fn cashback_terminates_after_two_cycles() {
    let mut kb = KnowledgeBase::from_grl("Cashback", "1.0.0", CASHBACK).unwrap();
    let mut fact = MapFact::new("CashFlow")
        .with("Payment", 500_i64)
        .with("Cashback", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);

    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.cycles(), 2);
    assert_eq!(report.fired(), ["CashbackRule", "LogCashback"]);
    assert_eq!(report.halt(), HaltReason::Exhausted);
    drop(ctx);
    assert_eq!(fact.get("Cashback"), Some(&Value::Int(10)));
}

#[test]
fn cashback_small_payment_fires_nothing() {
    let mut kb = KnowledgeBase::from_grl("Cashback", "1.0.0", CASHBACK).unwrap();
    let mut fact = MapFact::new("CashFlow")
        .with("Payment", 50_i64)
        .with("Cashback", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.cycles(), 0);
    assert!(report.fired().is_empty());
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

fn once(name: &str, salience: i32) -> impl FnOnce(rulekeeper::RuleBuilder) -> rulekeeper::RuleBuilder {
    let flag = format!("Done{name}");
    let letter = name.to_owned();
    move |r| {
        r.salience(salience)
            .when(var("Fact").field(&flag).equals(false))
            .then(var("Fact").field(&flag).assign(true))
            .then(append(&letter))
    }
}

fn once_fact(names: &[&str]) -> MapFact {
    names
        .iter()
        .fold(MapFact::new("Flags").with("Trace", ""), |f, n| {
            f.with(&format!("Done{n}"), false)
        })
}

#[test]
fn higher_salience_fires_first() {
    let mut kb = KnowledgeBaseBuilder::new("Salience", "1")
        .rule("Low", once("Low", 5))
        .rule("High", once("High", 10))
        .build()
        .unwrap();
    let mut fact = once_fact(&["Low", "High"]);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.fired(), ["High", "Low"]);
    drop(ctx);
    assert_eq!(trace_of(&fact), "HighLow");
}

#[test]
fn equal_salience_follows_insertion_order_every_run() {
    let kb = KnowledgeBaseBuilder::new("Ties", "1")
        .rule("C", once("C", 0))
        .rule("A", once("A", 0))
        .rule("B", once("B", 0))
        .build()
        .unwrap();
    for _ in 0..10 {
        let mut instance = kb.new_instance();
        let mut fact = once_fact(&["A", "B", "C"]);
        let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
        let report = Engine::new().execute(&mut instance, &mut ctx).unwrap();
        assert_eq!(report.fired(), ["C", "A", "B"]);
    }
}

#[test]
fn negative_salience_fires_last() {
    let mut kb = KnowledgeBaseBuilder::new("Neg", "1")
        .rule("Late", once("Late", -1))
        .rule("Default", once("Default", 0))
        .build()
        .unwrap();
    let mut fact = once_fact(&["Late", "Default"]);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.fired(), ["Default", "Late"]);
}

// ---------------------------------------------------------------------------
// Cycle limit
// ---------------------------------------------------------------------------

fn runaway() -> KnowledgeBase {
    KnowledgeBaseBuilder::new("Runaway", "1")
        .rule("Forever", |r| {
            r.when(lit(true))
                .then(var("Fact").field("N").add_assign(1_i64))
        })
        .build()
        .unwrap()
}

#[test]
fn default_limit_aborts_at_exactly_5000() {
    let mut kb = runaway();
    let mut fact = MapFact::new("Counter").with("N", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let err = Engine::new().execute(&mut kb, &mut ctx).unwrap_err();
    assert!(matches!(
        err,
        EngineError::CycleLimitExceeded { limit: 5000, cycle: 5000 }
    ));
    assert_eq!(err.kind(), ErrorKind::CycleLimitExceeded);
    assert_eq!(err.cycle(), 5000);
    drop(ctx);
    // effects of the executed cycles stay applied
    assert_eq!(fact.get("N"), Some(&Value::Int(5000)));
}

#[test]
fn rule_set_needing_exactly_the_limit_succeeds() {
    let mut kb = KnowledgeBaseBuilder::new("Bounded", "1")
        .rule("Count", |r| {
            r.when(var("Fact").field("N").lt(10_i64))
                .then(var("Fact").field("N").add_assign(1_i64))
        })
        .build()
        .unwrap();
    let mut fact = MapFact::new("Counter").with("N", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let engine = Engine::with_config(EngineConfig::new().with_max_cycle(10));
    let report = engine.execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.cycles(), 10);
}

// ---------------------------------------------------------------------------
// Retraction and completion
// ---------------------------------------------------------------------------

#[test]
fn retracted_rule_sits_out_exactly_one_cycle() {
    let mut kb = KnowledgeBaseBuilder::new("Retract", "1")
        .rule("R", |r| {
            r.salience(10)
                .when(var("Fact").field("Count").lt(3_i64))
                .then(append("R"))
                .then(retract("R"))
        })
        .rule("S", |r| {
            r.when(var("Fact").field("Count").lt(3_i64))
                .then(append("S"))
                .then(var("Fact").field("Count").add_assign(1_i64))
        })
        .build()
        .unwrap();
    let mut fact = MapFact::new("State").with("Count", 0_i64).with("Trace", "");
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.cycles(), 6);
    drop(ctx);
    assert_eq!(trace_of(&fact), "RSRSRS");
}

#[test]
fn retraction_does_not_leak_into_the_next_run() {
    let mut kb = KnowledgeBaseBuilder::new("Retract", "1")
        .rule("R", |r| {
            r.when(var("Fact").field("Done").equals(false))
                .then(retract("R"))
                .then(var("Fact").field("Done").assign(true))
        })
        .build()
        .unwrap();
    let engine = Engine::new();
    for _ in 0..2 {
        let mut fact = MapFact::new("State").with("Done", false);
        let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
        let report = engine.execute(&mut kb, &mut ctx).unwrap();
        assert_eq!(report.fired(), ["R"]);
    }
}

#[test]
fn complete_halts_after_the_then_block() {
    let mut kb = KnowledgeBase::from_grl(
        "Complete",
        "1",
        r#"
        rule Stop salience 1 {
            when Fact.N < 100
            then
                Fact.N += 1;
                Complete();
                Fact.After = true;
        }
        "#,
    )
    .unwrap();
    let mut fact = MapFact::new("State").with("N", 0_i64).with("After", false);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.halt(), HaltReason::Completed);
    assert_eq!(report.cycles(), 1);
    drop(ctx);
    assert_eq!(fact.get("After"), Some(&Value::Bool(true)));
}

// ---------------------------------------------------------------------------
// Errors abort the run
// ---------------------------------------------------------------------------

#[test]
fn failing_action_keeps_earlier_statements() {
    let mut kb = KnowledgeBaseBuilder::new("Partial", "1")
        .rule("Half", |r| {
            r.when(lit(true))
                .then(var("Fact").field("A").assign(1_i64))
                .then(var("Fact").field("B").assign(lit(1_i64).divided_by(0_i64)))
        })
        .build()
        .unwrap();
    let mut fact = MapFact::new("State").with("A", 0_i64).with("B", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let err = Engine::new().execute(&mut kb, &mut ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Arithmetic);
    assert_eq!(err.rule_name(), Some("Half"));
    assert_eq!(err.cycle(), 1);
    drop(ctx);
    assert_eq!(fact.get("A"), Some(&Value::Int(1)));
}

#[test]
fn non_boolean_condition_is_a_type_mismatch() {
    let mut kb = KnowledgeBaseBuilder::new("Bad", "1")
        .rule("Num", |r| r.when(var("Fact").field("N").plus(1_i64)))
        .build()
        .unwrap();
    let mut fact = MapFact::new("State").with("N", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let err = Engine::new().execute(&mut kb, &mut ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    assert_eq!(err.rule_name(), Some("Num"));
}

#[test]
fn unbound_root_is_unresolved() {
    let mut kb = KnowledgeBase::from_grl("U", "1", "rule R { when Missing.X > 1 then }").unwrap();
    let mut ctx = DataContext::new();
    let err = Engine::new().execute(&mut kb, &mut ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnresolvedReference);
    assert!(err.to_string().contains("Missing"));
}

// ---------------------------------------------------------------------------
// FetchMatchingRules
// ---------------------------------------------------------------------------

#[test]
fn fetch_matching_rules_is_idempotent_and_pure() {
    let kb = KnowledgeBase::from_grl("Cashback", "1.0.0", CASHBACK).unwrap();
    let mut fact = MapFact::new("CashFlow")
        .with("Payment", 500_i64)
        .with("Cashback", 0_i64);
    let engine = Engine::new();
    {
        let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
        let first = engine.fetch_matching_rules(&kb, &mut ctx).unwrap();
        assert_eq!(first, ["CashbackRule"]);
        for _ in 0..3 {
            assert_eq!(engine.fetch_matching_rules(&kb, &mut ctx).unwrap(), first);
        }
    }
    assert!(kb.working_memory().is_empty());
    assert_eq!(fact.get("Cashback"), Some(&Value::Int(0)));
}

#[test]
fn fetch_sees_facts_changed_after_a_run() {
    let mut kb = KnowledgeBase::from_grl("Cashback", "1.0.0", CASHBACK).unwrap();
    let engine = Engine::new();
    let mut fact = MapFact::new("CashFlow")
        .with("Payment", 500_i64)
        .with("Cashback", 0_i64);
    {
        let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
        engine.execute(&mut kb, &mut ctx).unwrap();
    }
    fact.set("Cashback", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    assert_eq!(
        engine.fetch_matching_rules(&kb, &mut ctx).unwrap(),
        ["CashbackRule"]
    );
}

// ---------------------------------------------------------------------------
// Working memory across cycles
// ---------------------------------------------------------------------------

#[test]
fn unchanged_conditions_are_served_from_memory() {
    let mut kb = KnowledgeBaseBuilder::new("Memo", "1")
        .rule("Counter", |r| {
            r.salience(1)
                .when(var("A").field("N").lt(5_i64))
                .then(var("A").field("N").add_assign(1_i64))
        })
        .rule("Static", |r| r.when(var("B").field("Flag").equals(false)))
        .build()
        .unwrap();
    let mut a = MapFact::new("A").with("N", 0_i64);
    let mut b = MapFact::new("B").with("Flag", true);
    let mut ctx = DataContext::new()
        .with_fact("A", &mut a)
        .with_fact("B", &mut b);
    Engine::new().execute(&mut kb, &mut ctx).unwrap();
    let stats = kb.working_memory().stats();
    assert!(stats.hits > 0, "B.Flag == false should be memoized: {stats:?}");
    assert!(stats.invalidations > 0);
}

// ---------------------------------------------------------------------------
// Nested facts
// ---------------------------------------------------------------------------

const LOYALTY: &str = r#"
rule Upgrade salience 10 {
    when
        Fact.Customer.Spent >= 1000 && Fact.Customer.Tier == "silver"
    then
        Fact.Customer.Tier = "gold";
        Fact.Customer.Tags[0] = "vip";
}

rule Discount {
    when
        Fact.Customer.Tier == "gold" && Fact.Discount == 0.0
    then
        Fact.Discount = 0.15;
}
"#;

fn order() -> MapFact {
    MapFact::new("Order")
        .with("Total", 5_i64)
        .with("Discount", 0.0)
        .with_fact(
            "Customer",
            MapFact::new("Customer")
                .with("Spent", 1500_i64)
                .with("Tier", "silver")
                .with("Tags", Value::Array(vec![Value::from("new")])),
        )
}

#[test]
fn nested_fact_fields_are_read_and_assigned() {
    let mut kb = KnowledgeBase::from_grl("Loyalty", "1", LOYALTY).unwrap();
    let mut fact = order();
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.fired(), ["Upgrade", "Discount"]);
    assert_eq!(report.halt(), HaltReason::Exhausted);
    drop(ctx);

    let customer = fact.nested("Customer").unwrap();
    assert_eq!(customer.get("Tier"), Some(&Value::from("gold")));
    assert_eq!(
        customer.get("Tags"),
        Some(&Value::Array(vec![Value::from("vip")]))
    );
    assert_eq!(fact.get("Discount"), Some(&Value::Float(0.15)));
}

#[test]
fn nested_fact_methods_invalidate_the_root() {
    let mut kb = KnowledgeBase::from_grl(
        "Visits",
        "1",
        "rule Visit { when Fact.Customer.Visits < 3 then Fact.Customer.Visit(); }",
    )
    .unwrap();
    let mut fact = MapFact::new("Order").with_fact(
        "Customer",
        MapFact::new("Customer")
            .with("Visits", 0_i64)
            .with_method("Visit", |fields, _| {
                let n = fields.get("Visits").and_then(Value::as_int).unwrap_or(0) + 1;
                fields.set("Visits", n);
                Ok(Value::Int(n))
            }),
    );
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.cycles(), 3);
    drop(ctx);
    assert_eq!(
        fact.nested("Customer").and_then(|c| c.get("Visits")),
        Some(&Value::Int(3))
    );
}

#[test]
fn nested_fact_errors_name_the_missing_link() {
    let cases = [
        (
            "Fact.Customer.Missing > 1",
            ErrorKind::MemberNotFound,
            "'Customer' has no member 'Missing' in `Fact.Customer.Missing`",
        ),
        (
            "Fact.Total.Cents > 1",
            ErrorKind::MemberNotFound,
            "'Integer' has no member 'Cents' in `Fact.Total.Cents`",
        ),
        (
            "Fact.Customer == 1",
            ErrorKind::TypeMismatch,
            "fact 'Customer' cannot be used as a value in `Fact.Customer`",
        ),
    ];
    for (condition, kind, message) in cases {
        let grl = format!("rule R {{ when {condition} then }}");
        let mut kb = KnowledgeBase::from_grl("Errors", "1", &grl).unwrap();
        let mut fact = order();
        let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
        let err = Engine::new().execute(&mut kb, &mut ctx).unwrap_err();
        assert_eq!(err.kind(), kind, "{condition}");
        assert!(err.to_string().ends_with(message), "{condition}: {err}");
    }
}

#[test]
fn assigning_a_missing_nested_field_fails() {
    let mut kb = KnowledgeBase::from_grl(
        "Assign",
        "1",
        r#"rule R { when true then Fact.Customer.Nickname = "x"; }"#,
    )
    .unwrap();
    let mut fact = order();
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let err = Engine::new().execute(&mut kb, &mut ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MemberNotFound);
    assert_eq!(err.cycle(), 1);
}

// ---------------------------------------------------------------------------
// Listeners and functions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Fired(Mutex<Vec<(u64, String)>>);

impl EngineListener for Fired {
    fn execute_rule_entry(&self, cycle: u64, rule: &RuleEntry) {
        self.0.lock().unwrap().push((cycle, rule.name().to_owned()));
    }
}

#[test]
fn listener_sees_every_execution() {
    let listener = Arc::new(Fired::default());
    let engine = Engine::new().with_listener(listener.clone());
    let mut kb = KnowledgeBase::from_grl("Cashback", "1.0.0", CASHBACK).unwrap();
    let mut fact = MapFact::new("CashFlow")
        .with("Payment", 500_i64)
        .with("Cashback", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    engine.execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(
        *listener.0.lock().unwrap(),
        vec![(1, "CashbackRule".to_owned()), (2, "LogCashback".to_owned())]
    );
}

#[test]
fn fact_methods_and_value_bindings() {
    let mut kb = KnowledgeBaseBuilder::new("Methods", "1")
        .rule("Greet", |r| {
            r.when(
                var("Fact")
                    .field("Name")
                    .method("HasPrefix", vec![lit("A")])
                    .and(var("Fact").field("Greeted").equals(false)),
            )
            .then(var("Fact").method("Greet", vec![var("Greeting")]).invoke())
        })
        .build()
        .unwrap();
    let mut fact = MapFact::new("Person")
        .with("Name", "Ada")
        .with("Greeted", false)
        .with_method("Greet", |fields, args| {
            let name = fields.get("Name").cloned().unwrap_or_default();
            fields.set("Greeted", true);
            fields.set("Message", format!("{} {}", args[0].to_text(), name.to_text()));
            Ok(Value::Nil)
        });
    let mut ctx = DataContext::new()
        .with_fact("Fact", &mut fact)
        .with_value("Greeting", "Hello");
    let report = Engine::new().execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.fired(), ["Greet"]);
    drop(ctx);
    assert_eq!(fact.get("Message"), Some(&Value::String("Hello Ada".into())));
}

#[test]
fn registered_function_is_callable() {
    let mut engine = Engine::new();
    engine.functions_mut().register("Double", |args: &[Value]| {
        Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
    });
    let mut kb = KnowledgeBaseBuilder::new("Fn", "1")
        .rule("D", |r| {
            r.when(var("Fact").field("N").lt(10_i64))
                .then(
                    var("Fact")
                        .field("N")
                        .assign(call("Double", vec![var("Fact").field("N")])),
                )
        })
        .build()
        .unwrap();
    let mut fact = MapFact::new("State").with("N", 1_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
    let report = engine.execute(&mut kb, &mut ctx).unwrap();
    assert_eq!(report.cycles(), 4);
    drop(ctx);
    assert_eq!(fact.get("N"), Some(&Value::Int(16)));
}
