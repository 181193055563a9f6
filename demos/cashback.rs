use rulekeeper::{var, DataContext, Engine, KnowledgeBaseBuilder, MapFact};

fn main() {
    let mut kb = KnowledgeBaseBuilder::new("Cashback", "1.0.0")
        .rule("CashbackRule", |r| {
            r.description("Give cashback on big payments")
                .salience(10)
                .when(
                    var("Fact")
                        .field("Payment")
                        .gt(100_i64)
                        .and(var("Fact").field("Cashback").equals(0_i64)),
                )
                .then(var("Fact").field("Cashback").assign(10_i64))
        })
        .build()
        .expect("failed to build knowledge base");

    println!("{kb}");

    let mut fact = MapFact::new("CashFlow")
        .with("Payment", 500_i64)
        .with("Cashback", 0_i64);
    let mut ctx = DataContext::new().with_fact("Fact", &mut fact);

    match Engine::new().execute(&mut kb, &mut ctx) {
        Ok(report) => println!("{report}"),
        Err(e) => println!("Run failed: {e}"),
    }
    drop(ctx);
    println!("Cashback: {:?}", fact.get("Cashback"));
}
