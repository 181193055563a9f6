use std::sync::Arc;
use std::thread;

use rulekeeper::{DataContext, Engine, KnowledgeLibrary, MapFact};

fn main() {
    let library = Arc::new(KnowledgeLibrary::new());
    library
        .load_grl(
            "Cashback",
            "1.0.0",
            r#"
            rule CashbackRule salience 10 {
                when Fact.Payment > 100 && Fact.Cashback == 0
                then Fact.Cashback = Fact.Payment / 20;
            }
            "#,
        )
        .expect("failed to load rules");
    let engine = Arc::new(Engine::new());

    let handles: Vec<_> = (0..4_i64)
        .map(|i| {
            let library = Arc::clone(&library);
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                // each thread runs its own instance; the template is shared
                let mut kb = library
                    .new_instance("Cashback", "1.0.0")
                    .expect("knowledge base not found");
                let mut fact = MapFact::new("CashFlow")
                    .with("Payment", 50 + i * 100)
                    .with("Cashback", 0_i64);
                let mut ctx = DataContext::new().with_fact("Fact", &mut fact);
                let report = engine.execute(&mut kb, &mut ctx);
                drop(ctx);
                println!("Thread {i}: {report:?} -> {:?}", fact.get("Cashback"));
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
