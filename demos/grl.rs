use rulekeeper::{DataContext, Engine, KnowledgeBase, MapFact};

fn main() {
    let mut kb = KnowledgeBase::from_grl("Pricing", "1", include_str!("rules.grl"))
        .expect("failed to load rules");

    println!("{kb}");

    let mut order = MapFact::new("Order")
        .with("Member", true)
        .with("Total", 240_i64)
        .with("Items", 12_i64)
        .with("Discount", 0_i64)
        .with("BulkApplied", false)
        .with("Payable", 0_i64)
        .with("Final", false);
    let mut ctx = DataContext::new().with_fact("Order", &mut order);

    let engine = Engine::new();
    match engine.fetch_matching_rules(&kb, &mut ctx) {
        Ok(names) => println!("Matching before the run: {names:?}"),
        Err(e) => println!("Fetch failed: {e}"),
    }
    match engine.execute(&mut kb, &mut ctx) {
        Ok(report) => println!("{report}"),
        Err(e) => println!("Run failed: {e}"),
    }
    drop(ctx);
    println!("Payable: {:?}", order.get("Payable"));
}
