use rulekeeper::{DataContext, Engine, KnowledgeBase, MapFact};

fn main() {
    // Higher salience wins the conflict; the loser still fires in a later
    // cycle because its condition keeps holding.
    let mut kb = KnowledgeBase::from_grl(
        "Review",
        "1",
        r#"
        rule Deny "banned users are rejected" salience 100 {
            when User.Banned && User.Verdict == ""
            then User.Verdict = "deny";
        }

        rule Allow salience 10 {
            when User.Age >= 18 && User.Verdict == ""
            then User.Verdict = "allow";
        }

        rule Audit salience -1 {
            when User.Verdict != "" && !User.Audited
            then
                User.Audited = true;
                Log("verdict", User.Verdict);
        }
        "#,
    )
    .expect("failed to parse rules");

    println!("Agenda: {:?}", kb.evaluation_order());

    for banned in [true, false] {
        let mut user = MapFact::new("User")
            .with("Age", 30_i64)
            .with("Banned", banned)
            .with("Verdict", "")
            .with("Audited", false);
        let fired = {
            let mut ctx = DataContext::new().with_fact("User", &mut user);
            Engine::new()
                .execute(&mut kb, &mut ctx)
                .expect("run failed")
                .fired()
                .to_vec()
        };
        println!(
            "banned={banned}: fired {fired:?}, verdict {:?}",
            user.get("Verdict")
        );
    }
}
