use volition_runtime::prelude::*;
use volition_runtime::service::ActionStatus;
use volition_runtime::{ExecState, RuntimeError};

fn counter_fixture(engine: &mut Engine) {
    let _ = tracing_subscriber::fmt().try_init();
    engine
        .commit_message_schema(Schema::new("tally").field("count", ValueKind::I64))
        .unwrap();
    engine.commit_goal(GoalBuilder::new("G").build()).unwrap();
    engine.commit_action(ActionDef::new("bump")).unwrap();
    engine
        .commit_plan(
            PlanBuilder::new("P")
                .handles("G")
                .body(CoroutineBuilder::new().action("bump"))
                .build(),
        )
        .unwrap();
    engine
        .commit_agent_template(
            AgentBuilder::new("worker")
                .beliefsets(["tally"])
                .plans(["P"])
                .handle_action("bump", |beliefs, _| {
                    let count = beliefs
                        .get("tally", "count")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0);
                    beliefs.set_field("tally", "count", count + 1).unwrap();
                    ActionStatus::Success
                })
                .build(),
        )
        .unwrap();
}

/// Identifier round trip: from_hex(to_hex(u)) == u for valid ids.
#[test]
fn unique_id_round_trips() {
    UniqueId::seed(99);
    for _ in 0..100 {
        let id = UniqueId::random();
        assert!(id.valid());
        assert_eq!(UniqueId::from_hex(&id.to_hex()).unwrap(), id);
    }
}

/// Committing the same template twice fails without disturbing the registry.
#[test]
fn duplicate_commits_leave_registry_intact() {
    let mut engine = Engine::new();
    engine
        .commit_message_schema(Schema::new("m").field("x", ValueKind::Bool))
        .unwrap();
    assert!(matches!(
        engine.commit_message_schema(Schema::new("m")),
        Err(RuntimeError::DuplicateTemplate(_))
    ));
    engine.commit_goal(GoalBuilder::new("G").build()).unwrap();
    assert!(matches!(
        engine.commit_goal(GoalBuilder::new("G").priority(9).build()),
        Err(RuntimeError::DuplicateTemplate(_))
    ));
    assert_eq!(engine.registry().goal("G").unwrap().priority, 0);
}

/// Creating, destroying and re-creating an agent under the same name yields
/// an agent that behaves like a fresh one.
#[test]
fn recreated_agent_behaves_like_fresh() {
    let mut engine = Engine::new();
    engine.set_exit_when_done(true);
    counter_fixture(&mut engine);

    let a = engine.create_agent("worker", "a").unwrap();
    engine.start_agent(&a).unwrap();
    let first = engine.pursue(&a, "G", None).unwrap();
    engine.poll(1_000);
    assert!(first.succeeded());

    engine.destroy_agent(&a).unwrap();
    assert!(engine.agent(&a).is_none());

    let a2 = engine.create_agent("worker", "a").unwrap();
    engine.start_agent(&a2).unwrap();
    let second = engine.pursue(&a2, "G", None).unwrap();
    engine.poll(1_000);
    assert!(second.succeeded());
    assert_eq!(
        engine
            .agent(&a2)
            .unwrap()
            .context()
            .get("tally", "count")
            .and_then(|v| v.as_i64()),
        Some(1),
    );
}

/// Events targeting a destroyed agent fail their promise with no_recipient.
#[test]
fn events_to_destroyed_agent_fail_with_no_recipient() {
    let mut engine = Engine::new();
    engine.set_exit_when_done(true);
    counter_fixture(&mut engine);

    let a = engine.create_agent("worker", "a").unwrap();
    engine.start_agent(&a).unwrap();
    let promise = engine.pursue(&a, "G", None).unwrap();
    engine.destroy_agent(&a).unwrap();
    engine.poll(100);

    assert!(promise.failed());
    assert_eq!(promise.reason().as_deref(), Some("no_recipient"));
}

/// A persistent goal re-enters plan selection after every success; dropping
/// it is the only way to end it.
#[test]
fn persistent_goal_reenters_selection() {
    let mut engine = Engine::new();
    counter_fixture(&mut engine);

    let a = engine.create_agent("worker", "a").unwrap();
    engine.start_agent(&a).unwrap();

    let promise = engine.pursue_persistent(&a, "G", None).unwrap();
    engine.poll(50);

    let runs = engine
        .agent(&a)
        .unwrap()
        .context()
        .get("tally", "count")
        .and_then(|v| v.as_i64())
        .unwrap();
    assert!(runs >= 2, "persistent goal ran {runs} time(s)");
    assert!(!promise.settled());

    let _ = engine.drop_goal(&a, "G", DropMode::Force);
    engine.set_exit_when_done(true);
    engine.poll(100);
    assert!(promise.failed());
    assert_eq!(engine.agent(&a).unwrap().intention_count(), 0);
}

/// A non-persistent goal terminates on first success.
#[test]
fn non_persistent_goal_terminates() {
    let mut engine = Engine::new();
    engine.set_exit_when_done(true);
    counter_fixture(&mut engine);

    let a = engine.create_agent("worker", "a").unwrap();
    engine.start_agent(&a).unwrap();
    let promise = engine.pursue(&a, "G", None).unwrap();
    engine.poll(1_000);

    assert!(promise.succeeded());
    assert_eq!(
        engine
            .agent(&a)
            .unwrap()
            .context()
            .get("tally", "count")
            .and_then(|v| v.as_i64()),
        Some(1),
    );
}

/// A goal whose plans all fail exhausts its tactic loop and fails.
#[test]
fn exhausted_plans_fail_the_goal() {
    let mut engine = Engine::new();
    engine.set_exit_when_done(true);
    engine.commit_goal(GoalBuilder::new("G").build()).unwrap();
    engine
        .commit_plan(
            PlanBuilder::new("P")
                .handles("G")
                .body(CoroutineBuilder::new().cond_fn(|_| false))
                .build(),
        )
        .unwrap();
    engine
        .commit_agent_template(AgentBuilder::new("worker").plans(["P"]).build())
        .unwrap();

    let a = engine.create_agent("worker", "a").unwrap();
    engine.start_agent(&a).unwrap();
    let promise = engine.pursue(&a, "G", None).unwrap();
    engine.poll(1_000);

    assert!(promise.failed());
    assert!(promise.reason().unwrap().contains("exhausted"));
    assert_eq!(engine.agent(&a).unwrap().intention_count(), 0);
}

mod auctions {
    use super::*;

    fn fixture(engine: &mut Engine, timeout_ms: u64) {
        engine
            .commit_message_schema(Schema::new("cfg").field("stall", ValueKind::Bool))
            .unwrap();
        engine
            .commit_goal(GoalBuilder::new("G").build())
            .unwrap();
        engine.commit_action(ActionDef::new("work")).unwrap();
        engine
            .commit_plan(
                PlanBuilder::new("PM")
                    .handles("G")
                    .body(CoroutineBuilder::new().action("work"))
                    .build(),
            )
            .unwrap();
        engine.commit_role(Role::new("Worker").goal("G")).unwrap();
        engine
            .commit_agent_template(
                AgentBuilder::new("member")
                    .beliefsets(["cfg"])
                    .plans(["PM"])
                    .roles(["Worker"])
                    // A stalled member never completes the work: the action
                    // stays pending forever.
                    .handle_action("work", |beliefs, _| {
                        if beliefs.get("cfg", "stall").and_then(|v| v.as_bool()) == Some(true) {
                            ActionStatus::Pending
                        } else {
                            ActionStatus::Success
                        }
                    })
                    .build(),
            )
            .unwrap();
        engine
            .commit_agent_template(
                AgentBuilder::new("squad")
                    .team()
                    .auction_timeout_ms(timeout_ms)
                    .build(),
            )
            .unwrap();
    }

    /// A member that never answers does not wedge the auction: the timeout
    /// treats the missing bid as a refusal and the bids in hand decide.
    #[test]
    fn auction_converges_despite_a_silent_member() {
        let mut engine = Engine::new();
        fixture(&mut engine, 100);

        let team = engine.create_agent("squad", "T").unwrap();
        let m1 = engine.create_agent("member", "m1").unwrap();
        let m2 = engine.create_agent("member", "m2").unwrap();
        engine.start_agent(&team).unwrap();
        engine.start_agent(&m1).unwrap();
        // m2 stays stopped and never bids.
        engine.add_team_member(&team, &m1, "Worker").unwrap();
        engine.add_team_member(&team, &m2, "Worker").unwrap();

        let promise = engine.pursue(&team, "G", None).unwrap();
        engine.poll(50);
        assert!(!promise.settled());

        // Pass the deadline; the auction resolves with the only bid.
        engine.set_exit_when_done(true);
        engine.poll(200);
        assert!(promise.succeeded());
    }

    /// With no member advertising the goal the pursue fails as no_delegate.
    #[test]
    fn auction_with_no_candidates_fails() {
        let mut engine = Engine::new();
        engine.set_exit_when_done(true);
        fixture(&mut engine, 100);
        engine
            .commit_goal(GoalBuilder::new("Unadvertised").build())
            .unwrap();
        engine
            .commit_plan(
                PlanBuilder::new("PU")
                    .handles("Unadvertised")
                    .body(CoroutineBuilder::new().print("x"))
                    .build(),
            )
            .unwrap();

        let team = engine.create_agent("squad", "T").unwrap();
        let m1 = engine.create_agent("member", "m1").unwrap();
        engine.start_agent(&team).unwrap();
        engine.start_agent(&m1).unwrap();
        engine.add_team_member(&team, &m1, "Worker").unwrap();

        // The team owns no plan for it and no role advertises it, and the
        // team cannot execute it locally either.
        let promise = engine.pursue(&team, "Unadvertised", None).unwrap();
        engine.poll(500);
        assert!(promise.failed());
    }

    /// Removing the selected member re-auctions the delegation among the
    /// remaining bidders.
    #[test]
    fn removing_the_winner_reauctions() {
        let mut engine = Engine::new();
        fixture(&mut engine, 10_000);

        let team = engine.create_agent("squad", "T").unwrap();
        let m1 = engine.create_agent("member", "m1").unwrap();
        let m2 = engine.create_agent("member", "m2").unwrap();
        engine.start_agent(&team).unwrap();
        engine.start_agent(&m1).unwrap();
        engine.start_agent(&m2).unwrap();
        engine.add_team_member(&team, &m1, "Worker").unwrap();
        engine.add_team_member(&team, &m2, "Worker").unwrap();

        // Both members stall, so the first delegation stays in flight.
        engine.set_belief(&m1, "cfg", "stall", Value::Bool(true));
        engine.set_belief(&m2, "cfg", "stall", Value::Bool(true));
        engine.poll(10);

        let promise = engine.pursue(&team, "G", None).unwrap();
        engine.poll(50);
        assert!(!promise.settled());

        let winner = engine
            .agent(&team)
            .unwrap()
            .intentions()
            .iter()
            .find_map(|i| match i.state() {
                ExecState::Delegated { winner } => Some(winner.clone()),
                _ => None,
            })
            .expect("a delegation winner was selected");
        let survivor = if winner.id == m1.id { m2.clone() } else { m1.clone() };

        // Drop the winner from the team and unstall the survivor; the
        // delegation restarts and completes on the survivor.
        engine.remove_team_member(&team, &winner).unwrap();
        engine.set_belief(&survivor, "cfg", "stall", Value::Bool(false));
        engine.poll(1_000);

        assert!(promise.succeeded());
        let members = engine.agent(&team).unwrap().team_members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].handle.id, survivor.id);
    }
}
