//! Escalation containment across nested loops.

use std::sync::Arc;

use stagewise::agents::{Agent, LoopRunner};
use stagewise::session::Session;
use stagewise::test_support::{ScriptedAgent, Step, collect};

#[tokio::test]
async fn escalation_stops_the_loop_without_leaking() {
    let approver = Arc::new(
        ScriptedAgent::new(
            "review_agent",
            vec![Step::Escalate("approved".into()), Step::message("never sent")],
        )
        .repeating(),
    );
    let follower = Arc::new(ScriptedAgent::new("coding_agent", vec![Step::message("more")]).repeating());
    let runner = LoopRunner::new(
        "implementation_loop",
        vec![approver.clone() as Arc<dyn Agent>, follower.clone() as Arc<dyn Agent>],
    )
    .with_max_iterations(10);

    let mut session = Session::new("escalation");
    let events = collect(runner.run(&mut session)).await.expect("events");

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].text(), Some("approved"));
    assert!(events.iter().all(|e| !e.is_escalation()));
    assert_eq!(approver.calls(), 1);
    assert_eq!(follower.calls(), 0);
    // The producer recorded the original, flagged event.
    assert!(session.events().as_slice()[0].is_escalation());
}

#[tokio::test]
async fn suppressed_escalation_keeps_the_outer_loop_running() {
    let approver = Arc::new(ScriptedAgent::new("review_agent", vec![Step::Escalate("ok".into())]).repeating());
    let inner = Arc::new(
        LoopRunner::new("implementation_loop", vec![approver.clone() as Arc<dyn Agent>])
            .with_max_iterations(10),
    );
    let tail = Arc::new(ScriptedAgent::new("criteria_checker", vec![Step::message("checked")]).repeating());
    let outer = LoopRunner::new("outer", vec![inner as Arc<dyn Agent>, tail.clone() as Arc<dyn Agent>])
        .with_max_iterations(3);

    let mut session = Session::new("nested");
    let events = collect(outer.run(&mut session)).await.expect("events");

    assert_eq!(events.len(), 6);
    assert_eq!(approver.calls(), 3);
    assert_eq!(tail.calls(), 3);
}

#[tokio::test]
async fn propagated_escalation_stops_the_outer_loop_too() {
    let approver = Arc::new(ScriptedAgent::new("plan_reviewer", vec![Step::Escalate("ok".into())]).repeating());
    let inner = Arc::new(
        LoopRunner::new("planning_loop", vec![approver as Arc<dyn Agent>])
            .with_max_iterations(10)
            .propagating(),
    );
    let tail = Arc::new(ScriptedAgent::new("plan_parser", vec![Step::message("parsed")]).repeating());
    let outer = LoopRunner::new("outer", vec![inner as Arc<dyn Agent>, tail.clone() as Arc<dyn Agent>])
        .with_max_iterations(3);

    let mut session = Session::new("propagate");
    let events = collect(outer.run(&mut session)).await.expect("events");

    // The outer loop stops as well, and being suppressing itself, clears the flag.
    assert_eq!(events.len(), 1);
    assert!(!events[0].is_escalation());
    assert_eq!(tail.calls(), 0);
}
