use std::sync::Arc;
use std::time::Duration;

use actionlib_z::Builder;
use actionlib_z::action::{
    ActionGoal, ActionNodeExt, ActionResult, ClientGoalHandle, CommState, GoalStatus,
    ZSimpleActionServer,
};
use actionlib_z::error::ActionError;
use actionlib_z::names;
use actionlib_z::node::NodeHandle;
use actionlib_z::pubsub::{ZPub, ZSub};
use actionlib_z::time::Time;
use parking_lot::Mutex;

use super::common::*;

const SUPERSEDED: &str =
    "This goal was canceled because another goal was received by the simple action server";
const AUTO_ABORTED: &str = concat!(
    "This goal was aborted by the simple action server. ",
    "The user should have set a terminal status on this goal and did not"
);

/// A goal-callback mode server that records every callback it receives.
fn recording_server(
    node: &NodeHandle,
) -> (ZSimpleActionServer<Count>, Arc<Mutex<Vec<&'static str>>>) {
    let server = node
        .create_simple_action_server::<Count>(ACTION)
        .with_server_config(fast_server_config())
        .build()
        .unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    server
        .register_goal_callback(move |_| sink.lock().push("goal"))
        .unwrap();
    let sink = events.clone();
    server.register_preempt_callback(move |_| sink.lock().push("preempt"));
    server.start().unwrap();
    (server, events)
}

fn wait_done(handle: &ClientGoalHandle<Count>) {
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Done));
}

#[test]
fn test_new_goal_preempts_current() {
    let (_bus, server_node, client_node) = setup();
    let (server, events) = recording_server(&server_node);
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    let a = client.send_goal(CountGoal { target: 1 }).unwrap();
    assert!(wait_until(TIMEOUT, || events.lock().len() == 1));
    assert_eq!(server.accept_new_goal().unwrap(), CountGoal { target: 1 });
    assert!(server.is_active());
    assert!(!server.is_new_goal_available());

    let b = client.send_goal(CountGoal { target: 2 }).unwrap();
    assert!(wait_until(TIMEOUT, || events.lock().len() == 3));
    assert_eq!(*events.lock(), vec!["goal", "preempt", "goal"]);
    assert!(server.is_preempt_requested());
    assert!(server.is_new_goal_available());

    assert_eq!(server.accept_new_goal().unwrap(), CountGoal { target: 2 });
    assert!(!server.is_preempt_requested());
    wait_done(&a);
    assert_eq!(a.terminal_state().unwrap(), GoalStatus::PREEMPTED);
    assert_eq!(a.goal_status_text().unwrap(), SUPERSEDED);

    server
        .set_succeeded(Some(CountResult { total: 2 }), "done")
        .unwrap();
    wait_done(&b);
    assert_eq!(b.terminal_state().unwrap(), GoalStatus::SUCCEEDED);
    assert_eq!(b.result().unwrap(), CountResult { total: 2 });
    assert!(!server.is_active());
}

#[test]
fn test_older_and_pending_goals_superseded() {
    let (_bus, server_node, client_node) = setup();
    let (server, events) = recording_server(&server_node);
    let topic = |suffix| names::action_topic(ACTION, suffix).unwrap();
    let goal_pub: ZPub<ActionGoal<CountGoal>> =
        ZPub::new(client_node.as_ref(), &topic(names::GOAL)).unwrap();
    let result_sub: ZSub<ActionResult<CountResult>> =
        ZSub::with_queue(client_node.as_ref(), &topic(names::RESULT)).unwrap();

    let t1 = Time::now();
    let t2 = t1 + Duration::from_millis(10);
    let t3 = t1 + Duration::from_millis(20);
    goal_pub.publish(&raw_goal("middle", t2, 2)).unwrap();
    assert!(wait_until(TIMEOUT, || events.lock().len() == 1));

    // stamped before the pending goal, refused outright
    goal_pub.publish(&raw_goal("old", t1, 1)).unwrap();
    let (result, _) = result_sub.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(result.status.goal_id.id, "old");
    assert_eq!(result.status.status, GoalStatus::RECALLED);
    assert_eq!(result.status.text, SUPERSEDED);
    assert_eq!(events.lock().len(), 1);

    // newer, replaces the goal that was never accepted
    goal_pub.publish(&raw_goal("new", t3, 3)).unwrap();
    let (result, _) = result_sub.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(result.status.goal_id.id, "middle");
    assert_eq!(result.status.status, GoalStatus::RECALLED);
    assert!(wait_until(TIMEOUT, || events.lock().len() == 2));
    assert_eq!(server.accept_new_goal().unwrap(), CountGoal { target: 3 });
}

#[test]
fn test_cancel_of_pending_goal_carries_over() {
    let (_bus, server_node, client_node) = setup();
    let (server, events) = recording_server(&server_node);
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    let handle = client.send_goal(CountGoal { target: 1 }).unwrap();
    assert!(wait_until(TIMEOUT, || events.lock().len() == 1));
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Pending));
    handle.cancel().unwrap();
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Recalling));
    assert!(!server.is_preempt_requested());

    server.accept_new_goal().unwrap();
    assert!(server.is_preempt_requested());
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Preempting));
    // a cancel on a goal that is not current yet never reaches the preempt callback
    assert_eq!(*events.lock(), vec!["goal"]);

    server.set_preempted(None, "").unwrap();
    wait_done(&handle);
    assert_eq!(handle.terminal_state().unwrap(), GoalStatus::PREEMPTED);
}

#[test]
fn test_execute_callback_reports_feedback() {
    let (_bus, server_node, client_node) = setup();
    let _server = server_node
        .create_simple_action_server::<Count>(ACTION)
        .with_server_config(fast_server_config())
        .with_execute_callback(|goal: CountGoal, server: &ZSimpleActionServer<Count>| {
            let mut total = 0;
            for i in 1..=goal.target {
                total += i;
                server.publish_feedback(CountFeedback { current: i }).unwrap();
            }
            server
                .set_succeeded(Some(CountResult { total }), "counted")
                .unwrap();
        })
        .auto_start(true)
        .build()
        .unwrap();
    let client = client_node
        .create_simple_action_client::<Count>(ACTION)
        .build()
        .unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    let feedback = Arc::new(Mutex::new(Vec::new()));
    let sink = feedback.clone();
    client
        .send_goal(
            CountGoal { target: 4 },
            actionlib_z::action::SimpleGoalCallbacks::default()
                .with_feedback(move |fb: &CountFeedback| sink.lock().push(fb.current)),
        )
        .unwrap();
    assert!(client.wait_for_result(TIMEOUT));
    assert_eq!(client.state().unwrap(), GoalStatus::SUCCEEDED);
    assert_eq!(client.goal_status_text().unwrap(), "counted");
    assert_eq!(client.result().unwrap(), CountResult { total: 10 });
    assert_eq!(*feedback.lock(), vec![1, 2, 3, 4]);
}

#[test]
fn test_unfinished_execute_is_aborted() {
    let (_bus, server_node, client_node) = setup();
    let _server = server_node
        .create_simple_action_server::<Count>(ACTION)
        .with_server_config(fast_server_config())
        .with_execute_callback(|_, _| {})
        .auto_start(true)
        .build()
        .unwrap();
    let client = client_node
        .create_simple_action_client::<Count>(ACTION)
        .build()
        .unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    let state = client
        .send_goal_and_wait(CountGoal { target: 1 }, TIMEOUT, TIMEOUT)
        .unwrap();
    assert_eq!(state, GoalStatus::ABORTED);
    assert_eq!(client.goal_status_text().unwrap(), AUTO_ABORTED);
}

#[test]
fn test_goal_callback_refused_with_executor() {
    let (_bus, server_node, _client_node) = setup();
    let server = server_node
        .create_simple_action_server::<Count>(ACTION)
        .with_execute_callback(|_, server: &ZSimpleActionServer<Count>| {
            let _ = server.set_aborted(None, "");
        })
        .build()
        .unwrap();
    assert!(matches!(
        server.register_goal_callback(|_| {}),
        Err(ActionError::ExecuteCallbackPresent)
    ));
    assert!(!server.action_server().is_started());
    server.shutdown();
}

#[test]
fn test_no_current_goal() {
    let (_bus, server_node, _client_node) = setup();
    let (server, _events) = recording_server(&server_node);
    assert!(!server.is_active());
    assert!(!server.is_new_goal_available());
    assert!(matches!(server.accept_new_goal(), Err(ActionError::NoNewGoal)));
    assert!(matches!(
        server.set_succeeded(None, ""),
        Err(ActionError::NoGoal)
    ));
    assert_eq!(server.default_result(), CountResult::default());
}
