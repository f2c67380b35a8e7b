use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use actionlib_z::Builder;
use actionlib_z::action::{
    ActionNodeExt, GoalStatus, SimpleGoalCallbacks, SimpleState, ZSimpleActionClient,
    ZSimpleActionServer,
};
use actionlib_z::error::ActionError;
use actionlib_z::node::NodeHandle;
use parking_lot::Mutex;

use super::common::*;

/// Counts up to `target`, one step per 10 ms, until preempted.
fn counting_server(node: &NodeHandle) -> ZSimpleActionServer<Count> {
    node.create_simple_action_server::<Count>(ACTION)
        .with_server_config(fast_server_config())
        .with_execute_callback(|goal: CountGoal, server: &ZSimpleActionServer<Count>| {
            let mut total = 0;
            for i in 1..=goal.target {
                if server.is_preempt_requested() {
                    server
                        .set_preempted(Some(CountResult { total }), "stopped early")
                        .unwrap();
                    return;
                }
                total += i;
                server.publish_feedback(CountFeedback { current: i }).unwrap();
                std::thread::sleep(Duration::from_millis(10));
            }
            server
                .set_succeeded(Some(CountResult { total }), "")
                .unwrap();
        })
        .auto_start(true)
        .build()
        .unwrap()
}

fn connected_client(node: &NodeHandle) -> ZSimpleActionClient<Count> {
    let client = node
        .create_simple_action_client::<Count>(ACTION)
        .build()
        .unwrap();
    assert!(client.wait_for_server(TIMEOUT));
    client
}

#[test]
fn test_goal_callbacks_fire() {
    let (_bus, server_node, client_node) = setup();
    let _server = counting_server(&server_node);
    let client = connected_client(&client_node);

    let log = Arc::new(Mutex::new(Vec::new()));
    let done = Arc::new(Mutex::new(None));
    let (active_log, feedback_log, done_sink) = (log.clone(), log.clone(), done.clone());
    let callbacks = SimpleGoalCallbacks::default()
        .with_active(move || active_log.lock().push("active".to_string()))
        .with_feedback(move |fb: &CountFeedback| {
            feedback_log.lock().push(format!("feedback {}", fb.current))
        })
        .with_done(move |status, result| *done_sink.lock() = Some((status, result)));

    client.send_goal(CountGoal { target: 3 }, callbacks).unwrap();
    assert_eq!(client.simple_state(), SimpleState::Pending);
    assert!(client.wait_for_result(TIMEOUT));
    assert_eq!(client.simple_state(), SimpleState::Done);
    assert_eq!(client.state().unwrap(), GoalStatus::SUCCEEDED);
    assert_eq!(client.result().unwrap(), CountResult { total: 6 });

    assert!(wait_until(TIMEOUT, || done.lock().is_some()));
    assert_eq!(
        *done.lock(),
        Some((GoalStatus::SUCCEEDED, Some(CountResult { total: 6 })))
    );
    let log = log.lock();
    assert_eq!(log.iter().filter(|e| *e == "active").count(), 1);
    assert_eq!(
        log.iter().filter(|e| e.starts_with("feedback")).collect::<Vec<_>>(),
        vec!["feedback 1", "feedback 2", "feedback 3"]
    );
}

#[test]
fn test_send_goal_and_wait_cancels_on_timeout() {
    let (_bus, server_node, client_node) = setup();
    let _server = counting_server(&server_node);
    let client = connected_client(&client_node);

    let start = Instant::now();
    let state = client
        .send_goal_and_wait(
            CountGoal { target: 1000 },
            Duration::from_millis(100),
            TIMEOUT,
        )
        .unwrap();
    assert_eq!(state, GoalStatus::PREEMPTED);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(client.goal_status_text().unwrap(), "stopped early");
    assert!(client.result().unwrap().total > 0);
}

#[test]
fn test_without_goal() {
    let (_bus, server_node, client_node) = setup();
    let _server = counting_server(&server_node);
    let client = connected_client(&client_node);

    assert_eq!(client.simple_state(), SimpleState::Done);
    assert!(!client.wait_for_result(Duration::from_millis(10)));
    assert!(matches!(client.state(), Err(ActionError::NoGoal)));
    assert!(matches!(client.result(), Err(ActionError::NoGoal)));
    assert!(client.cancel_goal().is_ok());
    client.stop_tracking_goal();
}

#[test]
fn test_new_goal_replaces_tracking() {
    let (_bus, server_node, client_node) = setup();
    let _server = counting_server(&server_node);
    let client = connected_client(&client_node);

    let first_done = Arc::new(AtomicUsize::new(0));
    let counter = first_done.clone();
    client
        .send_goal(
            CountGoal { target: 1000 },
            SimpleGoalCallbacks::default().with_done(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
    assert!(wait_until(TIMEOUT, || client.simple_state() == SimpleState::Active));

    // the server preempts the first goal in favour of the second
    client
        .send_goal(CountGoal { target: 2 }, SimpleGoalCallbacks::default())
        .unwrap();
    assert!(client.wait_for_result(TIMEOUT));
    assert_eq!(client.state().unwrap(), GoalStatus::SUCCEEDED);
    assert_eq!(client.result().unwrap(), CountResult { total: 3 });
    assert_eq!(client.client().num_goals(), 1);
    assert_eq!(first_done.load(Ordering::SeqCst), 0);
}

#[test]
fn test_stop_tracking_keeps_goal_running() {
    let (_bus, server_node, client_node) = setup();
    let server = counting_server(&server_node);
    let client = connected_client(&client_node);

    client
        .send_goal(CountGoal { target: 1000 }, SimpleGoalCallbacks::default())
        .unwrap();
    assert!(wait_until(TIMEOUT, || server.is_active()));
    client.stop_tracking_goal();
    assert!(matches!(client.state(), Err(ActionError::NoGoal)));
    assert_eq!(client.client().num_goals(), 0);
    std::thread::sleep(Duration::from_millis(50));
    assert!(server.is_active());

    client.cancel_all_goals().unwrap();
    assert!(wait_until(TIMEOUT, || !server.is_active()));
}
