use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use actionlib_z::Builder;
use actionlib_z::action::{
    ActionNodeExt, ClientGoalHandle, CommState, GoalCallbacks, GoalStatus, GoalStatusArray,
    ServerGoalHandle,
};
use actionlib_z::config::ActionClientConfig;
use actionlib_z::error::ActionError;
use actionlib_z::names;
use actionlib_z::pubsub::ZPub;
use parking_lot::Mutex;

use super::common::*;

fn recording_callbacks(
    states: &Arc<Mutex<Vec<CommState>>>,
    feedback: &Arc<Mutex<Vec<i32>>>,
) -> GoalCallbacks<Count> {
    let states = states.clone();
    let feedback = feedback.clone();
    GoalCallbacks::default()
        .with_transition(move |gh: &ClientGoalHandle<Count>| {
            states.lock().push(gh.comm_state().unwrap());
        })
        .with_feedback(move |_: &ClientGoalHandle<Count>, fb: &CountFeedback| {
            feedback.lock().push(fb.current);
        })
}

#[test]
fn test_successful_goal_passes_every_state() {
    let (_bus, server_node, client_node) = setup();
    let (tx, rx) = flume::unbounded::<ServerGoalHandle<Count>>();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(move |gh| tx.send(gh).unwrap())
        .auto_start(true)
        .build()
        .unwrap();
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    let states = Arc::new(Mutex::new(Vec::new()));
    let feedback = Arc::new(Mutex::new(Vec::new()));
    let handle = client
        .send_goal_with(CountGoal { target: 3 }, recording_callbacks(&states, &feedback))
        .unwrap();

    let goal = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(goal.goal_id(), handle.goal_id());
    assert_eq!(goal.goal(), Some(&CountGoal { target: 3 }));
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Pending));

    goal.set_accepted("working").unwrap();
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Active));
    for i in 1..=3 {
        goal.publish_feedback(CountFeedback { current: i }).unwrap();
    }
    assert!(wait_until(TIMEOUT, || feedback.lock().len() == 3));

    goal.set_succeeded(Some(CountResult { total: 6 }), "done").unwrap();
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Done));

    assert_eq!(
        *states.lock(),
        vec![
            CommState::Pending,
            CommState::Active,
            CommState::WaitingForResult,
            CommState::Done
        ]
    );
    assert_eq!(*feedback.lock(), vec![1, 2, 3]);
    assert_eq!(handle.result().unwrap(), CountResult { total: 6 });
    assert_eq!(handle.terminal_state().unwrap(), GoalStatus::SUCCEEDED);
    assert_eq!(handle.goal_status_text().unwrap(), "done");
    drop(server);
}

#[test]
fn test_vanished_goal_is_lost_exactly_once() {
    let (_bus, server_node, client_node) = setup();
    // a hand-driven status publisher stands in for the server
    let status_pub = ZPub::<GoalStatusArray>::new(
        server_node.as_ref(),
        &names::action_topic(ACTION, names::STATUS).unwrap(),
    )
    .unwrap();
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();

    let states = Arc::new(Mutex::new(Vec::new()));
    let feedback = Arc::new(Mutex::new(Vec::new()));
    let handle = client
        .send_goal_with(CountGoal { target: 1 }, recording_callbacks(&states, &feedback))
        .unwrap();

    let active = GoalStatusArray {
        status_list: vec![GoalStatus::new(handle.goal_id().clone(), GoalStatus::ACTIVE)],
        ..Default::default()
    };
    status_pub.publish(&active).unwrap();
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Active));

    for _ in 0..3 {
        status_pub.publish(&GoalStatusArray::default()).unwrap();
    }
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Done));
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(*states.lock(), vec![CommState::Active, CommState::Done]);
    assert_eq!(handle.terminal_state().unwrap(), GoalStatus::LOST);
    assert!(matches!(handle.result(), Err(ActionError::NoResult(_))));
}

#[test]
fn test_cancel_preempts_active_goal() {
    let (_bus, server_node, client_node) = setup();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(|gh| gh.set_accepted("").unwrap())
        .with_cancel_callback(|gh| {
            gh.set_canceled(Some(CountResult { total: -1 }), "stopped")
                .unwrap()
        })
        .auto_start(true)
        .build()
        .unwrap();
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    let states = Arc::new(Mutex::new(Vec::new()));
    let feedback = Arc::new(Mutex::new(Vec::new()));
    let handle = client
        .send_goal_with(CountGoal { target: 10 }, recording_callbacks(&states, &feedback))
        .unwrap();
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Active));

    handle.cancel().unwrap();
    assert!(wait_until(TIMEOUT, || handle.comm_state().unwrap() == CommState::Done));

    let states = states.lock().clone();
    assert!(states.contains(&CommState::WaitingForCancelAck));
    assert_eq!(states.last(), Some(&CommState::Done));
    assert_eq!(handle.terminal_state().unwrap(), GoalStatus::PREEMPTED);
    assert_eq!(handle.result().unwrap(), CountResult { total: -1 });
    drop(server);
}

#[test]
fn test_wait_for_server_needs_every_topic() {
    let (_bus, server_node, client_node) = setup();
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();
    assert!(!client.wait_for_server(Duration::from_millis(50)));

    let server = server_node
        .create_action_server::<Count>(ACTION)
        .build()
        .unwrap();
    // publishers exist but the goal and cancel subscriptions do not yet
    assert!(!client.wait_for_server(Duration::from_millis(50)));

    server.start().unwrap();
    server.start().unwrap();
    assert!(client.wait_for_server(TIMEOUT));

    server.shutdown();
    assert!(!client.is_server_connected());
}

#[test]
fn test_wait_for_server_wakes_on_first_status() {
    let (_bus, server_node, client_node) = setup();
    let client = client_node
        .create_action_client::<Count>(ACTION)
        .with_config(ActionClientConfig {
            server_poll_period: Duration::from_secs(30),
            ..Default::default()
        })
        .build()
        .unwrap();

    let start = Instant::now();
    let connected = thread::scope(|s| {
        let waiter = s.spawn(|| client.wait_for_server(Duration::from_secs(60)));
        thread::sleep(Duration::from_millis(50));
        let _server = server_node
            .create_action_server::<Count>(ACTION)
            .with_config(fast_server_config())
            .auto_start(true)
            .build()
            .unwrap();
        waiter.join().unwrap()
    });
    assert!(connected);
    assert!(start.elapsed() < TIMEOUT);
}

#[test]
fn test_shutdown_detaches_handles() {
    let (_bus, _server_node, client_node) = setup();
    let client = client_node.create_action_client::<Count>(ACTION).build().unwrap();
    let first = client.send_goal(CountGoal { target: 1 }).unwrap();
    let second = client.send_goal(CountGoal { target: 2 }).unwrap();
    assert_ne!(first, second);
    assert_ne!(first.goal_id(), second.goal_id());
    assert_eq!(client.num_goals(), 2);

    first.shutdown(true);
    assert_eq!(client.num_goals(), 1);

    client.shutdown();
    assert_eq!(client.num_goals(), 0);
    assert!(second.is_expired());
    assert!(matches!(
        second.comm_state(),
        Err(ActionError::InactiveHandle(_))
    ));
    assert!(matches!(second.cancel(), Err(ActionError::InactiveHandle(_))));
}
