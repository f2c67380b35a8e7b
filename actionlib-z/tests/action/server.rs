use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use actionlib_z::Builder;
use actionlib_z::action::{
    ActionGoal, ActionNodeExt, ActionResult, GoalID, GoalStatus, GoalStatusArray, ServerGoalHandle,
};
use actionlib_z::config::ActionServerConfig;
use actionlib_z::names;
use actionlib_z::node::{Node, NodeHandle};
use actionlib_z::pubsub::{ZPub, ZSub};
use actionlib_z::time::Time;
use parking_lot::Mutex;

use super::common::*;

/// Raw endpoints on the client side of the bus.
struct Probe {
    goal_pub: ZPub<ActionGoal<CountGoal>>,
    cancel_pub: ZPub<GoalID>,
    status_sub: ZSub<GoalStatusArray>,
    result_sub: ZSub<ActionResult<CountResult>>,
}

impl Probe {
    fn new(node: &NodeHandle) -> Self {
        let topic = |suffix| names::action_topic(ACTION, suffix).unwrap();
        Self {
            goal_pub: ZPub::new(node.as_ref(), &topic(names::GOAL)).unwrap(),
            cancel_pub: ZPub::new(node.as_ref(), &topic(names::CANCEL)).unwrap(),
            status_sub: ZSub::with_queue(node.as_ref(), &topic(names::STATUS)).unwrap(),
            result_sub: ZSub::with_queue(node.as_ref(), &topic(names::RESULT)).unwrap(),
        }
    }

    fn next_result(&self) -> ActionResult<CountResult> {
        self.result_sub.recv_timeout(TIMEOUT).unwrap().0
    }

    /// Waits for a status array satisfying `f`.
    fn status_where(&self, f: impl Fn(&GoalStatusArray) -> bool) -> GoalStatusArray {
        let start = Instant::now();
        while start.elapsed() < TIMEOUT {
            let (status, _) = self.status_sub.recv_timeout(TIMEOUT).unwrap();
            if f(&status) {
                return status;
            }
        }
        panic!("no matching status array within {:?}", TIMEOUT);
    }
}

fn status_of(array: &GoalStatusArray, id: &str) -> Option<u8> {
    array
        .status_list
        .iter()
        .find(|s| s.goal_id.id == id)
        .map(|s| s.status)
}

#[test]
fn test_stale_goal_recalled_without_callback() {
    let (_bus, server_node, client_node) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    probe
        .goal_pub
        .publish(&raw_goal("stale", Time::new(1, 0), 1))
        .unwrap();

    let result = probe.next_result();
    assert_eq!(result.status.goal_id.id, "stale");
    assert_eq!(result.status.status, GoalStatus::RECALLED);
    assert_eq!(result.status.text, "timestamp older than last goal cancel");
    assert_eq!(result.result, CountResult::default());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(server);
}

#[test]
fn test_cancel_all_keeps_watermark() {
    let (_bus, server_node, client_node) = setup();
    let (goal_tx, goal_rx) = flume::unbounded::<ServerGoalHandle<Count>>();
    let cancelled = Arc::new(Mutex::new(Vec::new()));
    let sink = cancelled.clone();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(move |gh| {
            gh.set_accepted("").unwrap();
            goal_tx.send(gh).unwrap();
        })
        .with_cancel_callback(move |gh| sink.lock().push(gh.goal_id().id.clone()))
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);
    let watermark = server.last_cancel();

    probe.goal_pub.publish(&raw_goal("a", Time::now(), 1)).unwrap();
    probe.goal_pub.publish(&raw_goal("b", Time::now(), 2)).unwrap();
    let a = goal_rx.recv_timeout(TIMEOUT).unwrap();
    let b = goal_rx.recv_timeout(TIMEOUT).unwrap();

    probe.cancel_pub.publish(&GoalID::default()).unwrap();
    assert!(wait_until(TIMEOUT, || cancelled.lock().len() == 2));

    let mut ids = cancelled.lock().clone();
    ids.sort();
    assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(a.goal_status().status, GoalStatus::PREEMPTING);
    assert_eq!(b.goal_status().status, GoalStatus::PREEMPTING);
    assert_eq!(server.last_cancel(), watermark);

    // a second request finds nothing left to cancel
    probe.cancel_pub.publish(&GoalID::default()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(cancelled.lock().len(), 2);
}

#[test]
fn test_cancel_before_time_advances_watermark() {
    let (_bus, server_node, client_node) = setup();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(|gh| gh.set_accepted("").unwrap())
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    let early = Time::now();
    probe.goal_pub.publish(&raw_goal("early", early, 1)).unwrap();
    probe.status_where(|s| status_of(s, "early") == Some(GoalStatus::ACTIVE));

    let cutoff = early + Duration::from_millis(1);
    probe.cancel_pub.publish(&GoalID::new("", cutoff)).unwrap();
    probe.status_where(|s| status_of(s, "early") == Some(GoalStatus::PREEMPTING));
    assert_eq!(server.last_cancel(), cutoff);

    // anything stamped at or before the cutoff is refused
    probe.goal_pub.publish(&raw_goal("late", cutoff, 2)).unwrap();
    let result = probe.next_result();
    assert_eq!(result.status.goal_id.id, "late");
    assert_eq!(result.status.status, GoalStatus::RECALLED);
}

#[test]
fn test_cancel_ahead_of_goal_recalls_it() {
    let (_bus, server_node, client_node) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    probe.cancel_pub.publish(&GoalID::new("ghost", Time::ZERO)).unwrap();
    probe.status_where(|s| status_of(s, "ghost") == Some(GoalStatus::RECALLING));

    probe.goal_pub.publish(&raw_goal("ghost", Time::now(), 1)).unwrap();
    let result = probe.next_result();
    assert_eq!(result.status.goal_id.id, "ghost");
    assert_eq!(result.status.status, GoalStatus::RECALLED);
    probe.status_where(|s| status_of(s, "ghost") == Some(GoalStatus::RECALLED));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    drop(server);
}

#[test]
fn test_duplicate_goal_reaches_callback_once() {
    let (_bus, server_node, client_node) = setup();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(move |gh| {
            counter.fetch_add(1, Ordering::SeqCst);
            gh.set_accepted("").unwrap();
        })
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    let goal = raw_goal("twice", Time::now(), 1);
    probe.goal_pub.publish(&goal).unwrap();
    probe.goal_pub.publish(&goal).unwrap();
    probe.status_where(|s| status_of(s, "twice") == Some(GoalStatus::ACTIVE));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    drop(server);
}

#[test]
fn test_goal_without_id_gets_one() {
    let (_bus, server_node, client_node) = setup();
    let (tx, rx) = flume::unbounded::<ServerGoalHandle<Count>>();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_goal_callback(move |gh| tx.send(gh).unwrap())
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    probe.goal_pub.publish(&raw_goal("", Time::ZERO, 1)).unwrap();
    let gh = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(gh.goal_id().id.starts_with("/server-1-"));
    assert!(!gh.goal_id().stamp.is_zero());
    drop(server);
}

#[test]
fn test_finished_goal_pruned_after_timeout() {
    let (_bus, server_node, client_node) = setup();
    let timeout = Duration::from_millis(300);
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(ActionServerConfig {
            status_frequency: 50.0,
            status_list_timeout: timeout,
        })
        .with_goal_callback(|gh| {
            gh.set_accepted("").unwrap();
            gh.set_succeeded(Some(CountResult { total: 1 }), "").unwrap();
        })
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    probe.goal_pub.publish(&raw_goal("short", Time::now(), 1)).unwrap();
    let result = probe.next_result();
    let finished = Instant::now();
    assert_eq!(result.status.status, GoalStatus::SUCCEEDED);

    probe.status_where(|s| status_of(s, "short") == Some(GoalStatus::SUCCEEDED));
    probe.status_where(|s| status_of(s, "short").is_none());
    let elapsed = finished.elapsed();
    assert!(elapsed >= timeout - Duration::from_millis(50), "{:?}", elapsed);
    assert!(elapsed < timeout + Duration::from_secs(2), "{:?}", elapsed);
    drop(server);
}

#[test]
fn test_status_list_empty_after_node_shutdown() {
    let (_bus, server_node, client_node) = setup();
    let server = server_node
        .create_action_server::<Count>(ACTION)
        .with_config(fast_server_config())
        .with_goal_callback(|gh| gh.set_accepted("").unwrap())
        .auto_start(true)
        .build()
        .unwrap();
    let probe = Probe::new(&client_node);

    probe.goal_pub.publish(&raw_goal("g", Time::now(), 1)).unwrap();
    probe.status_where(|s| status_of(s, "g") == Some(GoalStatus::ACTIVE));

    server_node.shutdown();
    probe.status_where(|s| s.status_list.is_empty());
    drop(server);
}
