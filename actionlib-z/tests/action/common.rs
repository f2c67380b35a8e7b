#![allow(dead_code)]

use std::time::{Duration, Instant};

use actionlib_z::action::{ActionGoal, GoalID, Header};
use actionlib_z::config::ActionServerConfig;
use actionlib_z::define_action;
use actionlib_z::local::LocalBus;
use actionlib_z::node::NodeHandle;
use actionlib_z::time::Time;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const ACTION: &str = "count";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountGoal {
    pub target: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountResult {
    pub total: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountFeedback {
    pub current: i32,
}

define_action!(Count, "test_msgs/Count", CountGoal, CountResult, CountFeedback);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A bus with one server-side and one client-side node.
pub fn setup() -> (LocalBus, NodeHandle, NodeHandle) {
    init_tracing();
    let bus = LocalBus::new();
    let server_node = bus.create_node("server").unwrap();
    let client_node = bus.create_node("client").unwrap();
    (bus, server_node, client_node)
}

/// Broadcasts fast enough that tests never wait on the 5 Hz default.
pub fn fast_server_config() -> ActionServerConfig {
    ActionServerConfig {
        status_frequency: 50.0,
        ..Default::default()
    }
}

pub fn wait_until(timeout: Duration, f: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    f()
}

pub fn raw_goal(id: &str, stamp: Time, target: i32) -> ActionGoal<CountGoal> {
    ActionGoal {
        header: Header::now(),
        goal_id: GoalID::new(id, stamp),
        goal: CountGoal { target },
    }
}

pub const TIMEOUT: Duration = Duration::from_secs(5);
