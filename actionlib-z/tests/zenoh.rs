use std::time::Duration;

use actionlib_z::Builder;
use actionlib_z::action::{ActionNodeExt, GoalStatus, ZSimpleActionServer};
use actionlib_z::context::ZContextBuilder;
use actionlib_z::define_action;
use actionlib_z::node::Node;
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SumGoal {
    pub values: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SumResult {
    pub sum: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SumFeedback {
    pub partial: i64,
}

define_action!(Sum, "test_msgs/Sum", SumGoal, SumResult, SumFeedback);

#[test]
fn test_simple_action_over_zenoh() {
    let ctx = ZContextBuilder::default()
        .disable_multicast_scouting()
        .with_json("connect/endpoints", json!([]))
        .build()
        .expect("Failed to create context");
    let server_node = ctx.create_node("sum_server").build().expect("Failed to create node");
    let client_node = ctx.create_node("sum_client").build().expect("Failed to create node");

    let _server = server_node
        .create_simple_action_server::<Sum>("sum")
        .with_execute_callback(|goal: SumGoal, server: &ZSimpleActionServer<Sum>| {
            let mut sum = 0;
            for v in goal.values {
                sum += v;
                let _ = server.publish_feedback(SumFeedback { partial: sum });
            }
            let _ = server.set_succeeded(Some(SumResult { sum }), "");
        })
        .auto_start(true)
        .build()
        .expect("Failed to create server");
    let client = client_node
        .create_simple_action_client::<Sum>("sum")
        .build()
        .expect("Failed to create client");

    assert!(client.wait_for_server(Duration::from_secs(10)));
    let state = client
        .send_goal_and_wait(
            SumGoal {
                values: vec![1, 2, 3, 4],
            },
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .expect("Failed to send goal");
    assert_eq!(state, GoalStatus::SUCCEEDED);
    assert_eq!(client.result().unwrap(), SumResult { sum: 10 });

    server_node.shutdown();
    client_node.shutdown();
    ctx.shutdown().expect("Failed to close session");
}
