use std::thread;
use std::time::Duration;

use actionlib_z::action::{
    ActionNodeExt, GoalStatus, SimpleGoalCallbacks, ZSimpleActionClient, ZSimpleActionServer,
};
use actionlib_z::config::ActionConfig;
use actionlib_z::context::ZContextBuilder;
use actionlib_z::local::LocalBus;
use actionlib_z::node::{Node, NodeHandle};
use actionlib_z::{Builder, Result, define_action};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FibonacciGoal {
    pub order: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FibonacciResult {
    pub sequence: Vec<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FibonacciFeedback {
    pub sequence: Vec<i32>,
}

define_action!(
    Fibonacci,
    "actionlib_tutorials/Fibonacci",
    FibonacciGoal,
    FibonacciResult,
    FibonacciFeedback
);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    /// Zenoh session, server and client may run in separate processes
    Zenoh,
    /// In-process bus, runs server and client together
    Local,
}

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long, default_value = "server", help = "Mode: server or client")]
    mode: String,

    #[arg(short, long, default_value = "10", help = "Sequence order (client mode)")]
    order: i32,

    #[arg(long, default_value = "fibonacci", help = "Action name")]
    action: String,

    /// Give up and cancel the goal after this many seconds; 0 waits forever
    #[arg(long, default_value = "0")]
    timeout: f64,

    #[arg(long, value_enum, default_value = "zenoh")]
    transport: Transport,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    let config = ActionConfig::from_env()?;

    match args.transport {
        Transport::Zenoh => {
            let ctx = ZContextBuilder::default().build()?;
            match args.mode.as_str() {
                "server" => {
                    let node = ctx.create_node("fibonacci_server").build()?;
                    let _server = run_server(&node, &args, &config)?;
                    println!("Fibonacci action server started, waiting for goals...");
                    while node.is_ok() {
                        thread::sleep(Duration::from_millis(100));
                    }
                    Ok(())
                }
                "client" => {
                    let node = ctx.create_node("fibonacci_client").build()?;
                    run_client(&node, &args, &config)
                }
                mode => {
                    eprintln!("Invalid mode: {}. Use 'server' or 'client'", mode);
                    std::process::exit(1);
                }
            }
        }
        Transport::Local => {
            let bus = LocalBus::new();
            let server_node = bus.create_node("fibonacci_server")?;
            let client_node = bus.create_node("fibonacci_client")?;
            let server = run_server(&server_node, &args, &config)?;
            let outcome = run_client(&client_node, &args, &config);
            server.shutdown();
            outcome
        }
    }
}

fn run_server(
    node: &NodeHandle,
    args: &Args,
    config: &ActionConfig,
) -> Result<ZSimpleActionServer<Fibonacci>> {
    node.create_simple_action_server::<Fibonacci>(&args.action)
        .with_config(config.simple_server.clone())
        .with_server_config(config.server.clone())
        .with_execute_callback(execute)
        .auto_start(true)
        .build()
}

fn execute(goal: FibonacciGoal, server: &ZSimpleActionServer<Fibonacci>) {
    println!("Executing goal: order={}", goal.order);
    let mut sequence = vec![0, 1];

    for i in 1..goal.order.max(1) as usize {
        if server.is_preempt_requested() {
            println!("Goal preempted at step {}", i);
            if let Err(e) = server.set_preempted(Some(FibonacciResult { sequence }), "") {
                eprintln!("Failed to preempt goal: {}", e);
            }
            return;
        }
        let next = sequence[i].saturating_add(sequence[i - 1]);
        sequence.push(next);
        if let Err(e) = server.publish_feedback(FibonacciFeedback {
            sequence: sequence.clone(),
        }) {
            eprintln!("Failed to publish feedback: {}", e);
        }
        thread::sleep(Duration::from_millis(500));
    }

    println!("Goal succeeded: {:?}", sequence);
    if let Err(e) = server.set_succeeded(Some(FibonacciResult { sequence }), "") {
        eprintln!("Failed to complete goal: {}", e);
    }
}

fn run_client(node: &NodeHandle, args: &Args, config: &ActionConfig) -> Result<()> {
    let client: ZSimpleActionClient<Fibonacci> = node
        .create_simple_action_client::<Fibonacci>(&args.action)
        .with_config(config.client.clone())
        .build()?;

    println!("Waiting for action server...");
    if !client.wait_for_server(Duration::from_secs(10)) {
        return Err("Action server not available".into());
    }

    let callbacks = SimpleGoalCallbacks::default()
        .with_active(|| println!("Goal is active"))
        .with_feedback(|fb: &FibonacciFeedback| println!("Feedback: {:?}", fb.sequence));
    println!("Sending goal: order={}", args.order);
    client
        .send_goal(FibonacciGoal { order: args.order }, callbacks)
        .map_err(|e| zenoh::Error::from(e.to_string()))?;

    let timeout = Duration::try_from_secs_f64(args.timeout).unwrap_or_default();
    if !client.wait_for_result(timeout) {
        println!("Timed out, cancelling goal");
        client
            .cancel_goal()
            .map_err(|e| zenoh::Error::from(e.to_string()))?;
        client.wait_for_result(Duration::from_secs(5));
    }

    let state = client
        .state()
        .map_err(|e| zenoh::Error::from(e.to_string()))?;
    println!("Finished in state {}", GoalStatus::status_name(state));
    if let Ok(result) = client.result() {
        println!("Result: {:?}", result.sequence);
    }
    Ok(())
}
