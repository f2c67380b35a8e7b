//! Goal-oriented actions on top of plain topics.
//!
//! An action named `fibonacci` lives on five topics: `fibonacci/goal`,
//! `fibonacci/cancel`, `fibonacci/status`, `fibonacci/feedback` and
//! `fibonacci/result`. Clients and servers each keep one state machine per
//! goal and reconcile them through the periodic status broadcast.

use std::fmt::Debug;

use serde::{Serialize, de::DeserializeOwned};

use crate::config::{ActionClientConfig, ActionServerConfig, SimpleActionServerConfig};
use crate::msg::ZMessage;
use crate::node::NodeHandle;

pub mod client;
pub mod client_goal_handle;
pub mod client_state;
pub mod goal_id;
pub mod messages;
pub mod server;
pub mod server_goal_handle;
pub mod server_state;
pub mod simple_client;
pub mod simple_server;


pub use client::{GoalCallbacks, ZActionClient, ZActionClientBuilder};
pub use client_goal_handle::ClientGoalHandle;
pub use client_state::CommState;
pub use goal_id::GoalIdGenerator;
pub use messages::{
    ActionFeedback, ActionGoal, ActionResult, GoalID, GoalStatus, GoalStatusArray, Header,
};
pub use server::{ZActionServer, ZActionServerBuilder};
pub use server_goal_handle::ServerGoalHandle;
pub use server_state::ServerEvent;
pub use simple_client::{
    SimpleGoalCallbacks, SimpleState, ZSimpleActionClient, ZSimpleActionClientBuilder,
};
pub use simple_server::{ZSimpleActionServer, ZSimpleActionServerBuilder};

/// Bounds shared by goal, result and feedback payloads.
pub trait ActionPayload:
    ZMessage + Serialize + DeserializeOwned + Clone + Default + Debug + Send + Sync + 'static
{
}

impl<T> ActionPayload for T where
    T: ZMessage + Serialize + DeserializeOwned + Clone + Default + Debug + Send + Sync + 'static
{
}

/// Core trait for actions
pub trait ZAction: Send + Sync + 'static {
    type Goal: ActionPayload;
    type Result: ActionPayload;
    type Feedback: ActionPayload;

    /// Action type name, e.g. `actionlib_tutorials/Fibonacci`.
    fn name() -> &'static str;
}

/// Declares a unit struct implementing [`ZAction`].
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// pub struct FibonacciGoal { pub order: i32 }
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// pub struct FibonacciResult { pub sequence: Vec<i32> }
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// pub struct FibonacciFeedback { pub sequence: Vec<i32> }
///
/// actionlib_z::define_action!(
///     Fibonacci,
///     "actionlib_tutorials/Fibonacci",
///     FibonacciGoal,
///     FibonacciResult,
///     FibonacciFeedback
/// );
///
/// use actionlib_z::action::ZAction;
/// assert_eq!(Fibonacci::name(), "actionlib_tutorials/Fibonacci");
/// ```
#[macro_export]
macro_rules! define_action {
    ($action:ident, $name:expr, $goal:ty, $result:ty, $feedback:ty $(,)?) => {
        pub struct $action;

        impl $crate::action::ZAction for $action {
            type Goal = $goal;
            type Result = $result;
            type Feedback = $feedback;

            fn name() -> &'static str {
                $name
            }
        }
    };
}

pub(crate) fn topic_name(action: &str, suffix: &str) -> zenoh::Result<String> {
    crate::names::action_topic(action, suffix)
        .map_err(|e| zenoh::Error::from(format!("Invalid action name '{}': {}", action, e)))
}

/// Entry points for creating action endpoints on a node.
pub trait ActionNodeExt {
    fn create_action_client<A: ZAction>(&self, action: &str) -> ZActionClientBuilder<A>;
    fn create_action_server<A: ZAction>(&self, action: &str) -> ZActionServerBuilder<A>;
    fn create_simple_action_client<A: ZAction>(&self, action: &str)
    -> ZSimpleActionClientBuilder<A>;
    fn create_simple_action_server<A: ZAction>(&self, action: &str)
    -> ZSimpleActionServerBuilder<A>;
}

impl ActionNodeExt for NodeHandle {
    fn create_action_client<A: ZAction>(&self, action: &str) -> ZActionClientBuilder<A> {
        ZActionClientBuilder::new(self.clone(), action, ActionClientConfig::default())
    }

    fn create_action_server<A: ZAction>(&self, action: &str) -> ZActionServerBuilder<A> {
        ZActionServerBuilder::new(self.clone(), action, ActionServerConfig::default())
    }

    fn create_simple_action_client<A: ZAction>(
        &self,
        action: &str,
    ) -> ZSimpleActionClientBuilder<A> {
        ZSimpleActionClientBuilder {
            inner: self.create_action_client(action),
        }
    }

    fn create_simple_action_server<A: ZAction>(
        &self,
        action: &str,
    ) -> ZSimpleActionServerBuilder<A> {
        ZSimpleActionServerBuilder::new(
            self.create_action_server(action),
            SimpleActionServerConfig::default(),
        )
    }
}
