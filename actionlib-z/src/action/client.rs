//! Multi-goal action client.
//!
//! Every inbound status array, feedback and result message is fanned out to
//! all live goal handles; each handle filters by its own goal id.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info};
use zenoh::Result;

use super::client_goal_handle::{ClientGoalHandle, GoalManager};
use super::goal_id::GoalIdGenerator;
use super::messages::{ActionFeedback, ActionGoal, ActionResult, GoalID, GoalStatusArray, Header};
use super::{ZAction, topic_name};
use crate::Builder;
use crate::config::ActionClientConfig;
use crate::error::ActionError;
use crate::names;
use crate::node::{MessageEvent, NodeHandle};
use crate::pubsub::{ZPub, ZSub};
use crate::time::Time;

pub type TransitionCallback<A> = Arc<dyn Fn(&ClientGoalHandle<A>) + Send + Sync>;
pub type FeedbackCallback<A> =
    Arc<dyn Fn(&ClientGoalHandle<A>, &<A as ZAction>::Feedback) + Send + Sync>;

/// Callbacks attached to one goal.
pub struct GoalCallbacks<A: ZAction> {
    /// Fired once per communication state the goal passes through.
    pub on_transition: Option<TransitionCallback<A>>,
    pub on_feedback: Option<FeedbackCallback<A>>,
}

impl<A: ZAction> Default for GoalCallbacks<A> {
    fn default() -> Self {
        Self {
            on_transition: None,
            on_feedback: None,
        }
    }
}

impl<A: ZAction> Clone for GoalCallbacks<A> {
    fn clone(&self) -> Self {
        Self {
            on_transition: self.on_transition.clone(),
            on_feedback: self.on_feedback.clone(),
        }
    }
}

impl<A: ZAction> GoalCallbacks<A> {
    pub fn with_transition<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ClientGoalHandle<A>) + Send + Sync + 'static,
    {
        self.on_transition = Some(Arc::new(callback));
        self
    }

    pub fn with_feedback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ClientGoalHandle<A>, &A::Feedback) + Send + Sync + 'static,
    {
        self.on_feedback = Some(Arc::new(callback));
        self
    }
}

struct ClientCore<A: ZAction> {
    node: NodeHandle,
    action_name: String,
    config: ActionClientConfig,
    goal_pub: ZPub<ActionGoal<A::Goal>>,
    cancel_pub: ZPub<GoalID>,
    handles: RwLock<Vec<ClientGoalHandle<A>>>,
    id_gen: GoalIdGenerator,
    // node name of the last status publisher
    status_source: Mutex<Option<String>>,
    // signalled on every status array, wakes wait_for_server
    status_seen: Condvar,
    this: Weak<ClientCore<A>>,
}

impl<A: ZAction> ClientCore<A> {
    fn snapshot(&self) -> Vec<ClientGoalHandle<A>> {
        self.handles.read().clone()
    }

    fn on_status(&self, status: GoalStatusArray, event: &MessageEvent) {
        {
            let mut source = self.status_source.lock();
            match source.as_deref() {
                None => debug!(
                    "[ActionClient] Receiving status for {} from {}",
                    self.action_name, event.publisher_name
                ),
                Some(previous) if previous != event.publisher_name => debug!(
                    "[ActionClient] Status publisher for {} changed from {} to {}",
                    self.action_name, previous, event.publisher_name
                ),
                Some(_) => {}
            }
            if source.as_deref() != Some(event.publisher_name.as_str()) {
                *source = Some(event.publisher_name.clone());
            }
        }
        self.status_seen.notify_all();
        for handle in self.snapshot() {
            handle.update_status(&status);
        }
    }

    fn on_feedback(&self, feedback: ActionFeedback<A::Feedback>) {
        for handle in self.snapshot() {
            handle.update_feedback(&feedback);
        }
    }

    fn on_result(&self, result: ActionResult<A::Result>) {
        for handle in self.snapshot() {
            if let Err(e) = handle.update_result(&result) {
                error!(
                    "[ActionClient] Failed to apply result for goal {}: {}",
                    handle.goal_id().id,
                    e
                );
            }
        }
    }
}

impl<A: ZAction> GoalManager<A> for ClientCore<A> {
    fn publish_goal(&self, goal: &ActionGoal<A::Goal>) -> std::result::Result<(), ActionError> {
        self.goal_pub.publish(goal)?;
        Ok(())
    }

    fn publish_cancel(&self, goal_id: &GoalID) -> std::result::Result<(), ActionError> {
        self.cancel_pub.publish(goal_id)?;
        Ok(())
    }

    fn remove_handle(&self, handle: &ClientGoalHandle<A>) {
        self.handles.write().retain(|h| h != handle);
    }
}

/// Builder for [`ZActionClient`].
pub struct ZActionClientBuilder<A: ZAction> {
    pub node: NodeHandle,
    pub action_name: String,
    pub config: ActionClientConfig,
    _phantom: PhantomData<A>,
}

impl<A: ZAction> ZActionClientBuilder<A> {
    pub fn new(node: NodeHandle, action_name: &str, config: ActionClientConfig) -> Self {
        Self {
            node,
            action_name: action_name.to_string(),
            config,
            _phantom: PhantomData,
        }
    }

    pub fn with_config(mut self, config: ActionClientConfig) -> Self {
        self.config = config;
        self
    }
}

impl<A: ZAction> Builder for ZActionClientBuilder<A> {
    type Output = ZActionClient<A>;

    #[tracing::instrument(name = "action_client_build", skip(self), fields(
        action = %self.action_name,
        node = %self.node.name()
    ))]
    fn build(self) -> Result<Self::Output> {
        let node = self.node;
        let action_name = self.action_name;
        let goal_pub = ZPub::new(node.as_ref(), &topic_name(&action_name, names::GOAL)?)?;
        let cancel_pub = ZPub::new(node.as_ref(), &topic_name(&action_name, names::CANCEL)?)?;
        let id_gen = GoalIdGenerator::new(node.name());

        let core = Arc::new_cyclic(|this| ClientCore {
            node,
            action_name,
            config: self.config,
            goal_pub,
            cancel_pub,
            handles: RwLock::new(Vec::new()),
            id_gen,
            status_source: Mutex::new(None),
            status_seen: Condvar::new(),
            this: this.clone(),
        });

        let weak = Arc::downgrade(&core);
        let status_sub = ZSub::with_callback(
            core.node.as_ref(),
            &topic_name(&core.action_name, names::STATUS)?,
            move |status: GoalStatusArray, event: &MessageEvent| {
                if let Some(core) = weak.upgrade() {
                    core.on_status(status, event);
                }
            },
        )?;
        let weak = Arc::downgrade(&core);
        let feedback_sub = ZSub::with_callback(
            core.node.as_ref(),
            &topic_name(&core.action_name, names::FEEDBACK)?,
            move |feedback: ActionFeedback<A::Feedback>, _: &MessageEvent| {
                if let Some(core) = weak.upgrade() {
                    core.on_feedback(feedback);
                }
            },
        )?;
        let weak = Arc::downgrade(&core);
        let result_sub = ZSub::with_callback(
            core.node.as_ref(),
            &topic_name(&core.action_name, names::RESULT)?,
            move |result: ActionResult<A::Result>, _: &MessageEvent| {
                if let Some(core) = weak.upgrade() {
                    core.on_result(result);
                }
            },
        )?;

        info!("[ActionClient] Client ready for {}", core.action_name);
        Ok(ZActionClient {
            core,
            status_sub,
            feedback_sub,
            result_sub,
        })
    }
}

/// Sends goals on `<action>/goal` and tracks them through the server's status
/// broadcasts.
///
/// Dropping the client detaches every handle it created.
pub struct ZActionClient<A: ZAction> {
    core: Arc<ClientCore<A>>,
    status_sub: ZSub<GoalStatusArray>,
    feedback_sub: ZSub<ActionFeedback<A::Feedback>>,
    result_sub: ZSub<ActionResult<A::Result>>,
}

impl<A: ZAction> ZActionClient<A> {
    pub fn send_goal(
        &self,
        goal: A::Goal,
    ) -> std::result::Result<ClientGoalHandle<A>, ActionError> {
        self.send_goal_with(goal, GoalCallbacks::default())
    }

    /// Sends `goal` and returns a handle tracking it.
    ///
    /// The handle is registered before the goal leaves, so no status about it
    /// can be missed.
    pub fn send_goal_with(
        &self,
        goal: A::Goal,
        callbacks: GoalCallbacks<A>,
    ) -> std::result::Result<ClientGoalHandle<A>, ActionError> {
        let action_goal = ActionGoal {
            header: Header::now(),
            goal_id: self.core.id_gen.generate(),
            goal,
        };
        let manager: Weak<dyn GoalManager<A>> = self.core.this.clone();
        let handle = ClientGoalHandle::new(action_goal.clone(), callbacks, manager);
        self.core.handles.write().push(handle.clone());
        debug!("[ActionClient] Sending goal {}", handle.goal_id().id);

        if let Err(e) = self.core.goal_pub.publish(&action_goal) {
            // a status callback may hold the handle lock, so only unregister
            self.core.remove_handle(&handle);
            return Err(e.into());
        }
        Ok(handle)
    }

    /// Cancels every goal on the server, whoever sent it.
    pub fn cancel_all_goals(&self) -> std::result::Result<(), ActionError> {
        self.core.publish_cancel(&GoalID::default())
    }

    /// Cancels every goal stamped at or before `stamp`.
    pub fn cancel_all_goals_before_time(
        &self,
        stamp: Time,
    ) -> std::result::Result<(), ActionError> {
        self.core.publish_cancel(&GoalID::new("", stamp))
    }

    /// Whether a server is matched on all five action topics.
    pub fn is_server_connected(&self) -> bool {
        self.core.goal_pub.num_subscribers() > 0
            && self.core.cancel_pub.num_subscribers() > 0
            && self.status_sub.num_publishers() > 0
            && self.feedback_sub.num_publishers() > 0
            && self.result_sub.num_publishers() > 0
    }

    /// Blocks until a server is connected. A zero `timeout` waits forever.
    ///
    /// Wakes as soon as a status array arrives, and re-checks the topic
    /// matches every `server_poll_period` in between.
    pub fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut source = self.core.status_source.lock();
        loop {
            if self.is_server_connected() {
                return true;
            }
            if !self.core.node.is_ok() {
                return false;
            }
            let mut slice = self.core.config.server_poll_period;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    debug!(
                        "[ActionClient] No server for {} after {:?}",
                        self.core.action_name, timeout
                    );
                    return false;
                }
                slice = slice.min(remaining);
            }
            self.core.status_seen.wait_for(&mut source, slice);
        }
    }

    /// Detaches and forgets every goal handle.
    pub fn shutdown(&self) {
        let handles: Vec<_> = self.core.handles.write().drain(..).collect();
        for handle in handles {
            handle.shutdown(false);
        }
    }

    pub fn action_name(&self) -> &str {
        &self.core.action_name
    }

    pub fn node(&self) -> &NodeHandle {
        &self.core.node
    }

    pub fn config(&self) -> &ActionClientConfig {
        &self.core.config
    }

    /// Number of goal handles currently receiving updates.
    pub fn num_goals(&self) -> usize {
        self.core.handles.read().len()
    }
}

impl<A: ZAction> Drop for ZActionClient<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
