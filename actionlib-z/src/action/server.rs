//! Multi-goal action server.
//!
//! The server keeps one [`ServerGoalHandle`] per goal id, answers cancel
//! requests, and broadcasts the aggregate status list from a dedicated thread
//! at `status_frequency`. Finished goals stay in that list for
//! `status_list_timeout` so that late clients can still observe their outcome.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};
use zenoh::Result;

use super::goal_id::GoalIdGenerator;
use super::messages::{
    ActionFeedback, ActionGoal, ActionResult, GoalID, GoalStatus, GoalStatusArray, Header,
};
use super::server_goal_handle::{GoalPublisher, ServerGoalHandle};
use super::{ZAction, topic_name};
use crate::Builder;
use crate::config::ActionServerConfig;
use crate::error::ActionError;
use crate::names;
use crate::node::{MessageEvent, NodeHandle};
use crate::pubsub::{ZPub, ZSub};
use crate::time::Time;

pub(crate) type HandleCallback<A> = Arc<dyn Fn(ServerGoalHandle<A>) + Send + Sync>;

enum StatusCommand {
    Publish,
    Shutdown,
}

struct ServerHandles<A: ZAction> {
    map: HashMap<String, ServerGoalHandle<A>>,
    // newest stamp seen in a cancel request
    last_cancel: Time,
}

struct ServerCore<A: ZAction> {
    node: NodeHandle,
    action_name: String,
    config: ActionServerConfig,
    result_pub: ZPub<ActionResult<A::Result>>,
    feedback_pub: ZPub<ActionFeedback<A::Feedback>>,
    status_pub: ZPub<GoalStatusArray>,
    handles: Mutex<ServerHandles<A>>,
    goal_callback: RwLock<Option<HandleCallback<A>>>,
    cancel_callback: RwLock<Option<HandleCallback<A>>>,
    id_gen: GoalIdGenerator,
    status_tx: Mutex<Option<flume::Sender<StatusCommand>>>,
    this: Weak<ServerCore<A>>,
}

impl<A: ZAction> ServerCore<A> {
    fn publisher(&self) -> Weak<dyn GoalPublisher<A>> {
        self.this.clone()
    }

    fn on_goal(&self, mut goal: ActionGoal<A::Goal>) {
        let mut handles = self.handles.lock();

        if let Some(existing) = handles.map.get(&goal.goal_id.id) {
            debug!(
                "[ActionServer] Goal {} is already in the status list",
                goal.goal_id.id
            );
            // a cancel for this id arrived before the goal itself
            if existing.goal_status().status == GoalStatus::RECALLING {
                if let Err(e) = existing.finalize_recalled() {
                    error!(
                        "[ActionServer] Failed to recall goal {}: {}",
                        goal.goal_id.id, e
                    );
                }
            }
            existing.set_destruction_time(Time::now());
            return;
        }

        if goal.goal_id.id.is_empty() {
            goal.goal_id = self.id_gen.generate();
        }
        let id = goal.goal_id.id.clone();
        let stamp = goal.goal_id.stamp;
        let handle = ServerGoalHandle::with_goal(goal, self.publisher());
        handles.map.insert(id.clone(), handle.clone());

        if !stamp.is_zero() && stamp <= handles.last_cancel {
            debug!(
                "[ActionServer] Goal {} stamped {} is older than the last cancel at {}",
                id, stamp, handles.last_cancel
            );
            if let Err(e) = handle.set_canceled(None, "timestamp older than last goal cancel") {
                error!("[ActionServer] Failed to cancel stale goal {}: {}", id, e);
            }
            return;
        }

        let callback = self.goal_callback.read().clone();
        match callback {
            Some(callback) => callback(handle),
            None => warn!("[ActionServer] No goal callback registered, goal {} stays pending", id),
        }
    }

    fn on_cancel(&self, cancel: GoalID) {
        let mut handles = self.handles.lock();
        let cancel_all = cancel.id.is_empty() && cancel.stamp.is_zero();
        let callback = self.cancel_callback.read().clone();
        let mut found = false;

        for handle in handles.map.values() {
            let goal_id = handle.goal_id();
            let matched = cancel_all
                || goal_id.id == cancel.id
                || (!cancel.stamp.is_zero() && goal_id.stamp <= cancel.stamp);
            if !matched {
                continue;
            }
            if goal_id.id == cancel.id {
                found = true;
            }
            if handle.set_cancel_requested() {
                debug!("[ActionServer] Cancel requested for goal {}", goal_id.id);
                if let Some(callback) = &callback {
                    callback(handle.clone());
                }
            }
        }

        if !cancel.id.is_empty() && !found {
            debug!(
                "[ActionServer] Remembering cancel for unknown goal {}",
                cancel.id
            );
            let placeholder = ServerGoalHandle::placeholder(cancel.clone(), self.publisher());
            handles.map.insert(cancel.id.clone(), placeholder);
        }

        if cancel.stamp > handles.last_cancel {
            handles.last_cancel = cancel.stamp;
        }
    }

    fn status_array(&self) -> GoalStatusArray {
        let mut handles = self.handles.lock();
        let mut status_list = Vec::new();
        if self.node.is_ok() {
            let now = Time::now();
            let timeout = self.config.status_list_timeout;
            handles.map.retain(|id, handle| {
                let destruction = handle.destruction_time();
                let keep = destruction.is_zero() || destruction + timeout > now;
                if !keep {
                    debug!("[ActionServer] Removing goal {} from the status list", id);
                }
                keep
            });
            status_list = handles.map.values().map(|h| h.goal_status()).collect();
            status_list.sort_by(|a, b| {
                (a.goal_id.stamp, &a.goal_id.id).cmp(&(b.goal_id.stamp, &b.goal_id.id))
            });
        }
        GoalStatusArray {
            header: Header::now(),
            status_list,
        }
    }

    fn broadcast_status(&self) {
        let status = self.status_array();
        trace!(
            "[ActionServer] Broadcasting {} statuses",
            status.status_list.len()
        );
        if let Err(e) = self.status_pub.publish(&status) {
            error!("[ActionServer] Failed to publish status: {}", e);
        }
    }
}

impl<A: ZAction> GoalPublisher<A> for ServerCore<A> {
    fn publish_result(
        &self,
        status: GoalStatus,
        result: A::Result,
    ) -> std::result::Result<(), ActionError> {
        let msg = ActionResult {
            header: Header::now(),
            status,
            result,
        };
        self.result_pub.publish(&msg)?;
        self.publish_status();
        Ok(())
    }

    fn publish_feedback(
        &self,
        status: GoalStatus,
        feedback: A::Feedback,
    ) -> std::result::Result<(), ActionError> {
        let msg = ActionFeedback {
            header: Header::now(),
            status,
            feedback,
        };
        self.feedback_pub.publish(&msg)?;
        Ok(())
    }

    fn publish_status(&self) {
        match &*self.status_tx.lock() {
            Some(tx) => {
                let _ = tx.send(StatusCommand::Publish);
            }
            None => trace!("[ActionServer] Not started, skipping status broadcast"),
        }
    }
}

fn status_loop<A: ZAction>(
    core: Weak<ServerCore<A>>,
    rx: flume::Receiver<StatusCommand>,
    period: Duration,
) {
    let mut deadline = Instant::now() + period;
    loop {
        match rx.recv_deadline(deadline) {
            Ok(StatusCommand::Publish) => {}
            Ok(StatusCommand::Shutdown) | Err(flume::RecvTimeoutError::Disconnected) => break,
            Err(flume::RecvTimeoutError::Timeout) => {
                let now = Instant::now();
                deadline += period;
                if deadline <= now {
                    deadline = now + period;
                }
            }
        }
        let Some(core) = core.upgrade() else {
            break;
        };
        core.broadcast_status();
    }
    debug!("[ActionServer] Status thread stopped");
}

/// Builder for [`ZActionServer`].
pub struct ZActionServerBuilder<A: ZAction> {
    pub node: NodeHandle,
    pub action_name: String,
    pub config: ActionServerConfig,
    goal_callback: Option<HandleCallback<A>>,
    cancel_callback: Option<HandleCallback<A>>,
    pub(crate) auto_start: bool,
}

impl<A: ZAction> ZActionServerBuilder<A> {
    pub fn new(node: NodeHandle, action_name: &str, config: ActionServerConfig) -> Self {
        Self {
            node,
            action_name: action_name.to_string(),
            config,
            goal_callback: None,
            cancel_callback: None,
            auto_start: false,
        }
    }

    pub fn with_config(mut self, config: ActionServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_goal_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ServerGoalHandle<A>) + Send + Sync + 'static,
    {
        self.goal_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_cancel_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ServerGoalHandle<A>) + Send + Sync + 'static,
    {
        self.cancel_callback = Some(Arc::new(callback));
        self
    }

    /// Start receiving goals as soon as the server is built.
    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

impl<A: ZAction> Builder for ZActionServerBuilder<A> {
    type Output = ZActionServer<A>;

    #[tracing::instrument(name = "action_server_build", skip(self), fields(
        action = %self.action_name,
        node = %self.node.name()
    ))]
    fn build(self) -> Result<Self::Output> {
        let node = self.node;
        let result_pub = ZPub::new(node.as_ref(), &topic_name(&self.action_name, names::RESULT)?)?;
        let feedback_pub =
            ZPub::new(node.as_ref(), &topic_name(&self.action_name, names::FEEDBACK)?)?;
        let status_pub = ZPub::new(node.as_ref(), &topic_name(&self.action_name, names::STATUS)?)?;
        let id_gen = GoalIdGenerator::new(node.name());

        let core = Arc::new_cyclic(|this| ServerCore {
            node,
            action_name: self.action_name,
            config: self.config,
            result_pub,
            feedback_pub,
            status_pub,
            handles: Mutex::new(ServerHandles {
                map: HashMap::new(),
                last_cancel: Time::now(),
            }),
            goal_callback: RwLock::new(self.goal_callback),
            cancel_callback: RwLock::new(self.cancel_callback),
            id_gen,
            status_tx: Mutex::new(None),
            this: this.clone(),
        });
        debug!("[ActionServer] Built {}", core.action_name);

        let server = ZActionServer {
            core,
            running: Mutex::new(None),
        };
        if self.auto_start {
            server.start()?;
        }
        Ok(server)
    }
}

struct Running<A: ZAction> {
    goal_sub: ZSub<ActionGoal<A::Goal>>,
    cancel_sub: ZSub<GoalID>,
    status_thread: JoinHandle<()>,
}

/// Accepts goals on `<action>/goal` and cancel requests on `<action>/cancel`.
///
/// Nothing is received until [`ZActionServer::start`] is called. Dropping the
/// server stops the status broadcast and releases every subscription.
pub struct ZActionServer<A: ZAction> {
    core: Arc<ServerCore<A>>,
    running: Mutex<Option<Running<A>>>,
}

impl<A: ZAction> ZActionServer<A> {
    /// Subscribes to goals and cancels and starts the status broadcast.
    ///
    /// Calling this on a started server does nothing.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Ok(());
        }
        let core = &self.core;

        let weak = Arc::downgrade(core);
        let goal_sub = ZSub::with_callback(
            core.node.as_ref(),
            &topic_name(&core.action_name, names::GOAL)?,
            move |goal: ActionGoal<A::Goal>, _: &MessageEvent| {
                if let Some(core) = weak.upgrade() {
                    core.on_goal(goal);
                }
            },
        )?;
        let weak = Arc::downgrade(core);
        let cancel_sub = ZSub::with_callback(
            core.node.as_ref(),
            &topic_name(&core.action_name, names::CANCEL)?,
            move |cancel: GoalID, _: &MessageEvent| {
                if let Some(core) = weak.upgrade() {
                    core.on_cancel(cancel);
                }
            },
        )?;

        let (tx, rx) = flume::unbounded();
        *core.status_tx.lock() = Some(tx);
        let weak = Arc::downgrade(core);
        let period = core.config.status_period();
        let status_thread = thread::Builder::new()
            .name(format!("status:{}", core.action_name))
            .spawn(move || status_loop(weak, rx, period))?;

        *running = Some(Running {
            goal_sub,
            cancel_sub,
            status_thread,
        });
        info!(
            "[ActionServer] Started {} at {} Hz",
            core.action_name, core.config.status_frequency
        );
        core.publish_status();
        Ok(())
    }

    /// Stops receiving goals and joins the status thread.
    pub fn shutdown(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        if let Some(tx) = self.core.status_tx.lock().take() {
            let _ = tx.send(StatusCommand::Shutdown);
        }
        let Running {
            goal_sub,
            cancel_sub,
            status_thread,
        } = running;
        drop((goal_sub, cancel_sub));
        if status_thread.thread().id() != thread::current().id() && status_thread.join().is_err() {
            error!("[ActionServer] Status thread panicked");
        }
        debug!("[ActionServer] Shut down {}", self.core.action_name);
    }

    pub fn is_started(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn register_goal_callback<F>(&self, callback: F)
    where
        F: Fn(ServerGoalHandle<A>) + Send + Sync + 'static,
    {
        *self.core.goal_callback.write() = Some(Arc::new(callback));
    }

    pub fn register_cancel_callback<F>(&self, callback: F)
    where
        F: Fn(ServerGoalHandle<A>) + Send + Sync + 'static,
    {
        *self.core.cancel_callback.write() = Some(Arc::new(callback));
    }

    /// Publishes a result for the goal described by `status`.
    pub fn publish_result(
        &self,
        status: GoalStatus,
        result: A::Result,
    ) -> std::result::Result<(), ActionError> {
        GoalPublisher::publish_result(self.core.as_ref(), status, result)
    }

    pub fn publish_feedback(
        &self,
        status: GoalStatus,
        feedback: A::Feedback,
    ) -> std::result::Result<(), ActionError> {
        GoalPublisher::publish_feedback(self.core.as_ref(), status, feedback)
    }

    /// Requests an immediate status broadcast.
    pub fn publish_status(&self) {
        GoalPublisher::publish_status(self.core.as_ref());
    }

    /// Newest stamp carried by a cancel request so far.
    pub fn last_cancel(&self) -> Time {
        self.core.handles.lock().last_cancel
    }

    pub fn action_name(&self) -> &str {
        &self.core.action_name
    }

    pub fn node(&self) -> &NodeHandle {
        &self.core.node
    }
}

impl<A: ZAction> Drop for ZActionServer<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
