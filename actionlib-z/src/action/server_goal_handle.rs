use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::ZAction;
use super::messages::{ActionGoal, GoalID, GoalStatus};
use super::server_state::{ServerEvent, ServerStateMachine};
use crate::error::ActionError;
use crate::time::Time;

/// The outbound half of an action server, as seen by its goal handles.
pub(crate) trait GoalPublisher<A: ZAction>: Send + Sync {
    fn publish_result(&self, status: GoalStatus, result: A::Result) -> Result<(), ActionError>;
    fn publish_feedback(&self, status: GoalStatus, feedback: A::Feedback)
    -> Result<(), ActionError>;
    /// Requests an immediate status broadcast.
    fn publish_status(&self);
}

struct HandleInner<A: ZAction> {
    // None for placeholders created by a cancel for an unknown goal
    goal: Option<ActionGoal<A::Goal>>,
    goal_id: GoalID,
    machine: Mutex<ServerStateMachine>,
    destruction_time: Mutex<Time>,
    server: Weak<dyn GoalPublisher<A>>,
}

/// Server-side view of one goal.
///
/// Handles are cheap to clone and compare equal when they track the same
/// goal id.
pub struct ServerGoalHandle<A: ZAction> {
    inner: Arc<HandleInner<A>>,
}

impl<A: ZAction> Clone for ServerGoalHandle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: ZAction> ServerGoalHandle<A> {
    pub(crate) fn with_goal(goal: ActionGoal<A::Goal>, server: Weak<dyn GoalPublisher<A>>) -> Self {
        let goal_id = goal.goal_id.clone();
        Self {
            inner: Arc::new(HandleInner {
                machine: Mutex::new(ServerStateMachine::new(goal_id.clone())),
                goal: Some(goal),
                goal_id,
                destruction_time: Mutex::new(Time::ZERO),
                server,
            }),
        }
    }

    /// Remembers a cancelled id whose goal has not arrived yet.
    pub(crate) fn placeholder(goal_id: GoalID, server: Weak<dyn GoalPublisher<A>>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                machine: Mutex::new(ServerStateMachine::with_status(
                    goal_id.clone(),
                    GoalStatus::RECALLING,
                )),
                goal: None,
                goal_id,
                destruction_time: Mutex::new(Time::now()),
                server,
            }),
        }
    }

    fn server(&self) -> Result<Arc<dyn GoalPublisher<A>>, ActionError> {
        self.inner
            .server
            .upgrade()
            .ok_or_else(|| ActionError::Transport("action server has shut down".into()))
    }

    fn transition(
        &self,
        op: &'static str,
        event: ServerEvent,
        text: &str,
    ) -> Result<GoalStatus, ActionError> {
        if self.inner.goal.is_none() {
            return Err(ActionError::UninitializedHandle(op));
        }
        self.inner.machine.lock().transition(event, text)
    }

    fn finish(
        &self,
        op: &'static str,
        event: ServerEvent,
        result: Option<A::Result>,
        text: &str,
    ) -> Result<(), ActionError> {
        let status = self.transition(op, event, text)?;
        debug!(
            "[ActionServer] Goal {} is now {}",
            self.inner.goal_id.id,
            GoalStatus::status_name(status.status)
        );
        self.set_destruction_time(Time::now());
        self.server()?
            .publish_result(status, result.unwrap_or_default())
    }

    pub fn set_accepted(&self, text: &str) -> Result<(), ActionError> {
        self.transition("set_accepted", ServerEvent::Accept, text)?;
        debug!("[ActionServer] Accepted goal {}", self.inner.goal_id.id);
        self.server()?.publish_status();
        Ok(())
    }

    /// `None` publishes a default-constructed result.
    pub fn set_canceled(&self, result: Option<A::Result>, text: &str) -> Result<(), ActionError> {
        self.finish("set_canceled", ServerEvent::Cancel, result, text)
    }

    pub fn set_rejected(&self, result: Option<A::Result>, text: &str) -> Result<(), ActionError> {
        self.finish("set_rejected", ServerEvent::Reject, result, text)
    }

    pub fn set_aborted(&self, result: Option<A::Result>, text: &str) -> Result<(), ActionError> {
        self.finish("set_aborted", ServerEvent::Abort, result, text)
    }

    pub fn set_succeeded(&self, result: Option<A::Result>, text: &str) -> Result<(), ActionError> {
        self.finish("set_succeeded", ServerEvent::Succeed, result, text)
    }

    /// Moves the goal to RECALLING or PREEMPTING.
    ///
    /// Returns whether the request took effect, i.e. whether the user cancel
    /// callback should run.
    pub fn set_cancel_requested(&self) -> bool {
        match self.transition(
            "set_cancel_requested",
            ServerEvent::CancelRequest,
            "Cancel requested",
        ) {
            Ok(_) => {
                self.set_destruction_time(Time::now());
                true
            }
            Err(_) => false,
        }
    }

    pub fn publish_feedback(&self, feedback: A::Feedback) -> Result<(), ActionError> {
        let status = self.goal_status();
        self.server()?.publish_feedback(status, feedback)
    }

    /// Completes a recall for a goal that arrived after its own cancel.
    pub(crate) fn finalize_recalled(&self) -> Result<(), ActionError> {
        let status = {
            let mut machine = self.inner.machine.lock();
            let text = machine.status().text.clone();
            machine.transition(ServerEvent::Cancel, &text)?
        };
        self.server()?.publish_result(status, A::Result::default())
    }

    pub fn goal(&self) -> Option<&A::Goal> {
        self.inner.goal.as_ref().map(|g| &g.goal)
    }

    pub fn goal_id(&self) -> &GoalID {
        &self.inner.goal_id
    }

    pub fn goal_status(&self) -> GoalStatus {
        self.inner.machine.lock().status().clone()
    }

    pub fn destruction_time(&self) -> Time {
        *self.inner.destruction_time.lock()
    }

    pub fn set_destruction_time(&self, t: Time) {
        *self.inner.destruction_time.lock() = t;
    }
}

impl<A: ZAction> PartialEq for ServerGoalHandle<A> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.goal_id.id == other.inner.goal_id.id
    }
}

impl<A: ZAction> Eq for ServerGoalHandle<A> {}

impl<A: ZAction> Hash for ServerGoalHandle<A> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.goal_id.id.hash(state);
    }
}

impl<A: ZAction> fmt::Debug for ServerGoalHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerGoalHandle")
            .field("goal_id", &self.inner.goal_id)
            .field("status", &self.goal_status().status)
            .finish()
    }
}
