//! Single-goal convenience client.
//!
//! Tracks at most one goal at a time and folds its communication states into
//! three: pending, active and done. Sending a new goal stops tracking the
//! previous one without cancelling it.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};
use zenoh::Result;

use super::ZAction;
use super::client::{GoalCallbacks, ZActionClient, ZActionClientBuilder};
use super::client_goal_handle::ClientGoalHandle;
use super::client_state::CommState;
use super::messages::GoalStatus;
use crate::Builder;
use crate::config::ActionClientConfig;
use crate::error::ActionError;
use crate::time::Time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum SimpleState {
    #[strum(serialize = "PENDING")]
    Pending,
    #[strum(serialize = "ACTIVE")]
    Active,
    #[strum(serialize = "DONE")]
    Done,
}

pub type DoneCallback<A> = Arc<dyn Fn(u8, Option<<A as ZAction>::Result>) + Send + Sync>;
pub type ActiveCallback = Arc<dyn Fn() + Send + Sync>;
pub type SimpleFeedbackCallback<A> = Arc<dyn Fn(&<A as ZAction>::Feedback) + Send + Sync>;

/// Callbacks for a goal sent through [`ZSimpleActionClient`].
pub struct SimpleGoalCallbacks<A: ZAction> {
    /// Receives the terminal status and the result, if one arrived.
    pub on_done: Option<DoneCallback<A>>,
    pub on_active: Option<ActiveCallback>,
    pub on_feedback: Option<SimpleFeedbackCallback<A>>,
}

impl<A: ZAction> Default for SimpleGoalCallbacks<A> {
    fn default() -> Self {
        Self {
            on_done: None,
            on_active: None,
            on_feedback: None,
        }
    }
}

impl<A: ZAction> Clone for SimpleGoalCallbacks<A> {
    fn clone(&self) -> Self {
        Self {
            on_done: self.on_done.clone(),
            on_active: self.on_active.clone(),
            on_feedback: self.on_feedback.clone(),
        }
    }
}

impl<A: ZAction> SimpleGoalCallbacks<A> {
    pub fn with_done<F>(mut self, callback: F) -> Self
    where
        F: Fn(u8, Option<A::Result>) + Send + Sync + 'static,
    {
        self.on_done = Some(Arc::new(callback));
        self
    }

    pub fn with_active<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_active = Some(Arc::new(callback));
        self
    }

    pub fn with_feedback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&A::Feedback) + Send + Sync + 'static,
    {
        self.on_feedback = Some(Arc::new(callback));
        self
    }
}

struct Tracking<A: ZAction> {
    simple_state: SimpleState,
    handle: Option<ClientGoalHandle<A>>,
    callbacks: SimpleGoalCallbacks<A>,
}

struct SimpleShared<A: ZAction> {
    tracking: Mutex<Tracking<A>>,
    done: Condvar,
}

impl<A: ZAction> SimpleShared<A> {
    fn handle_transition(&self, gh: &ClientGoalHandle<A>) {
        let comm_state = match gh.comm_state() {
            Ok(state) => state,
            Err(e) => {
                error!("[SimpleActionClient] {}", e);
                return;
            }
        };
        let mut tracking = self.tracking.lock();
        if tracking.handle.as_ref() != Some(gh) {
            return;
        }

        match comm_state {
            CommState::Active | CommState::Preempting => match tracking.simple_state {
                SimpleState::Pending => {
                    debug!("[SimpleActionClient] Goal {} is active", gh.goal_id().id);
                    tracking.simple_state = SimpleState::Active;
                    let callback = tracking.callbacks.on_active.clone();
                    drop(tracking);
                    if let Some(callback) = callback {
                        callback();
                    }
                }
                SimpleState::Active => {}
                SimpleState::Done => error!(
                    "[SimpleActionClient] In DONE but received comm state {}",
                    comm_state
                ),
            },
            CommState::Recalling => {
                if tracking.simple_state != SimpleState::Pending {
                    error!(
                        "[SimpleActionClient] In {} but received comm state RECALLING",
                        tracking.simple_state
                    );
                }
            }
            CommState::Done => match tracking.simple_state {
                SimpleState::Pending | SimpleState::Active => {
                    debug!("[SimpleActionClient] Goal {} is done", gh.goal_id().id);
                    tracking.simple_state = SimpleState::Done;
                    let callback = tracking.callbacks.on_done.clone();
                    self.done.notify_all();
                    drop(tracking);
                    if let Some(callback) = callback {
                        let status = gh.terminal_state().unwrap_or(GoalStatus::LOST);
                        callback(status, gh.result().ok());
                    }
                }
                SimpleState::Done => error!("[SimpleActionClient] Received DONE twice"),
            },
            _ => {}
        }
    }

    fn handle_feedback(&self, gh: &ClientGoalHandle<A>, feedback: &A::Feedback) {
        let callback = {
            let tracking = self.tracking.lock();
            if tracking.handle.as_ref() != Some(gh) {
                return;
            }
            tracking.callbacks.on_feedback.clone()
        };
        if let Some(callback) = callback {
            callback(feedback);
        }
    }
}

pub struct ZSimpleActionClientBuilder<A: ZAction> {
    pub inner: ZActionClientBuilder<A>,
}

impl<A: ZAction> ZSimpleActionClientBuilder<A> {
    pub fn with_config(mut self, config: ActionClientConfig) -> Self {
        self.inner = self.inner.with_config(config);
        self
    }
}

impl<A: ZAction> Builder for ZSimpleActionClientBuilder<A> {
    type Output = ZSimpleActionClient<A>;

    #[tracing::instrument(name = "simple_action_client_build", skip(self), fields(
        action = %self.inner.action_name
    ))]
    fn build(self) -> Result<Self::Output> {
        Ok(ZSimpleActionClient {
            client: self.inner.build()?,
            shared: Arc::new(SimpleShared {
                tracking: Mutex::new(Tracking {
                    simple_state: SimpleState::Done,
                    handle: None,
                    callbacks: SimpleGoalCallbacks::default(),
                }),
                done: Condvar::new(),
            }),
        })
    }
}

pub struct ZSimpleActionClient<A: ZAction> {
    client: ZActionClient<A>,
    shared: Arc<SimpleShared<A>>,
}

impl<A: ZAction> ZSimpleActionClient<A> {
    fn tracked(&self) -> Option<ClientGoalHandle<A>> {
        self.shared.tracking.lock().handle.clone()
    }

    /// Sends `goal`, replacing whichever goal was tracked before.
    pub fn send_goal(
        &self,
        goal: A::Goal,
        callbacks: SimpleGoalCallbacks<A>,
    ) -> std::result::Result<(), ActionError> {
        self.stop_tracking_goal();

        let weak: Weak<SimpleShared<A>> = Arc::downgrade(&self.shared);
        let on_transition = weak.clone();
        let goal_callbacks = GoalCallbacks::default()
            .with_transition(move |gh: &ClientGoalHandle<A>| {
                if let Some(shared) = on_transition.upgrade() {
                    shared.handle_transition(gh);
                }
            })
            .with_feedback(move |gh: &ClientGoalHandle<A>, feedback: &A::Feedback| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_feedback(gh, feedback);
                }
            });

        // held until the handle is stored so its first transition is not dropped
        let mut tracking = self.shared.tracking.lock();
        tracking.simple_state = SimpleState::Pending;
        tracking.callbacks = callbacks;
        let handle = self.client.send_goal_with(goal, goal_callbacks)?;
        tracking.handle = Some(handle);
        Ok(())
    }

    /// Sends `goal` and blocks until it finishes.
    ///
    /// If it is still running after `execute_timeout` the goal is cancelled and
    /// given `preempt_timeout` to wind down. Zero timeouts wait forever.
    pub fn send_goal_and_wait(
        &self,
        goal: A::Goal,
        execute_timeout: Duration,
        preempt_timeout: Duration,
    ) -> std::result::Result<u8, ActionError> {
        self.send_goal(goal, SimpleGoalCallbacks::default())?;
        if self.wait_for_result(execute_timeout) {
            debug!("[SimpleActionClient] Goal finished within the specified execute timeout");
        } else {
            debug!("[SimpleActionClient] Cancelling goal after {:?}", execute_timeout);
            self.cancel_goal()?;
            if self.wait_for_result(preempt_timeout) {
                debug!(
                    "[SimpleActionClient] Preempt finished within the specified preempt timeout"
                );
            } else {
                debug!(
                    "[SimpleActionClient] Preempt did not finish within the preempt timeout"
                );
            }
        }
        self.state()
    }

    /// Blocks until the tracked goal is done. A zero `timeout` waits forever.
    ///
    /// Returns false on timeout or when no goal is tracked.
    pub fn wait_for_result(&self, timeout: Duration) -> bool {
        let poll = self.client.config().result_poll_period;
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut tracking = self.shared.tracking.lock();
        if tracking.handle.is_none() {
            error!("[SimpleActionClient] Called wait_for_result when no goal exists");
            return false;
        }
        while tracking.simple_state != SimpleState::Done {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(poll)
                }
                None => poll,
            };
            self.shared.done.wait_for(&mut tracking, wait);
            if !self.client.node().is_ok() {
                break;
            }
        }
        tracking.simple_state == SimpleState::Done
    }

    pub fn wait_for_server(&self, timeout: Duration) -> bool {
        self.client.wait_for_server(timeout)
    }

    /// Status of the tracked goal, with RECALLING reported as PENDING and
    /// PREEMPTING as ACTIVE.
    pub fn state(&self) -> std::result::Result<u8, ActionError> {
        let handle = self.tracked().ok_or(ActionError::NoGoal)?;
        let status = match handle.goal_status()?.status {
            GoalStatus::RECALLING => GoalStatus::PENDING,
            GoalStatus::PREEMPTING => GoalStatus::ACTIVE,
            status => status,
        };
        Ok(status)
    }

    pub fn simple_state(&self) -> SimpleState {
        self.shared.tracking.lock().simple_state
    }

    pub fn goal_status_text(&self) -> std::result::Result<String, ActionError> {
        self.tracked()
            .ok_or(ActionError::NoGoal)?
            .goal_status_text()
    }

    pub fn result(&self) -> std::result::Result<A::Result, ActionError> {
        self.tracked().ok_or(ActionError::NoGoal)?.result()
    }

    /// Cancels the tracked goal; without one this only logs.
    pub fn cancel_goal(&self) -> std::result::Result<(), ActionError> {
        match self.tracked() {
            Some(handle) => handle.cancel(),
            None => {
                error!("[SimpleActionClient] Called cancel_goal when no goal exists");
                Ok(())
            }
        }
    }

    pub fn cancel_all_goals(&self) -> std::result::Result<(), ActionError> {
        self.client.cancel_all_goals()
    }

    pub fn cancel_all_goals_before_time(
        &self,
        stamp: Time,
    ) -> std::result::Result<(), ActionError> {
        self.client.cancel_all_goals_before_time(stamp)
    }

    /// Forgets the tracked goal without cancelling it.
    pub fn stop_tracking_goal(&self) {
        let handle = self.shared.tracking.lock().handle.take();
        if let Some(handle) = handle {
            handle.shutdown(true);
        }
    }

    pub fn client(&self) -> &ZActionClient<A> {
        &self.client
    }
}
