//! Single-goal convenience server.
//!
//! At most one goal is active at a time. A newer goal preempts the current one
//! and supersedes any goal still waiting to be accepted. With an execute
//! callback, a dedicated executor thread accepts each new goal and runs the
//! callback; without one, the application accepts goals itself from its goal
//! callback.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, info, warn};
use zenoh::Result;

use super::ZAction;
use super::messages::GoalStatus;
use super::server::{ZActionServer, ZActionServerBuilder};
use super::server_goal_handle::ServerGoalHandle;
use crate::Builder;
use crate::config::{ActionServerConfig, SimpleActionServerConfig};
use crate::error::ActionError;

const SUPERSEDED_TEXT: &str =
    "This goal was canceled because another goal was received by the simple action server";
const ACCEPTED_TEXT: &str = "This goal has been accepted by the simple action server";
const AUTO_ABORT_WARNING: &str = concat!(
    "Your executeCallback did not set the goal to a terminal status. ",
    "This is a bug in your ActionServer implementation. Fix your code! ",
    "For now, the ActionServer will set this goal to aborted"
);
const AUTO_ABORT_TEXT: &str = concat!(
    "This goal was aborted by the simple action server. ",
    "The user should have set a terminal status on this goal and did not"
);

pub type ExecuteCallback<A> =
    Arc<dyn Fn(<A as ZAction>::Goal, &ZSimpleActionServer<A>) + Send + Sync>;
pub type SimpleServerCallback<A> = Arc<dyn Fn(&ZSimpleActionServer<A>) + Send + Sync>;

struct SimpleGoals<A: ZAction> {
    current: Option<ServerGoalHandle<A>>,
    // stays equal to `current` once accepted
    next: Option<ServerGoalHandle<A>>,
    new_goal: bool,
    preempt_request: bool,
    new_goal_preempt_request: bool,
}

impl<A: ZAction> SimpleGoals<A> {
    fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|gh| {
            matches!(
                gh.goal_status().status,
                GoalStatus::ACTIVE | GoalStatus::PREEMPTING
            )
        })
    }
}

struct SimpleInner<A: ZAction> {
    server: ZActionServer<A>,
    // callbacks run with this lock held, hence reentrant
    goals: ReentrantMutex<RefCell<SimpleGoals<A>>>,
    execute_callback: Option<ExecuteCallback<A>>,
    goal_callback: RwLock<Option<SimpleServerCallback<A>>>,
    preempt_callback: RwLock<Option<SimpleServerCallback<A>>>,
    wake_tx: flume::Sender<()>,
    executor: Mutex<Option<JoinHandle<()>>>,
    need_to_terminate: AtomicBool,
}

fn cancel_superseded<A: ZAction>(gh: &ServerGoalHandle<A>) {
    if let Err(e) = gh.set_canceled(None, SUPERSEDED_TEXT) {
        error!(
            "[SimpleActionServer] Failed to cancel superseded goal {}: {}",
            gh.goal_id().id,
            e
        );
    }
}

impl<A: ZAction> SimpleInner<A> {
    fn view(self: &Arc<Self>) -> ZSimpleActionServer<A> {
        ZSimpleActionServer {
            inner: self.clone(),
        }
    }

    fn on_goal(self: &Arc<Self>, goal: ServerGoalHandle<A>) {
        let guard = self.goals.lock();
        info!(
            "[SimpleActionServer] A new goal {} has been received",
            goal.goal_id().id
        );
        let stamp = goal.goal_id().stamp;
        let newest = {
            let goals = guard.borrow();
            goals
                .current
                .as_ref()
                .is_none_or(|gh| stamp >= gh.goal_id().stamp)
                && goals
                    .next
                    .as_ref()
                    .is_none_or(|gh| stamp >= gh.goal_id().stamp)
        };
        if !newest {
            cancel_superseded(&goal);
            return;
        }

        let (superseded, active) = {
            let mut goals = guard.borrow_mut();
            let superseded = match goals.next.take() {
                Some(next) if goals.current.as_ref() != Some(&next) => Some(next),
                _ => None,
            };
            goals.next = Some(goal);
            goals.new_goal = true;
            goals.new_goal_preempt_request = false;
            let active = goals.is_active();
            if active {
                goals.preempt_request = true;
            }
            (superseded, active)
        };
        if let Some(superseded) = superseded {
            cancel_superseded(&superseded);
        }

        if active {
            let callback = self.preempt_callback.read().clone();
            if let Some(callback) = callback {
                callback(&self.view());
            }
        }
        let callback = self.goal_callback.read().clone();
        if let Some(callback) = callback {
            callback(&self.view());
        }
        drop(guard);

        if self.execute_callback.is_some() {
            if let Err(flume::TrySendError::Full(_)) = self.wake_tx.try_send(()) {
                error!("[SimpleActionServer] Executor wake-up queue is full");
            }
        }
    }

    fn on_preempt(self: &Arc<Self>, preempt: ServerGoalHandle<A>) {
        let guard = self.goals.lock();
        debug!(
            "[SimpleActionServer] A preempt has been received for goal {}",
            preempt.goal_id().id
        );
        let preempt_current = {
            let mut goals = guard.borrow_mut();
            if goals.current.as_ref() == Some(&preempt) {
                goals.preempt_request = true;
                true
            } else {
                if goals.next.as_ref() == Some(&preempt) {
                    goals.new_goal_preempt_request = true;
                }
                false
            }
        };
        if preempt_current {
            info!("[SimpleActionServer] Preempting the current goal");
            let callback = self.preempt_callback.read().clone();
            if let Some(callback) = callback {
                callback(&self.view());
            }
        }
    }

    fn accept_new_goal(&self) -> std::result::Result<A::Goal, ActionError> {
        let guard = self.goals.lock();
        let (previous, next) = {
            let mut goals = guard.borrow_mut();
            let next = match goals.next.clone() {
                Some(next) if goals.new_goal => next,
                _ => {
                    error!(
                        "[SimpleActionServer] Attempting to accept the next goal \
                         when a new goal is not available"
                    );
                    return Err(ActionError::NoNewGoal);
                }
            };
            let previous = if goals.is_active() && goals.current.as_ref() != Some(&next) {
                goals.current.clone()
            } else {
                None
            };
            goals.current = Some(next.clone());
            goals.new_goal = false;
            goals.preempt_request = goals.new_goal_preempt_request;
            goals.new_goal_preempt_request = false;
            (previous, next)
        };
        if let Some(previous) = previous {
            cancel_superseded(&previous);
        }

        debug!("[SimpleActionServer] Accepting goal {}", next.goal_id().id);
        next.set_accepted(ACCEPTED_TEXT)?;
        next.goal()
            .cloned()
            .ok_or(ActionError::UninitializedHandle("accept_new_goal"))
    }

    fn is_active(&self) -> bool {
        self.goals.lock().borrow().is_active()
    }

    fn with_current<T>(
        &self,
        f: impl FnOnce(&ServerGoalHandle<A>) -> std::result::Result<T, ActionError>,
    ) -> std::result::Result<T, ActionError> {
        let guard = self.goals.lock();
        let current = guard.borrow().current.clone();
        f(current.as_ref().ok_or(ActionError::NoGoal)?)
    }

    fn execute(self: &Arc<Self>) -> std::result::Result<(), ActionError> {
        let goal = {
            let guard = self.goals.lock();
            let (active, new_goal) = {
                let goals = guard.borrow();
                (goals.is_active(), goals.new_goal)
            };
            if active {
                return Err(ActionError::GoalAlreadyActive);
            }
            if !new_goal {
                return Ok(());
            }
            self.accept_new_goal()?
        };

        let callback = self
            .execute_callback
            .clone()
            .ok_or(ActionError::MissingExecuteCallback)?;
        callback(goal, &self.view());

        if self.is_active() {
            warn!("[SimpleActionServer] {}", AUTO_ABORT_WARNING);
            self.with_current(|gh| gh.set_aborted(None, AUTO_ABORT_TEXT))?;
        }
        Ok(())
    }

    fn shutdown(&self) {
        if self.need_to_terminate.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.wake_tx.try_send(());
        if let Some(executor) = self.executor.lock().take() {
            if executor.thread().id() != thread::current().id() && executor.join().is_err() {
                error!("[SimpleActionServer] Executor thread panicked");
            }
        }
        self.server.shutdown();
    }
}

fn executor_loop<A: ZAction>(
    inner: Weak<SimpleInner<A>>,
    wake: flume::Receiver<()>,
    period: Duration,
) {
    loop {
        if let Err(flume::RecvTimeoutError::Disconnected) = wake.recv_timeout(period) {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if inner.need_to_terminate.load(Ordering::Acquire) {
            break;
        }
        if let Err(e) = inner.execute() {
            error!("[SimpleActionServer] {}", e);
        }
    }
    debug!("[SimpleActionServer] Executor stopped");
}

/// Builder for [`ZSimpleActionServer`].
pub struct ZSimpleActionServerBuilder<A: ZAction> {
    pub inner: ZActionServerBuilder<A>,
    pub config: SimpleActionServerConfig,
    execute_callback: Option<ExecuteCallback<A>>,
    auto_start: bool,
}

impl<A: ZAction> ZSimpleActionServerBuilder<A> {
    pub fn new(inner: ZActionServerBuilder<A>, config: SimpleActionServerConfig) -> Self {
        Self {
            inner,
            config,
            execute_callback: None,
            auto_start: false,
        }
    }

    pub fn with_config(mut self, config: SimpleActionServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_server_config(mut self, config: ActionServerConfig) -> Self {
        self.inner = self.inner.with_config(config);
        self
    }

    /// Runs `callback` on the executor thread for every accepted goal.
    ///
    /// The callback must leave the goal in a terminal status; otherwise the
    /// goal is aborted when it returns.
    pub fn with_execute_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(A::Goal, &ZSimpleActionServer<A>) + Send + Sync + 'static,
    {
        self.execute_callback = Some(Arc::new(callback));
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

impl<A: ZAction> Builder for ZSimpleActionServerBuilder<A> {
    type Output = ZSimpleActionServer<A>;

    #[tracing::instrument(name = "simple_action_server_build", skip(self), fields(
        action = %self.inner.action_name,
        execute = self.execute_callback.is_some()
    ))]
    fn build(self) -> Result<Self::Output> {
        let mut server_builder = self.inner;
        server_builder.auto_start = false;
        let server = server_builder.build()?;

        let (wake_tx, wake_rx) = flume::bounded(self.config.wake_queue.max(1));
        let inner = Arc::new(SimpleInner {
            server,
            goals: ReentrantMutex::new(RefCell::new(SimpleGoals {
                current: None,
                next: None,
                new_goal: false,
                preempt_request: false,
                new_goal_preempt_request: false,
            })),
            execute_callback: self.execute_callback,
            goal_callback: RwLock::new(None),
            preempt_callback: RwLock::new(None),
            wake_tx,
            executor: Mutex::new(None),
            need_to_terminate: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.server.register_goal_callback(move |gh| {
            if let Some(inner) = weak.upgrade() {
                inner.on_goal(gh);
            }
        });
        let weak = Arc::downgrade(&inner);
        inner.server.register_cancel_callback(move |gh| {
            if let Some(inner) = weak.upgrade() {
                inner.on_preempt(gh);
            }
        });

        if inner.execute_callback.is_some() {
            let weak = Arc::downgrade(&inner);
            let period = self.config.executor_period;
            let executor = thread::Builder::new()
                .name(format!("exec:{}", inner.server.action_name()))
                .spawn(move || executor_loop(weak, wake_rx, period))?;
            *inner.executor.lock() = Some(executor);
        }

        if self.auto_start {
            inner.server.start()?;
        }
        Ok(ZSimpleActionServer { inner })
    }
}

/// A single-goal action server.
///
/// Cloning yields another handle to the same server. The executor thread
/// stops once every handle is dropped or [`ZSimpleActionServer::shutdown`] is
/// called.
pub struct ZSimpleActionServer<A: ZAction> {
    inner: Arc<SimpleInner<A>>,
}

impl<A: ZAction> Clone for ZSimpleActionServer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: ZAction> ZSimpleActionServer<A> {
    pub fn start(&self) -> Result<()> {
        self.inner.server.start()
    }

    /// Stops the executor and the underlying action server.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Promotes the pending goal to current and accepts it.
    ///
    /// A different goal that was still active is cancelled as superseded.
    pub fn accept_new_goal(&self) -> std::result::Result<A::Goal, ActionError> {
        self.inner.accept_new_goal()
    }

    pub fn is_new_goal_available(&self) -> bool {
        self.inner.goals.lock().borrow().new_goal
    }

    pub fn is_preempt_requested(&self) -> bool {
        self.inner.goals.lock().borrow().preempt_request
    }

    /// Whether the current goal is ACTIVE or PREEMPTING.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    pub fn set_succeeded(
        &self,
        result: Option<A::Result>,
        text: &str,
    ) -> std::result::Result<(), ActionError> {
        debug!("[SimpleActionServer] Setting the current goal as succeeded");
        self.inner.with_current(|gh| gh.set_succeeded(result, text))
    }

    pub fn set_aborted(
        &self,
        result: Option<A::Result>,
        text: &str,
    ) -> std::result::Result<(), ActionError> {
        debug!("[SimpleActionServer] Setting the current goal as aborted");
        self.inner.with_current(|gh| gh.set_aborted(result, text))
    }

    pub fn set_preempted(
        &self,
        result: Option<A::Result>,
        text: &str,
    ) -> std::result::Result<(), ActionError> {
        debug!("[SimpleActionServer] Setting the current goal as canceled");
        self.inner.with_current(|gh| gh.set_canceled(result, text))
    }

    pub fn publish_feedback(&self, feedback: A::Feedback) -> std::result::Result<(), ActionError> {
        self.inner.with_current(|gh| gh.publish_feedback(feedback))
    }

    pub fn default_result(&self) -> A::Result {
        A::Result::default()
    }

    /// Fails while an execute callback is set: the executor accepts goals itself.
    pub fn register_goal_callback<F>(&self, callback: F) -> std::result::Result<(), ActionError>
    where
        F: Fn(&ZSimpleActionServer<A>) + Send + Sync + 'static,
    {
        if self.inner.execute_callback.is_some() {
            warn!(
                "[SimpleActionServer] Cannot register a goal callback alongside an execute callback"
            );
            return Err(ActionError::ExecuteCallbackPresent);
        }
        *self.inner.goal_callback.write() = Some(Arc::new(callback));
        Ok(())
    }

    pub fn register_preempt_callback<F>(&self, callback: F)
    where
        F: Fn(&ZSimpleActionServer<A>) + Send + Sync + 'static,
    {
        *self.inner.preempt_callback.write() = Some(Arc::new(callback));
    }

    pub fn action_server(&self) -> &ZActionServer<A> {
        &self.inner.server
    }
}
