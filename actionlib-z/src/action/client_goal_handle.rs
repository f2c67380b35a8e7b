use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, error, trace, warn};

use super::ZAction;
use super::client::GoalCallbacks;
use super::client_state::{ClientStateMachine, CommState};
use super::messages::{
    ActionFeedback, ActionGoal, ActionResult, GoalID, GoalStatus, GoalStatusArray,
};
use crate::error::ActionError;
use crate::time::Time;

/// The owning action client, as seen by its goal handles.
pub(crate) trait GoalManager<A: ZAction>: Send + Sync {
    fn publish_goal(&self, goal: &ActionGoal<A::Goal>) -> Result<(), ActionError>;
    fn publish_cancel(&self, goal_id: &GoalID) -> Result<(), ActionError>;
    fn remove_handle(&self, handle: &ClientGoalHandle<A>);
}

type Machine<A> = RefCell<Option<ClientStateMachine<<A as ZAction>::Result>>>;

struct HandleInner<A: ZAction> {
    goal: ActionGoal<A::Goal>,
    // None once the handle has been shut down
    machine: ReentrantMutex<Machine<A>>,
    callbacks: GoalCallbacks<A>,
    manager: Weak<dyn GoalManager<A>>,
}

/// Client-side view of one goal sent through a [`ZActionClient`].
///
/// The handle replays every status the server broadcasts for its goal through
/// the client transition table and fires the transition callback once per
/// state passed. Callbacks run on the node's spinner thread while the
/// handle's lock is held, so they may call back into the handle freely.
///
/// [`ZActionClient`]: super::ZActionClient
pub struct ClientGoalHandle<A: ZAction> {
    inner: Arc<HandleInner<A>>,
}

impl<A: ZAction> Clone for ClientGoalHandle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: ZAction> ClientGoalHandle<A> {
    pub(crate) fn new(
        goal: ActionGoal<A::Goal>,
        callbacks: GoalCallbacks<A>,
        manager: Weak<dyn GoalManager<A>>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                goal,
                machine: ReentrantMutex::new(RefCell::new(Some(ClientStateMachine::new()))),
                callbacks,
                manager,
            }),
        }
    }

    fn manager(&self) -> Result<Arc<dyn GoalManager<A>>, ActionError> {
        self.inner
            .manager
            .upgrade()
            .ok_or_else(|| ActionError::Transport("action client has shut down".into()))
    }

    fn read<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&ClientStateMachine<A::Result>) -> T,
    ) -> Result<T, ActionError> {
        let guard = self.inner.machine.lock();
        let cell = guard.borrow();
        cell.as_ref().map(f).ok_or(ActionError::InactiveHandle(op))
    }

    pub fn goal_id(&self) -> &GoalID {
        &self.inner.goal.goal_id
    }

    pub fn goal(&self) -> &A::Goal {
        &self.inner.goal.goal
    }

    pub fn comm_state(&self) -> Result<CommState, ActionError> {
        self.read("get the comm state", |m| m.state())
    }

    /// The last status the server reported for this goal.
    pub fn goal_status(&self) -> Result<GoalStatus, ActionError> {
        self.read("get the goal status", |m| m.goal_status().clone())
    }

    pub fn goal_status_text(&self) -> Result<String, ActionError> {
        self.read("get the goal status text", |m| m.goal_status().text.clone())
    }

    /// The final status of the goal.
    ///
    /// Asking before the handle reached `DONE` only warns. A status that is
    /// not terminal is reported as `LOST`.
    pub fn terminal_state(&self) -> Result<u8, ActionError> {
        let (state, status) = self.read("get the terminal state", |m| {
            (m.state(), m.goal_status().status)
        })?;
        if state != CommState::Done {
            warn!(
                "[ActionClient] Asking for the terminal state of goal {} while in {}",
                self.goal_id().id,
                state
            );
        }
        if GoalStatus::is_terminal(status) {
            return Ok(status);
        }
        warn!(
            "[ActionClient] Asking for the terminal state of goal {}, but its status is {}",
            self.goal_id().id,
            GoalStatus::status_name(status)
        );
        Ok(GoalStatus::LOST)
    }

    pub fn result(&self) -> Result<A::Result, ActionError> {
        self.read("get the result", |m| m.result().map(|r| r.result.clone()))?
            .ok_or_else(|| ActionError::NoResult(self.goal_id().id.clone()))
    }

    /// Publishes the goal again without touching the local state.
    pub fn resend(&self) -> Result<(), ActionError> {
        self.read("resend", |_| ())?;
        self.manager()?.publish_goal(&self.inner.goal)
    }

    /// Asks the server to cancel this goal.
    ///
    /// Every call publishes a fresh cancel request. Before the server has
    /// acknowledged a cancel the handle moves to `WAITING_FOR_CANCEL_ACK`;
    /// once it is recalling, preempting, waiting for its result or done the
    /// request is republished and the local state is left alone.
    pub fn cancel(&self) -> Result<(), ActionError> {
        let guard = self.inner.machine.lock();
        let state = {
            let cell = guard.borrow();
            cell.as_ref()
                .map(|m| m.state())
                .ok_or(ActionError::InactiveHandle("cancel"))?
        };

        let cancel = GoalID::new(self.goal_id().id.clone(), Time::now());
        self.manager()?.publish_cancel(&cancel)?;
        match state {
            CommState::WaitingForGoalAck
            | CommState::Pending
            | CommState::Active
            | CommState::WaitingForCancelAck => {
                self.apply_states(&guard, &[CommState::WaitingForCancelAck]);
            }
            _ => debug!(
                "[ActionClient] Republished cancel for goal {} in state {}",
                self.goal_id().id,
                state
            ),
        }
        Ok(())
    }

    /// True once the handle was shut down or its client is gone.
    pub fn is_expired(&self) -> bool {
        self.inner.machine.lock().borrow().is_none() || self.inner.manager.strong_count() == 0
    }

    /// Detaches the handle; every later call fails with `InactiveHandle`.
    ///
    /// With `delete_from_manager` the client also stops routing messages to it.
    pub fn shutdown(&self, delete_from_manager: bool) {
        {
            let guard = self.inner.machine.lock();
            if guard.borrow_mut().take().is_none() {
                return;
            }
        }
        trace!("[ActionClient] Shut down handle for goal {}", self.goal_id().id);
        if delete_from_manager {
            if let Some(manager) = self.inner.manager.upgrade() {
                manager.remove_handle(self);
            }
        }
    }

    /// Moves through `states` in order, firing the transition callback for each.
    fn apply_states(&self, guard: &ReentrantMutexGuard<'_, Machine<A>>, states: &[CommState]) {
        for &state in states {
            {
                let mut cell = guard.borrow_mut();
                let Some(machine) = cell.as_mut() else {
                    return;
                };
                debug!(
                    "[ActionClient] Goal {}: {} -> {}",
                    self.goal_id().id,
                    machine.state(),
                    state
                );
                machine.set_state(state);
            }
            if let Some(callback) = &self.inner.callbacks.on_transition {
                callback(self);
            }
        }
    }

    pub(crate) fn update_status(&self, status_array: &GoalStatusArray) {
        let guard = self.inner.machine.lock();
        let id = &self.goal_id().id;
        let entry = status_array.status_list.iter().find(|s| &s.goal_id.id == id);

        let next: &'static [CommState] = {
            let mut cell = guard.borrow_mut();
            let Some(machine) = cell.as_mut() else {
                return;
            };
            match entry {
                Some(status) => {
                    machine.set_goal_status(status);
                    match machine.transitions(status.status) {
                        Ok(next) => next,
                        Err(e) => {
                            error!("[ActionClient] Goal {}: {}", id, e);
                            return;
                        }
                    }
                }
                None => match machine.state() {
                    CommState::WaitingForGoalAck
                    | CommState::WaitingForResult
                    | CommState::Done => return,
                    state => {
                        machine.mark_lost();
                        warn!(
                            "[ActionClient] Goal {} disappeared from the status list \
                             while in {}, marking it LOST",
                            id, state
                        );
                        &[CommState::Done]
                    }
                },
            }
        };
        self.apply_states(&guard, next);
    }

    pub(crate) fn update_feedback(&self, feedback: &ActionFeedback<A::Feedback>) {
        if feedback.status.goal_id.id != self.goal_id().id {
            return;
        }
        let guard = self.inner.machine.lock();
        let done = match guard.borrow().as_ref() {
            Some(machine) => machine.state() == CommState::Done,
            None => return,
        };
        if done {
            return;
        }
        if let Some(callback) = &self.inner.callbacks.on_feedback {
            callback(self, &feedback.feedback);
        }
    }

    pub(crate) fn update_result(
        &self,
        result: &ActionResult<A::Result>,
    ) -> Result<(), ActionError> {
        if result.status.goal_id.id != self.goal_id().id {
            return Ok(());
        }
        let guard = self.inner.machine.lock();
        {
            let mut cell = guard.borrow_mut();
            let Some(machine) = cell.as_mut() else {
                return Ok(());
            };
            match machine.state() {
                CommState::Done => return Err(ActionError::ResultReceivedTwice),
                CommState::Lost => return Err(ActionError::UnexpectedState(CommState::Lost)),
                _ => {}
            }
            machine.set_goal_status(&result.status);
            machine.set_result(result.clone());
        }

        self.update_status(&GoalStatusArray {
            header: result.header.clone(),
            status_list: vec![result.status.clone()],
        });

        let done = match guard.borrow().as_ref() {
            Some(machine) => machine.state() == CommState::Done,
            None => return Ok(()),
        };
        if !done {
            self.apply_states(&guard, &[CommState::Done]);
        }
        Ok(())
    }
}

impl<A: ZAction> PartialEq for ClientGoalHandle<A> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A: ZAction> Eq for ClientGoalHandle<A> {}

impl<A: ZAction> fmt::Debug for ClientGoalHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientGoalHandle")
            .field("goal_id", self.goal_id())
            .field("comm_state", &self.comm_state().ok())
            .finish()
    }
}
