//! Client-side communication state machine.
//!
//! The client never sees the server's state directly; it replays every
//! observed [`GoalStatus`] through a fixed table that yields the ordered list
//! of communication states it must pass through. Callers fire their
//! transition callback once per listed state, so intermediate states are
//! never skipped even if the network only delivered the final status.

use super::messages::{ActionResult, GoalID, GoalStatus};
use crate::error::ActionError;

/// What the client believes about the conversation with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CommState {
    #[strum(serialize = "WAITING_FOR_GOAL_ACK")]
    WaitingForGoalAck,
    #[strum(serialize = "PENDING")]
    Pending,
    #[strum(serialize = "ACTIVE")]
    Active,
    #[strum(serialize = "WAITING_FOR_RESULT")]
    WaitingForResult,
    #[strum(serialize = "WAITING_FOR_CANCEL_ACK")]
    WaitingForCancelAck,
    #[strum(serialize = "RECALLING")]
    Recalling,
    #[strum(serialize = "PREEMPTING")]
    Preempting,
    #[strum(serialize = "DONE")]
    Done,
    #[strum(serialize = "LOST")]
    Lost,
}

use CommState::*;

const NONE: &[CommState] = &[];

/// Looks up the states to pass through when `status` is observed in `state`.
///
/// Illegal pairs (e.g. a goal already `Active` reported as `PENDING`) yield
/// [`ActionError::InvalidTransition`]; unknown status values yield
/// [`ActionError::UnknownStatus`].
pub fn transitions_for(state: CommState, status: u8) -> Result<&'static [CommState], ActionError> {
    if status > GoalStatus::RECALLED {
        return Err(ActionError::UnknownStatus(status));
    }
    let invalid = || ActionError::InvalidTransition { state, status };

    let next: &'static [CommState] = match state {
        WaitingForGoalAck => match status {
            GoalStatus::PENDING => &[Pending],
            GoalStatus::ACTIVE => &[Active],
            // a rejected goal was never cancelled
            GoalStatus::REJECTED => &[Pending, WaitingForResult],
            GoalStatus::RECALLING => &[Pending, Recalling],
            GoalStatus::RECALLED => &[Pending, WaitingForResult],
            GoalStatus::PREEMPTED => &[Active, Preempting, WaitingForResult],
            GoalStatus::SUCCEEDED | GoalStatus::ABORTED => &[Active, WaitingForResult],
            GoalStatus::PREEMPTING => &[Active, Preempting],
            _ => NONE,
        },
        Pending => match status {
            GoalStatus::PENDING => NONE,
            GoalStatus::ACTIVE => &[Active],
            GoalStatus::REJECTED => &[WaitingForResult],
            GoalStatus::RECALLING => &[Recalling],
            GoalStatus::RECALLED => &[Recalling, WaitingForResult],
            GoalStatus::PREEMPTED => &[Active, Preempting, WaitingForResult],
            GoalStatus::SUCCEEDED | GoalStatus::ABORTED => &[Active, WaitingForResult],
            GoalStatus::PREEMPTING => &[Active, Preempting],
            _ => NONE,
        },
        Active => match status {
            GoalStatus::PENDING
            | GoalStatus::REJECTED
            | GoalStatus::RECALLING
            | GoalStatus::RECALLED => return Err(invalid()),
            GoalStatus::PREEMPTED => &[Preempting, WaitingForResult],
            GoalStatus::SUCCEEDED | GoalStatus::ABORTED => &[WaitingForResult],
            GoalStatus::PREEMPTING => &[Preempting],
            _ => NONE,
        },
        WaitingForResult => match status {
            GoalStatus::PENDING | GoalStatus::RECALLING | GoalStatus::PREEMPTING => {
                return Err(invalid());
            }
            _ => NONE,
        },
        WaitingForCancelAck => match status {
            GoalStatus::REJECTED => &[WaitingForResult],
            GoalStatus::RECALLING => &[Recalling],
            GoalStatus::RECALLED => &[Recalling, WaitingForResult],
            // only a goal that was running can finish this way
            GoalStatus::PREEMPTED | GoalStatus::SUCCEEDED | GoalStatus::ABORTED => {
                &[Preempting, WaitingForResult]
            }
            GoalStatus::PREEMPTING => &[Preempting],
            _ => NONE,
        },
        Recalling => match status {
            GoalStatus::PENDING | GoalStatus::ACTIVE => return Err(invalid()),
            GoalStatus::REJECTED | GoalStatus::RECALLED => &[WaitingForResult],
            GoalStatus::PREEMPTED | GoalStatus::SUCCEEDED | GoalStatus::ABORTED => {
                &[Preempting, WaitingForResult]
            }
            GoalStatus::PREEMPTING => &[Preempting],
            _ => NONE,
        },
        Preempting => match status {
            GoalStatus::PENDING
            | GoalStatus::ACTIVE
            | GoalStatus::REJECTED
            | GoalStatus::RECALLING
            | GoalStatus::RECALLED => return Err(invalid()),
            GoalStatus::PREEMPTED | GoalStatus::SUCCEEDED | GoalStatus::ABORTED => {
                &[WaitingForResult]
            }
            _ => NONE,
        },
        Done => match status {
            GoalStatus::PENDING
            | GoalStatus::ACTIVE
            | GoalStatus::RECALLING
            | GoalStatus::PREEMPTING => return Err(invalid()),
            _ => NONE,
        },
        // Never stored as a live state: LOST is reported through the status.
        Lost => NONE,
    };
    Ok(next)
}

/// Per-goal client state: communication state, last status and result.
#[derive(Debug, Clone)]
pub struct ClientStateMachine<R> {
    state: CommState,
    status: GoalStatus,
    result: Option<ActionResult<R>>,
}

impl<R> Default for ClientStateMachine<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ClientStateMachine<R> {
    pub fn new() -> Self {
        Self {
            state: WaitingForGoalAck,
            status: GoalStatus::new(GoalID::default(), GoalStatus::PENDING),
            result: None,
        }
    }

    pub fn state(&self) -> CommState {
        self.state
    }

    pub fn set_state(&mut self, state: CommState) {
        self.state = state;
    }

    pub fn goal_status(&self) -> &GoalStatus {
        &self.status
    }

    pub fn set_goal_status(&mut self, status: &GoalStatus) {
        self.status.goal_id = status.goal_id.clone();
        self.status.status = status.status;
        self.status.text = status.text.clone();
    }

    pub fn result(&self) -> Option<&ActionResult<R>> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: ActionResult<R>) {
        self.result = Some(result);
    }

    /// Forces the status to the client-only `LOST` value.
    pub fn mark_lost(&mut self) {
        self.status.status = GoalStatus::LOST;
    }

    /// States to pass through on observing `status` from the current state.
    pub fn transitions(&self, status: u8) -> Result<&'static [CommState], ActionError> {
        transitions_for(self.state, status)
    }
}
