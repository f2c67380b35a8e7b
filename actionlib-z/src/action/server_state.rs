//! Server-side goal status machine.

use super::messages::{GoalID, GoalStatus};
use crate::error::ActionError;

/// Events a server applies to one of its goals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ServerEvent {
    #[strum(serialize = "CANCEL_REQUEST")]
    CancelRequest,
    #[strum(serialize = "CANCEL")]
    Cancel,
    #[strum(serialize = "REJECT")]
    Reject,
    #[strum(serialize = "ACCEPT")]
    Accept,
    #[strum(serialize = "SUCCEED")]
    Succeed,
    #[strum(serialize = "ABORT")]
    Abort,
}

/// The server status table: `Some(next)` for legal pairs, `None` otherwise.
///
/// Terminal statuses accept no events at all.
pub fn next_status(status: u8, event: ServerEvent) -> Option<u8> {
    match (status, event) {
        (GoalStatus::PENDING, ServerEvent::Reject) => Some(GoalStatus::REJECTED),
        (GoalStatus::PENDING, ServerEvent::CancelRequest) => Some(GoalStatus::RECALLING),
        (GoalStatus::PENDING, ServerEvent::Cancel) => Some(GoalStatus::RECALLED),
        (GoalStatus::PENDING, ServerEvent::Accept) => Some(GoalStatus::ACTIVE),

        (GoalStatus::RECALLING, ServerEvent::Reject) => Some(GoalStatus::REJECTED),
        (GoalStatus::RECALLING, ServerEvent::Cancel) => Some(GoalStatus::RECALLED),
        (GoalStatus::RECALLING, ServerEvent::Accept) => Some(GoalStatus::PREEMPTING),

        (GoalStatus::ACTIVE, ServerEvent::Succeed) => Some(GoalStatus::SUCCEEDED),
        (GoalStatus::ACTIVE, ServerEvent::CancelRequest) => Some(GoalStatus::PREEMPTING),
        (GoalStatus::ACTIVE, ServerEvent::Cancel) => Some(GoalStatus::PREEMPTED),
        (GoalStatus::ACTIVE, ServerEvent::Abort) => Some(GoalStatus::ABORTED),

        (GoalStatus::PREEMPTING, ServerEvent::Succeed) => Some(GoalStatus::SUCCEEDED),
        (GoalStatus::PREEMPTING, ServerEvent::Cancel) => Some(GoalStatus::PREEMPTED),
        (GoalStatus::PREEMPTING, ServerEvent::Abort) => Some(GoalStatus::ABORTED),

        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct ServerStateMachine {
    status: GoalStatus,
}

impl ServerStateMachine {
    /// A machine for a freshly received goal, starting in `PENDING`.
    pub fn new(goal_id: GoalID) -> Self {
        Self::with_status(goal_id, GoalStatus::PENDING)
    }

    pub fn with_status(goal_id: GoalID, status: u8) -> Self {
        Self {
            status: GoalStatus::new(goal_id, status),
        }
    }

    pub fn status(&self) -> &GoalStatus {
        &self.status
    }

    /// Applies `event`, replacing the status text on success.
    ///
    /// On failure the status is left untouched.
    pub fn transition(
        &mut self,
        event: ServerEvent,
        text: &str,
    ) -> Result<GoalStatus, ActionError> {
        let next = next_status(self.status.status, event).ok_or(ActionError::InvalidEvent {
            status: self.status.status,
            event,
        })?;
        self.status.status = next;
        self.status.text = text.to_string();
        Ok(self.status.clone())
    }
}
