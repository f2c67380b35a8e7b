use crate::action::client_state::CommState;
use crate::action::messages::GoalStatus;
use crate::action::server_state::ServerEvent;

/// Failures of the action protocol layer.
///
/// Transport problems surface as [`ActionError::Transport`]; everything else is
/// a protocol or state error reported to the caller and never fatal.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid transition from {state} on goal status {}", status_label(.status))]
    InvalidTransition { state: CommState, status: u8 },

    #[error("cannot apply {event} to a goal in status {}", status_label(.status))]
    InvalidEvent { status: u8, event: ServerEvent },

    #[error("received unknown goal status value {0}")]
    UnknownStatus(u8),

    #[error("got a result when we are already in the DONE state")]
    ResultReceivedTwice,

    #[error("got a result in unexpected state {0}")]
    UnexpectedState(CommState),

    #[error("trying to {0} on an inactive client goal handle")]
    InactiveHandle(&'static str),

    #[error("attempt to {0} on an uninitialized server goal handle")]
    UninitializedHandle(&'static str),

    #[error("no result has been received for goal {0}")]
    NoResult(String),

    #[error("no goal is being tracked")]
    NoGoal,

    #[error("attempting to accept the next goal when a new goal is not available")]
    NoNewGoal,

    #[error("should never reach this code with an active goal")]
    GoalAlreadyActive,

    #[error("execute callback is present: not registering goal callback")]
    ExecuteCallbackPresent,

    #[error("execute callback must exist to run the goal executor")]
    MissingExecuteCallback,

    #[error("transport error: {0}")]
    Transport(zenoh::Error),
}

fn status_label(status: &u8) -> &'static str {
    GoalStatus::status_name(*status)
}

impl From<zenoh::Error> for ActionError {
    fn from(e: zenoh::Error) -> Self {
        ActionError::Transport(e)
    }
}
