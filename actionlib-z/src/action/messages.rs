//! Wire messages of the action protocol.
//!
//! These mirror `std_msgs/Header` and the `actionlib_msgs` package. Every
//! action is carried over five topics using these envelopes around the
//! user's goal, feedback and result payloads.

use serde::{Deserialize, Serialize};

use crate::time::Time;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub seq: u32,
    pub stamp: Time,
    pub frame_id: String,
}

impl Header {
    /// A header stamped with the current time.
    pub fn now() -> Self {
        Self {
            stamp: Time::now(),
            ..Default::default()
        }
    }
}

/// Identifies one goal. An empty `id` with a zero `stamp` addresses every goal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GoalID {
    pub stamp: Time,
    pub id: String,
}

impl GoalID {
    pub fn new(id: impl Into<String>, stamp: Time) -> Self {
        Self {
            stamp,
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalStatus {
    pub goal_id: GoalID,
    pub status: u8,
    pub text: String,
}

impl GoalStatus {
    /// The goal has yet to be processed by the action server.
    pub const PENDING: u8 = 0;
    /// The goal is currently being processed by the action server.
    pub const ACTIVE: u8 = 1;
    /// The goal received a cancel request after it started executing and has
    /// since completed its execution.
    pub const PREEMPTED: u8 = 2;
    pub const SUCCEEDED: u8 = 3;
    pub const ABORTED: u8 = 4;
    /// The goal was rejected by the action server without being processed.
    pub const REJECTED: u8 = 5;
    /// The goal received a cancel request after it started executing and has
    /// not yet completed execution.
    pub const PREEMPTING: u8 = 6;
    /// The goal received a cancel request before it started executing, but the
    /// action server has not yet confirmed that the goal is canceled.
    pub const RECALLING: u8 = 7;
    /// The goal received a cancel request before it started executing and was
    /// successfully cancelled.
    pub const RECALLED: u8 = 8;
    /// Client side only: the goal disappeared from the server's status list.
    pub const LOST: u8 = 9;

    pub fn new(goal_id: GoalID, status: u8) -> Self {
        Self {
            goal_id,
            status,
            text: String::new(),
        }
    }

    /// Whether `status` is a final status a goal can never leave.
    pub fn is_terminal(status: u8) -> bool {
        matches!(
            status,
            Self::PREEMPTED
                | Self::SUCCEEDED
                | Self::ABORTED
                | Self::REJECTED
                | Self::RECALLED
                | Self::LOST
        )
    }

    pub fn status_name(status: u8) -> &'static str {
        match status {
            Self::PENDING => "PENDING",
            Self::ACTIVE => "ACTIVE",
            Self::PREEMPTED => "PREEMPTED",
            Self::SUCCEEDED => "SUCCEEDED",
            Self::ABORTED => "ABORTED",
            Self::REJECTED => "REJECTED",
            Self::PREEMPTING => "PREEMPTING",
            Self::RECALLING => "RECALLING",
            Self::RECALLED => "RECALLED",
            Self::LOST => "LOST",
            _ => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalStatusArray {
    pub header: Header,
    pub status_list: Vec<GoalStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionGoal<G> {
    pub header: Header,
    pub goal_id: GoalID,
    pub goal: G,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionFeedback<F> {
    pub header: Header,
    pub status: GoalStatus,
    pub feedback: F,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult<R> {
    pub header: Header,
    pub status: GoalStatus,
    pub result: R,
}
