use std::sync::atomic::{AtomicUsize, Ordering};

use super::messages::GoalID;
use crate::time::Time;

/// Produces goal ids that are unique within one node's lifetime.
///
/// Ids look like `<node>-<counter>-<sec>-<nsec>`; the counter alone
/// guarantees uniqueness, the stamp keeps ids readable across restarts.
#[derive(Debug)]
pub struct GoalIdGenerator {
    node_name: String,
    goals: AtomicUsize,
}

impl GoalIdGenerator {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            goals: AtomicUsize::new(0),
        }
    }

    pub fn generate_id(&self) -> String {
        let n = self.goals.fetch_add(1, Ordering::AcqRel) + 1;
        let now = Time::now();
        format!("{}-{}-{}-{}", self.node_name, n, now.sec, now.nsec)
    }

    /// A fresh [`GoalID`] stamped with the current time.
    pub fn generate(&self) -> GoalID {
        GoalID::new(self.generate_id(), Time::now())
    }
}
