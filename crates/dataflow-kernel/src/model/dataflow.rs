//! The top-level execution instance.

use crate::ids::DataflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Dataflow lifecycle status. Transitions are monotone toward a terminal value;
/// once terminal, no further node status changes are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
    Terminated,
}

impl DataflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Canceled | Self::Terminated
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataflow {
    pub id: DataflowId,
    pub owner: String,
    pub status: DataflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub parent_dataflow_id: Option<DataflowId>,
    pub metadata: HashMap<String, Value>,
}

impl Dataflow {
    pub fn new(owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DataflowId::new(),
            owner: owner.into(),
            status: DataflowStatus::Pending,
            created_at: now,
            updated_at: now,
            parent_dataflow_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Applies a status transition if `next` does not regress past a terminal
    /// status. Unlike node transitions the dataflow lattice has only one
    /// illegal move: leaving a terminal state.
    pub fn transition(&mut self, next: DataflowStatus) -> Result<(), (DataflowStatus, DataflowStatus)> {
        if self.status.is_terminal() {
            return Err((self.status, next));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_rejects_further_transitions() {
        let mut df = Dataflow::new("alice");
        df.transition(DataflowStatus::Running).unwrap();
        df.transition(DataflowStatus::Completed).unwrap();
        let err = df.transition(DataflowStatus::Running).unwrap_err();
        assert_eq!(err, (DataflowStatus::Completed, DataflowStatus::Running));
    }

    #[test]
    fn fresh_dataflow_is_pending() {
        let df = Dataflow::new("bob");
        assert_eq!(df.status, DataflowStatus::Pending);
        assert!(!df.status.is_terminal());
    }
}
