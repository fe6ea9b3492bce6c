use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::thread::ThreadId;
use crate::turn::TurnStage;

/// Append-only per-(thread, round) snapshot of where a turn ended up, kept
/// for audit and crash replay. Garbage-collected by `purge_round_artifacts`
/// once the round is superseded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub round: u32,
    pub stage: TurnStage,
    pub action: Option<String>,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(thread_id: ThreadId, round: u32, stage: TurnStage) -> Self {
        Self { thread_id, round, stage, action: None, detail: None, created_at: Utc::now() }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
