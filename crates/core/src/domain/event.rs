use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::thread::ThreadId;

/// Channel-provided message id; the dedup key. Processing the same id twice
/// within the dedup TTL must be a no-op on the second attempt.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A single channel-normalized inbound message, as handed to the engine by
/// the webhook boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event_id: EventId,
    pub thread_id: ThreadId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(event_id: impl Into<String>, thread_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            event_id: EventId(event_id.into()),
            thread_id: ThreadId(thread_id.into()),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}
