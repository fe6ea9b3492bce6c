use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use haggle_core::{
    Checkpoint, ControlFlags, ConversationThread, EngineError, EventId, Sender, ThreadId,
};

pub mod checkpoints;
pub mod control;
pub mod dedup;
pub mod memory;
pub mod messages;
pub mod session;

pub use checkpoints::SqlCheckpointLog;
pub use control::SqlControlOverlay;
pub use dedup::SqlDedupLedger;
pub use memory::{
    InMemoryCheckpointLog, InMemoryControlOverlay, InMemoryDedupLedger, InMemoryMessageLog,
    InMemorySessionStore,
};
pub use messages::SqlMessageLog;
pub use session::SqlSessionStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for EngineError {
    fn from(value: RepositoryError) -> Self {
        EngineError::StoreUnavailable(value.to_string())
    }
}

/// Durable, TTL-bounded conversation state keyed by thread identity. Owns
/// round numbering; round advancement is an atomic increment, never a
/// read-then-write.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the thread, creating a default one if absent. A thread idle
    /// past `ttl` comes back with history/offer state discarded but the
    /// round preserved.
    async fn get(
        &self,
        thread_id: &ThreadId,
        ttl: Duration,
    ) -> Result<ConversationThread, RepositoryError>;

    /// Upsert; refreshes `last_active`.
    async fn save(&self, thread: &ConversationThread) -> Result<(), RepositoryError>;

    /// Atomic round increment, resetting per-round columns in the same
    /// statement. Only called once the current round is terminal.
    async fn advance_round(&self, thread_id: &ThreadId) -> Result<u32, RepositoryError>;

    /// Best-effort cleanup of checkpoints for rounds other than `keep_round`.
    async fn purge_round_artifacts(
        &self,
        thread_id: &ThreadId,
        keep_round: u32,
    ) -> Result<u64, RepositoryError>;
}

/// Deduplication and per-sender throttling in front of the orchestrator.
/// Channel webhooks redeliver on timeout; without this gate the engine
/// would double-process and double-send.
#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Set-if-not-exists with expiry. Returns false when `event_id` was
    /// already admitted within `ttl`.
    async fn admit(&self, event_id: &EventId, ttl: Duration) -> Result<bool, RepositoryError>;

    /// Releases an admitted `event_id`. Called when a turn fails before the
    /// event was processed, so the channel's redelivery is admitted again.
    async fn forget(&self, event_id: &EventId) -> Result<(), RepositoryError>;

    /// Fixed-window counter; the first increment in a window opens it.
    /// Returns false once `max_calls` is exceeded.
    async fn rate_limit(
        &self,
        thread_id: &ThreadId,
        max_calls: u32,
        window: Duration,
    ) -> Result<bool, RepositoryError>;
}

/// Per-thread, per-round message log with sender tags.
#[async_trait]
pub trait MessageLog: Send + Sync {
    async fn record(
        &self,
        thread_id: &ThreadId,
        round: u32,
        sender: Sender,
        body: &str,
    ) -> Result<(), RepositoryError>;

    async fn count_for_round(
        &self,
        thread_id: &ThreadId,
        round: u32,
        sender: Option<Sender>,
    ) -> Result<u64, RepositoryError>;
}

/// Append-only stage/decision snapshots keyed by (thread, round).
#[async_trait]
pub trait CheckpointLog: Send + Sync {
    async fn append(&self, checkpoint: Checkpoint) -> Result<(), RepositoryError>;

    async fn list_for_round(
        &self,
        thread_id: &ThreadId,
        round: u32,
    ) -> Result<Vec<Checkpoint>, RepositoryError>;
}

/// Read-mostly human-takeover / pause switches. Writes happen out-of-band
/// from an admin action, never from the engine itself.
#[async_trait]
pub trait ControlOverlayStore: Send + Sync {
    async fn get_control(&self, thread_id: &ThreadId) -> Result<ControlFlags, RepositoryError>;
}
