use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use haggle_core::{
    Checkpoint, ControlFlags, ConversationThread, EventId, Sender, ThreadId,
};

use super::{
    CheckpointLog, ControlOverlayStore, DedupLedger, MessageLog, RepositoryError, SessionStore,
};

/// In-memory fakes mirroring the SQL repositories, for exercising the
/// orchestrator without a backing database.

#[derive(Default)]
pub struct InMemorySessionStore {
    threads: RwLock<HashMap<String, ConversationThread>>,
    checkpoints: Option<Arc<InMemoryCheckpointLog>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the checkpoint fake in so `purge_round_artifacts` has something
    /// to purge, as the SQL store does against `thread_checkpoints`.
    pub fn with_checkpoints(checkpoints: Arc<InMemoryCheckpointLog>) -> Self {
        Self { threads: RwLock::default(), checkpoints: Some(checkpoints) }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(
        &self,
        thread_id: &ThreadId,
        ttl: Duration,
    ) -> Result<ConversationThread, RepositoryError> {
        let threads = self.threads.read().await;
        let Some(thread) = threads.get(thread_id.as_str()) else {
            return Ok(ConversationThread::new(thread_id.clone()));
        };
        let mut thread = thread.clone();
        let expiry = thread.last_active + chrono::Duration::seconds(ttl.as_secs() as i64);
        if Utc::now() > expiry {
            thread.reset_expired();
        }
        Ok(thread)
    }

    async fn save(&self, thread: &ConversationThread) -> Result<(), RepositoryError> {
        let mut threads = self.threads.write().await;
        let mut thread = thread.clone();
        thread.last_active = Utc::now();
        threads.insert(thread.thread_id.as_str().to_owned(), thread);
        Ok(())
    }

    async fn advance_round(&self, thread_id: &ThreadId) -> Result<u32, RepositoryError> {
        let mut threads = self.threads.write().await;
        let Some(thread) = threads.get_mut(thread_id.as_str()) else {
            return Err(RepositoryError::Decode(format!(
                "cannot advance round for unknown thread `{}`",
                thread_id.as_str()
            )));
        };
        let new_round = thread.round + 1;
        thread.begin_round(new_round);
        thread.last_active = Utc::now();
        Ok(new_round)
    }

    async fn purge_round_artifacts(
        &self,
        thread_id: &ThreadId,
        keep_round: u32,
    ) -> Result<u64, RepositoryError> {
        match &self.checkpoints {
            Some(checkpoints) => checkpoints.purge_other_rounds(thread_id, keep_round).await,
            None => Ok(0),
        }
    }
}

#[derive(Default)]
pub struct InMemoryDedupLedger {
    admitted: RwLock<HashMap<String, DateTime<Utc>>>,
    windows: RwLock<HashMap<(String, i64), u32>>,
}

#[async_trait]
impl DedupLedger for InMemoryDedupLedger {
    async fn admit(&self, event_id: &EventId, ttl: Duration) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let mut admitted = self.admitted.write().await;
        if let Some(expires_at) = admitted.get(event_id.as_str()) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        admitted.insert(
            event_id.as_str().to_owned(),
            now + chrono::Duration::seconds(ttl.as_secs() as i64),
        );
        Ok(true)
    }

    async fn forget(&self, event_id: &EventId) -> Result<(), RepositoryError> {
        self.admitted.write().await.remove(event_id.as_str());
        Ok(())
    }

    async fn rate_limit(
        &self,
        thread_id: &ThreadId,
        max_calls: u32,
        window: Duration,
    ) -> Result<bool, RepositoryError> {
        let window_secs = window.as_secs().max(1) as i64;
        let window_start = Utc::now().timestamp() / window_secs * window_secs;
        let mut windows = self.windows.write().await;
        let calls = windows.entry((thread_id.as_str().to_owned(), window_start)).or_insert(0);
        *calls += 1;
        Ok(*calls <= max_calls)
    }
}

#[derive(Default)]
pub struct InMemoryMessageLog {
    rows: RwLock<Vec<(String, u32, Sender, String)>>,
}

impl InMemoryMessageLog {
    pub async fn bodies_for(&self, thread_id: &ThreadId, sender: Sender) -> Vec<String> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|(id, _, s, _)| id == thread_id.as_str() && *s == sender)
            .map(|(_, _, _, body)| body.clone())
            .collect()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn record(
        &self,
        thread_id: &ThreadId,
        round: u32,
        sender: Sender,
        body: &str,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().await;
        rows.push((thread_id.as_str().to_owned(), round, sender, body.to_owned()));
        Ok(())
    }

    async fn count_for_round(
        &self,
        thread_id: &ThreadId,
        round: u32,
        sender: Option<Sender>,
    ) -> Result<u64, RepositoryError> {
        let rows = self.rows.read().await;
        let count = rows
            .iter()
            .filter(|(id, r, s, _)| {
                id == thread_id.as_str() && *r == round && sender.map_or(true, |wanted| *s == wanted)
            })
            .count();
        Ok(count as u64)
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointLog {
    rows: RwLock<Vec<Checkpoint>>,
}

impl InMemoryCheckpointLog {
    pub async fn purge_other_rounds(
        &self,
        thread_id: &ThreadId,
        keep_round: u32,
    ) -> Result<u64, RepositoryError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|checkpoint| {
            checkpoint.thread_id != *thread_id || checkpoint.round == keep_round
        });
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl CheckpointLog for InMemoryCheckpointLog {
    async fn append(&self, checkpoint: Checkpoint) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write().await;
        rows.push(checkpoint);
        Ok(())
    }

    async fn list_for_round(
        &self,
        thread_id: &ThreadId,
        round: u32,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|checkpoint| checkpoint.thread_id == *thread_id && checkpoint.round == round)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryControlOverlay {
    flags: RwLock<HashMap<String, ControlFlags>>,
}

impl InMemoryControlOverlay {
    /// Test hook standing in for the out-of-band admin write path.
    pub async fn set_control(&self, thread_id: &ThreadId, flags: ControlFlags) {
        let mut map = self.flags.write().await;
        map.insert(thread_id.as_str().to_owned(), flags);
    }
}

#[async_trait]
impl ControlOverlayStore for InMemoryControlOverlay {
    async fn get_control(&self, thread_id: &ThreadId) -> Result<ControlFlags, RepositoryError> {
        let flags = self.flags.read().await;
        Ok(flags.get(thread_id.as_str()).copied().unwrap_or_default())
    }
}
