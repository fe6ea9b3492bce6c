use async_trait::async_trait;
use sqlx::Row;

use haggle_core::{ControlFlags, ThreadId};

use super::{ControlOverlayStore, RepositoryError};
use crate::DbPool;

/// Reads the takeover/pause switches off the thread row. The admin surface
/// flips them out-of-band; this engine only ever reads.
pub struct SqlControlOverlay {
    pool: DbPool,
}

impl SqlControlOverlay {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ControlOverlayStore for SqlControlOverlay {
    async fn get_control(&self, thread_id: &ThreadId) -> Result<ControlFlags, RepositoryError> {
        let row = sqlx::query(
            "SELECT human_takeover, agent_paused FROM threads WHERE thread_id = ?1",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(ControlFlags {
                human_takeover: row.try_get("human_takeover")?,
                agent_paused: row.try_get("agent_paused")?,
            }),
            None => Ok(ControlFlags::default()),
        }
    }
}
