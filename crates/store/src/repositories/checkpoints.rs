use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use haggle_core::{Checkpoint, ThreadId, TurnStage};

use super::{CheckpointLog, RepositoryError};
use crate::DbPool;

pub struct SqlCheckpointLog {
    pool: DbPool,
}

impl SqlCheckpointLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointLog for SqlCheckpointLog {
    async fn append(&self, checkpoint: Checkpoint) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO thread_checkpoints (thread_id, round, stage, action, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(checkpoint.thread_id.as_str())
        .bind(i64::from(checkpoint.round))
        .bind(checkpoint.stage.as_str())
        .bind(checkpoint.action)
        .bind(checkpoint.detail)
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_round(
        &self,
        thread_id: &ThreadId,
        round: u32,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT thread_id, round, stage, action, detail, created_at
             FROM thread_checkpoints
             WHERE thread_id = ?1 AND round = ?2
             ORDER BY id",
        )
        .bind(thread_id.as_str())
        .bind(i64::from(round))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let stage_raw: String = row.try_get("stage")?;
                let stage = TurnStage::parse(&stage_raw).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown checkpoint stage `{stage_raw}`"))
                })?;
                let round: i64 = row.try_get("round")?;
                let created_at: DateTime<Utc> = row.try_get("created_at")?;
                Ok(Checkpoint {
                    thread_id: ThreadId(row.try_get("thread_id")?),
                    round: u32::try_from(round).map_err(|_| {
                        RepositoryError::Decode(format!("round out of range: {round}"))
                    })?,
                    stage,
                    action: row.try_get("action")?,
                    detail: row.try_get("detail")?,
                    created_at,
                })
            })
            .collect()
    }
}
