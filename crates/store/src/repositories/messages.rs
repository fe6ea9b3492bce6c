use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use haggle_core::{Sender, ThreadId};

use super::{MessageLog, RepositoryError};
use crate::DbPool;

pub struct SqlMessageLog {
    pool: DbPool,
}

impl SqlMessageLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageLog for SqlMessageLog {
    async fn record(
        &self,
        thread_id: &ThreadId,
        round: u32,
        sender: Sender,
        body: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (thread_id, round, sender, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(thread_id.as_str())
        .bind(i64::from(round))
        .bind(sender.as_str())
        .bind(body)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_for_round(
        &self,
        thread_id: &ThreadId,
        round: u32,
        sender: Option<Sender>,
    ) -> Result<u64, RepositoryError> {
        let row = match sender {
            Some(sender) => {
                sqlx::query(
                    "SELECT COUNT(*) AS count FROM messages
                     WHERE thread_id = ?1 AND round = ?2 AND sender = ?3",
                )
                .bind(thread_id.as_str())
                .bind(i64::from(round))
                .bind(sender.as_str())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT COUNT(*) AS count FROM messages
                     WHERE thread_id = ?1 AND round = ?2",
                )
                .bind(thread_id.as_str())
                .bind(i64::from(round))
                .fetch_one(&self.pool)
                .await?
            }
        };

        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }
}
