use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use haggle_core::{EventId, ThreadId};

use super::{DedupLedger, RepositoryError};
use crate::DbPool;

pub struct SqlDedupLedger {
    pool: DbPool,
}

impl SqlDedupLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DedupLedger for SqlDedupLedger {
    async fn admit(&self, event_id: &EventId, ttl: Duration) -> Result<bool, RepositoryError> {
        let now = Utc::now();

        // An expired row must not block re-admission of a recycled id.
        sqlx::query("DELETE FROM processed_events WHERE event_id = ?1 AND expires_at <= ?2")
            .bind(event_id.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;

        let result = sqlx::query(
            "INSERT INTO processed_events (event_id, admitted_at, expires_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(event_id.as_str())
        .bind(now)
        .bind(now + chrono::Duration::seconds(ttl.as_secs() as i64))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn forget(&self, event_id: &EventId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM processed_events WHERE event_id = ?1")
            .bind(event_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn rate_limit(
        &self,
        thread_id: &ThreadId,
        max_calls: u32,
        window: Duration,
    ) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let window_secs = window.as_secs().max(1) as i64;
        let window_start = now.timestamp() / window_secs * window_secs;

        sqlx::query("DELETE FROM rate_windows WHERE expires_at <= ?1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        let row = sqlx::query(
            "INSERT INTO rate_windows (thread_id, window_start, calls, expires_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(thread_id, window_start) DO UPDATE SET calls = calls + 1
             RETURNING calls",
        )
        .bind(thread_id.as_str())
        .bind(window_start)
        .bind(now + chrono::Duration::seconds(window_secs))
        .fetch_one(&self.pool)
        .await?;

        let calls: i64 = row.try_get("calls")?;
        Ok(calls <= i64::from(max_calls))
    }
}
