use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use haggle_core::{
    ConversationThread, HistoryTurn, NegotiationStatus, PriceBounds, ThreadId, TurnStage,
};

use super::{RepositoryError, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn get(
        &self,
        thread_id: &ThreadId,
        ttl: Duration,
    ) -> Result<ConversationThread, RepositoryError> {
        let row = sqlx::query("SELECT * FROM threads WHERE thread_id = ?1")
            .bind(thread_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(ConversationThread::new(thread_id.clone()));
        };

        let mut thread = decode_thread(&row)?;
        let expiry = thread.last_active + chrono::Duration::seconds(ttl.as_secs() as i64);
        if Utc::now() > expiry {
            thread.reset_expired();
        }
        Ok(thread)
    }

    async fn save(&self, thread: &ConversationThread) -> Result<(), RepositoryError> {
        let history_json = serde_json::to_string(&thread.history)
            .map_err(|error| RepositoryError::Decode(format!("history encode: {error}")))?;

        sqlx::query(
            "INSERT INTO threads (
                thread_id, round, stage, negotiation_status, counterparty_offer,
                min_price, max_price, last_offered_price, counter_rounds,
                interest_confirmed, availability_confirmed, human_takeover,
                agent_paused, history_json, last_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(thread_id) DO UPDATE SET
                round = excluded.round,
                stage = excluded.stage,
                negotiation_status = excluded.negotiation_status,
                counterparty_offer = excluded.counterparty_offer,
                min_price = excluded.min_price,
                max_price = excluded.max_price,
                last_offered_price = excluded.last_offered_price,
                counter_rounds = excluded.counter_rounds,
                interest_confirmed = excluded.interest_confirmed,
                availability_confirmed = excluded.availability_confirmed,
                human_takeover = excluded.human_takeover,
                agent_paused = excluded.agent_paused,
                history_json = excluded.history_json,
                last_active = excluded.last_active",
        )
        .bind(thread.thread_id.as_str())
        .bind(i64::from(thread.round))
        .bind(thread.stage.as_str())
        .bind(thread.negotiation_status.as_str())
        .bind(thread.counterparty_offer.map(|price| price.to_string()))
        .bind(thread.bounds.map(|bounds| bounds.min_price.to_string()))
        .bind(thread.bounds.map(|bounds| bounds.max_price.to_string()))
        .bind(thread.last_offered_price.map(|price| price.to_string()))
        .bind(i64::from(thread.counter_rounds))
        .bind(thread.interest_confirmed)
        .bind(thread.availability_confirmed)
        .bind(thread.human_takeover)
        .bind(thread.agent_paused)
        .bind(history_json)
        .bind(Utc::now())
        .bind(thread.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_round(&self, thread_id: &ThreadId) -> Result<u32, RepositoryError> {
        let row = sqlx::query(
            "UPDATE threads SET
                round = round + 1,
                stage = ?2,
                negotiation_status = ?3,
                counterparty_offer = NULL,
                last_offered_price = NULL,
                counter_rounds = 0,
                history_json = '[]',
                last_active = ?4
             WHERE thread_id = ?1
             RETURNING round",
        )
        .bind(thread_id.as_str())
        .bind(TurnStage::Received.as_str())
        .bind(NegotiationStatus::Pending.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Err(RepositoryError::Decode(format!(
                "cannot advance round for unknown thread `{}`",
                thread_id.as_str()
            )));
        };
        let round: i64 = row.try_get("round")?;
        u32::try_from(round)
            .map_err(|_| RepositoryError::Decode(format!("round out of range: {round}")))
    }

    async fn purge_round_artifacts(
        &self,
        thread_id: &ThreadId,
        keep_round: u32,
    ) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM thread_checkpoints WHERE thread_id = ?1 AND round <> ?2")
                .bind(thread_id.as_str())
                .bind(i64::from(keep_round))
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

/// Malformed rows fail loudly at the read boundary instead of propagating
/// half-typed state into the orchestrator.
fn decode_thread(row: &SqliteRow) -> Result<ConversationThread, RepositoryError> {
    let thread_id: String = row.try_get("thread_id")?;
    let round: i64 = row.try_get("round")?;
    let stage_raw: String = row.try_get("stage")?;
    let status_raw: String = row.try_get("negotiation_status")?;
    let history_json: String = row.try_get("history_json")?;

    let stage = TurnStage::parse(&stage_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown stage `{stage_raw}`")))?;
    let negotiation_status = NegotiationStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown status `{status_raw}`")))?;
    let history: Vec<HistoryTurn> = serde_json::from_str(&history_json)
        .map_err(|error| RepositoryError::Decode(format!("history decode: {error}")))?;

    let min_price = decode_price(row, "min_price")?;
    let max_price = decode_price(row, "max_price")?;
    let bounds = match (min_price, max_price) {
        (Some(min_price), Some(max_price)) => Some(PriceBounds::new(min_price, max_price)),
        (None, None) => None,
        _ => {
            return Err(RepositoryError::Decode(format!(
                "thread `{thread_id}` has half-populated price bounds"
            )));
        }
    };

    let counter_rounds: i64 = row.try_get("counter_rounds")?;
    let last_active: DateTime<Utc> = row.try_get("last_active")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(ConversationThread {
        thread_id: ThreadId(thread_id),
        round: u32::try_from(round)
            .map_err(|_| RepositoryError::Decode(format!("round out of range: {round}")))?,
        stage,
        negotiation_status,
        counterparty_offer: decode_price(row, "counterparty_offer")?,
        bounds,
        last_offered_price: decode_price(row, "last_offered_price")?,
        counter_rounds: u32::try_from(counter_rounds).map_err(|_| {
            RepositoryError::Decode(format!("counter_rounds out of range: {counter_rounds}"))
        })?,
        interest_confirmed: row.try_get("interest_confirmed")?,
        availability_confirmed: row.try_get("availability_confirmed")?,
        human_takeover: row.try_get("human_takeover")?,
        agent_paused: row.try_get("agent_paused")?,
        history,
        last_active,
        created_at,
    })
}

fn decode_price(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, RepositoryError> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| {
        Decimal::from_str(&value)
            .map_err(|_| RepositoryError::Decode(format!("bad decimal in `{column}`: `{value}`")))
    })
    .transpose()
}
