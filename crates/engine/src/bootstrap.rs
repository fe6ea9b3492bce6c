//! Library entry point for the webhook host: load configuration, open the
//! database, run migrations, and assemble the orchestrator against SQL
//! stores. The channel and model collaborators are injected by the caller;
//! this crate does not know how to talk to any particular platform.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use haggle_core::config::{AppConfig, ConfigError, LoadOptions};
use haggle_store::{
    connect, migrations, DbPool, SqlCheckpointLog, SqlControlOverlay, SqlDedupLedger,
    SqlMessageLog, SqlSessionStore,
};

use crate::collaborators::Collaborators;
use crate::orchestrator::{Orchestrator, Stores};
use crate::telemetry::TracingAuditSink;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(
    options: LoadOptions,
    collaborators: Collaborators,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "starting engine bootstrap"
    );
    let config = AppConfig::load(options)?;

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        thread_id = "unknown",
        "database migrations applied"
    );

    let stores = Stores {
        sessions: Arc::new(SqlSessionStore::new(db_pool.clone())),
        dedup: Arc::new(SqlDedupLedger::new(db_pool.clone())),
        messages: Arc::new(SqlMessageLog::new(db_pool.clone())),
        checkpoints: Arc::new(SqlCheckpointLog::new(db_pool.clone())),
        control: Arc::new(SqlControlOverlay::new(db_pool.clone())),
    };
    let orchestrator = Arc::new(Orchestrator::new(
        stores,
        collaborators,
        Arc::new(TracingAuditSink),
        config.negotiation.clone(),
        Duration::from_secs(config.llm.timeout_secs),
    ));

    Ok(Application { config, db_pool, orchestrator })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;

    use haggle_core::config::{ConfigOverrides, LoadOptions};
    use haggle_core::{Classification, HistoryTurn, PriceBounds, ThreadId};

    use super::bootstrap;
    use crate::collaborators::{
        BoundsLookup, ChannelSender, Collaborators, IntentClassifier, ReplyGenerator,
        SafetyClassifier, SafetyFinding,
    };

    struct Inert;

    #[async_trait]
    impl IntentClassifier for Inert {
        async fn classify(&self, _text: &str, _history: &[HistoryTurn]) -> Result<Classification> {
            Ok(Classification::default())
        }
    }

    #[async_trait]
    impl ReplyGenerator for Inert {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("ok".to_string())
        }
    }

    #[async_trait]
    impl SafetyClassifier for Inert {
        async fn screen(&self, _text: &str) -> Result<SafetyFinding> {
            Ok(SafetyFinding::default())
        }
    }

    #[async_trait]
    impl BoundsLookup for Inert {
        async fn bounds_for(&self, _thread_id: &ThreadId) -> Result<Option<PriceBounds>> {
            Ok(None)
        }
    }

    #[async_trait]
    impl ChannelSender for Inert {
        async fn send(&self, _thread_id: &ThreadId, _body: &str) -> Result<()> {
            Ok(())
        }
    }

    fn inert_collaborators() -> Collaborators {
        let inert = Arc::new(Inert);
        Collaborators {
            classifier: inert.clone(),
            generator: inert.clone(),
            safety: inert.clone(),
            bounds: inert.clone(),
            channel: inert,
        }
    }

    #[tokio::test]
    async fn bootstrap_runs_migrations_against_a_fresh_database() {
        let app = bootstrap(
            LoadOptions {
                overrides: ConfigOverrides {
                    database_url: Some("sqlite::memory:?cache=shared".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            },
            inert_collaborators(),
        )
        .await
        .expect("bootstrap should succeed against an in-memory database");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN \
             ('threads', 'thread_checkpoints', 'processed_events', 'rate_windows', 'messages')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("baseline tables should exist after bootstrap");
        assert_eq!(table_count, 5);
    }
}
