//! Tracing setup and the tracing-backed audit sink used in production
//! wiring. Tests swap in `InMemoryAuditSink` from `haggle-core` instead.

use tracing::info;
use tracing_subscriber::EnvFilter;

use haggle_core::config::{LogFormat, LoggingConfig};
use haggle_core::{AuditEvent, AuditOutcome, AuditSink};

/// Installs the global subscriber. Safe to call once per process; later
/// calls are ignored so test binaries can race on it harmlessly.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // `try_init` errors when a subscriber is already installed; ignore it.
    let _ = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Emits audit events as structured log lines. Keeps the audit trail and
/// the operational logs in one stream for the single-process deployment.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let outcome = match event.outcome {
            AuditOutcome::Success => "success",
            AuditOutcome::Rejected => "rejected",
            AuditOutcome::Failed => "failed",
        };
        info!(
            event_name = %event.event_type,
            correlation_id = %event.correlation_id,
            thread_id = event.thread_id.as_deref().unwrap_or("unknown"),
            round = event.round.map(|round| round.to_string()).unwrap_or_default(),
            actor = %event.actor,
            outcome,
            metadata = ?event.metadata,
            "audit event"
        );
    }
}
