//! Outbound reply dispatch. The control overlay is consulted once more
//! immediately before the send so a takeover that landed mid-turn wins the
//! race; a suppressed reply is an outcome, not an error.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use haggle_core::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, CollaboratorFault, Sender,
    ThreadId,
};
use haggle_store::{ControlOverlayStore, MessageLog};

use crate::collaborators::ChannelSender;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    SuppressedByTakeover,
}

pub struct ReplyDispatcher {
    channel: Arc<dyn ChannelSender>,
    control: Arc<dyn ControlOverlayStore>,
    messages: Arc<dyn MessageLog>,
    audit: Arc<dyn AuditSink>,
    timeout: Duration,
}

impl ReplyDispatcher {
    pub fn new(
        channel: Arc<dyn ChannelSender>,
        control: Arc<dyn ControlOverlayStore>,
        messages: Arc<dyn MessageLog>,
        audit: Arc<dyn AuditSink>,
        timeout: Duration,
    ) -> Self {
        Self { channel, control, messages, audit, timeout }
    }

    pub async fn dispatch(
        &self,
        thread_id: &ThreadId,
        round: u32,
        body: &str,
        ctx: &AuditContext,
    ) -> Result<DispatchOutcome, CollaboratorFault> {
        // Last-moment re-check; an unreadable overlay must not hold the
        // reply hostage, so a read failure counts as "no takeover".
        match self.control.get_control(thread_id).await {
            Ok(flags) if flags.human_takeover => {
                self.audit.emit(
                    AuditEvent::new(
                        ctx.thread_id.clone(),
                        ctx.round,
                        ctx.correlation_id.clone(),
                        "dispatch.suppressed_by_takeover",
                        AuditCategory::Dispatch,
                        ctx.actor.clone(),
                        AuditOutcome::Rejected,
                    ),
                );
                return Ok(DispatchOutcome::SuppressedByTakeover);
            }
            Ok(_) => {}
            Err(error) => {
                warn!(
                    event_name = "dispatch.control_recheck_failed",
                    correlation_id = %ctx.correlation_id,
                    thread_id = thread_id.as_str(),
                    error = %error,
                    "control overlay unreadable at dispatch, proceeding"
                );
            }
        }

        // The channel adapter is a collaborator like any other; a hung send
        // must not stall the turn.
        match tokio::time::timeout(self.timeout, self.channel.send(thread_id, body)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                return Err(CollaboratorFault::Failed {
                    name: "channel",
                    message: error.to_string(),
                });
            }
            Err(_) => {
                return Err(CollaboratorFault::Timeout {
                    name: "channel",
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        }

        // The reply went out; a logging failure is recorded but not surfaced.
        if let Err(error) = self.messages.record(thread_id, round, Sender::Agent, body).await {
            warn!(
                event_name = "dispatch.message_log_failed",
                correlation_id = %ctx.correlation_id,
                thread_id = thread_id.as_str(),
                error = %error,
                "sent reply could not be recorded"
            );
        }

        self.audit.emit(
            AuditEvent::new(
                ctx.thread_id.clone(),
                ctx.round,
                ctx.correlation_id.clone(),
                "dispatch.reply_sent",
                AuditCategory::Dispatch,
                ctx.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("chars", body.chars().count().to_string()),
        );

        Ok(DispatchOutcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;

    use haggle_core::{
        AuditContext, CollaboratorFault, ControlFlags, InMemoryAuditSink, Sender, ThreadId,
    };
    use haggle_store::{
        ControlOverlayStore, InMemoryControlOverlay, InMemoryMessageLog, MessageLog,
    };

    use super::{DispatchOutcome, ReplyDispatcher};
    use crate::collaborators::ChannelSender;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChannelSender for RecordingChannel {
        async fn send(&self, _thread_id: &ThreadId, body: &str) -> Result<()> {
            self.sent.lock().expect("lock").push(body.to_string());
            Ok(())
        }
    }

    fn ctx() -> AuditContext {
        AuditContext::new(Some("ig:creator-3".to_string()), Some(1), "evt-5", "reply-dispatcher")
    }

    #[tokio::test]
    async fn sends_and_records_the_agent_reply() {
        let channel = Arc::new(RecordingChannel::default());
        let messages = Arc::new(InMemoryMessageLog::default());
        let dispatcher = ReplyDispatcher::new(
            Arc::clone(&channel) as Arc<dyn ChannelSender>,
            Arc::new(InMemoryControlOverlay::default()),
            Arc::clone(&messages) as Arc<dyn MessageLog>,
            Arc::new(InMemoryAuditSink::default()),
            Duration::from_secs(5),
        );
        let id = ThreadId("ig:creator-3".to_string());

        let outcome =
            dispatcher.dispatch(&id, 1, "sounds great!", &ctx()).await.expect("dispatch");
        assert_eq!(outcome, DispatchOutcome::Sent);
        assert_eq!(channel.sent.lock().expect("lock").len(), 1);
        assert_eq!(
            messages.count_for_round(&id, 1, Some(Sender::Agent)).await.expect("count"),
            1
        );
    }

    #[tokio::test]
    async fn concurrent_takeover_suppresses_instead_of_failing() {
        let channel = Arc::new(RecordingChannel::default());
        let control = Arc::new(InMemoryControlOverlay::default());
        let id = ThreadId("ig:creator-3".to_string());
        control
            .set_control(&id, ControlFlags { human_takeover: true, agent_paused: false })
            .await;

        let dispatcher = ReplyDispatcher::new(
            Arc::clone(&channel) as Arc<dyn ChannelSender>,
            Arc::clone(&control) as Arc<dyn ControlOverlayStore>,
            Arc::new(InMemoryMessageLog::default()),
            Arc::new(InMemoryAuditSink::default()),
            Duration::from_secs(5),
        );

        let outcome = dispatcher.dispatch(&id, 1, "reply", &ctx()).await.expect("dispatch");
        assert_eq!(outcome, DispatchOutcome::SuppressedByTakeover);
        assert!(channel.sent.lock().expect("lock").is_empty());
    }

    struct StalledChannel;

    #[async_trait]
    impl ChannelSender for StalledChannel {
        async fn send(&self, _thread_id: &ThreadId, _body: &str) -> Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_channel_send_surfaces_as_a_timeout_fault() {
        let dispatcher = ReplyDispatcher::new(
            Arc::new(StalledChannel),
            Arc::new(InMemoryControlOverlay::default()),
            Arc::new(InMemoryMessageLog::default()),
            Arc::new(InMemoryAuditSink::default()),
            Duration::from_secs(5),
        );
        let id = ThreadId("ig:creator-3".to_string());

        let fault =
            dispatcher.dispatch(&id, 1, "reply", &ctx()).await.expect_err("send never returns");
        assert_eq!(fault, CollaboratorFault::Timeout { name: "channel", timeout_secs: 5 });
    }
}
