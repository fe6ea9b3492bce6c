//! Safety gating around the model-backed steps. Inbound text is screened
//! before classification; generated reply text is screened before dispatch.
//! The gate fails open: if the safety classifier itself errors or times
//! out, the turn proceeds, with a neutral fallback substituted on the
//! output side so unscreened model text never reaches the channel.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use haggle_core::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};

use crate::collaborators::SafetyClassifier;
use crate::replies;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GuardDirection {
    Input,
    Output,
}

impl GuardDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardVerdict {
    pub allowed: bool,
    pub reason: Option<String>,
    /// Set whenever the caller must substitute its reply text: a blocked
    /// output, or an output whose screening could not be completed.
    pub fallback_text: Option<String>,
}

impl GuardVerdict {
    fn allow() -> Self {
        Self { allowed: true, reason: None, fallback_text: None }
    }
}

pub struct GuardrailGate {
    safety: Arc<dyn SafetyClassifier>,
    timeout: Duration,
    audit: Arc<dyn AuditSink>,
}

impl GuardrailGate {
    pub fn new(safety: Arc<dyn SafetyClassifier>, timeout: Duration, audit: Arc<dyn AuditSink>) -> Self {
        Self { safety, timeout, audit }
    }

    pub async fn run_guarded(
        &self,
        direction: GuardDirection,
        payload: &str,
        ctx: &AuditContext,
    ) -> GuardVerdict {
        let screened = tokio::time::timeout(self.timeout, self.safety.screen(payload)).await;

        let finding = match screened {
            Ok(Ok(finding)) => finding,
            Ok(Err(error)) => return self.fail_open(direction, ctx, error.to_string()),
            Err(_) => return self.fail_open(direction, ctx, "safety screening timed out".to_string()),
        };

        if !finding.flagged {
            return GuardVerdict::allow();
        }

        self.audit.emit(
            AuditEvent::new(
                ctx.thread_id.clone(),
                ctx.round,
                ctx.correlation_id.clone(),
                format!("guardrail.{}_blocked", direction.as_str()),
                AuditCategory::Guardrail,
                ctx.actor.clone(),
                AuditOutcome::Rejected,
            )
            .with_metadata("reason", finding.reason.clone().unwrap_or_default()),
        );

        GuardVerdict {
            allowed: false,
            reason: finding.reason,
            fallback_text: match direction {
                GuardDirection::Input => None,
                GuardDirection::Output => Some(replies::neutral_fallback().to_string()),
            },
        }
    }

    fn fail_open(&self, direction: GuardDirection, ctx: &AuditContext, detail: String) -> GuardVerdict {
        warn!(
            event_name = "guardrail.screening_unavailable",
            correlation_id = %ctx.correlation_id,
            direction = direction.as_str(),
            detail = %detail,
            "safety screening unavailable, failing open"
        );
        self.audit.emit(
            AuditEvent::new(
                ctx.thread_id.clone(),
                ctx.round,
                ctx.correlation_id.clone(),
                "guardrail.screening_unavailable",
                AuditCategory::Guardrail,
                ctx.actor.clone(),
                AuditOutcome::Failed,
            )
            .with_metadata("direction", direction.as_str())
            .with_metadata("detail", detail),
        );

        GuardVerdict {
            allowed: true,
            reason: None,
            fallback_text: match direction {
                GuardDirection::Input => None,
                // Unscreened generated text must not go out as-is.
                GuardDirection::Output => Some(replies::neutral_fallback().to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use haggle_core::{AuditContext, InMemoryAuditSink};

    use super::{GuardDirection, GuardrailGate};
    use crate::collaborators::{SafetyClassifier, SafetyFinding};
    use crate::replies;

    struct Flagging;

    #[async_trait]
    impl SafetyClassifier for Flagging {
        async fn screen(&self, _text: &str) -> Result<SafetyFinding> {
            Ok(SafetyFinding { flagged: true, reason: Some("unsafe_content".to_string()) })
        }
    }

    struct Clean;

    #[async_trait]
    impl SafetyClassifier for Clean {
        async fn screen(&self, _text: &str) -> Result<SafetyFinding> {
            Ok(SafetyFinding::default())
        }
    }

    struct Failing;

    #[async_trait]
    impl SafetyClassifier for Failing {
        async fn screen(&self, _text: &str) -> Result<SafetyFinding> {
            Err(anyhow!("upstream 500"))
        }
    }

    struct Hanging;

    #[async_trait]
    impl SafetyClassifier for Hanging {
        async fn screen(&self, _text: &str) -> Result<SafetyFinding> {
            std::future::pending().await
        }
    }

    fn ctx() -> AuditContext {
        AuditContext::new(Some("ig:creator-1".to_string()), Some(1), "evt-1", "guardrail-gate")
    }

    fn gate(safety: Arc<dyn SafetyClassifier>) -> (GuardrailGate, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        let gate = GuardrailGate::new(safety, Duration::from_secs(5), Arc::new(sink.clone()));
        (gate, sink)
    }

    #[tokio::test]
    async fn clean_text_passes_both_directions() {
        let (gate, _) = gate(Arc::new(Clean));
        for direction in [GuardDirection::Input, GuardDirection::Output] {
            let verdict = gate.run_guarded(direction, "hello!", &ctx()).await;
            assert!(verdict.allowed);
            assert!(verdict.fallback_text.is_none());
        }
    }

    #[tokio::test]
    async fn flagged_input_blocks_without_fallback() {
        let (gate, sink) = gate(Arc::new(Flagging));
        let verdict = gate.run_guarded(GuardDirection::Input, "bad", &ctx()).await;
        assert!(!verdict.allowed);
        assert!(verdict.fallback_text.is_none());
        assert_eq!(verdict.reason.as_deref(), Some("unsafe_content"));
        assert_eq!(sink.events()[0].event_type, "guardrail.input_blocked");
    }

    #[tokio::test]
    async fn flagged_output_carries_the_neutral_fallback() {
        let (gate, _) = gate(Arc::new(Flagging));
        let verdict = gate.run_guarded(GuardDirection::Output, "bad reply", &ctx()).await;
        assert!(!verdict.allowed);
        assert_eq!(verdict.fallback_text.as_deref(), Some(replies::neutral_fallback()));
    }

    #[tokio::test]
    async fn screening_failure_fails_open_on_input() {
        let (gate, sink) = gate(Arc::new(Failing));
        let verdict = gate.run_guarded(GuardDirection::Input, "hello", &ctx()).await;
        assert!(verdict.allowed);
        assert!(verdict.fallback_text.is_none());
        assert_eq!(sink.events()[0].event_type, "guardrail.screening_unavailable");
    }

    #[tokio::test]
    async fn screening_failure_on_output_still_substitutes_the_fallback() {
        let (gate, _) = gate(Arc::new(Failing));
        let verdict = gate.run_guarded(GuardDirection::Output, "reply", &ctx()).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.fallback_text.as_deref(), Some(replies::neutral_fallback()));
    }

    #[tokio::test(start_paused = true)]
    async fn screening_timeout_is_treated_as_unavailable() {
        let (gate, sink) = gate(Arc::new(Hanging));
        let verdict = gate.run_guarded(GuardDirection::Output, "reply", &ctx()).await;
        assert!(verdict.allowed);
        assert!(verdict.fallback_text.is_some());
        assert!(sink
            .events()
            .iter()
            .any(|event| event.event_type == "guardrail.screening_unavailable"));
    }
}
