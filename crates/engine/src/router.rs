//! Guardrail-gated intent classification. A blocked input short-circuits to
//! UNCLEAR with a canned deflection so the decision engine never sees text
//! the safety layer refused.

use std::sync::Arc;
use std::time::Duration;

use haggle_core::{
    deflection_text, AuditContext, Classification, CollaboratorFault, ConversationThread, Intent,
};

use crate::collaborators::IntentClassifier;
use crate::guardrails::{GuardDirection, GuardrailGate};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutedIntent {
    pub classification: Classification,
    /// Preset reply that replaces the decision engine's output for this
    /// turn. Set when the input guardrail blocked the message.
    pub preset_reply: Option<String>,
    pub guard_reason: Option<String>,
}

pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    timeout: Duration,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, timeout: Duration) -> Self {
        Self { classifier, timeout }
    }

    pub async fn route(
        &self,
        gate: &GuardrailGate,
        thread: &ConversationThread,
        text: &str,
        history_window: usize,
        ctx: &AuditContext,
    ) -> Result<RoutedIntent, CollaboratorFault> {
        let verdict = gate.run_guarded(GuardDirection::Input, text, ctx).await;
        if !verdict.allowed {
            return Ok(RoutedIntent {
                classification: Classification { intent: Intent::Unclear, ..Default::default() },
                preset_reply: Some(deflection_text().to_string()),
                guard_reason: verdict.reason,
            });
        }

        let history = thread.recent_history(history_window);
        let classified =
            tokio::time::timeout(self.timeout, self.classifier.classify(text, history)).await;

        match classified {
            Ok(Ok(classification)) => {
                Ok(RoutedIntent { classification, preset_reply: None, guard_reason: None })
            }
            Ok(Err(error)) => Err(CollaboratorFault::Failed {
                name: "classifier",
                message: error.to_string(),
            }),
            Err(_) => Err(CollaboratorFault::Timeout {
                name: "classifier",
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
