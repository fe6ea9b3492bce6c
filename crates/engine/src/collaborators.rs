//! Seams for the model-backed and channel-backed collaborators. Every call
//! the orchestrator makes across these traits is wrapped in a timeout and
//! converted to a `CollaboratorFault` on failure, so implementations are
//! free to be as unreliable as the services they wrap.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use haggle_core::{Classification, HistoryTurn, PriceBounds, ThreadId};

/// Maps a counter-party message onto an intent plus extracted fields. The
/// classifier is strictly a translator; it never chooses prices or actions.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, text: &str, history: &[HistoryTurn]) -> Result<Classification>;
}

/// Produces conversational reply text from a prompt. Only non-templated
/// replies (clarifications and the ask ladder) go through here.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SafetyFinding {
    pub flagged: bool,
    pub reason: Option<String>,
}

/// Screens text for content the automation must not engage with.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn screen(&self, text: &str) -> Result<SafetyFinding>;
}

/// Resolves the price band for a thread, typically from a campaign or deal
/// record. `None` means no band is configured; with an offer on the table
/// that resolves to escalation.
#[async_trait]
pub trait BoundsLookup: Send + Sync {
    async fn bounds_for(&self, thread_id: &ThreadId) -> Result<Option<PriceBounds>>;
}

/// Sends a reply out on the messaging channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, thread_id: &ThreadId, body: &str) -> Result<()>;
}

/// The full collaborator set the orchestrator is assembled from.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn IntentClassifier>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub safety: Arc<dyn SafetyClassifier>,
    pub bounds: Arc<dyn BoundsLookup>,
    pub channel: Arc<dyn ChannelSender>,
}
