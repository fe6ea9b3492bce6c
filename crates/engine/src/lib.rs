//! Negotiation orchestration engine.
//!
//! This crate turns one inbound counter-party message into at most one
//! outbound reply:
//! 1. **Idempotency** - duplicate webhook deliveries are absorbed, bursts
//!    are rate limited (`haggle-store`).
//! 2. **Control** - human takeover and pause switches are honored before
//!    any model call, and re-checked at dispatch (`dispatcher`).
//! 3. **Routing** (`router`) - guardrail-gated intent classification.
//! 4. **Decision** - the pure rules in `haggle-core` choose accept,
//!    counter, escalate, reject, clarify, or an ask.
//! 5. **Dispatch** (`dispatcher`) - templated or generated reply text,
//!    screened on the way out, sent on the channel and persisted.
//!
//! The models are strictly translators. They never choose prices or
//! actions; those come from the deterministic decision rules.

pub mod bootstrap;
pub mod collaborators;
pub mod dispatcher;
pub mod guardrails;
pub mod orchestrator;
pub mod replies;
pub mod router;
pub mod telemetry;

pub use bootstrap::{bootstrap, Application, BootstrapError};
pub use collaborators::{
    BoundsLookup, ChannelSender, Collaborators, IntentClassifier, ReplyGenerator,
    SafetyClassifier, SafetyFinding,
};
pub use dispatcher::{DispatchOutcome, ReplyDispatcher};
pub use guardrails::{GuardDirection, GuardVerdict, GuardrailGate};
pub use orchestrator::{Orchestrator, Stores, TurnOutcome, TurnReport};
pub use router::{IntentRouter, RoutedIntent};
pub use telemetry::{init_tracing, TracingAuditSink};
