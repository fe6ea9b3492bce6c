pub mod audit;
pub mod config;
pub mod decision;
pub mod domain;
pub mod errors;
pub mod turn;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use decision::{decide, DecisionInput, NegotiationAction, NegotiationDecision};
pub use domain::checkpoint::Checkpoint;
pub use domain::event::{EventId, InboundEvent};
pub use domain::intent::{Classification, ExtractedFields, Intent};
pub use domain::thread::{
    ControlFlags, ConversationThread, HistoryTurn, NegotiationStatus, PriceBounds, Sender, ThreadId,
};
pub use errors::{deflection_text, CollaboratorFault, EngineError};
pub use turn::{
    TransitionOutcome, TurnAction, TurnEvent, TurnMachine, TurnStage, TurnTransitionError,
};
