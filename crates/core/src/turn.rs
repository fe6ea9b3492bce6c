//! Turn lifecycle state machine. Each inbound event drives one turn through
//! a fixed transition table; every side effect (store writes, collaborator
//! calls, dispatch) hangs off a `TurnAction` executed by the orchestrator,
//! so the branching itself stays pure and replayable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Received,
    Deduped,
    ControlChecked,
    Classified,
    BoundsFetched,
    Decided,
    Replied,
    Persisted,
    BlockedHumanTakeover,
    BlockedRateLimited,
    Closed,
}

impl TurnStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Deduped => "deduped",
            Self::ControlChecked => "control_checked",
            Self::Classified => "classified",
            Self::BoundsFetched => "bounds_fetched",
            Self::Decided => "decided",
            Self::Replied => "replied",
            Self::Persisted => "persisted",
            Self::BlockedHumanTakeover => "blocked_human_takeover",
            Self::BlockedRateLimited => "blocked_rate_limited",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "received" => Some(Self::Received),
            "deduped" => Some(Self::Deduped),
            "control_checked" => Some(Self::ControlChecked),
            "classified" => Some(Self::Classified),
            "bounds_fetched" => Some(Self::BoundsFetched),
            "decided" => Some(Self::Decided),
            "replied" => Some(Self::Replied),
            "persisted" => Some(Self::Persisted),
            "blocked_human_takeover" => Some(Self::BlockedHumanTakeover),
            "blocked_rate_limited" => Some(Self::BlockedRateLimited),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    pub fn is_absorbing(&self) -> bool {
        matches!(self, Self::BlockedHumanTakeover | Self::BlockedRateLimited | Self::Closed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEvent {
    DuplicateDetected,
    EventAdmitted,
    RateLimitExceeded,
    TakeoverActive,
    PausedNoticeIssued,
    ControlClear,
    IntentClassified,
    BoundsReady,
    DecisionMade,
    ReplyDispatched,
    TurnPersisted,
    TerminalRecorded,
    CollaboratorFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAction {
    RecordInbound,
    DispatchPausedNotice,
    ClassifyIntent,
    FetchBounds,
    EvaluateDecision,
    ComposeReply,
    DispatchReply,
    PersistTurn,
    EmitDeflection,
    MarkRoundTerminal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnStage,
    pub to: TurnStage,
    pub event: TurnEvent,
    pub actions: Vec<TurnAction>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnTransitionError {
    #[error("invalid turn transition from {stage:?} using event {event:?}")]
    InvalidTransition { stage: TurnStage, event: TurnEvent },
}

#[derive(Clone, Debug, Default)]
pub struct TurnMachine;

impl TurnMachine {
    pub fn initial_stage(&self) -> TurnStage {
        TurnStage::Received
    }

    pub fn apply(
        &self,
        current: &TurnStage,
        event: &TurnEvent,
    ) -> Result<TransitionOutcome, TurnTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &TurnStage,
        event: &TurnEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TurnTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        audit.round,
                        audit.correlation_id.clone(),
                        "turn.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.thread_id.clone(),
                        audit.round,
                        audit.correlation_id.clone(),
                        "turn.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition(
    current: &TurnStage,
    event: &TurnEvent,
) -> Result<TransitionOutcome, TurnTransitionError> {
    use TurnAction::{
        ClassifyIntent, ComposeReply, DispatchPausedNotice, DispatchReply, EmitDeflection,
        EvaluateDecision, FetchBounds, MarkRoundTerminal, PersistTurn, RecordInbound,
    };
    use TurnEvent::{
        BoundsReady, CollaboratorFailed, ControlClear, DecisionMade, DuplicateDetected,
        EventAdmitted, IntentClassified, PausedNoticeIssued, RateLimitExceeded, ReplyDispatched,
        TakeoverActive, TerminalRecorded, TurnPersisted,
    };
    use TurnStage::{
        BlockedHumanTakeover, BlockedRateLimited, BoundsFetched, Classified, Closed,
        ControlChecked, Decided, Deduped, Persisted, Received, Replied,
    };

    let (to, actions) = match (current, event) {
        // Redeliveries are absorbed before any state is touched.
        (Received, DuplicateDetected) => (Closed, Vec::new()),
        (Received, EventAdmitted) => (Deduped, vec![RecordInbound]),
        (Deduped, RateLimitExceeded) => (BlockedRateLimited, vec![PersistTurn]),
        (Deduped, TakeoverActive) => (BlockedHumanTakeover, vec![PersistTurn]),
        (Deduped, PausedNoticeIssued) => (Closed, vec![DispatchPausedNotice, PersistTurn]),
        (Deduped, ControlClear) => (ControlChecked, vec![ClassifyIntent]),
        (ControlChecked, IntentClassified) => (Classified, vec![FetchBounds]),
        (Classified, BoundsReady) => (BoundsFetched, vec![EvaluateDecision]),
        (BoundsFetched, DecisionMade) => (Decided, vec![ComposeReply, DispatchReply]),
        (Decided, ReplyDispatched) => (Replied, vec![PersistTurn]),
        (Decided, TakeoverActive) => (BlockedHumanTakeover, vec![PersistTurn]),
        (Replied, TurnPersisted) => (Persisted, Vec::new()),
        (Persisted, TerminalRecorded) => (Closed, vec![MarkRoundTerminal]),
        // Collaborator failures end the turn with a deflection; the next
        // inbound event retries from a clean stage.
        (ControlChecked | Classified | BoundsFetched | Decided, CollaboratorFailed) => {
            (Closed, vec![EmitDeflection, PersistTurn])
        }
        _ => {
            return Err(TurnTransitionError::InvalidTransition { stage: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

#[cfg(test)]
mod tests {
    use super::{TransitionOutcome, TurnAction, TurnEvent, TurnMachine, TurnStage, TurnTransitionError};
    use crate::audit::{AuditContext, InMemoryAuditSink};

    #[test]
    fn happy_path_runs_received_to_closed() {
        let machine = TurnMachine;
        let mut stage = machine.initial_stage();
        let events = [
            TurnEvent::EventAdmitted,
            TurnEvent::ControlClear,
            TurnEvent::IntentClassified,
            TurnEvent::BoundsReady,
            TurnEvent::DecisionMade,
            TurnEvent::ReplyDispatched,
            TurnEvent::TurnPersisted,
            TurnEvent::TerminalRecorded,
        ];

        for event in &events {
            stage = machine.apply(&stage, event).expect("valid transition").to;
        }
        assert_eq!(stage, TurnStage::Closed);
        assert!(stage.is_absorbing());
    }

    #[test]
    fn duplicate_is_absorbed_with_no_actions() {
        let outcome = TurnMachine
            .apply(&TurnStage::Received, &TurnEvent::DuplicateDetected)
            .expect("duplicate absorbs");
        assert_eq!(outcome.to, TurnStage::Closed);
        assert!(outcome.actions.is_empty());
    }

    #[test]
    fn rate_limit_blocks_but_still_persists_inbound() {
        let outcome = TurnMachine
            .apply(&TurnStage::Deduped, &TurnEvent::RateLimitExceeded)
            .expect("rate limit transition");
        assert_eq!(outcome.to, TurnStage::BlockedRateLimited);
        assert_eq!(outcome.actions, vec![TurnAction::PersistTurn]);
    }

    #[test]
    fn takeover_can_interrupt_right_before_dispatch() {
        let outcome = TurnMachine
            .apply(&TurnStage::Decided, &TurnEvent::TakeoverActive)
            .expect("late takeover transition");
        assert_eq!(outcome.to, TurnStage::BlockedHumanTakeover);
    }

    #[test]
    fn collaborator_failure_deflects_instead_of_sticking() {
        for stage in [
            TurnStage::ControlChecked,
            TurnStage::Classified,
            TurnStage::BoundsFetched,
            TurnStage::Decided,
        ] {
            let outcome = TurnMachine
                .apply(&stage, &TurnEvent::CollaboratorFailed)
                .expect("failure transition");
            assert_eq!(outcome.to, TurnStage::Closed);
            assert!(outcome.actions.contains(&TurnAction::EmitDeflection));
        }
    }

    #[test]
    fn invalid_transition_is_rejected() {
        let error = TurnMachine
            .apply(&TurnStage::Received, &TurnEvent::DecisionMade)
            .expect_err("cannot decide before classification");
        assert!(matches!(
            error,
            TurnTransitionError::InvalidTransition {
                stage: TurnStage::Received,
                event: TurnEvent::DecisionMade
            }
        ));
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let machine = TurnMachine;
        let events = [
            TurnEvent::EventAdmitted,
            TurnEvent::ControlClear,
            TurnEvent::IntentClassified,
            TurnEvent::BoundsReady,
            TurnEvent::DecisionMade,
        ];

        let run = || {
            let mut stage = machine.initial_stage();
            let mut outcomes: Vec<TransitionOutcome> = Vec::new();
            for event in &events {
                let outcome = machine.apply(&stage, event).expect("deterministic run");
                stage = outcome.to;
                outcomes.push(outcome);
            }
            (stage, outcomes)
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn stage_round_trips_from_storage_encoding() {
        let cases = [
            TurnStage::Received,
            TurnStage::Deduped,
            TurnStage::ControlChecked,
            TurnStage::Classified,
            TurnStage::BoundsFetched,
            TurnStage::Decided,
            TurnStage::Replied,
            TurnStage::Persisted,
            TurnStage::BlockedHumanTakeover,
            TurnStage::BlockedRateLimited,
            TurnStage::Closed,
        ];
        for stage in cases {
            assert_eq!(TurnStage::parse(stage.as_str()), Some(stage));
        }
    }

    #[test]
    fn transition_emits_audit_event() {
        let sink = InMemoryAuditSink::default();
        let _ = TurnMachine
            .apply_with_audit(
                &TurnStage::Received,
                &TurnEvent::EventAdmitted,
                &sink,
                &AuditContext::new(Some("ig:creator-9".to_owned()), Some(1), "req-42", "orchestrator"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].thread_id.as_deref(), Some("ig:creator-9"));
        assert_eq!(events[0].event_type, "turn.transition_applied");
    }
}
