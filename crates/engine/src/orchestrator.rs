//! One inbound event, one turn. The orchestrator drives the typed turn
//! machine from `haggle-core`, executing the side effects each transition
//! names against the stores and collaborators it was assembled with.
//! Collaborator trouble never escapes as an error; it ends the turn with a
//! deflection reply. Only store unavailability propagates to the caller,
//! and that exit releases the event's dedup entry so a redelivery of the
//! unprocessed event is admitted rather than absorbed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use haggle_core::{
    decide, deflection_text, AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink,
    Checkpoint, CollaboratorFault, ConversationThread, DecisionInput, EngineError, InboundEvent,
    NegotiationAction, NegotiationDecision, NegotiationStatus, Sender, TransitionOutcome,
    TurnEvent, TurnMachine, TurnStage,
};
use haggle_core::config::NegotiationConfig;
use haggle_store::{
    CheckpointLog, ControlOverlayStore, DedupLedger, MessageLog, SessionStore,
};

use crate::collaborators::Collaborators;
use crate::dispatcher::{DispatchOutcome, ReplyDispatcher};
use crate::guardrails::{GuardDirection, GuardrailGate};
use crate::replies;
use crate::router::IntentRouter;

/// The persistence surface the orchestrator writes through.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub dedup: Arc<dyn DedupLedger>,
    pub messages: Arc<dyn MessageLog>,
    pub checkpoints: Arc<dyn CheckpointLog>,
    pub control: Arc<dyn ControlOverlayStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    Replied { action: String },
    Duplicate,
    RateLimited,
    HumanTakeover,
    PausedNotice,
    SuppressedByTakeover,
    Deflected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub stage: TurnStage,
    pub reply: Option<String>,
}

pub struct Orchestrator {
    machine: TurnMachine,
    stores: Stores,
    collaborators: Collaborators,
    router: IntentRouter,
    gate: GuardrailGate,
    dispatcher: ReplyDispatcher,
    audit: Arc<dyn AuditSink>,
    negotiation: NegotiationConfig,
    collaborator_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        stores: Stores,
        collaborators: Collaborators,
        audit: Arc<dyn AuditSink>,
        negotiation: NegotiationConfig,
        collaborator_timeout: Duration,
    ) -> Self {
        let gate = GuardrailGate::new(
            Arc::clone(&collaborators.safety),
            collaborator_timeout,
            Arc::clone(&audit),
        );
        let router = IntentRouter::new(Arc::clone(&collaborators.classifier), collaborator_timeout);
        let dispatcher = ReplyDispatcher::new(
            Arc::clone(&collaborators.channel),
            Arc::clone(&stores.control),
            Arc::clone(&stores.messages),
            Arc::clone(&audit),
            collaborator_timeout,
        );
        Self {
            machine: TurnMachine,
            stores,
            collaborators,
            router,
            gate,
            dispatcher,
            audit,
            negotiation,
            collaborator_timeout,
        }
    }

    pub async fn handle_event(&self, event: &InboundEvent) -> Result<TurnReport, EngineError> {
        let ctx = AuditContext::new(
            Some(event.thread_id.as_str().to_owned()),
            None,
            event.event_id.as_str(),
            "orchestrator",
        );
        let stage = self.machine.initial_stage();

        // The idempotency gate runs before any state is loaded or written;
        // a redelivered event must be a pure no-op.
        let admitted = self
            .stores
            .dedup
            .admit(&event.event_id, Duration::from_secs(self.negotiation.dedup_ttl_secs))
            .await?;
        if !admitted {
            let stage = self.step(&stage, TurnEvent::DuplicateDetected, &ctx)?.to;
            info!(
                event_name = "turn.duplicate_absorbed",
                correlation_id = event.event_id.as_str(),
                thread_id = event.thread_id.as_str(),
                "duplicate event absorbed"
            );
            return Ok(TurnReport { outcome: TurnOutcome::Duplicate, stage, reply: None });
        }

        let result = self.run_admitted_turn(event, ctx, stage).await;
        if let Err(error) = &result {
            // The turn did not complete and nothing was sent on this path;
            // release the dedup row so the channel's redelivery is admitted
            // instead of absorbed as a duplicate.
            if error.is_retryable() {
                if let Err(forget_error) = self.stores.dedup.forget(&event.event_id).await {
                    warn!(
                        event_name = "turn.dedup_release_failed",
                        correlation_id = event.event_id.as_str(),
                        thread_id = event.thread_id.as_str(),
                        error = %forget_error,
                        "failed turn could not release its dedup entry"
                    );
                }
            }
        }
        result
    }

    async fn run_admitted_turn(
        &self,
        event: &InboundEvent,
        mut ctx: AuditContext,
        mut stage: TurnStage,
    ) -> Result<TurnReport, EngineError> {
        let session_ttl = Duration::from_secs(self.negotiation.session_ttl_secs);
        let mut thread = self.stores.sessions.get(&event.thread_id, session_ttl).await?;

        // A terminal previous round means this inbound message opens the
        // next one. The increment is atomic in the store.
        if thread.is_round_terminal() {
            let new_round = self.stores.sessions.advance_round(&event.thread_id).await?;
            if let Err(error) =
                self.stores.sessions.purge_round_artifacts(&event.thread_id, new_round).await
            {
                warn!(
                    event_name = "turn.purge_failed",
                    correlation_id = event.event_id.as_str(),
                    thread_id = event.thread_id.as_str(),
                    error = %error,
                    "prior-round artifact purge failed"
                );
            }
            thread = self.stores.sessions.get(&event.thread_id, session_ttl).await?;
        }
        ctx.round = Some(thread.round);

        stage = self.step(&stage, TurnEvent::EventAdmitted, &ctx)?.to;
        self.stores
            .messages
            .record(&event.thread_id, thread.round, Sender::Counterparty, &event.text)
            .await?;
        thread.push_turn(Sender::Counterparty, event.text.as_str());

        let within_limit = self
            .stores
            .dedup
            .rate_limit(
                &event.thread_id,
                self.negotiation.rate_limit_max_calls,
                Duration::from_secs(self.negotiation.rate_limit_window_secs),
            )
            .await?;
        if !within_limit {
            stage = self.step(&stage, TurnEvent::RateLimitExceeded, &ctx)?.to;
            self.persist_turn(&mut thread, stage, "rate_limited", None).await?;
            return Ok(TurnReport { outcome: TurnOutcome::RateLimited, stage, reply: None });
        }

        let flags = self.stores.control.get_control(&event.thread_id).await?;
        if flags.human_takeover {
            thread.human_takeover = true;
            stage = self.step(&stage, TurnEvent::TakeoverActive, &ctx)?.to;
            self.persist_turn(&mut thread, stage, "takeover", None).await?;
            return Ok(TurnReport { outcome: TurnOutcome::HumanTakeover, stage, reply: None });
        }
        if flags.agent_paused {
            thread.agent_paused = true;
            let notice = replies::paused_notice();
            match self.dispatcher.dispatch(&event.thread_id, thread.round, notice, &ctx).await {
                Ok(DispatchOutcome::Sent) => thread.push_turn(Sender::Agent, notice),
                Ok(DispatchOutcome::SuppressedByTakeover) => {}
                Err(fault) => {
                    warn!(
                        event_name = "turn.paused_notice_failed",
                        correlation_id = event.event_id.as_str(),
                        thread_id = event.thread_id.as_str(),
                        error = %fault,
                        "paused notice could not be delivered"
                    );
                }
            }
            stage = self.step(&stage, TurnEvent::PausedNoticeIssued, &ctx)?.to;
            self.persist_turn(&mut thread, stage, "paused_notice", None).await?;
            return Ok(TurnReport {
                outcome: TurnOutcome::PausedNotice,
                stage,
                reply: Some(notice.to_string()),
            });
        }
        stage = self.step(&stage, TurnEvent::ControlClear, &ctx)?.to;

        let routed = match self
            .router
            .route(&self.gate, &thread, &event.text, self.negotiation.history_window, &ctx)
            .await
        {
            Ok(routed) => routed,
            Err(fault) => return self.deflect(stage, thread, fault, &ctx).await,
        };
        if routed.classification.intent.signals_interest() {
            thread.interest_confirmed = true;
        }
        if routed.classification.fields.availability == Some(true) {
            thread.availability_confirmed = true;
        }
        if let Some(offer) = routed.classification.fields.offer {
            thread.counterparty_offer = Some(offer);
        }
        stage = self.step(&stage, TurnEvent::IntentClassified, &ctx)?.to;

        // Bounds are cached on the thread after the first successful fetch.
        if thread.bounds.is_none() {
            let fetched = tokio::time::timeout(
                self.collaborator_timeout,
                self.collaborators.bounds.bounds_for(&event.thread_id),
            )
            .await;
            match fetched {
                Ok(Ok(bounds)) => thread.bounds = bounds,
                Ok(Err(error)) => {
                    let fault =
                        CollaboratorFault::Failed { name: "bounds", message: error.to_string() };
                    return self.deflect(stage, thread, fault, &ctx).await;
                }
                Err(_) => {
                    let fault = CollaboratorFault::Timeout {
                        name: "bounds",
                        timeout_secs: self.collaborator_timeout.as_secs(),
                    };
                    return self.deflect(stage, thread, fault, &ctx).await;
                }
            }
        }
        stage = self.step(&stage, TurnEvent::BoundsReady, &ctx)?.to;

        let decision = match routed.preset_reply {
            Some(preset) => NegotiationDecision {
                action: NegotiationAction::Clarify,
                reply_text: Some(preset),
            },
            None => decide(&DecisionInput {
                intent: routed.classification.intent,
                offer: routed.classification.fields.offer,
                availability: routed.classification.fields.availability,
                bounds: thread.bounds,
                last_offered_price: thread.last_offered_price,
                interest_confirmed: thread.interest_confirmed,
                availability_confirmed: thread.availability_confirmed,
                counter_step_pct: self.negotiation.counter_step_pct,
            }),
        };
        self.audit.emit(
            AuditEvent::new(
                ctx.thread_id.clone(),
                ctx.round,
                ctx.correlation_id.clone(),
                "decision.evaluated",
                AuditCategory::Decision,
                ctx.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("action", decision.action.kind())
            .with_metadata("intent", routed.classification.intent.as_str()),
        );
        stage = self.step(&stage, TurnEvent::DecisionMade, &ctx)?.to;

        let reply = match self.compose_reply(&decision, &thread, &event.text, &ctx).await {
            Ok(reply) => reply,
            Err(fault) => return self.deflect(stage, thread, fault, &ctx).await,
        };

        match self.dispatcher.dispatch(&event.thread_id, thread.round, &reply, &ctx).await {
            Ok(DispatchOutcome::Sent) => {}
            Ok(DispatchOutcome::SuppressedByTakeover) => {
                thread.human_takeover = true;
                stage = self.step(&stage, TurnEvent::TakeoverActive, &ctx)?.to;
                self.persist_turn(&mut thread, stage, "takeover_at_dispatch", None).await?;
                return Ok(TurnReport {
                    outcome: TurnOutcome::SuppressedByTakeover,
                    stage,
                    reply: None,
                });
            }
            Err(fault) => return self.deflect(stage, thread, fault, &ctx).await,
        }
        thread.push_turn(Sender::Agent, reply.as_str());
        apply_decision_effects(&mut thread, &decision.action);

        stage = self.step(&stage, TurnEvent::ReplyDispatched, &ctx)?.to;
        self.persist_turn(&mut thread, stage, decision.action.kind(), Some(reply.clone())).await?;
        stage = self.step(&stage, TurnEvent::TurnPersisted, &ctx)?.to;

        if decision.action.is_terminal() {
            stage = self.step(&stage, TurnEvent::TerminalRecorded, &ctx)?.to;
            self.persist_turn(&mut thread, stage, decision.action.kind(), None).await?;
        }

        info!(
            event_name = "turn.completed",
            correlation_id = event.event_id.as_str(),
            thread_id = event.thread_id.as_str(),
            round = thread.round,
            action = decision.action.kind(),
            "turn completed"
        );
        Ok(TurnReport {
            outcome: TurnOutcome::Replied { action: decision.action.kind().to_string() },
            stage,
            reply: Some(reply),
        })
    }

    /// Reply text for the decided action: a preset from the guardrail path,
    /// a deterministic template, or generated text screened on the way out.
    async fn compose_reply(
        &self,
        decision: &NegotiationDecision,
        thread: &ConversationThread,
        inbound: &str,
        ctx: &AuditContext,
    ) -> Result<String, CollaboratorFault> {
        if let Some(preset) = &decision.reply_text {
            return Ok(preset.clone());
        }
        if let Some(template) = replies::templated(&decision.action) {
            return Ok(template);
        }

        let prompt = replies::compose_prompt(
            &decision.action,
            thread,
            inbound,
            self.negotiation.history_window,
        );
        let generated = tokio::time::timeout(
            self.collaborator_timeout,
            self.collaborators.generator.generate(&prompt),
        )
        .await;
        let generated = match generated {
            Ok(Ok(text)) => text,
            Ok(Err(error)) => {
                return Err(CollaboratorFault::Failed {
                    name: "generator",
                    message: error.to_string(),
                });
            }
            Err(_) => {
                return Err(CollaboratorFault::Timeout {
                    name: "generator",
                    timeout_secs: self.collaborator_timeout.as_secs(),
                });
            }
        };

        let verdict = self.gate.run_guarded(GuardDirection::Output, &generated, ctx).await;
        Ok(verdict.fallback_text.unwrap_or(generated))
    }

    /// A collaborator fault ends the turn with a deflection instead of an
    /// error; the event stays admitted, so a webhook retry of the same id
    /// is absorbed rather than replayed.
    async fn deflect(
        &self,
        stage: TurnStage,
        mut thread: ConversationThread,
        fault: CollaboratorFault,
        ctx: &AuditContext,
    ) -> Result<TurnReport, EngineError> {
        self.audit.emit(
            AuditEvent::new(
                ctx.thread_id.clone(),
                ctx.round,
                ctx.correlation_id.clone(),
                "turn.collaborator_failed",
                AuditCategory::System,
                ctx.actor.clone(),
                AuditOutcome::Failed,
            )
            .with_metadata("collaborator", fault.name())
            .with_metadata("fault", fault.to_string()),
        );
        let stage = self.step(&stage, TurnEvent::CollaboratorFailed, ctx)?.to;

        let deflection = deflection_text();
        match self.dispatcher.dispatch(&thread.thread_id, thread.round, deflection, ctx).await {
            Ok(DispatchOutcome::Sent) => thread.push_turn(Sender::Agent, deflection),
            Ok(DispatchOutcome::SuppressedByTakeover) => {}
            Err(error) => {
                warn!(
                    event_name = "turn.deflection_failed",
                    correlation_id = %ctx.correlation_id,
                    thread_id = thread.thread_id.as_str(),
                    error = %error,
                    "deflection could not be delivered"
                );
            }
        }
        self.persist_turn(&mut thread, stage, "deflect", Some(fault.to_string())).await?;

        Ok(TurnReport {
            outcome: TurnOutcome::Deflected,
            stage,
            reply: Some(deflection.to_string()),
        })
    }

    async fn persist_turn(
        &self,
        thread: &mut ConversationThread,
        stage: TurnStage,
        action: &str,
        detail: Option<String>,
    ) -> Result<(), EngineError> {
        thread.stage = stage;
        self.stores.sessions.save(thread).await?;

        let mut checkpoint =
            Checkpoint::new(thread.thread_id.clone(), thread.round, stage).with_action(action);
        if let Some(detail) = detail {
            checkpoint = checkpoint.with_detail(detail);
        }
        // The checkpoint trail is for audit and replay; losing one entry is
        // not worth failing a turn that already changed state.
        if let Err(error) = self.stores.checkpoints.append(checkpoint).await {
            warn!(
                event_name = "turn.checkpoint_failed",
                thread_id = thread.thread_id.as_str(),
                round = thread.round,
                error = %error,
                "checkpoint append failed"
            );
        }
        Ok(())
    }

    fn step(
        &self,
        stage: &TurnStage,
        event: TurnEvent,
        ctx: &AuditContext,
    ) -> Result<TransitionOutcome, EngineError> {
        self.machine
            .apply_with_audit(stage, &event, self.audit.as_ref(), ctx)
            .map_err(|error| EngineError::Invariant(error.to_string()))
    }
}

fn apply_decision_effects(thread: &mut ConversationThread, action: &NegotiationAction) {
    match action {
        NegotiationAction::CounterOffer { price } => {
            thread.last_offered_price = Some(*price);
            thread.counter_rounds += 1;
        }
        NegotiationAction::Accept { final_price } => {
            thread.last_offered_price = Some(*final_price);
            thread.negotiation_status = NegotiationStatus::Confirmed;
        }
        NegotiationAction::Reject => thread.negotiation_status = NegotiationStatus::Rejected,
        NegotiationAction::Escalate => {
            thread.negotiation_status = NegotiationStatus::ManualRequired;
        }
        NegotiationAction::Close => thread.negotiation_status = NegotiationStatus::Closed,
        NegotiationAction::AskInterest
        | NegotiationAction::AskAvailability
        | NegotiationAction::AskRate
        | NegotiationAction::Clarify => {}
    }
}
