//! Pure negotiation decision function. All I/O stays at the orchestrator
//! boundary; this module maps classified input onto the next action and is
//! unit-testable without any collaborator.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::intent::Intent;
use crate::domain::thread::PriceBounds;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NegotiationAction {
    AskInterest,
    AskAvailability,
    AskRate,
    Accept { final_price: Decimal },
    CounterOffer { price: Decimal },
    Escalate,
    Reject,
    Clarify,
    Close,
}

impl NegotiationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AskInterest => "ask_interest",
            Self::AskAvailability => "ask_availability",
            Self::AskRate => "ask_rate",
            Self::Accept { .. } => "accept",
            Self::CounterOffer { .. } => "counter_offer",
            Self::Escalate => "escalate",
            Self::Reject => "reject",
            Self::Clarify => "clarify",
            Self::Close => "close",
        }
    }

    /// Terminal for the automation: the round is done and the next inbound
    /// message opens a new one. Escalation stays terminal here even though a
    /// human continues the wider negotiation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accept { .. } | Self::Reject | Self::Escalate | Self::Close)
    }

    /// Actions whose reply text is a deterministic template with the price
    /// interpolated, rather than delegated to the generation collaborator.
    pub fn is_templated(&self) -> bool {
        matches!(
            self,
            Self::Accept { .. } | Self::CounterOffer { .. } | Self::Reject | Self::Escalate | Self::Close
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationDecision {
    pub action: NegotiationAction,
    /// Filled by the generation step, never by the decision step.
    pub reply_text: Option<String>,
}

impl NegotiationDecision {
    pub fn new(action: NegotiationAction) -> Self {
        Self { action, reply_text: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionInput {
    pub intent: Intent,
    pub offer: Option<Decimal>,
    pub availability: Option<bool>,
    pub bounds: Option<PriceBounds>,
    pub last_offered_price: Option<Decimal>,
    pub interest_confirmed: bool,
    pub availability_confirmed: bool,
    /// Multiplicative counter-offer step, e.g. 0.20 for +20% per round.
    pub counter_step_pct: Decimal,
}

/// Decision rules, evaluated in order:
///
/// 1. REJECT intent rejects, terminally.
/// 2. UNCLEAR intent asks for clarification.
/// 3. An explicit "not available" closes the thread politely.
/// 4. ACCEPT intent with a standing last offered price confirms the deal at
///    that anchor.
/// 5. Without a numeric offer the engine never advances the price talk; it
///    walks the ask ladder (interest -> availability -> rate).
/// 6. An offer at or under `max_price` is accepted as-is; the boundary is
///    inclusive on the accept side only.
/// 7. Above `max_price`, the next counter is the last offered price (or
///    `min_price`) stepped up by `counter_step_pct` and rounded to 2dp;
///    once that step would reach `max_price`, a human takes over.
pub fn decide(input: &DecisionInput) -> NegotiationDecision {
    if input.intent == Intent::Reject {
        return NegotiationDecision::new(NegotiationAction::Reject);
    }
    if input.intent == Intent::Unclear {
        return NegotiationDecision::new(NegotiationAction::Clarify);
    }
    if input.availability == Some(false) {
        return NegotiationDecision::new(NegotiationAction::Close);
    }
    if input.intent == Intent::Accept {
        if let Some(anchor) = input.last_offered_price {
            return NegotiationDecision::new(NegotiationAction::Accept { final_price: anchor });
        }
    }

    let Some(offer) = input.offer else {
        let action = if input.intent == Intent::Question {
            NegotiationAction::Clarify
        } else if !input.interest_confirmed && !input.intent.signals_interest() {
            NegotiationAction::AskInterest
        } else if !input.availability_confirmed && input.availability != Some(true) {
            NegotiationAction::AskAvailability
        } else {
            NegotiationAction::AskRate
        };
        return NegotiationDecision::new(action);
    };

    // The orchestrator fetches bounds before invoking the engine; missing or
    // inverted bounds cannot be resolved here, so the safety valve applies.
    let Some(bounds) = input.bounds else {
        return NegotiationDecision::new(NegotiationAction::Escalate);
    };
    if bounds.is_inverted() {
        return NegotiationDecision::new(NegotiationAction::Escalate);
    }

    if offer <= bounds.max_price {
        return NegotiationDecision::new(NegotiationAction::Accept { final_price: offer });
    }

    let anchor = input.last_offered_price.unwrap_or(bounds.min_price);
    let next_offer = (anchor * (Decimal::ONE + input.counter_step_pct)).round_dp(2);
    if next_offer >= bounds.max_price {
        NegotiationDecision::new(NegotiationAction::Escalate)
    } else {
        NegotiationDecision::new(NegotiationAction::CounterOffer { price: next_offer })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{decide, DecisionInput, NegotiationAction};
    use crate::domain::intent::Intent;
    use crate::domain::thread::PriceBounds;

    fn step_20pct() -> Decimal {
        Decimal::new(20, 2)
    }

    fn input(intent: Intent) -> DecisionInput {
        DecisionInput {
            intent,
            offer: None,
            availability: None,
            bounds: Some(PriceBounds::new(Decimal::from(100), Decimal::from(150))),
            last_offered_price: None,
            interest_confirmed: true,
            availability_confirmed: true,
            counter_step_pct: step_20pct(),
        }
    }

    #[test]
    fn reject_intent_is_terminal_reject() {
        let decision = decide(&input(Intent::Reject));
        assert_eq!(decision.action, NegotiationAction::Reject);
        assert!(decision.action.is_terminal());
    }

    #[test]
    fn unclear_intent_asks_for_clarification() {
        let decision = decide(&input(Intent::Unclear));
        assert_eq!(decision.action, NegotiationAction::Clarify);
        assert!(!decision.action.is_terminal());
    }

    #[test]
    fn explicit_unavailability_closes_the_thread() {
        let mut i = input(Intent::Interest);
        i.availability = Some(false);
        assert_eq!(decide(&i).action, NegotiationAction::Close);
    }

    #[test]
    fn missing_offer_never_advances_price_talk() {
        let decision = decide(&input(Intent::Negotiate));
        assert_eq!(decision.action, NegotiationAction::AskRate);
    }

    #[test]
    fn ask_ladder_probes_interest_then_availability_then_rate() {
        let mut i = input(Intent::Question);
        i.intent = Intent::Unclear;
        // unclear short-circuits before the ladder
        assert_eq!(decide(&i).action, NegotiationAction::Clarify);

        let mut i = input(Intent::Interest);
        i.interest_confirmed = false;
        i.availability_confirmed = false;
        // interest intent itself confirms interest, so availability is next
        assert_eq!(decide(&i).action, NegotiationAction::AskAvailability);

        i.availability = Some(true);
        assert_eq!(decide(&i).action, NegotiationAction::AskRate);

        let mut i = input(Intent::Question);
        i.interest_confirmed = false;
        // question with no engagement yet still gets a generated answer
        assert_eq!(decide(&i).action, NegotiationAction::Clarify);
    }

    #[test]
    fn accept_intent_confirms_at_standing_anchor() {
        let mut i = input(Intent::Accept);
        i.last_offered_price = Some(Decimal::from(120));
        let decision = decide(&i);
        assert_eq!(decision.action, NegotiationAction::Accept { final_price: Decimal::from(120) });
    }

    #[test]
    fn accept_intent_without_anchor_asks_for_rate() {
        assert_eq!(decide(&input(Intent::Accept)).action, NegotiationAction::AskRate);
    }

    #[test]
    fn offer_at_max_price_is_accepted_boundary_inclusive() {
        let mut i = input(Intent::Negotiate);
        i.offer = Some(Decimal::from(150));
        assert_eq!(decide(&i).action, NegotiationAction::Accept { final_price: Decimal::from(150) });
    }

    #[test]
    fn offer_a_cent_over_max_is_never_accepted() {
        let mut i = input(Intent::Negotiate);
        i.offer = Some(Decimal::new(15_001, 2));
        let decision = decide(&i);
        assert!(!matches!(decision.action, NegotiationAction::Accept { .. }));
    }

    #[test]
    fn counter_offer_steps_from_min_price_without_prior_anchor() {
        let mut i = input(Intent::Negotiate);
        i.offer = Some(Decimal::from(200));
        assert_eq!(
            decide(&i).action,
            NegotiationAction::CounterOffer { price: Decimal::new(12_000, 2) }
        );
    }

    #[test]
    fn worked_scenario_counters_twice_then_escalates() {
        // min 100, max 150, counterparty holds at 200
        let mut i = input(Intent::Negotiate);
        i.offer = Some(Decimal::from(200));

        let first = decide(&i);
        assert_eq!(first.action, NegotiationAction::CounterOffer { price: Decimal::new(12_000, 2) });

        i.last_offered_price = Some(Decimal::new(12_000, 2));
        let second = decide(&i);
        assert_eq!(
            second.action,
            NegotiationAction::CounterOffer { price: Decimal::new(14_400, 2) }
        );

        i.last_offered_price = Some(Decimal::new(14_400, 2));
        // 144 * 1.2 = 172.8 >= 150
        assert_eq!(decide(&i).action, NegotiationAction::Escalate);
    }

    #[test]
    fn inverted_bounds_force_escalation() {
        let mut i = input(Intent::Negotiate);
        i.offer = Some(Decimal::from(200));
        i.bounds = Some(PriceBounds::new(Decimal::from(300), Decimal::from(150)));
        assert_eq!(decide(&i).action, NegotiationAction::Escalate);
    }

    #[test]
    fn missing_bounds_force_escalation() {
        let mut i = input(Intent::Negotiate);
        i.offer = Some(Decimal::from(200));
        i.bounds = None;
        assert_eq!(decide(&i).action, NegotiationAction::Escalate);
    }

    #[test]
    fn escalation_converges_in_bounded_rounds_from_any_floor() {
        for min in [1u32, 10, 100, 999] {
            let bounds = PriceBounds::new(Decimal::from(min), Decimal::from(1_000_000u32));
            let mut i = input(Intent::Negotiate);
            i.bounds = Some(bounds);
            i.offer = Some(Decimal::from(2_000_000u32));

            let mut rounds = 0;
            loop {
                match decide(&i).action {
                    NegotiationAction::CounterOffer { price } => {
                        i.last_offered_price = Some(price);
                        rounds += 1;
                        assert!(rounds < 200, "no infinite negotiation loop from min {min}");
                    }
                    NegotiationAction::Escalate => break,
                    other => panic!("unexpected action {other:?}"),
                }
            }
        }
    }
}
