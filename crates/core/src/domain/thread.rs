use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::turn::TurnStage;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Who authored a message on a thread. Automated replies are tagged `Agent`
/// so they stay distinguishable from human-operator and system messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    Counterparty,
    Agent,
    Human,
    System,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counterparty => "counterparty",
            Self::Agent => "agent",
            Self::Human => "human",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "counterparty" => Some(Self::Counterparty),
            "agent" => Some(Self::Agent),
            "human" => Some(Self::Human),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Pending,
    Confirmed,
    ManualRequired,
    Rejected,
    Closed,
}

impl NegotiationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::ManualRequired => "manual_required",
            Self::Rejected => "rejected",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "manual_required" => Some(Self::ManualRequired),
            "rejected" => Some(Self::Rejected),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// A round in one of these statuses is finished for the automation; the
    /// next inbound message opens a fresh round.
    pub fn is_round_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::ManualRequired | Self::Rejected | Self::Closed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub sender: Sender,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// The `[min_price, max_price]` interval within which an offer is
/// automatically acceptable. Fetched once per thread and cached on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub min_price: Decimal,
    pub max_price: Decimal,
}

impl PriceBounds {
    pub fn new(min_price: Decimal, max_price: Decimal) -> Self {
        Self { min_price, max_price }
    }

    /// `min > max` is a fatal data error for the thread's negotiation.
    pub fn is_inverted(&self) -> bool {
        self.min_price > self.max_price
    }
}

/// Out-of-band operator switches. `human_takeover` suppresses every
/// automated reply; `agent_paused` produces a single fixed notice instead
/// of entering classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFlags {
    pub human_takeover: bool,
    pub agent_paused: bool,
}

/// One ongoing negotiation, keyed by the stable external channel identity.
/// Rounds live in the `round` counter, not in separate rows; history is
/// append-only within a round and cleared when a new round opens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: ThreadId,
    pub round: u32,
    pub stage: TurnStage,
    pub negotiation_status: NegotiationStatus,
    pub counterparty_offer: Option<Decimal>,
    pub bounds: Option<PriceBounds>,
    pub last_offered_price: Option<Decimal>,
    /// Counter-offer pacing counter, distinct from the conversation `round`.
    pub counter_rounds: u32,
    pub interest_confirmed: bool,
    pub availability_confirmed: bool,
    pub history: Vec<HistoryTurn>,
    pub human_takeover: bool,
    pub agent_paused: bool,
    pub last_active: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn new(thread_id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            round: 1,
            stage: TurnStage::Received,
            negotiation_status: NegotiationStatus::Pending,
            counterparty_offer: None,
            bounds: None,
            last_offered_price: None,
            counter_rounds: 0,
            interest_confirmed: false,
            availability_confirmed: false,
            history: Vec::new(),
            human_takeover: false,
            agent_paused: false,
            last_active: now,
            created_at: now,
        }
    }

    pub fn push_turn(&mut self, sender: Sender, text: impl Into<String>) {
        self.history.push(HistoryTurn { sender, text: text.into(), at: Utc::now() });
    }

    /// Most recent `window` turns, oldest first; the generation collaborator
    /// only needs this much context.
    pub fn recent_history(&self, window: usize) -> &[HistoryTurn] {
        let start = self.history.len().saturating_sub(window);
        &self.history[start..]
    }

    /// Clears per-round negotiation state after `advance_round`. Bounds and
    /// progression markers survive; they describe the counterparty, not the
    /// round.
    pub fn begin_round(&mut self, new_round: u32) {
        self.round = new_round;
        self.stage = TurnStage::Received;
        self.negotiation_status = NegotiationStatus::Pending;
        self.counterparty_offer = None;
        self.last_offered_price = None;
        self.counter_rounds = 0;
        self.history.clear();
    }

    /// Session-TTL expiry: discard history and offer state but preserve the
    /// round counter.
    pub fn reset_expired(&mut self) {
        let round = self.round;
        self.begin_round(round);
        self.bounds = None;
        self.interest_confirmed = false;
        self.availability_confirmed = false;
    }

    pub fn is_round_terminal(&self) -> bool {
        self.negotiation_status.is_round_terminal()
    }

    pub fn control_flags(&self) -> ControlFlags {
        ControlFlags { human_takeover: self.human_takeover, agent_paused: self.agent_paused }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConversationThread, NegotiationStatus, PriceBounds, Sender, ThreadId};
    use crate::turn::TurnStage;
    use rust_decimal::Decimal;

    #[test]
    fn sender_round_trips_from_storage_encoding() {
        let cases = [Sender::Counterparty, Sender::Agent, Sender::Human, Sender::System];
        for sender in cases {
            assert_eq!(Sender::parse(sender.as_str()), Some(sender));
        }
        assert_eq!(Sender::parse("gremlin"), None);
    }

    #[test]
    fn negotiation_status_round_trips_from_storage_encoding() {
        let cases = [
            NegotiationStatus::Pending,
            NegotiationStatus::Confirmed,
            NegotiationStatus::ManualRequired,
            NegotiationStatus::Rejected,
            NegotiationStatus::Closed,
        ];
        for status in cases {
            assert_eq!(NegotiationStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn new_round_clears_offers_but_keeps_bounds_and_markers() {
        let mut thread = ConversationThread::new(ThreadId("ig:creator-1".to_string()));
        thread.bounds = Some(PriceBounds::new(Decimal::from(100), Decimal::from(150)));
        thread.last_offered_price = Some(Decimal::from(120));
        thread.counter_rounds = 2;
        thread.interest_confirmed = true;
        thread.negotiation_status = NegotiationStatus::Confirmed;
        thread.push_turn(Sender::Counterparty, "deal");

        thread.begin_round(2);

        assert_eq!(thread.round, 2);
        assert_eq!(thread.stage, TurnStage::Received);
        assert_eq!(thread.negotiation_status, NegotiationStatus::Pending);
        assert!(thread.last_offered_price.is_none());
        assert_eq!(thread.counter_rounds, 0);
        assert!(thread.history.is_empty());
        assert!(thread.bounds.is_some());
        assert!(thread.interest_confirmed);
    }

    #[test]
    fn expiry_reset_preserves_round() {
        let mut thread = ConversationThread::new(ThreadId("ig:creator-2".to_string()));
        thread.round = 4;
        thread.bounds = Some(PriceBounds::new(Decimal::from(100), Decimal::from(150)));
        thread.push_turn(Sender::Agent, "what's your rate?");

        thread.reset_expired();

        assert_eq!(thread.round, 4);
        assert!(thread.history.is_empty());
        assert!(thread.bounds.is_none());
        assert!(!thread.interest_confirmed);
    }

    #[test]
    fn recent_history_returns_tail_window() {
        let mut thread = ConversationThread::new(ThreadId("ig:creator-3".to_string()));
        for i in 0..10 {
            thread.push_turn(Sender::Counterparty, format!("message {i}"));
        }
        let recent = thread.recent_history(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].text, "message 7");
        assert_eq!(thread.recent_history(50).len(), 10);
    }

    #[test]
    fn inverted_bounds_are_detected() {
        assert!(PriceBounds::new(Decimal::from(200), Decimal::from(150)).is_inverted());
        assert!(!PriceBounds::new(Decimal::from(150), Decimal::from(150)).is_inverted());
    }
}
