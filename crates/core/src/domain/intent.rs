use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the classifier collaborator decided an inbound message means.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Interest,
    Negotiate,
    Question,
    Reject,
    Accept,
    Unclear,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interest => "interest",
            Self::Negotiate => "negotiate",
            Self::Question => "question",
            Self::Reject => "reject",
            Self::Accept => "accept",
            Self::Unclear => "unclear",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interest" => Some(Self::Interest),
            "negotiate" => Some(Self::Negotiate),
            "question" => Some(Self::Question),
            "reject" => Some(Self::Reject),
            "accept" => Some(Self::Accept),
            "unclear" => Some(Self::Unclear),
            _ => None,
        }
    }

    /// Intents that imply the counterparty is engaged with the deal itself.
    pub fn signals_interest(&self) -> bool {
        matches!(self, Self::Interest | Self::Negotiate | Self::Accept)
    }
}

/// Structured fields the classifier pulled out of the message text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    /// Numeric price offer, currency-scoped to the thread.
    pub offer: Option<Decimal>,
    /// Some(true): available for the campaign window; Some(false): not.
    pub availability: Option<bool>,
    /// Free-form topic for QUESTION intents.
    pub topic: Option<String>,
}

/// Classifier collaborator output: intent plus extracted fields.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub fields: ExtractedFields,
}

impl Default for Intent {
    fn default() -> Self {
        Self::Unclear
    }
}

#[cfg(test)]
mod tests {
    use super::Intent;

    #[test]
    fn intent_round_trips_from_storage_encoding() {
        let cases = [
            Intent::Interest,
            Intent::Negotiate,
            Intent::Question,
            Intent::Reject,
            Intent::Accept,
            Intent::Unclear,
        ];
        for intent in cases {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("smalltalk"), None);
    }

    #[test]
    fn engagement_signal_covers_deal_intents_only() {
        assert!(Intent::Interest.signals_interest());
        assert!(Intent::Negotiate.signals_interest());
        assert!(Intent::Accept.signals_interest());
        assert!(!Intent::Question.signals_interest());
        assert!(!Intent::Unclear.signals_interest());
    }
}
