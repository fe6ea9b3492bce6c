//! Reply text. Terminal and price-bearing actions use fixed templates with
//! the price interpolated; conversational actions (clarify, the ask ladder)
//! get a prompt for the generation collaborator instead.

use rust_decimal::Decimal;

use haggle_core::{ConversationThread, NegotiationAction};

/// Stands in for a generated reply whenever the output guardrail blocks it
/// or the safety check itself cannot be completed.
pub fn neutral_fallback() -> &'static str {
    "Thanks for your message! Let me check on that and follow up with you soon."
}

pub fn paused_notice() -> &'static str {
    "Thanks for reaching out! We're briefly pausing replies on our side; \
     someone will pick this conversation back up shortly."
}

/// Template text for the actions whose wording is deterministic. Returns
/// `None` for actions that are generator-backed.
pub fn templated(action: &NegotiationAction) -> Option<String> {
    match action {
        NegotiationAction::Accept { final_price } => Some(format!(
            "That works on our end! We're happy to confirm ${} for this collaboration. \
             We'll follow up with the details shortly!",
            money(final_price)
        )),
        NegotiationAction::CounterOffer { price } => Some(format!(
            "Thanks for sharing your rate! Our budget for this campaign is closer to ${}. \
             Would that work for you?",
            money(price)
        )),
        NegotiationAction::Reject => Some(
            "Totally understand, thanks for considering it! If anything changes on your side, \
             we'd love to hear from you."
                .to_string(),
        ),
        NegotiationAction::Escalate => Some(
            "Thanks for your patience! I'm looping in a teammate who can take a closer look at \
             the numbers. They'll reach out to you directly."
                .to_string(),
        ),
        NegotiationAction::Close => Some(
            "No problem at all, thanks for letting us know! We'll keep you in mind for future \
             campaigns."
                .to_string(),
        ),
        NegotiationAction::AskInterest
        | NegotiationAction::AskAvailability
        | NegotiationAction::AskRate
        | NegotiationAction::Clarify => None,
    }
}

/// Prompt for the generation collaborator. Carries the recent conversation
/// window plus a directive for the action being taken.
pub fn compose_prompt(
    action: &NegotiationAction,
    thread: &ConversationThread,
    inbound: &str,
    history_window: usize,
) -> String {
    let directive = match action {
        NegotiationAction::AskInterest => {
            "Ask, in one friendly sentence, whether they would be interested in collaborating \
             with the brand on this campaign."
        }
        NegotiationAction::AskAvailability => {
            "Ask, in one friendly sentence, whether they are available during the campaign window."
        }
        NegotiationAction::AskRate => {
            "Ask, in one friendly sentence, what rate they would charge for this collaboration."
        }
        _ => {
            "Answer their question briefly and warmly, without quoting any prices, then steer \
             the conversation back to the collaboration."
        }
    };

    let mut prompt = String::from(
        "You are a brand representative negotiating an influencer collaboration over direct \
         messages. Reply with a single short, casual message. Never invent prices or terms.\n\n",
    );
    for turn in thread.recent_history(history_window) {
        prompt.push_str(turn.sender.as_str());
        prompt.push_str(": ");
        prompt.push_str(&turn.text);
        prompt.push('\n');
    }
    prompt.push_str("counterparty: ");
    prompt.push_str(inbound);
    prompt.push_str("\n\nInstruction: ");
    prompt.push_str(directive);
    prompt
}

fn money(price: &Decimal) -> String {
    price.round_dp(2).to_string()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use haggle_core::{ConversationThread, NegotiationAction, Sender, ThreadId};

    use super::{compose_prompt, neutral_fallback, templated};

    #[test]
    fn counter_offer_interpolates_the_price() {
        let text = templated(&NegotiationAction::CounterOffer { price: Decimal::new(14400, 2) })
            .expect("counter offers are templated");
        assert!(text.contains("$144.00"));
    }

    #[test]
    fn accept_quotes_the_final_price() {
        let text = templated(&NegotiationAction::Accept { final_price: Decimal::from(150) })
            .expect("accepts are templated");
        assert!(text.contains("$150"));
    }

    #[test]
    fn conversational_actions_have_no_template() {
        assert!(templated(&NegotiationAction::Clarify).is_none());
        assert!(templated(&NegotiationAction::AskRate).is_none());
    }

    #[test]
    fn prompt_carries_the_recent_window_and_inbound_text() {
        let mut thread = ConversationThread::new(ThreadId("ig:creator-7".to_string()));
        thread.push_turn(Sender::Agent, "would you be interested?");
        thread.push_turn(Sender::Counterparty, "maybe, what's the product?");

        let prompt =
            compose_prompt(&NegotiationAction::Clarify, &thread, "what's the product?", 12);
        assert!(prompt.contains("would you be interested?"));
        assert!(prompt.contains("counterparty: what's the product?"));
        assert!(prompt.contains("without quoting any prices"));
    }

    #[test]
    fn templates_stick_to_plain_punctuation() {
        let actions = [
            NegotiationAction::Accept { final_price: Decimal::from(150) },
            NegotiationAction::CounterOffer { price: Decimal::from(120) },
            NegotiationAction::Reject,
            NegotiationAction::Escalate,
            NegotiationAction::Close,
        ];
        for action in actions {
            let text = templated(&action).expect("templated");
            assert!(!text.contains('\u{2014}'), "em dash in reply template: {text}");
        }
    }

    #[test]
    fn fallback_never_mentions_internals() {
        let text = neutral_fallback();
        assert!(!text.to_ascii_lowercase().contains("error"));
        assert!(!text.to_ascii_lowercase().contains("guardrail"));
    }
}
