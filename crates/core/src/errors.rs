use thiserror::Error;

/// A collaborator call failed or timed out. Recoverable by design: the turn
/// ends with a generic deflection and the next inbound event retries from a
/// clean stage.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorFault {
    #[error("collaborator `{name}` timed out after {timeout_secs}s")]
    Timeout { name: &'static str, timeout_secs: u64 },
    #[error("collaborator `{name}` failed: {message}")]
    Failed { name: &'static str, message: String },
}

impl CollaboratorFault {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout { name, .. } | Self::Failed { name, .. } => name,
        }
    }
}

/// The only errors that escape the orchestrator to the webhook boundary.
/// Everything collaborator-shaped is converted into a turn outcome instead;
/// store unavailability must propagate because retry safety depends on the
/// event not having been admitted.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("engine invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Retryable from the caller's perspective: the inbound event was not
    /// consumed and a redelivery can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// The counter-party never sees internal errors; this is the worst-case
/// reply for anything the automation cannot resolve this turn.
pub fn deflection_text() -> &'static str {
    "Thanks for the message! Let me double-check a couple of things on our side and get back to you shortly."
}

#[cfg(test)]
mod tests {
    use super::{deflection_text, CollaboratorFault, EngineError};

    #[test]
    fn store_unavailability_is_the_only_retryable_error() {
        assert!(EngineError::StoreUnavailable("lock timeout".to_owned()).is_retryable());
        assert!(!EngineError::Invariant("stage skew".to_owned()).is_retryable());
    }

    #[test]
    fn fault_display_names_the_collaborator() {
        let fault = CollaboratorFault::Timeout { name: "classifier", timeout_secs: 30 };
        assert!(fault.to_string().contains("classifier"));
        assert_eq!(fault.name(), "classifier");
    }

    #[test]
    fn deflection_reads_like_a_human_reply() {
        let text = deflection_text();
        assert!(!text.to_ascii_lowercase().contains("error"));
        assert!(!text.contains("internal"));
    }
}
