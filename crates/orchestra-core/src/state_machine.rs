//! Investigation lifecycle
//!
//! `Received -> Dispatching -> Correlating -> Responded` on the happy path;
//! `Errored` is reachable from every state that is not already terminal.

use crate::error::OrchestraError;
use crate::types::InvestigationState;

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: InvestigationState) -> &'static [InvestigationState] {
    use InvestigationState::{Correlating, Dispatching, Errored, Received, Responded};
    match from {
        Received => &[Dispatching, Errored],
        Dispatching => &[Correlating, Errored],
        Correlating => &[Responded, Errored],
        Responded | Errored => &[],
    }
}

/// Check one step of the lifecycle
///
/// # Errors
/// Returns `OrchestraError::IllegalTransition` when `to` is not reachable
/// from `from`
pub fn validate_transition(
    from: InvestigationState,
    to: InvestigationState,
) -> Result<(), OrchestraError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(OrchestraError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InvestigationState::*;

    #[test]
    fn happy_path() {
        assert!(validate_transition(Received, Dispatching).is_ok());
        assert!(validate_transition(Dispatching, Correlating).is_ok());
        assert!(validate_transition(Correlating, Responded).is_ok());
    }

    #[test]
    fn errored_from_any_live_state() {
        for from in [Received, Dispatching, Correlating] {
            assert!(validate_transition(from, Errored).is_ok());
        }
    }

    #[test]
    fn rejects_skips_and_exits_from_terminal_states() {
        assert!(validate_transition(Received, Correlating).is_err());
        assert!(validate_transition(Received, Responded).is_err());
        assert!(validate_transition(Responded, Errored).is_err());
        assert!(validate_transition(Errored, Dispatching).is_err());
        assert!(allowed_transitions(Responded).is_empty());
    }
}
