//! Config Entry State Machine
//!
//! Valid lifecycle transitions for a ConfigEntry:
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//!
//! NotLoaded/Loaded/SetupError → UnloadInProgress → NotLoaded
//! ```

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// Attempt a transition to `to`, returning the new state on success.
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let reason = match (self, to) {
            (NotLoaded, SetupInProgress)
            | (SetupError, SetupInProgress)
            | (SetupInProgress, Loaded)
            | (SetupInProgress, SetupError)
            | (NotLoaded, UnloadInProgress)
            | (Loaded, UnloadInProgress)
            | (SetupError, UnloadInProgress)
            | (UnloadInProgress, NotLoaded) => return Ok(to),

            (Loaded, SetupInProgress) => "already loaded, unload first",
            (SetupInProgress, _) => "setup in progress",
            (UnloadInProgress, _) => "unload in progress",
            _ => "transition not allowed",
        };

        Err(InvalidTransition {
            from: self,
            to,
            reason,
        })
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}
