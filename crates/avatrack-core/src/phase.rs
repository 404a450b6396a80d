//! Avatar initializer phases.
//!
//! Pure, testable state machine with no IO or async dependencies.
//! `Ready` and `Abandoned` are terminal: once an initializer has been
//! abandoned nothing may move it forward again, which is what keeps a
//! superseded initializer from promoting itself late.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of one avatar initializer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    /// Attached, waiting for the avatar to be placed in the world.
    #[default]
    Starting,
    /// Placed; resolving the health-reporting part and settling.
    LocatingParts,
    /// Promoted to the tracker's current avatar.
    Ready,
    /// Superseded, detached or the tracker went away before `Ready`.
    Abandoned,
}

impl InitPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Abandoned)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Forward steps only; `Abandoned` is reachable from any non-terminal
    /// phase. Re-entering the same phase is rejected so callers can treat a
    /// `true` result as "something changed".
    pub fn can_advance_to(self, next: InitPhase) -> bool {
        match (self, next) {
            (Self::Starting, Self::LocatingParts) => true,
            (Self::LocatingParts, Self::Ready) => true,
            (Self::Starting | Self::LocatingParts, Self::Abandoned) => true,
            _ => false,
        }
    }

    /// Apply `next` if legal. Returns whether the phase changed.
    pub fn advance(&mut self, next: InitPhase) -> bool {
        if self.can_advance_to(next) {
            *self = next;
            true
        } else {
            false
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::LocatingParts => "locating_parts",
            Self::Ready => "ready",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for InitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
