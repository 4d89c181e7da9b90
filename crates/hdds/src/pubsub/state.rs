// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The state lattice shared by Connection, ReaderGroup and
//! DataSetReader (spec §3 invariant 3, §4.2-§4.4).

use crate::pubsub::error::CauseStatus;
use crate::pubsub::ids::PubSubId;
use std::sync::Arc;

/// A user-supplied callback invoked on every observable state
/// transition of any Connection, ReaderGroup or DataSetReader (spec §6
/// "Management API", §7 "User visibility"). Arguments are the
/// transitioning entity's id, its new state, and the cause stamped
/// alongside the transition.
pub type StateChangeCallback = Arc<dyn Fn(PubSubId, PubSubState, CauseStatus) + Send + Sync>;

/// `DISABLED < PAUSED < PREOPERATIONAL < OPERATIONAL`; `ERROR` is
/// orthogonal and dominates when any ancestor forces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PubSubState {
    Disabled,
    Paused,
    PreOperational,
    Operational,
    Error,
}

impl PubSubState {
    /// Rank in the `DISABLED < PAUSED < PREOPERATIONAL < OPERATIONAL`
    /// lattice. `Error` has no rank since it is orthogonal — callers
    /// that need dominance must special-case it.
    fn rank(self) -> Option<u8> {
        match self {
            PubSubState::Disabled => Some(0),
            PubSubState::Paused => Some(1),
            PubSubState::PreOperational => Some(2),
            PubSubState::Operational => Some(3),
            PubSubState::Error => None,
        }
    }

    /// True if `self <= other` in the lattice (spec §3 invariant 3,
    /// "a DataSetReader's state is <= its ReaderGroup's state..."),
    /// treating `Error` as dominant over everything including itself.
    pub fn dominated_by(self, other: PubSubState) -> bool {
        if other == PubSubState::Error {
            return true;
        }
        match (self.rank(), other.rank()) {
            (Some(a), Some(b)) => a <= b,
            _ => self == PubSubState::Error,
        }
    }

    pub fn is_disabled_like(self) -> bool {
        matches!(self, PubSubState::Disabled | PubSubState::Paused | PubSubState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominance_respects_lattice_order() {
        assert!(PubSubState::Disabled.dominated_by(PubSubState::Operational));
        assert!(!PubSubState::Operational.dominated_by(PubSubState::Disabled));
        assert!(PubSubState::PreOperational.dominated_by(PubSubState::PreOperational));
    }

    #[test]
    fn error_dominates_everything() {
        assert!(PubSubState::Operational.dominated_by(PubSubState::Error));
        assert!(PubSubState::Error.dominated_by(PubSubState::Error));
    }
}
