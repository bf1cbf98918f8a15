//! Booking lifecycle and the capacity-ledger effect of each transition.
//!
//! ```text
//! requested ─┬─> confirmed ─┬─> completed
//!            │              └─> cancelled
//!            ├─> rejected
//!            └─> cancelled
//! ```

use crate::model::BookingStatus;

/// What a transition does to the capacity ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    /// Units become reserved for the booking's window.
    Consume,
    /// Previously reserved units return to the pool.
    Release,
    /// Ledger untouched.
    Keep,
}

/// Status every new booking is persisted in.
pub const INITIAL_STATUS: BookingStatus = BookingStatus::Requested;

/// Effect of a booking entering the ledger in `status`. New bookings arrive in
/// `INITIAL_STATUS`; replay after compaction brings them in as they last stood.
pub fn insert_effect(status: BookingStatus) -> LedgerEffect {
    if status.reserves_capacity() {
        LedgerEffect::Consume
    } else {
        LedgerEffect::Keep
    }
}

/// `None` when the transition is illegal.
pub fn transition(from: BookingStatus, to: BookingStatus) -> Option<LedgerEffect> {
    use BookingStatus::*;
    match (from, to) {
        (Requested, Confirmed) => Some(LedgerEffect::Keep),
        (Requested, Rejected) | (Requested, Cancelled) => Some(LedgerEffect::Release),
        (Confirmed, Cancelled) => Some(LedgerEffect::Release),
        // completed no longer reserves; the dates it releases are normally all past
        (Confirmed, Completed) => Some(LedgerEffect::Release),
        (Requested | Confirmed | Cancelled | Completed | Rejected, _) => None,
    }
}

pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
    transition(from, to).is_some()
}

/// Statuses reachable from `from` in one step.
pub fn successors(from: BookingStatus) -> Vec<BookingStatus> {
    use BookingStatus::*;
    [Requested, Confirmed, Cancelled, Completed, Rejected]
        .into_iter()
        .filter(|to| can_transition(from, *to))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use BookingStatus::*;

    const ALL: [BookingStatus; 5] = [Requested, Confirmed, Cancelled, Completed, Rejected];

    #[test]
    fn legal_transitions() {
        assert_eq!(transition(Requested, Confirmed), Some(LedgerEffect::Keep));
        assert_eq!(transition(Requested, Rejected), Some(LedgerEffect::Release));
        assert_eq!(transition(Requested, Cancelled), Some(LedgerEffect::Release));
        assert_eq!(transition(Confirmed, Cancelled), Some(LedgerEffect::Release));
        assert!(transition(Confirmed, Completed).is_some());
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for from in [Cancelled, Completed, Rejected] {
            assert!(successors(from).is_empty(), "{from} should be terminal");
            for to in ALL {
                assert!(!can_transition(from, to));
            }
        }
    }

    #[test]
    fn illegal_examples() {
        assert!(!can_transition(Completed, Confirmed));
        assert!(!can_transition(Confirmed, Requested));
        assert!(!can_transition(Confirmed, Rejected));
        assert!(!can_transition(Requested, Completed));
        for s in ALL {
            assert!(!can_transition(s, s), "self-transition on {s}");
        }
    }

    #[test]
    fn effect_agrees_with_reserving_statuses() {
        // Applying an effect must move a booking between counted and uncounted
        // exactly when its reserves_capacity flag flips.
        for from in ALL {
            for to in ALL {
                if let Some(effect) = transition(from, to) {
                    let flips = from.reserves_capacity() != to.reserves_capacity();
                    match effect {
                        LedgerEffect::Keep => assert!(!flips, "{from}->{to}"),
                        LedgerEffect::Release => {
                            assert!(flips && from.reserves_capacity(), "{from}->{to}")
                        }
                        LedgerEffect::Consume => {
                            assert!(flips && to.reserves_capacity(), "{from}->{to}")
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn initial_state_consumes() {
        assert_eq!(insert_effect(INITIAL_STATUS), LedgerEffect::Consume);
        assert_eq!(insert_effect(Confirmed), LedgerEffect::Consume);
        assert_eq!(insert_effect(Cancelled), LedgerEffect::Keep);
        assert_eq!(insert_effect(Completed), LedgerEffect::Keep);
    }
}
