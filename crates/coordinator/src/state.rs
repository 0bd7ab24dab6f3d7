//! Lifecycle of a candidate transaction on one node.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a candidate stands in the signing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateState {
    /// No signatures yet.
    Built,

    /// Some, but fewer than the threshold.
    PartiallySigned,

    /// At least the threshold; ready for broadcast.
    Quorate,

    /// Accepted by the network.
    Broadcast,

    /// Failed validation; never processed again.
    Rejected,

    /// Dropped after outliving its expiry.
    Expired,
}

impl CandidateState {
    /// The signing state implied by the number of signers.
    pub const fn for_signatures(signatures: usize, required: usize) -> Self {
        if signatures == 0 {
            CandidateState::Built
        } else if signatures < required {
            CandidateState::PartiallySigned
        } else {
            CandidateState::Quorate
        }
    }

    /// Whether no further processing happens in this state.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            CandidateState::Broadcast | CandidateState::Rejected | CandidateState::Expired
        )
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Signing states may move freely among themselves since pruning invalid signatures can lower
    /// the count. Only a quorate candidate can be broadcast, and terminal states are final.
    pub const fn can_transition_to(&self, next: CandidateState) -> bool {
        if self.is_terminal() {
            return false;
        }

        match next {
            CandidateState::Built | CandidateState::PartiallySigned | CandidateState::Quorate => {
                true
            }
            CandidateState::Broadcast => matches!(self, CandidateState::Quorate),
            CandidateState::Rejected | CandidateState::Expired => true,
        }
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateState::Built => "built",
            CandidateState::PartiallySigned => "partially signed",
            CandidateState::Quorate => "quorate",
            CandidateState::Broadcast => "broadcast",
            CandidateState::Rejected => "rejected",
            CandidateState::Expired => "expired",
        };

        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_state() -> impl Strategy<Value = CandidateState> {
        prop_oneof![
            Just(CandidateState::Built),
            Just(CandidateState::PartiallySigned),
            Just(CandidateState::Quorate),
            Just(CandidateState::Broadcast),
            Just(CandidateState::Rejected),
            Just(CandidateState::Expired),
        ]
    }

    #[test]
    fn signing_states_follow_signature_count() {
        assert_eq!(CandidateState::for_signatures(0, 2), CandidateState::Built);
        assert_eq!(
            CandidateState::for_signatures(1, 2),
            CandidateState::PartiallySigned
        );
        assert_eq!(CandidateState::for_signatures(2, 2), CandidateState::Quorate);
        assert_eq!(CandidateState::for_signatures(3, 2), CandidateState::Quorate);
    }

    #[test]
    fn only_quorate_broadcasts() {
        assert!(CandidateState::Quorate.can_transition_to(CandidateState::Broadcast));
        assert!(!CandidateState::PartiallySigned.can_transition_to(CandidateState::Broadcast));
        assert!(!CandidateState::Built.can_transition_to(CandidateState::Broadcast));
    }

    proptest! {
        #[test]
        fn terminal_states_are_final(from in arb_state(), to in arb_state()) {
            if from.is_terminal() {
                prop_assert!(!from.can_transition_to(to));
            } else {
                prop_assert!(from.can_transition_to(to) || to == CandidateState::Broadcast);
            }
        }
    }
}
