use std::collections::HashMap;

use crate::state::NodeId;
use crate::timer::Timer;

/// The three roles a Raft node can hold. Carries no data itself — role-specific bookkeeping
/// (the election timer, the leadership state) lives alongside it on `Node`, not inside the
/// variants, since a candidate's vote tally is scoped to a single election call rather than
/// being long-lived node state (see `Node::run_election`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl Default for Role {
    fn default() -> Self {
        Role::Follower
    }
}

/// Per-follower replication bookkeeping, tracked only while this node is the leader.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FollowerState {
    /// The next log index we believe should be sent to this follower.
    pub next_index: u64,
    /// Whether the most recent `AppendEntries` to this follower succeeded.
    pub succeeded: bool,
}

impl FollowerState {
    pub fn new(next_index: u64) -> Self {
        Self { next_index, succeeded: false }
    }
}

/// Leadership bookkeeping, created fresh on each leadership acquisition and destroyed on any
/// step-down path (§4.4, §9's "leadership state lifecycle").
#[derive(Clone, Debug)]
pub struct LeadershipState {
    /// Deadline for the next heartbeat/tick.
    pub update_timer: Timer,
    pub followers: HashMap<NodeId, FollowerState>,
}

impl LeadershipState {
    pub fn new(update_timer: Timer, peers: impl IntoIterator<Item = NodeId>, next_index: u64) -> Self {
        let followers =
            peers.into_iter().map(|peer| (peer, FollowerState::new(next_index))).collect();
        Self { update_timer, followers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn new_leadership_state_seeds_every_peer() {
        let state = LeadershipState::new(Timer::new(Duration::from_millis(10), Duration::ZERO), [2, 3], 5);
        assert_eq!(state.followers.len(), 2);
        assert_eq!(state.followers[&2].next_index, 5);
        assert!(!state.followers[&2].succeeded);
    }
}
