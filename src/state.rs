use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::log::Log;

/// Node identifiers are opaque small integers, matching the rest of this lineage's Raft code.
pub type NodeId = u64;

/// The fixed set of peers participating in consensus.
///
/// Immutable for the lifetime of the node — cluster membership changes are an explicit
/// non-goal of this crate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    members: HashSet<NodeId>,
}

impl Cluster {
    pub fn new(members: impl IntoIterator<Item = NodeId>) -> Self {
        Self { members: members.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied()
    }

    /// Every member other than `id`.
    pub fn peers_of(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.members.iter().copied().filter(move |&m| m != id)
    }

    /// `floor(n/2) + 1`, the strict majority required to commit or win an election.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }
}

/// Durably persisted snapshot of `(current_term, voted_for, log)`.
///
/// Must be flushed to stable storage (via a `PersistenceStore`) before any response that
/// acknowledges a term advance or a vote grant is sent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentState {
    current_term: u64,
    voted_for: Option<NodeId>,
    log: Log,
}

impl PersistentState {
    pub fn new() -> Self {
        Self { current_term: 0, voted_for: None, log: Log::new() }
    }

    pub fn current_term(&self) -> u64 {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut Log {
        &mut self.log
    }

    /// Advances `current_term` to `term`, clearing `voted_for`. `term` must be strictly greater
    /// than the current term — a regression is a persistent-state invariant violation.
    pub fn advance_term(&mut self, term: u64) -> Result<()> {
        if term <= self.current_term {
            return Err(Error::Internal(format!(
                "term regression: attempted to advance from {} to {}",
                self.current_term, term
            )));
        }
        self.current_term = term;
        self.voted_for = None;
        Ok(())
    }

    /// Sets `current_term` and `voted_for` together when starting a new election — the one
    /// case where the term bump and the vote happen atomically rather than vote following a
    /// separate term advance.
    pub fn start_election(&mut self, term: u64, candidate: NodeId) -> Result<()> {
        self.advance_term(term)?;
        self.voted_for = Some(candidate);
        Ok(())
    }

    /// Records a vote for `candidate` in the current term. Fails if a different candidate was
    /// already voted for this term (the one-vote-per-term invariant).
    pub fn record_vote(&mut self, candidate: NodeId) -> Result<()> {
        match self.voted_for {
            Some(existing) if existing != candidate => Err(Error::Internal(format!(
                "double vote in term {}: already voted for {}, attempted {}",
                self.current_term, existing, candidate
            ))),
            _ => {
                self.voted_for = Some(candidate);
                Ok(())
            }
        }
    }
}

/// Volatile bookkeeping common to every role.
#[derive(Clone, Debug, Default)]
pub struct TemporaryState {
    commit_index: Option<u64>,
    leader_id: Option<NodeId>,
}

impl TemporaryState {
    pub fn new() -> Self {
        Self { commit_index: None, leader_id: None }
    }

    pub fn commit_index(&self) -> Option<u64> {
        self.commit_index
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.leader_id
    }

    pub fn set_leader_id(&mut self, id: Option<NodeId>) {
        self.leader_id = id;
    }

    /// Advances `commit_index` to `index`. Must not decrease — committed data is never
    /// un-committed.
    pub fn advance_commit_index(&mut self, index: u64) -> Result<()> {
        if let Some(current) = self.commit_index {
            if index < current {
                return Err(Error::Internal(format!(
                    "commit index regression: attempted to move from {} to {}",
                    current, index
                )));
            }
        }
        self.commit_index = Some(index);
        Ok(())
    }
}
