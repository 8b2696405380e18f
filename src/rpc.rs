use crate::error::Result;
use crate::log::LogEntry;
use crate::state::{Cluster, NodeId};

/// A candidate's request for a vote, built from the tail of its own log.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestVote {
    pub term: u64,
    pub candidate_id: NodeId,
    /// `None` iff the candidate's log is empty.
    pub last_log_index: Option<u64>,
    pub last_log_term: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteResponse {
    pub term: u64,
    pub vote_granted: bool,
}

/// A heartbeat or replication request from the current leader.
#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntries {
    pub term: u64,
    pub leader_id: NodeId,
    /// `None` iff there is no prior entry (the follower's log should start from scratch).
    pub prev_log_index: Option<u64>,
    pub prev_log_term: Option<u64>,
    pub entries: Vec<LogEntry>,
    /// `None` iff the leader has not committed anything yet.
    pub commit_index: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesResponse {
    pub term: u64,
    pub success: bool,
}

/// A client command submitted for replication.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub command: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CommandResponse {
    pub success: bool,
}

/// The message-dispatch contract the core depends on (§6). Delivery, retries-on-loss, and the
/// actual wire format are all the embedder's concern; the bundled `transport::tonic_provider`
/// is one such embedder.
///
/// Modeled as a `dyn`-compatible trait object per §9's "tagged trait objects" guidance rather
/// than a generic parameter on `Node`, since the core never needs to monomorphize over it.
#[tonic::async_trait]
pub trait RpcProvider: Send + Sync {
    /// Broadcasts `request` to every member of `cluster` other than the candidate itself,
    /// delivering each response to `handler` as it arrives. `handler` may return `Some(elected)`
    /// to authoritatively terminate collection early (see §4.3); if every response is delivered
    /// without a terminal result, this returns `None` and the caller falls back to its own
    /// quorum check.
    async fn request_votes(
        &self,
        request: RequestVote,
        cluster: &Cluster,
        handler: &mut (dyn FnMut(Result<RequestVoteResponse>) -> Option<bool> + Send),
    ) -> Option<bool>;

    /// Broadcasts a heartbeat/replication `request` to every member of `cluster` other than the
    /// leader itself, delivering each peer's response to `handler` along with the id of the
    /// peer that sent it.
    async fn append_entries(
        &self,
        request: AppendEntries,
        cluster: &Cluster,
        handler: &mut (dyn FnMut(NodeId, Result<AppendEntriesResponse>) + Send),
    );

    /// A single targeted `AppendEntries`, used for the rewind retry loop of §4.5.
    async fn append_entries_to_follower(
        &self,
        node_id: NodeId,
        request: AppendEntries,
    ) -> Result<AppendEntriesResponse>;

    /// Forwards a client command to the node believed to be the current leader.
    async fn command(&self, request: Command, node_id: NodeId) -> Result<CommandResponse>;
}
