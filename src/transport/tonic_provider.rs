use std::collections::HashMap;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tonic::transport::Channel;

use super::proto;
use super::proto::raft_client::RaftClient;
use super::proto::raft_server::RaftServer;
use crate::error::{Error, Result};
use crate::log::LogEntry;
use crate::node::Node;
use crate::rpc::{AppendEntries, AppendEntriesResponse, Command, CommandResponse, RequestVote, RequestVoteResponse, RpcProvider};
use crate::state::{Cluster, NodeId};

impl From<LogEntry> for proto::LogEntry {
    fn from(entry: LogEntry) -> Self {
        proto::LogEntry { term: entry.term, index: entry.index, command: entry.command }
    }
}

impl From<proto::LogEntry> for LogEntry {
    fn from(entry: proto::LogEntry) -> Self {
        LogEntry { term: entry.term, index: entry.index, command: entry.command }
    }
}

impl From<&RequestVote> for proto::RequestVoteRequest {
    fn from(req: &RequestVote) -> Self {
        proto::RequestVoteRequest {
            term: req.term,
            candidate_id: req.candidate_id,
            last_log_index: req.last_log_index,
            last_log_term: req.last_log_term,
        }
    }
}

impl From<proto::RequestVoteRequest> for RequestVote {
    fn from(req: proto::RequestVoteRequest) -> Self {
        RequestVote {
            term: req.term,
            candidate_id: req.candidate_id,
            last_log_index: req.last_log_index,
            last_log_term: req.last_log_term,
        }
    }
}

impl From<proto::RequestVoteResponse> for RequestVoteResponse {
    fn from(resp: proto::RequestVoteResponse) -> Self {
        RequestVoteResponse { term: resp.term, vote_granted: resp.vote_granted }
    }
}

impl From<RequestVoteResponse> for proto::RequestVoteResponse {
    fn from(resp: RequestVoteResponse) -> Self {
        proto::RequestVoteResponse { term: resp.term, vote_granted: resp.vote_granted }
    }
}

impl From<&AppendEntries> for proto::AppendEntriesRequest {
    fn from(req: &AppendEntries) -> Self {
        proto::AppendEntriesRequest {
            term: req.term,
            leader_id: req.leader_id,
            prev_log_index: req.prev_log_index,
            prev_log_term: req.prev_log_term,
            entries: req.entries.iter().cloned().map(Into::into).collect(),
            commit_index: req.commit_index,
        }
    }
}

impl From<proto::AppendEntriesRequest> for AppendEntries {
    fn from(req: proto::AppendEntriesRequest) -> Self {
        AppendEntries {
            term: req.term,
            leader_id: req.leader_id,
            prev_log_index: req.prev_log_index,
            prev_log_term: req.prev_log_term,
            entries: req.entries.into_iter().map(Into::into).collect(),
            commit_index: req.commit_index,
        }
    }
}

impl From<proto::AppendEntriesResponse> for AppendEntriesResponse {
    fn from(resp: proto::AppendEntriesResponse) -> Self {
        AppendEntriesResponse { term: resp.term, success: resp.success }
    }
}

impl From<AppendEntriesResponse> for proto::AppendEntriesResponse {
    fn from(resp: AppendEntriesResponse) -> Self {
        proto::AppendEntriesResponse { term: resp.term, success: resp.success }
    }
}

/// The bundled `RpcProvider`, dialing every peer lazily (no connection attempt happens until
/// the first call) and applying `timeout` to every outbound request via `tower`'s layer.
pub struct TonicRpcProvider {
    clients: HashMap<NodeId, RaftClient<Channel>>,
}

impl TonicRpcProvider {
    /// `peers` maps every other node's id to its dial address (e.g. `http://10.0.0.2:7000`).
    pub fn connect(peers: &HashMap<NodeId, String>, timeout: Duration) -> Result<Self> {
        let mut clients = HashMap::new();
        for (&id, addr) in peers {
            let endpoint = tonic::transport::Endpoint::from_shared(addr.clone())?.timeout(timeout);
            clients.insert(id, RaftClient::new(endpoint.connect_lazy()));
        }
        Ok(Self { clients })
    }
}

#[tonic::async_trait]
impl RpcProvider for TonicRpcProvider {
    async fn request_votes(
        &self,
        request: RequestVote,
        cluster: &Cluster,
        handler: &mut (dyn FnMut(Result<RequestVoteResponse>) -> Option<bool> + Send),
    ) -> Option<bool> {
        let proto_request: proto::RequestVoteRequest = (&request).into();
        let mut pending = FuturesUnordered::new();
        for peer in cluster.peers_of(request.candidate_id) {
            if let Some(client) = self.clients.get(&peer).cloned() {
                let mut client = client;
                let req = proto_request.clone();
                pending.push(async move {
                    client
                        .request_vote(tonic::Request::new(req))
                        .await
                        .map(|resp| resp.into_inner().into())
                        .map_err(Error::from)
                });
            }
        }
        while let Some(result) = pending.next().await {
            if let Some(terminal) = handler(result) {
                return Some(terminal);
            }
        }
        None
    }

    async fn append_entries(
        &self,
        request: AppendEntries,
        cluster: &Cluster,
        handler: &mut (dyn FnMut(NodeId, Result<AppendEntriesResponse>) + Send),
    ) {
        let proto_request: proto::AppendEntriesRequest = (&request).into();
        let mut pending = FuturesUnordered::new();
        for peer in cluster.peers_of(request.leader_id) {
            if let Some(client) = self.clients.get(&peer).cloned() {
                let mut client = client;
                let req = proto_request.clone();
                pending.push(async move {
                    let result = client
                        .append_entries(tonic::Request::new(req))
                        .await
                        .map(|resp| resp.into_inner().into())
                        .map_err(Error::from);
                    (peer, result)
                });
            }
        }
        while let Some((peer, result)) = pending.next().await {
            handler(peer, result);
        }
    }

    async fn append_entries_to_follower(&self, node_id: NodeId, request: AppendEntries) -> Result<AppendEntriesResponse> {
        let mut client = self
            .clients
            .get(&node_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no client configured for node {}", node_id)))?;
        let proto_request: proto::AppendEntriesRequest = (&request).into();
        let response = client.append_entries(tonic::Request::new(proto_request)).await?;
        Ok(response.into_inner().into())
    }

    async fn command(&self, request: Command, node_id: NodeId) -> Result<CommandResponse> {
        let mut client = self
            .clients
            .get(&node_id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no client configured for node {}", node_id)))?;
        let proto_request = proto::CommandRequest { command: request.command };
        let response = client.command(tonic::Request::new(proto_request)).await?;
        Ok(CommandResponse { success: response.into_inner().success })
    }
}

/// Adapts a `Node` to the generated `tonic` server trait, so `handle_request_vote` /
/// `handle_append_entries` / `handle_command` answer real inbound RPCs.
pub struct RaftGrpcService {
    node: Node,
}

impl RaftGrpcService {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    pub fn into_server(self) -> RaftServer<Self> {
        RaftServer::new(self)
    }
}

#[tonic::async_trait]
impl proto::raft_server::Raft for RaftGrpcService {
    async fn request_vote(
        &self,
        request: tonic::Request<proto::RequestVoteRequest>,
    ) -> std::result::Result<tonic::Response<proto::RequestVoteResponse>, tonic::Status> {
        let req: RequestVote = request.into_inner().into();
        let response =
            self.node.handle_request_vote(req).await.map_err(|err| tonic::Status::internal(err.to_string()))?;
        Ok(tonic::Response::new(response.into()))
    }

    async fn append_entries(
        &self,
        request: tonic::Request<proto::AppendEntriesRequest>,
    ) -> std::result::Result<tonic::Response<proto::AppendEntriesResponse>, tonic::Status> {
        let req: AppendEntries = request.into_inner().into();
        let response =
            self.node.handle_append_entries(req).await.map_err(|err| tonic::Status::internal(err.to_string()))?;
        Ok(tonic::Response::new(response.into()))
    }

    async fn command(
        &self,
        request: tonic::Request<proto::CommandRequest>,
    ) -> std::result::Result<tonic::Response<proto::CommandResponse>, tonic::Status> {
        let req = Command { command: request.into_inner().command };
        let response =
            self.node.handle_command(req).await.map_err(|err| tonic::Status::internal(err.to_string()))?;
        Ok(tonic::Response::new(proto::CommandResponse { success: response.success }))
    }
}
