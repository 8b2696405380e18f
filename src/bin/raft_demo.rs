//! In-process demo: three nodes wired together by an in-memory `RpcProvider` (no sockets),
//! enough to watch an election happen and a command get committed across the cluster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use raftcore::async_provider::TokioAsyncProvider;
use raftcore::error::{Error, Result};
use raftcore::rpc::{AppendEntries, AppendEntriesResponse, Command, CommandResponse, RequestVote, RequestVoteResponse, RpcProvider};
use raftcore::{Cluster, Config, Node, NodeId, Role};

#[derive(Clone, Default)]
struct Registry(Arc<RwLock<HashMap<NodeId, Node>>>);

impl Registry {
    fn insert(&self, node: Node) {
        self.0.write().insert(node.id(), node);
    }

    fn get(&self, id: NodeId) -> Option<Node> {
        self.0.read().get(&id).cloned()
    }
}

/// Dispatches RPCs directly to in-process `Node` handles instead of going over the network —
/// handy for a quick demo, not a substitute for `transport::tonic_provider` in a real deployment.
struct InProcessRpcProvider {
    registry: Registry,
}

#[tonic::async_trait]
impl RpcProvider for InProcessRpcProvider {
    async fn request_votes(
        &self,
        request: RequestVote,
        cluster: &Cluster,
        handler: &mut (dyn FnMut(Result<RequestVoteResponse>) -> Option<bool> + Send),
    ) -> Option<bool> {
        for peer in cluster.peers_of(request.candidate_id) {
            let result = match self.registry.get(peer) {
                Some(node) => node.handle_request_vote(request.clone()).await,
                None => Err(Error::Internal(format!("unknown peer {}", peer))),
            };
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
        for peer in cluster.peers_of(request.leader_id) {
            let result = match self.registry.get(peer) {
                Some(node) => node.handle_append_entries(request.clone()).await,
                None => Err(Error::Internal(format!("unknown peer {}", peer))),
            };
            handler(peer, result);
        }
    }

    async fn append_entries_to_follower(&self, node_id: NodeId, request: AppendEntries) -> Result<AppendEntriesResponse> {
        match self.registry.get(node_id) {
            Some(node) => node.handle_append_entries(request).await,
            None => Err(Error::Internal(format!("unknown peer {}", node_id))),
        }
    }

    async fn command(&self, request: Command, node_id: NodeId) -> Result<CommandResponse> {
        match self.registry.get(node_id) {
            Some(node) => node.handle_command(request).await,
            None => Err(Error::Internal(format!("unknown peer {}", node_id))),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cluster = Cluster::new([1, 2, 3]);
    let registry = Registry::default();
    let base_config = Config::load("raft_demo").unwrap_or_default();

    let mut nodes = Vec::new();
    for id in cluster.members() {
        let mut config = base_config.clone();
        config.node_id = id;
        let provider = Arc::new(InProcessRpcProvider { registry: registry.clone() });
        let async_provider = Arc::new(TokioAsyncProvider::new());
        let commit_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync> = Arc::new(move |command| {
            log::info!("node {} applied {:?}", id, String::from_utf8_lossy(&command));
        });
        let node = Node::in_memory(id, config, cluster.clone(), provider, async_provider, commit_handler).await?;
        registry.insert(node.clone());
        nodes.push(node);
    }

    for node in &nodes {
        node.run();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let leader = nodes.iter().find(|node| node.role() == Role::Leader).cloned();
    match leader {
        Some(leader) => {
            log::info!("node {} elected leader for term {}", leader.id(), leader.current_term());
            let response = leader.handle_command(Command { command: b"hello raft".to_vec() }).await?;
            log::info!("command committed: {}", response.success);
        }
        None => log::warn!("no leader elected within the demo window"),
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    for node in &nodes {
        log::info!(
            "node {}: role={:?} term={} commit_index={:?}",
            node.id(),
            node.role(),
            node.current_term(),
            node.commit_index()
        );
    }

    Ok(())
}
