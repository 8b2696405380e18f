//! Literal scenario tests (S1-S6 of §8), driven through the public handler/election API with a
//! deterministic in-memory `RpcProvider` test double — no real sockets, fast (millisecond-scale)
//! timers so elections and replication settle quickly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use pretty_assertions::assert_eq;

use raftcore::async_provider::TokioAsyncProvider;
use raftcore::error::{Error, Result};
use raftcore::persistence::InMemoryPersistenceStore;
use raftcore::rpc::{AppendEntries, AppendEntriesResponse, Command, CommandResponse, RequestVote, RequestVoteResponse, RpcProvider};
use raftcore::state::PersistentState;
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

/// Routes RPCs directly to in-process `Node` handles; peers not (yet) registered fail as a
/// tolerated transport error, the same way an unreachable peer would over a real network.
struct TestRpcProvider {
    registry: Registry,
}

#[tonic::async_trait]
impl RpcProvider for TestRpcProvider {
    async fn request_votes(
        &self,
        request: RequestVote,
        cluster: &Cluster,
        handler: &mut (dyn FnMut(Result<RequestVoteResponse>) -> Option<bool> + Send),
    ) -> Option<bool> {
        for peer in cluster.peers_of(request.candidate_id) {
            let result = match self.registry.get(peer) {
                Some(node) => node.handle_request_vote(request.clone()).await,
                None => Err(Error::Internal(format!("unreachable peer {}", peer))),
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
                None => Err(Error::Internal(format!("unreachable peer {}", peer))),
            };
            handler(peer, result);
        }
    }

    async fn append_entries_to_follower(&self, node_id: NodeId, request: AppendEntries) -> Result<AppendEntriesResponse> {
        match self.registry.get(node_id) {
            Some(node) => node.handle_append_entries(request).await,
            None => Err(Error::Internal(format!("unreachable peer {}", node_id))),
        }
    }

    async fn command(&self, request: Command, node_id: NodeId) -> Result<CommandResponse> {
        match self.registry.get(node_id) {
            Some(node) => node.handle_command(request).await,
            None => Err(Error::Internal(format!("unreachable peer {}", node_id))),
        }
    }
}

fn fast_config(node_id: NodeId) -> Config {
    let mut config = Config::default();
    config.node_id = node_id;
    config.election_timeout = Duration::from_millis(20);
    config.election_splay = Duration::from_millis(20);
    config.update_interval = Duration::from_millis(5);
    config.heartbeat_interval = Duration::from_millis(5);
    config
}

async fn spawn_cluster(cluster: &Cluster, preloaded: HashMap<NodeId, PersistentState>) -> (Registry, Vec<Node>) {
    let registry = Registry::default();
    let mut nodes = Vec::new();
    for id in cluster.members() {
        let provider = Arc::new(TestRpcProvider { registry: registry.clone() });
        let async_provider = Arc::new(TokioAsyncProvider::new());
        let store = Arc::new(InMemoryPersistenceStore::new());
        if let Some(state) = preloaded.get(&id) {
            store.save(state).await.unwrap();
        }
        let commit_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync> = Arc::new(|_command| {});
        let node = Node::new(id, fast_config(id), cluster.clone(), provider, async_provider, store, commit_handler)
            .await
            .unwrap();
        registry.insert(node.clone());
        nodes.push(node);
    }
    for node in &nodes {
        node.run();
    }
    (registry, nodes)
}

async fn wait_for_leader(nodes: &[Node]) -> Node {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(leader) = nodes.iter().find(|n| n.role() == Role::Leader) {
                return leader.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("a leader should be elected within the timeout")
}

/// S1: three fresh nodes bootstrap an election; exactly one becomes leader, the others remain
/// followers recognizing it.
#[tokio::test]
async fn s1_bootstrap_election() {
    let cluster = Cluster::new([1, 2, 3]);
    let (_registry, nodes) = spawn_cluster(&cluster, HashMap::new()).await;

    let leader = wait_for_leader(&nodes).await;
    assert_eq!(leader.current_term(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    for node in &nodes {
        if node.id() == leader.id() {
            continue;
        }
        assert_eq!(node.role(), Role::Follower);
        assert_eq!(node.leader_id(), Some(leader.id()));
        assert_eq!(node.current_term(), 1);
    }
}

/// S2: a command submitted to the leader is replicated and committed on every node.
#[tokio::test]
async fn s2_single_command_commit() {
    let cluster = Cluster::new([1, 2, 3]);
    let (_registry, nodes) = spawn_cluster(&cluster, HashMap::new()).await;
    let leader = wait_for_leader(&nodes).await;

    let response = tokio::time::timeout(
        Duration::from_secs(2),
        leader.handle_command(Command { command: b"x".to_vec() }),
    )
    .await
    .expect("command should resolve within the timeout")
    .unwrap();
    assert!(response.success);

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if nodes.iter().all(|n| n.commit_index() == Some(0)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("every node should observe the commit");
}

/// S3: a stale candidate's vote request still advances the receiver's term but is rejected
/// because its log is less up to date.
#[tokio::test]
async fn s3_stale_candidate_rejected() {
    let cluster = Cluster::new([1, 2, 3]);
    let mut state = PersistentState::new();
    state.advance_term(2).unwrap();
    state.log_mut().append(1, b"a".to_vec());
    state.log_mut().append(2, b"b".to_vec());

    let mut preloaded = HashMap::new();
    preloaded.insert(2, state);
    let (_registry, nodes) = spawn_cluster(&cluster, preloaded).await;
    let b = nodes.iter().find(|n| n.id() == 2).unwrap();

    let response = b
        .handle_request_vote(RequestVote { term: 3, candidate_id: 3, last_log_index: Some(0), last_log_term: Some(1) })
        .await
        .unwrap();

    assert_eq!(response, RequestVoteResponse { term: 3, vote_granted: false });
    assert_eq!(b.current_term(), 3);
}

/// S4: a leader whose belief about a follower's `next_index` overshoots the follower's actual
/// log rewinds one step at a time until the follower's log matches, then replication succeeds.
#[tokio::test]
async fn s4_append_rewind_converges() {
    let cluster = Cluster::new([1, 2]);

    let mut leader_state = PersistentState::new();
    leader_state.advance_term(4).unwrap();
    for i in 0..10u8 {
        leader_state.log_mut().append(1, vec![i]);
    }

    let mut follower_state = PersistentState::new();
    follower_state.advance_term(4).unwrap();
    for i in 0..7u8 {
        follower_state.log_mut().append(1, vec![i]);
    }

    let mut preloaded = HashMap::new();
    preloaded.insert(1, leader_state);
    preloaded.insert(2, follower_state);
    let (_registry, nodes) = spawn_cluster(&cluster, preloaded).await;

    let leader = wait_for_leader(&nodes).await;
    let response = tokio::time::timeout(
        Duration::from_secs(2),
        leader.handle_command(Command { command: b"converge".to_vec() }),
    )
    .await
    .expect("command should resolve once the rewind converges")
    .unwrap();
    assert!(response.success);

    let follower = nodes.iter().find(|n| n.id() != leader.id()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if follower.commit_index() == leader.commit_index() && follower.commit_index().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the rewound follower should catch up and commit");
}

/// S5: an `AppendEntries` that would truncate already-committed entries is refused outright, and
/// the log is left untouched.
#[tokio::test]
async fn s5_truncation_of_committed_entries_refused() {
    let cluster = Cluster::new([1, 2]);
    let mut state = PersistentState::new();
    state.advance_term(1).unwrap();
    for i in 0..5u8 {
        state.log_mut().append(1, vec![i]);
    }
    let mut preloaded = HashMap::new();
    preloaded.insert(2, state);
    let (_registry, nodes) = spawn_cluster(&cluster, preloaded).await;
    let b = nodes.iter().find(|n| n.id() == 2).unwrap();

    let commit_request = AppendEntries {
        term: 1,
        leader_id: 1,
        prev_log_index: Some(4),
        prev_log_term: Some(1),
        entries: Vec::new(),
        commit_index: Some(4),
    };
    let response = b.handle_append_entries(commit_request).await.unwrap();
    assert!(response.success);
    assert_eq!(b.commit_index(), Some(4));

    let truncating_request = AppendEntries {
        term: 1,
        leader_id: 1,
        prev_log_index: Some(2),
        prev_log_term: Some(1),
        entries: vec![raftcore::log::LogEntry { term: 1, index: 3, command: vec![99] }],
        commit_index: Some(4),
    };
    let result = b.handle_append_entries(truncating_request).await;
    assert!(result.is_err());
    assert_eq!(b.commit_index(), Some(4));
}

/// S6: once a node has granted a vote in a term, a second candidate's request in the same term
/// is rejected and the original grant is preserved.
#[tokio::test]
async fn s6_double_vote_rejected() {
    let cluster = Cluster::new([1, 2, 3]);
    let mut state = PersistentState::new();
    state.advance_term(7).unwrap();
    let mut preloaded = HashMap::new();
    preloaded.insert(2, state);
    let (_registry, nodes) = spawn_cluster(&cluster, preloaded).await;
    let b = nodes.iter().find(|n| n.id() == 2).unwrap();

    let first =
        b.handle_request_vote(RequestVote { term: 7, candidate_id: 1, last_log_index: None, last_log_term: None }).await.unwrap();
    assert!(first.vote_granted);

    let second =
        b.handle_request_vote(RequestVote { term: 7, candidate_id: 3, last_log_index: None, last_log_term: None }).await.unwrap();
    assert!(!second.vote_granted);
    assert_eq!(second.term, 7);
}
