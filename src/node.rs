use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::async_provider::AsyncProvider;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::persistence::{InMemoryPersistenceStore, PersistenceStore};
use crate::role::{LeadershipState, Role};
use crate::rpc::{AppendEntries, AppendEntriesResponse, Command, CommandResponse, RequestVote, RequestVoteResponse, RpcProvider};
use crate::state::{Cluster, NodeId, PersistentState, TemporaryState};
use crate::timer::Timer;

/// The mutable Raft state a single logical executor owns. Guarded by a synchronous mutex that
/// is never held across an `.await` point, so the "single-threaded cooperative" model of §5 is
/// realized as a strict critical-section discipline rather than literal single-threading.
struct Inner {
    persistent: PersistentState,
    volatile: TemporaryState,
    role: Role,
    election_timer: Timer,
    leadership: Option<LeadershipState>,
}

/// A single Raft node: role transitions, election protocol, log replication, commit tracking,
/// and the three inbound handlers (§1).
///
/// `Node` is cheap to clone — every field is `Arc`-wrapped — so it can be captured by the
/// background tasks that drive per-peer heartbeat/replication fan-out (§9).
#[derive(Clone)]
pub struct Node {
    id: NodeId,
    cluster: Cluster,
    config: Config,
    rpc: Arc<dyn RpcProvider>,
    async_provider: Arc<dyn AsyncProvider>,
    persistence: Arc<dyn PersistenceStore>,
    commit_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    inner: Arc<Mutex<Inner>>,
    updating: Arc<AtomicBool>,
}

/// How a received `AppendEntries`'s `prev_log_index`/`prev_log_term` resolve against our log.
enum MatchResult {
    /// Both fields were nil: the leader believes we have no prior entries.
    NoPriorEntry,
    /// Found at this absolute index.
    Matched(u64),
    /// Neither nil nor found: a log gap the leader must rewind past.
    Gap,
}

impl Node {
    /// Constructs a node, restoring persisted state (if any) via `persistence.load()`.
    pub async fn new(
        id: NodeId,
        config: Config,
        cluster: Cluster,
        rpc: Arc<dyn RpcProvider>,
        async_provider: Arc<dyn AsyncProvider>,
        persistence: Arc<dyn PersistenceStore>,
        commit_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    ) -> Result<Self> {
        let persistent = persistence.load().await?.unwrap_or_else(PersistentState::new);
        let election_timer = Timer::new(config.election_timeout, config.election_splay);
        let inner = Inner {
            persistent,
            volatile: TemporaryState::new(),
            role: Role::Follower,
            election_timer,
            leadership: None,
        };
        log::info!("node {} starting as follower, term {}", id, inner.persistent.current_term());
        Ok(Self {
            id,
            cluster,
            config,
            rpc,
            async_provider,
            persistence,
            commit_handler,
            inner: Arc::new(Mutex::new(inner)),
            updating: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Convenience constructor for tests and ephemeral nodes: state is kept in memory only.
    pub async fn in_memory(
        id: NodeId,
        config: Config,
        cluster: Cluster,
        rpc: Arc<dyn RpcProvider>,
        async_provider: Arc<dyn AsyncProvider>,
        commit_handler: Arc<dyn Fn(Vec<u8>) + Send + Sync>,
    ) -> Result<Self> {
        Self::new(
            id,
            config,
            cluster,
            rpc,
            async_provider,
            Arc::new(InMemoryPersistenceStore::new()),
            commit_handler,
        )
        .await
    }

    /// Spawns a background task that drives `update()` on `config.update_interval`, halting (and
    /// logging) if a fatal invariant violation is ever returned.
    pub fn run(&self) -> tokio::task::JoinHandle<()> {
        let node = self.clone();
        let interval = self.config.update_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = node.update().await {
                    log::error!("node {} halting after fatal error: {}", node.id, err);
                    break;
                }
            }
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn role(&self) -> Role {
        self.inner.lock().role
    }

    pub fn current_term(&self) -> u64 {
        self.inner.lock().persistent.current_term()
    }

    pub fn commit_index(&self) -> Option<u64> {
        self.inner.lock().volatile.commit_index()
    }

    pub fn leader_id(&self) -> Option<NodeId> {
        self.inner.lock().volatile.leader_id()
    }

    fn is_leader(&self) -> bool {
        self.inner.lock().role == Role::Leader
    }

    async fn persist_current_state(&self) -> Result<()> {
        let snapshot = self.inner.lock().persistent.clone();
        self.persistence.save(&snapshot).await
    }

    /// §4.10: advances to a higher term and steps down to Follower, purely in memory. Used both
    /// from async handlers (which persist immediately afterwards) and from the synchronous
    /// per-response vote-collection handler of §4.3 (which batches the persist until collection
    /// completes, since that handler cannot `.await`).
    fn step_down_in_memory(&self, term: u64) -> bool {
        let mut inner = self.inner.lock();
        if term > inner.persistent.current_term() {
            inner
                .persistent
                .advance_term(term)
                .expect("term checked strictly greater above");
            inner.role = Role::Follower;
            inner.leadership = None;
            drop(inner);
            self.async_provider.notify();
            true
        } else {
            false
        }
    }

    async fn step_down_if_new_term(&self, term: u64) -> Result<bool> {
        let changed = self.step_down_in_memory(term);
        if changed {
            self.persist_current_state().await?;
        }
        Ok(changed)
    }

    fn become_candidate(&self) {
        let mut inner = self.inner.lock();
        inner.role = Role::Candidate;
        inner.leadership = None;
        drop(inner);
        self.async_provider.notify();
    }

    /// §4.2: the non-reentrant role-driver tick.
    pub async fn update(&self) -> Result<()> {
        if self.updating.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.update_once().await;
        self.updating.store(false, Ordering::SeqCst);
        result
    }

    async fn update_once(&self) -> Result<()> {
        match self.role() {
            Role::Follower => {
                let expired = self.inner.lock().election_timer.timed_out();
                if expired {
                    log::info!("node {} election timeout, becoming candidate", self.id);
                    self.become_candidate();
                    self.run_election().await?;
                }
            }
            Role::Candidate => {
                let expired = self.inner.lock().election_timer.timed_out();
                if expired {
                    self.run_election().await?;
                }
            }
            Role::Leader => {
                let expired = self
                    .inner
                    .lock()
                    .leadership
                    .as_ref()
                    .map(|l| l.update_timer.timed_out())
                    .unwrap_or(false);
                if expired {
                    {
                        let mut inner = self.inner.lock();
                        if let Some(leadership) = inner.leadership.as_mut() {
                            leadership.update_timer.reset();
                        }
                    }
                    self.send_heartbeats().await;
                    self.recompute_commit_index().await?;
                }
            }
        }
        Ok(())
    }

    /// §4.3. Preconditions enforced by the caller: role=Candidate, election timer expired.
    async fn run_election(&self) -> Result<()> {
        let (term, request) = {
            let mut inner = self.inner.lock();
            let term = inner.persistent.current_term() + 1;
            inner.persistent.start_election(term, self.id)?;
            inner.election_timer.reset();
            let last = inner.persistent.log().last();
            let request = RequestVote {
                term,
                candidate_id: self.id,
                last_log_index: last.map(|e| e.index),
                last_log_term: last.map(|e| e.term),
            };
            (term, request)
        };
        self.async_provider.notify();
        self.persist_current_state().await?;
        log::info!("node {} starting election for term {}", self.id, term);

        let quorum = self.cluster.quorum();
        let votes_for = Arc::new(AtomicUsize::new(1)); // self-vote
        let votes_against = Arc::new(AtomicUsize::new(0));
        let node = self.clone();
        let vf = votes_for.clone();
        let va = votes_against.clone();
        let mut handler = move |response: Result<RequestVoteResponse>| -> Option<bool> {
            // Ignore the response if our term has advanced since the request was issued.
            if node.current_term() != term {
                return None;
            }
            let response = match response {
                Ok(response) => response,
                Err(_) => return None, // transport failure; timers drive retry
            };
            if response.term > term {
                node.step_down_in_memory(response.term);
                return Some(false);
            }
            if response.vote_granted {
                if vf.fetch_add(1, Ordering::SeqCst) + 1 >= quorum {
                    return Some(true);
                }
            } else if va.fetch_add(1, Ordering::SeqCst) + 1 >= quorum {
                return Some(false);
            }
            None
        };

        let terminal = self.rpc.request_votes(request, &self.cluster, &mut handler).await;
        // Flush any step-down the synchronous handler performed above.
        self.persist_current_state().await?;

        let elected = terminal.unwrap_or_else(|| votes_for.load(Ordering::SeqCst) >= quorum);
        if elected {
            let still_candidate_same_term = {
                let inner = self.inner.lock();
                inner.role == Role::Candidate && inner.persistent.current_term() == term
            };
            if still_candidate_same_term {
                self.establish_leadership().await;
            }
        }
        Ok(())
    }

    /// §4.4.
    async fn establish_leadership(&self) {
        {
            let mut inner = self.inner.lock();
            inner.role = Role::Leader;
            let next_index = inner.persistent.log().len();
            let peers: Vec<NodeId> = self.cluster.peers_of(self.id).collect();
            let update_timer = Timer::new(self.config.update_interval, Duration::ZERO);
            inner.leadership = Some(LeadershipState::new(update_timer, peers, next_index));
            inner.volatile.set_leader_id(Some(self.id));
        }
        self.async_provider.notify();
        log::info!("node {} became leader for term {}", self.id, self.current_term());
        self.send_heartbeats().await;
    }

    /// §4.5. Broadcasts a heartbeat built from the leader's own log tail; per-peer response
    /// handling (and the rewind retry loop) happens in spawned tasks so this stays non-blocking.
    async fn send_heartbeats(&self) {
        let request = {
            let inner = self.inner.lock();
            let last = inner.persistent.log().last();
            AppendEntries {
                term: inner.persistent.current_term(),
                leader_id: self.id,
                prev_log_index: last.map(|e| e.index),
                prev_log_term: last.map(|e| e.term),
                entries: Vec::new(),
                commit_index: inner.volatile.commit_index(),
            }
        };

        let node = self.clone();
        let cb_request = request.clone();
        let mut handler = move |peer: NodeId, response: Result<AppendEntriesResponse>| {
            let node = node.clone();
            let request = cb_request.clone();
            tokio::spawn(async move {
                if let Err(err) = node.on_append_entries_response(peer, request, response).await {
                    log::error!(
                        "node {} halting: fatal error handling append-entries response from {}: {}",
                        node.id,
                        peer,
                        err
                    );
                }
            });
        };
        self.rpc.append_entries(request, &self.cluster, &mut handler).await;
    }

    /// The per-peer continuation for `send_heartbeats`/the rewind retry of §4.5, implemented as
    /// a loop (per §9) rather than recursion to bound stack use.
    async fn on_append_entries_response(
        &self,
        peer: NodeId,
        mut request: AppendEntries,
        mut response: Result<AppendEntriesResponse>,
    ) -> Result<()> {
        loop {
            if !self.is_leader() {
                return Ok(());
            }
            let resp = match response {
                Ok(resp) => resp,
                Err(_) => return Ok(()), // transport failure tolerated; next heartbeat retries
            };

            let current_term = self.current_term();
            if resp.term > current_term {
                self.step_down_if_new_term(resp.term).await?;
                return Ok(());
            }

            if resp.success {
                let next_index = request.prev_log_index.map(|i| i + 1).unwrap_or(0) + request.entries.len() as u64;
                let mut inner = self.inner.lock();
                if inner.role == Role::Leader {
                    if let Some(leadership) = inner.leadership.as_mut() {
                        if let Some(follower) = leadership.followers.get_mut(&peer) {
                            follower.next_index = next_index;
                            follower.succeeded = true;
                        }
                    }
                }
                return Ok(());
            }

            // Failure due to log inconsistency (a term advance was already handled above):
            // rewind one step and retry.
            let new_prev_log_index = match request.prev_log_index {
                None => return Ok(()), // nothing left to rewind; next heartbeat will try again
                Some(0) => None,
                Some(i) => Some(i - 1),
            };
            let retry_request = {
                let inner = self.inner.lock();
                let prev_log_term = new_prev_log_index.and_then(|i| inner.persistent.log().get(i)).map(|e| e.term);
                let entries = inner.persistent.log().entries_from(new_prev_log_index.map(|i| i + 1).unwrap_or(0));
                AppendEntries {
                    term: request.term,
                    leader_id: self.id,
                    prev_log_index: new_prev_log_index,
                    prev_log_term,
                    entries,
                    commit_index: request.commit_index,
                }
            };
            response = self.rpc.append_entries_to_follower(peer, retry_request.clone()).await;
            request = retry_request;
        }
    }

    /// §4.5's commit-advancement half, run once per leader tick after heartbeats are sent.
    async fn recompute_commit_index(&self) -> Result<()> {
        let new_commit = {
            let inner = self.inner.lock();
            let leadership = match inner.leadership.as_ref() {
                Some(leadership) => leadership,
                None => return Ok(()), // stepped down mid-tick
            };
            // Self always holds its own full log, so it counts toward the quorum alongside
            // every follower whose last `AppendEntries` succeeded.
            let mut indices: Vec<u64> = leadership
                .followers
                .values()
                .filter(|f| f.succeeded)
                .map(|f| f.next_index.saturating_sub(1))
                .collect();
            if !inner.persistent.log().is_empty() {
                indices.push(inner.persistent.log().len() - 1);
            }
            indices.sort_unstable();
            let quorum = self.cluster.quorum();
            if indices.len() >= quorum {
                Some(indices[indices.len() - quorum])
            } else {
                None
            }
        };

        if let Some(new_commit) = new_commit {
            self.handle_commits(new_commit).await?;
        }
        Ok(())
    }

    /// §4.6.
    async fn handle_commits(&self, new: u64) -> Result<()> {
        loop {
            let next = self.inner.lock().volatile.commit_index().map(|c| c + 1).unwrap_or(0);
            if next > new {
                return Ok(());
            }
            let command = {
                let inner = self.inner.lock();
                inner
                    .persistent
                    .log()
                    .get(next)
                    .cloned()
                    .ok_or_else(|| Error::Internal(format!("missing log entry at committed index {}", next)))?
                    .command
            };
            (self.commit_handler)(command);
            {
                let mut inner = self.inner.lock();
                inner.volatile.advance_commit_index(next)?;
            }
            self.async_provider.notify();
        }
    }

    /// §4.7.
    pub async fn handle_request_vote(&self, req: RequestVote) -> Result<RequestVoteResponse> {
        if req.term < self.current_term() {
            return Ok(RequestVoteResponse { term: self.current_term(), vote_granted: false });
        }

        if req.term > self.current_term() {
            self.inner.lock().volatile.set_leader_id(None);
            self.step_down_if_new_term(req.term).await?;
        }

        if self.role() != Role::Follower {
            return Ok(RequestVoteResponse { term: self.current_term(), vote_granted: false });
        }

        let granted = {
            let mut inner = self.inner.lock();
            let voted_for = inner.persistent.voted_for();
            if voted_for == Some(req.candidate_id) {
                true
            } else if voted_for.is_some() {
                false
            } else if inner.persistent.log().is_empty() {
                inner.persistent.record_vote(req.candidate_id)?;
                true
            } else {
                let last = inner.persistent.log().last().expect("checked non-empty");
                let req_last_index = req.last_log_index.map(|v| v as i64).unwrap_or(-1);
                let req_last_term = req.last_log_term.map(|v| v as i64).unwrap_or(-1);
                let last_index = last.index as i64;
                let last_term = last.term as i64;
                let candidate_is_stale =
                    (req_last_term == last_term && req_last_index < last_index) || req_last_term < last_term;
                if candidate_is_stale {
                    false
                } else {
                    inner.persistent.record_vote(req.candidate_id)?;
                    true
                }
            }
        };

        if granted {
            self.persist_current_state().await?;
            self.inner.lock().election_timer.reset();
            self.async_provider.notify();
            log::debug!("node {} granted vote to {} in term {}", self.id, req.candidate_id, req.term);
        }

        Ok(RequestVoteResponse { term: self.current_term(), vote_granted: granted })
    }

    /// §4.8.
    pub async fn handle_append_entries(&self, req: AppendEntries) -> Result<AppendEntriesResponse> {
        if req.term < self.current_term() {
            return Ok(AppendEntriesResponse { term: self.current_term(), success: false });
        }

        self.step_down_if_new_term(req.term).await?;
        {
            let mut inner = self.inner.lock();
            inner.election_timer.reset();
            inner.volatile.set_leader_id(Some(req.leader_id));
        }
        self.async_provider.notify();

        let match_result = {
            let inner = self.inner.lock();
            match (req.prev_log_index, req.prev_log_term) {
                (None, None) => MatchResult::NoPriorEntry,
                (Some(index), Some(term)) => match inner.persistent.log().find(index, term) {
                    Some(idx) => MatchResult::Matched(idx),
                    None => MatchResult::Gap,
                },
                _ => MatchResult::Gap,
            }
        };

        let abs_log_index = match match_result {
            MatchResult::Gap => {
                return Ok(AppendEntriesResponse { term: self.current_term(), success: false });
            }
            MatchResult::NoPriorEntry => None,
            MatchResult::Matched(idx) => Some(idx),
        };

        {
            let inner = self.inner.lock();
            if let Some(commit_index) = inner.volatile.commit_index() {
                let would_truncate_committed = match abs_log_index {
                    Some(idx) => idx < commit_index,
                    None => true,
                };
                if would_truncate_committed {
                    return Err(Error::Internal(format!(
                        "node {} refusing append-entries that would truncate committed log (commit_index={})",
                        self.id, commit_index
                    )));
                }
            }
        }

        {
            let mut inner = self.inner.lock();
            match abs_log_index {
                Some(idx) => inner.persistent.log_mut().truncate_after(idx),
                None => inner.persistent.log_mut().clear(),
            }
            inner.persistent.log_mut().append_entries(req.entries.clone());
        }
        self.persist_current_state().await?;
        self.async_provider.notify();

        if let Some(leader_commit) = req.commit_index {
            let current = self.inner.lock().volatile.commit_index();
            if current.map(|c| leader_commit < c).unwrap_or(false) {
                return Ok(AppendEntriesResponse { term: self.current_term(), success: false });
            }
            self.handle_commits(leader_commit).await?;
        }

        Ok(AppendEntriesResponse { term: self.current_term(), success: true })
    }

    /// §4.9.
    pub async fn handle_command(&self, req: Command) -> Result<CommandResponse> {
        loop {
            match self.role() {
                Role::Follower => {
                    let node = self.clone();
                    self.async_provider.wait_until(&mut || node.leader_id().is_some()).await;
                    let (role, leader_id) = {
                        let inner = self.inner.lock();
                        (inner.role, inner.volatile.leader_id())
                    };
                    if role == Role::Leader {
                        continue;
                    }
                    let leader_id = match leader_id {
                        Some(id) => id,
                        None => return Ok(CommandResponse { success: false }),
                    };
                    return match self.rpc.command(Command { command: req.command.clone() }, leader_id).await {
                        Ok(response) => Ok(response),
                        Err(_) => Ok(CommandResponse { success: false }),
                    };
                }
                Role::Candidate => {
                    let node = self.clone();
                    self.async_provider.wait_until(&mut || node.role() != Role::Candidate).await;
                    continue;
                }
                Role::Leader => {
                    let (index, term) = {
                        let mut inner = self.inner.lock();
                        let term = inner.persistent.current_term();
                        let entry = inner.persistent.log_mut().append(term, req.command.clone());
                        (entry.index, entry.term)
                    };
                    self.persist_current_state().await?;
                    self.async_provider.notify();

                    let node = self.clone();
                    self.async_provider
                        .wait_until(&mut || {
                            let inner = node.inner.lock();
                            match inner.volatile.commit_index() {
                                Some(commit) if commit >= index => true,
                                _ => inner.role != Role::Leader,
                            }
                        })
                        .await;

                    let matches = {
                        let inner = self.inner.lock();
                        let committed = inner.volatile.commit_index().map(|c| c >= index).unwrap_or(false);
                        let entry_matches = inner
                            .persistent
                            .log()
                            .get(index)
                            .map(|e| e.term == term && e.command == req.command)
                            .unwrap_or(false);
                        committed && entry_matches
                    };
                    return Ok(CommandResponse { success: matches });
                }
            }
        }
    }
}
