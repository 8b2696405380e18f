use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::state::NodeId;

/// Configuration for a single Raft node.
///
/// `rpc_provider`/`async_provider` are not loaded from file — they're runtime collaborators
/// wired up by the embedder (see `src/transport` and `src/async_provider.rs` for the bundled
/// defaults) — but everything else here can come from a config file or environment variables,
/// following the same `config`-crate layering the rest of this lineage uses.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// This node's id.
    pub node_id: NodeId,
    /// Dial addresses for every peer in the cluster, keyed by node id (including ourselves).
    #[serde(default)]
    pub peers: HashMap<NodeId, String>,
    /// Base election timeout.
    #[serde(with = "duration_millis")]
    pub election_timeout: Duration,
    /// Additional uniform jitter added on top of `election_timeout`.
    #[serde(with = "duration_millis")]
    pub election_splay: Duration,
    /// How often `update()` should be driven by the embedder's ticking loop.
    #[serde(with = "duration_millis")]
    pub update_interval: Duration,
    /// How often a leader emits heartbeats.
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    /// Timeout applied to outbound RPCs by the bundled gRPC transport.
    #[serde(with = "duration_millis")]
    pub rpc_timeout: Duration,
    /// Where to durably persist state. `None` selects the in-memory store.
    #[serde(default)]
    pub persistence_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 0,
            peers: HashMap::new(),
            election_timeout: Duration::from_millis(150),
            election_splay: Duration::from_millis(150),
            update_interval: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(50),
            rpc_timeout: Duration::from_millis(500),
            persistence_path: None,
        }
    }
}

impl Config {
    /// Loads configuration layering a file on top of defaults, then the `RAFTCORE_` environment
    /// prefix on top of that. Mirrors the `config::Config::builder()` pattern this lineage's
    /// client binaries already use for their own config files.
    pub fn load(file: &str) -> Result<Self> {
        let defaults = Config::default();
        let builder = config::Config::builder()
            .set_default("node_id", defaults.node_id)?
            .set_default("election_timeout", defaults.election_timeout.as_millis() as u64)?
            .set_default("election_splay", defaults.election_splay.as_millis() as u64)?
            .set_default("update_interval", defaults.update_interval.as_millis() as u64)?
            .set_default("heartbeat_interval", defaults.heartbeat_interval.as_millis() as u64)?
            .set_default("rpc_timeout", defaults.rpc_timeout.as_millis() as u64)?
            .add_source(config::File::with_name(file).required(false))
            .add_source(config::Environment::with_prefix("RAFTCORE"));

        Ok(builder.build()?.try_deserialize()?)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
