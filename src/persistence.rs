use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::Result;
use crate::state::PersistentState;

/// The durability collaborator of §3/§6: `save` must complete before the Node sends any
/// response that depends on the saved value; `load` reads back the last saved snapshot at
/// startup.
#[tonic::async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save(&self, state: &PersistentState) -> Result<()>;
    async fn load(&self) -> Result<Option<PersistentState>>;
}

/// Keeps the latest snapshot in memory only. `save` never fails; state does not survive a
/// process restart. Suitable for tests and for nodes that accept losing state on crash.
#[derive(Default)]
pub struct InMemoryPersistenceStore {
    state: Mutex<Option<PersistentState>>,
}

impl InMemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[tonic::async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn save(&self, state: &PersistentState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistentState>> {
        Ok(self.state.lock().clone())
    }
}

/// Persists snapshots to a single file, `bincode`-encoded, using a write-to-temp-then-rename
/// sequence so a crash mid-write cannot corrupt the previously durable snapshot.
pub struct FilePersistenceStore {
    path: PathBuf,
}

impl FilePersistenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[tonic::async_trait]
impl PersistenceStore for FilePersistenceStore {
    async fn save(&self, state: &PersistentState) -> Result<()> {
        let bytes = bincode::serialize(state)?;
        let dir = self.path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, &bytes)?;
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistentState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path)?;
        Ok(Some(bincode::deserialize(&bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trips() {
        let store = InMemoryPersistenceStore::new();
        assert_eq!(store.load().await.unwrap(), None);

        let mut state = PersistentState::new();
        state.advance_term(3).unwrap();
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raft-state.bin");

        let mut state = PersistentState::new();
        state.advance_term(9).unwrap();
        state.record_vote(42).unwrap();

        let store = FilePersistenceStore::new(&path);
        assert_eq!(store.load().await.unwrap(), None);
        store.save(&state).await.unwrap();

        let reopened = FilePersistenceStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(state));
    }
}
