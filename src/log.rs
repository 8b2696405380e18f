use serde::{Deserialize, Serialize};

/// A single entry in the replicated log.
///
/// Immutable once appended; equality is structural on all three fields, matching the
/// log-matching invariant's requirement that entries be compared wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub index: u64,
    pub command: Vec<u8>,
}

/// The ordered, zero-indexed sequence of log entries.
///
/// Invariant (log-matching): if two logs contain an entry with the same `(term, index)`, all
/// preceding entries are identical. This type never enforces that invariant against a *peer's*
/// log — that's `Node::handle_append_entries`'s job — it only guarantees internal consistency
/// of this node's own entries (indices are contiguous and match their position).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The last entry, if any.
    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// The entry at `index`, if it exists.
    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        self.entries.get(index as usize)
    }

    /// Appends a new entry with the next sequential index.
    pub fn append(&mut self, term: u64, command: Vec<u8>) -> &LogEntry {
        let index = self.entries.len() as u64;
        self.entries.push(LogEntry { term, index, command });
        self.entries.last().expect("just pushed")
    }

    /// Appends a batch of entries already carrying their term/index/command, as received over
    /// the wire from a leader's `AppendEntries` request.
    pub fn append_entries(&mut self, entries: Vec<LogEntry>) {
        self.entries.extend(entries);
    }

    /// Finds the highest position `i` whose `(index, term)` matches `(index, term)`, scanning
    /// from the end since replication typically touches recent entries.
    pub fn find(&self, index: u64, term: u64) -> Option<u64> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.index == index && e.term == term)
            .map(|e| e.index)
    }

    /// Truncates the log to keep only `log[0..=index]`.
    pub fn truncate_after(&mut self, index: u64) {
        self.entries.truncate(index as usize + 1);
    }

    /// Drops every entry, as when a fresh `AppendEntries` carries no prior-entry reference.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries starting at `from` (inclusive), for replication fan-out.
    pub fn entries_from(&self, from: u64) -> Vec<LogEntry> {
        self.entries
            .get(from as usize..)
            .map(|slice| slice.to_vec())
            .unwrap_or_default()
    }
}
