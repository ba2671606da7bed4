//! Bounded in-memory history between flushes.

use super::state::Snapshot;

/// Holds at most `capacity` unpersisted snapshots. After a flush only the
/// most recent snapshot is retained, marked persisted, so the next chunk can
/// still see the state it continues from.
#[derive(Debug)]
pub struct ChunkBuffer {
    entries: Vec<Snapshot>,
    capacity: usize,
    head_persisted: bool,
}

impl ChunkBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
            head_persisted: false,
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        self.entries.push(snapshot);
    }

    /// Snapshots not yet written.
    pub fn pending(&self) -> &[Snapshot] {
        let skip = usize::from(self.head_persisted).min(self.entries.len());
        &self.entries[skip..]
    }

    pub fn is_full(&self) -> bool {
        self.pending().len() >= self.capacity
    }

    /// Drop everything but the last snapshot, which is now persisted.
    pub fn reset(&mut self) {
        if let Some(last) = self.entries.pop() {
            self.entries.clear();
            self.entries.push(last);
            self.head_persisted = true;
        }
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
