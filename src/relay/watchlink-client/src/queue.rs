//! Outbound request queue
//!
//! Buffers serialized request lines produced while no connection exists.
//! Entries keep first-produced order and are keyed by the watch id they
//! concern, so a close can cancel a create that never reached the wire.

use watchlink_proto::WatchId;

#[derive(Debug)]
struct QueueEntry {
    id: WatchId,
    line: String,
}

/// Pending request lines, at most one per watch id
#[derive(Debug, Default)]
pub(crate) struct OutboundQueue {
    entries: Vec<QueueEntry>,
}

impl OutboundQueue {
    pub(crate) fn push(&mut self, id: WatchId, line: String) {
        debug_assert!(
            !self.entries.iter().any(|entry| entry.id == id),
            "one pending message per id"
        );
        self.entries.push(QueueEntry { id, line });
    }

    /// Drop the pending entry for `id`. Returns whether one was present.
    pub(crate) fn cancel(&mut self, id: WatchId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Remove and return every pending line in insertion order
    pub(crate) fn drain(&mut self) -> Vec<String> {
        self.entries.drain(..).map(|entry| entry.line).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
