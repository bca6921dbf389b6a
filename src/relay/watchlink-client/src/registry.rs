//! Watch subscription registry
//!
//! One arena of subscription records keyed by watch id, with a secondary
//! index from (kind, canonical path) to id. Collapsing N local sinks on the
//! same (kind, path) into one record bounds remote-side load to the set of
//! distinct watched paths rather than the number of local listeners.
//!
//! Invariant: an id is present in the arena iff its (kind, path) pair is
//! present in the index; both are inserted and removed together.

use std::collections::HashMap;

use watchlink_proto::{WatchId, WatchKind};

use crate::canon::CanonicalPath;
use crate::sink::{SinkKey, WatchSink};

#[derive(Debug)]
struct Record {
    kind: WatchKind,
    canonical: CanonicalPath,
    sinks: HashMap<SinkKey, WatchSink>,
}

/// Result of adding a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscribeOutcome {
    /// The sink joined an existing remote watch
    Existing(WatchId),
    /// A new id was allocated; the caller must produce a create-request
    Created(WatchId),
}

impl SubscribeOutcome {
    pub(crate) fn id(self) -> WatchId {
        match self {
            SubscribeOutcome::Existing(id) | SubscribeOutcome::Created(id) => id,
        }
    }
}

/// Result of removing a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseOutcome {
    /// Other sinks still share the watch; nothing to send
    Retained,
    /// The last sink left; the record is gone and a close-request is due
    Closed(WatchKind),
    /// The id or sink was not registered; releasing is a no-op
    Unknown,
}

#[derive(Debug)]
pub(crate) struct Registry {
    next_id: WatchId,
    records: HashMap<WatchId, Record>,
    index: HashMap<(WatchKind, CanonicalPath), WatchId>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            next_id: WatchId::FIRST,
            records: HashMap::new(),
            index: HashMap::new(),
        }
    }
}

impl Registry {
    /// Add a sink for (kind, canonical path), allocating an id on first use
    pub(crate) fn subscribe(
        &mut self,
        kind: WatchKind,
        canonical: CanonicalPath,
        sink: WatchSink,
    ) -> SubscribeOutcome {
        if let Some(&id) = self.index.get(&(kind, canonical.clone())) {
            let record = self
                .records
                .get_mut(&id)
                .expect("indexed id has an arena record");
            record.sinks.insert(sink.key(), sink);
            return SubscribeOutcome::Existing(id);
        }

        let id = self.allocate_id();
        let mut sinks = HashMap::new();
        sinks.insert(sink.key(), sink);
        self.records.insert(
            id,
            Record {
                kind,
                canonical: canonical.clone(),
                sinks,
            },
        );
        self.index.insert((kind, canonical), id);
        SubscribeOutcome::Created(id)
    }

    /// Remove one sink from a record, dropping the record when it empties
    pub(crate) fn release(&mut self, id: WatchId, key: SinkKey) -> ReleaseOutcome {
        let Some(record) = self.records.get_mut(&id) else {
            return ReleaseOutcome::Unknown;
        };
        if record.sinks.remove(&key).is_none() {
            return ReleaseOutcome::Unknown;
        }
        if !record.sinks.is_empty() {
            return ReleaseOutcome::Retained;
        }

        let record = self
            .records
            .remove(&id)
            .expect("record observed under the same borrow");
        self.index.remove(&(record.kind, record.canonical));
        ReleaseOutcome::Closed(record.kind)
    }

    /// Sinks registered under `id`, cloned for invocation outside the lock
    pub(crate) fn sinks(&self, id: WatchId) -> Option<Vec<WatchSink>> {
        self.records
            .get(&id)
            .map(|record| record.sinks.values().cloned().collect())
    }

    /// Number of open remote watches
    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    fn allocate_id(&mut self) -> WatchId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }
}
