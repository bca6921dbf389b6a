//! Inbound notification dispatch
//!
//! Resolves a notification's watch id and fans the event out to every sink
//! registered under it, exactly once per registration. Sinks are collected
//! under the state lock and invoked after it is released, so a sink may
//! re-enter the relay.

use tracing::trace;
use watchlink_proto::{ChangeKind, WatchNotification};

use crate::relay::RelayShared;
use crate::sink::WatchSink;

/// Directory listings care about entries appearing and disappearing, not
/// in-place content changes, so `update` notifications are not forwarded to
/// directory sinks. Remote watcher implementations with different directory
/// semantics would flip this; file watches are unaffected either way.
pub(crate) const SUPPRESS_DIRECTORY_UPDATES: bool = true;

pub(crate) fn dispatch(shared: &RelayShared, note: WatchNotification) {
    let sinks = {
        let state = shared.state.lock();
        state.registry.sinks(note.id)
    };

    let Some(sinks) = sinks else {
        // Expected race: notifications stay in flight while our
        // close-request travels the other way.
        shared.stats.record_unknown();
        trace!(id = %note.id, "dropping notification for unregistered id");
        return;
    };

    for sink in sinks {
        match sink {
            WatchSink::File(sink) => sink.file_changed(&note.path, note.event_type.into()),
            WatchSink::Directory(sink) => {
                if SUPPRESS_DIRECTORY_UPDATES && note.event_type == ChangeKind::Update {
                    continue;
                }
                sink.directory_changed(&note.path);
            }
        }
    }
    shared.stats.record_dispatched();
}
