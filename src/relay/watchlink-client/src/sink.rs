//! Subscriber capability interfaces
//!
//! Events are delivered to sink objects implemented by each subscriber.
//! Several sinks may share one remote watch; each registered sink is
//! invoked exactly once per delivered event.

use std::sync::Arc;

use watchlink_proto::ChangeKind;

/// Host-facing classification of a file change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Changed,
    Deleted,
}

impl From<ChangeKind> for FileEventKind {
    fn from(change: ChangeKind) -> Self {
        match change {
            ChangeKind::Create => FileEventKind::Created,
            ChangeKind::Update => FileEventKind::Changed,
            ChangeKind::Delete => FileEventKind::Deleted,
        }
    }
}

/// Receiver for file watch events
pub trait FileWatchSink: Send + Sync {
    fn file_changed(&self, path: &str, kind: FileEventKind);
}

/// Receiver for directory watch events. Directory watches only signal that
/// something changed under the path, not what kind of change it was.
pub trait DirectoryWatchSink: Send + Sync {
    fn directory_changed(&self, path: &str);
}

impl<F> FileWatchSink for F
where
    F: Fn(&str, FileEventKind) + Send + Sync,
{
    fn file_changed(&self, path: &str, kind: FileEventKind) {
        self(path, kind)
    }
}

impl<F> DirectoryWatchSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn directory_changed(&self, path: &str) {
        self(path)
    }
}

/// Identity of one registered sink, derived from its allocation address.
/// Two clones of the same `Arc` are the same sink; set semantics absorb
/// duplicate registrations.
pub(crate) type SinkKey = usize;

/// A registered sink, tagged with the delivery shape it understands
#[derive(Clone)]
pub(crate) enum WatchSink {
    File(Arc<dyn FileWatchSink>),
    Directory(Arc<dyn DirectoryWatchSink>),
}

impl WatchSink {
    pub(crate) fn key(&self) -> SinkKey {
        match self {
            WatchSink::File(sink) => Arc::as_ptr(sink) as *const () as usize,
            WatchSink::Directory(sink) => Arc::as_ptr(sink) as *const () as usize,
        }
    }
}

impl std::fmt::Debug for WatchSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchSink::File(_) => f.write_str("WatchSink::File"),
            WatchSink::Directory(_) => f.write_str("WatchSink::Directory"),
        }
    }
}
