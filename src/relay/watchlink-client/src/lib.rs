//! Watchlink relay client
//!
//! Lets a process that cannot watch the filesystem itself delegate file and
//! directory watching to a remote watcher service, over one persistent
//! newline-delimited JSON connection. Local subscribers on the same
//! canonical path share a single remote watch; the remote watch is closed
//! exactly when the last local subscriber unsubscribes. Requests produced
//! while disconnected queue locally and flush, in order, once the host
//! delivers connection parameters.

pub mod canon;
pub mod config;
pub mod error;
pub mod relay;
pub mod sink;
pub mod stats;

mod conn;
mod dispatch;
mod queue;
mod registry;

pub use canon::{CanonicalPath, Canonicalizer, IdentityCanonicalizer};
pub use config::RelayConfig;
pub use error::RelayError;
pub use relay::{WatchRelay, WatchToken};
pub use sink::{DirectoryWatchSink, FileEventKind, FileWatchSink};
pub use stats::RelayStats;
pub use watchlink_proto::{ChangeKind, WatchId, WatchKind};
