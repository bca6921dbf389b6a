//! Watchlink wire contracts
//!
//! Message shapes exchanged with the remote watcher service. Framing is
//! newline-delimited JSON: one object per line, in both directions, over a
//! single persistent stream connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol lines
#[derive(Error, Debug)]
pub enum ProtoError {
    #[error("failed to encode request")]
    Encode(#[source] serde_json::Error),
    #[error("malformed notification line")]
    Decode(#[source] serde_json::Error),
}

/// Identifier of one remote watch, unique across all watch kinds.
///
/// Allocated starting at 1 and never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(pub u64);

impl WatchId {
    /// First id handed out by an allocator
    pub const FIRST: WatchId = WatchId(1);

    pub fn next(self) -> WatchId {
        WatchId(self.0 + 1)
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Watch category. Each kind has its own registry namespace: the same path
/// may hold a file watch and a directory watch at once, with distinct ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WatchKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Directory,
    #[serde(rename = "rDir")]
    DirectoryRecursive,
}

/// Request sent to the remote watcher service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventName", rename_all = "camelCase")]
pub enum WatchRequest {
    CreateFileWatcher {
        id: WatchId,
        path: String,
    },
    CreateDirectoryWatcher {
        id: WatchId,
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        recursive: Option<bool>,
    },
    CloseWatcher {
        id: WatchId,
        #[serde(rename = "type")]
        kind: WatchKind,
    },
}

impl WatchRequest {
    /// The watch id this request concerns
    pub fn id(&self) -> WatchId {
        match self {
            WatchRequest::CreateFileWatcher { id, .. }
            | WatchRequest::CreateDirectoryWatcher { id, .. }
            | WatchRequest::CloseWatcher { id, .. } => *id,
        }
    }

    /// Serialize into one framed line, trailing newline included
    pub fn encode(&self) -> Result<String, ProtoError> {
        let mut line = serde_json::to_string(self).map_err(ProtoError::Encode)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse a request from one line. The relay never receives requests;
    /// this exists for watcher-service implementations and tests.
    pub fn from_line(line: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(line.trim_end_matches(['\r', '\n'])).map_err(ProtoError::Decode)
    }
}

/// Change classification reported by the remote watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// Notification received from the remote watcher service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchNotification {
    pub id: WatchId,
    pub path: String,
    pub event_type: ChangeKind,
}

impl WatchNotification {
    /// Parse a notification from one inbound line
    pub fn from_line(line: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(line.trim_end_matches(['\r', '\n'])).map_err(ProtoError::Decode)
    }

    /// Serialize into one framed line, trailing newline included
    pub fn encode(&self) -> Result<String, ProtoError> {
        let mut line = serde_json::to_string(self).map_err(ProtoError::Encode)?;
        line.push('\n');
        Ok(line)
    }
}
