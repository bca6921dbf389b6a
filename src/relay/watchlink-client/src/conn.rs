//! Transport connection lifecycle
//!
//! One reader task and one writer task per established connection. The
//! writer drains a FIFO channel, so requests reach the wire in the order
//! they were produced. On EOF or an I/O error the tasks detach: the live
//! connection reference is cleared and nothing else changes — the registry
//! keeps every watch, and later requests queue until the host delivers the
//! next configuration event.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use watchlink_proto::WatchNotification;

use crate::dispatch;
use crate::relay::RelayShared;

/// Sender side of one live connection, held in the relay state
pub(crate) struct ConnectionHandle {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Hand a line to the writer task. Returns the line when the writer is
    /// no longer running, so the caller can queue it instead.
    pub(crate) fn send(&self, line: String) -> Result<(), String> {
        self.tx.send(line).map_err(|err| err.0)
    }

    pub(crate) fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Spawn reader and writer tasks for an established stream
pub(crate) fn spawn(
    shared: Arc<RelayShared>,
    stream: TcpStream,
    generation: u64,
) -> ConnectionHandle {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(reader_loop(Arc::clone(&shared), read_half, generation));
    let writer = tokio::spawn(writer_loop(shared, write_half, rx, generation));

    ConnectionHandle {
        generation,
        tx,
        reader,
        writer,
    }
}

async fn writer_loop(
    shared: Arc<RelayShared>,
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    generation: u64,
) {
    while let Some(line) = rx.recv().await {
        if let Err(err) = write_half.write_all(line.as_bytes()).await {
            warn!(error = %err, "write to remote watcher failed");
            break;
        }
    }
    detach(&shared, generation);
}

async fn reader_loop(shared: Arc<RelayShared>, read_half: OwnedReadHalf, generation: u64) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match WatchNotification::from_line(&line) {
                    Ok(note) => dispatch::dispatch(&shared, note),
                    Err(err) => warn!(error = %err, "ignoring malformed notification line"),
                }
            }
            Ok(None) => {
                info!("remote watcher closed the connection");
                break;
            }
            Err(err) => {
                warn!(error = %err, "read from remote watcher failed");
                break;
            }
        }
    }
    detach(&shared, generation);
}

/// Clear the live-connection reference, but only if it still belongs to
/// this task's connection. No sink is notified and no watch is dropped;
/// local registry state stays authoritative across disconnects.
fn detach(shared: &RelayShared, generation: u64) {
    let mut state = shared.state.lock();
    if state
        .conn
        .as_ref()
        .is_some_and(|conn| conn.generation == generation)
    {
        state.conn = None;
        info!("disconnected from remote watcher; requests queue until reconnect");
    }
}
