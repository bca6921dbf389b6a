//! Watch relay facade
//!
//! The client-side multiplexer for remote watch subscriptions. One lock
//! guards registry, outbound queue, and connection reference as a single
//! unit, so "look up the id, else allocate and enqueue" is atomic. The lock
//! is never held across an await; socket I/O and sink invocation happen
//! outside it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tracing::{debug, error, info};
use watchlink_proto::{WatchId, WatchKind, WatchRequest};

use crate::canon::Canonicalizer;
use crate::config::RelayConfig;
use crate::conn::{self, ConnectionHandle};
use crate::error::RelayError;
use crate::queue::OutboundQueue;
use crate::registry::{Registry, ReleaseOutcome, SubscribeOutcome};
use crate::sink::{DirectoryWatchSink, FileWatchSink, SinkKey, WatchSink};
use crate::stats::{RelayStats, StatsCollector};

pub(crate) struct RelayShared {
    pub(crate) canonicalizer: Box<dyn Canonicalizer>,
    pub(crate) state: Mutex<RelayState>,
    pub(crate) stats: StatsCollector,
    generation: AtomicU64,
}

pub(crate) struct RelayState {
    pub(crate) registry: Registry,
    pub(crate) queue: OutboundQueue,
    pub(crate) conn: Option<ConnectionHandle>,
}

impl RelayState {
    /// Send over the live connection, or park in the outbound queue.
    /// Called with the state lock held, which keeps outbound order equal
    /// to registry operation order.
    fn send_or_queue(&mut self, request: WatchRequest, stats: &StatsCollector) {
        let id = request.id();
        let mut line = match request.encode() {
            Ok(line) => line,
            Err(err) => {
                error!(%id, error = %err, "dropping unencodable request");
                return;
            }
        };

        if let Some(conn) = self.conn.take() {
            match conn.send(line) {
                Ok(()) => {
                    self.conn = Some(conn);
                    stats.record_sent();
                    return;
                }
                Err(returned) => {
                    // Writer already gone; treat as disconnected.
                    debug!(%id, "connection writer gone, queueing request");
                    line = returned;
                }
            }
        }

        self.queue.push(id, line);
        stats.record_queued();
    }
}

/// Client-side multiplexer for remote watch subscriptions.
///
/// Cheap to clone; all clones share one registry, one outbound queue, and
/// one connection.
#[derive(Clone)]
pub struct WatchRelay {
    shared: Arc<RelayShared>,
}

impl WatchRelay {
    /// Create a relay. The canonicalizer is the host's authority for path
    /// equality; watches on paths with the same canonical form share one
    /// remote watch.
    pub fn new<C>(canonicalizer: C) -> Self
    where
        C: Canonicalizer + 'static,
    {
        WatchRelay {
            shared: Arc::new(RelayShared {
                canonicalizer: Box::new(canonicalizer),
                state: Mutex::new(RelayState {
                    registry: Registry::default(),
                    queue: OutboundQueue::default(),
                    conn: None,
                }),
                stats: StatsCollector::default(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Watch a single file
    pub fn watch_file(&self, path: &str, sink: Arc<dyn FileWatchSink>) -> WatchToken {
        self.watch(WatchKind::File, path, WatchSink::File(sink))
    }

    /// Watch a directory. Recursive and non-recursive watches on the same
    /// path are independent subscriptions with independent ids.
    pub fn watch_directory(
        &self,
        path: &str,
        sink: Arc<dyn DirectoryWatchSink>,
        recursive: bool,
    ) -> WatchToken {
        let kind = if recursive {
            WatchKind::DirectoryRecursive
        } else {
            WatchKind::Directory
        };
        self.watch(kind, path, WatchSink::Directory(sink))
    }

    fn watch(&self, kind: WatchKind, path: &str, sink: WatchSink) -> WatchToken {
        let canonical = self.shared.canonicalizer.canonicalize(path);
        let key = sink.key();

        let mut state = self.shared.state.lock();
        let outcome = state.registry.subscribe(kind, canonical, sink);
        let id = outcome.id();
        if let SubscribeOutcome::Created(id) = outcome {
            debug!(%id, ?kind, path, "opening remote watch");
            let request = match kind {
                WatchKind::File => WatchRequest::CreateFileWatcher {
                    id,
                    path: path.to_string(),
                },
                WatchKind::Directory => WatchRequest::CreateDirectoryWatcher {
                    id,
                    path: path.to_string(),
                    recursive: None,
                },
                WatchKind::DirectoryRecursive => WatchRequest::CreateDirectoryWatcher {
                    id,
                    path: path.to_string(),
                    recursive: Some(true),
                },
            };
            state.send_or_queue(request, &self.shared.stats);
        }
        drop(state);

        WatchToken {
            shared: Arc::clone(&self.shared),
            id,
            key,
            closed: AtomicBool::new(false),
        }
    }

    /// (Re)establish the transport from a configuration event, then flush
    /// queued requests in their original order, each exactly once.
    ///
    /// Reconnection after a drop is the caller's responsibility: invoke
    /// this again with fresh (or identical) parameters.
    pub async fn configuration_changed(&self, config: RelayConfig) -> Result<(), RelayError> {
        config.validate()?;
        let addr = config.addr();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| RelayError::Connect {
                addr: addr.clone(),
                source,
            })?;
        info!(%addr, "connected to remote watcher");

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = conn::spawn(Arc::clone(&self.shared), stream, generation);

        let replaced = {
            let mut state = self.shared.state.lock();
            if !state.queue.is_empty() {
                debug!(pending = state.queue.len(), "flushing queued requests");
            }
            for line in state.queue.drain() {
                if handle.send(line).is_ok() {
                    self.shared.stats.record_sent();
                }
            }
            state.conn.replace(handle)
        };
        if let Some(old) = replaced {
            debug!("replacing previous connection");
            old.abort();
        }
        Ok(())
    }

    /// Whether a live transport connection currently exists
    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().conn.is_some()
    }

    /// Snapshot of relay activity counters
    pub fn stats(&self) -> RelayStats {
        let active_watches = self.shared.state.lock().registry.len();
        self.shared.stats.snapshot(active_watches)
    }
}

/// Handle for one registered sink.
///
/// Closing removes the registration; the remote watch is torn down when the
/// last sink sharing it leaves. Dropping the token does not close it.
pub struct WatchToken {
    shared: Arc<RelayShared>,
    id: WatchId,
    key: SinkKey,
    closed: AtomicBool,
}

impl WatchToken {
    /// Id of the remote watch this registration rides on
    pub fn id(&self) -> WatchId {
        self.id
    }

    /// Unsubscribe. Closing twice is a no-op and never disturbs other
    /// sinks sharing the watch.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.shared.state.lock();
        match state.registry.release(self.id, self.key) {
            ReleaseOutcome::Retained | ReleaseOutcome::Unknown => {}
            ReleaseOutcome::Closed(kind) => {
                if state.queue.cancel(self.id) {
                    // The create never reached the wire: a watch opened and
                    // closed before any connection produces no traffic.
                    self.shared.stats.record_cancelled();
                    debug!(id = %self.id, "cancelled pending create");
                } else {
                    debug!(id = %self.id, ?kind, "closing remote watch");
                    let request = WatchRequest::CloseWatcher { id: self.id, kind };
                    state.send_or_queue(request, &self.shared.stats);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;
    use watchlink_proto::{ChangeKind, WatchNotification};

    use crate::canon::IdentityCanonicalizer;
    use crate::dispatch;
    use crate::sink::FileEventKind;

    #[derive(Default)]
    struct RecordingFileSink {
        events: Mutex<Vec<(String, FileEventKind)>>,
    }

    impl FileWatchSink for RecordingFileSink {
        fn file_changed(&self, path: &str, kind: FileEventKind) {
            self.events.lock().push((path.to_string(), kind));
        }
    }

    #[derive(Default)]
    struct RecordingDirSink {
        events: Mutex<Vec<String>>,
    }

    impl DirectoryWatchSink for RecordingDirSink {
        fn directory_changed(&self, path: &str) {
            self.events.lock().push(path.to_string());
        }
    }

    fn relay() -> WatchRelay {
        WatchRelay::new(IdentityCanonicalizer)
    }

    fn noop_file_sink() -> Arc<dyn FileWatchSink> {
        Arc::new(|_: &str, _: FileEventKind| {})
    }

    fn noop_dir_sink() -> Arc<dyn DirectoryWatchSink> {
        Arc::new(|_: &str| {})
    }

    fn config_for(addr: std::net::SocketAddr) -> RelayConfig {
        RelayConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    fn queued(relay: &WatchRelay) -> usize {
        relay.shared.state.lock().queue.len()
    }

    async fn accept(listener: &TcpListener) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, write_half) = stream.into_split();
        (BufReader::new(read_half).lines(), write_half)
    }

    async fn next_request(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> WatchRequest {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("request within timeout")
            .unwrap()
            .expect("connection still open");
        WatchRequest::from_line(&line).unwrap()
    }

    async fn assert_no_request(lines: &mut Lines<BufReader<OwnedReadHalf>>) {
        let result = tokio::time::timeout(Duration::from_millis(200), lines.next_line()).await;
        assert!(result.is_err(), "unexpected request: {result:?}");
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn two_subscribers_share_one_id_and_one_create() {
        let relay = relay();

        let first = relay.watch_file("/src/a.rs", noop_file_sink());
        let second = relay.watch_file("/src/a.rs", noop_file_sink());

        assert_eq!(first.id(), second.id());
        assert_eq!(queued(&relay), 1);
        assert_eq!(relay.stats().active_watches, 1);
    }

    #[tokio::test]
    async fn close_before_any_connection_produces_no_traffic() {
        let relay = relay();

        let token = relay.watch_file("/src/a.rs", noop_file_sink());
        token.close();

        assert_eq!(queued(&relay), 0);
        let stats = relay.stats();
        assert_eq!(stats.creates_cancelled, 1);
        assert_eq!(stats.requests_sent, 0);
        assert_eq!(stats.active_watches, 0);
    }

    #[tokio::test]
    async fn partial_unsubscribe_keeps_the_pending_create() {
        let relay = relay();

        let first = relay.watch_file("/src/a.rs", noop_file_sink());
        let _second = relay.watch_file("/src/a.rs", noop_file_sink());
        first.close();

        assert_eq!(queued(&relay), 1);
        assert_eq!(relay.stats().creates_cancelled, 0);
    }

    #[tokio::test]
    async fn queued_creates_flush_in_subscription_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = relay();

        let _a = relay.watch_file("/a", noop_file_sink());
        let _b = relay.watch_file("/b", noop_file_sink());
        let _c = relay.watch_file("/c", noop_file_sink());

        relay.configuration_changed(config_for(addr)).await.unwrap();
        let (mut lines, _write_half) = accept(&listener).await;

        for (expected_id, expected_path) in [(1, "/a"), (2, "/b"), (3, "/c")] {
            match next_request(&mut lines).await {
                WatchRequest::CreateFileWatcher { id, path } => {
                    assert_eq!(id, WatchId(expected_id));
                    assert_eq!(path, expected_path);
                }
                other => panic!("expected create, got {other:?}"),
            }
        }
        assert_eq!(queued(&relay), 0);
    }

    #[tokio::test]
    async fn last_close_emits_exactly_one_close_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = relay();
        relay.configuration_changed(config_for(addr)).await.unwrap();
        let (mut lines, _write_half) = accept(&listener).await;

        let first = relay.watch_file("/src/a.rs", noop_file_sink());
        let second = relay.watch_file("/src/a.rs", noop_file_sink());
        assert!(matches!(
            next_request(&mut lines).await,
            WatchRequest::CreateFileWatcher { .. }
        ));

        first.close();
        first.close();
        assert_no_request(&mut lines).await;

        second.close();
        assert_eq!(
            next_request(&mut lines).await,
            WatchRequest::CloseWatcher {
                id: first.id(),
                kind: WatchKind::File,
            }
        );

        second.close();
        assert_no_request(&mut lines).await;
    }

    #[tokio::test]
    async fn recursive_and_flat_watches_are_independent() {
        let relay = relay();

        let flat = relay.watch_directory("/src", noop_dir_sink(), false);
        let recursive = relay.watch_directory("/src", noop_dir_sink(), true);

        assert_ne!(flat.id(), recursive.id());
        assert_eq!(queued(&relay), 2);
        assert_eq!(relay.stats().active_watches, 2);
    }

    #[tokio::test]
    async fn requests_queue_again_after_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = relay();

        relay.configuration_changed(config_for(addr)).await.unwrap();
        let (lines, write_half) = accept(&listener).await;
        assert!(relay.is_connected());

        // Remote side goes away; the registry must survive untouched.
        drop(lines);
        drop(write_half);
        wait_until(|| !relay.is_connected()).await;

        let _token = relay.watch_file("/src/a.rs", noop_file_sink());
        assert_eq!(queued(&relay), 1);

        relay.configuration_changed(config_for(addr)).await.unwrap();
        let (mut lines, _write_half) = accept(&listener).await;
        assert!(matches!(
            next_request(&mut lines).await,
            WatchRequest::CreateFileWatcher { .. }
        ));
        assert_eq!(queued(&relay), 0);
    }

    #[tokio::test]
    async fn notifications_fan_out_to_every_sink_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = relay();

        let first = Arc::new(RecordingFileSink::default());
        let second = Arc::new(RecordingFileSink::default());
        let token = relay.watch_file("/src/a.rs", first.clone());
        let _other = relay.watch_file("/src/a.rs", second.clone());

        relay.configuration_changed(config_for(addr)).await.unwrap();
        let (mut lines, mut write_half) = accept(&listener).await;
        assert!(matches!(
            next_request(&mut lines).await,
            WatchRequest::CreateFileWatcher { .. }
        ));

        let note = WatchNotification {
            id: token.id(),
            path: "/src/a.rs".to_string(),
            event_type: ChangeKind::Update,
        };
        write_half.write_all(note.encode().unwrap().as_bytes()).await.unwrap();

        wait_until(|| !first.events.lock().is_empty() && !second.events.lock().is_empty()).await;
        assert_eq!(
            first.events.lock().as_slice(),
            &[("/src/a.rs".to_string(), FileEventKind::Changed)]
        );
        assert_eq!(
            second.events.lock().as_slice(),
            &[("/src/a.rs".to_string(), FileEventKind::Changed)]
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_dropped_silently() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let relay = relay();

        relay.configuration_changed(config_for(addr)).await.unwrap();
        let (_lines, mut write_half) = accept(&listener).await;

        let note = WatchNotification {
            id: WatchId(999),
            path: "/gone".to_string(),
            event_type: ChangeKind::Delete,
        };
        write_half.write_all(note.encode().unwrap().as_bytes()).await.unwrap();

        wait_until(|| relay.stats().unknown_notifications == 1).await;
        assert!(relay.is_connected());
    }

    #[tokio::test]
    async fn file_events_map_one_to_one() {
        let relay = relay();
        let sink = Arc::new(RecordingFileSink::default());
        let token = relay.watch_file("/src/a.rs", sink.clone());

        for change in [ChangeKind::Create, ChangeKind::Update, ChangeKind::Delete] {
            dispatch::dispatch(
                &relay.shared,
                WatchNotification {
                    id: token.id(),
                    path: "/src/a.rs".to_string(),
                    event_type: change,
                },
            );
        }

        let kinds: Vec<FileEventKind> =
            sink.events.lock().iter().map(|(_, kind)| *kind).collect();
        assert_eq!(
            kinds,
            vec![
                FileEventKind::Created,
                FileEventKind::Changed,
                FileEventKind::Deleted,
            ]
        );
    }

    #[tokio::test]
    async fn directory_sinks_never_see_updates() {
        let relay = relay();
        let dir_sink = Arc::new(RecordingDirSink::default());
        let file_sink = Arc::new(RecordingFileSink::default());

        let dir_token = relay.watch_directory("/src", dir_sink.clone(), true);
        let file_token = relay.watch_file("/src", file_sink.clone());

        dispatch::dispatch(
            &relay.shared,
            WatchNotification {
                id: dir_token.id(),
                path: "/src".to_string(),
                event_type: ChangeKind::Update,
            },
        );
        dispatch::dispatch(
            &relay.shared,
            WatchNotification {
                id: file_token.id(),
                path: "/src".to_string(),
                event_type: ChangeKind::Update,
            },
        );

        assert!(dir_sink.events.lock().is_empty());
        assert_eq!(
            file_sink.events.lock().as_slice(),
            &[("/src".to_string(), FileEventKind::Changed)]
        );

        // Creates and deletes do reach directory sinks.
        for change in [ChangeKind::Create, ChangeKind::Delete] {
            dispatch::dispatch(
                &relay.shared,
                WatchNotification {
                    id: dir_token.id(),
                    path: "/src".to_string(),
                    event_type: change,
                },
            );
        }
        assert_eq!(
            dir_sink.events.lock().as_slice(),
            &["/src".to_string(), "/src".to_string()]
        );
    }

    #[tokio::test]
    async fn duplicate_sink_registration_never_double_invokes() {
        let relay = relay();
        let sink = Arc::new(RecordingFileSink::default());

        let token = relay.watch_file("/src/a.rs", sink.clone());
        let _again = relay.watch_file("/src/a.rs", sink.clone());

        dispatch::dispatch(
            &relay.shared,
            WatchNotification {
                id: token.id(),
                path: "/src/a.rs".to_string(),
                event_type: ChangeKind::Create,
            },
        );

        assert_eq!(sink.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn connect_to_unreachable_address_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let relay = relay();
        let result = relay.configuration_changed(config_for(addr)).await;
        assert!(matches!(result, Err(RelayError::Connect { .. })));
        assert!(!relay.is_connected());
    }

    #[tokio::test]
    async fn invalid_configuration_is_fatal_to_the_caller() {
        let relay = relay();
        let result = relay
            .configuration_changed(RelayConfig {
                host: String::new(),
                port: 1,
            })
            .await;
        assert!(matches!(result, Err(RelayError::Config(_))));
    }
}
