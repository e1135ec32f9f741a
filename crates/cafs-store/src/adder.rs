//! Streaming ingestion sessions.
//!
//! An [`Adder`] accepts files from a producer, stores them from a background
//! task and reports one [`AddedFile`] per stored leaf to a consumer. Producer
//! and consumer are joined through bounded queues: `add_file` waits while the
//! work queue is full, and the worker waits while the event queue is full.
//! Failures are reported on a separate error stream so a bad file does not end
//! the session.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use cafs_types::Key;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::AdderConfig;
use crate::error::{StoreError, StoreResult};
use crate::file::File;

/// The write side of a store, as used by an [`Adder`].
///
/// Both methods must derive keys exactly as the store's `put` does, so a tree
/// ingested through an adder gets the same keys as one stored directly.
pub trait Ingest: Send + Sync + 'static {
    /// Store the bytes of one leaf.
    fn put_leaf(&self, name: &str, path: &str, data: Bytes, pin: bool) -> StoreResult<Key>;

    /// Store a directory whose children are already stored, in order.
    fn put_directory(&self, path: &str, children: Vec<Key>, pin: bool) -> StoreResult<Key>;
}

/// Completion event for one stored leaf.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedFile {
    /// Logical path of the leaf.
    pub path: String,
    pub name: String,
    /// Number of content bytes stored.
    pub bytes: u64,
    pub key: Key,
}

/// Pull-based stream of [`AddedFile`] events.
///
/// Ends once the session is closed and every event has been read, or
/// immediately when the session is cancelled.
pub struct AddedStream {
    rx: mpsc::Receiver<AddedFile>,
    cancel: CancellationToken,
}

impl AddedStream {
    /// The next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<AddedFile> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    /// Read every remaining event.
    pub async fn collect(mut self) -> Vec<AddedFile> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }
}

/// Stream of errors from failed `add_file` units, one error per unit.
pub struct AddErrors {
    rx: mpsc::UnboundedReceiver<StoreError>,
}

impl AddErrors {
    /// The next error, or `None` once the session has finished.
    pub async fn next(&mut self) -> Option<StoreError> {
        self.rx.recv().await
    }

    /// Errors reported so far, without waiting.
    pub fn drain(&mut self) -> Vec<StoreError> {
        let mut errors = Vec::new();
        while let Ok(err) = self.rx.try_recv() {
            errors.push(err);
        }
        errors
    }
}

/// A streaming ingestion session bound to one store.
///
/// Created by [`Filestore::new_adder`](crate::Filestore::new_adder). Requires
/// a running tokio runtime: the worker is spawned on the current one.
///
/// When `wrap` is set, [`Adder::close`] stores one more directory over every
/// top-level key in the order files were added, and returns its key.
pub struct Adder {
    work: Option<mpsc::Sender<Box<dyn File>>>,
    events: Option<AddedStream>,
    errors: Option<AddErrors>,
    cancel: CancellationToken,
    worker: Option<JoinHandle<StoreResult<Option<Key>>>>,
}

impl Adder {
    /// Start a session writing into `target`.
    pub fn new(
        target: Arc<dyn Ingest>,
        pin: bool,
        wrap: bool,
        config: &AdderConfig,
    ) -> StoreResult<Self> {
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

        let (work_tx, work_rx) = mpsc::channel(config.work_queue.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.event_queue.max(1));
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            target,
            pin,
            wrap,
            events: event_tx,
            errors: error_tx,
            cancel: cancel.clone(),
        };
        let handle = runtime.spawn(worker.run(work_rx));
        debug!(pin, wrap, "adder session started");

        Ok(Self {
            work: Some(work_tx),
            events: Some(AddedStream {
                rx: event_rx,
                cancel: cancel.clone(),
            }),
            errors: Some(AddErrors { rx: error_rx }),
            cancel,
            worker: Some(handle),
        })
    }

    /// Queue a leaf or directory for ingestion.
    ///
    /// Waits while the work queue is full.
    pub async fn add_file(&self, file: impl File + 'static) -> StoreResult<()> {
        let work = self.work.as_ref().ok_or(StoreError::AdderClosed)?;
        if self.cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let file: Box<dyn File> = Box::new(file);
        trace!(path = file.full_path(), "queueing file");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StoreError::Cancelled),
            sent = work.send(file) => sent.map_err(|_| StoreError::AdderClosed),
        }
    }

    /// Take the event stream. Returns `None` after the first call.
    pub fn added(&mut self) -> Option<AddedStream> {
        self.events.take()
    }

    /// Take the error stream. Returns `None` after the first call.
    pub fn errors(&mut self) -> Option<AddErrors> {
        self.errors.take()
    }

    /// Stop the session: the event stream ends, queued work is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this session when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Finish the session.
    ///
    /// Waits for queued work to be stored, then returns the wrapping root key
    /// when `wrap` is set and something was added. An event stream that was
    /// never taken is discarded so the worker cannot block on it.
    pub async fn close(&mut self) -> StoreResult<Option<Key>> {
        let worker = self.worker.take().ok_or(StoreError::AdderClosed)?;
        self.work = None;
        self.events = None;
        match worker.await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "adder worker stopped abnormally");
                Err(StoreError::AdderClosed)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    target: Arc<dyn Ingest>,
    pin: bool,
    wrap: bool,
    events: mpsc::Sender<AddedFile>,
    errors: mpsc::UnboundedSender<StoreError>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut work: mpsc::Receiver<Box<dyn File>>) -> StoreResult<Option<Key>> {
        let mut roots = Vec::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(added = roots.len(), "adder cancelled");
                    return Err(StoreError::Cancelled);
                }
                next = work.recv() => next,
            };
            let Some(file) = next else { break };

            match self.ingest(file).await {
                Ok(key) => roots.push(key),
                Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                Err(err) => {
                    warn!(error = %err, "failed to add file");
                    // Nobody listening is fine.
                    let _ = self.errors.send(err);
                }
            }
        }

        if !self.wrap || roots.is_empty() {
            info!(added = roots.len(), "adder closed");
            return Ok(None);
        }
        let root = self.target.put_directory("", roots, self.pin)?;
        info!(%root, "adder closed with wrapping root");
        Ok(Some(root))
    }

    /// Store `file` depth-first, children before their directory.
    fn ingest(
        &self,
        mut file: Box<dyn File>,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Key>> + Send + '_>> {
        Box::pin(async move {
            if !file.is_directory() {
                return self.add_leaf(file).await;
            }
            let mut children = Vec::new();
            while let Some(child) = file.next_file()? {
                children.push(self.ingest(child).await?);
            }
            self.target
                .put_directory(file.full_path(), children, self.pin)
        })
    }

    async fn add_leaf(&self, mut file: Box<dyn File>) -> StoreResult<Key> {
        let name = file.file_name().to_string();
        let path = file.full_path().to_string();
        // Leaf readers may block; keep them off the runtime threads.
        let data = tokio::task::spawn_blocking(move || file.read_all())
            .await
            .map_err(|err| {
                StoreError::io("leaf read task failed", std::io::Error::other(err))
            })??;
        let data = Bytes::from(data);
        let bytes = data.len() as u64;
        let key = self.target.put_leaf(&name, &path, data, self.pin)?;

        let event = AddedFile {
            path,
            name,
            bytes,
            key: key.clone(),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StoreError::Cancelled),
            sent = self.events.send(event) => {
                if sent.is_err() {
                    trace!(%key, "event stream dropped");
                }
            }
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::Duration;

    use cafs_crypto::ContentHasher;

    use crate::file::{Memdir, Memfile};
    use crate::memory::MapStore;
    use crate::network::Network;
    use crate::traits::Filestore;

    fn sample_tree() -> Memdir {
        Memdir::new("/a")
            .with(Memfile::from_bytes("a.txt", "foo"))
            .with(Memfile::from_bytes("b.txt", "bar"))
            .with(
                Memdir::new("/c")
                    .with(Memfile::from_bytes("d.txt", "baz"))
                    .with(Memdir::new("/e").with(Memfile::from_bytes("f.txt", "bat"))),
            )
    }

    fn dir_key(children: &[Key]) -> Key {
        ContentHasher::SHA2_256
            .key("map", &ContentHasher::directory_buffer(children))
            .unwrap()
    }

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("unreadable"))
        }
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn one_event_per_leaf() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        let stream = adder.added().unwrap();
        let consumer = tokio::spawn(stream.collect());

        adder.add_file(sample_tree()).await.unwrap();
        adder
            .add_file(Memfile::from_bytes("top.txt", "top").with_path("/top.txt"))
            .await
            .unwrap();
        assert_eq!(adder.close().await.unwrap(), None);

        let events = consumer.await.unwrap();
        let paths: Vec<&str> = events.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/a/a.txt", "/a/b.txt", "/a/c/d.txt", "/a/c/e/f.txt", "/top.txt"]
        );
        assert_eq!(events[0].name, "a.txt");
        assert_eq!(events[0].bytes, 3);
        for event in &events {
            assert!(store.has(&event.key).unwrap());
        }
    }

    #[tokio::test]
    async fn event_keys_rebuild_directory_key() {
        let direct = MapStore::new().put(&mut sample_tree(), false).unwrap();

        let store = MapStore::new();
        let mut adder = store.new_adder(false, true).unwrap();
        let consumer = tokio::spawn(adder.added().unwrap().collect());
        adder.add_file(sample_tree()).await.unwrap();
        let root = adder.close().await.unwrap().unwrap();
        let events = consumer.await.unwrap();

        let keys: Vec<Key> = events.iter().map(|e| e.key.clone()).collect();
        let e = dir_key(&keys[3..4]);
        let c = dir_key(&[keys[2].clone(), e]);
        let a = dir_key(&[keys[0].clone(), keys[1].clone(), c]);
        assert_eq!(a, direct);
        assert!(store.has(&direct).unwrap());
        assert_eq!(root, dir_key(&[direct]));
    }

    #[tokio::test]
    async fn wrap_root_lists_top_level_in_add_order() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, true).unwrap();
        adder.add_file(Memfile::from_bytes("one", "1")).await.unwrap();
        adder.add_file(Memfile::from_bytes("two", "2")).await.unwrap();
        let root = adder.close().await.unwrap().unwrap();

        let one = ContentHasher::SHA2_256.key("map", b"1").unwrap();
        let two = ContentHasher::SHA2_256.key("map", b"2").unwrap();
        assert_eq!(root, dir_key(&[one, two]));

        let mut dir = store.get(&root).unwrap();
        assert_eq!(dir.next_file().unwrap().unwrap().read_all().unwrap(), b"1");
    }

    #[tokio::test]
    async fn wrap_with_nothing_added() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, true).unwrap();
        assert_eq!(adder.close().await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn streams_are_taken_once() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        assert!(adder.added().is_some());
        assert!(adder.added().is_none());
        assert!(adder.errors().is_some());
        assert!(adder.errors().is_none());
        adder.close().await.unwrap();
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn close_without_consumer_does_not_hang() {
        let store = MapStore::with_config(
            &Network::new(),
            AdderConfig {
                work_queue: 1,
                event_queue: 1,
            },
        );
        let mut adder = store.new_adder(false, false).unwrap();
        adder.add_file(Memfile::from_bytes("x", "x")).await.unwrap();
        adder.close().await.unwrap();
        assert_eq!(store.len(), 1);
    }

    fn small_queues() -> MapStore {
        MapStore::with_config(
            &Network::new(),
            AdderConfig {
                work_queue: 1,
                event_queue: 1,
            },
        )
    }

    fn numbered(i: usize) -> Memfile {
        Memfile::from_bytes(format!("f{i}"), i.to_string())
    }

    fn numbered_key(i: usize) -> Key {
        ContentHasher::SHA2_256
            .key("map", i.to_string().as_bytes())
            .unwrap()
    }

    #[tokio::test]
    async fn add_file_waits_for_slow_consumer() {
        let store = small_queues();
        let mut adder = store.new_adder(false, false).unwrap();
        let stream = adder.added().unwrap();

        // One event buffered, one leaf waiting to emit, one file queued.
        for i in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), adder.add_file(numbered(i)))
                .await
                .expect("queue should have room")
                .unwrap();
        }
        let blocked =
            tokio::time::timeout(Duration::from_millis(100), adder.add_file(numbered(3))).await;
        assert!(blocked.is_err(), "add_file should wait while queues are full");

        let consumer = tokio::spawn(stream.collect());
        tokio::time::timeout(Duration::from_secs(5), adder.add_file(numbered(4)))
            .await
            .expect("reading events frees the queue")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), adder.close())
            .await
            .expect("close should finish")
            .unwrap();

        let names: Vec<String> = consumer.await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["f0", "f1", "f2", "f4"]);
        assert!(!store.has(&numbered_key(3)).unwrap());
    }

    #[tokio::test]
    async fn cancel_drops_queued_work() {
        let store = small_queues();
        let mut adder = store.new_adder(false, false).unwrap();
        let _stream = adder.added().unwrap();

        for i in 0..3 {
            tokio::time::timeout(Duration::from_secs(5), adder.add_file(numbered(i)))
                .await
                .expect("queue should have room")
                .unwrap();
        }
        adder.cancel();
        assert!(matches!(adder.close().await, Err(StoreError::Cancelled)));

        assert!(store.has(&numbered_key(0)).unwrap());
        assert!(!store.has(&numbered_key(2)).unwrap());
    }

    #[tokio::test]
    async fn second_close_is_an_error() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        adder.close().await.unwrap();
        assert!(matches!(adder.close().await, Err(StoreError::AdderClosed)));
        assert!(matches!(
            adder.add_file(Memfile::from_bytes("late", "late")).await,
            Err(StoreError::AdderClosed)
        ));
    }

    #[tokio::test]
    async fn cancel_ends_stream() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        let mut stream = adder.added().unwrap();

        adder.cancel();
        assert!(stream.next().await.is_none());
        assert!(matches!(
            adder.add_file(Memfile::from_bytes("x", "x")).await,
            Err(StoreError::Cancelled)
        ));
        assert!(matches!(adder.close().await, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_through_token() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        adder.add_file(Memfile::from_bytes("x", "x")).await.unwrap();
        adder.cancellation_token().cancel();
        assert!(matches!(adder.close().await, Err(StoreError::Cancelled)));
    }

    #[test]
    fn needs_a_runtime() {
        let store = MapStore::new();
        assert!(matches!(
            store.new_adder(false, false),
            Err(StoreError::NoRuntime)
        ));
    }

    /// A reader that blocks until its bytes are sent.
    struct Gate {
        rx: std::sync::mpsc::Receiver<Vec<u8>>,
        done: bool,
    }

    impl Read for Gate {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.done {
                return Ok(0);
            }
            self.done = true;
            let data = self.rx.recv().map_err(std::io::Error::other)?;
            buf[..data.len()].copy_from_slice(&data);
            Ok(data.len())
        }
    }

    #[tokio::test]
    async fn blocking_reader_does_not_stall_runtime() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        let mut stream = adder.added().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();

        adder
            .add_file(Memfile::from_reader("gated", Gate { rx, done: false }))
            .await
            .unwrap();
        // The worker is now parked in the read; this task must still run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(b"open".to_vec()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.name, "gated");
        assert_eq!(event.bytes, 4);
        adder.close().await.unwrap();
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn failed_unit_reports_error_and_session_continues() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, false).unwrap();
        let mut errors = adder.errors().unwrap();
        let consumer = tokio::spawn(adder.added().unwrap().collect());

        adder.add_file(Memfile::from_reader("bad", Broken)).await.unwrap();
        adder.add_file(Memfile::from_bytes("good", "good")).await.unwrap();
        adder.close().await.unwrap();

        let events = consumer.await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "good");

        let err = errors.next().await.unwrap();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(errors.next().await.is_none());
    }

    #[tokio::test]
    async fn failure_inside_directory_is_one_error() {
        let store = MapStore::new();
        let mut adder = store.new_adder(false, true).unwrap();
        let mut errors = adder.errors().unwrap();

        let dir = Memdir::new("/d")
            .with(Memfile::from_bytes("ok", "ok"))
            .with(Memfile::from_reader("bad", Broken));
        adder.add_file(dir).await.unwrap();
        assert_eq!(adder.close().await.unwrap(), None);

        assert_eq!(errors.drain().len(), 1);
        // the leaf written before the failure stays
        assert!(store
            .has(&ContentHasher::SHA2_256.key("map", b"ok").unwrap())
            .unwrap());
    }
}
