use std::collections::{HashMap, VecDeque};
use std::fmt::{self, Write as _};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use cafs_crypto::ContentHasher;
use cafs_types::Key;
use tracing::debug;

use crate::adder::{Adder, Ingest};
use crate::config::AdderConfig;
use crate::error::{StoreError, StoreResult};
use crate::file::{File, Memfile};
use crate::network::{Network, StoreId};
use crate::traits::{Fetcher, Filestore, Pinner, Source};

/// Backend prefix of every key issued by [`MapStore`].
pub const MAP_PREFIX: &str = "map";

/// What the store keeps per key.
#[derive(Clone, Debug)]
enum Record {
    Leaf {
        name: String,
        path: String,
        data: Bytes,
    },
    Directory {
        path: String,
        children: Vec<Key>,
    },
}

pub(crate) struct MapInner {
    id: StoreId,
    network: Arc<Network>,
    adder: AdderConfig,
    files: RwLock<HashMap<Key, Record>>,
    pinned: AtomicBool,
}

impl Drop for MapInner {
    fn drop(&mut self) {
        self.network.unregister(self.id);
    }
}

/// In-memory, HashMap-based content-addressed store.
///
/// The reference backend: leaves are held as [`Bytes`], directories as the
/// ordered keys of their children. `MapStore` is a cheap handle; clones share
/// the same records, pin flag and network membership.
///
/// Reads fall back to directly linked peers in the same [`Network`] when a key
/// is missing locally.
#[derive(Clone)]
pub struct MapStore {
    inner: Arc<MapInner>,
}

impl MapStore {
    /// Create a store in a private network of its own.
    pub fn new() -> Self {
        Self::in_network(&Network::new())
    }

    /// Create a store that joins `network`.
    pub fn in_network(network: &Arc<Network>) -> Self {
        Self::with_config(network, AdderConfig::default())
    }

    /// Create a store that joins `network`, with explicit adder queue sizes.
    pub fn with_config(network: &Arc<Network>, adder: AdderConfig) -> Self {
        let id = network.allocate_id();
        let inner = Arc::new(MapInner {
            id,
            network: Arc::clone(network),
            adder,
            files: RwLock::new(HashMap::new()),
            pinned: AtomicBool::new(false),
        });
        network.register(id, Arc::downgrade(&inner));
        debug!(store = %id, "map store created");
        Self { inner }
    }

    pub(crate) fn from_inner(inner: Arc<MapInner>) -> Self {
        Self { inner }
    }

    /// This store's identity within its network.
    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    /// The network this store belongs to.
    pub fn network(&self) -> &Arc<Network> {
        &self.inner.network
    }

    /// Link this store and `other` in both directions.
    ///
    /// Linking a store to itself, or re-linking an existing pair, does
    /// nothing.
    pub fn add_connection(&self, other: &MapStore) -> StoreResult<()> {
        if !Arc::ptr_eq(&self.inner.network, &other.inner.network) {
            return Err(StoreError::ForeignNetwork);
        }
        if self.inner.network.connect(self.id(), other.id()) {
            debug!(store = %self.id(), peer = %other.id(), "stores linked");
        }
        Ok(())
    }

    /// Live direct neighbors, in link order.
    pub fn neighbors(&self) -> Vec<MapStore> {
        self.inner.network.neighbors(self.id())
    }

    /// Number of records held locally.
    pub fn len(&self) -> usize {
        self.inner.files.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no records are held locally.
    pub fn is_empty(&self) -> bool {
        self.inner.files.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of all locally held keys.
    pub fn keys(&self) -> Vec<Key> {
        let files = self.inner.files.read().expect("lock poisoned");
        let mut keys: Vec<Key> = files.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether the store-wide pin flag is set.
    pub fn is_pinned(&self) -> bool {
        self.inner.pinned.load(Ordering::Acquire)
    }

    /// Render the local records as text, sorted by key.
    ///
    /// Leaves print as `key:name` followed by a tab-indented content line;
    /// directories print as `key:path` followed by one tab-indented line per
    /// child key.
    pub fn dump(&self) -> String {
        let files = self.inner.files.read().expect("lock poisoned");
        let mut entries: Vec<(&Key, &Record)> = files.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::new();
        for (key, record) in entries {
            match record {
                Record::Leaf { name, data, .. } => {
                    let _ = writeln!(out, "{key}:{name}");
                    let _ = writeln!(out, "\t{}", String::from_utf8_lossy(data));
                }
                Record::Directory { path, children } => {
                    let _ = writeln!(out, "{key}:{path}");
                    for child in children {
                        let _ = writeln!(out, "\t{child}");
                    }
                }
            }
        }
        out
    }

    fn insert(&self, key: &Key, record: Record) {
        let mut files = self.inner.files.write().expect("lock poisoned");
        // Same key means same content; the first record stays.
        files.entry(key.clone()).or_insert(record);
    }

    /// Look `key` up in this store only.
    fn get_local(&self, key: &Key) -> Option<Box<dyn File>> {
        let record = self
            .inner
            .files
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()?;
        let file: Box<dyn File> = match record {
            Record::Leaf { name, path, data } => {
                Box::new(Memfile::from_bytes(name, data).with_path(path))
            }
            Record::Directory { path, children } => Box::new(StoredDir {
                store: self.clone(),
                path,
                children: children.into(),
            }),
        };
        Some(file)
    }

    fn put_tree(&self, file: &mut dyn File, pin: bool) -> StoreResult<Key> {
        if !file.is_directory() {
            let data = Bytes::from(file.read_all()?);
            return self.put_leaf(file.file_name(), file.full_path(), data, pin);
        }
        let mut children = Vec::new();
        while let Some(mut child) = file.next_file()? {
            children.push(self.put_tree(child.as_mut(), pin)?);
        }
        self.put_directory(file.full_path(), children, pin)
    }
}

impl Default for MapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Ingest for MapStore {
    fn put_leaf(&self, name: &str, path: &str, data: Bytes, pin: bool) -> StoreResult<Key> {
        let key = ContentHasher::SHA2_256.key(MAP_PREFIX, &data)?;
        debug!(store = %self.id(), %key, path, bytes = data.len(), pin, "put leaf");
        self.insert(
            &key,
            Record::Leaf {
                name: name.to_string(),
                path: path.to_string(),
                data,
            },
        );
        Ok(key)
    }

    fn put_directory(&self, path: &str, children: Vec<Key>, pin: bool) -> StoreResult<Key> {
        let buf = ContentHasher::directory_buffer(&children);
        let key = ContentHasher::SHA2_256.key(MAP_PREFIX, &buf)?;
        debug!(store = %self.id(), %key, path, children = children.len(), pin, "put directory");
        self.insert(
            &key,
            Record::Directory {
                path: path.to_string(),
                children,
            },
        );
        Ok(key)
    }
}

impl Filestore for MapStore {
    fn path_prefix(&self) -> &str {
        MAP_PREFIX
    }

    fn put(&self, file: &mut dyn File, pin: bool) -> StoreResult<Key> {
        self.put_tree(file, pin)
    }

    fn get(&self, key: &Key) -> StoreResult<Box<dyn File>> {
        let key = key.normalize();
        if let Some(file) = self.get_local(&key) {
            return Ok(file);
        }
        for peer in self.neighbors() {
            if let Some(file) = peer.get_local(&key) {
                debug!(store = %self.id(), peer = %peer.id(), %key, "resolved from peer");
                return Ok(file);
            }
        }
        Err(StoreError::NotFound(key))
    }

    fn has(&self, key: &Key) -> StoreResult<bool> {
        Ok(self
            .inner
            .files
            .read()
            .expect("lock poisoned")
            .contains_key(key))
    }

    fn delete(&self, key: &Key) -> StoreResult<()> {
        let removed = self
            .inner
            .files
            .write()
            .expect("lock poisoned")
            .remove(key)
            .is_some();
        debug!(store = %self.id(), %key, removed, "delete");
        Ok(())
    }

    fn new_adder(&self, pin: bool, wrap: bool) -> StoreResult<Adder> {
        Adder::new(Arc::new(self.clone()), pin, wrap, &self.inner.adder)
    }
}

impl Fetcher for MapStore {
    fn fetch(&self, source: &Source, key: &Key) -> StoreResult<Box<dyn File>> {
        let neighbors = self.neighbors();
        if neighbors.is_empty() {
            return Err(StoreError::NoPeers);
        }
        match source {
            Source::Network => self.get(key),
            Source::Peer(id) => {
                let peer = neighbors
                    .into_iter()
                    .find(|peer| peer.id() == *id)
                    .ok_or(StoreError::NotLinked(*id))?;
                let key = key.normalize();
                peer.get_local(&key).ok_or(StoreError::NotFound(key))
            }
        }
    }
}

impl Pinner for MapStore {
    fn pin(&self, key: &Key, recursive: bool) -> StoreResult<()> {
        self.inner
            .pinned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::AlreadyPinned)?;
        debug!(store = %self.id(), %key, recursive, "pinned");
        Ok(())
    }

    fn unpin(&self, key: &Key, recursive: bool) -> StoreResult<()> {
        self.inner
            .pinned
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::NotPinned)?;
        debug!(store = %self.id(), %key, recursive, "unpinned");
        Ok(())
    }
}

impl fmt::Debug for MapStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapStore")
            .field("id", &self.id())
            .field("record_count", &self.len())
            .field("pinned", &self.is_pinned())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// StoredDir
// ---------------------------------------------------------------------------

/// Directory handle returned by [`MapStore::get`].
///
/// Children are resolved one at a time through the owning store, so a large
/// tree is never materialized up front and a missing child surfaces as an
/// error from `next_file` instead of failing the whole get.
struct StoredDir {
    store: MapStore,
    path: String,
    children: VecDeque<Key>,
}

impl File for StoredDir {
    fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("")
    }

    fn full_path(&self) -> &str {
        &self.path
    }

    fn is_directory(&self) -> bool {
        true
    }

    fn reader(&mut self) -> StoreResult<&mut (dyn Read + Send)> {
        Err(StoreError::NotReader)
    }

    fn next_file(&mut self) -> StoreResult<Option<Box<dyn File>>> {
        let Some(key) = self.children.pop_front() else {
            return Ok(None);
        };
        match self.store.get(&key) {
            Ok(file) => Ok(Some(file)),
            Err(source) => Err(StoreError::Child {
                key,
                source: Box::new(source),
            }),
        }
    }

    fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
    }
}
