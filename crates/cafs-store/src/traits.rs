use std::sync::Arc;
use std::time::Duration;

use cafs_types::Key;
use serde::{Deserialize, Serialize};

use crate::adder::Adder;
use crate::error::StoreResult;
use crate::file::File;
use crate::network::StoreId;

/// Content-addressed store of files and directories.
///
/// All implementations must satisfy these invariants:
/// - The key of a leaf depends only on its bytes, and the key of a directory
///   depends only on its children's keys in order.
/// - Putting content that is already present is a no-op returning the same
///   key.
/// - A file returned by `get` is a fresh, independently consumable handle.
pub trait Filestore: Send + Sync {
    /// Identifier of the backend; the first segment of every key it issues.
    fn path_prefix(&self) -> &str;

    /// Store a file or directory tree and return its content key.
    ///
    /// The file is consumed: leaf bytes are read and directory children are
    /// iterated.
    fn put(&self, file: &mut dyn File, pin: bool) -> StoreResult<Key>;

    /// Retrieve the file or directory stored under `key`.
    ///
    /// Fails with [`StoreError::NotFound`](crate::StoreError::NotFound) if the
    /// key cannot be resolved.
    fn get(&self, key: &Key) -> StoreResult<Box<dyn File>>;

    /// Whether `key` is held by this store itself.
    fn has(&self, key: &Key) -> StoreResult<bool>;

    /// Remove the record for `key`. Deleting a missing key is not an error.
    fn delete(&self, key: &Key) -> StoreResult<()>;

    /// Open a streaming ingestion session writing into this store.
    fn new_adder(&self, pin: bool, wrap: bool) -> StoreResult<Adder>;
}

/// Where an explicit fetch should look.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    /// Any linked neighbor, in link order.
    Network,
    /// One specific linked neighbor.
    Peer(StoreId),
}

/// A store that can retrieve content from other stores.
pub trait Fetcher: Filestore {
    fn fetch(&self, source: &Source, key: &Key) -> StoreResult<Box<dyn File>>;
}

/// A store with a retention marker.
pub trait Pinner: Filestore {
    /// Mark content as retained.
    fn pin(&self, key: &Key, recursive: bool) -> StoreResult<()>;

    /// Clear the retention marker.
    fn unpin(&self, key: &Key, recursive: bool) -> StoreResult<()>;
}

/// A store that can mirror content into a secondary store.
pub trait Cache: Filestore {
    /// The primary store being decorated.
    fn filestore(&self) -> Arc<dyn Filestore>;

    /// Copy the content under `key` into the secondary store.
    fn cache(&self, key: &Key) -> StoreResult<()>;

    /// Drop `key` from the secondary store.
    fn uncache(&self, key: &Key) -> StoreResult<()>;
}

/// A cache whose entries can be given a time to expiry.
pub trait ExpiringCache: Cache {
    /// Cache `key` until `ttl` has elapsed. Caching the key again without a
    /// ttl makes the entry permanent.
    fn cache_for(&self, key: &Key, ttl: Duration) -> StoreResult<()>;
}
