//! Content-addressed file and directory storage.
//!
//! Content is stored under a key derived from the bytes themselves, so the
//! same data always lands under the same key. Directories are addressed by
//! the keys of their children in order, which makes a whole tree addressable
//! by one root key.
//!
//! # Files
//!
//! - [`File`] -- a leaf byte stream or a directory of children
//! - [`Memfile`] / [`Memdir`] -- in-memory trees to hand to a store
//!
//! # Stores
//!
//! All backends implement the [`Filestore`] trait; optional capabilities are
//! [`Fetcher`], [`Pinner`], [`Cache`] and [`ExpiringCache`]:
//!
//! - [`MapStore`] -- `HashMap`-based reference store with a simulated peer
//!   [`Network`] used as a read fallback
//! - [`CacheStore`] -- decorator mirroring selected puts into a second store
//!
//! # Streaming ingestion
//!
//! [`Adder`] ingests many files from a background task and reports one
//! [`AddedFile`] event per stored leaf.
//!
//! # Key Derivation
//!
//! 1. A leaf key is `/<prefix>/<token>` with token
//!    `base58(multihash(sha2-256(bytes)))`.
//! 2. A directory key hashes its children's keys, each followed by `\n`, in
//!    insertion order.
//! 3. Putting content that is already present returns the existing key.

pub mod adder;
pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod memory;
pub mod network;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use adder::{AddErrors, AddedFile, AddedStream, Adder, Ingest};
pub use cache::{CachePredicate, CacheStore, NewCacheFn};
pub use cafs_types::Key;
pub use config::{AdderConfig, CacheConfig, CafsConfig};
pub use error::{StoreError, StoreResult};
pub use file::{join_path, walk, Entry, File, Memdir, Memfile};
pub use memory::{MapStore, MAP_PREFIX};
pub use network::{Network, StoreId};
pub use traits::{Cache, ExpiringCache, Fetcher, Filestore, Pinner, Source};
