//! Simulated peer network between in-memory stores.
//!
//! A [`Network`] is a registry: it hands out [`StoreId`]s, keeps weak handles
//! to the stores registered under them, and records which stores are linked.
//! Stores hold an `Arc<Network>` and look their neighbors up by id; they never
//! reference each other directly. Links are symmetric and idempotent, and a
//! store is never linked to itself. Lookups only ever consult direct
//! neighbors; there is no multi-hop routing.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory::{MapInner, MapStore};

/// Identifier of a store within its network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(u64);

impl StoreId {
    /// The raw numeric id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// Registry of stores and the links between them.
pub struct Network {
    next_id: AtomicU64,
    stores: RwLock<HashMap<StoreId, Weak<MapInner>>>,
    links: RwLock<HashMap<StoreId, Vec<StoreId>>>,
}

impl Network {
    /// Create an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            stores: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
        })
    }

    pub(crate) fn allocate_id(&self) -> StoreId {
        StoreId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, id: StoreId, store: Weak<MapInner>) {
        self.stores
            .write()
            .expect("network lock poisoned")
            .insert(id, store);
    }

    /// Forget a store and every link that touches it.
    pub(crate) fn unregister(&self, id: StoreId) {
        self.stores
            .write()
            .expect("network lock poisoned")
            .remove(&id);
        let mut links = self.links.write().expect("network lock poisoned");
        if let Some(neighbors) = links.remove(&id) {
            for neighbor in neighbors {
                if let Some(back) = links.get_mut(&neighbor) {
                    back.retain(|other| *other != id);
                }
            }
        }
        debug!(store = %id, "store left network");
    }

    /// Link two stores in both directions.
    ///
    /// Returns `true` if a new link was created; re-linking an existing pair
    /// or linking a store to itself is a no-op returning `false`.
    pub fn connect(&self, a: StoreId, b: StoreId) -> bool {
        if a == b {
            return false;
        }
        let mut links = self.links.write().expect("network lock poisoned");
        let mut added = false;
        for (from, to) in [(a, b), (b, a)] {
            let neighbors = links.entry(from).or_default();
            if !neighbors.contains(&to) {
                neighbors.push(to);
                added = true;
            }
        }
        added
    }

    /// Returns `true` if `a` and `b` are directly linked.
    pub fn is_linked(&self, a: StoreId, b: StoreId) -> bool {
        self.links
            .read()
            .expect("network lock poisoned")
            .get(&a)
            .is_some_and(|neighbors| neighbors.contains(&b))
    }

    /// Ids of the direct neighbors of `id`, in link order.
    pub fn neighbor_ids(&self, id: StoreId) -> Vec<StoreId> {
        self.links
            .read()
            .expect("network lock poisoned")
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Live handles to the direct neighbors of `id`, in link order.
    ///
    /// Neighbors that have been dropped are skipped.
    pub(crate) fn neighbors(&self, id: StoreId) -> Vec<MapStore> {
        let ids = self.neighbor_ids(id);
        let stores = self.stores.read().expect("network lock poisoned");
        ids.iter()
            .filter_map(|neighbor| stores.get(neighbor))
            .filter_map(Weak::upgrade)
            .map(MapStore::from_inner)
            .collect()
    }

    /// Number of live stores registered in this network.
    pub fn len(&self) -> usize {
        self.stores
            .read()
            .expect("network lock poisoned")
            .values()
            .filter(|store| store.strong_count() > 0)
            .count()
    }

    /// Returns `true` if no live store is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link_count: usize = self
            .links
            .read()
            .expect("network lock poisoned")
            .values()
            .map(Vec::len)
            .sum();
        f.debug_struct("Network")
            .field("store_count", &self.len())
            .field("link_count", &(link_count / 2))
            .finish()
    }
}
