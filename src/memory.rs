//! Session-wide registry of item references.
//!
//! Every item a station returns is registered here and receives a [`RefId`].
//! Ids strictly increase, are never reused, and stay resolvable for the life
//! of the memory, so a caller can act on an item from an earlier search.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::models::{Instance, ItemRef, RefId, StationId};

/// Associates reference ids with the items they identify.
///
/// Safe to share between concurrently running station searches.
pub struct InstanceMemory {
    refs: Mutex<HashMap<RefId, Arc<ItemRef>>>,
    last_id: AtomicU64,
}

impl InstanceMemory {
    /// Ids start from the current time in microseconds, keeping them unique
    /// across restarts of the same process as well as within it.
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_micros().max(0) as u64;
        Self::starting_at(seed)
    }

    /// The first id issued will be `last_id + 1`.
    pub fn starting_at(last_id: u64) -> Self {
        Self {
            refs: Mutex::new(HashMap::new()),
            last_id: AtomicU64::new(last_id),
        }
    }

    /// Create and remember a reference to an instance found at `station`.
    pub fn add_ref(&self, instance: Instance, station: StationId) -> Arc<ItemRef> {
        let id = self.next_id();
        let item = Arc::new(ItemRef::new(id, instance, station));
        self.refs.lock().insert(id, Arc::clone(&item));
        item
    }

    pub fn get_ref(&self, id: RefId) -> Option<Arc<ItemRef>> {
        self.refs.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.refs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.lock().is_empty()
    }

    fn next_id(&self) -> RefId {
        RefId(self.last_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl Default for InstanceMemory {
    fn default() -> Self {
        Self::new()
    }
}
