//! Per-key locks used to serialize manifest replacement: healing's "fetch,
//! reconstruct, re-shard, swap" sequence must appear atomic to readers of a
//! given `fileHash`, without holding a single global lock across the whole
//! cache.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

#[derive(Default)]
pub struct KeyLocks<K: std::hash::Hash + Eq + Clone> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: std::hash::Hash + Eq + Clone> KeyLocks<K> {
    pub fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    pub fn lock_for(&self, key: &K) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}
