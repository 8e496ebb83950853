use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use parking_lot::RwLock;

use crate::wal::row::{compare_timestamp_version, WalPointer};

/// In-memory pointer index over the delta WAL for one partition version.
/// Holds a hash map for point lookups and an ordered map for range scans
/// over the same entries; one lock guards both so a put is atomic across
/// them. Keys are composed storage keys ([`crate::wal::key`]).
pub struct DeltaIndex {
    maps: RwLock<Maps>,
}

#[derive(Default)]
struct Maps {
    pointers: HashMap<Vec<u8>, WalPointer>,
    ordered: BTreeMap<Vec<u8>, WalPointer>,
}

impl DeltaIndex {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
        }
    }

    /// Inserts the pointer unless the index already holds a newer
    /// (timestamp, version) for the key. Racing writers may append to the
    /// WAL in one order and reach here in another; the max keeps the index
    /// pointing at the winning row either way.
    pub fn put(&self, key: Vec<u8>, pointer: WalPointer) {
        let mut maps = self.maps.write();
        if let Some(existing) = maps.pointers.get(&key) {
            if compare_timestamp_version(
                pointer.timestamp,
                pointer.version,
                existing.timestamp,
                existing.version,
            )
            .is_lt()
            {
                return;
            }
        }
        maps.pointers.insert(key.clone(), pointer);
        maps.ordered.insert(key, pointer);
    }

    pub fn get(&self, key: &[u8]) -> Option<WalPointer> {
        self.maps.read().pointers.get(key).copied()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.maps.read().pointers.contains_key(key)
    }

    /// Ordered snapshot of `[from, to)`. `None` bounds are open ends.
    pub fn range_scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Vec<(Vec<u8>, WalPointer)> {
        let maps = self.maps.read();
        let lower = match from {
            Some(f) => Bound::Included(f.to_vec()),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(t) => Bound::Excluded(t.to_vec()),
            None => Bound::Unbounded,
        };
        maps.ordered
            .range((lower, upper))
            .map(|(k, p)| (k.clone(), *p))
            .collect()
    }

    pub fn key_set(&self) -> Vec<Vec<u8>> {
        self.maps.read().ordered.keys().cloned().collect()
    }

    /// Ordered snapshot of every entry, for the compactor.
    pub fn ordered_snapshot(&self) -> Vec<(Vec<u8>, WalPointer)> {
        self.maps
            .read()
            .ordered
            .iter()
            .map(|(k, p)| (k.clone(), *p))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.maps.read().pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeltaIndex {
    fn default() -> Self {
        Self::new()
    }
}
