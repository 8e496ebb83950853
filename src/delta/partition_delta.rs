use std::sync::Arc;

use parking_lot::RwLock;

use crate::delta::index::DeltaIndex;
use crate::wal::row::{compare_timestamp_version, WalPointer};

/// The delta tier for one partition version, with delta chaining: while a
/// compaction of the current delta is in flight, writes land in a fresh
/// active delta and reads check active then the snapshot being compacted, so
/// no write is lost and no read misses an in-flight-compaction row.
pub struct PartitionDelta {
    chain: RwLock<Chain>,
}

struct Chain {
    active: Arc<DeltaIndex>,
    // present only while a compaction is in flight
    compacting: Option<Arc<DeltaIndex>>,
}

impl PartitionDelta {
    pub fn new() -> Self {
        Self {
            chain: RwLock::new(Chain {
                active: Arc::new(DeltaIndex::new()),
                compacting: None,
            }),
        }
    }

    /// Puts into the active delta. The chain lock is held across the insert
    /// so a concurrent compaction swap cannot strand the write in a snapshot
    /// that has already been iterated.
    pub fn put(&self, key: Vec<u8>, pointer: WalPointer) {
        let chain = self.chain.read();
        chain.active.put(key, pointer);
    }

    pub fn get(&self, key: &[u8]) -> Option<WalPointer> {
        let chain = self.chain.read();
        if let Some(pointer) = chain.active.get(key) {
            return Some(pointer);
        }
        chain.compacting.as_ref().and_then(|c| c.get(key))
    }

    /// Ordered scan over active and compacting tiers; where both hold the
    /// same key the greater (timestamp, version) wins.
    pub fn range_scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Vec<(Vec<u8>, WalPointer)> {
        let (active, compacting) = {
            let chain = self.chain.read();
            (chain.active.clone(), chain.compacting.clone())
        };
        let mut merged = active.range_scan(from, to);
        if let Some(compacting) = compacting {
            for (key, pointer) in compacting.range_scan(from, to) {
                match merged.binary_search_by(|(k, _)| k.as_slice().cmp(&key)) {
                    Ok(i) => {
                        let current = merged[i].1;
                        if compare_timestamp_version(
                            pointer.timestamp,
                            pointer.version,
                            current.timestamp,
                            current.version,
                        )
                        .is_gt()
                        {
                            merged[i].1 = pointer;
                        }
                    }
                    Err(i) => merged.insert(i, (key, pointer)),
                }
            }
        }
        merged
    }

    pub fn len(&self) -> usize {
        let chain = self.chain.read();
        chain.active.len() + chain.compacting.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts (or resumes) a compaction: the current active delta becomes
    /// the snapshot and a fresh active takes new writes. Returns the
    /// snapshot to merge. Resuming after an aborted merge returns the same
    /// snapshot again.
    pub fn begin_compaction(&self) -> Arc<DeltaIndex> {
        let mut chain = self.chain.write();
        if let Some(compacting) = &chain.compacting {
            return compacting.clone();
        }
        let snapshot = std::mem::replace(&mut chain.active, Arc::new(DeltaIndex::new()));
        chain.compacting = Some(snapshot.clone());
        snapshot
    }

    /// Drops the snapshot. Only call after the merge is durably committed to
    /// the compacted store (commit-then-clear, never clear-then-commit).
    pub fn commit_compaction(&self) {
        self.chain.write().compacting = None;
    }
}

impl Default for PartitionDelta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pointer(fp: u64, timestamp: i64, version: i64) -> WalPointer {
        WalPointer {
            fp,
            timestamp,
            tombstone: false,
            version,
        }
    }

    #[test]
    fn test_reads_see_both_tiers_during_compaction() {
        let delta = PartitionDelta::new();
        delta.put(b"a".to_vec(), pointer(0, 1, 1));
        delta.put(b"b".to_vec(), pointer(1, 1, 2));

        let snapshot = delta.begin_compaction();
        assert_eq!(snapshot.len(), 2);

        // a write racing the compaction lands in the new active delta
        delta.put(b"c".to_vec(), pointer(2, 2, 3));
        delta.put(b"a".to_vec(), pointer(3, 2, 4));

        // reads fall through active to the snapshot
        assert_eq!(delta.get(b"b").unwrap().fp, 1);
        // the newer active entry shadows the snapshot
        assert_eq!(delta.get(b"a").unwrap().fp, 3);
        assert_eq!(delta.len(), 4);

        delta.commit_compaction();
        assert_eq!(delta.get(b"b"), None);
        assert_eq!(delta.get(b"a").unwrap().fp, 3);
        assert_eq!(delta.len(), 2);
    }

    #[test]
    fn test_begin_compaction_resumes_existing_snapshot() {
        let delta = PartitionDelta::new();
        delta.put(b"a".to_vec(), pointer(0, 1, 1));

        let first = delta.begin_compaction();
        let second = delta.begin_compaction();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_range_scan_merges_tiers() {
        let delta = PartitionDelta::new();
        delta.put(b"a".to_vec(), pointer(0, 1, 1));
        delta.put(b"c".to_vec(), pointer(1, 1, 2));
        delta.begin_compaction();
        delta.put(b"b".to_vec(), pointer(2, 2, 3));
        delta.put(b"c".to_vec(), pointer(3, 2, 4));

        let scanned = delta.range_scan(None, None);
        let keys: Vec<_> = scanned.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        // same-key tie goes to the greater (timestamp, version)
        assert_eq!(scanned[2].1.fp, 3);
    }
}
