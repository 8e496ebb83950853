//! The compacted tier behind each partition store. The index is a pluggable
//! capability: an ordered map from composed storage keys to whole rows, with
//! a merge that never applies a stale row. A sled backend persists across
//! restarts; a memory backend serves ephemeral partitions and tests.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use tracing::warn;

use crate::partition::VersionedPartitionName;
use crate::store::error::PartitionError;
use crate::wal::row::{compare_timestamp_version, Row};

pub type KeyedRowIter = Box<dyn Iterator<Item = Result<(Vec<u8>, Row)>> + Send>;

/// Ordered row index over composed keys. Implementations must keep at most
/// one row per key, the one with the greatest (timestamp, version).
pub trait WalIndex: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Row>>;

    fn contains_key(&self, key: &[u8]) -> Result<bool>;

    /// Ordered scan of `[from, to)`; `None` bounds are open ends.
    fn range_scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<KeyedRowIter>;

    fn row_scan(&self) -> Result<KeyedRowIter>;

    /// Applies each row only if it is newer than what the index holds for
    /// that key. Returns how many were applied.
    fn merge(&self, entries: Vec<(Vec<u8>, Row)>) -> Result<usize>;

    fn count(&self) -> Result<u64>;

    fn flush(&self) -> Result<()>;

    fn delete(&self) -> Result<()>;
}

pub trait WalIndexProvider: Send + Sync {
    fn open_index(&self, partition: &VersionedPartitionName) -> Result<Arc<dyn WalIndex>>;

    fn delete_index(&self, partition: &VersionedPartitionName) -> Result<()>;
}

fn should_apply(existing: Option<&Row>, incoming: &Row) -> bool {
    match existing {
        None => true,
        Some(row) => compare_timestamp_version(
            incoming.timestamp,
            incoming.version,
            row.timestamp,
            row.version,
        )
        .is_gt(),
    }
}

#[derive(Default)]
pub struct MemoryWalIndex {
    rows: RwLock<BTreeMap<Vec<u8>, Row>>,
}

impl MemoryWalIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalIndex for MemoryWalIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Row>> {
        Ok(self.rows.read().get(key).cloned())
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.rows.read().contains_key(key))
    }

    fn range_scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<KeyedRowIter> {
        let lower = match from {
            Some(f) => Bound::Included(f.to_vec()),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(t) => Bound::Excluded(t.to_vec()),
            None => Bound::Unbounded,
        };
        let snapshot: Vec<_> = self
            .rows
            .read()
            .range((lower, upper))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }

    fn row_scan(&self) -> Result<KeyedRowIter> {
        self.range_scan(None, None)
    }

    fn merge(&self, entries: Vec<(Vec<u8>, Row)>) -> Result<usize> {
        let mut rows = self.rows.write();
        let mut applied = 0;
        for (key, row) in entries {
            if should_apply(rows.get(&key), &row) {
                rows.insert(key, row);
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.rows.read().len() as u64)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.rows.write().clear();
        Ok(())
    }
}

/// Hands out one shared memory index per partition version, so a store that
/// is closed and reopened within the same process sees its rows again.
#[derive(Default)]
pub struct MemoryWalIndexProvider {
    indexes: RwLock<HashMap<VersionedPartitionName, Arc<MemoryWalIndex>>>,
}

impl MemoryWalIndexProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalIndexProvider for MemoryWalIndexProvider {
    fn open_index(&self, partition: &VersionedPartitionName) -> Result<Arc<dyn WalIndex>> {
        let mut indexes = self.indexes.write();
        let index = indexes
            .entry(partition.clone())
            .or_insert_with(|| Arc::new(MemoryWalIndex::new()))
            .clone();
        Ok(index)
    }

    fn delete_index(&self, partition: &VersionedPartitionName) -> Result<()> {
        if let Some(index) = self.indexes.write().remove(partition) {
            index.delete()?;
        }
        Ok(())
    }
}

pub struct SledWalIndex {
    db: sled::Db,
    tree: sled::Tree,
    tree_name: String,
}

fn tree_name(partition: &VersionedPartitionName) -> String {
    let bytes = partition.to_bytes();
    let mut name = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        name.push_str(&format!("{:02x}", b));
    }
    name
}

impl WalIndex for SledWalIndex {
    fn get(&self, key: &[u8]) -> Result<Option<Row>> {
        match self.tree.get(key)? {
            None => Ok(None),
            Some(bytes) => Ok(Some(Row::from_bytes(&bytes)?)),
        }
    }

    fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.tree.contains_key(key)?)
    }

    fn range_scan(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<KeyedRowIter> {
        let lower = match from {
            Some(f) => Bound::Included(f.to_vec()),
            None => Bound::Unbounded,
        };
        let upper = match to {
            Some(t) => Bound::Excluded(t.to_vec()),
            None => Bound::Unbounded,
        };
        let iter = self.tree.range((lower, upper)).map(|item| {
            let (key, value) = item?;
            Ok((key.to_vec(), Row::from_bytes(&value)?))
        });
        Ok(Box::new(iter))
    }

    fn row_scan(&self) -> Result<KeyedRowIter> {
        self.range_scan(None, None)
    }

    fn merge(&self, entries: Vec<(Vec<u8>, Row)>) -> Result<usize> {
        let mut applied = 0;
        for (key, row) in entries {
            let existing = match self.tree.get(&key)? {
                None => None,
                Some(bytes) => Some(Row::from_bytes(&bytes)?),
            };
            if should_apply(existing.as_ref(), &row) {
                self.tree.insert(key, row.to_bytes())?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.tree.len() as u64)
    }

    fn flush(&self) -> Result<()> {
        self.tree.flush()?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.db.drop_tree(self.tree_name.as_bytes())?;
        Ok(())
    }
}

/// One sled database per node; one tree per partition version.
pub struct SledWalIndexProvider {
    db: sled::Db,
}

impl SledWalIndexProvider {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let db = match sled::open(dir.as_ref().join("index")) {
            Err(e) => {
                warn!("failed to open index db in {:?}, err: {}", dir.as_ref(), e);
                bail!(PartitionError::FailedToOpenIndex);
            }
            Ok(db) => db,
        };
        Ok(Self { db })
    }
}

impl WalIndexProvider for SledWalIndexProvider {
    fn open_index(&self, partition: &VersionedPartitionName) -> Result<Arc<dyn WalIndex>> {
        let name = tree_name(partition);
        let tree = self.db.open_tree(name.as_bytes())?;
        Ok(Arc::new(SledWalIndex {
            db: self.db.clone(),
            tree,
            tree_name: name,
        }))
    }

    fn delete_index(&self, partition: &VersionedPartitionName) -> Result<()> {
        self.db.drop_tree(tree_name(partition).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionName;

    fn vpn() -> VersionedPartitionName {
        VersionedPartitionName::new(PartitionName::new(b"test-ring", b"p1"), 1)
    }

    fn row(key: &[u8], value: &[u8], timestamp: i64, version: i64) -> (Vec<u8>, Row) {
        (
            key.to_vec(),
            Row {
                prefix: None,
                key: key.to_vec(),
                value: Some(value.to_vec()),
                timestamp,
                tombstone: false,
                version,
            },
        )
    }

    #[test]
    fn test_memory_merge_keeps_newer() {
        let index = MemoryWalIndex::new();
        assert_eq!(index.merge(vec![row(b"a", b"v1", 10, 1)]).unwrap(), 1);
        // stale by timestamp
        assert_eq!(index.merge(vec![row(b"a", b"old", 5, 9)]).unwrap(), 0);
        // same timestamp, greater version wins
        assert_eq!(index.merge(vec![row(b"a", b"v2", 10, 2)]).unwrap(), 1);

        let got = index.get(b"a").unwrap().unwrap();
        assert_eq!(got.value.as_deref(), Some(&b"v2"[..]));
        assert_eq!(index.count().unwrap(), 1);
    }

    #[test]
    fn test_memory_range_scan_bounds() {
        let index = MemoryWalIndex::new();
        index
            .merge(vec![
                row(b"a", b"1", 1, 1),
                row(b"b", b"2", 1, 2),
                row(b"c", b"3", 1, 3),
            ])
            .unwrap();

        let keys: Vec<_> = index
            .range_scan(Some(b"a"), Some(b"c"))
            .unwrap()
            .map(|e| e.unwrap().0)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_sled_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SledWalIndexProvider::open(dir.path()).unwrap();
        let index = provider.open_index(&vpn()).unwrap();

        index
            .merge(vec![row(b"a", b"1", 1, 1), row(b"b", b"2", 1, 2)])
            .unwrap();
        index.flush().unwrap();

        assert!(index.contains_key(b"a").unwrap());
        let got = index.get(b"b").unwrap().unwrap();
        assert_eq!(got.value.as_deref(), Some(&b"2"[..]));

        // reopened index sees the same tree
        let again = provider.open_index(&vpn()).unwrap();
        assert_eq!(again.count().unwrap(), 2);

        provider.delete_index(&vpn()).unwrap();
        let empty = provider.open_index(&vpn()).unwrap();
        assert_eq!(empty.count().unwrap(), 0);
    }
}
