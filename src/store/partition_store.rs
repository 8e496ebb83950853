use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::delta::PartitionDelta;
use crate::orderid::OrderIdProvider;
use crate::partition::{Durability, PartitionProperties, VersionedPartitionName};
use crate::store::index::{KeyedRowIter, WalIndex};
use crate::wal::delta_wal::{DeltaWal, WalReplay, WalReplayEntry};
use crate::wal::key::{compose, prefix_upper_exclusive};
use crate::wal::row::{compare_timestamp_version, Row, WalPointer};

/// One update in a commit batch. `value: None` is a tombstone. The row
/// version is assigned at commit time; the timestamp is the caller's.
#[derive(Clone, Debug)]
pub struct WalUpdate {
    pub prefix: Option<Vec<u8>>,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
}

/// What a commit did: the txId the surviving rows were logged under, or -1
/// when every row lost to something already stored.
#[derive(Clone, Copy, Debug)]
pub struct RowsChanged {
    pub tx_id: i64,
    pub applied: usize,
}

pub const NO_TX_ID: i64 = -1;

/// Storage for one partition version: an in-memory delta over the stripe's
/// shared delta WAL, backed by a compacted ordered index. Reads resolve
/// delta first, then the compacted tier; the delta always holds the newer
/// row for any key it has.
pub struct PartitionStore {
    versioned_name: VersionedPartitionName,
    properties: ArcSwap<PartitionProperties>,
    wal: Arc<DeltaWal>,
    delta: PartitionDelta,
    index: Arc<dyn WalIndex>,
    order_ids: Arc<OrderIdProvider>,
    highest_tx_id: AtomicI64,
    compaction: Mutex<()>,
}

impl PartitionStore {
    /// Opens the store and rebuilds the delta index by replaying this
    /// partition's rows from the stripe WAL, applying only rows newer than
    /// what the compacted index already holds.
    pub async fn open(
        versioned_name: VersionedPartitionName,
        properties: PartitionProperties,
        wal: Arc<DeltaWal>,
        index: Arc<dyn WalIndex>,
        order_ids: Arc<OrderIdProvider>,
    ) -> Result<Self> {
        let store = Self {
            versioned_name,
            properties: ArcSwap::from_pointee(properties),
            wal,
            delta: PartitionDelta::new(),
            index,
            order_ids,
            highest_tx_id: AtomicI64::new(NO_TX_ID),
            compaction: Mutex::new(()),
        };

        let mut replay = store.wal.replay(0).await?;
        let mut replayed = 0usize;
        while let Some(entry) = replay.next_entry().await? {
            if entry.partition != store.versioned_name {
                continue;
            }
            let composed = compose(entry.row.prefix.as_deref(), &entry.row.key);
            if store.is_newer(&composed, entry.row.timestamp, entry.row.version)? {
                store.delta.put(
                    composed,
                    WalPointer {
                        fp: entry.fp,
                        timestamp: entry.row.timestamp,
                        tombstone: entry.row.tombstone,
                        version: entry.row.version,
                    },
                );
            }
            store.highest_tx_id.fetch_max(entry.tx_id, AtomicOrdering::SeqCst);
            replayed += 1;
        }
        if replayed > 0 {
            info!(
                "loaded {}: replayed {} rows, {} live in delta",
                store.versioned_name,
                replayed,
                store.delta.len()
            );
        }
        Ok(store)
    }

    pub fn versioned_name(&self) -> &VersionedPartitionName {
        &self.versioned_name
    }

    pub fn properties(&self) -> Arc<PartitionProperties> {
        self.properties.load_full()
    }

    pub fn set_properties(&self, properties: PartitionProperties) {
        self.properties.store(Arc::new(properties));
    }

    pub fn highest_tx_id(&self) -> i64 {
        self.highest_tx_id.load(AtomicOrdering::SeqCst)
    }

    /// Commits locally originated updates: each surviving row gets this
    /// batch's freshly issued version, so concurrent writers with equal
    /// timestamps still resolve to one winner everywhere.
    pub async fn commit(&self, updates: Vec<WalUpdate>) -> Result<RowsChanged> {
        let version = self.order_ids.next_id();
        let rows = updates
            .into_iter()
            .map(|u| Row {
                tombstone: u.value.is_none(),
                prefix: u.prefix,
                key: u.key,
                value: u.value,
                timestamp: u.timestamp,
                version,
            })
            .collect();
        self.commit_rows(rows).await
    }

    /// Applies rows taken from another member, preserving their original
    /// (timestamp, version) so every replica converges on the same winners.
    pub async fn apply_taken(&self, rows: Vec<Row>) -> Result<RowsChanged> {
        self.commit_rows(rows).await
    }

    async fn commit_rows(&self, rows: Vec<Row>) -> Result<RowsChanged> {
        let fsync = matches!(self.properties.load().durability, Durability::FsyncAlways);

        let mut surviving = Vec::with_capacity(rows.len());
        let mut composed_keys = Vec::with_capacity(rows.len());
        for row in rows {
            let composed = compose(row.prefix.as_deref(), &row.key);
            if self.is_newer(&composed, row.timestamp, row.version)? {
                surviving.push(row);
                composed_keys.push(composed);
            }
        }
        if surviving.is_empty() {
            return Ok(RowsChanged {
                tx_id: NO_TX_ID,
                applied: 0,
            });
        }

        let (tx_id, pointers) = self.wal.append(&self.versioned_name, &surviving, fsync).await?;
        for (composed, pointer) in composed_keys.into_iter().zip(pointers) {
            self.delta.put(composed, pointer);
        }
        self.highest_tx_id.fetch_max(tx_id, AtomicOrdering::SeqCst);

        Ok(RowsChanged {
            tx_id,
            applied: surviving.len(),
        })
    }

    fn is_newer(&self, composed: &[u8], timestamp: i64, version: i64) -> Result<bool> {
        let current = match self.delta.get(composed) {
            Some(pointer) => Some((pointer.timestamp, pointer.version)),
            None => self
                .index
                .get(composed)?
                .map(|row| (row.timestamp, row.version)),
        };
        Ok(match current {
            None => true,
            Some((ts, ver)) => compare_timestamp_version(timestamp, version, ts, ver).is_gt(),
        })
    }

    /// Point read; tombstones read as absent.
    pub async fn get(&self, prefix: Option<&[u8]>, key: &[u8]) -> Result<Option<Row>> {
        Ok(self.get_raw(prefix, key).await?.filter(|row| !row.tombstone))
    }

    /// Point read that surfaces tombstones, for replica merge reads.
    pub async fn get_raw(&self, prefix: Option<&[u8]>, key: &[u8]) -> Result<Option<Row>> {
        let composed = compose(prefix, key);
        if let Some(pointer) = self.delta.get(&composed) {
            let entry = self.wal.hydrate(pointer.fp).await?;
            return Ok(Some(entry.row));
        }
        self.index.get(&composed)
    }

    pub async fn contains_key(&self, prefix: Option<&[u8]>, key: &[u8]) -> Result<bool> {
        Ok(self.get(prefix, key).await?.is_some())
    }

    /// Live row count: the compacted tier plus delta keys it has not seen.
    pub fn count(&self) -> Result<u64> {
        let mut count = self.index.count()?;
        for (key, _) in self.delta.range_scan(None, None) {
            if !self.index.contains_key(&key)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Ordered scan merging the delta and compacted tiers. A `to_prefix`
    /// with no `to_key` scans through the end of that prefix. Tombstones
    /// are not streamed.
    pub async fn range_scan(
        &self,
        from_prefix: Option<&[u8]>,
        from_key: Option<&[u8]>,
        to_prefix: Option<&[u8]>,
        to_key: Option<&[u8]>,
    ) -> Result<RowCursor> {
        let from = if from_prefix.is_none() && from_key.is_none() {
            None
        } else {
            Some(compose(from_prefix, from_key.unwrap_or(&[])))
        };
        let to = match (to_prefix, to_key) {
            (None, None) => None,
            (prefix, Some(key)) => Some(compose(prefix, key)),
            (Some(prefix), None) => Some(prefix_upper_exclusive(&compose(Some(prefix), &[]))),
        };
        // an empty upper bound means "no finite bound", not "before everything"
        let to = to.filter(|t| !t.is_empty());
        self.cursor(from.as_deref(), to.as_deref(), false).await
    }

    /// Full ordered scan, tombstones included. Feeds compare/repair flows
    /// that need to see deletes.
    pub async fn row_scan(&self) -> Result<RowCursor> {
        self.cursor(None, None, true).await
    }

    async fn cursor(
        &self,
        from: Option<&[u8]>,
        to: Option<&[u8]>,
        include_tombstones: bool,
    ) -> Result<RowCursor> {
        let delta_entries = self.delta.range_scan(from, to).into_iter();
        let index_entries = self.index.range_scan(from, to)?;
        Ok(RowCursor {
            wal: self.wal.clone(),
            delta_entries,
            delta_peek: None,
            index_entries,
            index_peek: None,
            include_tombstones,
        })
    }

    /// Streams every row this partition logged after `tx_id`, in txId order,
    /// straight from the stripe WAL. Compaction never unlinks the WAL, so a
    /// lagging taker can always catch up from here.
    pub async fn take_from_tx_id(&self, tx_id: i64) -> Result<TakeCursor> {
        let replay = self.wal.replay(0).await?;
        Ok(TakeCursor {
            replay,
            partition: self.versioned_name.clone(),
            from_tx_id: tx_id,
        })
    }

    /// Merges the current delta into the compacted index. The delta is only
    /// cleared after the merge is flushed; a crash in between replays the
    /// same rows again, which the only-newer merge makes harmless.
    pub async fn compact(&self) -> Result<usize> {
        let _guard = self.compaction.lock().await;
        let snapshot = self.delta.begin_compaction();
        let entries = snapshot.ordered_snapshot();
        if entries.is_empty() {
            self.delta.commit_compaction();
            return Ok(0);
        }

        let mut merged = Vec::with_capacity(entries.len());
        for (key, pointer) in entries {
            let entry = self.wal.hydrate(pointer.fp).await?;
            merged.push((key, entry.row));
        }
        let total = merged.len();
        let applied = self.index.merge(merged)?;
        self.index.flush()?;
        self.delta.commit_compaction();

        debug!(
            "compacted {}: {} rows merged, {} applied",
            self.versioned_name, total, applied
        );
        Ok(applied)
    }

    pub fn delta_len(&self) -> usize {
        self.delta.len()
    }

    pub async fn flush(&self) -> Result<()> {
        self.wal.flush().await?;
        self.index.flush()
    }

    /// Drops the compacted index. The stripe WAL is shared and stays; the
    /// registry forgets this store so the dead rows are never replayed into
    /// a live generation.
    pub fn delete_storage(&self) -> Result<()> {
        self.index.delete()
    }
}

impl fmt::Debug for PartitionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionStore")
            .field("versioned_name", &self.versioned_name)
            .field("highest_tx_id", &self.highest_tx_id())
            .field("delta_len", &self.delta.len())
            .finish_non_exhaustive()
    }
}

/// Pull cursor over the merged delta and compacted tiers, in composed key
/// order. Where both tiers hold a key the greater (timestamp, version) wins.
pub struct RowCursor {
    wal: Arc<DeltaWal>,
    delta_entries: std::vec::IntoIter<(Vec<u8>, WalPointer)>,
    delta_peek: Option<(Vec<u8>, WalPointer)>,
    index_entries: KeyedRowIter,
    index_peek: Option<(Vec<u8>, Row)>,
    include_tombstones: bool,
}

impl RowCursor {
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if self.delta_peek.is_none() {
                self.delta_peek = self.delta_entries.next();
            }
            if self.index_peek.is_none() {
                self.index_peek = match self.index_entries.next() {
                    Some(entry) => Some(entry?),
                    None => None,
                };
            }

            let row = match (&self.delta_peek, &self.index_peek) {
                (None, None) => return Ok(None),
                (Some(_), None) => self.take_delta().await?,
                (None, Some(_)) => self.take_index(),
                (Some((delta_key, pointer)), Some((index_key, indexed))) => {
                    match delta_key.cmp(index_key) {
                        std::cmp::Ordering::Less => self.take_delta().await?,
                        std::cmp::Ordering::Greater => self.take_index(),
                        std::cmp::Ordering::Equal => {
                            let delta_wins = compare_timestamp_version(
                                pointer.timestamp,
                                pointer.version,
                                indexed.timestamp,
                                indexed.version,
                            )
                            .is_ge();
                            if delta_wins {
                                self.index_peek = None;
                                self.take_delta().await?
                            } else {
                                self.delta_peek = None;
                                self.take_index()
                            }
                        }
                    }
                }
            };

            if row.tombstone && !self.include_tombstones {
                continue;
            }
            return Ok(Some(row));
        }
    }

    async fn take_delta(&mut self) -> Result<Row> {
        let (_, pointer) = self.delta_peek.take().unwrap();
        let entry = self.wal.hydrate(pointer.fp).await?;
        Ok(entry.row)
    }

    fn take_index(&mut self) -> Row {
        let (_, row) = self.index_peek.take().unwrap();
        row
    }
}

/// Pull cursor over one partition's WAL records newer than a txId. Records
/// for other partitions sharing the stripe are skipped.
pub struct TakeCursor {
    replay: WalReplay,
    partition: VersionedPartitionName,
    from_tx_id: i64,
}

impl TakeCursor {
    pub async fn next_entry(&mut self) -> Result<Option<WalReplayEntry>> {
        while let Some(entry) = self.replay.next_entry().await? {
            if entry.partition == self.partition && entry.tx_id > self.from_tx_id {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{Consistency, PartitionName};
    use crate::store::index::{MemoryWalIndexProvider, WalIndexProvider};

    fn vpn(name: &[u8]) -> VersionedPartitionName {
        VersionedPartitionName::new(PartitionName::new(b"test-ring", name), 1)
    }

    fn props() -> PartitionProperties {
        PartitionProperties {
            durability: Durability::FsyncNever,
            consistency: Consistency::None,
            replicated: true,
            take_from_factor: 1,
        }
    }

    fn update(key: &[u8], value: Option<&[u8]>, timestamp: i64) -> WalUpdate {
        WalUpdate {
            prefix: None,
            key: key.to_vec(),
            value: value.map(|v| v.to_vec()),
            timestamp,
        }
    }

    async fn open_wal(dir: &std::path::Path, order_ids: Arc<OrderIdProvider>) -> Arc<DeltaWal> {
        Arc::new(DeltaWal::open(dir, 0, order_ids).await.unwrap())
    }

    async fn open_store(
        wal: Arc<DeltaWal>,
        provider: &MemoryWalIndexProvider,
        order_ids: Arc<OrderIdProvider>,
        name: &[u8],
    ) -> PartitionStore {
        let index = provider.open_index(&vpn(name)).unwrap();
        PartitionStore::open(vpn(name), props(), wal, index, order_ids)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_get_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        let changed = store
            .commit(vec![update(b"k1", Some(b"v1"), 10)])
            .await
            .unwrap();
        assert_eq!(changed.applied, 1);
        assert!(changed.tx_id > NO_TX_ID);

        let row = store.get(None, b"k1").await.unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some(&b"v1"[..]));

        store.commit(vec![update(b"k1", None, 20)]).await.unwrap();
        assert!(store.get(None, b"k1").await.unwrap().is_none());
        // raw reads still see the tombstone
        let raw = store.get_raw(None, b"k1").await.unwrap().unwrap();
        assert!(raw.tombstone);
        assert_eq!(raw.timestamp, 20);
    }

    #[tokio::test]
    async fn test_stale_write_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        store.commit(vec![update(b"k1", Some(b"new"), 10)]).await.unwrap();
        let changed = store
            .commit(vec![update(b"k1", Some(b"old"), 5)])
            .await
            .unwrap();
        assert_eq!(changed.applied, 0);
        assert_eq!(changed.tx_id, NO_TX_ID);

        let row = store.get(None, b"k1").await.unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some(&b"new"[..]));
    }

    #[tokio::test]
    async fn test_later_version_breaks_timestamp_tie() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        store.commit(vec![update(b"k1", Some(b"a"), 10)]).await.unwrap();
        // same timestamp; the later commit's freshly minted version wins
        let changed = store
            .commit(vec![update(b"k1", Some(b"b"), 10)])
            .await
            .unwrap();
        assert_eq!(changed.applied, 1);
        let row = store.get(None, b"k1").await.unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some(&b"b"[..]));
    }

    #[tokio::test]
    async fn test_apply_taken_preserves_timestamp_version() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        let taken = Row {
            prefix: None,
            key: b"k1".to_vec(),
            value: Some(b"remote".to_vec()),
            timestamp: 10,
            tombstone: false,
            version: 7,
        };
        store.apply_taken(vec![taken.clone()]).await.unwrap();
        let row = store.get(None, b"k1").await.unwrap().unwrap();
        assert_eq!(row.version, 7);
        assert_eq!(row.timestamp, 10);

        // the same row taken again is a no-op
        let changed = store.apply_taken(vec![taken]).await.unwrap();
        assert_eq!(changed.applied, 0);
    }

    #[tokio::test]
    async fn test_compaction_preserves_reads() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        store
            .commit(vec![
                update(b"k1", Some(b"v1"), 10),
                update(b"k2", Some(b"v2"), 10),
            ])
            .await
            .unwrap();
        assert_eq!(store.compact().await.unwrap(), 2);
        assert_eq!(store.delta_len(), 0);

        // reads now come from the compacted tier
        let row = store.get(None, b"k2").await.unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some(&b"v2"[..]));
        assert_eq!(store.count().unwrap(), 2);

        // a newer write after compaction shadows the compacted row
        store.commit(vec![update(b"k1", Some(b"v9"), 20)]).await.unwrap();
        let row = store.get(None, b"k1").await.unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some(&b"v9"[..]));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reopen_replays_delta() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());

        let highest;
        {
            let wal = open_wal(dir.path(), order_ids.clone()).await;
            let store = open_store(wal, &provider, order_ids.clone(), b"p1").await;
            store.commit(vec![update(b"k1", Some(b"v1"), 10)]).await.unwrap();
            store.commit(vec![update(b"k2", Some(b"v2"), 11)]).await.unwrap();
            highest = store.highest_tx_id();
        }

        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;
        assert_eq!(store.highest_tx_id(), highest);
        let row = store.get(None, b"k2").await.unwrap().unwrap();
        assert_eq!(row.value.as_deref(), Some(&b"v2"[..]));
    }

    #[tokio::test]
    async fn test_take_filters_partition_and_tx_id() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let p1 = open_store(wal.clone(), &provider, order_ids.clone(), b"p1").await;
        let p2 = open_store(wal, &provider, order_ids, b"p2").await;

        let first = p1
            .commit(vec![update(b"k1", Some(b"v1"), 10)])
            .await
            .unwrap();
        // interleave another partition on the same stripe
        p2.commit(vec![update(b"x", Some(b"y"), 10)]).await.unwrap();
        p1.commit(vec![update(b"k2", Some(b"v2"), 11)]).await.unwrap();

        let mut cursor = p1.take_from_tx_id(first.tx_id).await.unwrap();
        let entry = cursor.next_entry().await.unwrap().unwrap();
        assert_eq!(entry.row.key, b"k2");
        assert_eq!(entry.partition, *p1.versioned_name());
        assert!(cursor.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_range_scan_merges_tiers_and_skips_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        store
            .commit(vec![
                update(b"a", Some(b"1"), 10),
                update(b"b", Some(b"2"), 10),
                update(b"c", Some(b"3"), 10),
            ])
            .await
            .unwrap();
        store.compact().await.unwrap();
        // delta now shadows one compacted key and deletes another
        store
            .commit(vec![update(b"b", Some(b"2x"), 20), update(b"c", None, 20)])
            .await
            .unwrap();

        let mut cursor = store.range_scan(None, None, None, None).await.unwrap();
        let mut seen = vec![];
        while let Some(row) = cursor.next_row().await.unwrap() {
            seen.push((row.key.clone(), row.value.clone().unwrap()));
        }
        assert_eq!(
            seen,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2x".to_vec()),
            ]
        );

        // tombstones surface in a row scan
        let mut cursor = store.row_scan().await.unwrap();
        let mut keys = vec![];
        while let Some(row) = cursor.next_row().await.unwrap() {
            keys.push(row.key.clone());
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_prefixed_range_scan() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MemoryWalIndexProvider::new();
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal = open_wal(dir.path(), order_ids.clone()).await;
        let store = open_store(wal, &provider, order_ids, b"p1").await;

        let mut updates = vec![];
        for (prefix, key) in [(b"u1", b"a"), (b"u1", b"b"), (b"u2", b"a")] {
            updates.push(WalUpdate {
                prefix: Some(prefix.to_vec()),
                key: key.to_vec(),
                value: Some(b"v".to_vec()),
                timestamp: 10,
            });
        }
        store.commit(updates).await.unwrap();

        let mut cursor = store
            .range_scan(Some(b"u1"), None, Some(b"u1"), None)
            .await
            .unwrap();
        let mut seen = vec![];
        while let Some(row) = cursor.next_row().await.unwrap() {
            seen.push((row.prefix.clone().unwrap(), row.key.clone()));
        }
        assert_eq!(
            seen,
            vec![
                (b"u1".to_vec(), b"a".to_vec()),
                (b"u1".to_vec(), b"b".to_vec()),
            ]
        );
    }
}
