//! Highwater marks: per (partition, taker member), the highest txId this
//! member knows that taker has applied. Cached and batched in memory, flushed
//! to the highwater system partition after enough updates accumulate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use bytes::{Buf, BufMut};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tracing::debug;

use crate::orderid::OrderIdProvider;
use crate::partition::{Durability, VersionedPartitionName};
use crate::ring::RingMember;
use crate::store::partition_index::{PartitionIndex, HIGHWATER_MARK_INDEX};
use crate::store::partition_store::WalUpdate;
use crate::wal::key::prefix_upper_exclusive;

pub const NO_HIGHWATER: i64 = -1;

const HIGHWATER_KEY_LAYOUT: u8 = 0;

#[derive(Clone, Copy)]
struct CachedMark {
    tx_id: i64,
    dirty: bool,
}

pub struct HighwaterStorage {
    root: RingMember,
    registry: Arc<PartitionIndex>,
    order_ids: Arc<OrderIdProvider>,
    cache: Mutex<HashMap<(VersionedPartitionName, RingMember), CachedMark>>,
    // updaters hold read, a flush holds write to drain every in-flight update
    drain: RwLock<()>,
    flush_after_updates: u64,
    updates_since_flush: AtomicU64,
}

fn highwater_key(
    partition: &VersionedPartitionName,
    root: &RingMember,
    member: Option<&RingMember>,
) -> Vec<u8> {
    let partition_bytes = partition.to_bytes();
    let root_bytes = root.to_bytes();
    let mut key = Vec::with_capacity(1 + 4 + partition_bytes.len() + 4 + root_bytes.len() + 16);
    key.put_u8(HIGHWATER_KEY_LAYOUT);
    key.put_i32(partition_bytes.len() as i32);
    key.put_slice(&partition_bytes);
    key.put_i32(root_bytes.len() as i32);
    key.put_slice(&root_bytes);
    if let Some(member) = member {
        let member_bytes = member.to_bytes();
        key.put_i32(member_bytes.len() as i32);
        key.put_slice(&member_bytes);
    }
    key
}

fn take_frame(buf: &mut &[u8]) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        bail!("truncated highwater key");
    }
    let len = buf.get_i32();
    if len < 0 || buf.remaining() < len as usize {
        bail!("bad frame length in highwater key: {}", len);
    }
    Ok(buf.copy_to_bytes(len as usize).to_vec())
}

fn split_key(key: &[u8]) -> Result<(VersionedPartitionName, RingMember, RingMember)> {
    let mut buf = key;
    if buf.remaining() < 1 {
        bail!("truncated highwater key");
    }
    let layout = buf.get_u8();
    if layout != HIGHWATER_KEY_LAYOUT {
        bail!("unknown highwater key layout: {}", layout);
    }
    let partition = VersionedPartitionName::from_bytes(&take_frame(&mut buf)?)?;
    let root = RingMember::from_bytes(&take_frame(&mut buf)?)?;
    let member = RingMember::from_bytes(&take_frame(&mut buf)?)?;
    Ok((partition, root, member))
}

impl HighwaterStorage {
    pub fn new(
        root: RingMember,
        registry: Arc<PartitionIndex>,
        order_ids: Arc<OrderIdProvider>,
        flush_after_updates: u64,
    ) -> Self {
        Self {
            root,
            registry,
            order_ids,
            cache: Mutex::new(HashMap::new()),
            drain: RwLock::new(()),
            flush_after_updates,
            updates_since_flush: AtomicU64::new(0),
        }
    }

    /// Advances the mark, never regressing it. System partition marks are
    /// not tracked, and ephemeral partitions never persist theirs.
    pub async fn set_if_larger(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
        tx_id: i64,
    ) -> Result<()> {
        if partition.partition_name.is_system_partition() {
            return Ok(());
        }
        let properties = self.registry.properties(&partition.partition_name).await?;
        if properties.durability == Durability::Ephemeral {
            return Ok(());
        }

        {
            let _updating = self.drain.read().await;
            let mut cache = self.cache.lock();
            let mark = cache
                .entry((partition.clone(), member.clone()))
                .or_insert(CachedMark {
                    tx_id: NO_HIGHWATER,
                    dirty: false,
                });
            if tx_id > mark.tx_id {
                mark.tx_id = tx_id;
                mark.dirty = true;
            }
        }

        if self.updates_since_flush.fetch_add(1, Ordering::SeqCst) + 1
            >= self.flush_after_updates
        {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn get(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
    ) -> Result<i64> {
        if let Some(mark) = self
            .cache
            .lock()
            .get(&(partition.clone(), member.clone()))
        {
            return Ok(mark.tx_id);
        }

        let store = self.registry.system_store(&HIGHWATER_MARK_INDEX)?;
        let key = highwater_key(partition, &self.root, Some(member));
        let tx_id = match store.get(None, &key).await? {
            Some(row) => {
                let value = row.value.unwrap_or_default();
                if value.len() < 8 {
                    NO_HIGHWATER
                } else {
                    i64::from_be_bytes(value[..8].try_into().unwrap())
                }
            }
            None => NO_HIGHWATER,
        };
        self.cache.lock().insert(
            (partition.clone(), member.clone()),
            CachedMark {
                tx_id,
                dirty: false,
            },
        );
        Ok(tx_id)
    }

    /// Every persisted mark for the partition as seen from this member, the
    /// trailing snapshot a take stream carries.
    pub async fn partition_highwaters(
        &self,
        partition: &VersionedPartitionName,
    ) -> Result<Vec<(RingMember, i64)>> {
        self.flush_partition(partition).await?;
        let store = self.registry.system_store(&HIGHWATER_MARK_INDEX)?;
        let from = highwater_key(partition, &self.root, None);
        let to = prefix_upper_exclusive(&from);
        let mut cursor = store
            .range_scan(None, Some(&from), None, Some(&to))
            .await?;
        let mut marks = vec![];
        while let Some(row) = cursor.next_row().await? {
            let (_, _, member) = split_key(&row.key)?;
            let value = row.value.unwrap_or_default();
            if value.len() >= 8 {
                marks.push((member, i64::from_be_bytes(value[..8].try_into().unwrap())));
            }
        }
        Ok(marks)
    }

    pub async fn clear(
        &self,
        member: &RingMember,
        partition: &VersionedPartitionName,
    ) -> Result<()> {
        self.cache
            .lock()
            .remove(&(partition.clone(), member.clone()));
        let store = self.registry.system_store(&HIGHWATER_MARK_INDEX)?;
        store
            .commit(vec![WalUpdate {
                prefix: None,
                key: highwater_key(partition, &self.root, Some(member)),
                value: None,
                timestamp: self.order_ids.next_id(),
            }])
            .await?;
        Ok(())
    }

    /// Forgets everything known about a member that left the ring, across
    /// every partition.
    pub async fn clear_member(&self, member: &RingMember) -> Result<()> {
        self.cache.lock().retain(|(_, cached), _| cached != member);
        let store = self.registry.system_store(&HIGHWATER_MARK_INDEX)?;
        let mut cursor = store.range_scan(None, None, None, None).await?;
        let mut updates = vec![];
        while let Some(row) = cursor.next_row().await? {
            let (_, _, marked) = split_key(&row.key)?;
            if marked == *member {
                updates.push(WalUpdate {
                    prefix: None,
                    key: row.key,
                    value: None,
                    timestamp: self.order_ids.next_id(),
                });
            }
        }
        if !updates.is_empty() {
            store.commit(updates).await?;
        }
        Ok(())
    }

    /// Tombstones every mark for a dead partition generation.
    pub async fn delete_partition(&self, partition: &VersionedPartitionName) -> Result<()> {
        self.cache
            .lock()
            .retain(|(cached, _), _| cached != partition);
        let store = self.registry.system_store(&HIGHWATER_MARK_INDEX)?;
        let from = highwater_key(partition, &self.root, None);
        let to = prefix_upper_exclusive(&from);
        let mut cursor = store
            .range_scan(None, Some(&from), None, Some(&to))
            .await?;
        let mut updates = vec![];
        while let Some(row) = cursor.next_row().await? {
            updates.push(WalUpdate {
                prefix: None,
                key: row.key,
                value: None,
                timestamp: self.order_ids.next_id(),
            });
        }
        if !updates.is_empty() {
            store.commit(updates).await?;
        }
        Ok(())
    }

    /// Persists every dirty mark. Takes the drain lock exclusively so no
    /// update can slip between being collected and being marked clean.
    pub async fn flush(&self) -> Result<()> {
        let _draining = self.drain.write().await;
        self.flush_dirty(|_| true).await
    }

    async fn flush_partition(&self, partition: &VersionedPartitionName) -> Result<()> {
        let _draining = self.drain.write().await;
        self.flush_dirty(|cached| cached == partition).await
    }

    async fn flush_dirty(
        &self,
        applies: impl Fn(&VersionedPartitionName) -> bool,
    ) -> Result<()> {
        let mut dirty = vec![];
        {
            let mut cache = self.cache.lock();
            for ((cached, member), mark) in cache.iter_mut() {
                if mark.dirty && applies(cached) {
                    mark.dirty = false;
                    dirty.push((cached.clone(), member.clone(), mark.tx_id));
                }
            }
        }
        if dirty.is_empty() {
            return Ok(());
        }

        let store = self.registry.system_store(&HIGHWATER_MARK_INDEX)?;
        let updates = dirty
            .into_iter()
            .map(|(partition, member, tx_id)| WalUpdate {
                prefix: None,
                key: highwater_key(&partition, &self.root, Some(&member)),
                value: Some(tx_id.to_be_bytes().to_vec()),
                timestamp: self.order_ids.next_id(),
            })
            .collect::<Vec<_>>();
        debug!("flushing {} highwater marks", updates.len());
        store.commit(updates).await?;
        self.updates_since_flush.store(0, Ordering::SeqCst);
        Ok(())
    }
}
