use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use bytes::BufMut;
use parking_lot::RwLock;
use tracing::info;

use crate::orderid::OrderIdProvider;
use crate::partition::{PartitionName, StorageVersion, VersionedPartitionName, STATIC_VERSION};
use crate::ring::RingMember;
use crate::store::partition_index::{PartitionIndex, PARTITION_VERSION_INDEX};
use crate::store::partition_store::WalUpdate;

const VERSION_KEY_LAYOUT: u8 = 0;

/// Hook for membership-level checks layered on top of the persisted version,
/// e.g. a node that knows a partition is mid-rebalance can fail commits to it.
pub trait VersionObserver: Send + Sync {
    fn is_current(&self, partition: &VersionedPartitionName) -> bool;
}

pub struct AlwaysCurrent;

impl VersionObserver for AlwaysCurrent {
    fn is_current(&self, _partition: &VersionedPartitionName) -> bool {
        true
    }
}

/// Assigns and persists the storage generation for each partition on this
/// member. A generation is minted once and sticks until the partition is
/// destroyed; system partitions are pinned to the static generation.
pub struct StorageVersionProvider {
    member: RingMember,
    order_ids: Arc<OrderIdProvider>,
    registry: Arc<PartitionIndex>,
    observer: Arc<dyn VersionObserver>,
    number_of_stripes: usize,
    versions: RwLock<HashMap<PartitionName, StorageVersion>>,
}

fn version_key(member: &RingMember, name: &PartitionName) -> Vec<u8> {
    let member_bytes = member.to_bytes();
    let name_bytes = name.to_bytes();
    let mut key = Vec::with_capacity(1 + 4 + member_bytes.len() + 4 + name_bytes.len());
    key.put_u8(VERSION_KEY_LAYOUT);
    key.put_i32(member_bytes.len() as i32);
    key.put_slice(&member_bytes);
    key.put_i32(name_bytes.len() as i32);
    key.put_slice(&name_bytes);
    key
}

impl StorageVersionProvider {
    pub fn new(
        member: RingMember,
        order_ids: Arc<OrderIdProvider>,
        registry: Arc<PartitionIndex>,
        observer: Arc<dyn VersionObserver>,
        number_of_stripes: usize,
    ) -> Self {
        Self {
            member,
            order_ids,
            registry,
            observer,
            number_of_stripes,
            versions: RwLock::new(HashMap::new()),
        }
    }

    /// The storage generation for this partition on this member, minting and
    /// persisting one if the partition has never been opened here.
    pub async fn lookup(&self, name: &PartitionName) -> Result<StorageVersion> {
        if name.is_system_partition() {
            return Ok(StorageVersion {
                partition_version: STATIC_VERSION,
                stripe_version: name.stripe(self.number_of_stripes) as i64,
            });
        }
        if let Some(version) = self.versions.read().get(name) {
            return Ok(*version);
        }

        let store = self.registry.system_store(&PARTITION_VERSION_INDEX)?;
        let key = version_key(&self.member, name);
        if let Some(row) = store.get(None, &key).await? {
            let version = StorageVersion::from_bytes(&row.value.unwrap_or_default())?;
            self.versions.write().insert(name.clone(), version);
            return Ok(version);
        }

        let version = StorageVersion {
            partition_version: self.order_ids.next_id(),
            stripe_version: name.stripe(self.number_of_stripes) as i64,
        };
        store
            .commit(vec![WalUpdate {
                prefix: None,
                key,
                value: Some(version.to_bytes()),
                timestamp: self.order_ids.next_id(),
            }])
            .await?;
        self.versions.write().insert(name.clone(), version);
        info!(
            "minted storage version {} for {}",
            version.partition_version, name
        );
        Ok(version)
    }

    pub async fn versioned_name(&self, name: &PartitionName) -> Result<VersionedPartitionName> {
        let version = self.lookup(name).await?;
        Ok(VersionedPartitionName::new(
            name.clone(),
            version.partition_version,
        ))
    }

    /// Whether commits and takes against this generation are still valid.
    pub async fn is_current(&self, partition: &VersionedPartitionName) -> Result<bool> {
        let version = self.lookup(&partition.partition_name).await?;
        Ok(version.partition_version == partition.partition_version
            && self.observer.is_current(partition))
    }

    /// Forgets the generation, tombstoning the persisted row. The next
    /// lookup mints a fresh generation; the old one can never come back.
    pub async fn remove(&self, name: &PartitionName) -> Result<()> {
        let store = self.registry.system_store(&PARTITION_VERSION_INDEX)?;
        store
            .commit(vec![WalUpdate {
                prefix: None,
                key: version_key(&self.member, name),
                value: None,
                timestamp: self.order_ids.next_id(),
            }])
            .await?;
        self.versions.write().remove(name);
        Ok(())
    }
}
