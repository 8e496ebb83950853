//! Registry of open partition stores. System partitions (ring membership,
//! partition properties, partition versions, highwater marks) are bootstrapped
//! eagerly at startup and pinned to the static storage generation; user
//! partitions open lazily once their properties row exists.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::info;

use crate::orderid::OrderIdProvider;
use crate::partition::{
    Consistency, Durability, PartitionName, PartitionProperties, VersionedPartitionName,
    STATIC_VERSION,
};
use crate::store::error::PartitionError;
use crate::store::index::WalIndexProvider;
use crate::store::partition_store::{PartitionStore, WalUpdate};
use crate::wal::delta_wal::DeltaWal;

const SYSTEM_RING: &[u8] = b"system";
const OPEN_LOCK_STRIPES: usize = 64;

pub static RING_INDEX: Lazy<PartitionName> =
    Lazy::new(|| PartitionName::new_system(SYSTEM_RING.to_vec(), b"ring-index".to_vec()));

pub static PARTITION_PROPERTIES_INDEX: Lazy<PartitionName> = Lazy::new(|| {
    PartitionName::new_system(SYSTEM_RING.to_vec(), b"partition-properties-index".to_vec())
});

pub static PARTITION_VERSION_INDEX: Lazy<PartitionName> = Lazy::new(|| {
    PartitionName::new_system(SYSTEM_RING.to_vec(), b"partition-version-index".to_vec())
});

pub static HIGHWATER_MARK_INDEX: Lazy<PartitionName> = Lazy::new(|| {
    PartitionName::new_system(SYSTEM_RING.to_vec(), b"highwater-mark-index".to_vec())
});

pub static LIVELINESS_INDEX: Lazy<PartitionName> =
    Lazy::new(|| PartitionName::new_system(SYSTEM_RING.to_vec(), b"liveliness-index".to_vec()));

pub fn system_partition_names() -> [&'static PartitionName; 5] {
    [
        &RING_INDEX,
        &PARTITION_PROPERTIES_INDEX,
        &PARTITION_VERSION_INDEX,
        &HIGHWATER_MARK_INDEX,
        &LIVELINESS_INDEX,
    ]
}

/// Fixed built-in properties per system partition. Highwater marks are
/// node-local state and never replicate; liveness heartbeats are worthless
/// after a restart, so they never touch disk at all.
pub fn system_properties(name: &PartitionName) -> PartitionProperties {
    if name == &*HIGHWATER_MARK_INDEX {
        PartitionProperties {
            durability: Durability::FsyncNever,
            consistency: Consistency::None,
            replicated: false,
            take_from_factor: 1,
        }
    } else if name == &*LIVELINESS_INDEX {
        PartitionProperties {
            durability: Durability::Ephemeral,
            consistency: Consistency::None,
            replicated: false,
            take_from_factor: 1,
        }
    } else {
        PartitionProperties {
            durability: Durability::FsyncAsync,
            consistency: Consistency::None,
            replicated: true,
            take_from_factor: 1,
        }
    }
}

pub struct PartitionIndex {
    stripes: Vec<Arc<DeltaWal>>,
    index_provider: Arc<dyn WalIndexProvider>,
    order_ids: Arc<OrderIdProvider>,
    stores: RwLock<HashMap<VersionedPartitionName, Arc<PartitionStore>>>,
    properties_cache: RwLock<HashMap<PartitionName, PartitionProperties>>,
    // striped so concurrent opens of distinct partitions do not serialize
    open_locks: Vec<Mutex<()>>,
}

impl PartitionIndex {
    pub async fn open(
        stripes: Vec<Arc<DeltaWal>>,
        index_provider: Arc<dyn WalIndexProvider>,
        order_ids: Arc<OrderIdProvider>,
    ) -> Result<Arc<Self>> {
        let registry = Arc::new(Self {
            stripes,
            index_provider,
            order_ids,
            stores: RwLock::new(HashMap::new()),
            properties_cache: RwLock::new(HashMap::new()),
            open_locks: (0..OPEN_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        });
        for name in system_partition_names() {
            let versioned = VersionedPartitionName::new(name.clone(), STATIC_VERSION);
            registry.open_store(versioned, system_properties(name)).await?;
        }
        Ok(registry)
    }

    /// Resolves a store, opening it if needed. Fails with
    /// [`PartitionError::PropertiesNotPresent`] when the partition was never
    /// created.
    pub async fn get(&self, versioned: &VersionedPartitionName) -> Result<Arc<PartitionStore>> {
        if let Some(store) = self.stores.read().get(versioned) {
            return Ok(store.clone());
        }
        let properties = self.properties(&versioned.partition_name).await?;
        self.open_store(versioned.clone(), properties).await
    }

    pub fn get_if_present(
        &self,
        versioned: &VersionedPartitionName,
    ) -> Option<Arc<PartitionStore>> {
        self.stores.read().get(versioned).cloned()
    }

    /// Every store currently open, for background compaction and flushing.
    pub fn open_stores(&self) -> Vec<Arc<PartitionStore>> {
        self.stores.read().values().cloned().collect()
    }

    pub fn system_store(&self, name: &PartitionName) -> Result<Arc<PartitionStore>> {
        let versioned = VersionedPartitionName::new(name.clone(), STATIC_VERSION);
        match self.stores.read().get(&versioned) {
            Some(store) => Ok(store.clone()),
            None => bail!(PartitionError::NoSuchPartition(name.clone())),
        }
    }

    async fn open_store(
        &self,
        versioned: VersionedPartitionName,
        properties: PartitionProperties,
    ) -> Result<Arc<PartitionStore>> {
        let lock = &self.open_locks[versioned.partition_name.stripe(OPEN_LOCK_STRIPES)];
        let _guard = lock.lock().await;
        // double-checked: someone may have finished opening while we waited
        if let Some(store) = self.stores.read().get(&versioned) {
            return Ok(store.clone());
        }

        let stripe = versioned.partition_name.stripe(self.stripes.len());
        let wal = self.stripes[stripe].clone();
        let index = self.index_provider.open_index(&versioned)?;
        let store = Arc::new(
            PartitionStore::open(
                versioned.clone(),
                properties,
                wal,
                index,
                self.order_ids.clone(),
            )
            .await?,
        );
        self.stores.write().insert(versioned.clone(), store.clone());
        info!("opened partition {} on stripe {}", versioned, stripe);
        Ok(store)
    }

    pub async fn properties(&self, name: &PartitionName) -> Result<PartitionProperties> {
        if name.is_system_partition() {
            return Ok(system_properties(name));
        }
        if let Some(properties) = self.properties_cache.read().get(name) {
            return Ok(properties.clone());
        }
        let store = self.system_store(&PARTITION_PROPERTIES_INDEX)?;
        match store.get(None, &name.to_bytes()).await? {
            None => bail!(PartitionError::PropertiesNotPresent(name.clone())),
            Some(row) => {
                let properties = PartitionProperties::from_bytes(&row.value.unwrap_or_default())?;
                self.properties_cache
                    .write()
                    .insert(name.clone(), properties.clone());
                Ok(properties)
            }
        }
    }

    /// Creates the partition, or updates its properties if it already
    /// exists. Open stores pick the change up immediately.
    pub async fn set_properties(
        &self,
        name: &PartitionName,
        properties: PartitionProperties,
    ) -> Result<()> {
        if name.is_system_partition() {
            bail!(PartitionError::SystemPartition(name.clone()));
        }
        let store = self.system_store(&PARTITION_PROPERTIES_INDEX)?;
        store
            .commit(vec![WalUpdate {
                prefix: None,
                key: name.to_bytes(),
                value: Some(properties.to_bytes()?),
                timestamp: self.order_ids.next_id(),
            }])
            .await?;
        self.properties_cache
            .write()
            .insert(name.clone(), properties.clone());
        let open: Vec<_> = {
            let stores = self.stores.read();
            stores
                .iter()
                .filter(|(versioned, _)| versioned.partition_name == *name)
                .map(|(_, store)| store.clone())
                .collect()
        };
        for store in open {
            store.set_properties(properties.clone());
        }
        Ok(())
    }

    /// Drops a cached properties entry so the next read goes back to the
    /// properties partition. Called when a replicated properties row lands.
    pub fn invalidate_properties(&self, name: &PartitionName) {
        self.properties_cache.write().remove(name);
    }

    pub async fn partition_names(&self) -> Result<Vec<PartitionName>> {
        let store = self.system_store(&PARTITION_PROPERTIES_INDEX)?;
        let mut cursor = store.range_scan(None, None, None, None).await?;
        let mut names = vec![];
        while let Some(row) = cursor.next_row().await? {
            names.push(PartitionName::from_bytes(&row.key)?);
        }
        Ok(names)
    }

    /// Tombstones the properties row and drops the storage generation. The
    /// stripe WAL keeps its rows; the registry no longer knows the
    /// generation, so they are never replayed into a live store.
    pub async fn delete_partition(&self, versioned: &VersionedPartitionName) -> Result<()> {
        let name = &versioned.partition_name;
        if name.is_system_partition() {
            bail!(PartitionError::SystemPartition(name.clone()));
        }
        let properties_store = self.system_store(&PARTITION_PROPERTIES_INDEX)?;
        properties_store
            .commit(vec![WalUpdate {
                prefix: None,
                key: name.to_bytes(),
                value: None,
                timestamp: self.order_ids.next_id(),
            }])
            .await?;
        self.properties_cache.write().remove(name);

        let removed = self.stores.write().remove(versioned);
        if let Some(store) = removed {
            store.delete_storage()?;
        }
        self.index_provider.delete_index(versioned)?;
        info!("deleted partition {}", versioned);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::index::MemoryWalIndexProvider;

    async fn registry(dir: &std::path::Path) -> Arc<PartitionIndex> {
        let order_ids = Arc::new(OrderIdProvider::new());
        let mut stripes = vec![];
        for stripe in 0..2 {
            stripes.push(Arc::new(
                DeltaWal::open(dir, stripe, order_ids.clone()).await.unwrap(),
            ));
        }
        PartitionIndex::open(
            stripes,
            Arc::new(MemoryWalIndexProvider::new()),
            order_ids,
        )
        .await
        .unwrap()
    }

    fn user_properties() -> PartitionProperties {
        PartitionProperties {
            durability: Durability::FsyncNever,
            consistency: Consistency::Quorum,
            replicated: true,
            take_from_factor: 1,
        }
    }

    #[tokio::test]
    async fn test_system_partitions_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        for name in system_partition_names() {
            let store = registry.system_store(name).unwrap();
            assert_eq!(store.versioned_name().partition_version, STATIC_VERSION);
        }
    }

    #[tokio::test]
    async fn test_system_partitions_have_fixed_properties() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;

        let highwater = registry.properties(&HIGHWATER_MARK_INDEX).await.unwrap();
        assert_eq!(highwater.durability, Durability::FsyncNever);
        assert!(!highwater.replicated);

        let liveliness = registry.properties(&LIVELINESS_INDEX).await.unwrap();
        assert_eq!(liveliness.durability, Durability::Ephemeral);
        assert!(!liveliness.replicated);

        let ring = registry.properties(&RING_INDEX).await.unwrap();
        assert_eq!(ring.durability, Durability::FsyncAsync);
        assert!(ring.replicated);

        // the open stores carry the same built-ins
        let store = registry.system_store(&LIVELINESS_INDEX).unwrap();
        assert_eq!(store.properties().durability, Durability::Ephemeral);
    }

    #[tokio::test]
    async fn test_open_requires_properties() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let name = PartitionName::new(b"ring", b"things");
        let versioned = VersionedPartitionName::new(name.clone(), 7);

        let err = registry.get(&versioned).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::PropertiesNotPresent(_))
        ));

        registry.set_properties(&name, user_properties()).await.unwrap();
        let store = registry.get(&versioned).await.unwrap();
        assert_eq!(store.versioned_name(), &versioned);
        // second get returns the already open store
        let again = registry.get(&versioned).await.unwrap();
        assert!(Arc::ptr_eq(&store, &again));
    }

    #[tokio::test]
    async fn test_set_properties_updates_open_store() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let name = PartitionName::new(b"ring", b"things");
        registry.set_properties(&name, user_properties()).await.unwrap();
        let store = registry
            .get(&VersionedPartitionName::new(name.clone(), 1))
            .await
            .unwrap();

        let mut changed = user_properties();
        changed.consistency = Consistency::LeaderQuorum;
        registry.set_properties(&name, changed.clone()).await.unwrap();

        assert_eq!(store.properties().consistency, Consistency::LeaderQuorum);
        assert_eq!(registry.properties(&name).await.unwrap(), changed);
    }

    #[tokio::test]
    async fn test_partition_names_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let a = PartitionName::new(b"ring", b"a");
        let b = PartitionName::new(b"ring", b"b");
        registry.set_properties(&a, user_properties()).await.unwrap();
        registry.set_properties(&b, user_properties()).await.unwrap();

        let mut names = registry.partition_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec![a.clone(), b.clone()]);

        let versioned = VersionedPartitionName::new(a.clone(), 1);
        registry.get(&versioned).await.unwrap();
        registry.delete_partition(&versioned).await.unwrap();

        assert!(registry.get_if_present(&versioned).is_none());
        let err = registry.get(&versioned).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::PropertiesNotPresent(_))
        ));
        assert_eq!(registry.partition_names().await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_system_partition_cannot_be_reconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry(dir.path()).await;
        let err = registry
            .set_properties(&RING_INDEX, user_properties())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::SystemPartition(_))
        ));
    }
}
