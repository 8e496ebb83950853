//! The node-level facade: owns the stripes, the registry, highwaters and ack
//! waters, routes commits and reads, and serves/consumes take streams. One
//! `AmzaService` per process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::merge::{
    write_get_entry, write_get_eos, write_scan_entry, write_scan_eos, GetEntry, ScanEntry,
};
use crate::config::Configuration;
use crate::orderid::OrderIdProvider;
use crate::partition::{PartitionName, PartitionProperties, VersionedPartitionName};
use crate::replication::ack_waters::{AckWaters, NO_LEADERSHIP_TOKEN};
use crate::replication::error::QuorumError;
use crate::replication::highwater::HighwaterStorage;
use crate::replication::take::{
    consume_take_stream, stream_rows_since, TakeAvailability, TakeStreamResult,
};
use crate::ring::{RingMember, RingReader};
use crate::store::error::PartitionError;
use crate::store::index::{SledWalIndexProvider, WalIndexProvider};
use crate::store::partition_index::PartitionIndex;
use crate::store::partition_store::{PartitionStore, RowCursor, RowsChanged, WalUpdate, NO_TX_ID};
use crate::store::storage_version::{AlwaysCurrent, StorageVersionProvider};
use crate::wal::delta_wal::DeltaWal;

pub struct AmzaService {
    member: RingMember,
    ring: Arc<dyn RingReader>,
    config: Configuration,
    order_ids: Arc<OrderIdProvider>,
    registry: Arc<PartitionIndex>,
    versions: Arc<StorageVersionProvider>,
    highwaters: Arc<HighwaterStorage>,
    ack_waters: Arc<AckWaters>,
    availability: Arc<TakeAvailability>,
    maintenance_stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl AmzaService {
    pub async fn open(
        config: Configuration,
        member: RingMember,
        ring: Arc<dyn RingReader>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let provider = Arc::new(SledWalIndexProvider::open(config.working_directory())?);
        Self::open_with_provider(config, member, ring, provider).await
    }

    pub async fn open_with_provider(
        config: Configuration,
        member: RingMember,
        ring: Arc<dyn RingReader>,
        index_provider: Arc<dyn WalIndexProvider>,
    ) -> Result<Arc<Self>> {
        let order_ids = Arc::new(OrderIdProvider::new());
        let wal_dir = config.working_directory().join("wal");
        let mut stripes = Vec::with_capacity(config.number_of_stripes());
        for stripe in 0..config.number_of_stripes() {
            stripes.push(Arc::new(
                DeltaWal::open(&wal_dir, stripe, order_ids.clone()).await?,
            ));
        }

        let registry =
            PartitionIndex::open(stripes, index_provider, order_ids.clone()).await?;
        let versions = Arc::new(StorageVersionProvider::new(
            member.clone(),
            order_ids.clone(),
            registry.clone(),
            Arc::new(AlwaysCurrent),
            config.number_of_stripes(),
        ));
        let highwaters = Arc::new(HighwaterStorage::new(
            member.clone(),
            registry.clone(),
            order_ids.clone(),
            config.flush_highwaters_after_n_updates(),
        ));

        info!("amza service open as {}", member);
        Ok(Arc::new(Self {
            member,
            ring,
            config,
            order_ids,
            registry,
            versions,
            highwaters,
            ack_waters: Arc::new(AckWaters::new()),
            availability: Arc::new(TakeAvailability::new()),
            maintenance_stop: Mutex::new(None),
        }))
    }

    pub fn member(&self) -> &RingMember {
        &self.member
    }

    pub fn ack_waters(&self) -> &AckWaters {
        &self.ack_waters
    }

    pub fn highwaters(&self) -> &HighwaterStorage {
        &self.highwaters
    }

    pub fn availability(&self) -> &TakeAvailability {
        &self.availability
    }

    fn check_membership(&self, name: &PartitionName) -> Result<()> {
        if !self.ring.is_member(name.ring_name(), &self.member) {
            bail!(PartitionError::NotARingMember(name.clone()));
        }
        Ok(())
    }

    async fn current_store(
        &self,
        name: &PartitionName,
    ) -> Result<(VersionedPartitionName, Arc<PartitionStore>)> {
        let versioned = self.versions.versioned_name(name).await?;
        if !self.versions.is_current(&versioned).await? {
            bail!(PartitionError::NotCurrentVersion(versioned));
        }
        let store = self.registry.get(&versioned).await?;
        Ok((versioned, store))
    }

    pub async fn create_partition(
        &self,
        name: &PartitionName,
        properties: PartitionProperties,
    ) -> Result<()> {
        self.check_membership(name)?;
        self.registry.set_properties(name, properties).await
    }

    pub async fn destroy_partition(&self, name: &PartitionName) -> Result<()> {
        let versioned = self.versions.versioned_name(name).await?;
        self.registry.delete_partition(&versioned).await?;
        self.highwaters.delete_partition(&versioned).await?;
        self.ack_waters.expunge(&versioned);
        self.versions.remove(name).await?;
        Ok(())
    }

    pub async fn partition_names(&self) -> Result<Vec<PartitionName>> {
        self.registry.partition_names().await
    }

    pub async fn partition_properties(&self, name: &PartitionName) -> Result<PartitionProperties> {
        self.registry.properties(name).await
    }

    /// Commits a batch and, at quorum-class consistency, parks until enough
    /// neighbors have taken past the commit's txId.
    pub async fn commit(
        &self,
        name: &PartitionName,
        updates: Vec<WalUpdate>,
    ) -> Result<RowsChanged> {
        self.commit_with_quorum(name, updates, None).await
    }

    /// Like [`commit`](Self::commit), but with an explicit ack quorum
    /// overriding the partition's consistency-derived one. A quorum the ring
    /// cannot possibly satisfy fails up front instead of timing out.
    pub async fn commit_with_quorum(
        &self,
        name: &PartitionName,
        mut updates: Vec<WalUpdate>,
        desired_quorum: Option<usize>,
    ) -> Result<RowsChanged> {
        self.check_membership(name)?;
        // a negative timestamp asks for a server-assigned one
        for update in updates.iter_mut() {
            if update.timestamp < 0 {
                update.timestamp = self.order_ids.next_id();
            }
        }
        let (versioned, store) = self.current_store(name).await?;
        let properties = store.properties();

        let leadership_token = if properties.consistency.requires_leader() {
            match self.ring.leader(name) {
                Some((leader, token)) if leader == self.member => token,
                _ => bail!(PartitionError::NotTheLeader(name.clone())),
            }
        } else {
            NO_LEADERSHIP_TOKEN
        };

        let neighbors = self.ring.neighbors(name.ring_name(), &self.member);
        let desired = match desired_quorum {
            Some(desired) => {
                if neighbors.len() < desired {
                    bail!(QuorumError::RingTooSmall {
                        neighbors: neighbors.len(),
                        desired,
                    });
                }
                desired
            }
            None => properties.consistency.required_quorum(neighbors.len()),
        };

        let changed = store.commit(updates).await?;
        if changed.tx_id != NO_TX_ID {
            self.availability.available(&versioned, changed.tx_id);
        }

        if desired > 0 && changed.tx_id != NO_TX_ID {
            self.ack_waters
                .await_quorum(
                    &versioned,
                    changed.tx_id,
                    &neighbors,
                    desired,
                    Duration::from_millis(self.config.default_quorum_timeout_millis()),
                    leadership_token,
                )
                .await?;
        }
        Ok(changed)
    }

    pub async fn get(
        &self,
        name: &PartitionName,
        prefix: Option<&[u8]>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let (_, store) = self.current_store(name).await?;
        Ok(store.get(prefix, key).await?.and_then(|row| row.value))
    }

    pub async fn range_scan(
        &self,
        name: &PartitionName,
        from_prefix: Option<&[u8]>,
        from_key: Option<&[u8]>,
        to_prefix: Option<&[u8]>,
        to_key: Option<&[u8]>,
    ) -> Result<RowCursor> {
        let (_, store) = self.current_store(name).await?;
        store
            .range_scan(from_prefix, from_key, to_prefix, to_key)
            .await
    }

    /// Server side of a merge-class get: one positional answer per key,
    /// tombstones and all, then end-of-stream.
    pub async fn stream_gets<W: AsyncWrite + Unpin>(
        &self,
        name: &PartitionName,
        prefix: Option<&[u8]>,
        keys: &[Vec<u8>],
        writer: &mut W,
    ) -> Result<()> {
        let (_, store) = self.current_store(name).await?;
        for key in keys {
            let entry = match store.get_raw(prefix, key).await? {
                Some(row) => GetEntry {
                    value: row.value,
                    timestamp: row.timestamp,
                    tombstone: row.tombstone,
                    version: row.version,
                },
                None => GetEntry::absent(),
            };
            write_get_entry(writer, &entry).await?;
        }
        write_get_eos(writer).await?;
        Ok(())
    }

    /// Server side of a merge-class scan.
    pub async fn stream_scan<W: AsyncWrite + Unpin>(
        &self,
        name: &PartitionName,
        from_prefix: Option<&[u8]>,
        from_key: Option<&[u8]>,
        to_prefix: Option<&[u8]>,
        to_key: Option<&[u8]>,
        writer: &mut W,
    ) -> Result<usize> {
        let mut cursor = self
            .range_scan(name, from_prefix, from_key, to_prefix, to_key)
            .await?;
        let mut streamed = 0;
        while let Some(row) = cursor.next_row().await? {
            write_scan_entry(
                writer,
                &ScanEntry {
                    prefix: row.prefix,
                    key: row.key,
                    value: row.value,
                    timestamp: row.timestamp,
                    version: row.version,
                },
            )
            .await?;
            streamed += 1;
        }
        write_scan_eos(writer).await?;
        Ok(streamed)
    }

    /// Serves a take: everything after the taker's txId plus this member's
    /// highwater snapshot.
    pub async fn stream_takes<W: AsyncWrite + Unpin>(
        &self,
        name: &PartitionName,
        from_tx_id: i64,
        writer: &mut W,
    ) -> Result<usize> {
        let (versioned, store) = self.current_store(name).await?;
        let marks = self.highwaters.partition_highwaters(&versioned).await?;
        stream_rows_since(&store, from_tx_id, &marks, writer).await
    }

    /// Consumes a take stream from a neighbor, applying the rows and
    /// adopting its highwater snapshot. Wakes local takers if anything
    /// landed.
    pub async fn consume_takes<R: AsyncRead + Unpin>(
        &self,
        name: &PartitionName,
        reader: &mut R,
    ) -> Result<TakeStreamResult> {
        let (versioned, store) = self.current_store(name).await?;

        let mut rows = vec![];
        let result = consume_take_stream(reader, |_, row| {
            rows.push(row);
            true
        })
        .await?;

        if !rows.is_empty() {
            let changed = store.apply_taken(rows).await?;
            if changed.tx_id != NO_TX_ID {
                self.availability.available(&versioned, changed.tx_id);
            }
        }
        if let Some(marks) = &result.highwaters {
            for (member, tx_id) in marks {
                self.highwaters
                    .set_if_larger(member, &versioned, *tx_id)
                    .await?;
            }
        }
        Ok(result)
    }

    /// A taker telling us what it has applied: releases quorum waiters and
    /// advances the taker's highwater mark.
    pub async fn rows_taken(
        &self,
        taker: &RingMember,
        name: &PartitionName,
        tx_id: i64,
        leadership_token: i64,
    ) -> Result<()> {
        let versioned = self.versions.versioned_name(name).await?;
        self.ack_waters
            .set(taker, &versioned, tx_id, leadership_token);
        self.highwaters
            .set_if_larger(taker, &versioned, tx_id)
            .await?;
        Ok(())
    }

    /// Periodic delta compaction and highwater flushing.
    pub fn start_maintenance(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::channel(1);
        *self.maintenance_stop.lock() = Some(tx);

        let service = self.clone();
        let mut ticker = tokio::time::interval(Duration::from_millis(
            service.config.compaction_interval_millis(),
        ));
        let compact_after = service.config.compact_delta_after_n_updates() as usize;

        tokio::spawn(async move {
            loop {
                select! {
                    _ = rx.recv() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        for store in service.registry.open_stores() {
                            if store.delta_len() >= compact_after {
                                if let Err(e) = store.compact().await {
                                    warn!("compaction of {} failed, err: {}", store.versioned_name(), e);
                                }
                            }
                            if let Err(e) = store.flush().await {
                                warn!("flush of {} failed, err: {}", store.versioned_name(), e);
                            }
                        }
                        if let Err(e) = service.highwaters.flush().await {
                            warn!("highwater flush failed, err: {}", e);
                        }
                    }
                }
            }
            info!("maintenance stopped ...");
        });
    }

    pub async fn stop_maintenance(&self) {
        let stop = self.maintenance_stop.lock().take();
        if let Some(stop) = stop {
            let _ = stop.send(()).await;
        }
        // leave nothing dirty behind
        if let Err(e) = self.highwaters.flush().await {
            warn!("final highwater flush failed, err: {}", e);
        }
        for store in self.registry.open_stores() {
            if let Err(e) = store.flush().await {
                warn!("final flush of {} failed, err: {}", store.versioned_name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{Consistency, Durability};
    use crate::ring::StaticRing;
    use crate::store::index::MemoryWalIndexProvider;
    use std::io::Cursor;

    fn config(dir: &std::path::Path) -> Configuration {
        Configuration {
            working_directory: Some(dir.to_string_lossy().into_owned()),
            number_of_stripes: Some(2),
            flush_highwaters_after_n_updates: Some(1_000),
            compact_delta_after_n_updates: Some(10_000),
            compaction_interval_millis: Some(60_000),
            default_quorum_timeout_millis: Some(2_000),
        }
    }

    fn ring(members: &[&str]) -> Arc<StaticRing> {
        let ring = StaticRing::new();
        ring.set_ring(
            b"main",
            members.iter().map(|m| RingMember::new(*m)).collect(),
        );
        Arc::new(ring)
    }

    async fn service(dir: &std::path::Path, member: &str, members: &[&str]) -> Arc<AmzaService> {
        AmzaService::open_with_provider(
            config(dir),
            RingMember::new(member),
            ring(members),
            Arc::new(MemoryWalIndexProvider::new()),
        )
        .await
        .unwrap()
    }

    fn properties(consistency: Consistency) -> PartitionProperties {
        PartitionProperties {
            durability: Durability::FsyncNever,
            consistency,
            replicated: true,
            take_from_factor: 1,
        }
    }

    fn update(key: &[u8], value: &[u8], timestamp: i64) -> WalUpdate {
        WalUpdate {
            prefix: None,
            key: key.to_vec(),
            value: Some(value.to_vec()),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_commit_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-1", &["node-1"]).await;
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::None))
            .await
            .unwrap();

        let changed = service
            .commit(&name, vec![update(b"k1", b"v1", 10)])
            .await
            .unwrap();
        assert_eq!(changed.applied, 1);
        assert_eq!(
            service.get(&name, None, b"k1").await.unwrap(),
            Some(b"v1".to_vec())
        );
        assert_eq!(service.partition_names().await.unwrap(), vec![name]);
    }

    #[tokio::test]
    async fn test_commit_outside_ring_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-9", &["node-1", "node-2"]).await;
        let name = PartitionName::new(b"main", b"things");

        let err = service
            .create_partition(&name, properties(Consistency::None))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::NotARingMember(_))
        ));
    }

    #[tokio::test]
    async fn test_quorum_commit_waits_for_ack() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-1", &["node-1", "node-2", "node-3"]).await;
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::Quorum))
            .await
            .unwrap();

        let committing = service.clone();
        let committed_name = name.clone();
        let handle = tokio::spawn(async move {
            committing
                .commit(&committed_name, vec![update(b"k1", b"v1", 10)])
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        // a neighbor reporting it took everything releases the committer
        let tx_id = service.availability().latest(
            &service.versions.versioned_name(&name).await.unwrap(),
        );
        service
            .rows_taken(&RingMember::new("node-2"), &name, tx_id, NO_LEADERSHIP_TOKEN)
            .await
            .unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(changed.applied, 1);
    }

    #[tokio::test]
    async fn test_quorum_ignores_acks_from_outside_the_ring() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-1", &["node-1", "node-2", "node-3"]).await;
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::Quorum))
            .await
            .unwrap();

        let committing = service.clone();
        let committed_name = name.clone();
        let handle = tokio::spawn(async move {
            committing
                .commit(&committed_name, vec![update(b"k1", b"v1", 10)])
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let tx_id = service.availability().latest(
            &service.versions.versioned_name(&name).await.unwrap(),
        );
        // an ack from a node that is not a ring neighbor must not release it
        service
            .rows_taken(&RingMember::new("node-99"), &name, tx_id, NO_LEADERSHIP_TOKEN)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        service
            .rows_taken(&RingMember::new("node-2"), &name, tx_id, NO_LEADERSHIP_TOKEN)
            .await
            .unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(changed.applied, 1);
    }

    #[tokio::test]
    async fn test_leadership_regression_aborts_leader_commit() {
        let dir = tempfile::tempdir().unwrap();
        let members = ring(&["node-1", "node-2", "node-3"]);
        let service = AmzaService::open_with_provider(
            config(dir.path()),
            RingMember::new("node-1"),
            members.clone(),
            Arc::new(MemoryWalIndexProvider::new()),
        )
        .await
        .unwrap();
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::LeaderQuorum))
            .await
            .unwrap();
        members.set_leader(name.clone(), RingMember::new("node-1"), 3);

        let committing = service.clone();
        let committed_name = name.clone();
        let handle = tokio::spawn(async move {
            committing
                .commit(&committed_name, vec![update(b"k1", b"v1", 10)])
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        // an ack carrying a newer leadership token aborts the wait
        service
            .rows_taken(&RingMember::new("node-2"), &name, 1, 7)
            .await
            .unwrap();
        let err = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QuorumError>(),
            Some(QuorumError::LeadershipChanged {
                expected: 3,
                observed: 7
            })
        ));
    }

    #[tokio::test]
    async fn test_explicit_quorum_too_large_for_ring() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-1", &["node-1", "node-2"]).await;
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::None))
            .await
            .unwrap();

        let err = service
            .commit_with_quorum(&name, vec![update(b"k1", b"v1", 10)], Some(3))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<QuorumError>(),
            Some(QuorumError::RingTooSmall {
                neighbors: 1,
                desired: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_leader_consistency_requires_leadership() {
        let dir = tempfile::tempdir().unwrap();
        let members = ring(&["node-1", "node-2"]);
        let service = AmzaService::open_with_provider(
            config(dir.path()),
            RingMember::new("node-1"),
            members.clone(),
            Arc::new(MemoryWalIndexProvider::new()),
        )
        .await
        .unwrap();
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::Leader))
            .await
            .unwrap();

        let err = service
            .commit(&name, vec![update(b"k1", b"v1", 10)])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::NotTheLeader(_))
        ));

        members.set_leader(name.clone(), RingMember::new("node-1"), 1);
        let changed = service
            .commit(&name, vec![update(b"k1", b"v1", 10)])
            .await
            .unwrap();
        assert_eq!(changed.applied, 1);
    }

    #[tokio::test]
    async fn test_take_replicates_between_members() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        let a = service(dir_a.path(), "node-1", &["node-1", "node-2"]).await;
        let b = service(dir_b.path(), "node-2", &["node-1", "node-2"]).await;
        let name = PartitionName::new(b"main", b"things");
        a.create_partition(&name, properties(Consistency::None))
            .await
            .unwrap();
        b.create_partition(&name, properties(Consistency::None))
            .await
            .unwrap();

        a.commit(&name, vec![update(b"k1", b"v1", 10)]).await.unwrap();
        a.commit(&name, vec![update(b"k2", b"v2", 11)]).await.unwrap();

        // node-2 pulls everything node-1 has
        let mut wire = vec![];
        let streamed = a.stream_takes(&name, NO_TX_ID, &mut wire).await.unwrap();
        assert_eq!(streamed, 2);

        let result = b
            .consume_takes(&name, &mut Cursor::new(wire))
            .await
            .unwrap();
        assert_eq!(result.rows, 2);
        assert!(!result.partial);

        assert_eq!(b.get(&name, None, b"k1").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(b.get(&name, None, b"k2").await.unwrap(), Some(b"v2".to_vec()));

        // node-2 acks; node-1 records the mark
        a.rows_taken(
            &RingMember::new("node-2"),
            &name,
            result.highest_tx_id,
            NO_LEADERSHIP_TOKEN,
        )
        .await
        .unwrap();
        let versioned = a.versions.versioned_name(&name).await.unwrap();
        assert_eq!(
            a.highwaters()
                .get(&RingMember::new("node-2"), &versioned)
                .await
                .unwrap(),
            result.highest_tx_id
        );
    }

    #[tokio::test]
    async fn test_destroy_partition() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-1", &["node-1"]).await;
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::None))
            .await
            .unwrap();
        service
            .commit(&name, vec![update(b"k1", b"v1", 10)])
            .await
            .unwrap();

        service.destroy_partition(&name).await.unwrap();
        let err = service.get(&name, None, b"k1").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PartitionError>(),
            Some(PartitionError::PropertiesNotPresent(_))
        ));
        assert!(service.partition_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_gets_answers_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path(), "node-1", &["node-1"]).await;
        let name = PartitionName::new(b"main", b"things");
        service
            .create_partition(&name, properties(Consistency::None))
            .await
            .unwrap();
        service
            .commit(&name, vec![update(b"k1", b"v1", 10)])
            .await
            .unwrap();

        let mut wire = vec![];
        service
            .stream_gets(&name, None, &[b"k1".to_vec(), b"missing".to_vec()], &mut wire)
            .await
            .unwrap();

        let mut readers = [Cursor::new(wire)];
        let winners = crate::client::merge::merge_get_streams(&mut readers)
            .await
            .unwrap();
        assert_eq!(winners.len(), 2);
        assert_eq!(winners[0].value.as_deref(), Some(&b"v1"[..]));
        assert_eq!(winners[1], GetEntry::absent());
    }
}
