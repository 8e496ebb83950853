use std::fmt;

use anyhow::{bail, Result};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

const PARTITION_NAME_LAYOUT_VERSION: u8 = 0;

/// Identifies a logical partition. Stable; hashed to pick a storage stripe.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PartitionName {
    ring_name: Vec<u8>,
    name: Vec<u8>,
    system: bool,
}

impl PartitionName {
    pub fn new(ring_name: &[u8], name: &[u8]) -> Self {
        Self {
            ring_name: ring_name.to_vec(),
            name: name.to_vec(),
            system: false,
        }
    }

    pub fn new_system(ring_name: Vec<u8>, name: Vec<u8>) -> Self {
        Self {
            ring_name,
            name,
            system: true,
        }
    }

    pub fn ring_name(&self) -> &[u8] {
        &self.ring_name
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn is_system_partition(&self) -> bool {
        self.system
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2 + 4 + self.ring_name.len() + 4 + self.name.len());
        buf.put_u8(PARTITION_NAME_LAYOUT_VERSION);
        buf.put_u8(if self.system { 1 } else { 0 });
        buf.put_i32(self.ring_name.len() as i32);
        buf.put_slice(&self.ring_name);
        buf.put_i32(self.name.len() as i32);
        buf.put_slice(&self.name);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buf = bytes;
        if buf.remaining() < 2 {
            bail!("truncated partition name");
        }
        let layout = buf.get_u8();
        if layout != PARTITION_NAME_LAYOUT_VERSION {
            bail!("unknown partition name layout version: {}", layout);
        }
        let system = buf.get_u8() == 1;
        let ring_name = take_framed(&mut buf)?;
        let name = take_framed(&mut buf)?;
        Ok(Self {
            ring_name,
            name,
            system,
        })
    }

    /// Deterministic stripe assignment. Computed over a stable hash and an
    /// unsigned modulo so the result is always in range regardless of sign.
    pub fn stripe(&self, number_of_stripes: usize) -> usize {
        (self.stable_hash() % number_of_stripes as u64) as usize
    }

    fn stable_hash(&self) -> u64 {
        // FNV-1a; must be identical on every node, so no std RandomState.
        let mut hash: u64 = 0xcbf29ce484222325;
        for chunk in [&self.ring_name[..], &self.name[..]] {
            for b in chunk {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
        }
        hash
    }
}

fn take_framed(buf: &mut &[u8]) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        bail!("truncated partition name");
    }
    let len = buf.get_i32();
    if len < 0 || buf.remaining() < len as usize {
        bail!("bad partition name field length: {}", len);
    }
    Ok(buf.copy_to_bytes(len as usize).to_vec())
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}",
            String::from_utf8_lossy(&self.ring_name),
            String::from_utf8_lossy(&self.name),
            if self.system { " (system)" } else { "" }
        )
    }
}

/// A partition may be recreated; the partition version disambiguates storage
/// generations. System partitions are pinned to [`STATIC_VERSION`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct VersionedPartitionName {
    pub partition_name: PartitionName,
    pub partition_version: i64,
}

pub const STATIC_VERSION: i64 = 0;

impl VersionedPartitionName {
    pub fn new(partition_name: PartitionName, partition_version: i64) -> Self {
        Self {
            partition_name,
            partition_version,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.partition_name.to_bytes();
        buf.put_i64(self.partition_version);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            bail!("truncated versioned partition name");
        }
        let (name_bytes, version_bytes) = bytes.split_at(bytes.len() - 8);
        let partition_name = PartitionName::from_bytes(name_bytes)?;
        let partition_version = i64::from_be_bytes(version_bytes.try_into().unwrap());
        Ok(Self {
            partition_name,
            partition_version,
        })
    }
}

impl fmt::Display for VersionedPartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition_name, self.partition_version)
    }
}

/// The current storage generation for a (partition, stripe) pair. Only the
/// current version accepts new commits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StorageVersion {
    pub partition_version: i64,
    pub stripe_version: i64,
}

impl StorageVersion {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        buf.put_i64(self.partition_version);
        buf.put_i64(self.stripe_version);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            bail!("truncated storage version");
        }
        let mut buf = bytes;
        Ok(Self {
            partition_version: buf.get_i64(),
            stripe_version: buf.get_i64(),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    FsyncAlways,
    FsyncAsync,
    FsyncNever,
    /// Never persisted; highwaters for ephemeral partitions are not stored.
    Ephemeral,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    None,
    Leader,
    LeaderPlusOne,
    LeaderQuorum,
    Quorum,
    WriteAllReadOne,
    WriteOneReadAll,
}

impl Consistency {
    pub fn requires_leader(&self) -> bool {
        matches!(
            self,
            Consistency::Leader | Consistency::LeaderPlusOne | Consistency::LeaderQuorum
        )
    }

    /// Whether a read at this consistency must merge multiple replica streams.
    pub fn requires_merge(&self) -> bool {
        matches!(
            self,
            Consistency::LeaderPlusOne
                | Consistency::LeaderQuorum
                | Consistency::Quorum
                | Consistency::WriteOneReadAll
        )
    }

    /// How many neighbor acks a write needs before it is considered durable,
    /// given the number of neighbors (ring size minus the local member).
    pub fn required_quorum(&self, neighbor_count: usize) -> usize {
        match self {
            Consistency::None | Consistency::Leader | Consistency::WriteOneReadAll => 0,
            Consistency::LeaderPlusOne => 1.min(neighbor_count),
            Consistency::LeaderQuorum | Consistency::Quorum => (neighbor_count + 1) / 2,
            Consistency::WriteAllReadOne => neighbor_count,
        }
    }
}

/// Per-partition behavior: durability class, default consistency, whether the
/// partition replicates at all, and how many neighbors to take from.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PartitionProperties {
    pub durability: Durability,
    pub consistency: Consistency,
    pub replicated: bool,
    pub take_from_factor: u32,
}

impl PartitionProperties {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
