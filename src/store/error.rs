use thiserror::Error;

use crate::partition::{PartitionName, VersionedPartitionName};

#[derive(Error, Debug)]
pub enum PartitionError {
    #[error("no properties for partition {0}")]
    PropertiesNotPresent(PartitionName),

    #[error("partition does not exist: {0}")]
    NoSuchPartition(PartitionName),

    #[error("not a member of the ring for partition {0}")]
    NotARingMember(PartitionName),

    #[error("stale storage generation: {0}")]
    NotCurrentVersion(VersionedPartitionName),

    #[error("system partition cannot be changed this way: {0}")]
    SystemPartition(PartitionName),

    #[error("not the leader for partition {0}")]
    NotTheLeader(PartitionName),

    #[error("failed to open index backend")]
    FailedToOpenIndex,
}
