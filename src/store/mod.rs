pub mod error;
pub mod index;
pub mod partition_index;
pub mod partition_store;
pub mod storage_version;

pub use error::PartitionError;
pub use index::{MemoryWalIndexProvider, SledWalIndexProvider, WalIndex, WalIndexProvider};
pub use partition_index::PartitionIndex;
pub use partition_store::{PartitionStore, RowsChanged, WalUpdate};
pub use storage_version::{AlwaysCurrent, StorageVersionProvider, VersionObserver};
