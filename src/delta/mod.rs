pub mod index;
pub mod partition_delta;

pub use index::DeltaIndex;
pub use partition_delta::PartitionDelta;
