pub mod delta_wal;
pub mod error;
pub mod key;
pub mod row;

pub use delta_wal::{DeltaWal, WalReplay, WalReplayEntry};
pub use error::WalError;
pub use row::{compare_timestamp_version, Row, WalPointer};
