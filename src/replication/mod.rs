pub mod ack_waters;
pub mod await_notify;
pub mod error;
pub mod highwater;
pub mod take;

pub use ack_waters::{AckWaters, NO_LEADERSHIP_TOKEN};
pub use await_notify::AwaitNotify;
pub use error::{QuorumError, TakeError};
pub use highwater::{HighwaterStorage, NO_HIGHWATER};
pub use take::{consume_take_stream, stream_rows_since, TakeAvailability, TakeStreamResult};
