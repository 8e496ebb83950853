pub mod client;
pub mod config;
pub mod delta;
pub mod orderid;
pub mod partition;
pub mod replication;
pub mod ring;
pub mod service;
pub mod store;
pub mod uio;
pub mod wal;

pub use service::AmzaService;
