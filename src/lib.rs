pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod protocol;
pub mod sweeper;
pub mod tenant;
pub mod wal;
pub mod wire;
