pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod pricing;
pub mod protocol;
pub mod sequence;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod wal;
