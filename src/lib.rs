pub mod clock;
pub mod config;
pub mod engine;
pub mod hours;
pub mod http;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;
