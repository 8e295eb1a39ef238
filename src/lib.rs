pub mod engine;
pub mod limits;
pub mod lock;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod wal;
