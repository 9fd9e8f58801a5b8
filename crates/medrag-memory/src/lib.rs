pub mod checkpoint;

pub use checkpoint::SqliteCheckpointStore;
