//! SQLite implementations of storage interfaces.

mod record_store;

pub use record_store::SqliteRecordStore;
