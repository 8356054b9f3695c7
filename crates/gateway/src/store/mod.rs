//! Call record persistence

mod sqlite;

pub use sqlite::SqliteCallStore;
