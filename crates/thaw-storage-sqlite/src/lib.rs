mod storage;

pub use storage::SqliteStorage;
