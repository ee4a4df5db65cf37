//! Error types for the persistent coins store.

/// Errors that can occur while operating the coins database.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    /// Bincode serialization/deserialization error.
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    /// A required column family is missing; the database was not opened
    /// through [`CoinsDb::open`](crate::CoinsDb::open).
    #[error("Database not initialized")]
    NotInitialized,

    /// A stored metadata record has the wrong shape.
    #[error("Corrupt metadata record: {0}")]
    CorruptMetadata(&'static str),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for bitcache_coins::Error {
    fn from(err: Error) -> Self {
        bitcache_coins::Error::Backend(err.to_string())
    }
}
