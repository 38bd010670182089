use thiserror::Error;

/// Failures of the durable queue slot. Persistence is best-effort for the
/// in-memory queue, so callers decide whether a storage failure is fatal.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database at {path}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database operation failed")]
    Database(#[from] rusqlite::Error),

    #[error("failed to encode queue entry")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to create data directory {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
