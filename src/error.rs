//! Crate-wide error taxonomy (spec §7).
//!
//! Grounded in the teacher's `service/operation.rs`: a `thiserror`-derived
//! enum with one variant per error kind, `#[from]` conversions for the
//! underlying library errors, and no stringly-typed catch-all.

/// Errors returned by any [`crate::storage::Storage`] operation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A transient failure in the underlying backing store (disk, DB
    /// connection blip, lock contention). The broker may retry or drop
    /// the client frame; the engine itself remains usable.
    #[error("transient storage failure: {0}")]
    Transient(#[source] anyhow::Error),

    /// An invariant was violated (e.g. a write wheel already existed for
    /// an id, or a file referenced by a metadata row was missing).
    /// The offending operation aborts; invariant-6 repair has been
    /// triggered where applicable. The engine remains up.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A fatal, unrecoverable condition: DB connection lost, migration
    /// failed, `data_dir` unreadable at open. The caller should abort
    /// broker startup or shut down; this crate never calls
    /// `std::process::exit` itself.
    #[error("fatal storage error: {0}")]
    Fatal(String),

    /// The engine has accepted `storage_shutdown` and is no longer
    /// accepting new `store` calls (spec §9 Open Question, resolved).
    #[error("storage is shutting down")]
    ShuttingDown,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Transient(err.into())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                StorageError::Fatal(err.to_string())
            }
            _ => StorageError::Transient(err.into()),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StorageError>;
