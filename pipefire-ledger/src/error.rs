#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("reservation for {local_file_hash} at {remote_host} already exists")]
    DuplicateReservation {
        local_file_hash: String,
        remote_host: String,
    },
    #[error("{local_file_hash} has already been encrypted")]
    AlreadyEncrypted { local_file_hash: String },
    #[error("no transfer record {id}")]
    NotFound { id: i64 },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// True for the two "someone already did this" cases a task runner is
    /// expected to treat as success-by-idempotence rather than as a
    /// transient failure to retry (spec.md §5, Postgres unique-violation
    /// code `23505`).
    pub fn is_duplicate(&self) -> bool {
        match self {
            LedgerError::DuplicateReservation { .. } | LedgerError::AlreadyEncrypted { .. } => true,
            LedgerError::Database(sqlx::Error::Database(db)) => db.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}
