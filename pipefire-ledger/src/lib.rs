//! The transfer ledger (C2) and encryption ledger (C3): the durable,
//! transactional record that makes "exactly once" an enforceable property
//! rather than a hope. Neither ledger owns a connection pool or opens
//! transactions on its own — every operation takes the caller's
//! `sqlx::Transaction` handle, so a task runner can reserve, act, and
//! finalize as one atomic unit (spec.md §5).

mod encryption;
mod error;
mod pool;
mod transfer;

pub use encryption::{EncryptionLedger, EncryptionRecord, NewEncryption};
pub use error::LedgerError;
pub use pool::connect;
pub use transfer::{NewTransfer, TransferLedger, TransferRecord};

pub use sqlx::{PgPool, Postgres, Transaction};
