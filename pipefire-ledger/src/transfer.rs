use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::LedgerError;

/// A row of the transfer ledger (C2). Identity is the tuple
/// `(local_file_hash, remote_host, correlation_id)` (spec.md §3, I-T2); a
/// row is "successful" once `remote_file_name`, `remote_file_size` and
/// `transferred_file_hash` are all populated (I-T1).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransferRecord {
    pub id: i64,
    pub correlation_id: Uuid,
    pub local_file_hash: String,
    pub local_file_name: String,
    pub local_path: String,
    pub local_file_size: i64,
    pub local_host_id: String,
    pub remote_host: String,
    pub remote_file_name: Option<String>,
    pub remote_path: Option<String>,
    pub remote_file_size: Option<i64>,
    pub transferred_file_hash: Option<String>,
    pub transfer_start: Option<DateTime<Utc>>,
    pub transfer_end: Option<DateTime<Utc>>,
    pub transfer_errors: Option<String>,
}

impl TransferRecord {
    pub fn is_successful(&self) -> bool {
        self.remote_file_name.is_some() && self.remote_file_size.is_some() && self.transferred_file_hash.is_some()
    }
}

/// Fields needed to reserve a transfer before the bytes move.
pub struct NewTransfer {
    pub correlation_id: Uuid,
    pub local_file_hash: String,
    pub local_file_name: String,
    pub local_path: String,
    pub local_file_size: i64,
    pub local_host_id: String,
    pub remote_host: String,
}

/// The transfer ledger never opens or commits a transaction itself; every
/// method here takes the caller's `Transaction` handle so `sftp.put` can
/// reserve, move bytes, and finalize as one atomic unit (spec.md §5). See
/// `pipefire-tasks::sftp_put` for the caller-side protocol.
pub struct TransferLedger;

impl TransferLedger {
    /// Checks whether a *successful* transfer already exists for this
    /// content hash and destination host, under any correlation id (I-T1).
    /// Callers are expected to run this and the subsequent `create` inside
    /// a single Serializable transaction to avoid a race between two
    /// concurrent runs both observing "not yet sent".
    pub async fn already_sent(
        tx: &mut Transaction<'_, Postgres>,
        local_file_hash: &str,
        remote_host: &str,
    ) -> Result<bool, LedgerError> {
        let row: Option<TransferRecord> = sqlx::query_as(
            r#"
            SELECT id, correlation_id, local_file_hash, local_file_name, local_path,
                   local_file_size, local_host_id, remote_host, remote_file_name,
                   remote_path, remote_file_size, transferred_file_hash,
                   transfer_start, transfer_end, transfer_errors
            FROM transfer_record
            WHERE local_file_hash = $1
              AND remote_host = $2
              AND deleted_at IS NULL
              AND remote_file_name IS NOT NULL
              AND remote_file_size IS NOT NULL
              AND transferred_file_hash IS NOT NULL
            "#,
        )
        .bind(local_file_hash)
        .bind(remote_host)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.is_some())
    }

    /// Reserves a transfer: inserts a pending row with `transfer_start` set
    /// and no destination fields yet. Fails with
    /// `LedgerError::DuplicateReservation` if this run already holds a
    /// reservation for the same hash and host (I-T2).
    pub async fn create(tx: &mut Transaction<'_, Postgres>, new: NewTransfer) -> Result<TransferRecord, LedgerError> {
        let row: TransferRecord = sqlx::query_as(
            r#"
            INSERT INTO transfer_record
                (correlation_id, local_file_hash, local_file_name, local_path,
                 local_file_size, local_host_id, remote_host, transfer_start)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING id, correlation_id, local_file_hash, local_file_name, local_path,
                      local_file_size, local_host_id, remote_host, remote_file_name,
                      remote_path, remote_file_size, transferred_file_hash,
                      transfer_start, transfer_end, transfer_errors
            "#,
        )
        .bind(new.correlation_id)
        .bind(&new.local_file_hash)
        .bind(&new.local_file_name)
        .bind(&new.local_path)
        .bind(new.local_file_size)
        .bind(&new.local_host_id)
        .bind(&new.remote_host)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => LedgerError::DuplicateReservation {
                local_file_hash: new.local_file_hash.clone(),
                remote_host: new.remote_host.clone(),
            },
            _ => LedgerError::Database(err),
        })?;

        Ok(row)
    }

    /// Finalizes a reservation as successful, recording the destination
    /// path and the hash recomputed from the bytes that actually landed
    /// remotely (spec.md §4.4's post-transfer integrity check).
    pub async fn update(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        remote_file_name: &str,
        remote_path: &str,
        remote_file_size: i64,
        transferred_file_hash: &str,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_record
            SET remote_file_name = $2,
                remote_path = $3,
                remote_file_size = $4,
                transferred_file_hash = $5,
                transfer_end = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(remote_file_name)
        .bind(remote_path)
        .bind(remote_file_size)
        .bind(transferred_file_hash)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id });
        }
        Ok(())
    }

    /// Records a failure against an open reservation; the row stays
    /// unsuccessful (`is_successful() == false`) so a later run is free to
    /// retry the same hash/host pair.
    pub async fn record_error(tx: &mut Transaction<'_, Postgres>, id: i64, error: &str) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_record
            SET transfer_errors = $2, transfer_end = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_requires_all_three_destination_fields() {
        let mut record = TransferRecord {
            id: 1,
            correlation_id: Uuid::new_v4(),
            local_file_hash: "abc".into(),
            local_file_name: "f.csv".into(),
            local_path: "/in/f.csv".into(),
            local_file_size: 10,
            local_host_id: "host-a".into(),
            remote_host: "sftp.example".into(),
            remote_file_name: None,
            remote_path: None,
            remote_file_size: None,
            transferred_file_hash: None,
            transfer_start: None,
            transfer_end: None,
            transfer_errors: None,
        };
        assert!(!record.is_successful());

        record.remote_file_name = Some("f.csv".into());
        record.remote_file_size = Some(10);
        assert!(!record.is_successful(), "hash still missing");

        record.transferred_file_hash = Some("abc".into());
        assert!(record.is_successful());
    }
}
