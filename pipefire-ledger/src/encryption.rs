use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::LedgerError;

/// A row of the encryption ledger (C3). A plaintext file, identified by its
/// content hash, is encrypted at most once for the lifetime of the system
/// (I-E1) — unlike the transfer ledger, there is no per-host dimension.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EncryptionRecord {
    pub id: i64,
    pub correlation_id: Uuid,
    pub local_file_hash: String,
    pub local_file_name: String,
    pub local_path: String,
    pub local_file_size: i64,
    pub encrypted_file_hash: Option<String>,
    pub recipient_key_id: Option<String>,
    pub signing_key_id: Option<String>,
    pub encryption_errors: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EncryptionRecord {
    pub fn is_successful(&self) -> bool {
        self.encrypted_file_hash.is_some()
    }
}

pub struct NewEncryption {
    pub correlation_id: Uuid,
    pub local_file_hash: String,
    pub local_file_name: String,
    pub local_path: String,
    pub local_file_size: i64,
}

/// Lifecycle mirrors `TransferLedger`: `create` reserves against the
/// plaintext, `update` records the ciphertext hash and the PGP key
/// identifiers used, `record_error` leaves the row retryable.
pub struct EncryptionLedger;

impl EncryptionLedger {
    pub async fn get_by_hash(
        tx: &mut Transaction<'_, Postgres>,
        local_file_hash: &str,
    ) -> Result<Option<EncryptionRecord>, LedgerError> {
        let row = sqlx::query_as(
            r#"
            SELECT id, correlation_id, local_file_hash, local_file_name, local_path,
                   local_file_size, encrypted_file_hash, recipient_key_id, signing_key_id,
                   encryption_errors, created_at
            FROM encryption_record
            WHERE local_file_hash = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(local_file_hash)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row)
    }

    /// Reserves an encryption slot for a plaintext hash. Fails with
    /// `LedgerError::AlreadyEncrypted` if this hash already has a live row,
    /// whether or not that row recorded success — the plaintext is not
    /// re-encrypted even after a recorded failure, matching the original
    /// system's "one attempt, full stop" posture for cryptographic material.
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        new: NewEncryption,
    ) -> Result<EncryptionRecord, LedgerError> {
        let row: EncryptionRecord = sqlx::query_as(
            r#"
            INSERT INTO encryption_record
                (correlation_id, local_file_hash, local_file_name, local_path, local_file_size)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, correlation_id, local_file_hash, local_file_name, local_path,
                      local_file_size, encrypted_file_hash, recipient_key_id, signing_key_id,
                      encryption_errors, created_at
            "#,
        )
        .bind(new.correlation_id)
        .bind(&new.local_file_hash)
        .bind(&new.local_file_name)
        .bind(&new.local_path)
        .bind(new.local_file_size)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => LedgerError::AlreadyEncrypted {
                local_file_hash: new.local_file_hash.clone(),
            },
            _ => LedgerError::Database(err),
        })?;

        Ok(row)
    }

    pub async fn update(
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        encrypted_file_hash: &str,
        recipient_key_id: &str,
        signing_key_id: &str,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE encryption_record
            SET encrypted_file_hash = $2, recipient_key_id = $3, signing_key_id = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(encrypted_file_hash)
        .bind(recipient_key_id)
        .bind(signing_key_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound { id });
        }
        Ok(())
    }

    pub async fn record_error(tx: &mut Transaction<'_, Postgres>, id: i64, error: &str) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE encryption_record
            SET encryption_errors = $2
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
    fn successful_requires_encrypted_hash() {
        let record = EncryptionRecord {
            id: 1,
            correlation_id: Uuid::new_v4(),
            local_file_hash: "abc".into(),
            local_file_name: "f.csv".into(),
            local_path: "/in/f.csv".into(),
            local_file_size: 10,
            encrypted_file_hash: None,
            recipient_key_id: None,
            signing_key_id: None,
            encryption_errors: None,
            created_at: Utc::now(),
        };
        assert!(!record.is_successful());
    }
}
