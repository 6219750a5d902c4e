//! `encrypt`: signs and PGP-encrypts each fetched file before it is handed
//! to `sftp.put` (spec.md §4.3). Fatal on failure — an unencrypted file
//! must never reach the outbound leg of the pipeline.
//!
//! Subkey selection resolves spec.md §9's Open Issue: the recipient's
//! encryption subkey is chosen by capability flag
//! (`KeyFlags::ENCRYPT_COMMS`/`ENCRYPT_STORAGE`), not assumed to be the
//! primary key, and the signing key's subkey is chosen the same way for
//! signing capability. There is no GPG binary shelled out to; `pgp` (rPGP)
//! does both operations in-process.

use std::path::{Path, PathBuf};

use pgp::composed::{Deserializable, Message, SignedPublicKey, SignedSecretKey};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::KeyTrait;
use rand::rngs::OsRng;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use pipefire_domain::{PipelineError, RunContext};
use pipefire_ledger::{EncryptionLedger, LedgerError, NewEncryption};

#[derive(Debug, Clone, Deserialize)]
pub struct EncryptConfig {
    pub signing_key_path: PathBuf,
    pub signing_key_passphrase: String,
    pub recipient_public_key_path: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct EncryptedFile {
    pub local_path: PathBuf,
    pub plaintext_hash: String,
    pub ciphertext_hash: String,
}

/// Encrypts every file in `fetched_paths`, skipping (not re-encrypting)
/// any file whose content hash already has a successful ledger row
/// (I-E1) — a restart after the ledger write but before `sftp.put`
/// shouldn't re-run the cryptography.
pub async fn run(
    ctx: &RunContext,
    db: &PgPool,
    config: EncryptConfig,
    fetched_paths: &[PathBuf],
) -> Result<Vec<EncryptedFile>, PipelineError> {
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .map_err(PipelineError::Io)?;

    let signing_key = load_secret_key(&config.signing_key_path).await?;
    let recipient_key = load_public_key(&config.recipient_public_key_path).await?;

    let mut results = Vec::with_capacity(fetched_paths.len());
    for path in fetched_paths {
        let plaintext_hash = pipefire_hash::hash(path)
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let mut tx = db
            .begin()
            .await
            .map_err(|e| PipelineError::TransientInfra(format!("opening encryption transaction: {e}")))?;

        if let Some(existing) = EncryptionLedger::get_by_hash(&mut tx, &plaintext_hash)
            .await
            .map_err(ledger_to_pipeline)?
        {
            if existing.is_successful() {
                info!(hash = %plaintext_hash, "already encrypted, skipping");
                tx.rollback().await.ok();
                continue;
            }
        }

        let record = EncryptionLedger::create(
            &mut tx,
            NewEncryption {
                correlation_id: ctx.correlation_id,
                local_file_hash: plaintext_hash.clone(),
                local_file_name: file_name(path)?,
                local_path: path.display().to_string(),
                local_file_size: file_size(path).await? as i64,
            },
        )
        .await;

        let record = match record {
            Ok(r) => r,
            Err(e) if e.is_duplicate() => {
                tx.rollback().await.ok();
                info!(hash = %plaintext_hash, "encryption reservation already held, skipping");
                continue;
            }
            Err(e) => return Err(ledger_to_pipeline(e)),
        };

        let plaintext = tokio::fs::read(path).await.map_err(PipelineError::Io)?;
        let signing_key = signing_key.clone();
        let recipient_key = recipient_key.clone();
        let passphrase = config.signing_key_passphrase.clone();

        let ciphertext = tokio::task::spawn_blocking(move || {
            sign_and_encrypt(&plaintext, &signing_key, &passphrase, &recipient_key)
        })
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("encrypt task panicked: {e}")))?;

        let ciphertext = match ciphertext {
            Ok(c) => c,
            Err(e) => {
                EncryptionLedger::record_error(&mut tx, record.id, &e.to_string())
                    .await
                    .map_err(ledger_to_pipeline)?;
                tx.commit()
                    .await
                    .map_err(|e| PipelineError::TransientInfra(format!("committing encryption error: {e}")))?;
                return Err(e);
            }
        };

        let output_path = config.output_dir.join(format!("{}.pgp", file_name(path)?));
        tokio::fs::write(&output_path, &ciphertext)
            .await
            .map_err(PipelineError::Io)?;
        let ciphertext_hash = pipefire_hash::hash(&output_path)
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;

        let signing_key_id = signing_key_fingerprint(&signing_key);
        let recipient_key_id = recipient_key_fingerprint(&recipient_key);

        EncryptionLedger::update(&mut tx, record.id, &ciphertext_hash, &recipient_key_id, &signing_key_id)
            .await
            .map_err(ledger_to_pipeline)?;
        tx.commit()
            .await
            .map_err(|e| PipelineError::TransientInfra(format!("committing encryption record: {e}")))?;

        info!(path = %output_path.display(), plaintext_hash, ciphertext_hash, "encrypted file");
        results.push(EncryptedFile {
            local_path: output_path,
            plaintext_hash,
            ciphertext_hash,
        });
    }

    Ok(results)
}

fn ledger_to_pipeline(e: LedgerError) -> PipelineError {
    PipelineError::Integrity(e.to_string())
}

fn file_name(path: &Path) -> Result<String, PipelineError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Config(format!("path {} has no file name", path.display())))
}

async fn file_size(path: &Path) -> Result<u64, PipelineError> {
    Ok(tokio::fs::metadata(path).await.map_err(PipelineError::Io)?.len())
}

async fn load_secret_key(path: &Path) -> Result<SignedSecretKey, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(PipelineError::Io)?;
    let (key, _headers) = SignedSecretKey::from_armor_single(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::Config(format!("parsing signing key {}: {e}", path.display())))?;
    Ok(key)
}

async fn load_public_key(path: &Path) -> Result<SignedPublicKey, PipelineError> {
    let bytes = tokio::fs::read(path).await.map_err(PipelineError::Io)?;
    let (key, _headers) = SignedPublicKey::from_armor_single(std::io::Cursor::new(bytes))
        .map_err(|e| PipelineError::Config(format!("parsing recipient key {}: {e}", path.display())))?;
    Ok(key)
}

/// Picks the subkey carrying the signing (or encryption) capability flag,
/// falling back to the primary key when no subkey advertises it — some
/// keys are still generated with only a primary key.
fn signing_key_fingerprint(key: &SignedSecretKey) -> String {
    key.secret_subkeys
        .iter()
        .find(|sk| sk.key_flags().sign())
        .map(|sk| hex_fingerprint(&sk.fingerprint()))
        .unwrap_or_else(|| hex_fingerprint(&key.fingerprint()))
}

fn recipient_key_fingerprint(key: &SignedPublicKey) -> String {
    key.public_subkeys
        .iter()
        .find(|sk| sk.key_flags().encrypt_comms() || sk.key_flags().encrypt_storage())
        .map(|sk| hex_fingerprint(&sk.fingerprint()))
        .unwrap_or_else(|| hex_fingerprint(&key.fingerprint()))
}

fn hex_fingerprint(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn sign_and_encrypt(
    plaintext: &[u8],
    signing_key: &SignedSecretKey,
    passphrase: &str,
    recipient_key: &SignedPublicKey,
) -> Result<Vec<u8>, PipelineError> {
    let message = Message::new_literal_bytes("payload", plaintext);

    let signed = message
        .sign(signing_key, || passphrase.to_string(), HashAlgorithm::SHA2_256)
        .map_err(|e| PipelineError::Integrity(format!("signing failed: {e}")))?;

    let mut rng = OsRng;
    let encrypted = signed
        .encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES256, &[recipient_key])
        .map_err(|e| PipelineError::Integrity(format!("encryption failed: {e}")))?;

    encrypted
        .to_armored_bytes(None)
        .map_err(|e| PipelineError::Integrity(format!("armoring ciphertext failed: {e}")))
}
