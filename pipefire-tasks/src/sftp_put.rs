//! `sftp.put`: uploads encrypted files to the remote host exactly once,
//! ever, per (content hash, destination host) pair (spec.md §4.4, I-T1).
//!
//! The exactly-once guard is two-phase and deliberately does not hold a
//! database transaction open across the network upload:
//!
//! 1. **Reserve** — open a Serializable transaction, check
//!    `TransferLedger::already_sent`, insert a pending row, commit. This is
//!    the only part that needs the stronger isolation level: it is where
//!    two concurrent runs could otherwise both observe "not yet sent".
//! 2. **Transfer** — upload the bytes over SFTP, outside any transaction.
//! 3. **Finalize** — a second transaction records success (with the hash
//!    recomputed from the bytes read back off the remote host) or failure.

use std::io::Read as _;
use std::path::PathBuf;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{info, warn};

use pipefire_domain::{PipelineError, RunContext};
use pipefire_ledger::{LedgerError, NewTransfer, TransferLedger};

use crate::encrypt::EncryptedFile;
use crate::endpoint::{Endpoint, EndpointConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct SftpPutConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    pub local_host_id: String,
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub local_path: PathBuf,
    pub remote_path: PathBuf,
    pub skipped: bool,
}

pub async fn run(
    ctx: &RunContext,
    db: &PgPool,
    config: SftpPutConfig,
    encrypted_files: &[EncryptedFile],
) -> Result<Vec<PutResult>, PipelineError> {
    if encrypted_files.is_empty() {
        warn!(host = %config.endpoint.host, "sftp.put: no files to send, skipping");
        return Ok(Vec::new());
    }

    let mut endpoint = Endpoint::connect(config.endpoint.clone()).await?;
    let mut results = Vec::with_capacity(encrypted_files.len());

    for file in encrypted_files {
        let remote_host = config.endpoint.host.clone();

        let rehashed = pipefire_hash::hash(&file.local_path)
            .await
            .map_err(|e| PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        if rehashed != file.ciphertext_hash {
            return Err(PipelineError::Integrity(format!(
                "{} hash changed since reservation: expected {}, got {rehashed}",
                file.local_path.display(),
                file.ciphertext_hash
            )));
        }

        let reservation = reserve(db, ctx, &config, file).await?;
        let Some(record_id) = reservation else {
            info!(hash = %file.ciphertext_hash, host = %remote_host, "already sent, skipping");
            results.push(PutResult {
                local_path: file.local_path.clone(),
                remote_path: PathBuf::new(),
                skipped: true,
            });
            continue;
        };

        let remote_root = config.endpoint.remote_path.clone();
        let local_path = file.local_path.clone();
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::Config(format!("path {} has no file name", local_path.display())))?
            .to_string();

        // `Endpoint` is moved into the blocking closure and handed back out
        // alongside the result, since it can't be borrowed across a
        // `spawn_blocking` boundary that outlives this loop iteration.
        let (returned_endpoint, outcome) = {
            let remote_root = remote_root.clone();
            let file_name = file_name.clone();
            let local_path = local_path.clone();
            tokio::task::spawn_blocking(move || {
                let outcome = upload_one(&endpoint, &remote_root, &file_name, &local_path);
                (endpoint, outcome)
            })
            .await
            .map_err(|e| PipelineError::TransientInfra(format!("sftp.put task panicked: {e}")))?
        };
        endpoint = returned_endpoint;

        match outcome {
            Ok((remote_path, remote_size, remote_hash)) => {
                let mut tx = db
                    .begin()
                    .await
                    .map_err(|e| PipelineError::TransientInfra(format!("opening finalize transaction: {e}")))?;
                TransferLedger::update(
                    &mut tx,
                    record_id,
                    &file_name,
                    &remote_path.display().to_string(),
                    remote_size as i64,
                    &remote_hash,
                )
                .await
                .map_err(ledger_to_pipeline)?;
                tx.commit()
                    .await
                    .map_err(|e| PipelineError::TransientInfra(format!("committing transfer record: {e}")))?;

                info!(path = %remote_path.display(), hash = %remote_hash, "uploaded file");
                results.push(PutResult {
                    local_path,
                    remote_path,
                    skipped: false,
                });
            }
            Err(e) => {
                let mut tx = db
                    .begin()
                    .await
                    .map_err(|err| PipelineError::TransientInfra(format!("opening finalize transaction: {err}")))?;
                TransferLedger::record_error(&mut tx, record_id, &e.to_string())
                    .await
                    .map_err(ledger_to_pipeline)?;
                tx.commit()
                    .await
                    .map_err(|err| PipelineError::TransientInfra(format!("committing transfer error: {err}")))?;
                return Err(e);
            }
        }
    }

    Ok(results)
}

/// Opens the reservation transaction. Returns `None` when the file has
/// already been delivered (no further work to do); `Some(record_id)` when
/// this call holds a fresh reservation the caller must finalize.
async fn reserve(
    db: &PgPool,
    ctx: &RunContext,
    config: &SftpPutConfig,
    file: &EncryptedFile,
) -> Result<Option<i64>, PipelineError> {
    let mut tx = db
        .begin()
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("opening reservation transaction: {e}")))?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("setting isolation level: {e}")))?;

    if TransferLedger::already_sent(&mut tx, &file.ciphertext_hash, &config.endpoint.host)
        .await
        .map_err(ledger_to_pipeline)?
    {
        tx.rollback().await.ok();
        return Ok(None);
    }

    let file_name = file
        .local_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PipelineError::Config(format!("path {} has no file name", file.local_path.display())))?
        .to_string();
    let file_size = std::fs::metadata(&file.local_path).map_err(PipelineError::Io)?.len();

    let record = TransferLedger::create(
        &mut tx,
        NewTransfer {
            correlation_id: ctx.correlation_id,
            local_file_hash: file.ciphertext_hash.clone(),
            local_file_name: file_name,
            local_path: file.local_path.display().to_string(),
            local_file_size: file_size as i64,
            local_host_id: config.local_host_id.clone(),
            remote_host: config.endpoint.host.clone(),
        },
    )
    .await;

    match record {
        Ok(r) => {
            tx.commit()
                .await
                .map_err(|e| PipelineError::TransientInfra(format!("committing reservation: {e}")))?;
            Ok(Some(r.id))
        }
        Err(e) if e.is_duplicate() => {
            tx.rollback().await.ok();
            Ok(None)
        }
        Err(e) => Err(ledger_to_pipeline(e)),
    }
}

fn ledger_to_pipeline(e: LedgerError) -> PipelineError {
    PipelineError::Integrity(e.to_string())
}

/// Bit mask and regular-file tag from POSIX `st_mode`, mirroring the
/// symlink check in `sftp_get` — `ssh2::FileStat` has no `is_file()` helper
/// of its own.
const S_IFMT: u32 = 0o170_000;
const S_IFREG: u32 = 0o100_000;

fn is_regular_file(stat: &ssh2::FileStat) -> bool {
    stat.perm.map(|perm| perm & S_IFMT == S_IFREG).unwrap_or(false)
}

/// Creates `dir` and every missing ancestor, recursively, so an upload to a
/// remote tree that doesn't exist yet doesn't fail for want of `mkdir -p`
/// (spec.md §4.4.4). A no-op when `dir` already exists.
fn ensure_remote_dir(sftp: &ssh2::Sftp, dir: &std::path::Path) -> Result<(), PipelineError> {
    if sftp.stat(dir).is_ok() {
        return Ok(());
    }
    if let Some(parent) = dir.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_remote_dir(sftp, parent)?;
        }
    }
    match sftp.mkdir(dir, 0o755) {
        Ok(()) => Ok(()),
        // Lost a race with another creator, or the parent chain resolving
        // already brought this directory into existence.
        Err(_) if sftp.stat(dir).is_ok() => Ok(()),
        Err(e) => Err(PipelineError::TransientInfra(format!(
            "creating remote directory {}: {e}",
            dir.display()
        ))),
    }
}

/// Resolves where `local_path` lands remotely. Per spec.md §4.4.4: if
/// `remote_root` names an existing regular file, it is overwritten in
/// place; if it names a directory (existing or not), the upload is placed
/// inside it under the local basename, creating missing parent directories
/// recursively along the way.
fn resolve_remote_path(
    sftp: &ssh2::Sftp,
    remote_root: &std::path::Path,
    file_name: &str,
) -> Result<PathBuf, PipelineError> {
    match sftp.stat(remote_root) {
        Ok(stat) if is_regular_file(&stat) => Ok(remote_root.to_path_buf()),
        Ok(_) => Ok(remote_root.join(file_name)),
        Err(_) => {
            ensure_remote_dir(sftp, remote_root)?;
            Ok(remote_root.join(file_name))
        }
    }
}

fn upload_one(
    endpoint: &Endpoint,
    remote_root: &str,
    file_name: &str,
    local_path: &std::path::Path,
) -> Result<(PathBuf, u64, String), PipelineError> {
    let sftp = endpoint.sftp()?;
    let remote_path = resolve_remote_path(&sftp, std::path::Path::new(remote_root), file_name)?;

    let mut local_file =
        std::fs::File::open(local_path).map_err(PipelineError::Io)?;
    let mut remote_file = sftp
        .create(&remote_path)
        .map_err(|e| PipelineError::TransientInfra(format!("creating remote {}: {e}", remote_path.display())))?;
    std::io::copy(&mut local_file, &mut remote_file)
        .map_err(|e| PipelineError::TransientInfra(format!("uploading to {}: {e}", remote_path.display())))?;
    drop(remote_file);

    let stat = sftp
        .stat(&remote_path)
        .map_err(|e| PipelineError::TransientInfra(format!("stat of {} after upload: {e}", remote_path.display())))?;
    let size = stat.size.unwrap_or(0);

    let mut readback = sftp
        .open(&remote_path)
        .map_err(|e| PipelineError::TransientInfra(format!("reading back {}: {e}", remote_path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = readback
            .read(&mut buf)
            .map_err(|e| PipelineError::TransientInfra(format!("hashing readback of {}: {e}", remote_path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let hash = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect::<String>();

    Ok((remote_path, size, hash))
}
