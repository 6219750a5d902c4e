//! `sftp.clean`: recursively walks a remote directory and removes every
//! regular file it finds, leaving the directory structure itself intact
//! (spec.md §4.4.2). Not fatal on failure — a file that can't be deleted is
//! logged and the walk continues, since the goal is to remove as much as
//! possible, not to stop at the first obstacle.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use pipefire_domain::PipelineError;

use crate::endpoint::{Endpoint, EndpointConfig};
use crate::sftp_get::is_symlink;

#[derive(Debug, Clone, Deserialize)]
pub struct SftpCleanConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}

/// Removes every regular file under `config.endpoint.remote_path`,
/// recursively, leaving directories (and any symlinks, which are skipped
/// rather than followed or deleted) in place. Returns the count of files
/// removed on a clean pass; on any failure, returns the *last* observed
/// error per spec.md §4.4.2 — earlier failures are logged and do not abort
/// the walk.
pub async fn run(config: SftpCleanConfig) -> Result<usize, PipelineError> {
    let endpoint = Endpoint::connect(config.endpoint.clone()).await?;
    let remote_root = config.endpoint.remote_path.clone();

    tokio::task::spawn_blocking(move || clean_all(&endpoint, &remote_root))
        .await
        .map_err(|e| PipelineError::TransientInfra(format!("sftp.clean task panicked: {e}")))?
}

fn clean_all(endpoint: &Endpoint, remote_root: &str) -> Result<usize, PipelineError> {
    let sftp = endpoint.sftp()?;
    let mut removed = 0;
    let mut last_error = None;
    let mut pending: VecDeque<PathBuf> = VecDeque::new();
    pending.push_back(PathBuf::from(remote_root));

    while let Some(dir) = pending.pop_front() {
        let entries = match sftp.readdir(&dir) {
            Ok(e) => e,
            Err(e) => {
                last_error = Some(PipelineError::TransientInfra(format!("listing {}: {e}", dir.display())));
                continue;
            }
        };

        for (path, stat) in entries {
            if path.file_name().is_none() || is_symlink(&stat) {
                continue;
            }
            if stat.is_dir() {
                pending.push_back(path);
                continue;
            }
            match sftp.unlink(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.code() == ssh2::ErrorCode::SFTP(2) => {
                    // SSH_FX_NO_SUCH_FILE: already cleaned up, nothing to do.
                    warn!(path = %path.display(), "already absent during sftp.clean");
                }
                Err(e) => {
                    last_error = Some(PipelineError::TransientInfra(format!("deleting {}: {e}", path.display())));
                }
            }
        }
    }

    match last_error {
        Some(e) => Err(e),
        None => Ok(removed),
    }
}
